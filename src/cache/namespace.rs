//! Key Namespace Module
//!
//! Prefixes logical keys so that tenants sharing a store never collide.

/// Fixed prefix applied to every key and pattern before it reaches a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `prefix + key`.
    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Namespaces every key of a batch.
    pub fn keys<I, K>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter().map(|k| self.key(k.as_ref())).collect()
    }

    /// Derived key guarding `key` in the lock coordinator.
    pub fn lock_key(&self, key: &str) -> String {
        format!("{}{}-lock", self.prefix, key)
    }

    /// Namespaces a glob pattern, collapsing `**` to the store's single `*`.
    pub fn pattern(&self, pattern: &str) -> String {
        let mut collapsed = pattern.to_string();
        while collapsed.contains("**") {
            collapsed = collapsed.replace("**", "*");
        }
        self.key(&collapsed)
    }
}
