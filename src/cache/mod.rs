//! Cache Module
//!
//! Client facade over a node connection: key namespacing, value encoding,
//! pattern invalidation and distributed locks.

mod clean;
mod client;
mod namespace;


// Re-export public types
pub use clean::{clean_pattern, clean_patterns};
pub use client::{Cache, CacheOptions, TtlValue};
pub use namespace::Namespace;
