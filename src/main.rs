//! Shard Cache smoke check
//!
//! Connects with the environment configuration and runs one round trip of
//! every facade operation, which makes it handy as a deployment smoke check.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shard_cache::{Cache, Config};

const SMOKE_KEY: &str = "smoke:heartbeat";

#[derive(Debug, Serialize, Deserialize)]
struct Heartbeat {
    host: String,
    at: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        url = %config.url,
        cluster = config.cluster.is_some(),
        prefix = %config.prefix,
        "Configuration loaded"
    );

    let cache = Cache::connect(&config)
        .await
        .context("failed to open cache connections")?;

    let outcome = smoke_check(&cache).await;
    if let Err(err) = cache.close().await {
        warn!(error = %err, "Close reported errors");
    }
    outcome
}

async fn smoke_check(cache: &Cache) -> anyhow::Result<()> {
    let heartbeat = Heartbeat {
        host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        at: chrono::Utc::now().to_rfc3339(),
    };

    cache
        .set(SMOKE_KEY, &heartbeat, Some(60))
        .await
        .context("set failed")?;

    let read = cache
        .get_with_ttl::<Heartbeat>(SMOKE_KEY)
        .await
        .context("get_with_ttl failed")?;
    info!(value = ?read.value, ttl = ?read.ttl, "Read back heartbeat");

    let lock = cache
        .try_lock(SMOKE_KEY, Some(Duration::from_secs(5)))
        .await
        .context("try_lock failed")?;
    info!(resource = %lock.resource(), expires_at = %lock.expires_at(), "Heartbeat lock held");
    lock.release().await.context("lock release failed")?;

    let removed = cache.del([SMOKE_KEY]).await.context("del failed")?;
    info!(removed, "Smoke check complete");
    Ok(())
}
