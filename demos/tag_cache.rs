//! Looks tags up through a persistent read-through cache.
//!
//! Run it twice with the same tags: the second run answers from the snapshot without touching the (slow) catalog.
//!
//! ```text
//! cargo run --example tag_cache --features demo -- artist:foo species:fox general:nope
//! RUST_LOG=rt_cache=debug cargo run --example tag_cache --features demo -- artist:foo
//! ```

use async_trait::async_trait;
use clap::Parser;
use rt_cache::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, clap::Parser)]
#[clap(about, version, name = "tag_cache")]
struct Cli {
    /// Tags to look up.
    #[clap(required = true)]
    tags: Vec<String>,

    /// Snapshot file.
    #[clap(long, short, env = "RTCACHE_FILE", default_value = "tags.cache")]
    cache_file: PathBuf,

    /// Simulated catalog latency.
    #[clap(long, env = "RTCACHE_LATENCY_MS", default_value_t = 300)]
    latency_ms: u64,

    #[clap(long, env = "RTCACHE_QUIET_PERIOD_MS", default_value_t = 2_000)]
    quiet_period_ms: u64,

    /// Drop everything cached before the lookups.
    #[clap(long, default_value_t = false)]
    clear: bool,

    /// Start over if the snapshot can't be read instead of bailing out.
    #[clap(long, default_value_t = false)]
    discard_broken: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Category {
    General,
    Artist,
    Copyright,
    Character,
    Species,
    Meta,
}

impl Category {
    fn of(name: &str) -> Self {
        match name.split_once(':').map(|(prefix, _)| prefix) {
            Some("artist") => Self::Artist,
            Some("copyright") => Self::Copyright,
            Some("character") => Self::Character,
            Some("species") => Self::Species,
            Some("meta") => Self::Meta,
            _ => Self::General,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Tag {
    id:         u64,
    name:       String,
    post_count: u64,
    category:   Category,
    is_locked:  bool,
}

#[derive(Debug, thiserror::Error)]
#[error("catalog is unreachable")]
struct CatalogUnreachable;

/// Stands in for a remote tag API.
#[derive(Debug)]
struct TagCatalog {
    latency: Duration,
    tags:    HashMap<String, Tag>,
}

impl TagCatalog {
    fn new(latency: Duration) -> Self {
        let tags = [
            ("artist:foo", 42),
            ("species:fox", 18_345),
            ("character:red_panda", 911),
            ("copyright:original", 250_112),
            ("meta:highres", 1_204_330),
            ("general:smile", 874_002),
        ]
        .into_iter()
        .enumerate()
        .map(|(id, (name, post_count))| {
            let tag = Tag {
                id: id as u64 + 1,
                name: name.to_string(),
                post_count,
                category: Category::of(name),
                is_locked: name.starts_with("meta:"),
            };
            (tag.name.clone(), tag)
        })
        .collect();

        Self { latency, tags }
    }
}

#[async_trait]
impl DataSource for TagCatalog {
    type Error = CatalogUnreachable;
    type Key = String;
    type Value = Tag;

    async fn fetch(&self, key: &String) -> Result<Fetched<Tag>, CatalogUnreachable> {
        tokio::time::sleep(self.latency).await;
        Ok(self.tags.get(key).cloned().into())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rt_cache=info,tag_cache=info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    let cli = Cli::parse();

    let cache = ReadThroughCache::builder()
        .name("tags")
        .data_source(Arc::new(TagCatalog::new(Duration::from_millis(cli.latency_ms))))
        .codec(Arc::new(JsonCodec::<String, Tag>::pretty()))
        .path(cli.cache_file.clone())
        .quiet_period(Duration::from_millis(cli.quiet_period_ms))
        .recovery(if cli.discard_broken {
            SnapshotRecovery::StartEmpty
        }
        else {
            SnapshotRecovery::Fail
        })
        .build()?;

    let loaded = cache.initialize().await?;
    info!("{loaded} tags known from {}", cache.snapshot_path().display());

    if cli.clear {
        cache.clear().await?;
    }

    for name in &cli.tags {
        let started = tokio::time::Instant::now();
        match cache.get(name).await? {
            Some(tag) => println!(
                "{:<24} #{:<4} {:>10} posts  {:?}{}  ({:?})",
                tag.name,
                tag.id,
                tag.post_count,
                tag.category,
                if tag.is_locked { ", locked" } else { "" },
                started.elapsed()
            ),
            None => println!("{name:<24} not found  ({:?})", started.elapsed()),
        }
    }

    cache.dispose().await;
    Ok(())
}
