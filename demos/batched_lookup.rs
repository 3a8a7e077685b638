//! Batched lookup example
//!
//! Puts a batcher in front of a simulated bulk key/value store. Forty callers
//! each ask for one key; the store sees a handful of paced bulk reads, and
//! missing keys fail only their own caller.
//!
//! Usage:
//!   RUST_LOG=request_batcher=debug cargo run --example batched_lookup
//!
//! An optional YAML or JSON config path may be passed as the first argument.

use anyhow::Context;
use futures::future::join_all;
use request_batcher::{BatchError, Batcher, BatcherConfig, Threshold};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Store {
    rows: HashMap<u32, String>,
    reads: AtomicUsize,
}

impl Store {
    fn seeded() -> Self {
        let rows = (0..50)
            .filter(|k| k % 7 != 3)
            .map(|k| (k, format!("user-{k:03}")))
            .collect();
        Self {
            rows,
            reads: AtomicUsize::new(0),
        }
    }

    async fn bulk_get(&self, keys: Vec<u32>) -> Vec<Result<String, String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        keys.into_iter()
            .map(|k| self.rows.get(&k).cloned().ok_or_else(|| format!("no row for key {k}")))
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BatcherConfig::from_file(&path)
            .with_context(|| format!("loading batcher config from {path}"))?,
        None => BatcherConfig::new()
            .with_max_batch_size(16)
            .with_closing_thresholds([Threshold::Count(1), Threshold::Count(8)])
            .with_pacing_delay(Duration::from_millis(10)),
    };
    println!("config: {}", serde_json::to_string(&config)?);

    let store = Arc::new(Store::seeded());
    let backend = Arc::clone(&store);
    let lookup: Batcher<u32, String, String> = Batcher::builder()
        .config(config)
        .batch_operation(move |keys: Vec<u32>| {
            let store = Arc::clone(&backend);
            async move { Ok(store.bulk_get(keys).await) }
        })
        .build()?;

    let pending: Vec<_> = (0..40).map(|k| lookup.submit(k)).collect();
    let results = join_all(pending).await;

    let mut misses = 0;
    for (key, result) in results.iter().enumerate() {
        match result {
            Ok(value) => println!("{key:>2} => {value}"),
            Err(BatchError::Item(reason)) => {
                misses += 1;
                println!("{key:>2} => miss ({reason})");
            }
            Err(other) => anyhow::bail!("lookup {key} failed: {other}"),
        }
    }

    let snapshot = lookup.snapshot();
    println!(
        "\n{} lookups, {} misses, {} bulk reads, {} batches dispatched",
        results.len(),
        misses,
        store.reads.load(Ordering::SeqCst),
        snapshot.batches_dispatched
    );
    Ok(())
}
