//! Invalidation Index Inspector
//!
//! Opens a file-backed cache and compares a namespace's invalidation index
//! with the data keys actually stored. Exits non-zero when they drift.
//!
//! Usage:
//!   cairn-inspect <lmdb-path> <namespace> [--rebuild]
//!
//! `--rebuild` replaces the index with the scanned keys. Log verbosity is
//! controlled with `RUST_LOG`.

use std::collections::BTreeSet;
use std::process::ExitCode;

use cairn_core::{BackendKind, CacheConfig, CairnResult, NamespacedKey};
use cairn_storage::Cache;
use tracing_subscriber::EnvFilter;

fn usage() -> ExitCode {
    eprintln!("usage: cairn-inspect <lmdb-path> <namespace> [--rebuild]");
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cairn_storage=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (path, namespace, rebuild) = match args.as_slice() {
        [path, namespace] => (path, namespace, false),
        [path, namespace, flag] if flag == "--rebuild" => (path, namespace, true),
        _ => return usage(),
    };

    let config = CacheConfig::new(BackendKind::File)
        .with_path(path)
        .with_namespace(namespace.as_str());

    match inspect(&config, rebuild).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "inspection failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Print the report. Returns whether index and store agree.
async fn inspect(config: &CacheConfig, rebuild: bool) -> CairnResult<bool> {
    let cache = Cache::open(config).await?;

    if rebuild {
        let indexed = cache.rebuild_index().await?;
        println!("rebuilt index with {} key(s)", indexed);
    }

    let index = cache.index_snapshot().await?;
    let prefix = NamespacedKey::namespace_prefix(cache.namespace());
    let stored: BTreeSet<String> = cache
        .store()
        .keys()
        .await?
        .into_iter()
        .filter(|key| key.starts_with(&prefix))
        .collect();

    println!("namespace: {}", cache.namespace());
    println!("indexed keys ({}):", index.len());
    for key in &index {
        match NamespacedKey::decode(key) {
            Some(parsed) => println!("  {}  [group={} id={}]", key, parsed.group(), parsed.identifier()),
            None => println!("  {}", key),
        }
    }

    let unindexed: Vec<_> = stored.difference(&index).collect();
    let dead: Vec<_> = index.difference(&stored).collect();

    println!("stored but not indexed ({}):", unindexed.len());
    for key in &unindexed {
        println!("  {}", key);
    }
    println!("indexed but not stored ({}):", dead.len());
    for key in &dead {
        println!("  {}", key);
    }

    let stats = cache.stats().await?;
    println!("store entries: {} ({} bytes)", stats.entry_count, stats.memory_bytes);

    Ok(unindexed.is_empty() && dead.is_empty())
}
