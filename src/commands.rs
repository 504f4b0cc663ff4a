//! CLI command implementations

use std::sync::Arc;

use anyhow::Context;
use scenery_core::BranchRef;
use scenery_server::{SceneryServer, ServerConfig};
use scenery_store::{ChannelNotifier, MemoryBackend, SceneStore, StashBuilder, StashWorker, dump};
use serde::Serialize;

use crate::config::Config;

/// Load the persisted store and wrap it in a facade configured from `config`.
async fn open_store(config: &Config) -> anyhow::Result<(Arc<MemoryBackend>, SceneStore)> {
    let data_dir = &config.store.data_dir;
    let backend = Arc::new(
        dump::load(data_dir)
            .await
            .with_context(|| format!("loading store from {}", data_dir.display()))?,
    );
    let store = SceneStore::new(backend.clone())
        .with_stash_format(config.store.stash_format)
        .with_federation_depth(config.federation.max_depth)
        .with_federation_timeout(config.federation_timeout());
    Ok((backend, store))
}

async fn persist(backend: &MemoryBackend, config: &Config) -> anyhow::Result<()> {
    dump::save(backend, &config.store.data_dir)
        .await
        .with_context(|| format!("saving store to {}", config.store.data_dir.display()))?;
    tracing::info!("Saved store to {}", config.store.data_dir.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Scenery server on {}:{}", config.server.host, config.server.port);
    let (backend, mut store) = open_store(&config).await?;

    let worker = if config.store.auto_stash {
        let (notifier, queue) = ChannelNotifier::new();
        store = store.with_notifier(Arc::new(notifier));
        let builder = Arc::new(StashBuilder::new(backend.clone(), config.store.stash_format));
        Some(StashWorker::spawn(builder, store.history().clone(), queue))
    } else {
        None
    };

    let server = SceneryServer::new(
        store,
        ServerConfig {
            host: config.server.host.clone(),
            port: config.server.port,
        },
    );

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    // Stashes generated while serving are kept.
    if let Some(worker) = worker {
        worker.abort();
        persist(&backend, &config).await?;
    }
    Ok(())
}

pub async fn branches(config: Config, account: &str, project: &str) -> anyhow::Result<()> {
    let (_, store) = open_store(&config).await?;
    print_json(&store.list_branches(account, project).await?)
}

pub async fn revisions(
    config: Config,
    account: &str,
    project: &str,
    branch: Option<&str>,
    from: Option<usize>,
    to: Option<usize>,
) -> anyhow::Result<()> {
    let (_, store) = open_store(&config).await?;
    print_json(&store.list_revisions(account, project, branch, from, to).await?)
}

pub async fn diff(
    config: Config,
    account: &str,
    project: &str,
    from: &str,
    to: &str,
) -> anyhow::Result<()> {
    let (_, store) = open_store(&config).await?;
    let diff = store
        .diff(account, project, &BranchRef::parse(from)?, &BranchRef::parse(to)?)
        .await?;
    print_json(&diff)
}

pub async fn federation(
    config: Config,
    account: &str,
    project: &str,
    reference: &str,
) -> anyhow::Result<()> {
    let (_, store) = open_store(&config).await?;
    let expansions = store
        .federation(account, project, &BranchRef::parse(reference)?)
        .await?;
    let unresolved = expansions.iter().filter(|e| !e.outcome.is_resolved()).count();
    if unresolved > 0 {
        tracing::warn!("{} of {} references did not resolve", unresolved, expansions.len());
    }
    print_json(&expansions)
}

/// Generate and persist the stash of one snapshot.
pub async fn stash(
    config: Config,
    account: &str,
    project: &str,
    reference: &str,
) -> anyhow::Result<()> {
    let (backend, store) = open_store(&config).await?;
    let revision = store
        .resolve_snapshot(account, project, &BranchRef::parse(reference)?)
        .await?;
    let builder = StashBuilder::new(backend.clone(), config.store.stash_format);
    let written = builder.generate(account, project, &revision).await?;
    if written == 0 {
        tracing::info!("Stash for revision {} already exists", revision.id);
        return Ok(());
    }
    tracing::info!("Wrote {} stash rows for revision {}", written, revision.id);
    persist(&backend, &config).await
}
