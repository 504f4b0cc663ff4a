//! Directory persistence for `MemoryBackend`
//!
//! Layout: `<root>/<account>/<collection>.json` holds a JSON array of the
//! collection's documents; blobs live as raw files under
//! `<root>/<account>/<collection>.files/<name>`.

use std::path::{Path, PathBuf};

use scenery_core::Document;
use tokio::fs;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::memory::{MemoryBackend, MemorySnapshot};

const DOCUMENTS_SUFFIX: &str = ".json";
const BLOBS_SUFFIX: &str = ".files";

fn checked(component: &str) -> Result<&str, BackendError> {
    let unsafe_component = component.is_empty()
        || component.contains(['/', '\\'])
        || component == ".."
        || component == ".";
    if unsafe_component {
        return Err(BackendError::Io(format!("unsafe path component {component:?}")));
    }
    Ok(component)
}

fn account_dir(root: &Path, account: &str) -> Result<PathBuf, BackendError> {
    Ok(root.join(checked(account)?))
}

/// Write every collection and blob of `backend` under `root`.
pub async fn save(backend: &MemoryBackend, root: &Path) -> Result<(), BackendError> {
    let snapshot = backend.snapshot().await;
    let mut written = 0usize;

    for (account, collections) in &snapshot.collections {
        let dir = account_dir(root, account)?;
        fs::create_dir_all(&dir).await?;
        for (name, docs) in collections {
            let path = dir.join(format!("{}{DOCUMENTS_SUFFIX}", checked(name)?));
            fs::write(&path, serde_json::to_vec_pretty(docs)?).await?;
            written += docs.len();
        }
    }

    for (account, stores) in &snapshot.blobs {
        let dir = account_dir(root, account)?;
        for (name, blobs) in stores {
            let blob_dir = dir.join(format!("{}{BLOBS_SUFFIX}", checked(name)?));
            fs::create_dir_all(&blob_dir).await?;
            for (blob, bytes) in blobs {
                fs::write(blob_dir.join(checked(blob)?), bytes).await?;
            }
        }
    }

    info!(root = %root.display(), documents = written, "saved store");
    Ok(())
}

/// Read a store written by [`save`]. A missing root yields an empty store.
pub async fn load(root: &Path) -> Result<MemoryBackend, BackendError> {
    let mut snapshot = MemorySnapshot::default();
    if !fs::try_exists(root).await? {
        debug!(root = %root.display(), "no saved store, starting empty");
        return Ok(MemoryBackend::new());
    }

    let mut accounts = fs::read_dir(root).await?;
    while let Some(account_entry) = accounts.next_entry().await? {
        if !account_entry.file_type().await?.is_dir() {
            continue;
        }
        let account = account_entry.file_name().to_string_lossy().into_owned();

        let mut entries = fs::read_dir(account_entry.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;

            if file_type.is_file() {
                if let Some(collection) = file_name.strip_suffix(DOCUMENTS_SUFFIX) {
                    let bytes = fs::read(entry.path()).await?;
                    let docs: Vec<Document> = serde_json::from_slice(&bytes)?;
                    snapshot
                        .collections
                        .entry(account.clone())
                        .or_default()
                        .insert(collection.to_string(), docs);
                }
            } else if file_type.is_dir() {
                if let Some(collection) = file_name.strip_suffix(BLOBS_SUFFIX) {
                    let store = snapshot
                        .blobs
                        .entry(account.clone())
                        .or_default()
                        .entry(collection.to_string())
                        .or_default();
                    let mut blobs = fs::read_dir(entry.path()).await?;
                    while let Some(blob) = blobs.next_entry().await? {
                        let name = blob.file_name().to_string_lossy().into_owned();
                        store.insert(name, fs::read(blob.path()).await?);
                    }
                }
            }
        }
    }

    info!(root = %root.display(), accounts = snapshot.collections.len(), "loaded store");
    Ok(MemoryBackend::from_snapshot(snapshot))
}
