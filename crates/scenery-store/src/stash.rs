//! Stash resolution: serve a revision's precomputed projection when one
//! exists, otherwise fall back to the raw scene narrowed to the live set.
//!
//! A stash is a cache. Its absence or failure is never surfaced to the
//! caller; a miss is only signalled to whoever generates stashes.

use std::sync::Arc;

use dashmap::DashSet;
use scenery_core::{Document, Revision, RevisionId, codec, labels};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Collection, Query, SharedBackend, document};
pub use crate::backend::StashFormat;
use crate::error::Result;
use crate::history::HistoryStore;

/// Where a projection's rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Stash,
    Raw,
}

/// Rows answering one projection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub source: Source,
    pub documents: Vec<Document>,
}

/// Identifies one stash: a revision of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StashKey {
    pub account: String,
    pub project: String,
    pub revision: RevisionId,
}

/// Receives stash-miss signals. Must not block.
pub trait StashNotifier: Send + Sync {
    fn notify_miss(&self, key: StashKey);
}

/// Drops every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl StashNotifier for NoopNotifier {
    fn notify_miss(&self, _key: StashKey) {}
}

/// Forwards misses over an unbounded channel, suppressing keys already pending.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<StashKey>,
    pending: Arc<DashSet<StashKey>>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, StashQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(DashSet::new());
        let notifier = ChannelNotifier {
            sender,
            pending: pending.clone(),
        };
        (notifier, StashQueue { receiver, pending })
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Receiving end of a `ChannelNotifier`.
#[derive(Debug)]
pub struct StashQueue {
    receiver: mpsc::UnboundedReceiver<StashKey>,
    pending: Arc<DashSet<StashKey>>,
}

impl StashQueue {
    /// Next signalled miss; `None` once every notifier is dropped.
    pub async fn next(&mut self) -> Option<StashKey> {
        self.receiver.recv().await
    }

    /// Mark `key` as handled so a later miss signals again.
    pub fn complete(&self, key: &StashKey) {
        self.pending.remove(key);
    }
}

impl StashNotifier for ChannelNotifier {
    fn notify_miss(&self, key: StashKey) {
        if !self.pending.insert(key.clone()) {
            return;
        }
        if self.sender.send(key.clone()).is_err() {
            debug!(revision = %key.revision, "stash worker has stopped, dropping miss");
            self.pending.remove(&key);
        }
    }
}

fn rev_filter(revision: RevisionId) -> Document {
    let mut filter = Document::new();
    filter.insert(labels::REV_ID.into(), codec::encode_id(&revision.0));
    filter
}

/// `filter` and `extra` combined; `extra` alone when `filter` is empty.
fn narrowed(filter: &Document, extra: Document) -> Document {
    if filter.is_empty() {
        extra
    } else {
        document(json!({ "$and": [Value::Object(filter.clone()), Value::Object(extra)] }))
    }
}

pub(crate) fn live_filter(revision: &Revision) -> Document {
    document(json!({
        labels::UNIQUE_ID: { "$in": codec::encode_ids(revision.current.iter().map(|u| &u.0)) }
    }))
}

pub struct StashResolver {
    backend: SharedBackend,
    format: StashFormat,
    notifier: Arc<dyn StashNotifier>,
}

impl std::fmt::Debug for StashResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashResolver")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl StashResolver {
    pub fn new(backend: SharedBackend, format: StashFormat) -> Self {
        StashResolver {
            backend,
            format,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StashNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn format(&self) -> StashFormat {
        self.format
    }

    /// Rows of `snapshot` matching `filter`, projected through `fields`.
    ///
    /// The stash is tried first. When it yields nothing or fails, the raw
    /// scene collection is queried with the same filter and fields, limited
    /// to the snapshot's live set.
    pub async fn get_projection(
        &self,
        account: &str,
        project: &str,
        snapshot: &Revision,
        filter: &Document,
        fields: Option<&Document>,
    ) -> Result<Projection> {
        let stash = Collection::Stash(self.format).name(project);
        let query = Query::new(narrowed(filter, rev_filter(snapshot.id))).fields(fields.cloned());

        match self.backend.find(account, &stash, &query).await {
            Ok(rows) if !rows.is_empty() => {
                debug!(account, project, revision = %snapshot.id, rows = rows.len(), "stash hit");
                let documents = rows
                    .into_iter()
                    .map(|mut row| {
                        row.remove(labels::REV_ID);
                        row
                    })
                    .collect();
                return Ok(Projection {
                    source: Source::Stash,
                    documents,
                });
            }
            Ok(_) => {
                debug!(account, project, revision = %snapshot.id, "stash miss");
                self.signal_if_absent(account, project, &stash, snapshot.id).await;
            }
            Err(err) => {
                warn!(
                    account,
                    project,
                    revision = %snapshot.id,
                    error = %err,
                    "stash query failed, using raw scene"
                );
            }
        }

        let raw = Collection::Scene.name(project);
        let query = Query::new(narrowed(filter, live_filter(snapshot))).fields(fields.cloned());
        let documents = self.backend.find(account, &raw, &query).await?;
        Ok(Projection {
            source: Source::Raw,
            documents,
        })
    }

    /// Signal a miss only when the revision has no stash rows at all, not when
    /// the filter merely matched nothing.
    async fn signal_if_absent(
        &self,
        account: &str,
        project: &str,
        stash: &str,
        revision: RevisionId,
    ) {
        match self.backend.count(account, stash, &rev_filter(revision)).await {
            Ok(0) => self.notifier.notify_miss(StashKey {
                account: account.to_string(),
                project: project.to_string(),
                revision,
            }),
            Ok(_) => {}
            Err(err) => debug!(error = %err, "could not check stash presence"),
        }
    }
}

/// Writes the stash of a revision: its live scene nodes tagged with `rev_id`,
/// with their mesh buffer blobs copied alongside.
pub struct StashBuilder {
    backend: SharedBackend,
    format: StashFormat,
}

impl std::fmt::Debug for StashBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashBuilder")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl StashBuilder {
    pub fn new(backend: SharedBackend, format: StashFormat) -> Self {
        StashBuilder { backend, format }
    }

    /// Generate the stash for `revision`. Returns the number of rows written;
    /// zero when a stash for the revision already exists.
    pub async fn generate(
        &self,
        account: &str,
        project: &str,
        revision: &Revision,
    ) -> Result<usize> {
        let stash = Collection::Stash(self.format).name(project);
        if self.backend.count(account, &stash, &rev_filter(revision.id)).await? > 0 {
            debug!(account, project, revision = %revision.id, "stash already present");
            return Ok(0);
        }

        let scene = Collection::Scene.name(project);
        let nodes = self
            .backend
            .find(account, &scene, &Query::new(live_filter(revision)))
            .await?;

        let mut rows = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            if let Some(unique_id) = node.get(labels::UNIQUE_ID).and_then(codec::id_text) {
                for field in labels::MESH_BUFFER_FIELDS {
                    let name = format!("{unique_id}_{field}");
                    if let Some(bytes) = self.backend.get_blob(account, &scene, &name).await? {
                        self.backend.put_blob(account, &stash, &name, bytes).await?;
                    }
                }
            }
            node.insert(labels::REV_ID.into(), codec::encode_id(&revision.id.0));
            rows.push(node);
        }

        let written = rows.len();
        self.backend.insert_many(account, &stash, rows).await?;
        info!(
            account,
            project,
            revision = %revision.id,
            rows = written,
            format = %self.format,
            "generated stash"
        );
        Ok(written)
    }
}

/// Background task that generates stashes for signalled misses.
pub struct StashWorker;

impl StashWorker {
    /// Drain `queue` until every notifier is dropped.
    pub fn spawn(
        builder: Arc<StashBuilder>,
        history: Arc<HistoryStore>,
        mut queue: StashQueue,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(key) = queue.next().await {
                let found = history
                    .revision(&key.account, &key.project, key.revision)
                    .await;
                let generated = match found {
                    Ok(revision) => builder.generate(&key.account, &key.project, &revision).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = generated {
                    warn!(
                        account = %key.account,
                        project = %key.project,
                        revision = %key.revision,
                        error = %err,
                        "stash generation failed"
                    );
                }
                queue.complete(&key);
            }
            debug!("stash worker stopped");
        })
    }
}
