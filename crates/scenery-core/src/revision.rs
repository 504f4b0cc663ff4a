//! Revisions, branch references and commit descriptions

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::{IdError, NodeError};
use crate::ids::{BranchId, RevisionId, SharedId, UniqueId, id_to_bytes};
use crate::labels;
use crate::model::{Document, Fields, NodeKind, put};

/// Prefix that marks an explicit revision in a textual reference.
pub const REVISION_PREFIX: &str = "rev:";

/// An immutable snapshot in a branch's history.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub id: RevisionId,
    /// Stored as the revision's shared id.
    pub branch: BranchId,
    pub parents: Vec<RevisionId>,
    /// Every unique id live at this point in history.
    pub current: Vec<UniqueId>,
    pub added: Vec<SharedId>,
    pub deleted: Vec<SharedId>,
    pub modified: Vec<SharedId>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub tag: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub extra: Document,
}

impl Revision {
    /// First revision of a branch: no parents, everything in `current` is added.
    pub fn initial(branch: BranchId, current: Vec<UniqueId>, added: Vec<SharedId>) -> Self {
        Revision {
            id: RevisionId::generate(),
            branch,
            parents: Vec::new(),
            current,
            added,
            deleted: Vec::new(),
            modified: Vec::new(),
            author: None,
            message: None,
            tag: None,
            timestamp: Some(Utc::now()),
            extra: Document::new(),
        }
    }

    pub fn contains(&self, unique_id: &UniqueId) -> bool {
        self.current.contains(unique_id)
    }

    pub fn from_document(doc: Document) -> Result<Self, NodeError> {
        let mut fields = Fields::new(doc);
        match fields.take(labels::TYPE) {
            Some(Value::String(label)) if label == NodeKind::Revision.label() => {}
            Some(Value::String(label)) => return Err(NodeError::UnsupportedType(label)),
            Some(_) => return Err(NodeError::field(labels::TYPE, "expected a string")),
            None => return Err(NodeError::MissingType),
        }

        let id = fields
            .id(labels::UNIQUE_ID)?
            .ok_or(NodeError::MissingField(labels::UNIQUE_ID))?;
        let branch = fields.id(labels::SHARED_ID)?.unwrap_or_default();
        let timestamp = fields.take(labels::TIMESTAMP).map(parse_timestamp).transpose()?;

        Ok(Revision {
            id: RevisionId(id),
            branch: BranchId(branch),
            parents: ids_of(&mut fields, labels::PARENTS)?,
            current: ids_of(&mut fields, labels::CURRENT)?,
            added: ids_of(&mut fields, labels::ADDED)?,
            deleted: ids_of(&mut fields, labels::DELETED)?,
            modified: ids_of(&mut fields, labels::MODIFIED)?,
            author: fields.string(labels::AUTHOR)?,
            message: fields.string(labels::MESSAGE)?,
            tag: fields.string(labels::TAG)?,
            timestamp,
            extra: fields.into_rest(),
        })
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(labels::UNIQUE_ID.into(), codec::encode_id(&self.id.0));
        doc.insert(labels::SHARED_ID.into(), codec::encode_id(&self.branch.0));
        doc.insert(labels::TYPE.into(), Value::String(NodeKind::Revision.label().into()));
        if !self.parents.is_empty() {
            let parents = codec::encode_ids(self.parents.iter().map(|p| &p.0));
            doc.insert(labels::PARENTS.into(), parents);
        }
        doc.insert(labels::CURRENT.into(), codec::encode_ids(self.current.iter().map(|u| &u.0)));
        for (key, set) in [
            (labels::ADDED, &self.added),
            (labels::DELETED, &self.deleted),
            (labels::MODIFIED, &self.modified),
        ] {
            if !set.is_empty() {
                doc.insert(key.into(), codec::encode_ids(set.iter().map(|s| &s.0)));
            }
        }
        put(&mut doc, labels::AUTHOR, self.author.clone());
        put(&mut doc, labels::MESSAGE, self.message.clone());
        put(&mut doc, labels::TAG, self.tag.clone());
        put(&mut doc, labels::TIMESTAMP, self.timestamp.map(|t| t.timestamp_millis()));
        for (key, value) in &self.extra {
            doc.entry(key.clone()).or_insert_with(|| value.clone());
        }
        doc
    }

    pub fn summary(&self) -> RevisionSummary {
        RevisionSummary {
            id: self.id,
            branch: self.branch,
            tag: self.tag.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Display form with the defaults used when fields are missing.
    pub fn info(&self) -> RevisionInfo {
        RevisionInfo {
            revision: self.id.to_string(),
            branch: self.branch.to_string(),
            author: self.author.clone().unwrap_or_else(|| "unnamed".to_string()),
            message: self.message.clone().unwrap_or_default(),
            tag: self.tag.clone().unwrap_or_default(),
            timestamp: self
                .timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

fn ids_of<T: From<crate::ids::Identifier>>(
    fields: &mut Fields,
    key: &str,
) -> Result<Vec<T>, NodeError> {
    Ok(fields
        .ids(key)?
        .unwrap_or_default()
        .into_iter()
        .map(T::from)
        .collect())
}

/// Timestamps are epoch milliseconds; `{"$date": millis}` and RFC 3339 text
/// are accepted on read.
fn parse_timestamp(value: Value) -> Result<DateTime<Utc>, NodeError> {
    let bad = |reason: String| NodeError::field(labels::TIMESTAMP, reason);
    let millis = match &value {
        Value::Number(n) => n.as_i64(),
        Value::Object(obj) => obj.get("$date").and_then(|d| match d {
            Value::Number(n) => n.as_i64(),
            Value::Object(inner) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
            Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp_millis()),
            _ => None,
        }),
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp_millis()),
        _ => None,
    };
    let millis = millis.ok_or_else(|| bad(format!("unreadable timestamp {value}")))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| bad(format!("timestamp {millis} is out of range")))
}

/// Compact listing entry for a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub id: RevisionId,
    pub branch: BranchId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Human-readable description of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub revision: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    pub tag: String,
    pub timestamp: String,
}

/// Selects a snapshot: the head of a branch, or one explicit revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchRef {
    Branch(String),
    Revision(RevisionId),
}

impl BranchRef {
    pub fn master() -> Self {
        BranchRef::Branch(labels::MASTER_BRANCH_NAME.to_string())
    }

    /// Parse `master`, a branch name or `rev:<uuid>`.
    pub fn parse(text: &str) -> Result<Self, IdError> {
        match text.strip_prefix(REVISION_PREFIX) {
            Some(rev) if rev == labels::HEAD_REVISION_NAME => Ok(BranchRef::master()),
            Some(rev) => id_to_bytes(rev).map(|id| BranchRef::Revision(RevisionId(id))),
            None if text.is_empty() => Ok(BranchRef::master()),
            None => Ok(BranchRef::Branch(text.to_string())),
        }
    }

    /// Combine an optional branch name and optional revision.
    ///
    /// An explicit revision wins unless it is the literal `head`, which means
    /// the head of the branch (master when no branch is given).
    pub fn from_parts(branch: Option<&str>, revision: Option<&str>) -> Result<Self, IdError> {
        match revision {
            Some(rev) if rev != labels::HEAD_REVISION_NAME => {
                id_to_bytes(rev).map(|id| BranchRef::Revision(RevisionId(id)))
            }
            _ => Ok(BranchRef::Branch(
                branch.unwrap_or(labels::MASTER_BRANCH_NAME).to_string(),
            )),
        }
    }

    /// Branch identity, for branch references.
    pub fn branch_id(&self) -> Option<BranchId> {
        match self {
            BranchRef::Branch(name) => Some(BranchId::from_name(name)),
            BranchRef::Revision(_) => None,
        }
    }
}

impl Default for BranchRef {
    fn default() -> Self {
        Self::master()
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchRef::Branch(name) => f.write_str(name),
            BranchRef::Revision(id) => write!(f, "{REVISION_PREFIX}{id}"),
        }
    }
}

/// A node written by a commit, identified both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub unique_id: UniqueId,
    pub shared_id: SharedId,
}

impl NodeRef {
    pub fn new(unique_id: UniqueId, shared_id: SharedId) -> Self {
        NodeRef {
            unique_id,
            shared_id,
        }
    }

    pub fn of<N: crate::model::SceneNode + ?Sized>(node: &N) -> Self {
        NodeRef::new(node.unique_id(), node.shared_id())
    }
}

/// A logical node whose content changed: `from` leaves the live set, `to` joins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modification {
    pub shared_id: SharedId,
    pub from: UniqueId,
    pub to: UniqueId,
}

/// Change set proposed for a new revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub added: Vec<NodeRef>,
    pub deleted: Vec<NodeRef>,
    pub modified: Vec<Modification>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub tag: Option<String>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, node: NodeRef) -> Self {
        self.added.push(node);
        self
    }

    pub fn delete(mut self, node: NodeRef) -> Self {
        self.deleted.push(node);
        self
    }

    pub fn modify(mut self, shared_id: SharedId, from: UniqueId, to: UniqueId) -> Self {
        self.modified.push(Modification { shared_id, from, to });
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Live set after applying this commit to `parent`:
    /// `parent - deleted - modified.from + added + modified.to`, order preserved.
    pub fn apply_to(&self, parent: &[UniqueId]) -> Vec<UniqueId> {
        let removed: std::collections::HashSet<UniqueId> = self
            .deleted
            .iter()
            .map(|n| n.unique_id)
            .chain(self.modified.iter().map(|m| m.from))
            .collect();
        let mut current: Vec<UniqueId> = parent
            .iter()
            .filter(|id| !removed.contains(id))
            .copied()
            .collect();
        let mut seen: std::collections::HashSet<UniqueId> = current.iter().copied().collect();
        for id in self
            .added
            .iter()
            .map(|n| n.unique_id)
            .chain(self.modified.iter().map(|m| m.to))
        {
            if seen.insert(id) {
                current.push(id);
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_branch_ref_parse() {
        assert_eq!(BranchRef::parse("master").unwrap(), BranchRef::master());
        assert_eq!(BranchRef::parse("").unwrap(), BranchRef::master());
        assert_eq!(BranchRef::parse("rev:head").unwrap(), BranchRef::master());
        assert_eq!(
            BranchRef::parse("feature").unwrap(),
            BranchRef::Branch("feature".into())
        );

        let id = RevisionId::generate();
        let parsed = BranchRef::parse(&format!("rev:{id}")).unwrap();
        assert_eq!(parsed, BranchRef::Revision(id));
        assert_eq!(parsed.to_string(), format!("rev:{id}"));
        assert!(parsed.branch_id().is_none());

        assert!(BranchRef::parse("rev:nope").is_err());
    }

    #[test]
    fn test_branch_ref_from_parts() {
        let id = RevisionId::generate();
        let text = id.to_string();
        assert_eq!(
            BranchRef::from_parts(Some("dev"), Some(&text)).unwrap(),
            BranchRef::Revision(id)
        );
        assert_eq!(
            BranchRef::from_parts(Some("dev"), Some("head")).unwrap(),
            BranchRef::Branch("dev".into())
        );
        assert_eq!(BranchRef::from_parts(None, None).unwrap(), BranchRef::master());
    }

    #[test]
    fn test_revision_document_round_trip() {
        let mut rev = Revision::initial(
            BranchId::MASTER,
            vec![UniqueId::generate(), UniqueId::generate()],
            vec![SharedId::generate()],
        );
        rev.author = Some("ana".into());
        rev.extra.insert("incomplete".into(), json!(false));
        rev.timestamp = Utc.timestamp_millis_opt(1_700_000_000_123).single();

        let doc = rev.to_document();
        assert_eq!(doc[labels::TIMESTAMP], json!(1_700_000_000_123i64));
        let decoded = Revision::from_document(doc).unwrap();
        assert_eq!(decoded, rev);
    }

    #[test]
    fn test_revision_rejects_scene_nodes() {
        let mut doc = Document::new();
        doc.insert("type".into(), json!("mesh"));
        assert_eq!(
            Revision::from_document(doc),
            Err(NodeError::UnsupportedType("mesh".into()))
        );
    }

    #[test]
    fn test_info_defaults() {
        let mut rev = Revision::initial(BranchId::MASTER, vec![], vec![]);
        rev.timestamp = None;
        let info = rev.info();
        assert_eq!(info.author, "unnamed");
        assert_eq!(info.message, "");
        assert_eq!(info.tag, "");
        assert_eq!(info.timestamp, "Unknown");
    }

    #[test]
    fn test_commit_apply() {
        let keep = UniqueId::generate();
        let gone = UniqueId::generate();
        let old = UniqueId::generate();
        let new = UniqueId::generate();
        let fresh = NodeRef::new(UniqueId::generate(), SharedId::generate());

        let commit = Commit::new()
            .add(fresh)
            .delete(NodeRef::new(gone, SharedId::generate()))
            .modify(SharedId::generate(), old, new);
        let current = commit.apply_to(&[keep, gone, old]);
        assert_eq!(current, vec![keep, fresh.unique_id, new]);
    }
}
