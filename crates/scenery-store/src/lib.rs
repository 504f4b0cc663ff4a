//! Scenery Store — revision history, stash resolution, federation and the
//! scene query facade over a pluggable document backend

pub mod backend;
pub mod dump;
pub mod error;
pub mod federation;
pub mod filter;
pub mod history;
pub mod memory;
pub mod scene;
pub mod stash;


#[cfg(test)]
pub mod test_utils;

pub use backend::{Backend, Collection, Query, SharedBackend, SortOrder, StashFormat};
pub use error::{BackendError, Result, StoreError};
pub use federation::{
    DEFAULT_MAX_DEPTH, ExpansionOutcome, FederationResolver, ProjectKey, ReferenceExpansion,
};
pub use history::HistoryStore;
pub use memory::{MemoryBackend, MemorySnapshot};
pub use scene::{Scene, SceneObject, SceneStore};
pub use stash::{
    ChannelNotifier, NoopNotifier, Projection, Source, StashBuilder, StashKey, StashNotifier,
    StashQueue, StashResolver, StashWorker,
};
