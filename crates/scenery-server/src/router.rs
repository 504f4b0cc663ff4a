//! Axum router setup for the Scenery server

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    ServerState,
    handlers::{
        get_branches, get_children, get_diff, get_federation, get_metadata, get_object, get_readme,
        get_revision_info, get_revisions, get_root, get_scene, health_check,
    },
};

/// Create the axum router with all routes
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Project history
        .route("/api/:account/:project/branches", get(get_branches))
        .route("/api/:account/:project/revisions", get(get_revisions))
        .route("/api/:account/:project/revision/:rev/info", get(get_revision_info))
        // Nodes addressed without a snapshot
        .route("/api/:account/:project/object/:uid", get(get_object))
        .route("/api/:account/:project/diff/:from/:to", get(get_diff))
        // Snapshot reads
        .route("/api/:account/:project/:reference/scene", get(get_scene))
        .route("/api/:account/:project/:reference/root", get(get_root))
        .route("/api/:account/:project/:reference/federation", get(get_federation))
        .route("/api/:account/:project/:reference/children/:sid", get(get_children))
        .route("/api/:account/:project/:reference/metadata/:sid", get(get_metadata))
        .route("/api/:account/:project/:reference/readme", get(get_readme))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
