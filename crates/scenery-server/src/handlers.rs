//! REST API handlers for the Scenery server

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use scenery_core::{
    BranchId, BranchRef, Document, IdError, Node, RevisionId, RevisionInfo, RevisionSummary,
    SceneCounts, SceneNode, SharedId, SnapshotDiff, UniqueId, id_to_bytes,
};
use scenery_store::{ReferenceExpansion, Source, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ServerState;

/// A store error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            err if err.is_malformed_input() => StatusCode::BAD_REQUEST,
            StoreError::StaleParent { .. } | StoreError::AlreadyLive(_) => StatusCode::CONFLICT,
            StoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StoreError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        ApiError(StoreError::Identifier(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// An assembled snapshot in wire form.
#[derive(Debug, Serialize)]
pub struct SceneResponse {
    pub revision: RevisionId,
    pub source: Source,
    pub counts: SceneCounts,
    pub nodes: Vec<Document>,
}

#[derive(Debug, Serialize)]
pub struct ObjectResponse {
    pub source: Source,
    pub node: Document,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevisionsParams {
    pub branch: Option<String>,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SceneParams {
    #[serde(default)]
    pub full: bool,
}

fn documents(nodes: Vec<Node>) -> Vec<Document> {
    nodes.iter().map(Node::to_document).collect()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    let health = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    Json(health)
}

pub async fn get_branches(
    State(state): State<Arc<ServerState>>,
    Path((account, project)): Path<(String, String)>,
) -> ApiResult<Vec<BranchId>> {
    Ok(Json(state.store.list_branches(&account, &project).await?))
}

pub async fn get_revisions(
    State(state): State<Arc<ServerState>>,
    Path((account, project)): Path<(String, String)>,
    Query(params): Query<RevisionsParams>,
) -> ApiResult<Vec<RevisionSummary>> {
    let revisions = state
        .store
        .list_revisions(&account, &project, params.branch.as_deref(), params.from, params.to)
        .await?;
    Ok(Json(revisions))
}

/// `:rev` is a revision id or `head` for the master head.
pub async fn get_revision_info(
    State(state): State<Arc<ServerState>>,
    Path((account, project, rev)): Path<(String, String, String)>,
) -> ApiResult<RevisionInfo> {
    let reference = BranchRef::from_parts(None, Some(rev.as_str()))?;
    Ok(Json(state.store.revision_info(&account, &project, &reference).await?))
}

pub async fn get_scene(
    State(state): State<Arc<ServerState>>,
    Path((account, project, reference)): Path<(String, String, String)>,
    Query(params): Query<SceneParams>,
) -> ApiResult<SceneResponse> {
    let reference = BranchRef::parse(&reference)?;
    let scene = state.store.scene(&account, &project, &reference, params.full).await?;
    Ok(Json(SceneResponse {
        revision: scene.revision,
        source: scene.source,
        counts: scene.graph.counts(),
        nodes: scene.graph.all_nodes().map(Node::to_document).collect(),
    }))
}

pub async fn get_root(
    State(state): State<Arc<ServerState>>,
    Path((account, project, reference)): Path<(String, String, String)>,
) -> ApiResult<Document> {
    let reference = BranchRef::parse(&reference)?;
    let root = state.store.root_node(&account, &project, &reference).await?;
    Ok(Json(root.to_document()))
}

pub async fn get_federation(
    State(state): State<Arc<ServerState>>,
    Path((account, project, reference)): Path<(String, String, String)>,
) -> ApiResult<Vec<ReferenceExpansion>> {
    let reference = BranchRef::parse(&reference)?;
    Ok(Json(state.store.federation(&account, &project, &reference).await?))
}

pub async fn get_children(
    State(state): State<Arc<ServerState>>,
    Path((account, project, reference, sid)): Path<(String, String, String, String)>,
) -> ApiResult<Vec<Document>> {
    let reference = BranchRef::parse(&reference)?;
    let shared_id = SharedId(id_to_bytes(&sid)?);
    let children = state.store.children(&account, &project, &reference, shared_id).await?;
    Ok(Json(documents(children)))
}

pub async fn get_metadata(
    State(state): State<Arc<ServerState>>,
    Path((account, project, reference, sid)): Path<(String, String, String, String)>,
) -> ApiResult<Vec<Document>> {
    let reference = BranchRef::parse(&reference)?;
    let shared_id = SharedId(id_to_bytes(&sid)?);
    Ok(Json(state.store.metadata(&account, &project, &reference, shared_id).await?))
}

pub async fn get_readme(
    State(state): State<Arc<ServerState>>,
    Path((account, project, reference)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    let reference = BranchRef::parse(&reference)?;
    let readme = state
        .store
        .readme(&account, &project, &reference)
        .await?
        .unwrap_or_else(|| Value::String("Readme Missing".to_string()));
    Ok(Json(json!({ "readme": readme })))
}

pub async fn get_object(
    State(state): State<Arc<ServerState>>,
    Path((account, project, uid)): Path<(String, String, String)>,
) -> ApiResult<ObjectResponse> {
    let unique_id = UniqueId(id_to_bytes(&uid)?);
    let found = state.store.object_by_unique(&account, &project, unique_id).await?;
    tracing::debug!(node = %found.node.shared_id(), source = ?found.source, "served object");
    Ok(Json(ObjectResponse {
        source: found.source,
        node: found.node.to_document(),
    }))
}

pub async fn get_diff(
    State(state): State<Arc<ServerState>>,
    Path((account, project, from, to)): Path<(String, String, String, String)>,
) -> ApiResult<SnapshotDiff> {
    let from = BranchRef::parse(&from)?;
    let to = BranchRef::parse(&to)?;
    Ok(Json(state.store.diff(&account, &project, &from, &to).await?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use scenery_core::{Commit, Mesh, Metadata, NodeBase, Transformation, labels};
    use scenery_store::{BackendError, MemoryBackend, SceneStore};

    struct Fixture {
        state: Arc<ServerState>,
        root: Node,
        mesh: Node,
    }

    async fn fixture() -> Fixture {
        let store = SceneStore::new(Arc::new(MemoryBackend::new()));
        let root = Node::Transformation(Transformation::new(NodeBase::named("root")));
        let mesh = Node::Mesh(Mesh::new(NodeBase::named("floor").with_parent(root.shared_id())));
        let first = store
            .commit_nodes("acme", "house", "master", None, &[root.clone()], Commit::new())
            .await
            .unwrap();
        store
            .commit_nodes("acme", "house", "master", Some(first.id), &[mesh.clone()], Commit::new())
            .await
            .unwrap();
        Fixture {
            state: Arc::new(ServerState::new(store)),
            root,
            mesh,
        }
    }

    fn path3(reference: &str) -> Path<(String, String, String)> {
        Path(("acme".to_string(), "house".to_string(), reference.to_string()))
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_scene_lists_live_nodes() {
        let fx = fixture().await;
        let params = Query(SceneParams::default());
        let Json(scene) = get_scene(State(fx.state.clone()), path3("master"), params)
            .await
            .unwrap();
        assert_eq!(scene.source, Source::Raw);
        assert_eq!(scene.nodes.len(), 2);
        assert_eq!(scene.counts.total(), 2);
    }

    #[tokio::test]
    async fn test_root_and_children() {
        let fx = fixture().await;
        let Json(root) = get_root(State(fx.state.clone()), path3("master")).await.unwrap();
        assert_eq!(root[labels::NAME], json!("root"));

        // Meshes are not structural children.
        let Json(children) = get_children(
            State(fx.state.clone()),
            Path((
                "acme".to_string(),
                "house".to_string(),
                "master".to_string(),
                fx.root.shared_id().to_string(),
            )),
        )
        .await
        .unwrap();
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn test_object_and_missing_object() {
        let fx = fixture().await;
        let uid = fx.mesh.unique_id().to_string();
        let Json(object) = get_object(State(fx.state.clone()), path3(&uid)).await.unwrap();
        assert_eq!(object.node[labels::NAME], json!("floor"));

        let err = get_object(State(fx.state.clone()), path3(&UniqueId::generate().to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_readme_placeholder_and_body() {
        let fx = fixture().await;
        let Json(body) = get_readme(State(fx.state.clone()), path3("master")).await.unwrap();
        assert_eq!(body, json!({ "readme": "Readme Missing" }));

        let head = fx.state.store.head_of("acme", "house", "master").await.unwrap();
        let mut readme = Metadata::new(NodeBase::named("readme").with_parent(fx.root.shared_id()));
        readme.subtype = Some(labels::README_SUBTYPE.to_string());
        readme.metadata = Some(json!("Welcome"));
        let nodes = [Node::Metadata(readme)];
        fx.state
            .store
            .commit_nodes("acme", "house", "master", Some(head.id), &nodes, Commit::new())
            .await
            .unwrap();

        let Json(body) = get_readme(State(fx.state.clone()), path3("master")).await.unwrap();
        assert_eq!(body, json!({ "readme": "Welcome" }));
    }

    #[tokio::test]
    async fn test_history_routes() {
        let fx = fixture().await;
        let path = Path(("acme".to_string(), "house".to_string()));
        let Json(branches) = get_branches(State(fx.state.clone()), path).await.unwrap();
        assert_eq!(branches, vec![BranchId::MASTER]);

        let Json(revisions) = get_revisions(
            State(fx.state.clone()),
            Path(("acme".into(), "house".into())),
            Query(RevisionsParams {
                branch: Some("master".into()),
                from: Some(0),
                to: Some(0),
            }),
        )
        .await
        .unwrap();
        assert_eq!(revisions.len(), 1);

        let Json(info) = get_revision_info(State(fx.state.clone()), path3("head")).await.unwrap();
        assert_eq!(info.revision, revisions[0].id.to_string());
        assert_eq!(info.author, "unnamed");
    }

    #[tokio::test]
    async fn test_diff_route() {
        let fx = fixture().await;
        let revisions = fx
            .state
            .store
            .list_revisions("acme", "house", None, None, None)
            .await
            .unwrap();
        let first = format!("rev:{}", revisions[1].id);
        let Json(diff) = get_diff(
            State(fx.state.clone()),
            Path(("acme".into(), "house".into(), first, "master".into())),
        )
        .await
        .unwrap();
        assert_eq!(diff.added, vec![fx.mesh.shared_id()]);

        let err = get_diff(
            State(fx.state.clone()),
            Path(("acme".into(), "house".into(), "master".into(), "nope".into())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_identifier_is_bad_request() {
        let fx = fixture().await;
        let err = get_root(State(fx.state.clone()), path3("rev:not-a-uuid")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_body() {
        let err = ApiError(StoreError::BranchNotFound {
            account: "acme".into(),
            project: "house".into(),
            branch: "nope".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        insta::assert_json_snapshot!(body, @r###"
        {
          "error": "branch nope not found in acme/house"
        }
        "###);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                StoreError::StaleParent {
                    branch: "master".into(),
                    parent: "none".into(),
                },
                StatusCode::CONFLICT,
            ),
            (StoreError::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
            (
                StoreError::Backend(BackendError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (StoreError::InvalidQuery("bad".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
