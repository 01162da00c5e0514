//! HTTP server exposing the operation surface and a health probe.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use kairos_engine::{EngineError, ExecutionEngine, NextOutcome};
use kairos_types::{ErrorCode, MintItem, Outcome, ResponseMetadata, Solution};
use kairos_vector_client::{QdrantStore, VectorStore};

/// Configuration for the RPC server
#[derive(Clone)]
pub struct RpcConfig {
    /// Host and port binding, e.g. `0.0.0.0:8080`
    pub host: String,
    /// Collection name reported by the health probe
    pub collection: String,
}

/// HTTP server wrapping the execution engine
pub struct RpcServer {
    config: RpcConfig,
    engine: Arc<ExecutionEngine>,
    vector: Arc<QdrantStore>,
    rx_shutdown: broadcast::Receiver<()>,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<ExecutionEngine>,
    vector: Arc<QdrantStore>,
    collection: String,
}

impl RpcServer {
    pub fn new(
        config: RpcConfig,
        engine: Arc<ExecutionEngine>,
        vector: Arc<QdrantStore>,
        rx_shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            engine,
            vector,
            rx_shutdown,
        }
    }

    async fn run_inner(&self) -> Result<(), std::io::Error> {
        info!("Starting RPC server on {}", self.config.host);

        let state = AppState {
            engine: self.engine.clone(),
            vector: self.vector.clone(),
            collection: self.config.collection.clone(),
        };

        let app = Router::new()
            .route("/mcp/search", post(search))
            .route("/mcp/begin", post(begin))
            .route("/mcp/next", post(next))
            .route("/mcp/attest", post(attest))
            .route("/mcp/mint", post(mint))
            .route("/mcp/update", post(update))
            .route("/mcp/delete", post(delete))
            .route("/healthz", get(healthz))
            .with_state(state)
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(&self.config.host).await?;
        let mut rx_shutdown = self.rx_shutdown.resubscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { rx_shutdown.recv().await.unwrap_or_default() })
            .await
    }

    pub async fn run(&self) -> Result<(), ()> {
        match self.run_inner().await {
            Err(err) => {
                error!("RPC server exited: {}", err);
                Err(())
            }
            Ok(()) => {
                info!("RPC server terminated");
                Ok(())
            }
        }
    }
}

/// JSON error body shared by every failure response
#[derive(serde::Serialize)]
struct ErrorBody {
    error_code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<MintItem>>,
    metadata: ResponseMetadata,
}

struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(err: EngineError, started: Instant) -> ApiError {
    let metadata = ResponseMetadata {
        duration_ms: started.elapsed().as_millis() as u64,
        cached: None,
    };
    let (status, error_code, items) = match &err {
        EngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput, None),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, None),
        EngineError::DuplicateChain { items, .. } => (
            StatusCode::CONFLICT,
            ErrorCode::DuplicateChain,
            Some(items.clone()),
        ),
        EngineError::Backend { op, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::BackendFailed(*op),
            None,
        ),
    };
    ApiError {
        status,
        body: ErrorBody {
            error_code,
            message: err.to_string(),
            items,
            metadata,
        },
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    space: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state
        .engine
        .search(&request.query, request.space.as_deref())
        .await
        .map(|response| Json(response).into_response())
        .map_err(|err| api_error(err, started))
}

#[derive(Deserialize)]
struct BeginRequest {
    uri: String,
    space: Option<String>,
}

async fn begin(
    State(state): State<AppState>,
    Json(request): Json<BeginRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state
        .engine
        .begin(&request.uri, request.space.as_deref())
        .await
        .map(|response| Json(response).into_response())
        .map_err(|err| api_error(err, started))
}

#[derive(Deserialize)]
struct NextRequest {
    uri: String,
    solution: Option<Solution>,
    space: Option<String>,
}

async fn next(
    State(state): State<AppState>,
    Json(request): Json<NextRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let outcome = state
        .engine
        .next(&request.uri, request.solution, request.space.as_deref())
        .await
        .map_err(|err| api_error(err, started))?;
    // Blocked submissions are regular 200 payloads; must_obey and the
    // retry state carry the severity
    let response = match outcome {
        NextOutcome::Advanced(response) => Json(*response).into_response(),
        NextOutcome::Blocked(payload) => Json(*payload).into_response(),
    };
    Ok(response)
}

#[derive(Deserialize)]
struct AttestRequest {
    uri: String,
    outcome: Outcome,
    message: String,
    quality_bonus: Option<f64>,
    llm_model_id: Option<String>,
    space: Option<String>,
}

async fn attest(
    State(state): State<AppState>,
    Json(request): Json<AttestRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state
        .engine
        .attest(
            &request.uri,
            request.outcome,
            &request.message,
            request.quality_bonus,
            request.llm_model_id.as_deref(),
            request.space.as_deref(),
        )
        .await
        .map(|response| Json(response).into_response())
        .map_err(|err| api_error(err, started))
}

#[derive(Deserialize)]
struct MintRequest {
    markdown_doc: String,
    llm_model_id: String,
    #[serde(default)]
    force_update: bool,
    space: Option<String>,
}

async fn mint(
    State(state): State<AppState>,
    Json(request): Json<MintRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state
        .engine
        .mint(
            &request.markdown_doc,
            &request.llm_model_id,
            request.force_update,
            request.space.as_deref(),
        )
        .await
        .map(|response| Json(response).into_response())
        .map_err(|err| api_error(err, started))
}

#[derive(Deserialize)]
struct UpdateRequest {
    uris: Vec<String>,
    markdown_doc: Option<Vec<String>>,
    updates: Option<serde_json::Map<String, serde_json::Value>>,
    space: Option<String>,
}

async fn update(
    State(state): State<AppState>,
    Json(request): Json<UpdateRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state
        .engine
        .update(
            &request.uris,
            request.markdown_doc.as_deref(),
            request.updates.as_ref(),
            request.space.as_deref(),
        )
        .await
        .map(|response| Json(response).into_response())
        .map_err(|err| api_error(err, started))
}

#[derive(Deserialize)]
struct DeleteRequest {
    uris: Vec<String>,
    space: Option<String>,
}

async fn delete(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state
        .engine
        .delete(&request.uris, request.space.as_deref())
        .await
        .map(|response| Json(response).into_response())
        .map_err(|err| api_error(err, started))
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.vector.count().await {
        Ok(points) => Json(serde_json::json!({
            "status": "ok",
            "collection": state.collection,
            "points": points,
        }))
        .into_response(),
        Err(err) => {
            error!("Health probe failed against the vector store: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}
