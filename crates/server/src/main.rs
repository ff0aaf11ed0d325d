//! Foreman Server
//!
//! Axum front for the run engine. Every route maps onto one engine
//! operation; long-running work (`advance`) is spawned in the background and
//! observed through the SSE stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use clap::Parser;
use foreman_core::store::MemoryRunStore;
use foreman_core::{
    ApprovalDecision, ConfigOverrides, Engine, EngineConfig, EngineError, Feedback,
    HttpCollaborator, NewRun, Rating, RunContext, RunEvent, RunSource, RunStore, SqliteRunStore,
    UseCase,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use utoipa::{OpenApi, ToSchema};

const HEARTBEAT: Duration = Duration::from_secs(15);

/// Application state
struct AppState {
    engine: Arc<Engine>,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CommandRequest {
    user_id: String,
    request: String,
    /// `bot_team_spec`, `web_app_creation`, `doc_generation` or `media_generation`
    use_case: Option<String>,
    /// `web` or `telegram`
    source: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    user_prefs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    rag_chunks: Vec<serde_json::Value>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    citations: Vec<serde_json::Value>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CommandResponse {
    run_id: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
struct DecisionRequest {
    comment: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct DecisionResponse {
    success: bool,
    phase: String,
}

#[derive(Serialize, ToSchema)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Deserialize, ToSchema)]
struct FeedbackRequest {
    /// `good` or `bad`
    #[schema(value_type = String)]
    rating: Rating,
    notes: Option<String>,
}

/// Command line and environment configuration
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Foreman - agent run orchestrator")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "FOREMAN_PORT", default_value = "8080")]
    port: u16,
    /// SQLite database for run records; in-memory when absent
    #[arg(long, env = "FOREMAN_DB")]
    db: Option<PathBuf>,
    /// JSON engine configuration
    #[arg(long, env = "FOREMAN_CONFIG", default_value = "foreman.json")]
    config: PathBuf,
    /// Base URL of the agent, evaluator and executor service
    #[arg(long, env = "FOREMAN_AGENTS_URL", default_value = "http://127.0.0.1:8100")]
    agents_url: String,
    /// Override the fix-iteration budget
    #[arg(long, env = "FOREMAN_MAX_FIX_ITERATIONS")]
    max_fix_iterations: Option<u32>,
}

// === Errors ===

enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Engine(e) => {
                let status = match &e {
                    EngineError::RunNotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::InvalidTransition { .. }
                    | EngineError::InvalidRunState(_)
                    | EngineError::Cancelled => StatusCode::CONFLICT,
                    EngineError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (
            status,
            Json(ApiResponse {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

fn parse_use_case(raw: Option<&str>) -> Result<UseCase, ApiError> {
    match raw {
        None => Ok(UseCase::DocGeneration),
        Some(s) => UseCase::parse(s)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown use case: {}", s))),
    }
}

fn parse_source(raw: Option<&str>) -> Result<RunSource, ApiError> {
    match raw {
        None | Some("web") => Ok(RunSource::Web),
        Some("telegram") => Ok(RunSource::Telegram),
        Some(other) => Err(ApiError::BadRequest(format!("unknown source: {}", other))),
    }
}

/// Drive the run to its next stop without holding up the request
fn spawn_advance(engine: Arc<Engine>, run_id: String) {
    tokio::spawn(async move {
        match engine.advance(&run_id).await {
            Ok(outcome) => tracing::info!(run_id = %run_id, ?outcome, "Run paused or finished"),
            Err(e) => tracing::warn!(run_id = %run_id, "Run ended with error: {}", e),
        }
    });
}

// === OpenAPI ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Foreman API",
        version = "1.0.0",
        description = "Run orchestration for the agent pipeline"
    ),
    paths(
        health,
        create_command,
        get_run,
        approve_run,
        reject_run,
        cancel_run,
        submit_feedback,
        run_events
    ),
    components(schemas(
        HealthResponse,
        ApiResponse,
        CommandRequest,
        CommandResponse,
        DecisionRequest,
        DecisionResponse,
        CancelResponse,
        FeedbackRequest
    )),
    tags(
        (name = "runs", description = "Run lifecycle"),
        (name = "system", description = "Service health")
    )
)]
struct ApiDoc;

// === API Handlers ===

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Accept a user command and start a run for it
#[utoipa::path(
    post,
    path = "/commands",
    tag = "runs",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Run started", body = CommandResponse),
        (status = 400, description = "Malformed command", body = ApiResponse)
    )
)]
async fn create_command(
    State(state): State<SharedState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let use_case = parse_use_case(req.use_case.as_deref())?;
    let source = parse_source(req.source.as_deref())?;

    let mut intake = NewRun::new(&req.user_id, &req.request, use_case);
    intake.source = source;

    let engine = &state.engine;
    let run_id = engine.create_run(intake).await?;
    engine
        .attach_context(
            &run_id,
            RunContext {
                user_prefs: req.user_prefs,
                rag_chunks: req.rag_chunks,
                citations: req.citations,
            },
        )
        .await?;
    engine.start(&run_id).await?;
    spawn_advance(engine.clone(), run_id.clone());

    Ok(Json(CommandResponse { run_id }))
}

/// Full run snapshot
#[utoipa::path(
    get,
    path = "/runs/{id}",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "Current run state"),
        (status = 404, description = "Unknown run", body = ApiResponse)
    )
)]
async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.engine.snapshot(&id).await?;
    Ok(Json(snapshot).into_response())
}

async fn decide(
    state: &SharedState,
    run_id: String,
    decision: ApprovalDecision,
    comment: Option<String>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let phase = state
        .engine
        .resume_after_approval(&run_id, decision, comment)
        .await?;
    if decision == ApprovalDecision::Approved {
        spawn_advance(state.engine.clone(), run_id);
    }
    Ok(Json(DecisionResponse {
        success: true,
        phase: phase.to_string(),
    }))
}

/// Approve the pending approval pack
#[utoipa::path(
    post,
    path = "/runs/{id}/approve",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Approved; execution continues", body = DecisionResponse),
        (status = 409, description = "No approval pending", body = ApiResponse)
    )
)]
async fn approve_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<DecisionRequest>>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    decide(&state, id, ApprovalDecision::Approved, req.comment).await
}

/// Reject the pending approval pack
#[utoipa::path(
    post,
    path = "/runs/{id}/reject",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Rejected", body = DecisionResponse),
        (status = 409, description = "No approval pending", body = ApiResponse)
    )
)]
async fn reject_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<DecisionRequest>>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    decide(&state, id, ApprovalDecision::Rejected, req.comment).await
}

#[utoipa::path(
    post,
    path = "/runs/{id}/cancel",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses((status = 200, description = "Whether anything was cancelled", body = CancelResponse))
)]
async fn cancel_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.engine.cancel(&id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

/// Rate a finished run
#[utoipa::path(
    post,
    path = "/runs/{id}/feedback",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback stored", body = ApiResponse),
        (status = 409, description = "Run not finished or already rated", body = ApiResponse),
        (status = 422, description = "Rating is neither good nor bad")
    )
)]
async fn submit_feedback(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    state
        .engine
        .record_feedback(&id, Feedback::new(req.rating, req.notes))
        .await?;
    Ok(Json(ApiResponse {
        success: true,
        message: "Feedback recorded".to_string(),
    }))
}

fn sse_event(event: &RunEvent) -> Result<Event, Infallible> {
    let json = serde_json::to_string(event).unwrap_or_default();
    Ok(Event::default()
        .event(event.kind.as_str())
        .id(event.seq.to_string())
        .data(json))
}

/// SSE stream of status deltas: the latest one first, then live updates
/// with a heartbeat. Ends after the run's terminal event.
#[utoipa::path(
    get,
    path = "/runs/{id}/events",
    tag = "runs",
    params(("id" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "Server-sent status deltas", content_type = "text/event-stream"),
        (status = 404, description = "Unknown run", body = ApiResponse)
    )
)]
async fn run_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.engine.subscribe(&id).await?;

    let first = stream::iter(subscription.latest.as_ref().map(sse_event));
    let live = stream::unfold(subscription.receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((sse_event(&event), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(first.chain(live)).keep_alive(
        KeepAlive::new().interval(HEARTBEAT).text("heartbeat"),
    ))
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn app(state: SharedState) -> Router {
    let run_routes = Router::new()
        .route("/:id", get(get_run))
        .route("/:id/approve", post(approve_run))
        .route("/:id/reject", post(reject_run))
        .route("/:id/cancel", post(cancel_run))
        .route("/:id/feedback", post(submit_feedback))
        .route("/:id/events", get(run_events));

    Router::new()
        .route("/health", get(health))
        .route("/commands", post(create_command))
        .route("/openapi.json", get(openapi))
        .nest("/runs", run_routes)
        .with_state(state)
}

fn build_engine(args: &Args) -> anyhow::Result<Engine> {
    let mut config = EngineConfig::load(&args.config)?;
    config.merge(ConfigOverrides {
        max_fix_iterations: args.max_fix_iterations,
        ..Default::default()
    });

    let store: Arc<dyn RunStore> = match &args.db {
        Some(path) => Arc::new(SqliteRunStore::open_at(path)?),
        None => Arc::new(MemoryRunStore::new()),
    };
    let collaborator = Arc::new(HttpCollaborator::new(&args.agents_url)?);

    Engine::builder(config)
        .with_collaborator(collaborator)
        .with_store(store)
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    let engine = build_engine(&args)?;
    let state: SharedState = Arc::new(AppState {
        engine: Arc::new(engine),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        agents_url = %args.agents_url,
        db = ?args.db,
        "Foreman listening"
    );
    axum::serve(listener, app(state)).await?;
    Ok(())
}
