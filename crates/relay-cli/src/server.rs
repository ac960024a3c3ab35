use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use relay_agent::{build_system_prompt, Agent, AgentMode};
use relay_core::config::AppConfig;
use relay_core::error::{ProviderError, RelayError, StartupError};
use relay_core::event::EventSource;
use relay_core::message::{HistoryEntry, Message};
use relay_core::model::{self, ModelId};
use relay_core::provider::Provider;
use relay_core::tool::Tool;
use relay_doc::{create_document_tools, DocumentModel, DocumentStore};
use relay_stream::{CancellationController, SessionRegistry, TransportWriter, WireRelay};

const PIPE_CAPACITY: usize = 64 * 1024;

pub const SESSION_HEADER: &str = "x-session-id";

pub type ProviderFactory = Arc<
    dyn Fn(&AppConfig, Option<&ModelId>) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync,
>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionRegistry,
    pub documents: DocumentStore,
    providers: ProviderFactory,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self::with_providers(config, Arc::new(relay_providers::create_provider))
    }

    pub fn with_providers(config: AppConfig, providers: ProviderFactory) -> Self {
        Self {
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            documents: DocumentStore::new(),
            providers,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    BadRequest(#[from] StartupError),

    #[error("document not found: {0}")]
    DocumentNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub working_dir: Option<PathBuf>,
    pub document_id: Option<String>,
    pub document_html: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub session_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agent/stream", post(stream))
        .route("/api/agent/abort", post(abort))
        .route("/api/documents/:id", get(document))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "relay server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Everything a sequence needs, resolved before the first frame.
struct Prepared {
    provider: Arc<dyn Provider>,
    working_dir: PathBuf,
    document_id: Option<String>,
}

fn prepare(state: &AppState, req: &StreamRequest) -> Result<Prepared, StartupError> {
    if req.prompt.trim().is_empty() {
        return Err(StartupError::EmptyPrompt);
    }

    let working_dir = req
        .working_dir
        .clone()
        .unwrap_or_else(|| state.config.working_dir.clone());
    if req.mode == AgentMode::Coding && !working_dir.is_dir() {
        return Err(StartupError::WorkingDir(working_dir.display().to_string()));
    }

    let document_id = req
        .document_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    if req.mode == AgentMode::Document && document_id.is_none() {
        return Err(StartupError::MissingField("documentId".into()));
    }

    let model_id = req.model.as_deref().map(ModelId::from);
    if let Some(id) = &model_id {
        if model::get_model(id).is_none() {
            return Err(StartupError::UnsupportedModel(id.to_string()));
        }
    }

    let config: &AppConfig = &state.config;
    let provider = (state.providers)(config, model_id.as_ref()).map_err(|e| match e {
        ProviderError::MissingApiKey(_) => StartupError::MissingApiKey,
        other => StartupError::UnsupportedModel(other.to_string()),
    })?;

    Ok(Prepared {
        provider,
        working_dir,
        document_id,
    })
}

async fn stream(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Result<Response, ApiError> {
    let prepared = prepare(&state, &req).inspect_err(|e| {
        tracing::debug!("stream request rejected: {e}");
    })?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let (pipe, body) = tokio::io::duplex(PIPE_CAPACITY);
    let writer = TransportWriter::new(pipe);

    let tools: Vec<Arc<dyn Tool>> = match (&prepared.document_id, req.mode) {
        (Some(id), AgentMode::Document) => {
            let document = state.documents.open(id, req.document_html.as_deref());
            create_document_tools(DocumentModel::new(document, writer.clone()))
        }
        _ => relay_tools::create_coding_tools(),
    };
    let system_prompt = build_system_prompt(
        req.mode,
        &prepared.working_dir,
        &state.config.context_paths,
    );
    let history = req
        .history
        .iter()
        .map(|entry| Message::from_history(&session_id, entry))
        .collect();

    let agent = Agent::new(prepared.provider, tools, system_prompt, prepared.working_dir)
        .with_max_turns(state.config.agent.max_turns);
    let session = Arc::new(agent.session(session_id.clone(), history));
    session.subscribe(Arc::new(WireRelay::new(writer.clone(), session_id.clone())));

    let controller = Arc::new(
        CancellationController::new(session_id.clone())
            .with_source(session.clone())
            .with_writer(writer.clone()),
    );
    controller.begin();
    state.sessions.register(controller.clone());
    controller.watch_disconnect();

    tracing::info!(session_id = %session_id, mode = ?req.mode, "stream opened");
    tokio::spawn(drive(
        state.sessions.clone(),
        controller,
        session,
        writer.clone(),
        req.prompt,
    ));

    let guard = CloseOnDrop(writer);
    let frames = ReaderStream::new(body).map(move |chunk| {
        let _ = &guard;
        chunk
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (header::HeaderName::from_static(SESSION_HEADER), session_id),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// Runs one sequence to its end and closes the stream behind it.
async fn drive(
    sessions: SessionRegistry,
    controller: Arc<CancellationController>,
    session: Arc<relay_agent::AgentSession>,
    writer: TransportWriter,
    prompt: String,
) {
    let session_id = controller.session_id().to_string();
    let result = session.prompt(prompt).await;
    match &result {
        // The controller already settled the stream.
        Err(RelayError::Cancelled) => {}
        other => {
            controller.finish(other.is_ok());
            if let Err(e) = writer.end().await {
                tracing::debug!(session_id = %session_id, "stream not ended cleanly: {e}");
            }
        }
    }
    sessions.remove(&session_id);
    tracing::info!(session_id = %session_id, ok = result.is_ok(), "stream closed");
}

/// Marks the transport closed once the response body is dropped.
struct CloseOnDrop(TransportWriter);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.mark_closed();
    }
}

async fn abort(
    State(state): State<AppState>,
    Json(req): Json<AbortRequest>,
) -> Json<serde_json::Value> {
    let success = state.sessions.abort(&req.session_id).await;
    Json(serde_json::json!({ "success": success }))
}

async fn document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<relay_doc::DocumentSnapshot>, ApiError> {
    state
        .documents
        .snapshot(&id)
        .map(Json)
        .ok_or(ApiError::DocumentNotFound(id))
}
