use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::{Form, Router};
use tower_http::trace::TraceLayer;

use crate::agent::{Agent, AgentRegistry, AgentScope};
use crate::config::AppConfig;
use crate::ingest::Ingestor;
use crate::models::{AskForm, AskResponse, UploadResponse};
use crate::ollama::OllamaClient;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const NOT_READY_MESSAGE: &str = "No PDF uploaded yet.";
pub const UPLOAD_OK_MESSAGE: &str = "PDF uploaded and processed successfully.";
pub const EMPTY_QUESTION_MESSAGE: &str = "Question must not be empty.";

const DEFAULT_DOCUMENT_NAME: &str = "upload.pdf";

#[derive(Clone)]
pub struct ApiState {
    pub config: AppConfig,
    pub ingestor: Ingestor,
    pub ollama: OllamaClient,
    pub agents: AgentRegistry,
}

impl ApiState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            ingestor: Ingestor::from_config(&config),
            ollama: OllamaClient::new(config.ollama_base_url.clone()),
            agents: AgentRegistry::new(),
            config,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/upload_pdf/", post(upload_pdf))
        .route("/ask/", post(ask_question))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = config.bind_addr.parse()?;
    let app = router(ApiState::new(config));

    tracing::info!("api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upload_pdf(
    State(state): State<ApiState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let scope = scope_from_headers(&headers);
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("failed to read multipart field: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_DOCUMENT_NAME)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("failed to read upload: {err}")))?;
        upload = Some((name, bytes.to_vec()));
        break;
    }

    let Some((document, bytes)) = upload else {
        return Err(ApiError::bad_request(
            "multipart field `file` is required".to_string(),
        ));
    };

    tracing::info!(
        "ingesting {} ({} bytes) for {:?}",
        document,
        bytes.len(),
        scope
    );

    let knowledge = state
        .ingestor
        .ingest(&scope.owner(), &document, &bytes)
        .await
        .map_err(|err| {
            tracing::error!("ingest of {} failed: {:#}", document, err);
            ApiError::from(err)
        })?;

    let agent = Agent::new(
        state.ollama.clone(),
        state.config.models.answer_model.clone(),
        knowledge,
        state.config.agent.clone(),
        state.config.knowledge.search_limit,
    );
    state.agents.install(scope, agent).await;

    Ok(Json(UploadResponse {
        message: UPLOAD_OK_MESSAGE.to_string(),
    }))
}

async fn ask_question(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Form(form): Form<AskForm>,
) -> Result<Json<AskResponse>, ApiError> {
    if form.question.trim().is_empty() {
        return Err(ApiError::bad_request(EMPTY_QUESTION_MESSAGE.to_string()));
    }

    let scope = scope_from_headers(&headers);
    let Some(agent) = state.agents.get(&scope).await else {
        return Err(ApiError::bad_request(NOT_READY_MESSAGE.to_string()));
    };

    let response = agent.run(&form.question).await.map_err(|err| {
        tracing::error!("answering for {:?} failed: {:#}", scope, err);
        ApiError::from(err)
    })?;

    Ok(Json(AskResponse { response }))
}

fn scope_from_headers(headers: &HeaderMap) -> AgentScope {
    AgentScope::from_client_id(
        headers
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{value:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
