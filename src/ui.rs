//! Browser-facing page flow.
//!
//! Every request resolves the session cookie into a [`SessionState`] and renders either the
//! login/register page or the chat dashboard. Uploads and questions are forwarded to the
//! API server through [`BackendClient`]; successful answers are written to chat history.

use std::net::SocketAddr;

use anyhow::Result;
use askama::Template;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::auth::{
    expired_session_cookie, session_cookie, session_token_from_cookie, SessionState, SessionStore,
};
use crate::client::{BackendClient, BackendReply};
use crate::config::AppConfig;
use crate::db::{HistoryStore, UserStore};
use crate::models::ChatEntry;

#[derive(Clone)]
pub struct UiState {
    pub config: AppConfig,
    pub users: UserStore,
    pub history: HistoryStore,
    pub sessions: SessionStore,
    pub backend: BackendClient,
}

impl UiState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let users = UserStore::new(&config).await?;
        let history = HistoryStore::new(&config).await?;
        let backend = BackendClient::new(config.backend_url.clone(), config.backend_timeout)?;
        let sessions = SessionStore::new(config.session_ttl);

        Ok(Self {
            config,
            users,
            history,
            sessions,
            backend,
        })
    }
}

pub fn router(state: UiState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index_page))
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/logout", post(logout))
        .route("/upload", post(upload))
        .route("/chat", post(chat))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_ui(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = config.ui_bind_addr.parse()?;
    let backend_url = config.backend_url.clone();
    let app = router(UiState::new(config).await?);

    tracing::info!("ui listening on http://{} (backend {})", addr, backend_url);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Clone)]
struct Notice {
    kind: &'static str,
    text: String,
}

impl Notice {
    fn success(text: impl Into<String>) -> Self {
        Self {
            kind: "success",
            text: text.into(),
        }
    }

    fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: "warning",
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: "error",
            text: text.into(),
        }
    }
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    register: bool,
    notices: Vec<Notice>,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    username: String,
    history: Vec<ChatEntry>,
    notices: Vec<Notice>,
    exchange: Vec<ChatEntry>,
}

#[derive(Debug, Deserialize)]
struct MenuQuery {
    menu: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RegisterForm {
    username: String,
    password: String,
    confirm_password: String,
}

#[derive(Debug, Deserialize)]
struct ChatForm {
    question: String,
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(session_token_from_cookie)
        .map(str::to_string)
}

fn current_state(state: &UiState, headers: &HeaderMap) -> Result<SessionState> {
    state.sessions.state(session_token(headers).as_deref())
}

async fn index_page(
    State(state): State<UiState>,
    headers: HeaderMap,
    Query(query): Query<MenuQuery>,
) -> Result<Response, UiError> {
    match current_state(&state, &headers)? {
        SessionState::Unauthenticated => {
            let register = query.menu.as_deref() == Some("register");
            render_login(StatusCode::OK, register, vec![])
        }
        SessionState::Authenticated { username } => {
            render_dashboard(&state, username, vec![], vec![]).await
        }
    }
}

async fn login(
    State(state): State<UiState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, UiError> {
    if !state.users.authenticate(&form.username, &form.password).await? {
        tracing::info!("failed login for {:?}", form.username);
        return render_login(
            StatusCode::UNAUTHORIZED,
            false,
            vec![Notice::error("Invalid credentials")],
        );
    }

    state.history.ensure_table(&form.username).await?;
    let token = state.sessions.login(&form.username)?;
    tracing::info!("{} logged in", form.username);

    Ok((
        [(header::SET_COOKIE, session_cookie(&token))],
        Redirect::to("/"),
    )
        .into_response())
}

async fn register(
    State(state): State<UiState>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, UiError> {
    if form.password != form.confirm_password {
        return render_login(
            StatusCode::OK,
            true,
            vec![Notice::warning("Passwords do not match")],
        );
    }

    if form.username.trim().is_empty() {
        return render_login(
            StatusCode::OK,
            true,
            vec![Notice::error("Username must not be empty")],
        );
    }

    let notice = if state.users.register(&form.username, &form.password).await? {
        tracing::info!("registered {}", form.username);
        Notice::success("Account created. You can now login.")
    } else {
        Notice::error("Username already exists")
    };

    render_login(StatusCode::OK, true, vec![notice])
}

async fn logout(State(state): State<UiState>, headers: HeaderMap) -> Result<Response, UiError> {
    if let Some(token) = session_token(&headers) {
        state.sessions.logout(&token)?;
    }

    Ok((
        [(header::SET_COOKIE, expired_session_cookie())],
        Redirect::to("/"),
    )
        .into_response())
}

async fn upload(
    State(state): State<UiState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, UiError> {
    let SessionState::Authenticated { username } = current_state(&state, &headers)? else {
        return Ok(Redirect::to("/").into_response());
    };

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UiError::bad_request(format!("failed to read upload: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.pdf").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| UiError::bad_request(format!("failed to read upload: {err}")))?;
        upload = Some((file_name, bytes.to_vec()));
        break;
    }

    let notice = match upload {
        Some((_, bytes)) if bytes.is_empty() => Notice::warning("Choose a PDF file to upload."),
        None => Notice::warning("Choose a PDF file to upload."),
        Some((file_name, bytes)) => {
            match state.backend.upload_pdf(&username, &file_name, bytes).await {
                Ok(BackendReply::Success(_)) => Notice::success("PDF processed! Ask your question."),
                Ok(BackendReply::Failure { error, .. }) => {
                    Notice::error(format!("Failed to process PDF: {error}"))
                }
                Err(err) => Notice::error(format!("Failed to process PDF: {err:#}")),
            }
        }
    };

    render_dashboard(&state, username, vec![notice], vec![]).await
}

async fn chat(
    State(state): State<UiState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Result<Response, UiError> {
    let SessionState::Authenticated { username } = current_state(&state, &headers)? else {
        return Ok(Redirect::to("/").into_response());
    };

    let question = form.question.trim().to_string();
    if question.is_empty() {
        return render_dashboard(&state, username, vec![], vec![]).await;
    }

    match state.backend.ask(&username, &question).await {
        Ok(BackendReply::Success(answer)) => {
            state.history.append(&username, &question, &answer).await?;
            let exchange = ChatEntry {
                timestamp: String::new(),
                question,
                answer,
            };
            render_dashboard(&state, username, vec![], vec![exchange]).await
        }
        Ok(BackendReply::Failure { error, .. }) => {
            let notice = Notice::error(format!("Error in getting response: {error}"));
            render_dashboard(&state, username, vec![notice], vec![]).await
        }
        Err(err) => {
            let notice = Notice::error(format!("Error in getting response: {err:#}"));
            render_dashboard(&state, username, vec![notice], vec![]).await
        }
    }
}

fn render_login(
    status: StatusCode,
    register: bool,
    notices: Vec<Notice>,
) -> Result<Response, UiError> {
    let body = LoginTemplate { register, notices }.render()?;
    Ok((status, Html(body)).into_response())
}

async fn render_dashboard(
    state: &UiState,
    username: String,
    notices: Vec<Notice>,
    exchange: Vec<ChatEntry>,
) -> Result<Response, UiError> {
    let history = state
        .history
        .list_recent(&username, state.config.history_limit)
        .await?;

    let body = DashboardTemplate {
        username,
        history,
        notices,
        exchange,
    }
    .render()?;

    Ok(Html(body).into_response())
}

#[derive(Debug)]
pub struct UiError {
    status: StatusCode,
    message: String,
}

impl UiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<anyhow::Error> for UiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("ui request failed: {:#}", value);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl From<askama::Error> for UiError {
    fn from(value: askama::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for UiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
