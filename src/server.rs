//! HTTP front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Landing page with the analyze form and ask box |
//! | `POST` | `/analyze` | Form field `github_url`; indexes the repository and binds it to the caller |
//! | `POST` | `/ask` | JSON `{"question": "..."}`; returns `{"answer": "..."}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Sessions
//!
//! A successful analyze sets the `repo_qa_session` cookie to an opaque id.
//! The server maps that id to the canonical repository identifier, so later
//! asks from the same browser reach the right conversation.
//!
//! # Error Contract
//!
//! `/ask` failures use the JSON error body
//!
//! ```json
//! { "error": { "code": "upstream_error", "message": "..." } }
//! ```
//!
//! | Error | Status | Code |
//! |-------|--------|------|
//! | invalid input | 400 | `bad_request` |
//! | repository unavailable | 502 | `repository_unavailable` |
//! | embedding / generation failure | 502 | `upstream_error` |
//! | anything else | 500 | `internal` |
//!
//! `/analyze` renders the same status with an HTML page instead.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::Error;
use crate::pipeline::{Pipeline, Reply};

pub const SESSION_COOKIE: &str = "repo_qa_session";

/// Oldest cookie bindings are dropped past this many.
const MAX_SESSION_BINDINGS: usize = 10_000;

const UPSTREAM_FAILURE_MESSAGE: &str =
    "The model service failed to respond. Please try again in a moment.";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    bindings: Arc<RwLock<SessionBindings>>,
}

/// Cookie session id → canonical repository identifier, bounded in size.
struct SessionBindings {
    repositories: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SessionBindings {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            repositories: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.repositories.len()
    }

    fn repository(&self, session_id: &str) -> Option<&String> {
        self.repositories.get(session_id)
    }

    /// Point `existing` at `repository` if it is still bound, otherwise mint a
    /// new id. Returns the id to hand back in the cookie.
    fn bind(&mut self, existing: Option<String>, repository: String) -> String {
        if let Some(id) = existing {
            if let Some(slot) = self.repositories.get_mut(&id) {
                *slot = repository;
                return id;
            }
        }

        let id = Uuid::new_v4().to_string();
        self.repositories.insert(id.clone(), repository);
        self.order.push_back(id.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.repositories.remove(&oldest);
            }
        }
        id
    }
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();
    let app = router(pipeline);

    tracing::info!(addr = %bind_addr, "listening");
    println!("repo-qa listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState {
        pipeline,
        bindings: Arc::new(RwLock::new(SessionBindings::with_capacity(
            MAX_SESSION_BINDINGS,
        ))),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/analyze", post(handle_analyze))
        .route("/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        tracing::error!(error = %err, "request failed");
        match err {
            Error::InvalidInput(message) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request",
                message,
            },
            Error::RepositoryUnavailable(message) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "repository_unavailable",
                message,
            },
            Error::EmbeddingService(_) | Error::AnswerGeneration(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upstream_error",
                message: UPSTREAM_FAILURE_MESSAGE.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET / ============

async fn handle_index() -> Html<String> {
    Html(render_page(None, None))
}

// ============ POST /analyze ============

#[derive(Deserialize)]
struct AnalyzeForm {
    #[serde(default)]
    github_url: String,
}

async fn handle_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AnalyzeForm>,
) -> Response {
    let outcome = match state.pipeline.analyze(&form.github_url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let err = AppError::from(e);
            let page = render_page(None, Some(&err.message));
            return (err.status, Html(page)).into_response();
        }
    };

    let session_id = state
        .bindings
        .write()
        .await
        .bind(session_id(&headers), outcome.repository_id.clone());

    let notice = if outcome.reused {
        format!("{} is ready (existing index).", outcome.repository_id)
    } else {
        format!(
            "{} analyzed: {} chunks indexed.",
            outcome.repository_id, outcome.chunk_count
        )
    };
    let mut response = Html(render_page(Some(&notice), None)).into_response();
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, session_id
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<AskResponse>, AppError> {
    let repository = match session_id(&headers) {
        Some(id) => state.bindings.read().await.repository(&id).cloned(),
        None => None,
    };
    // A missing or malformed body is the same as no question.
    let question = serde_json::from_slice::<AskRequest>(&body)
        .ok()
        .and_then(|r| r.question);

    let reply = state
        .pipeline
        .ask(repository.as_deref(), question.as_deref())
        .await?;
    if let Reply::Answer(answer) = &reply {
        tracing::debug!(sources = answer.sources.len(), "answered question");
    }

    Ok(Json(AskResponse {
        answer: reply.text().to_string(),
    }))
}

/// Value of the session cookie, if the request carries one.
fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn render_page(notice: Option<&str>, error: Option<&str>) -> String {
    let mut banner = String::new();
    if let Some(notice) = notice {
        banner.push_str(&format!(
            "<p class=\"notice\">{}</p>",
            escape_html(notice)
        ));
    }
    if let Some(error) = error {
        banner.push_str(&format!("<p class=\"error\">{}</p>", escape_html(error)));
    }
    PAGE_TEMPLATE.replace("{{banner}}", &banner)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const PAGE_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>repo-qa</title>
<style>
body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }
.error { color: #b00020; }
.notice { color: #1b5e20; }
#answer { white-space: pre-wrap; border-top: 1px solid #ccc; padding-top: 1rem; }
</style>
</head>
<body>
<h1>Ask a repository</h1>
{{banner}}
<form method="post" action="/analyze">
  <input type="url" name="github_url" size="50" placeholder="https://github.com/owner/repo" required>
  <button type="submit">Analyze</button>
</form>
<form id="ask">
  <input type="text" name="question" size="50" placeholder="What does this repository do?">
  <button type="submit">Ask</button>
</form>
<div id="answer"></div>
<script>
document.getElementById("ask").addEventListener("submit", async (event) => {
  event.preventDefault();
  const question = event.target.question.value;
  const out = document.getElementById("answer");
  out.textContent = "Thinking...";
  const resp = await fetch("/ask", {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ question }),
  });
  const body = await resp.json();
  out.textContent = body.answer ?? body.error.message;
});
</script>
</body>
</html>
"#;
