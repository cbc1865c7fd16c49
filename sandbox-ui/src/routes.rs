//! HTTP route handlers for the sandbox API.

use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use sandbox::bundle::SourceBundle;
use sandbox::compose::compose;
use sandbox::console::LogEntry;
use sandbox::host::RunState;
use tracing::info;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/run", post(run_bundle))
        .route("/console", get(get_console))
        .route("/console/html", get(get_console_html))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct RunResponse {
    generation: u64,
    /// The composed document, returned so the browser can render the
    /// visual preview in a sandboxed iframe (`sandbox="allow-scripts"`:
    /// script execution only, no same-origin privileges, no navigation,
    /// no form submission).
    document: String,
}

/// POST /api/run - start a new run generation from the submitted bundle.
async fn run_bundle(
    State(state): State<AppState>,
    Json(bundle): Json<SourceBundle>,
) -> Json<RunResponse> {
    let generation = state.host.run(&bundle);
    info!(generation, "run started");
    Json(RunResponse {
        generation,
        document: compose(&bundle).into_string(),
    })
}

#[derive(Serialize)]
struct ConsoleResponse {
    state: RunState,
    generation: u64,
    entries: Vec<LogEntry>,
}

/// GET /api/console - snapshot of the current generation's entry sequence.
async fn get_console(State(state): State<AppState>) -> Json<ConsoleResponse> {
    Json(ConsoleResponse {
        state: state.host.state(),
        generation: state.host.generation(),
        entries: state.host.entries(),
    })
}

/// GET /api/console/html - the rendered console fragment.
async fn get_console_html(State(state): State<AppState>) -> Html<String> {
    Html(state.host.render_html())
}
