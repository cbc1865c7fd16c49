//! Server-Sent Events stream of console activity.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use sandbox::console::LogKind;
use sandbox::host::ConsoleEvent;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::AppState;

#[derive(Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: String,
    generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<LogKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<&ConsoleEvent> for SsePayload {
    fn from(event: &ConsoleEvent) -> Self {
        match event {
            ConsoleEvent::Cleared { generation } => SsePayload {
                event_type: "cleared".to_string(),
                generation: *generation,
                kind: None,
                message: None,
            },
            ConsoleEvent::Entry { generation, entry } => SsePayload {
                event_type: "entry".to_string(),
                generation: *generation,
                kind: Some(entry.kind),
                message: Some(entry.message.clone()),
            },
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.host.subscribe();

    let stream = async_stream::stream! {
        // Send initial connected event
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(console_event) => {
                    let payload = SsePayload::from(&console_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("console").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
