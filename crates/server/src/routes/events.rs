use std::{convert::Infallible, time::Duration};

use axum::{
    Router,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunEventQuery {
    /// Only forward events of this run.
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CallQuery {
    pub role: Option<String>,
}

/// Forward a broadcast channel as server-sent events named `name`.
///
/// A subscriber that falls behind skips the missed messages and keeps going.
fn broadcast_sse<T, F>(
    receiver: Receiver<T>,
    name: &'static str,
    keep: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Clone + Serialize + Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let stream = stream::unfold((receiver, keep), move |(mut receiver, keep)| async move {
        loop {
            match receiver.recv().await {
                Ok(message) if keep(&message) => {
                    let json = serde_json::to_string(&message).unwrap_or_else(|_| "{}".to_string());
                    let event = Event::default().event(name).data(json);
                    return Some((Ok(event), (receiver, keep)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[HTTP] {} stream lagged, skipped {} message(s)", name, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
}

/// Stream wizard lifecycle events via SSE
pub async fn stream_run_events(
    Query(query): Query<RunEventQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    broadcast_sse(state.wizard.subscribe(), "run_event", move |event: &portal::RunEvent| {
        query.run_id.is_none_or(|id| event.run_id() == id)
    })
}

/// Stream every provider attempt the gateway makes via SSE
pub async fn stream_provider_calls(
    Query(query): Query<CallQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    broadcast_sse(state.gateway.subscribe_calls(), "provider_call", move |call: &portal::CallRecord| {
        query.role.as_deref().is_none_or(|role| call.role == role)
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events/runs", get(stream_run_events))
        .route("/events/calls", get(stream_provider_calls))
}
