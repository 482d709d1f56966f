//! Server-Sent Events (SSE) handler.
//!
//! Subscribes to the [`lc_core::events::EventBus`], optionally filters by
//! category, replays recent events for late joiners, and sends keepalive
//! heartbeats.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use lc_core::events::EventCategory;

use crate::context::AppContext;
use crate::error::AppError;

/// Optional query parameter for category filtering.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct EventsQuery {
    /// Filter events by category: "session", "log" or "media".
    pub category: Option<String>,
}

/// GET /api/events -- SSE stream of application events.
#[utoipa::path(
    get,
    path = "/api/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "text/event-stream of JSON events"),
        (status = 400, description = "Unknown category")
    )
)]
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let category_filter = params
        .category
        .as_deref()
        .map(|c| c.parse::<EventCategory>().map_err(lc_core::Error::validation))
        .transpose()?;

    // Replay recent events for late joiners.
    let recent = ctx.event_bus.recent_events(50);
    let mut rx = ctx.event_bus.subscribe();
    let shutdown = ctx.shutdown.clone();

    let stream = async_stream::stream! {
        // Send recent events first, oldest first.
        for event in recent.into_iter().rev() {
            if matches_category(event.category, category_filter) {
                if let Ok(data) = serde_json::to_string(&event) {
                    yield Ok(Event::default().data(data));
                }
            }
        }

        // Heartbeat interval.
        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if matches_category(event.category, category_filter) {
                                if let Ok(data) = serde_json::to_string(&event) {
                                    yield Ok(Event::default().data(data));
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!("SSE client lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    yield Ok(Event::default()
                        .event("heartbeat")
                        .data(r#"{"type":"heartbeat"}"#));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn matches_category(event_category: EventCategory, filter: Option<EventCategory>) -> bool {
    filter.map_or(true, |f| f == event_category)
}
