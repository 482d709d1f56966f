//! Stream session route handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use lc_core::{LogLine, SessionId, StreamRequest};

use crate::context::AppContext;
use crate::error::AppError;
use crate::session::{Session, SessionSnapshot};

/// Request body for starting a session.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct StartSessionRequest {
    /// Name of a file in the upload directory.
    pub file: String,
    /// Destination stream key. Never echoed back.
    pub stream_key: String,
    /// Scale the output to a 720x1280 portrait frame.
    #[serde(default)]
    pub vertical: bool,
}

/// A session together with its log view.
#[derive(Serialize, utoipa::ToSchema)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    /// The most recent log lines, oldest first.
    pub log: Vec<LogLine>,
}

impl SessionDetail {
    fn from_session(session: &Session) -> Self {
        Self {
            session: session.snapshot(),
            log: session.display_log(),
        }
    }
}

/// Outcome of a stop request.
#[derive(Serialize, utoipa::ToSchema)]
pub struct StopResponse {
    /// The session being stopped, if any.
    pub session_id: Option<String>,
    /// Whether a stop was issued by this request.
    pub stopping: bool,
}

/// Query parameters for the log endpoints.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LogParams {
    /// Number of trailing lines (defaults to the display size).
    pub lines: Option<usize>,
}

fn parse_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse()
        .map_err(|_| lc_core::Error::validation(format!("invalid session id: {raw}")).into())
}

/// POST /api/sessions
#[utoipa::path(
    post,
    path = "/api/sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = SessionDetail),
        (status = 400, description = "Invalid file or empty stream key"),
        (status = 409, description = "A session is already running")
    )
)]
pub async fn start_session(
    State(ctx): State<AppContext>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input_path = ctx.media.resolve(&payload.file)?;

    // Expired uploads are swept before every start.
    if let Err(e) = ctx.media.sweep(ctx.config.media.retention()).await {
        tracing::warn!("Sweep before start failed: {e}");
    }

    let request = StreamRequest::new(input_path, payload.stream_key, payload.vertical);
    let session = ctx.sessions.start(request)?;

    Ok((StatusCode::CREATED, Json(SessionDetail::from_session(&session))))
}

/// GET /api/sessions
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Known sessions, newest first", body = Vec<SessionSnapshot>)
    )
)]
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<SessionSnapshot>> {
    Json(ctx.sessions.list().iter().map(|s| s.snapshot()).collect())
}

/// GET /api/sessions/current
#[utoipa::path(
    get,
    path = "/api/sessions/current",
    responses(
        (status = 200, description = "The running session, or null when idle", body = SessionDetail)
    )
)]
pub async fn current_session(State(ctx): State<AppContext>) -> Json<Option<SessionDetail>> {
    Json(ctx.sessions.current().map(|s| SessionDetail::from_session(&s)))
}

/// POST /api/sessions/stop
#[utoipa::path(
    post,
    path = "/api/sessions/stop",
    responses(
        (status = 202, description = "Stop issued (or nothing was running)", body = StopResponse)
    )
)]
pub async fn stop_current(State(ctx): State<AppContext>) -> impl IntoResponse {
    let stopped = ctx.sessions.stop();
    (
        StatusCode::ACCEPTED,
        Json(StopResponse {
            session_id: stopped.map(|id| id.to_string()),
            stopping: stopped.is_some(),
        }),
    )
}

/// GET /api/sessions/{id}
#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session with its log view", body = SessionDetail),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, AppError> {
    let session = ctx.sessions.get(parse_id(&id)?)?;
    Ok(Json(SessionDetail::from_session(&session)))
}

/// POST /api/sessions/{id}/stop
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/stop",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 202, description = "Stop issued, or session already ended", body = StopResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn stop_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let stopping = ctx.sessions.stop_session(id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StopResponse {
            session_id: Some(id.to_string()),
            stopping,
        }),
    ))
}

/// GET /api/sessions/{id}/log
#[utoipa::path(
    get,
    path = "/api/sessions/{id}/log",
    params(("id" = String, Path, description = "Session id"), LogParams),
    responses(
        (status = 200, description = "Trailing log lines", body = Vec<LogLine>),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn session_log(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Json<Vec<LogLine>>, AppError> {
    let session = ctx.sessions.get(parse_id(&id)?)?;
    let lines = params.lines.unwrap_or(ctx.config.stream.display_lines);
    Ok(Json(session.tail(lines)))
}

/// GET /api/sessions/{id}/log/stream -- SSE stream of log lines.
///
/// Replays the trailing lines, then follows until the session ends, at
/// which point an `end` event carries the final session snapshot.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}/log/stream",
    params(("id" = String, Path, description = "Session id"), LogParams),
    responses(
        (status = 200, description = "text/event-stream of log lines"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn session_log_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let id = parse_id(&id)?;
    let backlog = params.lines.unwrap_or(ctx.config.stream.display_lines);
    let mut lines = ctx.sessions.tail_log(id, backlog)?;
    let sessions = ctx.sessions.clone();
    let shutdown = ctx.shutdown.clone();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                next = lines.next() => {
                    let Some(line) = next else {
                        break;
                    };
                    if let Ok(data) = serde_json::to_string(&line) {
                        yield Ok(Event::default().event("log").id(line.seq.to_string()).data(data));
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }

        if let Ok(session) = sessions.get(id) {
            if let Ok(data) = serde_json::to_string(&session.snapshot()) {
                yield Ok(Event::default().event("end").data(data));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
