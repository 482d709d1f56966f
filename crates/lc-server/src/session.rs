//! Stream session manager.
//!
//! Owns at most one running encoder at a time. [`SessionManager::start`]
//! spawns the publish command and returns immediately; a relay task then
//! appends every output line to the session log, supervises stop requests
//! and records the terminal status once the exit code has been observed.
//!
//! Observers never poll: log lines are pushed through a per-session
//! broadcast channel (see [`SessionManager::tail_log`]) and lifecycle changes
//! through the application [`EventBus`].

use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_core::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lc_av::{ToolProcess, ToolRegistry};
use lc_core::config::Config;
use lc_core::events::{EventBus, EventPayload};
use lc_core::{Error, LogBuffer, LogLine, Result, SessionId, SessionStatus, StreamRequest};

/// How long to keep reading output after the encoder exited. Anything it
/// spawned may still hold the pipes open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lines buffered per log subscriber before it lags.
const LOG_CHANNEL_CAPACITY: usize = 256;

/// A boxed stream of log lines; ends when the session ends.
pub type LogStream = Pin<Box<dyn Stream<Item = LogLine> + Send + 'static>>;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Knobs the session manager needs from configuration and tool discovery.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Encoder executable.
    pub program: PathBuf,
    /// RTMP ingest base URL.
    pub ingest_url: String,
    pub log_history: usize,
    pub display_lines: usize,
    pub stop_grace: Duration,
    pub session_history: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config, tools: &ToolRegistry) -> Self {
        Self {
            program: tools.program("ffmpeg"),
            ingest_url: config.stream.ingest_url.clone(),
            log_history: config.stream.log_history,
            display_lines: config.stream.display_lines.min(lc_core::DISPLAY_LOG_LINES),
            stop_grace: config.stream.stop_grace(),
            session_history: config.stream.session_history.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    exit_code: Option<i32>,
    ended_at: Option<DateTime<Utc>>,
    stop_requested: bool,
    /// The encoder has exited; the session only waits for its output to drain.
    exited: bool,
    log: LogBuffer,
    /// Dropped when the session ends, which completes every log stream.
    log_tx: Option<broadcast::Sender<LogLine>>,
}

/// One run of the encode-and-publish process.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// File name of the looped input.
    pub input: String,
    pub input_path: PathBuf,
    pub vertical: bool,
    /// Encoder command line with the stream key redacted.
    pub command_line: String,
    pub started_at: DateTime<Utc>,
    display_lines: usize,
    cancel: CancellationToken,
    status_tx: watch::Sender<SessionStatus>,
    state: Mutex<SessionState>,
}

/// Serializable view of a [`Session`].
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SessionSnapshot {
    #[schema(value_type = String)]
    pub id: SessionId,
    pub input: String,
    pub vertical: bool,
    pub command_line: String,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub stop_requested: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Lines appended so far, including evicted ones.
    pub log_lines: u64,
}

impl Session {
    fn new(request: &StreamRequest, command_line: String, settings: &SessionSettings) -> Self {
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(SessionStatus::Running);
        Self {
            id: SessionId::new(),
            input: request.input_name(),
            input_path: request.input_path.clone(),
            vertical: request.vertical,
            command_line,
            started_at: Utc::now(),
            display_lines: settings.display_lines,
            cancel: CancellationToken::new(),
            status_tx,
            state: Mutex::new(SessionState {
                status: SessionStatus::Running,
                exit_code: None,
                ended_at: None,
                stop_requested: false,
                exited: false,
                log: LogBuffer::new(settings.log_history),
                log_tx: Some(log_tx),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            id: self.id,
            input: self.input.clone(),
            vertical: self.vertical,
            command_line: self.command_line.clone(),
            status: state.status,
            exit_code: state.exit_code,
            stop_requested: state.stop_requested,
            started_at: self.started_at,
            ended_at: state.ended_at,
            log_lines: state.log.total(),
        }
    }

    /// The most recent `n` retained log lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        self.state.lock().log.tail(n)
    }

    /// The lines shown in the read-only log view.
    pub fn display_log(&self) -> Vec<LogLine> {
        self.tail(self.display_lines)
    }

    /// Retained lines with a sequence number greater than `seq`.
    pub fn log_since(&self, seq: u64) -> Vec<LogLine> {
        self.state.lock().log.since(seq)
    }

    /// Wait until the session reaches a terminal status.
    pub async fn wait(&self) -> SessionStatus {
        let mut rx = self.status_tx.subscribe();
        let waited = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        match waited {
            Ok(status) => status,
            Err(_) => self.status(),
        }
    }

    fn append(&self, text: impl Into<String>) -> LogLine {
        let mut state = self.state.lock();
        let line = state.log.push(text);
        if let Some(tx) = &state.log_tx {
            // Ignore send errors (no subscribers).
            let _ = tx.send(line.clone());
        }
        line
    }

    /// Snapshot the last `n` lines and subscribe in one step, so the stream
    /// that follows neither repeats nor skips a line. Also returns the
    /// sequence number of the newest line at that moment.
    fn subscribe_log(&self, n: usize) -> LogSubscription {
        let state = self.state.lock();
        LogSubscription {
            backlog: state.log.tail(n),
            last_seq: state.log.last_seq(),
            rx: state.log_tx.as_ref().map(|tx| tx.subscribe()),
        }
    }

    /// Mark a stop as requested. Returns `false` if the encoder already
    /// exited or a stop is already underway.
    fn request_stop(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() || state.exited || state.stop_requested {
            return false;
        }
        state.stop_requested = true;
        self.cancel.cancel();
        true
    }

    fn stop_requested(&self) -> bool {
        self.state.lock().stop_requested
    }

    fn mark_exited(&self) {
        self.state.lock().exited = true;
    }

    fn finish(&self, status: SessionStatus, exit_code: Option<i32>) {
        {
            let mut state = self.state.lock();
            state.status = status;
            state.exit_code = exit_code;
            state.ended_at = Some(Utc::now());
            state.log_tx = None;
        }
        self.status_tx.send_replace(status);
    }
}

struct LogSubscription {
    backlog: Vec<LogLine>,
    last_seq: u64,
    rx: Option<broadcast::Receiver<LogLine>>,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Registry of stream sessions with at most one running at a time.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    active: Mutex<Option<SessionId>>,
    event_bus: Arc<EventBus>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, event_bus: Arc<EventBus>) -> Self {
        Self {
            sessions: DashMap::new(),
            active: Mutex::new(None),
            event_bus,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start publishing `request`.
    ///
    /// Returns as soon as the encoder has been spawned, with the session in
    /// [`SessionStatus::Running`]. An invalid request is rejected before
    /// anything is spawned; a second start while a session is running is a
    /// [`Error::Conflict`]. A spawn failure is not an error for the caller:
    /// the returned session is already [`SessionStatus::ExitedWithError`]
    /// and its log says why.
    pub fn start(self: &Arc<Self>, request: StreamRequest) -> Result<Arc<Session>> {
        request.validate()?;

        let mut active = self.active.lock();
        if let Some(id) = *active {
            return Err(Error::Conflict(format!(
                "session {id} is still running; stop it first"
            )));
        }

        let publish = lc_av::build_publish_command(
            &self.settings.program,
            &request,
            &self.settings.ingest_url,
        );
        let session = Arc::new(Session::new(&request, publish.display.clone(), &self.settings));
        session.append(format!("Running: {}", publish.display));

        self.sessions.insert(session.id, session.clone());
        self.prune_history();

        tracing::info!(
            session_id = %session.id,
            input = %session.input,
            vertical = session.vertical,
            "Starting stream session"
        );
        self.event_bus.broadcast(EventPayload::SessionStarted {
            session_id: session.id,
            input: session.input.clone(),
            vertical: session.vertical,
        });

        match publish.command.spawn_supervised() {
            Ok((process, output)) => {
                *active = Some(session.id);
                drop(active);

                let manager = Arc::clone(self);
                let relayed = session.clone();
                tokio::spawn(async move {
                    manager.relay(relayed, process, output, request.stream_key).await;
                });
            }
            Err(e) => {
                drop(active);
                tracing::error!(session_id = %session.id, "Failed to spawn encoder: {e}");
                let line = session.append(format!("Failed to start encoder: {e}"));
                self.broadcast_line(session.id, &line);
                self.finalize(&session, SessionStatus::ExitedWithError, None);
            }
        }

        Ok(session)
    }

    /// Stop the active session, if any. Fire-and-forget: the relay observes
    /// the exit and records the final status.
    pub fn stop(&self) -> Option<SessionId> {
        let active = *self.active.lock();
        let Some(id) = active else {
            tracing::debug!("Stop requested with no active session");
            return None;
        };

        match self.stop_session(id) {
            Ok(true) => Some(id),
            _ => None,
        }
    }

    /// Stop a specific session. Returns `false` when it has already ended
    /// or is already stopping.
    pub fn stop_session(&self, id: SessionId) -> Result<bool> {
        let session = self.get(id)?;
        if !session.request_stop() {
            return Ok(false);
        }

        tracing::info!(session_id = %id, "Stop requested");
        self.event_bus
            .broadcast(EventPayload::SessionStopRequested { session_id: id });
        Ok(true)
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("session", id))
    }

    /// The running session, if any.
    pub fn current(&self) -> Option<Arc<Session>> {
        let active = *self.active.lock();
        active.and_then(|id| self.get(id).ok())
    }

    /// All known sessions, newest first.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    /// Follow a session's log.
    ///
    /// Yields the last `backlog` lines, then every new line as it arrives.
    /// The stream ends once the session has ended and all lines were
    /// delivered; for an already finished session only the backlog is
    /// yielded.
    pub fn tail_log(&self, id: SessionId, backlog: usize) -> Result<LogStream> {
        let session = self.get(id)?;
        let LogSubscription {
            backlog: lines,
            mut last_seq,
            rx,
        } = session.subscribe_log(backlog);

        let stream = async_stream::stream! {
            for line in lines {
                yield line;
            }

            let Some(mut rx) = rx else {
                return;
            };

            loop {
                match rx.recv().await {
                    Ok(line) => {
                        if line.seq > last_seq {
                            last_seq = line.seq;
                            yield line;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(session_id = %session.id, "Log follower lagged by {n} lines");
                        for line in session.log_since(last_seq) {
                            last_seq = line.seq;
                            yield line;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Stop the active session and wait for it to end, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        let Some(session) = self.current() else {
            return;
        };
        self.stop();
        if tokio::time::timeout(timeout, session.wait()).await.is_err() {
            tracing::warn!(session_id = %session.id, "Session did not end before shutdown timeout");
        }
    }

    // -- Relay ---------------------------------------------------------------

    async fn relay(
        &self,
        session: Arc<Session>,
        mut process: ToolProcess,
        mut output: mpsc::Receiver<String>,
        stream_key: String,
    ) {
        let mut exit: Option<Result<ExitStatus>> = None;
        let mut output_open = true;
        let mut stopping = false;
        let mut kill_at: Option<Instant> = None;
        let mut drain_until: Option<Instant> = None;

        loop {
            if exit.is_some() && !output_open {
                break;
            }

            tokio::select! {
                line = output.recv(), if output_open => match line {
                    Some(text) => {
                        let text = lc_core::redact(&text, &stream_key);
                        tracing::debug!(session_id = %session.id, "{text}");
                        let line = session.append(text);
                        self.broadcast_line(session.id, &line);
                    }
                    None => output_open = false,
                },
                status = process.wait(), if exit.is_none() => {
                    session.mark_exited();
                    exit = Some(status);
                    drain_until = Some(Instant::now() + DRAIN_TIMEOUT);
                }
                _ = session.cancel.cancelled(), if !stopping && exit.is_none() => {
                    stopping = true;
                    if let Err(e) = process.terminate() {
                        tracing::warn!(session_id = %session.id, "Failed to signal encoder: {e}");
                    }
                    kill_at = Some(Instant::now() + self.settings.stop_grace);
                }
                _ = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() && exit.is_none() => {
                    tracing::warn!(
                        session_id = %session.id,
                        grace_secs = self.settings.stop_grace.as_secs(),
                        "Encoder ignored SIGTERM; killing"
                    );
                    kill_at = None;
                    if let Err(e) = process.kill() {
                        tracing::warn!(session_id = %session.id, "Failed to kill encoder: {e}");
                    }
                }
                _ = tokio::time::sleep_until(drain_until.unwrap_or_else(Instant::now)), if drain_until.is_some() && output_open => {
                    tracing::debug!(session_id = %session.id, "Output still open after exit; no longer reading");
                    break;
                }
            }
        }

        let stop_requested = session.stop_requested();
        let (status, exit_code, message) = match exit {
            Some(Ok(exit_status)) => {
                let status = SessionStatus::from_exit(stop_requested, exit_status.success());
                let message = match status {
                    SessionStatus::StoppedByUser => "Streaming stopped by user.".to_string(),
                    SessionStatus::ExitedNormally => "Streaming finished.".to_string(),
                    _ => match exit_status.code() {
                        Some(code) => format!("Streaming failed: encoder exited with code {code}."),
                        None => format!("Streaming failed: encoder {exit_status}."),
                    },
                };
                (status, exit_status.code(), message)
            }
            Some(Err(e)) => (
                SessionStatus::ExitedWithError,
                None,
                format!("Streaming failed: {e}"),
            ),
            None => (
                SessionStatus::ExitedWithError,
                None,
                "Streaming failed: exit status was not observed.".to_string(),
            ),
        };

        let line = session.append(message);
        self.broadcast_line(session.id, &line);
        self.finalize(&session, status, exit_code);
    }

    fn finalize(&self, session: &Session, status: SessionStatus, exit_code: Option<i32>) {
        session.finish(status, exit_code);

        {
            let mut active = self.active.lock();
            if *active == Some(session.id) {
                *active = None;
            }
        }

        tracing::info!(
            session_id = %session.id,
            status = %status,
            exit_code = ?exit_code,
            duration_secs = (Utc::now() - session.started_at).num_seconds(),
            "Stream session ended"
        );
        self.event_bus.broadcast(EventPayload::SessionEnded {
            session_id: session.id,
            status,
            exit_code,
        });
    }

    fn broadcast_line(&self, session_id: SessionId, line: &LogLine) {
        self.event_bus.broadcast(EventPayload::SessionLog {
            session_id,
            seq: line.seq,
            line: line.text.clone(),
        });
    }

    /// Drop the oldest finished sessions beyond the history limit.
    fn prune_history(&self) {
        let limit = self.settings.session_history;
        if self.sessions.len() <= limit {
            return;
        }

        let mut finished: Vec<(SessionId, DateTime<Utc>)> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().status().is_terminal())
            .map(|entry| (*entry.key(), entry.value().started_at))
            .collect();
        finished.sort_by_key(|(_, started_at)| *started_at);

        let excess = self.sessions.len() - limit;
        for (id, _) in finished.into_iter().take(excess) {
            self.sessions.remove(&id);
            tracing::debug!(session_id = %id, "Pruned finished session");
        }
    }
}
