//! Stream-domain types: publish requests, session status, and bounded logs.
//!
//! Statuses serialize in snake_case and implement `Display` manually for
//! consistent string representation in log lines and API responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Number of log lines shown in the read-only log view.
pub const DISPLAY_LOG_LINES: usize = 25;

/// Upload extensions accepted by the media store (matched case-insensitively).
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "flv"];

/// Placeholder substituted for the stream key wherever it would be displayed.
pub const REDACTED: &str = "****";

// ---------------------------------------------------------------------------
// StreamRequest
// ---------------------------------------------------------------------------

/// A request to publish one local file to the ingestion endpoint.
#[derive(Clone, Deserialize)]
pub struct StreamRequest {
    /// Local media file to loop.
    pub input_path: PathBuf,
    /// Destination secret appended to the ingest URL. Never logged.
    pub stream_key: String,
    /// Scale output to a fixed 720x1280 portrait frame.
    #[serde(default)]
    pub vertical: bool,
}

impl StreamRequest {
    pub fn new(input_path: impl Into<PathBuf>, stream_key: impl Into<String>, vertical: bool) -> Self {
        Self {
            input_path: input_path.into(),
            stream_key: stream_key.into(),
            vertical,
        }
    }

    /// Check the request before anything is spawned.
    ///
    /// The key must contain something other than whitespace, and the input
    /// must be an existing regular file that can be opened for reading.
    pub fn validate(&self) -> Result<()> {
        if self.stream_key.trim().is_empty() {
            return Err(Error::validation("stream key is required"));
        }

        if !self.input_path.is_file() {
            return Err(Error::validation(format!(
                "input file does not exist: {}",
                self.input_path.display()
            )));
        }

        std::fs::File::open(&self.input_path).map_err(|e| {
            Error::validation(format!(
                "input file is not readable: {}: {e}",
                self.input_path.display()
            ))
        })?;

        Ok(())
    }

    /// File name of the input, for display.
    pub fn input_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input_path.to_string_lossy().to_string())
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("input_path", &self.input_path)
            .field("stream_key", &REDACTED)
            .field("vertical", &self.vertical)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    StoppedByUser,
    ExitedNormally,
    ExitedWithError,
}

impl SessionStatus {
    /// Whether the encoder has exited and its status has been observed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Terminal status for an exited process.
    ///
    /// A requested stop wins over the exit code, since a killed encoder
    /// reports a signal or a non-zero code.
    pub fn from_exit(stop_requested: bool, success: bool) -> Self {
        if stop_requested {
            Self::StoppedByUser
        } else if success {
            Self::ExitedNormally
        } else {
            Self::ExitedWithError
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::StoppedByUser => write!(f, "stopped_by_user"),
            Self::ExitedNormally => write!(f, "exited_normally"),
            Self::ExitedWithError => write!(f, "exited_with_error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Log buffer
// ---------------------------------------------------------------------------

/// One line of encoder output (or a line the relay wrote itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LogLine {
    /// Monotonic per-session sequence number, starting at 1.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Append-only log with bounded retention of the most recent lines.
///
/// Sequence numbers keep counting after old lines are evicted, so readers can
/// resume with [`LogBuffer::since`] without seeing a line twice.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    next_seq: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 1,
        }
    }

    /// Append a line, evicting the oldest one when full.
    pub fn push(&mut self, text: impl Into<String>) -> LogLine {
        let line = LogLine {
            seq: self.next_seq,
            at: Utc::now(),
            text: text.into(),
        };
        self.next_seq += 1;

        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// The most recent `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// The lines shown in the log view.
    pub fn display(&self) -> Vec<LogLine> {
        self.tail(DISPLAY_LOG_LINES)
    }

    /// All retained lines with a sequence number greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<LogLine> {
        self.lines.iter().filter(|l| l.seq > seq).cloned().collect()
    }

    /// Total number of lines ever appended.
    pub fn total(&self) -> u64 {
        self.next_seq - 1
    }

    /// Sequence number of the newest line (0 when empty).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check if a path has an accepted media extension.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Secrets shorter than this are only redacted as a trailing URL path
/// segment; replacing them anywhere would mangle ordinary output.
pub const MIN_BARE_REDACT_LEN: usize = 4;

/// Replace occurrences of `secret` in `text` with [`REDACTED`].
///
/// Secrets of at least [`MIN_BARE_REDACT_LEN`] bytes are replaced wherever
/// they appear. Shorter ones only where they follow a `/` and end at a
/// segment boundary, which is how they show up inside the ingest URL.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    if secret.len() >= MIN_BARE_REDACT_LEN {
        return text.replace(secret, REDACTED);
    }

    let needle = format!("/{secret}");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(&needle) {
        let end = pos + needle.len();
        let at_boundary = rest[end..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')));
        out.push_str(&rest[..pos]);
        if at_boundary {
            out.push('/');
            out.push_str(REDACTED);
        } else {
            out.push_str(&needle);
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mp4");
        std::fs::write(&file, b"x").unwrap();

        let err = StreamRequest::new(&file, "", false).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = StreamRequest::new(&file, "   ", false).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn validate_rejects_missing_file() {
        let err = StreamRequest::new("/nonexistent/a.mp4", "abc123", false)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn validate_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = StreamRequest::new(dir.path(), "abc123", false)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn validate_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mp4");
        std::fs::write(&file, b"x").unwrap();
        StreamRequest::new(&file, "abc123", true).validate().unwrap();
    }

    #[test]
    fn debug_hides_stream_key() {
        let req = StreamRequest::new("/videos/a.mp4", "super-secret", false);
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains(REDACTED));
    }

    #[test]
    fn status_from_exit() {
        assert_eq!(SessionStatus::from_exit(false, true), SessionStatus::ExitedNormally);
        assert_eq!(SessionStatus::from_exit(false, false), SessionStatus::ExitedWithError);
        assert_eq!(SessionStatus::from_exit(true, false), SessionStatus::StoppedByUser);
        assert_eq!(SessionStatus::from_exit(true, true), SessionStatus::StoppedByUser);
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::ExitedWithError.is_terminal());
    }

    #[test]
    fn status_serde_matches_display() {
        for status in [
            SessionStatus::Running,
            SessionStatus::StoppedByUser,
            SessionStatus::ExitedNormally,
            SessionStatus::ExitedWithError,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn display_is_capped_at_25_lines() {
        let mut log = LogBuffer::new(1000);
        for i in 1..=40 {
            log.push(format!("line {i}"));
        }
        let shown = log.display();
        assert_eq!(shown.len(), DISPLAY_LOG_LINES);
        assert_eq!(shown.first().unwrap().text, "line 16");
        assert_eq!(shown.last().unwrap().text, "line 40");
        assert_eq!(log.len(), 40);
    }

    #[test]
    fn retention_evicts_oldest_but_keeps_counting() {
        let mut log = LogBuffer::new(3);
        for i in 1..=5 {
            log.push(format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total(), 5);
        let texts: Vec<_> = log.tail(10).into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["line 3", "line 4", "line 5"]);
    }

    #[test]
    fn since_resumes_after_sequence() {
        let mut log = LogBuffer::new(10);
        for i in 1..=4 {
            log.push(format!("line {i}"));
        }
        let rest = log.since(2);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].seq, 3);
        assert!(log.since(log.last_seq()).is_empty());
    }

    #[test]
    fn media_extensions() {
        assert!(is_media_file(Path::new("a.mp4")));
        assert!(is_media_file(Path::new("clip.FLV")));
        assert!(!is_media_file(Path::new("a.mkv")));
        assert!(!is_media_file(Path::new("no_extension")));
    }

    #[test]
    fn redact_replaces_secret() {
        let url = "rtmp://a.rtmp.youtube.com/live2/abc123";
        assert_eq!(redact(url, "abc123"), "rtmp://a.rtmp.youtube.com/live2/****");
        assert_eq!(redact(url, ""), url);
    }

    #[test]
    fn short_secret_only_redacted_in_url_segment() {
        let line = "Output #0, flv, to 'rtmp://host/live2/a':";
        assert_eq!(redact(line, "a"), "Output #0, flv, to 'rtmp://host/live2/****':");
        assert_eq!(redact("rtmp://host/live2/1", "1"), "rtmp://host/live2/****");

        // Unrelated text containing the key is left alone.
        let stats = "frame=  100 fps= 25 q=28.0 size=    1kB bitrate=1.0kbits/s speed=1x";
        assert_eq!(redact(stats, "1"), stats);
        assert_eq!(redact("Input #0, from '/videos/a.mp4':", "a"), "Input #0, from '/videos/a.mp4':");
        assert_eq!(redact("/live2/abc", "a"), "/live2/abc");
    }
}
