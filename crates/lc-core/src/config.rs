//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, tools, stream and media sections. Every section defaults sensibly
//! so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub stream: StreamConfig,
    pub media: MediaConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        let ingest = self.stream.ingest_url.trim();
        if ingest.is_empty() {
            warnings.push("stream.ingest_url is empty".into());
        } else if !ingest.starts_with("rtmp://") && !ingest.starts_with("rtmps://") {
            warnings.push(format!(
                "stream.ingest_url '{ingest}' is not an rtmp:// or rtmps:// URL"
            ));
        }

        if self.stream.display_lines > crate::stream::DISPLAY_LOG_LINES {
            warnings.push(format!(
                "stream.display_lines ({}) is above the maximum of {}; the log view is capped",
                self.stream.display_lines,
                crate::stream::DISPLAY_LOG_LINES
            ));
        }

        if self.stream.display_lines > self.stream.log_history {
            warnings.push(format!(
                "stream.display_lines ({}) exceeds stream.log_history ({})",
                self.stream.display_lines, self.stream.log_history
            ));
        }

        if self.stream.stop_grace_secs == 0 {
            warnings.push(
                "stream.stop_grace_secs is 0; the encoder will be killed without a graceful stop"
                    .into(),
            );
        }

        if self.media.retention_hours == 0 {
            warnings.push("media.retention_hours is 0; every upload is swept immediately".into());
        }

        if self.media.sweep_interval_secs == 0 {
            warnings.push("media.sweep_interval_secs is 0; periodic sweeping is disabled".into());
        }

        if self.media.extensions.is_empty() {
            warnings.push("media.extensions is empty; every upload will be rejected".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    /// Upper bound for a single upload request body, in megabytes.
    pub max_upload_mb: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            static_dir: Some(PathBuf::from("./static")),
            max_upload_mb: 16000,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.max_upload_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Publishing session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// RTMP ingest base; the stream key is appended as the last path segment.
    pub ingest_url: String,
    /// Log lines retained per session.
    pub log_history: usize,
    /// Log lines shown in the log view.
    pub display_lines: usize,
    /// Seconds to wait after SIGTERM before killing the encoder.
    pub stop_grace_secs: u64,
    /// Finished sessions kept for inspection.
    pub session_history: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ingest_url: "rtmp://a.rtmp.youtube.com/live2".into(),
            log_history: 1000,
            display_lines: crate::stream::DISPLAY_LOG_LINES,
            stop_grace_secs: 5,
            session_history: 20,
        }
    }
}

impl StreamConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Upload directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub upload_dir: PathBuf,
    /// Files whose modification time is older than this are swept.
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    /// Accepted upload extensions, without the leading dot.
    pub extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploaded_videos"),
            retention_hours: 24,
            sweep_interval_secs: 3600,
            extensions: crate::stream::MEDIA_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl MediaConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
