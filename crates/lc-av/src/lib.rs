//! # lc-av
//!
//! External tool management for loopcast.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for short-lived invocations, and [`ToolCommand::spawn_supervised`]
//!   for long-running processes whose output is relayed line by line.
//! - **Publishing** ([`publish`]) -- the fixed encoder command line that loops
//!   a local file into an RTMP ingest endpoint.

pub mod command;
pub mod publish;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput, ToolProcess};
pub use publish::{build_publish_command, ingest_url, PublishCommand};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
