//! Encode-and-publish command line for looping a local file to RTMP.
//!
//! The argument vector is fixed: libx264 at a constant 2500k with a 2 s GOP,
//! AAC at 128k, FLV muxing. The only variables are the input path, the
//! ingest URL and whether the output is scaled to a 720x1280 portrait frame.

use std::path::Path;

use lc_core::{StreamRequest, REDACTED};

use crate::command::ToolCommand;

/// Portrait output frame used in vertical mode.
pub const VERTICAL_SCALE: &str = "scale=720:1280";

/// Build the ingest URL for a stream key.
///
/// The key is appended verbatim as the last path segment.
pub fn ingest_url(base: &str, stream_key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), stream_key)
}

/// A ready-to-spawn publish command together with its printable form.
#[derive(Debug, Clone)]
pub struct PublishCommand {
    pub command: ToolCommand,
    /// The command line with the stream key replaced by [`REDACTED`].
    pub display: String,
}

/// Arguments for one publish run, program name excluded.
fn publish_args(input: &Path, vertical: bool, url: String) -> Vec<String> {
    let mut args: Vec<String> = [
        "-re",
        "-stream_loop",
        "-1",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(input.to_string_lossy().to_string());

    // Video: constant bitrate H.264, keyframe every 60 frames.
    args.extend(
        [
            "-c:v", "libx264", "-preset", "veryfast", "-b:v", "2500k", "-maxrate", "2500k",
            "-bufsize", "5000k", "-g", "60", "-keyint_min", "60",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    // Audio.
    args.extend(["-c:a", "aac", "-b:a", "128k"].iter().map(|s| s.to_string()));

    if vertical {
        args.push("-vf".into());
        args.push(VERTICAL_SCALE.into());
    }

    args.push("-f".into());
    args.push("flv".into());
    args.push(url);
    args
}

/// Build the ffmpeg invocation for `request`.
pub fn build_publish_command(
    program: &Path,
    request: &StreamRequest,
    ingest_base: &str,
) -> PublishCommand {
    let url = ingest_url(ingest_base, &request.stream_key);

    tracing::info!(
        "Publish command: {:?} -> {} (vertical={})",
        request.input_path,
        ingest_url(ingest_base, REDACTED),
        request.vertical,
    );

    let mut command = ToolCommand::new(program.to_path_buf());
    command.args(publish_args(&request.input_path, request.vertical, url));

    let display_args = publish_args(
        &request.input_path,
        request.vertical,
        ingest_url(ingest_base, REDACTED),
    );
    let display = std::iter::once(program.to_string_lossy().to_string())
        .chain(display_args)
        .collect::<Vec<_>>()
        .join(" ");

    PublishCommand { command, display }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const BASE: &str = "rtmp://a.rtmp.youtube.com/live2";

    fn build(vertical: bool) -> PublishCommand {
        let request = StreamRequest::new("/videos/a.mp4", "abc123", vertical);
        build_publish_command(&PathBuf::from("ffmpeg"), &request, BASE)
    }

    #[test]
    fn landscape_command_line() {
        let publish = build(false);
        let args = publish.command.get_args();

        assert!(args.windows(2).any(|w| w == ["-b:v", "2500k"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/videos/a.mp4"]));
        assert!(!args.iter().any(|a| a == "-vf"));
        assert!(!args.iter().any(|a| a == VERTICAL_SCALE));
        assert_eq!(args.last().unwrap(), "rtmp://a.rtmp.youtube.com/live2/abc123");
    }

    #[test]
    fn vertical_command_line() {
        let publish = build(true);
        let args = publish.command.get_args();
        assert!(args.windows(2).any(|w| w == ["-vf", "scale=720:1280"]));
        assert_eq!(args.last().unwrap(), "rtmp://a.rtmp.youtube.com/live2/abc123");
    }

    #[test]
    fn full_argument_vector() {
        let publish = build(false);
        let expected = [
            "-re", "-stream_loop", "-1", "-i", "/videos/a.mp4", "-c:v", "libx264", "-preset",
            "veryfast", "-b:v", "2500k", "-maxrate", "2500k", "-bufsize", "5000k", "-g", "60",
            "-keyint_min", "60", "-c:a", "aac", "-b:a", "128k", "-f", "flv",
            "rtmp://a.rtmp.youtube.com/live2/abc123",
        ];
        assert_eq!(publish.command.get_args(), expected);
        assert_eq!(publish.command.program(), Path::new("ffmpeg"));
    }

    #[test]
    fn key_is_passed_verbatim() {
        let request = StreamRequest::new("/videos/a.mp4", "x-Y_z.9?q=1", false);
        let publish = build_publish_command(&PathBuf::from("ffmpeg"), &request, BASE);
        assert_eq!(
            publish.command.get_args().last().unwrap(),
            "rtmp://a.rtmp.youtube.com/live2/x-Y_z.9?q=1"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_not_doubled() {
        assert_eq!(ingest_url("rtmp://host/app/", "k"), "rtmp://host/app/k");
        assert_eq!(ingest_url("rtmp://host/app", "k"), "rtmp://host/app/k");
    }

    #[test]
    fn display_hides_key() {
        let publish = build(true);
        assert!(!publish.display.contains("abc123"));
        assert!(publish.display.starts_with("ffmpeg -re -stream_loop -1"));
        assert!(publish.display.ends_with("-f flv rtmp://a.rtmp.youtube.com/live2/****"));
        assert!(publish.display.contains("-vf scale=720:1280"));
    }
}
