//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which owns a temporary upload directory, a fake
//! encoder script and a full [`AppContext`]. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lc_av::ToolRegistry;
use lc_core::config::Config;
use lc_server::context::AppContext;
use lc_server::router::build_router;

/// Fake encoder that echoes its target and keeps running until signalled.
pub const LONG_RUNNING: &str = "echo \"ingest $*\" >&2; echo ready >&2; exec sleep 30";

/// Fake encoder that prints a few lines and exits cleanly.
pub const SHORT_RUN: &str = "echo one >&2; echo two >&2; echo three >&2";

/// Fake encoder that fails immediately.
pub const FAILING: &str = "echo 'Connection refused' >&2; exit 1";

/// Test harness wrapping a fully-constructed [`AppContext`] whose encoder is
/// a shell script in a temporary directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a harness whose encoder runs `encoder_body` under `/bin/sh`.
    pub fn new(encoder_body: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let encoder = write_encoder(dir.path(), encoder_body);

        let mut config = Config::default();
        config.tools.ffmpeg_path = Some(encoder);
        config.stream.ingest_url = "rtmp://127.0.0.1/live2".into();
        config.stream.stop_grace_secs = 2;
        config.media.upload_dir = dir.path().join("uploads");
        config.server.static_dir = None;

        std::fs::create_dir_all(&config.media.upload_dir).expect("failed to create upload dir");
        let tools = ToolRegistry::discover(&config.tools);
        let ctx = AppContext::new(config, tools);
        Self { ctx, dir }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(encoder_body: &str) -> (Self, SocketAddr) {
        let harness = Self::new(encoder_body);
        let app = build_router(harness.ctx.clone(), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Path of the upload directory.
    pub fn upload_dir(&self) -> PathBuf {
        self.ctx.media.dir().to_path_buf()
    }

    /// Place a file in the upload directory directly.
    pub fn put_upload(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.upload_dir().join(name);
        std::fs::write(&path, contents).expect("failed to write upload");
        path
    }

    /// Wait until no session is running.
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.ctx.sessions.current().is_some() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session did not end");
    }
}

fn write_encoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write encoder");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod encoder");
    }
    path
}
