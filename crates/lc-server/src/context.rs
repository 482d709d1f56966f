//! Application context shared by route handlers and background tasks.
//!
//! [`AppContext`] is cheap to clone: every field is an `Arc` or a token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lc_av::ToolRegistry;
use lc_core::config::Config;
use lc_core::events::EventBus;

use crate::media::MediaStore;
use crate::session::{SessionManager, SessionSettings};

/// Central state handed to every Axum handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub event_bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<SessionManager>,
    pub media: Arc<MediaStore>,
    /// Cancelled when the server begins shutting down; long-lived
    /// responses such as SSE streams end on it.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire up the session manager and media store around one event bus.
    pub fn new(config: Config, tools: ToolRegistry) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let settings = SessionSettings::from_config(&config, &tools);
        let sessions = Arc::new(SessionManager::new(settings, event_bus.clone()));
        let media = Arc::new(MediaStore::new(&config.media, event_bus.clone()));

        Self {
            config: Arc::new(config),
            event_bus,
            tools: Arc::new(tools),
            sessions,
            media,
            shutdown: CancellationToken::new(),
        }
    }
}
