//! Axum router construction.
//!
//! Builds the full application router with all route groups, middleware
//! layers, and static file serving.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::sessions::start_session,
        routes::sessions::list_sessions,
        routes::sessions::current_session,
        routes::sessions::stop_current,
        routes::sessions::get_session,
        routes::sessions::stop_session,
        routes::sessions::session_log,
        routes::sessions::session_log_stream,
        routes::media::list_media,
        routes::media::upload_media,
        routes::media::delete_media,
        routes::events::events_handler,
        routes::admin::tools,
        routes::admin::sweep,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::sessions::StartSessionRequest,
        routes::sessions::SessionDetail,
        routes::sessions::StopResponse,
        routes::admin::SweepResponse,
        crate::session::SessionSnapshot,
        crate::media::MediaFile,
        lc_core::LogLine,
        lc_core::SessionStatus,
        lc_av::ToolInfo,
    ))
)]
struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = ctx.config.server.max_upload_bytes();

    let api = Router::new()
        // Sessions
        .route(
            "/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::start_session),
        )
        .route("/sessions/current", get(routes::sessions::current_session))
        .route("/sessions/stop", post(routes::sessions::stop_current))
        .route("/sessions/{id}", get(routes::sessions::get_session))
        .route("/sessions/{id}/stop", post(routes::sessions::stop_session))
        .route("/sessions/{id}/log", get(routes::sessions::session_log))
        .route(
            "/sessions/{id}/log/stream",
            get(routes::sessions::session_log_stream),
        )
        // Media
        .route(
            "/media",
            get(routes::media::list_media)
                .post(routes::media::upload_media)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/media/{name}", delete(routes::media::delete_media))
        // SSE Events
        .route("/events", get(routes::events::events_handler))
        // Admin
        .route("/admin/tools", get(routes::admin::tools))
        .route("/admin/sweep", post(routes::admin::sweep));

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // Static file serving for the control page.
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                tower_http::services::ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(tower_http::services::ServeFile::new(index_path)),
            );
        }
    }

    app
}
