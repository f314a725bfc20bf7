//! API route definitions.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::error::ApiError;
use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Protected routes (require the API token when one is configured)
    let protected_routes = Router::new()
        // Session services
        .route("/services", get(handlers::list_services))
        .route(
            "/services/{session_id}",
            get(handlers::get_service)
                .post(handlers::create_service)
                .delete(handlers::delete_service),
        )
        .route("/services/{session_id}/start", post(handlers::start_service))
        .route("/services/{session_id}/stop", post(handlers::stop_service))
        .route("/services/{session_id}/logs", get(handlers::service_logs))
        .route(
            "/services/{session_id}/deployments/logs",
            get(handlers::deployment_logs),
        )
        // Fleet
        .route("/nodes", get(handlers::list_nodes))
        .route("/orphans", get(handlers::list_orphans))
        .route("/orphans/cleanup", post(handlers::cleanup_orphans))
        // Shared editor volume
        .route("/editor-volume", get(handlers::editor_volume_status))
        .route("/editor-volume/setup", post(handlers::setup_editor_volume))
        .route("/editor-volume/update", post(handlers::update_editor_volume))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    // Public routes
    let public_routes = Router::new().route("/health", get(handlers::health));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(trace_layer)
        .with_state(state)
}

/// Reject requests without the configured bearer token.
async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => Err(ApiError::unauthorized("Invalid API token")),
        None => Err(ApiError::unauthorized("Missing or invalid authorization")),
    }
}
