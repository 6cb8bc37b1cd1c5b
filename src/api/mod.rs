//! REST API layer: route handlers, DTOs, OpenAPI document, and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root.

pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document covering every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "task-relay",
        description = "Real-time fan-out of task and project status events"
    ),
    paths(
        handlers::system::health_handler,
        handlers::publish::send_personal,
        handlers::publish::broadcast,
        handlers::publish::publish_to_topic,
        handlers::connections::list_connections,
        handlers::connections::get_connection,
        handlers::connections::disconnect,
        handlers::connections::topic_subscribers,
        handlers::connections::stats,
    ),
    tags(
        (name = "System", description = "Health"),
        (name = "Publish", description = "Producer-facing publish endpoints"),
        (name = "Connections", description = "Connection and subscription inspection"),
    )
)]
pub struct ApiDoc;

/// Upper bound on a REST request. Not applied to `/ws`, whose upgraded
/// socket outlives the request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest(
            "/api/v1",
            handlers::routes().layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

/// Builds the full application: REST API, `/ws` endpoint, and HTTP layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
