//! Axum Router Configuration

use crate::{
    handlers,
    models::{ErrorResponse, SignedUrlRequest, SignedUrlResponse},
    state::AppState,
};

use axum::{Router, routing::post};
use convai_realtime::signed_url::PROXY_ROUTE;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::issue_signed_url),
    components(schemas(SignedUrlRequest, SignedUrlResponse, ErrorResponse)),
    tags(
        (name = "Facetalk API", description = "Server-side signed URL issuance for voice-AI conversations")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(PROXY_ROUTE, post(handlers::issue_signed_url))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
