// Route definitions

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::AppState;

mod api;

pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/refresh", post(api::refresh))
        .route("/view", post(api::view))
        .route("/options/:column", get(api::options))
        .route("/counts/:column", post(api::counts))
        .route("/map", post(api::map))
        .route("/export", post(api::export))
        .with_state(app_state);

    Router::new()
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
}
