pub mod health;
pub mod videos;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /videos/detect                 upload and annotate a video (POST)
/// /videos/processed/{name}       download a processed video (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/videos", videos::router())
}
