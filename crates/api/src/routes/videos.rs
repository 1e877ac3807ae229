//! Route definitions for video detection and processed-video retrieval.
//!
//! Mounted at `/videos`.
//!
//! ```text
//! POST /detect                 detect_objects
//! GET  /processed/{name}       get_processed_video
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::videos;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/detect", post(videos::detect_objects))
        .route("/processed/{name}", get(videos::get_processed_video))
}
