use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::media;
use crate::routes;
use crate::state::AppState;

/// The full HTTP surface, ready to serve.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .merge(routes::users::router())
        .merge(routes::tags::router())
        .merge(routes::comments::router())
        .merge(routes::posts::router())
        .route("/media/{*path}", get(media::serve))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
