pub mod admin;
pub mod api;
pub mod auth;
pub mod user;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full application router with request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(api::router())
        .merge(admin::router())
        .merge(user::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
