//! API endpoints.

mod ballots;
mod voters;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/ballots", ballots::router())
        .nest("/voters", voters::router())
}
