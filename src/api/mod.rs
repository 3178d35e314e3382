/// API routes and handlers
pub mod health;
pub mod middleware;
pub mod pins;
pub mod storage;
pub mod upload;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(pins::routes())
        .merge(storage::routes())
        .merge(upload::routes())
}
