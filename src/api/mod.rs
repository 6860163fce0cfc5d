//! REST API
//!
//! Every long-running operation answers immediately with a task id; clients
//! poll `/api/tasks/{id}` for progress.

pub mod error;
pub mod health;
pub mod library;
pub mod tasks;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub use error::{ApiError, ApiResult};

/// Full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", tasks::router().merge(library::router()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
