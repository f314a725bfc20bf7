//! HTTP API module.
//!
//! REST endpoints the platform uses to provision session services, inspect
//! the fleet, and trigger maintenance.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
