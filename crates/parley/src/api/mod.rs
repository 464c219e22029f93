//! Network-facing streaming relay.

mod chat;
mod error;
mod routes;
mod state;

pub use chat::{ChatRequest, DONE_SENTINEL, sse_frames};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
