//! HTTP control surface for the transcription service
//!
//! This module provides a small REST API over the session controller:
//! - POST /session/start - Start listening
//! - POST /session/stop - Stop and persist the transcript
//! - POST /session/retry - Clear an error state
//! - GET /session - State snapshot and stats
//! - GET /session/transcript - Current visible transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
