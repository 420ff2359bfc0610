//! Session lifecycle management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Permission checks and capture/recognition startup
//! - The service state machine every surface observes
//! - Live transcript fan-out to callbacks and pollers
//! - Stop, quiescence, and transcript persistence

mod controller;
mod state;
mod stats;

pub use controller::{
    ControllerConfig, SessionCallbacks, SessionController, SessionDeps,
};
pub use state::SessionState;
pub use stats::SessionStats;
