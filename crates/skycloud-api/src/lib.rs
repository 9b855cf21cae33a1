//! Skycloud API Library
//!
//! HTTP handlers, application state and startup wiring for the upload engine.

pub mod error;
pub mod handlers;
pub mod password;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
