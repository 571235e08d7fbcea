//! Ambient support: tracing setup and the application error type

pub mod error;
pub mod logging;

pub use error::{AppError, AppResult, ErrorCode, ErrorContext};
pub use logging::init_logging;
