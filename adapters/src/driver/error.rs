use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The addressed rendering context no longer exists (frame detached,
    /// document replaced by navigation).
    #[error("context destroyed: {0}")]
    ContextDestroyed(String),

    #[error("driver call timed out after {0:?}")]
    Timeout(Duration),

    /// The browser or page itself is gone. Nothing can recover from this.
    #[error("browser closed")]
    Closed,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Closed)
    }

    pub fn is_context_lost(&self) -> bool {
        matches!(self, DriverError::ContextDestroyed(_))
    }

    /// Errors that abort a whole extraction or install pass rather than a
    /// single probe.
    pub fn interrupts_cycle(&self) -> bool {
        self.is_fatal() || self.is_context_lost()
    }
}
