use std::time::Duration;

use adapters::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("already monitoring {0}")]
    AlreadyActive(String),

    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    /// The browser became unusable. Only closed-browser failures surface here;
    /// lost contexts are recovered inside the session.
    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),

    #[error("no initial snapshot within {0:?}")]
    StartTimeout(Duration),

    #[error("session stopped before it became ready")]
    Aborted,
}
