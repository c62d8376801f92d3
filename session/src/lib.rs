pub mod error;
pub mod manager;
pub mod model;
mod runner;

pub use error::SessionError;
pub use manager::SessionManager;
pub use model::{MonitoringSession, SessionId, SessionPhase};
