use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use adapters::ContextHandle;
use chrono::{DateTime, Utc};
use monitor::SiteKind;
use parking_lot::RwLock;

pub type SessionId = uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Starting,
    Resolving,
    Observing,
    Recovering,
    Stopped,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Starting => "Starting",
            SessionPhase::Resolving => "Resolving",
            SessionPhase::Observing => "Observing",
            SessionPhase::Recovering => "Recovering",
            SessionPhase::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Starting" => Ok(SessionPhase::Starting),
            "Resolving" => Ok(SessionPhase::Resolving),
            "Observing" => Ok(SessionPhase::Observing),
            "Recovering" => Ok(SessionPhase::Recovering),
            "Stopped" => Ok(SessionPhase::Stopped),
            other => Err(anyhow::anyhow!("Invalid SessionPhase value: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitoringSession {
    pub id: SessionId,

    // Identity
    pub target: String,
    pub site: SiteKind,
    pub auction_id: String,

    // Lifecycle
    pub is_active: bool,
    pub phase: SessionPhase,
    pub started_at: DateTime<Utc>,

    // Context; re-resolved on loss, never owned
    pub resolved_context: Option<ContextHandle>,
    /// Extraction runs against the top-level document because the auction
    /// frame has not shown up yet.
    pub degraded: bool,

    // Progress
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub recoveries: u64,
    pub last_error: Option<String>,
}

impl MonitoringSession {
    pub fn new(target: String, site: SiteKind, auction_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            target,
            site,
            auction_id,
            is_active: true,
            phase: SessionPhase::Starting,
            started_at: Utc::now(),
            resolved_context: None,
            degraded: false,
            last_reconciled_at: None,
            recoveries: 0,
            last_error: None,
        }
    }
}

/// Session state shared between the manager and the running task.
pub type SharedSession = Arc<RwLock<MonitoringSession>>;
