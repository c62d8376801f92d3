use std::time::Duration;

use adapters::{BrowserDriver, ContextHandle, DriverError};
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, warn};

use crate::sites::SiteProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nested frame whose address matched the profile.
    Found(ContextHandle),
    /// The profile keeps its auction UI in the top-level document.
    TopLevel(ContextHandle),
    /// No frame showed up within the budget. Extraction runs degraded
    /// against the top-level document.
    NotFound(ContextHandle),
}

impl Resolution {
    pub fn context(&self) -> &ContextHandle {
        match self {
            Resolution::Found(ctx) | Resolution::TopLevel(ctx) | Resolution::NotFound(ctx) => ctx,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Resolution::NotFound(_))
    }
}

/// One enumeration pass. `Ok(None)` when no frame matches yet.
///
/// Patterns are tried in priority order, so a specific pattern beats a broad
/// one even when the broad match is listed first.
pub async fn try_resolve_once<D: BrowserDriver + ?Sized>(
    driver: &D,
    profile: &SiteProfile,
) -> Result<Option<ContextHandle>, DriverError> {
    let frames = driver.list_frames().await?;

    Ok(frames
        .into_iter()
        .filter_map(|f| profile.frame_priority(&f.url).map(|rank| (rank, f)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, f)| f))
}

/// Finds the rendering context holding the auction UI.
///
/// Re-enumerates frames every `poll` until `timeout` elapses. Only a closed
/// browser is an error; transient enumeration failures keep polling. Safe to
/// call repeatedly.
#[instrument(skip_all, fields(site = %profile.kind))]
pub async fn resolve<D: BrowserDriver + ?Sized>(
    driver: &D,
    profile: &SiteProfile,
    timeout: Duration,
    poll: Duration,
) -> Result<Resolution, DriverError> {
    if !profile.uses_frame() {
        return Ok(Resolution::TopLevel(driver.top_level().await?));
    }

    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match try_resolve_once(driver, profile).await {
            Ok(Some(ctx)) => {
                debug!(frame = %ctx.url, attempts, "auction frame resolved");
                return Ok(Resolution::Found(ctx));
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!(error = %e, "frame enumeration failed, retrying"),
        }

        if Instant::now() + poll > deadline {
            break;
        }
        sleep(poll).await;
    }

    warn!(
        attempts,
        timeout_ms = timeout.as_millis() as u64,
        "auction frame not found, falling back to top-level document"
    );
    Ok(Resolution::NotFound(driver.top_level().await?))
}
