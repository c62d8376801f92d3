use tracing::{Level, Span, field};

use super::TraceId;

/// Root span for one monitoring session. `phase` is recorded as the
/// session moves through its state machine.
pub fn session_span(site: &str, target: &str, trace_id: &TraceId) -> Span {
    tracing::span!(
        Level::INFO,
        "session",
        trace_id = %trace_id.as_str(),
        site = %site,
        auction = %target,
        phase = field::Empty
    )
}

/// Create a child span (inherits trace_id automatically)
pub fn child_span(name: &'static str) -> Span {
    tracing::span!(Level::INFO, "child", step = %name)
}
