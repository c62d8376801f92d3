pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::Sender;

pub use error::DriverError;

/// Addressable document: the top-level page or one nested frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    pub id: String,
    pub url: String,
    pub top_level: bool,
}

/// Element located inside a context. Only valid while that context lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub id: u64,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

impl ConsoleMessage {
    pub fn log(text: impl Into<String>) -> Self {
        Self {
            level: "log".into(),
            text: text.into(),
        }
    }
}

/// Browser automation surface the monitor runs against.
///
/// Any call touching a context that has been torn down must fail with
/// [`DriverError::ContextDestroyed`]; a dead browser fails every call with
/// [`DriverError::Closed`].
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn top_level(&self) -> Result<ContextHandle, DriverError>;

    /// Nested frames only; the top-level document is not included.
    async fn list_frames(&self) -> Result<Vec<ContextHandle>, DriverError>;

    async fn locate(
        &self,
        context: &ContextHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    /// Waits at most `timeout` for the element to become visible.
    async fn is_visible(
        &self,
        element: &ElementHandle,
        timeout: Duration,
    ) -> Result<bool, DriverError>;

    async fn text_content(&self, element: &ElementHandle) -> Result<Option<String>, DriverError>;

    async fn get_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Nearest ancestor (or the element itself) matching `selector`.
    async fn closest(
        &self,
        element: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, DriverError>;

    async fn evaluate(&self, context: &ContextHandle, script: &str) -> Result<Value, DriverError>;

    /// Forwards every page console line to `sink` until the sink closes.
    async fn subscribe_console(&self, sink: Sender<ConsoleMessage>) -> Result<(), DriverError>;
}
