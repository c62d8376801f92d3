pub mod driver;
pub mod instrumentation;

pub use driver::{BrowserDriver, ConsoleMessage, ContextHandle, DriverError, ElementHandle};
