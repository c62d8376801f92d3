pub mod parser;
pub mod script;

pub use parser::{InstrumentationMessage, parse_console_line};
pub use script::{CHANGE_TAG, NOTICE_TAG, ObserverPlan, cleanup_script, observer_script};
