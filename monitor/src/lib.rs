pub mod broadcaster;
pub mod config;
pub mod counters;
pub mod extractor;
pub mod injector;
pub mod resolver;
pub mod sites;
pub mod state;

pub use broadcaster::{Broadcaster, SubscriberId};
pub use config::MonitorConfig;
pub use counters::MonitorCounters;
pub use sites::{SiteKind, SiteProfile};
pub use state::SnapshotStore;
