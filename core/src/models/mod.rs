pub mod events;
pub mod fields;
pub mod snapshot;

pub use events::{ChangeEvent, FieldUpdate, MonitorUpdate, Origin};
pub use fields::{
    AuxiliaryMarker, FieldKey, FieldSpec, NOT_AVAILABLE, PostProcess, SelectorRule,
    leading_integer,
};
pub use snapshot::{AuctionSnapshot, AuctionStatus, UNKNOWN_AUCTION_ID};
