//! Real-time monitoring and event broadcasting

pub mod events;

pub use events::{DialerEvent, DialerEventKind, DialerEvents};
