//! # Dialer orchestration
//!
//! The [`DialerEngine`] is the heart of the system. One engine instance
//! owns every active run and drives each of them through the same loop:
//! the coordinator fills free lines from the queue, the leg state machine
//! reacts to provider webhooks and safety timers, the first-answer
//! arbiter picks a single winner, and the bridge manager connects that
//! winner to the operator's softphone.
//!
//! The engine's behavior is split across focused modules, each extending
//! `DialerEngine` with one concern:
//!
//! - [`core`] - engine construction, webhook dispatch, run lookups
//! - [`runs`] - run lifecycle: start, pause, resume, stop, completion
//! - [`coordinator`] - line filling from the contact queue
//! - [`legs`] - per-attempt state machine and safety timers
//! - [`arbiter`] - first-answer-wins claim and sibling cancellation
//! - [`bridge`] - conference creation and softphone join
//! - [`types`] - run and leg state shared by all of the above

pub mod arbiter;
pub mod bridge;
pub mod coordinator;
pub mod core;
pub mod legs;
pub mod runs;
pub mod types;

pub use self::core::DialerEngine;
pub use types::{
    Leg, LegId, LegStatus, RunId, RunSnapshot, RunState, RunStats, RunStatus, StartRunRequest,
};
