//! # Multi-Line Power Dialer Engine
//!
//! Server-side orchestration for outbound power dialing: place several
//! concurrent calls against a contact list over a small fixed pool of
//! lines, connect the operator to whichever call a human answers first,
//! and discard the rest.
//!
//! ## Overview
//!
//! One [`DialerEngine`](orchestrator::DialerEngine) instance drives any
//! number of independent runs through the same loop:
//!
//! 1. **Run Coordinator** fills free lines from a FIFO contact queue,
//!    bounded by the run's `max_lines`.
//! 2. **Call Leg Initiator** issues the outbound request to the
//!    telephony provider with answering-machine detection enabled, a
//!    hard duration cap, and a typed correlation token, then arms the
//!    ring and AMD-unknown safety timers.
//! 3. **Leg State Machine** reacts to provider webhooks (ringing, AMD
//!    verdict, answer, hangup) and timer firings; every late or
//!    duplicate event against a terminal leg is a silent no-op.
//! 4. **First-Answer Arbiter** claims exactly one winner per run and
//!    cancels every sibling still in the dialing phase, atomically under
//!    the run's lock.
//! 5. **Conference Bridge Manager** seeds a provider-side conference
//!    with the winning call and dials the operator's softphone into it.
//! 6. **Run Lifecycle Manager** starts, pauses, resumes, and stops runs,
//!    and completes a run exactly once when its queue and in-flight set
//!    are both empty.
//!
//! Progress is persisted through [`database::DatabaseManager`] and every
//! state change is broadcast to UI observers as a typed event carrying a
//! full run snapshot.
//!
//! ## Quick Start
//!
//! ```text
//! use dialer_engine::prelude::*;
//!
//! let config = DialerConfig::default();
//! let engine = DialerEngine::new(config, provider, None)?;
//!
//! let run_id = engine.start_run(StartRunRequest {
//!     list_id: "list-42".into(),
//!     list_name: "Tuesday follow-ups".into(),
//!     max_lines: Some(3),
//!     ..Default::default()
//! }).await?;
//!
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{} on run {}", event.kind.as_str(), event.run_id);
//! }
//! ```
//!
//! ## Safety posture
//!
//! The engine never retries a failed call initiation or hangup request.
//! Unsupervised auto-redial is a cost and compliance risk; failures are
//! surfaced through run counters and logs instead.

pub mod api;
pub mod callerid;
pub mod config;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod orchestrator;
pub mod queue;
pub mod server;
pub mod telephony;

pub use config::DialerConfig;
pub use error::{DialerError, Result};
pub use orchestrator::{
    DialerEngine, Leg, LegId, LegStatus, RunId, RunSnapshot, RunState, RunStats, RunStatus,
    StartRunRequest,
};
pub use server::{DialerServer, DialerServerBuilder};

/// Common imports for working with the dialer
pub mod prelude {
    pub use crate::callerid::CallerIdStrategy;
    pub use crate::config::DialerConfig;
    pub use crate::database::DatabaseManager;
    pub use crate::error::{DialerError, Result};
    pub use crate::monitoring::events::{DialerEvent, DialerEventKind};
    pub use crate::orchestrator::{
        DialerEngine, Leg, LegId, LegStatus, RunId, RunSnapshot, RunStats, RunStatus,
        StartRunRequest,
    };
    pub use crate::queue::{Contact, DialQueue};
    pub use crate::server::{DialerServer, DialerServerBuilder};
    pub use crate::telephony::{
        AmdVerdict, CorrelationToken, HangupCause, ProviderCallId, ProviderEvent,
        TelephonyProvider, WebhookPayload,
    };
}
