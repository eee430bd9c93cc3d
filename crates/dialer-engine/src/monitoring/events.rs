//! # Dialer Event Broadcasting
//!
//! Pushes run and leg state deltas to connected UI observers. Every
//! event carries a full [`RunSnapshot`] so a client can render the run
//! board from any single event without replaying history.
//!
//! Built on `tokio::sync::broadcast`: the engine never blocks on a slow
//! subscriber — laggards drop old events and catch up from the next
//! snapshot.
//!
//! ## Examples
//!
//! ```text
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}: run {} ({} in flight)",
//!              event.kind.as_str(),
//!              event.run_id,
//!              event.snapshot.legs.len());
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::orchestrator::types::{LegId, RunId, RunSnapshot};

/// Kind of state delta an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DialerEventKind {
    #[serde(rename = "run:started")]
    RunStarted,
    #[serde(rename = "leg:started")]
    LegStarted,
    #[serde(rename = "leg:ringing")]
    LegRinging,
    #[serde(rename = "leg:answered")]
    LegAnswered,
    #[serde(rename = "leg:hangup")]
    LegHangup,
    #[serde(rename = "run:paused")]
    RunPaused,
    #[serde(rename = "run:resumed")]
    RunResumed,
    #[serde(rename = "run:stopped")]
    RunStopped,
    #[serde(rename = "run:completed")]
    RunCompleted,
    #[serde(rename = "queue:updated")]
    QueueUpdated,
    #[serde(rename = "stats:updated")]
    StatsUpdated,
}

impl DialerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialerEventKind::RunStarted => "run:started",
            DialerEventKind::LegStarted => "leg:started",
            DialerEventKind::LegRinging => "leg:ringing",
            DialerEventKind::LegAnswered => "leg:answered",
            DialerEventKind::LegHangup => "leg:hangup",
            DialerEventKind::RunPaused => "run:paused",
            DialerEventKind::RunResumed => "run:resumed",
            DialerEventKind::RunStopped => "run:stopped",
            DialerEventKind::RunCompleted => "run:completed",
            DialerEventKind::QueueUpdated => "queue:updated",
            DialerEventKind::StatsUpdated => "stats:updated",
        }
    }
}

/// One state-change notification
#[derive(Debug, Clone, Serialize)]
pub struct DialerEvent {
    #[serde(rename = "event")]
    pub kind: DialerEventKind,
    pub run_id: RunId,
    /// Set for leg-scoped events
    pub leg_id: Option<LegId>,
    pub timestamp: DateTime<Utc>,
    pub snapshot: RunSnapshot,
}

/// Broadcast fanout for dialer events
#[derive(Clone)]
pub struct DialerEvents {
    sender: broadcast::Sender<DialerEvent>,
}

impl DialerEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the live event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.sender.subscribe()
    }

    /// Publish one event; a send with no subscribers is not an error
    pub fn emit(&self, kind: DialerEventKind, snapshot: RunSnapshot, leg_id: Option<LegId>) {
        let event = DialerEvent {
            kind,
            run_id: snapshot.run_id.clone(),
            leg_id,
            timestamp: Utc::now(),
            snapshot,
        };
        if self.sender.send(event).is_err() {
            debug!("📡 No event subscribers connected, dropping delta");
        }
    }

    /// Number of connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
