//! Core types for dialer orchestration
//!
//! Run and leg state shared by the coordinator, the leg state machine,
//! the arbiter, and the bridge manager. `RunState` is the in-memory,
//! single-writer representation of one dialing session; `RunSnapshot` is
//! its serializable projection carried by every broadcast event.

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::callerid::CallerIdStrategy;
use crate::queue::{Contact, DialQueue};
use crate::telephony::{AmdVerdict, HangupCause, ProviderCallId};

/// Identifier of one dialing run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one outbound call attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegId(pub String);

impl LegId {
    pub fn new() -> Self {
        Self(format!("leg-{}", Uuid::new_v4()))
    }
}

impl Default for LegId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
        }
    }
}

/// State machine status of one leg
///
/// `dialing → ringing → {amd_check} → answered | terminal`. Terminal
/// dispositions are entered exactly once; events arriving afterwards are
/// silent no-ops. `answered` is only ever set by the First-Answer
/// Arbiter, never directly from a raw answered webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    /// Provider accepted the outbound request
    Dialing,
    /// Far end is ringing
    Ringing,
    /// Connected with an unresolved AMD verdict
    AmdCheck,
    /// Human-answered; the winning leg of its run
    Answered,
    /// Ring timeout elapsed or provider reported no answer
    NoAnswer,
    /// AMD-unknown timeout elapsed without resolution
    Voicemail,
    /// AMD verdict was machine or fax
    Machine,
    /// Far end was busy
    Busy,
    /// Call initiation or the call itself failed
    Failed,
    /// Lost first-answer arbitration to a sibling leg
    CanceledOtherAnswer,
}

impl LegStatus {
    /// True while the leg occupies a line without being answered
    ///
    /// These are the states counted against `max_lines` and the states
    /// the arbiter cancels when another leg wins.
    pub fn is_dialing_phase(&self) -> bool {
        matches!(self, LegStatus::Dialing | LegStatus::Ringing | LegStatus::AmdCheck)
    }

    /// True for final dispositions other than a live answered call
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LegStatus::NoAnswer
                | LegStatus::Voicemail
                | LegStatus::Machine
                | LegStatus::Busy
                | LegStatus::Failed
                | LegStatus::CanceledOtherAnswer
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Dialing => "dialing",
            LegStatus::Ringing => "ringing",
            LegStatus::AmdCheck => "amd_check",
            LegStatus::Answered => "answered",
            LegStatus::NoAnswer => "no_answer",
            LegStatus::Voicemail => "voicemail",
            LegStatus::Machine => "machine",
            LegStatus::Busy => "busy",
            LegStatus::Failed => "failed",
            LegStatus::CanceledOtherAnswer => "canceled_other_answer",
        }
    }
}

/// One concrete outbound call attempt
#[derive(Debug, Clone, Serialize)]
pub struct Leg {
    pub id: LegId,
    pub run_id: RunId,
    pub contact: Contact,
    /// Concurrency slot, unique among the run's in-flight legs
    pub line: u8,
    pub from_number: String,
    pub to_number: String,
    pub status: LegStatus,
    pub amd_verdict: Option<AmdVerdict>,
    pub hangup_cause: Option<HangupCause>,
    /// Assigned asynchronously once the provider accepts the request
    pub provider_call_id: Option<ProviderCallId>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Milliseconds from dial start to answer or termination
    pub ring_ms: Option<u64>,
}

impl Leg {
    /// Talk time in whole seconds, zero unless the leg was answered
    pub fn talk_seconds(&self) -> u64 {
        match (self.answered_at, self.ended_at) {
            (Some(answered), Some(ended)) => {
                ended.signed_duration_since(answered).num_seconds().max(0) as u64
            }
            _ => 0,
        }
    }
}

/// Aggregate counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub attempted: u64,
    pub answered: u64,
    pub no_answer: u64,
    pub voicemail: u64,
    pub busy: u64,
    pub failed: u64,
    pub canceled: u64,
    pub total_talk_seconds: u64,
    pub avg_ring_ms: u64,
}

/// Request to start a new run
///
/// `contacts` and `number_pool` are optional overrides; when absent they
/// are loaded from the persistent store at run start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRunRequest {
    pub list_id: String,
    pub list_name: String,
    /// Requested concurrent lines; clamped to the configured ceiling
    pub max_lines: Option<u8>,
    pub strategy: Option<CallerIdStrategy>,
    pub script_id: Option<String>,
    #[serde(default)]
    pub contacts: Option<Vec<Contact>>,
    #[serde(default)]
    pub number_pool: Option<Vec<String>>,
}

/// In-memory state of one dialing session
///
/// Mutated only under the run's mutex; the single-writer discipline is
/// what makes the arbiter's claim-then-cancel ordering atomic.
pub struct RunState {
    pub id: RunId,
    pub list_id: String,
    pub list_name: String,
    pub max_lines: u8,
    pub strategy: CallerIdStrategy,
    pub number_pool: Vec<String>,
    pub script_id: Option<String>,
    pub status: RunStatus,
    /// Index into the original list of the next contact to pull
    pub current_index: usize,
    /// Running attempt counter feeding caller-ID selection
    pub attempt_count: u64,
    pub queue: DialQueue,
    /// In-flight legs, keyed by leg id
    pub legs: HashMap<LegId, Leg>,
    /// Just-completed legs, kept briefly for UI display then pruned
    pub completed: Vec<Leg>,
    /// Provider handle to leg mapping; each entry removed exactly once
    pub call_map: HashMap<ProviderCallId, LegId>,
    pub stats: RunStats,
    ring_ms_total: u64,
    ring_samples: u64,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(
        id: RunId,
        list_id: String,
        list_name: String,
        max_lines: u8,
        strategy: CallerIdStrategy,
        number_pool: Vec<String>,
        script_id: Option<String>,
        queue: DialQueue,
    ) -> Self {
        Self {
            id,
            list_id,
            list_name,
            max_lines,
            strategy,
            number_pool,
            script_id,
            status: RunStatus::Running,
            current_index: 0,
            attempt_count: 0,
            queue,
            legs: HashMap::new(),
            completed: Vec::new(),
            call_map: HashMap::new(),
            stats: RunStats::default(),
            ring_ms_total: 0,
            ring_samples: 0,
            started_at: Utc::now(),
            paused_at: None,
            completed_at: None,
        }
    }

    /// Number of legs currently occupying lines in the dialing phase
    pub fn dialing_leg_count(&self) -> usize {
        self.legs.values().filter(|l| l.status.is_dialing_phase()).count()
    }

    /// The winning leg, if one has been claimed
    pub fn answered_leg(&self) -> Option<&Leg> {
        self.legs.values().find(|l| l.status == LegStatus::Answered)
    }

    /// Lowest unused line number in `1..=max_lines`
    pub fn free_line(&self) -> Option<u8> {
        (1..=self.max_lines).find(|n| !self.legs.values().any(|l| l.line == *n))
    }

    /// Fold one leg's ring duration into the running average
    pub fn record_ring_sample(&mut self, ring_ms: u64) {
        self.ring_ms_total += ring_ms;
        self.ring_samples += 1;
        self.stats.avg_ring_ms = self.ring_ms_total / self.ring_samples;
    }

    /// Serializable projection for events and the query API
    pub fn snapshot(&self, preview_len: usize) -> RunSnapshot {
        let mut legs: Vec<Leg> = self.legs.values().cloned().collect();
        legs.sort_by_key(|l| l.line);
        RunSnapshot {
            run_id: self.id.clone(),
            list_id: self.list_id.clone(),
            list_name: self.list_name.clone(),
            status: self.status,
            max_lines: self.max_lines,
            current_index: self.current_index,
            queue_len: self.queue.len(),
            queue_preview: self.queue.preview(preview_len),
            legs,
            recently_completed: self.completed.clone(),
            stats: self.stats.clone(),
            started_at: self.started_at,
            paused_at: self.paused_at,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time view of one run, carried by every broadcast event
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub list_id: String,
    pub list_name: String,
    pub status: RunStatus,
    pub max_lines: u8,
    pub current_index: usize,
    pub queue_len: usize,
    /// Truncated head of the queue, for UI display
    pub queue_preview: Vec<Contact>,
    /// All in-flight legs, ordered by line number
    pub legs: Vec<Leg>,
    pub recently_completed: Vec<Leg>,
    pub stats: RunStats,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
