//! Telephony provider abstraction
//!
//! The dialer never speaks to the PSTN directly; it issues requests to an
//! external provider (create call, hangup, conference operations) and
//! reacts to the provider's webhook events. This module defines that seam
//! as the [`TelephonyProvider`] trait plus the request, handle, and event
//! types that cross it.
//!
//! Every outbound call request carries an opaque client-state blob the
//! provider round-trips unchanged on each webhook. The engine serializes
//! a typed [`CorrelationToken`] into that blob and validates it on
//! receipt before any state lookup, so a late or malformed webhook can
//! never be misrouted into the wrong run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DialerError, Result};
use crate::orchestrator::types::{LegId, RunId};

/// Provider-assigned handle for one call
///
/// Assigned asynchronously once the provider accepts the outbound
/// request. Never reused across legs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderCallId(pub String);

impl std::fmt::Display for ProviderCallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-side conference identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConferenceId(pub String);

impl std::fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ConferenceId {
    pub fn new() -> Self {
        Self(format!("conf-{}", Uuid::new_v4()))
    }
}

impl Default for ConferenceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which kind of call a correlation token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// A dialer leg toward a contact
    Contact,
    /// The operator softphone leg of an audio bridge
    Softphone,
}

/// Typed correlation token round-tripped through the provider
///
/// Serialized to JSON as the client-state parameter of every outbound
/// call request; parsed and validated on each webhook before the engine
/// touches any run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationToken {
    pub run_id: RunId,
    pub leg_id: LegId,
    pub kind: TokenKind,
}

impl CorrelationToken {
    pub fn contact(run_id: RunId, leg_id: LegId) -> Self {
        Self { run_id, leg_id, kind: TokenKind::Contact }
    }

    pub fn softphone(run_id: RunId, leg_id: LegId) -> Self {
        Self { run_id, leg_id, kind: TokenKind::Softphone }
    }

    /// Serialize to the opaque client-state string
    pub fn encode(&self) -> String {
        // A struct of three plain fields cannot fail to serialize.
        serde_json::to_string(self).expect("correlation token serializes")
    }

    /// Parse and validate a client-state string received on a webhook
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            DialerError::invalid_input(format!("malformed correlation token: {}", e))
        })
    }
}

/// Answering-machine-detection verdict from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmdVerdict {
    Human,
    Machine,
    Fax,
    Unknown,
}

/// Hangup cause reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupCause {
    Busy,
    NoAnswer,
    Canceled,
    Rejected,
    Normal,
    Error,
}

/// One webhook event from the provider
///
/// Delivery is assumed at-least-once; every handler in the engine guards
/// against terminal-state legs, so duplicates are silent no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// The far end is ringing
    Ringing,
    /// AMD verdict for a connected call
    AmdResult { verdict: AmdVerdict },
    /// The call was answered
    Answered,
    /// The call ended
    Hangup { cause: HangupCause },
    /// A call was joined into a conference
    ConferenceJoined,
}

/// Full webhook payload as posted by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Provider handle of the call the event concerns
    pub call_id: ProviderCallId,
    /// Opaque client-state blob, round-tripped unchanged
    pub client_state: String,
    /// The event itself
    pub event: ProviderEvent,
}

/// Request to place one outbound call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCallRequest {
    /// Destination number or endpoint address
    pub to: String,
    /// Presented caller-ID
    pub from: String,
    /// Whether the provider should run answering-machine detection
    pub amd_enabled: bool,
    /// Provider-enforced hard duration cap in seconds
    pub time_limit_secs: u64,
    /// Webhook target for this call's events
    pub webhook_url: String,
    /// Opaque client-state blob to round-trip on every webhook
    pub client_state: String,
}

/// Options for creating a provider-side conference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceOptions {
    /// Play entry beeps to participants
    pub entry_beep: bool,
}

/// Outbound interface to the telephony provider
///
/// All operations are request/response; call progress arrives separately
/// as webhook events. Failures are local and final — the engine never
/// retries a provider request.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Issue one outbound call request
    async fn create_call(&self, request: CreateCallRequest) -> Result<ProviderCallId>;

    /// Request hangup of a call
    ///
    /// Advisory: the request may race a simultaneous answer. State
    /// correctness comes from the engine's terminal-state guards, not
    /// from this request succeeding.
    async fn hangup_call(&self, call_id: &ProviderCallId) -> Result<()>;

    /// Create a conference seeded with an existing call
    async fn create_conference(
        &self,
        seed_call: &ProviderCallId,
        options: ConferenceOptions,
    ) -> Result<ConferenceId>;

    /// Join a call into an existing conference
    async fn join_conference(
        &self,
        call_id: &ProviderCallId,
        conference_id: &ConferenceId,
    ) -> Result<()>;
}
