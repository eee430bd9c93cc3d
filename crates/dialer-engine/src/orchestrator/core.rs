//! Core dialer engine
//!
//! Owns the run registry, the provider handle, the event fanout, and the
//! webhook dispatch entry point. The per-concern behavior lives in the
//! sibling modules, each an `impl DialerEngine` block.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DialerConfig;
use crate::database::DatabaseManager;
use crate::error::{DialerError, Result};
use crate::monitoring::events::{DialerEventKind, DialerEvent, DialerEvents};
use crate::orchestrator::types::{LegId, RunId, RunSnapshot, RunState};
use crate::telephony::{
    CorrelationToken, ProviderCallId, TelephonyProvider, TokenKind, WebhookPayload,
};

/// Bridge bookkeeping awaiting the softphone leg's answer
///
/// Keyed by the softphone call's provider handle; removed on successful
/// join or when either side of the bridge ends.
#[derive(Debug, Clone)]
pub(crate) struct PendingBridge {
    pub run_id: RunId,
    pub leg_id: LegId,
    pub conference_id: crate::telephony::ConferenceId,
    pub pstn_call_id: ProviderCallId,
}

/// The multi-line power dialer engine
///
/// One instance orchestrates every active run: bounded concurrent
/// outbound dialing, first-answer-wins arbitration, operator bridging,
/// and crash-safe progress tracking.
///
/// All run state is mutated under a per-run mutex; the engine itself is
/// cheap to clone, so spawned timers and refill tasks each carry their
/// own handle.
#[derive(Clone)]
pub struct DialerEngine {
    /// Engine configuration
    pub(crate) config: DialerConfig,
    /// Outbound interface to the telephony provider
    pub(crate) provider: Arc<dyn TelephonyProvider>,
    /// Optional persistence layer; absence means in-memory-only operation
    pub(crate) db: Option<Arc<DatabaseManager>>,
    /// Active run states, single writer per run via the inner mutex
    pub(crate) runs: Arc<DashMap<RunId, Arc<Mutex<RunState>>>>,
    /// Softphone legs awaiting their conference join
    pub(crate) pending_bridges: Arc<DashMap<ProviderCallId, PendingBridge>>,
    /// Broadcast fanout toward UI observers
    pub(crate) events: DialerEvents,
}

impl DialerEngine {
    /// Create a new engine
    ///
    /// Validates the configuration and connects event fanout; no provider
    /// traffic is issued until a run starts.
    pub fn new(
        config: DialerConfig,
        provider: Arc<dyn TelephonyProvider>,
        db: Option<Arc<DatabaseManager>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let events = DialerEvents::new(config.events.channel_capacity);
        info!(
            "🚀 Dialer engine initialized (max {} lines/run, persistence: {})",
            config.dialing.absolute_max_lines,
            if db.is_some() { "enabled" } else { "disabled" }
        );
        Ok(Arc::new(Self {
            config,
            provider,
            db,
            runs: Arc::new(DashMap::new()),
            pending_bridges: Arc::new(DashMap::new()),
            events,
        }))
    }

    /// Subscribe to the live event stream
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DialerEvent> {
        self.events.subscribe()
    }

    /// Engine configuration
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// The persistence layer, if configured
    pub fn database(&self) -> Option<&Arc<DatabaseManager>> {
        self.db.as_ref()
    }

    /// Look up the shared state of an active run
    pub(crate) fn run_handle(&self, run_id: &RunId) -> Result<Arc<Mutex<RunState>>> {
        self.runs
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DialerError::not_found(format!("run {} not found", run_id)))
    }

    /// Snapshot one active run
    pub async fn snapshot(&self, run_id: &RunId) -> Result<RunSnapshot> {
        let handle = self.run_handle(run_id)?;
        let run = handle.lock().await;
        Ok(run.snapshot(self.config.events.queue_preview_len))
    }

    /// Aggregate counters for one active run
    pub async fn stats(&self, run_id: &RunId) -> Result<crate::orchestrator::types::RunStats> {
        let handle = self.run_handle(run_id)?;
        let run = handle.lock().await;
        Ok(run.stats.clone())
    }

    /// Snapshots of every active run
    pub async fn active_runs(&self) -> Vec<RunSnapshot> {
        let handles: Vec<_> = self.runs.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            let run = handle.lock().await;
            snapshots.push(run.snapshot(self.config.events.queue_preview_len));
        }
        snapshots
    }

    /// Process one provider webhook
    ///
    /// The correlation token is decoded and validated before any state is
    /// touched; a payload that does not parse is rejected, and a valid
    /// token for a run that no longer exists is a silent no-op (late
    /// webhooks against discarded runs are expected).
    pub async fn handle_webhook(&self, payload: WebhookPayload) -> Result<()> {
        let token = CorrelationToken::decode(&payload.client_state)?;
        debug!(
            "📨 Webhook {:?} for {} leg {} (call {})",
            payload.event, token.run_id, token.leg_id, payload.call_id
        );

        match token.kind {
            TokenKind::Contact => {
                if !self.runs.contains_key(&token.run_id) {
                    debug!("📭 Late webhook for discarded run {}, ignoring", token.run_id);
                    return Ok(());
                }
                self.handle_leg_event(&token.run_id, &token.leg_id, &payload)
                    .await
            }
            TokenKind::Softphone => self.handle_softphone_event(&payload).await,
        }
    }

    /// Emit one event with a snapshot taken by the caller
    pub(crate) fn emit(
        &self,
        kind: DialerEventKind,
        snapshot: RunSnapshot,
        leg_id: Option<LegId>,
    ) {
        self.events.emit(kind, snapshot, leg_id);
    }

    /// Best-effort run persistence; a write failure never fails a run
    pub(crate) async fn persist_run(&self, run: &RunState) {
        if let Some(db) = &self.db {
            if let Err(e) = db.update_run(run).await {
                warn!("⚠️ Failed to persist run {}: {}", run.id, e);
            }
        }
    }
}
