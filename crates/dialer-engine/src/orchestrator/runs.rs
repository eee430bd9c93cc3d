//! Run lifecycle management
//!
//! Start, pause, resume, stop, and automatic completion. A run moves
//! `running ⇄ paused → completed` and never leaves `completed`; the
//! completed state is retained in memory for a short grace window to
//! absorb straggling webhooks, then discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{DialerError, Result};
use crate::monitoring::events::DialerEventKind;
use crate::orchestrator::core::DialerEngine;
use crate::orchestrator::types::{RunId, RunState, RunStatus, StartRunRequest};
use crate::queue::DialQueue;

impl DialerEngine {
    /// Start a new dialing run against a contact list
    ///
    /// Rejects the request if another run for the same list is still
    /// active. Contacts and the outbound number pool come from the
    /// request when supplied, otherwise from the persistent store. The
    /// effective line count is the requested value clamped to the
    /// configured ceiling; a pool smaller than the line count simply
    /// presents the same caller-ID on several concurrent legs.
    pub async fn start_run(&self, request: StartRunRequest) -> Result<RunId> {
        if request.list_id.is_empty() {
            return Err(DialerError::invalid_input("list_id must not be empty"));
        }
        let handles: Vec<_> = self.runs.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            let run = handle.lock().await;
            if run.list_id == request.list_id && run.status != RunStatus::Completed {
                return Err(DialerError::run(format!(
                    "list {} already has an active run ({})",
                    request.list_id, run.id
                )));
            }
        }

        let contacts = match request.contacts {
            Some(contacts) => contacts,
            None => match &self.db {
                Some(db) => db.load_pending_contacts(&request.list_id).await?,
                None => Vec::new(),
            },
        };
        let queue = DialQueue::from_contacts(contacts);
        if queue.is_empty() {
            return Err(DialerError::run(format!(
                "list {} has no dialable contacts",
                request.list_id
            )));
        }

        let number_pool = match request.number_pool {
            Some(pool) => pool,
            None => match &self.db {
                Some(db) => db.load_number_pool().await?,
                None => Vec::new(),
            },
        };
        if number_pool.is_empty() {
            return Err(DialerError::configuration(
                "no outbound numbers available for caller-ID",
            ));
        }

        let requested = request
            .max_lines
            .unwrap_or(self.config.dialing.default_max_lines);
        let max_lines = requested.clamp(1, self.config.dialing.absolute_max_lines);

        let run_id = RunId::new();
        let strategy = request
            .strategy
            .unwrap_or(self.config.dialing.default_strategy);
        let run = RunState::new(
            run_id.clone(),
            request.list_id,
            request.list_name,
            max_lines,
            strategy,
            number_pool,
            request.script_id,
            queue,
        );

        info!(
            "📞 Starting run {} on list '{}': {} contacts, {} lines, {:?} caller-ID",
            run_id,
            run.list_name,
            run.queue.len(),
            max_lines,
            strategy
        );

        if let Some(db) = &self.db {
            if let Err(e) = db.create_run(&run).await {
                warn!("⚠️ Failed to persist new run {}: {}", run_id, e);
            }
        }

        let snapshot = run.snapshot(self.config.events.queue_preview_len);
        self.runs
            .insert(run_id.clone(), Arc::new(tokio::sync::Mutex::new(run)));
        self.emit(DialerEventKind::RunStarted, snapshot, None);

        self.fill_lines(&run_id).await?;
        Ok(run_id)
    }

    /// Pause a run: stop filling new lines, leave in-flight legs alone
    pub async fn pause_run(&self, run_id: &RunId) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let snapshot = {
            let mut run = handle.lock().await;
            if run.status != RunStatus::Running {
                return Err(DialerError::run(format!(
                    "run {} is {}, cannot pause",
                    run_id,
                    run.status.as_str()
                )));
            }
            run.status = RunStatus::Paused;
            run.paused_at = Some(Utc::now());
            info!("⏸️ Paused run {} ({} legs still in flight)", run_id, run.legs.len());
            self.persist_run(&run).await;
            run.snapshot(self.config.events.queue_preview_len)
        };
        self.emit(DialerEventKind::RunPaused, snapshot, None);
        Ok(())
    }

    /// Resume a paused run and refill its lines
    pub async fn resume_run(&self, run_id: &RunId) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let snapshot = {
            let mut run = handle.lock().await;
            if run.status != RunStatus::Paused {
                return Err(DialerError::run(format!(
                    "run {} is {}, cannot resume",
                    run_id,
                    run.status.as_str()
                )));
            }
            run.status = RunStatus::Running;
            run.paused_at = None;
            info!("▶️ Resumed run {}", run_id);
            self.persist_run(&run).await;
            run.snapshot(self.config.events.queue_preview_len)
        };
        self.emit(DialerEventKind::RunResumed, snapshot, None);
        self.fill_lines(run_id).await
    }

    /// Stop a run: hang up every unanswered in-flight leg, then pause
    ///
    /// An answered call is never forcibly dropped; hangups are advisory
    /// and the affected legs finalize through their normal webhook path.
    pub async fn stop_run(&self, run_id: &RunId) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let (to_hangup, snapshot) = {
            let mut run = handle.lock().await;
            if run.status == RunStatus::Completed {
                return Err(DialerError::run(format!("run {} already completed", run_id)));
            }
            run.status = RunStatus::Paused;
            run.paused_at = Some(Utc::now());
            let to_hangup: Vec<_> = run
                .legs
                .values()
                .filter(|l| l.status.is_dialing_phase())
                .filter_map(|l| l.provider_call_id.clone())
                .collect();
            info!("🛑 Stopping run {}: hanging up {} unanswered legs", run_id, to_hangup.len());
            self.persist_run(&run).await;
            (to_hangup, run.snapshot(self.config.events.queue_preview_len))
        };

        for call_id in to_hangup {
            if let Err(e) = self.provider.hangup_call(&call_id).await {
                debug!("📵 Hangup request for {} failed (advisory): {}", call_id, e);
            }
        }
        self.emit(DialerEventKind::RunStopped, snapshot, None);
        Ok(())
    }

    /// Completion check, called under the run lock after every finalize
    ///
    /// Returns true exactly once per run, on the transition into
    /// `completed`. The caller handles post-lock follow-ups.
    pub(crate) fn try_complete_locked(&self, run: &mut RunState) -> bool {
        if run.status != RunStatus::Running {
            return false;
        }
        if !run.queue.is_empty() || !run.legs.is_empty() {
            return false;
        }
        run.status = RunStatus::Completed;
        run.completed_at = Some(Utc::now());
        info!(
            "🏁 Run {} completed: {} attempted, {} answered, {} no-answer, {} voicemail",
            run.id, run.stats.attempted, run.stats.answered, run.stats.no_answer, run.stats.voicemail
        );
        true
    }

    /// Retain a completed run briefly for late webhooks, then discard it
    pub(crate) fn schedule_run_teardown(&self, run_id: RunId) {
        let engine = self.clone();
        let grace = Duration::from_secs(self.config.timers.completion_grace_secs);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            engine.runs.remove(&run_id);
            debug!("🗑️ Discarded completed run {} after grace window", run_id);
        });
    }
}
