//! Run coordinator: fills free lines from the contact queue
//!
//! Invoked at run start, on resume, and whenever a leg finalizes. The
//! whole admission decision happens under the run lock; provider I/O for
//! the newly created legs happens after it is dropped.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use tracing::{debug, info};

use crate::callerid::select_caller_id;
use crate::error::{DialerError, Result};
use crate::monitoring::events::DialerEventKind;
use crate::orchestrator::core::DialerEngine;
use crate::orchestrator::types::{Leg, LegId, LegStatus, RunId, RunStatus};

impl DialerEngine {
    /// Fill free lines with the next queued contacts
    ///
    /// Reentrant and idempotent: calling it while paused, with a winner
    /// already claimed, with zero free slots, or with an empty queue is a
    /// no-op. Pops contacts in strict FIFO order and assigns each the
    /// lowest unused line number.
    ///
    /// This is also where a run whose last in-flight legs resolved while
    /// it was paused completes: leg finalization only checks completion
    /// on a running run, so the coordinator pass after resume has to.
    ///
    /// Returns a boxed future: the refill path re-enters leg initiation
    /// and finalization, and type-erasing this edge keeps that call
    /// cycle finitely sized.
    pub(crate) fn fill_lines<'a>(
        &'a self,
        run_id: &'a RunId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let handle = self.run_handle(run_id)?;
            let mut run = handle.lock().await;
            if run.status != RunStatus::Running {
                return Ok(());
            }
            if self.try_complete_locked(&mut run) {
                self.persist_run(&run).await;
                let snapshot = run.snapshot(self.config.events.queue_preview_len);
                drop(run);
                self.emit(DialerEventKind::RunCompleted, snapshot, None);
                self.schedule_run_teardown(run_id.clone());
                return Ok(());
            }
            // A connected call never yields a line to a new dial.
            if run.answered_leg().is_some() {
                debug!("📴 Run {} has a claimed answer, not filling lines", run_id);
                return Ok(());
            }

            let mut to_start = Vec::new();
            while run.dialing_leg_count() < run.max_lines as usize && !run.queue.is_empty() {
                let Some(line) = run.free_line() else { break };
                let Some(contact) = run.queue.pop() else { break };
                let Some(to_number) = contact.dialable_number().map(str::to_string) else {
                    // Queue construction filters these out already.
                    continue;
                };
                let from_number = select_caller_id(&run.number_pool, run.strategy, run.attempt_count)
                    .map(str::to_string)
                    .ok_or_else(|| DialerError::configuration("outbound number pool is empty"))?;

                run.attempt_count += 1;
                run.current_index += 1;
                run.stats.attempted += 1;

                let leg = Leg {
                    id: LegId::new(),
                    run_id: run_id.clone(),
                    contact,
                    line,
                    from_number,
                    to_number,
                    status: LegStatus::Dialing,
                    amd_verdict: None,
                    hangup_cause: None,
                    provider_call_id: None,
                    started_at: Utc::now(),
                    answered_at: None,
                    ended_at: None,
                    ring_ms: None,
                };
                info!(
                    "📲 Run {} line {}: dialing {} ({}) from {}",
                    run_id, leg.line, leg.contact.name, leg.to_number, leg.from_number
                );
                run.legs.insert(leg.id.clone(), leg.clone());
                to_start.push(leg);
            }

            if to_start.is_empty() {
                return Ok(());
            }
            let snapshot = run.snapshot(self.config.events.queue_preview_len);
            drop(run);

            self.emit(DialerEventKind::QueueUpdated, snapshot, None);
            for leg in to_start {
                self.initiate_leg(run_id, leg).await;
            }
            Ok(())
        })
    }
}
