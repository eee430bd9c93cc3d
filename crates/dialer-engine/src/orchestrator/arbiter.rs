//! First-answer arbitration
//!
//! Only one leg per run ever becomes `answered`. The claim and the
//! cancellation of every sibling happen inside a single acquisition of
//! the run lock, so two answers racing each other resolve to exactly one
//! winner regardless of webhook arrival order.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::monitoring::events::DialerEventKind;
use crate::orchestrator::core::DialerEngine;
use crate::orchestrator::types::{Leg, LegId, LegStatus, RunId};

enum ClaimOutcome {
    /// This leg won; siblings were canceled under the same lock.
    Won { winner: Leg, canceled: Vec<Leg> },
    /// Another leg already holds the answer; this one lost.
    Lost { loser: Leg, run_completed: bool },
}

impl DialerEngine {
    /// Handle a human-confirmed answer on one leg
    ///
    /// Reached from a direct `human` AMD verdict or an unambiguous
    /// answered event — never from raw webhook state directly. A late
    /// answer against an already-claimed run terminates the late leg as
    /// `canceled_other_answer`; otherwise the leg wins, the run's
    /// answered counter increments exactly once, and every sibling in
    /// the dialing phase is finalized through the normal completion path.
    pub(crate) async fn claim_answer(&self, run_id: &RunId, leg_id: &LegId) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let (outcome, snapshot) = {
            let mut run = handle.lock().await;
            let Some(leg) = run.legs.get(leg_id) else {
                return Ok(());
            };
            if leg.status.is_terminal() || leg.status == LegStatus::Answered {
                debug!("🔁 Duplicate answer event for leg {}, ignoring", leg_id);
                return Ok(());
            }

            if run.answered_leg().is_some() {
                let Some(loser) = Self::finalize_leg_locked(
                    &mut run,
                    leg_id,
                    LegStatus::CanceledOtherAnswer,
                    None,
                    None,
                ) else {
                    return Ok(());
                };
                let run_completed = self.try_complete_locked(&mut run);
                if run_completed {
                    self.persist_run(&run).await;
                }
                (
                    ClaimOutcome::Lost { loser, run_completed },
                    run.snapshot(self.config.events.queue_preview_len),
                )
            } else {
                let now = Utc::now();
                let winner = match run.legs.get_mut(leg_id) {
                    Some(leg) => {
                        leg.status = LegStatus::Answered;
                        leg.answered_at = Some(now);
                        let ring_ms = now
                            .signed_duration_since(leg.started_at)
                            .num_milliseconds()
                            .max(0) as u64;
                        leg.ring_ms = Some(ring_ms);
                        leg.clone()
                    }
                    None => return Ok(()),
                };
                run.record_ring_sample(winner.ring_ms.unwrap_or(0));
                // The only place this counter is ever incremented.
                run.stats.answered += 1;

                let sibling_ids: Vec<LegId> = run
                    .legs
                    .values()
                    .filter(|l| l.id != *leg_id && l.status.is_dialing_phase())
                    .map(|l| l.id.clone())
                    .collect();
                let mut canceled = Vec::with_capacity(sibling_ids.len());
                for id in &sibling_ids {
                    if let Some(leg) = Self::finalize_leg_locked(
                        &mut run,
                        id,
                        LegStatus::CanceledOtherAnswer,
                        None,
                        None,
                    ) {
                        canceled.push(leg);
                    }
                }
                info!(
                    "🏆 Run {} line {}: {} answered, canceling {} sibling legs",
                    run_id, winner.line, winner.to_number, canceled.len()
                );
                (
                    ClaimOutcome::Won { winner, canceled },
                    run.snapshot(self.config.events.queue_preview_len),
                )
            }
        };

        match outcome {
            ClaimOutcome::Lost { loser, run_completed } => {
                debug!("🥈 Leg {} answered late, lost arbitration", loser.id);
                self.leg_followups(run_id, loser, snapshot, run_completed, true)
                    .await;
            }
            ClaimOutcome::Won { winner, canceled } => {
                if let Some(db) = &self.db {
                    if let Err(e) = db.upsert_leg(&winner).await {
                        warn!("⚠️ Failed to persist answered leg {}: {}", winner.id, e);
                    }
                }
                self.emit(DialerEventKind::LegAnswered, snapshot.clone(), Some(winner.id.clone()));
                self.bridge_to_operator(run_id, &winner).await;
                for leg in canceled {
                    self.leg_followups(run_id, leg, snapshot.clone(), false, true)
                        .await;
                }
            }
        }
        Ok(())
    }
}
