//! Call leg initiation and per-attempt state machine
//!
//! A leg moves `dialing → ringing → {amd_check} → answered | terminal`.
//! Webhook events and safety timers both funnel into the same finalize
//! path; any event arriving after a leg is terminal is a silent no-op,
//! which is what makes at-least-once webhook delivery and advisory
//! hangups safe.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::database::ContactDialStatus;
use crate::error::Result;
use crate::monitoring::events::DialerEventKind;
use crate::orchestrator::core::DialerEngine;
use crate::orchestrator::types::{Leg, LegId, LegStatus, RunId, RunSnapshot, RunState};
use crate::telephony::{
    AmdVerdict, CorrelationToken, CreateCallRequest, HangupCause, ProviderEvent, WebhookPayload,
};

impl DialerEngine {
    /// Place the outbound call for a freshly created leg
    ///
    /// The leg is already registered in the run state on its line; here
    /// we issue the provider request, record the returned handle, and arm
    /// both safety timers. A provider rejection finalizes the leg as
    /// `failed` immediately — there is no retry.
    pub(crate) async fn initiate_leg(&self, run_id: &RunId, leg: Leg) {
        let token = CorrelationToken::contact(run_id.clone(), leg.id.clone());
        let request = CreateCallRequest {
            to: leg.to_number.clone(),
            from: leg.from_number.clone(),
            amd_enabled: true,
            time_limit_secs: self.config.timers.max_call_duration_secs,
            webhook_url: self.config.general.webhook_url.clone(),
            client_state: token.encode(),
        };

        let call_id = match self.provider.create_call(request).await {
            Ok(call_id) => call_id,
            Err(e) => {
                warn!("❌ Call initiation failed for {} on run {}: {}", leg.to_number, run_id, e);
                let _ = self
                    .finalize_leg(run_id, &leg.id, LegStatus::Failed, None, None, false)
                    .await;
                return;
            }
        };

        let Ok(handle) = self.run_handle(run_id) else {
            // Run discarded while the request was in flight.
            self.advisory_hangup(&call_id).await;
            return;
        };
        let (recorded, snapshot) = {
            let mut run = handle.lock().await;
            let recorded = match run.legs.get_mut(&leg.id) {
                // A ringing or AMD webhook may outrun the create-call
                // response; any still-live leg gets its handle recorded.
                Some(l) if !l.status.is_terminal() => {
                    l.provider_call_id = Some(call_id.clone());
                    Some(l.clone())
                }
                // Finalized while the request was in flight; the handle
                // was never recorded, so hang the call up ourselves.
                _ => None,
            };
            if recorded.is_some() {
                run.call_map.insert(call_id.clone(), leg.id.clone());
            }
            (recorded, run.snapshot(self.config.events.queue_preview_len))
        };

        let Some(leg) = recorded else {
            self.advisory_hangup(&call_id).await;
            return;
        };

        if let Some(db) = &self.db {
            if let Err(e) = db.upsert_leg(&leg).await {
                warn!("⚠️ Failed to persist leg {}: {}", leg.id, e);
            }
        }
        self.emit(DialerEventKind::LegStarted, snapshot, Some(leg.id.clone()));
        self.spawn_ring_timer(run_id.clone(), leg.id.clone());
        self.spawn_amd_timer(run_id.clone(), leg.id.clone());
    }

    /// Route one provider event for a contact leg
    pub(crate) async fn handle_leg_event(
        &self,
        run_id: &RunId,
        leg_id: &LegId,
        payload: &WebhookPayload,
    ) -> Result<()> {
        match &payload.event {
            ProviderEvent::Ringing => self.handle_ringing(run_id, leg_id).await,
            ProviderEvent::AmdResult { verdict } => {
                self.handle_amd_result(run_id, leg_id, *verdict).await
            }
            ProviderEvent::Answered => self.claim_answer(run_id, leg_id).await,
            ProviderEvent::Hangup { cause } => self.handle_hangup(run_id, leg_id, *cause).await,
            ProviderEvent::ConferenceJoined => {
                debug!("🔗 Conference join confirmed for leg {}", leg_id);
                Ok(())
            }
        }
    }

    /// Far end started ringing
    async fn handle_ringing(&self, run_id: &RunId, leg_id: &LegId) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let snapshot = {
            let mut run = handle.lock().await;
            match run.legs.get_mut(leg_id) {
                Some(leg) if leg.status == LegStatus::Dialing => {
                    leg.status = LegStatus::Ringing;
                    debug!("🔔 Run {} line {}: {} ringing", run_id, leg.line, leg.to_number);
                }
                _ => return Ok(()),
            }
            run.snapshot(self.config.events.queue_preview_len)
        };
        self.emit(DialerEventKind::LegRinging, snapshot, Some(leg_id.clone()));
        Ok(())
    }

    /// AMD verdict arrived
    ///
    /// `human` is treated as an answer and goes to the arbiter;
    /// `machine`/`fax` terminate the leg; `unknown` parks it in
    /// `amd_check` until the AMD-unknown timeout or a later event.
    async fn handle_amd_result(
        &self,
        run_id: &RunId,
        leg_id: &LegId,
        verdict: AmdVerdict,
    ) -> Result<()> {
        match verdict {
            AmdVerdict::Human => {
                let handle = self.run_handle(run_id)?;
                {
                    let mut run = handle.lock().await;
                    if let Some(leg) = run.legs.get_mut(leg_id) {
                        leg.amd_verdict = Some(AmdVerdict::Human);
                    }
                }
                self.claim_answer(run_id, leg_id).await
            }
            AmdVerdict::Machine | AmdVerdict::Fax => {
                info!("🤖 Run {} leg {}: machine detected, hanging up", run_id, leg_id);
                self.finalize_leg(run_id, leg_id, LegStatus::Machine, Some(verdict), None, true)
                    .await
            }
            AmdVerdict::Unknown => {
                let handle = self.run_handle(run_id)?;
                {
                    let mut run = handle.lock().await;
                    if let Some(leg) = run.legs.get_mut(leg_id) {
                        if leg.status.is_dialing_phase() {
                            leg.amd_verdict = Some(AmdVerdict::Unknown);
                            leg.status = LegStatus::AmdCheck;
                            debug!("❓ Run {} leg {}: AMD unresolved, waiting", run_id, leg_id);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Provider reported the call ended
    async fn handle_hangup(
        &self,
        run_id: &RunId,
        leg_id: &LegId,
        cause: HangupCause,
    ) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let final_status = {
            let run = handle.lock().await;
            match run.legs.get(leg_id) {
                None => return Ok(()),
                Some(leg) if leg.status.is_terminal() => return Ok(()),
                Some(leg) if leg.status == LegStatus::Answered => LegStatus::Answered,
                Some(_) => match cause {
                    HangupCause::Busy => LegStatus::Busy,
                    HangupCause::NoAnswer | HangupCause::Canceled => LegStatus::NoAnswer,
                    HangupCause::Rejected | HangupCause::Normal | HangupCause::Error => {
                        LegStatus::Failed
                    }
                },
            }
        };
        self.finalize_leg(run_id, leg_id, final_status, None, Some(cause), false)
            .await
    }

    /// Manually hang up one leg
    ///
    /// Advisory, like every hangup: the leg finalizes through its own
    /// hangup webhook rather than here.
    pub async fn hangup_leg(&self, run_id: &RunId, leg_id: &LegId) -> Result<()> {
        let handle = self.run_handle(run_id)?;
        let call_id = {
            let run = handle.lock().await;
            let leg = run
                .legs
                .get(leg_id)
                .ok_or_else(|| crate::error::DialerError::not_found(format!(
                    "leg {} not found on run {}",
                    leg_id, run_id
                )))?;
            leg.provider_call_id.clone()
        };
        match call_id {
            Some(call_id) => {
                info!("📵 Manual hangup requested for leg {} (call {})", leg_id, call_id);
                self.advisory_hangup(&call_id).await;
                Ok(())
            }
            None => Err(crate::error::DialerError::leg(format!(
                "leg {} has no provider handle yet",
                leg_id
            ))),
        }
    }

    /// Ring timeout: a leg still unanswered after the window is dead air
    fn spawn_ring_timer(&self, run_id: RunId, leg_id: LegId) {
        let engine = self.clone();
        let window = Duration::from_secs(self.config.timers.ring_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let still_ringing = match engine.run_handle(&run_id) {
                Ok(handle) => {
                    let run = handle.lock().await;
                    matches!(
                        run.legs.get(&leg_id).map(|l| l.status),
                        Some(LegStatus::Dialing) | Some(LegStatus::Ringing)
                    )
                }
                Err(_) => false,
            };
            if still_ringing {
                info!("⏰ Ring timeout for leg {} on run {}", leg_id, run_id);
                let _ = engine
                    .finalize_leg(&run_id, &leg_id, LegStatus::NoAnswer, None, None, true)
                    .await;
            }
        });
    }

    /// AMD-unknown timeout: cap exposure to an undetermined connected line
    fn spawn_amd_timer(&self, run_id: RunId, leg_id: LegId) {
        let engine = self.clone();
        let window = Duration::from_secs(self.config.timers.amd_unknown_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let unresolved = match engine.run_handle(&run_id) {
                Ok(handle) => {
                    let run = handle.lock().await;
                    matches!(
                        run.legs.get(&leg_id).map(|l| l.status),
                        Some(LegStatus::AmdCheck)
                    )
                }
                Err(_) => false,
            };
            if unresolved {
                info!("⏰ AMD-unknown timeout for leg {} on run {}, treating as voicemail", leg_id, run_id);
                let _ = engine
                    .finalize_leg(&run_id, &leg_id, LegStatus::Voicemail, None, None, true)
                    .await;
            }
        });
    }

    /// Finalize one leg and run the shared follow-up path
    ///
    /// The state mutation, stats update, and completion check all happen
    /// under one acquisition of the run lock; provider hangups,
    /// persistence, and events happen after it is dropped.
    pub(crate) async fn finalize_leg(
        &self,
        run_id: &RunId,
        leg_id: &LegId,
        status: LegStatus,
        amd: Option<AmdVerdict>,
        cause: Option<HangupCause>,
        request_hangup: bool,
    ) -> Result<()> {
        let Ok(handle) = self.run_handle(run_id) else {
            return Ok(());
        };
        let (leg, snapshot, run_completed) = {
            let mut run = handle.lock().await;
            let Some(leg) = Self::finalize_leg_locked(&mut run, leg_id, status, amd, cause) else {
                return Ok(());
            };
            let run_completed = self.try_complete_locked(&mut run);
            if run_completed {
                self.persist_run(&run).await;
            }
            (leg, run.snapshot(self.config.events.queue_preview_len), run_completed)
        };
        self.leg_followups(run_id, leg, snapshot, run_completed, request_hangup)
            .await;
        Ok(())
    }

    /// Pure state mutation for a leg reaching its final disposition
    ///
    /// Returns `None` when the leg is absent or already terminal, which
    /// makes every caller's late-event handling a no-op for free. The
    /// provider-handle mapping entry is removed here, exactly once.
    pub(crate) fn finalize_leg_locked(
        run: &mut RunState,
        leg_id: &LegId,
        status: LegStatus,
        amd: Option<AmdVerdict>,
        cause: Option<HangupCause>,
    ) -> Option<Leg> {
        if run.legs.get(leg_id)?.status.is_terminal() {
            return None;
        }
        let mut leg = run.legs.remove(leg_id)?;
        if let Some(verdict) = amd {
            leg.amd_verdict = Some(verdict);
        }
        if cause.is_some() {
            leg.hangup_cause = cause;
        }
        leg.status = status;
        leg.ended_at = Some(Utc::now());
        // A leg the provider never carried has no ring duration to
        // measure; keep it out of the average.
        if leg.ring_ms.is_none() && leg.provider_call_id.is_some() {
            let ms = Utc::now()
                .signed_duration_since(leg.started_at)
                .num_milliseconds()
                .max(0) as u64;
            leg.ring_ms = Some(ms);
            run.record_ring_sample(ms);
        }

        match status {
            // The answered counter was incremented at claim time.
            LegStatus::Answered => run.stats.total_talk_seconds += leg.talk_seconds(),
            LegStatus::NoAnswer => run.stats.no_answer += 1,
            LegStatus::Voicemail | LegStatus::Machine => run.stats.voicemail += 1,
            LegStatus::Busy => run.stats.busy += 1,
            LegStatus::Failed => run.stats.failed += 1,
            LegStatus::CanceledOtherAnswer => run.stats.canceled += 1,
            LegStatus::Dialing | LegStatus::Ringing | LegStatus::AmdCheck => {}
        }

        if let Some(call_id) = &leg.provider_call_id {
            run.call_map.remove(call_id);
        }
        run.completed.push(leg.clone());
        Some(leg)
    }

    /// Post-lock follow-ups shared by every finalize site
    pub(crate) async fn leg_followups(
        &self,
        run_id: &RunId,
        leg: Leg,
        snapshot: RunSnapshot,
        run_completed: bool,
        request_hangup: bool,
    ) {
        if request_hangup {
            if let Some(call_id) = &leg.provider_call_id {
                self.advisory_hangup(call_id).await;
            }
        }
        self.cleanup_bridges_for_leg(&leg).await;
        self.persist_leg_outcome(&leg).await;

        self.emit(DialerEventKind::LegHangup, snapshot.clone(), Some(leg.id.clone()));
        self.emit(DialerEventKind::StatsUpdated, snapshot.clone(), None);
        self.schedule_completed_prune(run_id.clone(), leg.id.clone());

        if run_completed {
            self.emit(DialerEventKind::RunCompleted, snapshot, None);
            self.schedule_run_teardown(run_id.clone());
        } else {
            // A freed line may admit the next contact. Spawned to keep
            // the finalize path non-recursive.
            let engine = self.clone();
            let run_id = run_id.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.fill_lines(&run_id).await {
                    warn!("⚠️ Line refill after leg completion failed: {}", e);
                }
            });
        }
    }

    /// Persist a finalized leg, its contact's dial status, and the
    /// call-activity record; all best-effort
    async fn persist_leg_outcome(&self, leg: &Leg) {
        let Some(db) = &self.db else { return };
        if let Err(e) = db.upsert_leg(leg).await {
            warn!("⚠️ Failed to persist leg {}: {}", leg.id, e);
        }
        let contact_status = match leg.status {
            LegStatus::Answered => ContactDialStatus::Answered,
            LegStatus::Failed => ContactDialStatus::Failed,
            _ => ContactDialStatus::NoAnswer,
        };
        if let Err(e) = db
            .update_contact_status(&leg.contact.membership_id, contact_status)
            .await
        {
            warn!("⚠️ Failed to update contact {}: {}", leg.contact.membership_id, e);
        }
        if let Err(e) = db.insert_call_activity(leg).await {
            warn!("⚠️ Failed to record call activity for leg {}: {}", leg.id, e);
        }
    }

    /// Drop a just-completed leg from the UI display list after a few
    /// seconds
    fn schedule_completed_prune(&self, run_id: RunId, leg_id: LegId) {
        let engine = self.clone();
        let window = Duration::from_secs(self.config.timers.completed_display_secs);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Ok(handle) = engine.run_handle(&run_id) {
                let mut run = handle.lock().await;
                run.completed.retain(|l| l.id != leg_id);
            }
        });
    }

    /// Fire-and-forget hangup request; failures are logged, never acted on
    pub(crate) async fn advisory_hangup(&self, call_id: &crate::telephony::ProviderCallId) {
        if let Err(e) = self.provider.hangup_call(call_id).await {
            debug!("📵 Hangup request for {} failed (advisory): {}", call_id, e);
        }
    }
}
