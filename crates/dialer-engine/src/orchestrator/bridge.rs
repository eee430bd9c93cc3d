//! Conference bridging to the operator softphone
//!
//! Once a leg wins arbitration, the answered PSTN call is seeded into a
//! provider-side conference and a second call is placed to the operator's
//! softphone; when that call answers, it is joined into the conference.
//!
//! Failure anywhere in here is an explicit degraded mode, never fatal:
//! the PSTN leg stays `answered` with no operator audio, and the
//! condition is only visible in the logs.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::orchestrator::core::{DialerEngine, PendingBridge};
use crate::orchestrator::types::{Leg, RunId};
use crate::telephony::{
    ConferenceOptions, CorrelationToken, CreateCallRequest, ProviderCallId, ProviderEvent,
    WebhookPayload,
};

impl DialerEngine {
    /// Bridge the winning leg to the operator softphone
    pub(crate) async fn bridge_to_operator(&self, run_id: &RunId, winner: &Leg) {
        let Some(pstn_call_id) = &winner.provider_call_id else {
            warn!(
                "🔇 Leg {} answered without a provider handle, cannot bridge (degraded audio)",
                winner.id
            );
            return;
        };

        let conference_id = match self
            .provider
            .create_conference(
                pstn_call_id,
                ConferenceOptions { entry_beep: self.config.bridge.entry_beep },
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "🔇 Conference creation failed for leg {} (degraded audio): {}",
                    winner.id, e
                );
                return;
            }
        };

        let token = CorrelationToken::softphone(run_id.clone(), winner.id.clone());
        let request = CreateCallRequest {
            to: self.config.bridge.operator_endpoint.clone(),
            from: winner.from_number.clone(),
            amd_enabled: false,
            time_limit_secs: self.config.timers.max_call_duration_secs,
            webhook_url: self.config.general.webhook_url.clone(),
            client_state: token.encode(),
        };
        let softphone_call_id = match self.provider.create_call(request).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "🔇 Softphone dial-out failed for leg {} (degraded audio): {}",
                    winner.id, e
                );
                return;
            }
        };

        info!(
            "🌉 Bridging run {} leg {}: conference {}, softphone call {}",
            run_id, winner.id, conference_id, softphone_call_id
        );
        self.pending_bridges.insert(
            softphone_call_id,
            PendingBridge {
                run_id: run_id.clone(),
                leg_id: winner.id.clone(),
                conference_id,
                pstn_call_id: pstn_call_id.clone(),
            },
        );
    }

    /// Route one provider event for a softphone bridge leg
    pub(crate) async fn handle_softphone_event(
        &self,
        payload: &WebhookPayload,
    ) -> Result<()> {
        match &payload.event {
            ProviderEvent::Answered => {
                let Some(pending) = self
                    .pending_bridges
                    .get(&payload.call_id)
                    .map(|e| e.value().clone())
                else {
                    debug!("📭 Softphone answer for unknown bridge {}, ignoring", payload.call_id);
                    return Ok(());
                };
                match self
                    .provider
                    .join_conference(&payload.call_id, &pending.conference_id)
                    .await
                {
                    Ok(()) => {
                        self.pending_bridges.remove(&payload.call_id);
                        info!(
                            "🔊 Operator joined conference {} for run {} leg {}",
                            pending.conference_id, pending.run_id, pending.leg_id
                        );
                    }
                    Err(e) => {
                        warn!(
                            "🔇 Conference join failed for leg {} (degraded audio): {}",
                            pending.leg_id, e
                        );
                    }
                }
                Ok(())
            }
            ProviderEvent::Hangup { .. } => {
                if self.pending_bridges.remove(&payload.call_id).is_some() {
                    debug!("🧹 Softphone call {} ended before join, bridge dropped", payload.call_id);
                }
                Ok(())
            }
            ProviderEvent::ConferenceJoined => {
                debug!("🔗 Conference join confirmed for softphone call {}", payload.call_id);
                Ok(())
            }
            other => {
                debug!("📭 Ignoring softphone event {:?} for {}", other, payload.call_id);
                Ok(())
            }
        }
    }

    /// Drop any bridge bookkeeping tied to a finalized leg
    ///
    /// Prevents a stale join if the PSTN side ends while the softphone is
    /// still ringing; the orphaned softphone call is hung up as well.
    pub(crate) async fn cleanup_bridges_for_leg(&self, leg: &Leg) {
        let Some(pstn_call_id) = &leg.provider_call_id else { return };
        let stale: Vec<ProviderCallId> = self
            .pending_bridges
            .iter()
            .filter(|e| e.value().pstn_call_id == *pstn_call_id)
            .map(|e| e.key().clone())
            .collect();
        for softphone_call_id in stale {
            if self.pending_bridges.remove(&softphone_call_id).is_some() {
                debug!(
                    "🧹 Leg {} ended, dropping pending bridge {}",
                    leg.id, softphone_call_id
                );
                self.advisory_hangup(&softphone_call_id).await;
            }
        }
    }
}
