//! Shared test fixtures: a scriptable in-memory telephony provider plus
//! contact and request builders.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dialer_engine::prelude::*;
use dialer_engine::telephony::{ConferenceId, ConferenceOptions, CreateCallRequest};

/// One outbound call the mock provider accepted
#[derive(Debug, Clone)]
pub struct PlacedCall {
    pub call_id: ProviderCallId,
    pub request: CreateCallRequest,
}

/// Records every provider request; call progress is driven by the test
/// feeding webhook payloads back into the engine.
#[derive(Default)]
pub struct MockProvider {
    counter: AtomicU64,
    calls: Mutex<Vec<PlacedCall>>,
    hangups: Mutex<Vec<ProviderCallId>>,
    conferences: Mutex<Vec<(ProviderCallId, ConferenceId)>>,
    joins: Mutex<Vec<(ProviderCallId, ConferenceId)>>,
    reject_numbers: Mutex<HashSet<String>>,
    call_delay: Mutex<Option<std::time::Duration>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make create-call requests toward this number fail
    pub fn reject(&self, number: &str) {
        self.reject_numbers.lock().unwrap().insert(number.to_string());
    }

    /// Delay create-call responses, letting webhooks race ahead of them
    pub fn delay_calls(&self, delay: std::time::Duration) {
        *self.call_delay.lock().unwrap() = Some(delay);
    }

    pub fn placed(&self) -> Vec<PlacedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn placed_to(&self, to: &str) -> Vec<PlacedCall> {
        self.placed().into_iter().filter(|c| c.request.to == to).collect()
    }

    pub fn hangups(&self) -> Vec<ProviderCallId> {
        self.hangups.lock().unwrap().clone()
    }

    pub fn was_hung_up(&self, call_id: &ProviderCallId) -> bool {
        self.hangups.lock().unwrap().contains(call_id)
    }

    pub fn conferences(&self) -> Vec<(ProviderCallId, ConferenceId)> {
        self.conferences.lock().unwrap().clone()
    }

    pub fn joins(&self) -> Vec<(ProviderCallId, ConferenceId)> {
        self.joins.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyProvider for MockProvider {
    async fn create_call(&self, request: CreateCallRequest) -> dialer_engine::Result<ProviderCallId> {
        if self.reject_numbers.lock().unwrap().contains(&request.to) {
            return Err(DialerError::telephony(format!("provider rejected {}", request.to)));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let call_id = ProviderCallId(format!("call-{}", n));
        self.calls.lock().unwrap().push(PlacedCall { call_id: call_id.clone(), request });
        let delay = *self.call_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(call_id)
    }

    async fn hangup_call(&self, call_id: &ProviderCallId) -> dialer_engine::Result<()> {
        self.hangups.lock().unwrap().push(call_id.clone());
        Ok(())
    }

    async fn create_conference(
        &self,
        seed_call: &ProviderCallId,
        _options: ConferenceOptions,
    ) -> dialer_engine::Result<ConferenceId> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let conference_id = ConferenceId(format!("conf-{}", n));
        self.conferences
            .lock()
            .unwrap()
            .push((seed_call.clone(), conference_id.clone()));
        Ok(conference_id)
    }

    async fn join_conference(
        &self,
        call_id: &ProviderCallId,
        conference_id: &ConferenceId,
    ) -> dialer_engine::Result<()> {
        self.joins
            .lock()
            .unwrap()
            .push((call_id.clone(), conference_id.clone()));
        Ok(())
    }
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn engine_with(provider: Arc<MockProvider>) -> Arc<DialerEngine> {
    init_tracing();
    DialerEngine::new(DialerConfig::default(), provider, None).unwrap()
}

pub fn contact(n: usize, list_id: &str) -> Contact {
    Contact {
        membership_id: format!("member-{}", n),
        list_id: list_id.to_string(),
        name: format!("Contact {}", n),
        phone: Some(format!("+1555000{:04}", n)),
        phone_secondary: None,
        phone_tertiary: None,
        city: Some("Springfield".to_string()),
        state: Some("IL".to_string()),
        tags: vec![],
    }
}

pub fn contacts(n: usize, list_id: &str) -> Vec<Contact> {
    (0..n).map(|i| contact(i, list_id)).collect()
}

pub fn pool(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("+1444000{:04}", i)).collect()
}

/// Start request with inline contacts and numbers (no database needed)
pub fn start_request(list_id: &str, n_contacts: usize, max_lines: u8, pool_size: usize) -> StartRunRequest {
    StartRunRequest {
        list_id: list_id.to_string(),
        list_name: format!("List {}", list_id),
        max_lines: Some(max_lines),
        strategy: Some(CallerIdStrategy::RoundRobin),
        script_id: None,
        contacts: Some(contacts(n_contacts, list_id)),
        number_pool: Some(pool(pool_size)),
    }
}

/// Feed one provider webhook for a previously placed call
pub async fn send(
    engine: &Arc<DialerEngine>,
    call: &PlacedCall,
    event: ProviderEvent,
) -> dialer_engine::Result<()> {
    engine
        .handle_webhook(WebhookPayload {
            call_id: call.call_id.clone(),
            client_state: call.request.client_state.clone(),
            event,
        })
        .await
}

/// Let detached tasks (refills, prunes) run
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
