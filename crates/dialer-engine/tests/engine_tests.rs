//! End-to-end engine tests driven through a scripted mock provider.
//!
//! Each test starts a run with inline contacts, then plays provider
//! webhooks back into the engine and asserts on run snapshots and on the
//! requests the provider saw.

mod common;

use std::sync::Arc;

use common::{contacts, engine_with, pool, send, settle, start_request, MockProvider};
use dialer_engine::prelude::*;

#[tokio::test]
async fn fills_lines_up_to_max() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 5, 3, 3)).await.unwrap();
    let snapshot = engine.snapshot(&run_id).await.unwrap();

    assert_eq!(provider.placed().len(), 3);
    assert_eq!(snapshot.legs.len(), 3);
    assert_eq!(snapshot.queue_len, 2);
    assert_eq!(snapshot.stats.attempted, 3);
    let lines: Vec<u8> = snapshot.legs.iter().map(|l| l.line).collect();
    assert_eq!(lines, vec![1, 2, 3]);
    assert!(snapshot.legs.iter().all(|l| l.status == LegStatus::Dialing));
}

#[tokio::test]
async fn round_robin_caller_id_cycles_pool() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    engine.start_run(start_request("list-a", 4, 2, 2)).await.unwrap();

    let froms: Vec<String> = provider.placed().iter().map(|c| c.request.from.clone()).collect();
    assert_eq!(froms, vec![pool(2)[0].clone(), pool(2)[1].clone()]);
}

#[tokio::test]
async fn single_strategy_always_uses_first_number() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let mut request = start_request("list-a", 3, 3, 3);
    request.strategy = Some(CallerIdStrategy::Single);
    engine.start_run(request).await.unwrap();

    assert!(provider.placed().iter().all(|c| c.request.from == pool(3)[0]));
}

#[tokio::test]
async fn outbound_requests_carry_amd_and_time_limit() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();

    let call = &provider.placed()[0];
    assert!(call.request.amd_enabled);
    assert_eq!(call.request.time_limit_secs, config.timers.max_call_duration_secs);
    assert!(CorrelationToken::decode(&call.request.client_state).is_ok());
}

#[tokio::test]
async fn ringing_webhook_advances_leg() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    send(&engine, &provider.placed()[0], ProviderEvent::Ringing).await.unwrap();

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.legs[0].status, LegStatus::Ringing);
}

#[tokio::test(start_paused = true)]
async fn ringing_ahead_of_create_response_keeps_call_alive() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    provider.delay_calls(std::time::Duration::from_millis(500));

    let task = {
        let engine = engine.clone();
        let request = start_request("list-a", 1, 1, 1);
        tokio::spawn(async move { engine.start_run(request).await })
    };
    // Run the engine up to the point where the create-call request is
    // in flight, then deliver a ringing webhook before it returns.
    while provider.placed().is_empty() {
        tokio::task::yield_now().await;
    }
    let call = provider.placed()[0].clone();
    send(&engine, &call, ProviderEvent::Ringing).await.unwrap();

    let run_id = task.await.unwrap().unwrap();
    settle().await;

    // The leg advanced past dialing but is alive; its handle is
    // recorded and nothing was hung up.
    assert!(provider.hangups().is_empty());
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.legs[0].status, LegStatus::Ringing);
    assert_eq!(snapshot.legs[0].provider_call_id, Some(call.call_id.clone()));

    send(&engine, &call, ProviderEvent::Answered).await.unwrap();
    settle().await;
    assert_eq!(engine.snapshot(&run_id).await.unwrap().stats.answered, 1);
}

#[tokio::test]
async fn human_amd_wins_and_cancels_siblings() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 3, 3, 3)).await.unwrap();
    let placed = provider.placed();
    send(&engine, &placed[0], ProviderEvent::Ringing).await.unwrap();
    send(&engine, &placed[1], ProviderEvent::AmdResult { verdict: AmdVerdict::Human })
        .await
        .unwrap();
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.answered, 1);
    assert_eq!(snapshot.stats.canceled, 2);
    assert_eq!(snapshot.legs.len(), 1);
    assert_eq!(snapshot.legs[0].status, LegStatus::Answered);
    assert_eq!(snapshot.legs[0].line, 2);
    assert!(snapshot
        .recently_completed
        .iter()
        .all(|l| l.status == LegStatus::CanceledOtherAnswer));

    // Both losing calls got hangup requests.
    assert!(provider.was_hung_up(&placed[0].call_id));
    assert!(provider.was_hung_up(&placed[2].call_id));

    // The winner was bridged: conference seeded with its call, operator dialed.
    let config = DialerConfig::default();
    assert_eq!(provider.conferences().len(), 1);
    assert_eq!(provider.conferences()[0].0, placed[1].call_id);
    assert_eq!(provider.placed_to(&config.bridge.operator_endpoint).len(), 1);
}

#[tokio::test]
async fn late_answer_loses_arbitration() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 2, 2, 2)).await.unwrap();
    let placed = provider.placed();
    send(&engine, &placed[0], ProviderEvent::Answered).await.unwrap();
    // Second answer races in after the claim.
    send(&engine, &placed[1], ProviderEvent::Answered).await.unwrap();
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.answered, 1);
    assert_eq!(snapshot.legs.len(), 1);
    assert_eq!(snapshot.legs[0].status, LegStatus::Answered);
    assert!(snapshot
        .recently_completed
        .iter()
        .any(|l| l.status == LegStatus::CanceledOtherAnswer));
    assert!(provider.was_hung_up(&placed[1].call_id));
}

#[tokio::test]
async fn machine_verdict_hangs_up_and_counts_voicemail() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 2, 1, 1)).await.unwrap();
    let first = provider.placed()[0].clone();
    send(&engine, &first, ProviderEvent::AmdResult { verdict: AmdVerdict::Machine })
        .await
        .unwrap();
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.voicemail, 1);
    assert_eq!(snapshot.stats.answered, 0);
    assert!(provider.was_hung_up(&first.call_id));

    // The freed line pulled the next contact.
    assert_eq!(provider.placed().len(), 2);
    assert_eq!(snapshot.legs.len(), 1);
}

#[tokio::test]
async fn busy_hangup_counts_busy() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    send(&engine, &provider.placed()[0], ProviderEvent::Hangup { cause: HangupCause::Busy })
        .await
        .unwrap();
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.busy, 1);
    assert_eq!(snapshot.recently_completed[0].status, LegStatus::Busy);
}

#[tokio::test(start_paused = true)]
async fn ring_timeout_finalizes_as_no_answer() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    let run_id = engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    let call = provider.placed()[0].clone();
    send(&engine, &call, ProviderEvent::Ringing).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(config.timers.ring_timeout_secs + 1)).await;
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.no_answer, 1);
    assert!(provider.was_hung_up(&call.call_id));
}

#[tokio::test(start_paused = true)]
async fn amd_unknown_timeout_finalizes_as_voicemail() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    let run_id = engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    let call = provider.placed()[0].clone();
    send(&engine, &call, ProviderEvent::Ringing).await.unwrap();
    send(&engine, &call, ProviderEvent::AmdResult { verdict: AmdVerdict::Unknown })
        .await
        .unwrap();

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.legs[0].status, LegStatus::AmdCheck);

    tokio::time::sleep(std::time::Duration::from_secs(
        config.timers.amd_unknown_timeout_secs + 1,
    ))
    .await;
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.voicemail, 1);
    assert!(provider.was_hung_up(&call.call_id));
}

#[tokio::test(start_paused = true)]
async fn timer_firing_into_terminal_leg_is_a_no_op() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    // Resolve both legs quickly, then pause so the run stays resident
    // while the stale timers fire.
    let run_id = engine.start_run(start_request("list-a", 2, 1, 1)).await.unwrap();
    send(&engine, &provider.placed()[0], ProviderEvent::Hangup { cause: HangupCause::Busy })
        .await
        .unwrap();
    settle().await;
    engine.pause_run(&run_id).await.unwrap();
    send(&engine, &provider.placed()[1], ProviderEvent::Hangup { cause: HangupCause::Busy })
        .await
        .unwrap();
    settle().await;

    let before = engine.snapshot(&run_id).await.unwrap().stats.clone();
    tokio::time::sleep(std::time::Duration::from_secs(config.timers.ring_timeout_secs + 1)).await;
    settle().await;

    // Both ring timers fired against already-finalized legs.
    let after = engine.snapshot(&run_id).await.unwrap().stats.clone();
    assert_eq!(before, after);
    assert_eq!(after.busy, 2);
    assert_eq!(after.no_answer, 0);
    assert!(provider.hangups().is_empty());
}

#[tokio::test(start_paused = true)]
async fn completed_run_is_discarded_after_grace_window() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    let run_id = engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    send(&engine, &provider.placed()[0], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    settle().await;
    assert_eq!(engine.snapshot(&run_id).await.unwrap().status, RunStatus::Completed);

    tokio::time::sleep(std::time::Duration::from_secs(
        config.timers.completion_grace_secs + 1,
    ))
    .await;
    settle().await;

    let err = engine.snapshot(&run_id).await.unwrap_err();
    assert!(matches!(err, DialerError::NotFound(_)));
}

#[tokio::test]
async fn answered_leg_blocks_refill_until_it_ends() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 5, 2, 2)).await.unwrap();
    let placed = provider.placed();
    assert_eq!(placed.len(), 2);

    send(&engine, &placed[0], ProviderEvent::Answered).await.unwrap();
    settle().await;

    // Sibling canceled, but no new dial while the winner is connected.
    let contact_calls = provider.placed_to(&contacts(5, "list-a")[2].phone.clone().unwrap());
    assert!(contact_calls.is_empty());
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.legs.len(), 1);
    assert_eq!(snapshot.queue_len, 3);

    send(&engine, &placed[0], ProviderEvent::Hangup { cause: HangupCause::Normal })
        .await
        .unwrap();
    settle().await;

    // Lines refill once the connected call ends.
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.legs.len(), 2);
    assert_eq!(snapshot.stats.answered, 1);
}

#[tokio::test]
async fn run_completes_exactly_once() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let mut events = engine.subscribe();

    let run_id = engine.start_run(start_request("list-a", 2, 2, 2)).await.unwrap();
    let placed = provider.placed();
    send(&engine, &placed[0], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    send(&engine, &placed[1], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert!(snapshot.completed_at.is_some());
    assert_eq!(snapshot.stats.no_answer, 2);

    // A duplicate hangup webhook inside the grace window changes nothing.
    send(&engine, &placed[1], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    settle().await;

    let mut completions = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind == DialerEventKind::RunCompleted {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn pause_blocks_filling_and_resume_refills() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 4, 2, 2)).await.unwrap();
    engine.pause_run(&run_id).await.unwrap();

    let placed = provider.placed();
    send(&engine, &placed[0], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    settle().await;

    // In-flight legs resolve naturally, but no new lines are filled.
    assert_eq!(provider.placed().len(), 2);
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
    assert_eq!(snapshot.legs.len(), 1);

    engine.resume_run(&run_id).await.unwrap();
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Running);
    assert_eq!(snapshot.legs.len(), 2);
    assert_eq!(provider.placed().len(), 3);
}

#[tokio::test]
async fn run_drained_while_paused_completes_on_resume() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    engine.pause_run(&run_id).await.unwrap();

    // The last in-flight leg resolves while the run is paused; the
    // paused run cannot complete yet.
    send(&engine, &provider.placed()[0], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    settle().await;
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
    assert!(snapshot.legs.is_empty());
    assert_eq!(snapshot.queue_len, 0);

    // Resume finds nothing queued and nothing in flight and completes.
    engine.resume_run(&run_id).await.unwrap();
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert!(snapshot.completed_at.is_some());

    // The list is free for a fresh run again.
    engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
}

#[tokio::test]
async fn stop_hangs_up_unanswered_legs() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 4, 2, 2)).await.unwrap();
    let placed = provider.placed();
    engine.stop_run(&run_id).await.unwrap();

    assert!(provider.was_hung_up(&placed[0].call_id));
    assert!(provider.was_hung_up(&placed[1].call_id));
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
}

#[tokio::test]
async fn stop_leaves_answered_call_connected() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 2, 1, 1)).await.unwrap();
    let placed = provider.placed();
    send(&engine, &placed[0], ProviderEvent::Answered).await.unwrap();
    settle().await;

    engine.stop_run(&run_id).await.unwrap();
    assert!(!provider.was_hung_up(&placed[0].call_id));
}

#[tokio::test]
async fn duplicate_run_for_same_list_is_rejected() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    engine.start_run(start_request("list-a", 2, 1, 1)).await.unwrap();
    let err = engine.start_run(start_request("list-a", 2, 1, 1)).await.unwrap_err();
    assert!(matches!(err, DialerError::Run(_)));

    // A different list is independent.
    engine.start_run(start_request("list-b", 2, 1, 1)).await.unwrap();
}

#[tokio::test]
async fn single_number_pool_serves_every_line() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let run_id = engine.start_run(start_request("list-a", 5, 3, 1)).await.unwrap();
    let snapshot = engine.snapshot(&run_id).await.unwrap();

    // One outbound number does not limit concurrency; it is simply
    // presented on every line.
    assert_eq!(snapshot.max_lines, 3);
    assert_eq!(snapshot.legs.len(), 3);
    assert_eq!(provider.placed().len(), 3);
    assert!(provider.placed().iter().all(|c| c.request.from == pool(1)[0]));

    // Each termination pulls the next contact on the same number.
    send(&engine, &provider.placed()[0], ProviderEvent::Hangup { cause: HangupCause::NoAnswer })
        .await
        .unwrap();
    settle().await;
    assert_eq!(provider.placed().len(), 4);
    assert!(provider.placed().iter().all(|c| c.request.from == pool(1)[0]));
}

#[tokio::test]
async fn requested_lines_clamped_to_absolute_ceiling() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    let run_id = engine.start_run(start_request("list-a", 15, 50, 2)).await.unwrap();
    let snapshot = engine.snapshot(&run_id).await.unwrap();

    assert_eq!(snapshot.max_lines, config.dialing.absolute_max_lines);
    assert_eq!(snapshot.legs.len(), config.dialing.absolute_max_lines as usize);
}

#[tokio::test]
async fn initiation_failure_is_terminal_failed_without_retry() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let rejected = contacts(3, "list-a")[1].phone.clone().unwrap();
    provider.reject(&rejected);

    let run_id = engine.start_run(start_request("list-a", 3, 3, 3)).await.unwrap();
    settle().await;

    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.failed, 1);
    assert_eq!(snapshot.stats.attempted, 3);
    assert_eq!(snapshot.legs.len(), 2);
    // The run carried on; nothing re-dialed the rejected number.
    assert!(provider.placed_to(&rejected).is_empty());
}

#[tokio::test]
async fn rejected_leg_is_excluded_from_ring_average() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let rejected = contacts(2, "list-a")[0].phone.clone().unwrap();
    provider.reject(&rejected);

    let run_id = engine.start_run(start_request("list-a", 2, 1, 1)).await.unwrap();
    settle().await;

    // Only the rejected leg has finalized; it never reached the
    // provider, so there is no ring sample yet.
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.stats.failed, 1);
    assert_eq!(snapshot.stats.avg_ring_ms, 0);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    send(&engine, &provider.placed()[0], ProviderEvent::Hangup { cause: HangupCause::Busy })
        .await
        .unwrap();
    settle().await;

    // The average reflects the dialed leg alone, not a zero-length
    // sample from the rejected one.
    let snapshot = engine.snapshot(&run_id).await.unwrap();
    assert!(snapshot.stats.avg_ring_ms >= 40);
}

#[tokio::test]
async fn softphone_answer_joins_the_conference() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());
    let config = DialerConfig::default();

    engine.start_run(start_request("list-a", 1, 1, 1)).await.unwrap();
    let pstn = provider.placed()[0].clone();
    send(&engine, &pstn, ProviderEvent::Answered).await.unwrap();
    settle().await;

    let softphone = provider.placed_to(&config.bridge.operator_endpoint)[0].clone();
    send(&engine, &softphone, ProviderEvent::Answered).await.unwrap();

    let joins = provider.joins();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].0, softphone.call_id);
    assert_eq!(joins[0].1, provider.conferences()[0].1);
}

#[tokio::test]
async fn malformed_correlation_token_is_rejected() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let err = engine
        .handle_webhook(WebhookPayload {
            call_id: ProviderCallId("call-x".to_string()),
            client_state: "not json".to_string(),
            event: ProviderEvent::Ringing,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DialerError::InvalidInput(_)));
}

#[tokio::test]
async fn webhook_for_discarded_run_is_ignored() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let token = CorrelationToken::contact(RunId::new(), LegId::new());
    engine
        .handle_webhook(WebhookPayload {
            call_id: ProviderCallId("call-x".to_string()),
            client_state: token.encode(),
            event: ProviderEvent::Hangup { cause: HangupCause::NoAnswer },
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn run_with_no_dialable_contacts_is_rejected() {
    let provider = MockProvider::new();
    let engine = engine_with(provider.clone());

    let mut request = start_request("list-a", 2, 1, 1);
    request.contacts = Some(
        contacts(2, "list-a")
            .into_iter()
            .map(|mut c| {
                c.phone = None;
                c
            })
            .collect(),
    );
    let err = engine.start_run(request).await.unwrap_err();
    assert!(matches!(err, DialerError::Run(_)));
}
