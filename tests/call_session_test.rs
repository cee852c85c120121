//! Call Session Integration Tests
//!
//! Drives sessions end to end against in-memory stores and a manually
//! stepped simulated provider.

use chrono::{Duration as ChronoDuration, Utc};
use powerdial::application::{
    CallSessionManager, CreditLedger, DispositionCapture, DispositionSubmission, EventBroadcaster,
    SessionSettings, StartCallRequest,
};
use powerdial::domain::disposition::Disposition;
use powerdial::domain::lead::{Lead, LeadStore};
use powerdial::domain::ledger::{CreditRate, LedgerStore, ReservationStatus};
use powerdial::domain::reporting::SessionReport;
use powerdial::domain::session::{CallSession, FailureReason, SessionRepository, SessionState};
use powerdial::domain::shared::value_objects::{LeadRef, PhoneNumber, TenantId};
use powerdial::domain::telephony::{ProviderCallStatus, ProviderEvent};
use powerdial::infrastructure::persistence::{
    InMemoryFollowUpRepository, InMemoryLeadStore, InMemoryLedgerStore, InMemorySessionRepository,
};
use powerdial::infrastructure::telephony::SimulatedProvider;
use powerdial::DomainError;
use std::sync::Arc;
use std::time::Duration;

struct TestEnv {
    sessions: CallSessionManager,
    provider: Arc<SimulatedProvider>,
    ledger: Arc<CreditLedger>,
    ledger_store: Arc<InMemoryLedgerStore>,
    session_repo: Arc<InMemorySessionRepository>,
    follow_ups: Arc<InMemoryFollowUpRepository>,
    leads: Arc<InMemoryLeadStore>,
    tenant_id: TenantId,
    caller_id: PhoneNumber,
}

impl TestEnv {
    async fn new(balance: u64, free_allowance: u64) -> Self {
        Self::with_settings(balance, free_allowance, SessionSettings::default()).await
    }

    async fn with_settings(balance: u64, free_allowance: u64, settings: SessionSettings) -> Self {
        let provider = Arc::new(SimulatedProvider::manual());
        let ledger_store = Arc::new(InMemoryLedgerStore::new());
        let session_repo = Arc::new(InMemorySessionRepository::new());
        let follow_ups = Arc::new(InMemoryFollowUpRepository::new());
        let leads = Arc::new(InMemoryLeadStore::new());

        let ledger = Arc::new(CreditLedger::new(
            ledger_store.clone(),
            CreditRate::per_minute(10),
            ChronoDuration::days(30),
        ));
        let tenant_id = TenantId::new();
        ledger
            .open_account(tenant_id, balance, free_allowance)
            .await
            .expect("Failed to open account");

        let sessions = CallSessionManager::new(
            ledger.clone(),
            provider.clone(),
            session_repo.clone(),
            leads.clone(),
            Arc::new(DispositionCapture::new(follow_ups.clone())),
            EventBroadcaster::new(),
            settings,
        );

        let caller_id = PhoneNumber::parse("+14155550100").unwrap();
        assert!(sessions.register_caller_id(tenant_id, caller_id.clone()).await);

        Self {
            sessions,
            provider,
            ledger,
            ledger_store,
            session_repo,
            follow_ups,
            leads,
            tenant_id,
            caller_id,
        }
    }

    fn request(&self, callee: &str) -> StartCallRequest {
        StartCallRequest::new(
            self.tenant_id,
            self.caller_id.clone(),
            PhoneNumber::parse(callee).unwrap(),
        )
        .with_estimate(300)
    }

    /// Feed everything the provider emitted into the session manager
    async fn pump(&self) {
        for event in self.provider.take_events().await {
            self.sessions
                .handle_provider_event(event)
                .await
                .expect("Provider event rejected");
        }
    }

    async fn step(&self, session: &CallSession, status: ProviderCallStatus) {
        let call_id = session.provider_call_id().unwrap();
        self.provider.advance_call(call_id, status).await.unwrap();
        self.pump().await;
    }

    /// Connect the call, then report it finished after `seconds` of talk time
    async fn talk(&self, session: &CallSession, seconds: u64) {
        self.step(session, ProviderCallStatus::Ringing).await;
        self.step(session, ProviderCallStatus::InProgress).await;

        let call_id = session.provider_call_id().unwrap().clone();
        self.provider.take_events().await;
        let completed = ProviderEvent::new(call_id, ProviderCallStatus::Completed, Utc::now())
            .with_duration(seconds);
        self.sessions.handle_provider_event(completed).await.unwrap();
    }

    /// Poll the session until it reaches `state`
    async fn wait_for_state(&self, session: &CallSession, state: SessionState) -> CallSession {
        for _ in 0..100 {
            let snapshot = self.sessions.snapshot(session.id()).await.unwrap();
            if snapshot.state() == &state {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Session {} never reached {:?}", session.id(), state);
    }
}

#[tokio::test]
async fn test_connected_call_commits_exact_cost() {
    let env = TestEnv::new(0, 100).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    assert_eq!(session.state(), &SessionState::Connecting);
    assert_eq!(session.reserved_credits(), 50);

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 50);
    assert_eq!(account.held(), 50);

    env.talk(&session, 125).await;

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::AwaitingDisposition);
    assert_eq!(snapshot.consumed_seconds(), 125);

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 70);
    assert_eq!(account.balance, 0);
    assert_eq!(account.held(), 0);
    assert_eq!(account.committed(), 30);
    let reservation = account.reservation(session.id()).unwrap();
    assert_eq!(reservation.status, ReservationStatus::Committed);
    assert_eq!(reservation.committed_cost, Some(30));
}

#[tokio::test]
async fn test_busy_call_releases_reservation() {
    let env = TestEnv::new(0, 100).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.step(&session, ProviderCallStatus::Busy).await;

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::Failed(FailureReason::Busy));

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 100);
    assert_eq!(account.held(), 0);

    // Caller id is free again
    let next = env.sessions.start_call(env.request("+14155550124")).await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn test_insufficient_credits_never_dials() {
    let env = TestEnv::new(5, 4).await;

    let result = env.sessions.start_call(env.request("+14155550123")).await;
    assert!(matches!(result, Err(DomainError::InsufficientCredits { .. })));

    assert!(env.provider.calls().await.is_empty());
    assert_eq!(env.session_repo.len().await, 0);

    let account = env.ledger_store.load(&env.tenant_id).await.unwrap().unwrap();
    assert_eq!(account.balance, 5);
    assert_eq!(account.free_allowance_remaining, 4);
}

#[tokio::test]
async fn test_short_balance_reserves_affordable_minutes() {
    let env = TestEnv::new(0, 25).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    assert_eq!(session.reserved_credits(), 20);
    assert_eq!(session.covered_seconds(), 120);

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 5);
}

#[tokio::test]
async fn test_caller_id_must_be_registered_and_free() {
    let env = TestEnv::new(1_000, 0).await;

    let other = PhoneNumber::parse("+14155550999").unwrap();
    let unregistered = StartCallRequest::new(
        env.tenant_id,
        other,
        PhoneNumber::parse("+14155550123").unwrap(),
    );
    assert!(env.sessions.start_call(unregistered).await.is_err());

    let _first = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    let second = env.sessions.start_call(env.request("+14155550124")).await;
    assert!(matches!(second, Err(DomainError::Conflict(_))));
}

#[tokio::test]
async fn test_rejected_dial_fails_and_releases() {
    let env = TestEnv::new(0, 100).await;
    env.provider.reject_next("invalid destination").await;

    let result = env.sessions.start_call(env.request("+14155550123")).await;
    assert!(matches!(result, Err(DomainError::ProviderRejected(_))));

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 100);
    assert_eq!(account.held(), 0);

    let stored = env.sessions.sessions_for_tenant(&env.tenant_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(matches!(stored[0].state(), SessionState::Failed(FailureReason::Rejected(_))));
}

#[tokio::test]
async fn test_operator_end_while_ringing_cancels() {
    let env = TestEnv::new(0, 100).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.step(&session, ProviderCallStatus::Ringing).await;

    env.sessions.end_call(session.id()).await.unwrap();
    env.pump().await;

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::Failed(FailureReason::Canceled));
    assert!(snapshot.end_requested_at().is_some());

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 100);

    // Ending a finished session is a no-op
    env.sessions.end_call(session.id()).await.unwrap();
}

#[tokio::test]
async fn test_in_call_controls() {
    let env = TestEnv::new(0, 100).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();

    // Not connected yet
    assert!(env.sessions.send_digits(session.id(), "1".to_string()).await.is_err());

    env.step(&session, ProviderCallStatus::InProgress).await;

    assert!(env.sessions.toggle_mute(session.id()).await.unwrap());
    env.sessions.send_digits(session.id(), "12#".to_string()).await.unwrap();
    assert!(matches!(
        env.sessions.send_digits(session.id(), String::new()).await,
        Err(DomainError::ValidationError(_))
    ));

    let call = env
        .provider
        .call(session.provider_call_id().unwrap())
        .await
        .unwrap();
    assert!(call.muted);
    assert_eq!(call.digits, "12#");

    assert!(!env.sessions.toggle_mute(session.id()).await.unwrap());
}

#[tokio::test]
async fn test_disposition_is_write_once_and_schedules_follow_up() {
    let env = TestEnv::new(0, 100).await;
    let lead_ref = LeadRef::new("lead-42");
    env.leads
        .insert(Lead {
            lead_ref: lead_ref.clone(),
            phone_number: PhoneNumber::parse("+14155550123").unwrap(),
            display_name: "Ada".to_string(),
            last_contacted_at: None,
        })
        .await;

    let session = env
        .sessions
        .start_call(env.request("+14155550123").with_lead(lead_ref.clone()))
        .await
        .unwrap();
    let lead = env.leads.find(&lead_ref).await.unwrap().unwrap();
    assert!(lead.last_contacted_at.is_some());

    env.talk(&session, 42).await;

    let callback = Utc::now() + ChronoDuration::days(2);
    let outcome = env
        .sessions
        .submit_disposition(
            session.id(),
            DispositionSubmission::new(Disposition::MeetingBooked)
                .with_callback(callback)
                .with_notes("demo on thursday"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.session.state(), &SessionState::Closed);
    let follow_up = outcome.follow_up.expect("Follow-up expected");
    assert_eq!(follow_up.lead_ref, lead_ref);
    assert_eq!(follow_up.scheduled_for, callback);
    assert_eq!(env.follow_ups.all().await.len(), 1);

    let second = env
        .sessions
        .submit_disposition(session.id(), DispositionSubmission::new(Disposition::NoAnswer))
        .await;
    assert!(matches!(second, Err(DomainError::InvalidStateTransition(_))));

    let stored = env.session_repo.find_by_id(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.disposition(), Some(Disposition::MeetingBooked));
    assert_eq!(env.follow_ups.all().await.len(), 1);
}

#[tokio::test]
async fn test_past_callback_creates_no_follow_up() {
    let env = TestEnv::new(0, 100).await;
    let session = env
        .sessions
        .start_call(env.request("+14155550123").with_lead(LeadRef::new("lead-7")))
        .await
        .unwrap();
    env.talk(&session, 30).await;

    let outcome = env
        .sessions
        .submit_disposition(
            session.id(),
            DispositionSubmission::new(Disposition::Callback)
                .with_callback(Utc::now() - ChronoDuration::minutes(5)),
        )
        .await
        .unwrap();

    assert!(outcome.follow_up.is_none());
    assert!(env.follow_ups.all().await.is_empty());
}

#[tokio::test]
async fn test_disposition_timeout_auto_closes() {
    let settings = SessionSettings {
        disposition_timeout: Duration::from_millis(50),
        ..SessionSettings::default()
    };
    let env = TestEnv::with_settings(0, 100, settings).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.talk(&session, 10).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::Closed);
    assert_eq!(snapshot.disposition(), None);
    assert!(snapshot.notes().contains("disposition timeout"));
}

#[tokio::test]
async fn test_end_call_timeout_forces_disconnect() {
    let settings = SessionSettings {
        end_call_timeout: Duration::from_millis(30),
        ..SessionSettings::default()
    };
    let env = TestEnv::with_settings(0, 100, settings).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.step(&session, ProviderCallStatus::Ringing).await;
    env.step(&session, ProviderCallStatus::InProgress).await;

    env.sessions.end_call(session.id()).await.unwrap();
    // The provider's confirmation never arrives
    let unconfirmed = env.provider.take_events().await;
    assert_eq!(unconfirmed.len(), 1);

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::InProgress);
    assert!(snapshot.end_requested_at().is_some());

    let snapshot = env
        .wait_for_state(&session, SessionState::AwaitingDisposition)
        .await;
    assert!(snapshot.consumed_seconds() <= 1);

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.held(), 0);
    assert_eq!(account.free_allowance_remaining + account.committed(), 100);

    // The confirmation finally shows up and changes nothing
    for event in unconfirmed {
        env.sessions.handle_provider_event(event).await.unwrap();
    }
    let late = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(late.state(), &SessionState::AwaitingDisposition);
    assert_eq!(late.consumed_seconds(), snapshot.consumed_seconds());
}

#[tokio::test]
async fn test_duplicate_terminal_event_is_noop() {
    let env = TestEnv::new(0, 100).await;

    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.talk(&session, 125).await;

    let call_id = session.provider_call_id().unwrap().clone();
    let duplicate = ProviderEvent::new(call_id.clone(), ProviderCallStatus::Completed, Utc::now())
        .with_duration(500);
    env.sessions.handle_provider_event(duplicate).await.unwrap();

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::AwaitingDisposition);
    assert_eq!(snapshot.consumed_seconds(), 125);

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 70);
    assert_eq!(account.committed(), 30);

    env.sessions
        .submit_disposition(session.id(), DispositionSubmission::new(Disposition::NoAnswer))
        .await
        .unwrap();

    let after_close = ProviderEvent::new(call_id, ProviderCallStatus::Busy, Utc::now());
    env.sessions.handle_provider_event(after_close).await.unwrap();

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::Closed);
    assert_eq!(snapshot.disposition(), Some(Disposition::NoAnswer));

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 70);
    assert_eq!(account.committed(), 30);
}

#[tokio::test]
async fn test_cap_hangs_up_at_covered_seconds() {
    let env = TestEnv::new(0, 100).await;

    let request = env.request("+14155550123").with_estimate(60);
    let session = env.sessions.start_call(request).await.unwrap();
    assert_eq!(session.covered_seconds(), 60);
    env.step(&session, ProviderCallStatus::Ringing).await;

    // Answered a full minute ago, so the covered time is already used up
    let call_id = session.provider_call_id().unwrap().clone();
    env.provider
        .advance_call(&call_id, ProviderCallStatus::InProgress)
        .await
        .unwrap();
    for mut event in env.provider.take_events().await {
        event.timestamp = Utc::now() - ChronoDuration::seconds(60);
        env.sessions.handle_provider_event(event).await.unwrap();
    }

    let mut hung_up = false;
    for _ in 0..100 {
        let call = env.provider.call(&call_id).await.unwrap();
        if call.status == ProviderCallStatus::Completed {
            hung_up = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(hung_up, "Cap never hung up the call");

    let snapshot = env.sessions.snapshot(session.id()).await.unwrap();
    assert!(snapshot.end_requested_at().is_some());

    env.pump().await;
    let snapshot = env
        .wait_for_state(&session, SessionState::AwaitingDisposition)
        .await;
    assert!(snapshot.consumed_seconds() <= snapshot.covered_seconds());

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.held(), 0);
    assert!(account.committed() <= 10);
}

#[tokio::test]
async fn test_recovery_resumes_live_session() {
    let env = TestEnv::new(0, 100).await;
    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.step(&session, ProviderCallStatus::InProgress).await;

    // A fresh manager over the same stores stands in for a restart
    let restarted = CallSessionManager::new(
        env.ledger.clone(),
        env.provider.clone(),
        env.session_repo.clone(),
        env.leads.clone(),
        Arc::new(DispositionCapture::new(env.follow_ups.clone())),
        EventBroadcaster::new(),
        SessionSettings::default(),
    );
    assert_eq!(restarted.recover().await.unwrap(), 1);

    let recovered = restarted.snapshot(session.id()).await.unwrap();
    assert_eq!(recovered.state(), &SessionState::InProgress);

    let completed = ProviderEvent::new(
        session.provider_call_id().unwrap().clone(),
        ProviderCallStatus::Completed,
        Utc::now(),
    )
    .with_duration(61);
    restarted.handle_provider_event(completed).await.unwrap();

    let snapshot = restarted.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::AwaitingDisposition);

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 80);
}

#[tokio::test]
async fn test_recovery_fails_calls_the_provider_forgot() {
    let env = TestEnv::new(0, 100).await;
    let session = env.sessions.start_call(env.request("+14155550123")).await.unwrap();
    env.step(&session, ProviderCallStatus::Ringing).await;
    env.provider.forget(session.provider_call_id().unwrap()).await;

    let restarted = CallSessionManager::new(
        env.ledger.clone(),
        env.provider.clone(),
        env.session_repo.clone(),
        env.leads.clone(),
        Arc::new(DispositionCapture::new(env.follow_ups.clone())),
        EventBroadcaster::new(),
        SessionSettings::default(),
    );
    restarted.recover().await.unwrap();

    let snapshot = restarted.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.state(), &SessionState::Failed(FailureReason::NoAnswer));

    let account = env.ledger.account(&env.tenant_id).await.unwrap();
    assert_eq!(account.free_allowance_remaining, 100);
}

#[tokio::test]
async fn test_report_counts_human_pickups_by_disposition() {
    let env = TestEnv::new(0, 1_000).await;
    let mut closed = Vec::new();

    for (callee, disposition) in [
        ("+14155550001", Disposition::Interested),
        ("+14155550002", Disposition::LeftVoicemail),
        ("+14155550003", Disposition::Gatekeeper),
    ] {
        let session = env.sessions.start_call(env.request(callee)).await.unwrap();
        env.talk(&session, 60).await;
        let outcome = env
            .sessions
            .submit_disposition(session.id(), DispositionSubmission::new(disposition))
            .await
            .unwrap();
        closed.push(outcome.session);
    }

    let failed = env.sessions.start_call(env.request("+14155550004")).await.unwrap();
    env.step(&failed, ProviderCallStatus::NoAnswer).await;
    closed.push(env.sessions.snapshot(failed.id()).await.unwrap());

    let report = SessionReport::from_sessions(&closed, &[]);
    assert_eq!(report.attempts, 4);
    assert_eq!(report.connected, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.human_pickups, 1);
    assert_eq!(report.voicemail_drops, 1);
    assert_eq!(report.consumed_seconds, 180);
    assert!((report.pickup_rate() - 0.25).abs() < f64::EPSILON);
}
