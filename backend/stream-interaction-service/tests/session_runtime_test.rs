// Session runtime tests
//
// The single-writer task behind a bounded queue:
// 1. Lifecycle ordering through the handle
// 2. Backpressure on a full queue
// 3. Work queued behind stop is discarded and audited
// 4. Envelope sequencing and registry isolation

mod common;

#[cfg(test)]
mod session_runtime_tests {
    use super::common::*;
    use std::sync::Arc;
    use stream_interaction_service::models::{SessionState, SessionSummary};
    use stream_interaction_service::services::{
        InboundOutcome, ManualClock, SandboxPaymentProcessor, SessionRegistry, StaticDirectory,
    };
    use stream_interaction_service::{spawn_session, Config, EngineError, SessionHandle};
    use uuid::Uuid;

    /// Live session whose payments park until `gate.release` fires
    fn gated_session(capacity: usize, clock: &ManualClock) -> (SessionHandle, Arc<GatedProcessor>) {
        let gate = Arc::new(GatedProcessor::default());
        let mut orch = orchestrator_with(&Config::default(), clock, gate.clone());
        orch.initialize_stream(metadata()).unwrap();
        orch.start_live_stream().unwrap();
        (spawn_session(orch, capacity), gate)
    }

    async fn stop_when_drained(handle: &SessionHandle) -> SessionSummary {
        loop {
            match handle.stop().await {
                Err(e) if e.is_retryable() => tokio::task::yield_now().await,
                other => return other.unwrap(),
            }
        }
    }

    #[tokio::test]
    async fn test_lifecycle_through_handle() {
        let clock = ManualClock::default();
        let orch = orchestrator_with(
            &Config::default(),
            &clock,
            Arc::new(SandboxPaymentProcessor::default()),
        );
        let sid = orch.session_id();
        let handle = spawn_session(orch, 8);

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));

        let err = handle.send(chat(sid, "viewer", "too early")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));

        handle.initialize(metadata()).await.unwrap();
        let err = handle.initialize(metadata()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));

        handle.start().await.unwrap();
        assert_eq!(handle.dashboard().await.unwrap().state, SessionState::Live);

        clock.advance_secs(90);
        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.duration_seconds, 90);

        let err = handle.stop().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
        assert_eq!(handle.dashboard().await.unwrap().state, SessionState::Ended);
    }

    #[tokio::test]
    async fn test_join_and_leave_are_idempotent() {
        let clock = ManualClock::default();
        let (handle, _gate) = gated_session(8, &clock);
        let sid = handle.session_id();

        handle.send(join(sid, "viewer-1", "one")).await.unwrap();
        handle.send(join(sid, "viewer-1", "one")).await.unwrap();
        handle.send(join(sid, "sub-1", "claimed-name")).await.unwrap();
        let chat_stats = handle.dashboard().await.unwrap().chat;
        assert_eq!(chat_stats.active_user_count, 2);

        match handle.send(join(sid, "sub-1", "claimed-name")).await.unwrap() {
            InboundOutcome::Joined { user } => {
                assert_eq!(user.username, "claimed-name");
                assert!(user.is_subscriber);
                assert_eq!(user.subscription_tier.as_deref(), Some("tier1"));
            }
            other => panic!("unexpected {:?}", other),
        }

        handle.send(leave(sid, "viewer-1")).await.unwrap();
        handle.send(leave(sid, "viewer-1")).await.unwrap();
        handle.send(leave(sid, "nobody")).await.unwrap();

        let chat_stats = handle.dashboard().await.unwrap().chat;
        assert_eq!(chat_stats.active_user_count, 1);
        assert_eq!(chat_stats.peak_user_count, 2);
    }

    /// Test: capacity 1 with the writer parked in a payment
    ///
    /// Verifies:
    /// - one more event fits in the queue
    /// - the next is rejected with backpressure, not waited on
    /// - the accepted events still get processed
    #[tokio::test]
    async fn test_full_queue_reports_backpressure() {
        let clock = ManualClock::default();
        let (handle, gate) = gated_session(1, &clock);
        let sid = handle.session_id();

        handle.submit(paid(sid, "fan-1", super_chat(10.0, "first"))).unwrap();
        gate.entered.notified().await;

        handle.submit(chat(sid, "viewer-1", "queued")).unwrap();
        let err = handle.submit(chat(sid, "viewer-2", "dropped")).unwrap_err();
        assert!(matches!(err, EngineError::Backpressure { capacity: 1 }));
        assert!(err.is_retryable());

        gate.release.notify_one();
        let summary = stop_when_drained(&handle).await;
        assert_eq!(summary.chat.message_count, 2);
        assert_eq!(summary.revenue.transaction_count, 1);
        assert_eq!(summary.discarded_events, 0);
    }

    /// Test: events already queued when stop arrives are processed,
    /// anything behind stop is discarded and shows up in the export
    #[tokio::test]
    async fn test_events_behind_stop_are_discarded() {
        let clock = ManualClock::default();
        let (handle, gate) = gated_session(8, &clock);
        let sid = handle.session_id();

        handle.submit(paid(sid, "fan-1", super_chat(5.0, "hello"))).unwrap();
        gate.entered.notified().await;
        handle.submit(chat(sid, "viewer-1", "made it")).unwrap();

        let stopper = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.stop().await })
        };
        // let the stopper enqueue before the late event
        tokio::task::yield_now().await;
        handle.submit(chat(sid, "viewer-2", "too late")).unwrap();

        gate.release.notify_one();
        let summary = stopper.await.unwrap().unwrap();
        assert_eq!(summary.chat.message_count, 2);

        let export = handle.export_moderation_logs().await.unwrap();
        assert_eq!(export.discarded_events.len(), 1);
        let discarded = &export.discarded_events[0];
        assert!(discarded.description.contains("viewer-2"));
        assert_eq!(discarded.reason, "queued behind stop");

        let err = handle.send(chat(sid, "viewer-3", "later still")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_envelopes_are_sequenced_per_session() {
        let clock = ManualClock::default();
        let (handle, _gate) = gated_session(16, &clock);
        let sid = handle.session_id();
        let mut events = handle.subscribe();
        let mut dashboard = handle.dashboard_updates();

        handle.send(join(sid, "viewer-1", "one")).await.unwrap();
        handle.send(chat(sid, "viewer-1", "hello")).await.unwrap();
        handle
            .execute(
                OWNER,
                stream_interaction_service::OperatorCommand::WarnUser {
                    user_id: "viewer-1".into(),
                    reason: "be nice".into(),
                },
            )
            .await
            .unwrap();
        handle.stop().await.unwrap();

        // initialize and start were published before this subscriber existed
        let first = events.try_recv().unwrap();
        assert!(first.sequence > 1);
        let mut last = first.sequence;
        let mut count = 1;
        while let Ok(envelope) = events.try_recv() {
            assert_eq!(envelope.session_id, sid);
            assert_eq!(envelope.sequence, last + 1);
            last = envelope.sequence;
            count += 1;
        }
        assert!(count >= 4);

        assert!(dashboard.has_changed().unwrap());
        assert_eq!(dashboard.borrow_and_update().state, SessionState::Ended);
    }

    #[tokio::test]
    async fn test_registry_keeps_sessions_apart() {
        let registry = SessionRegistry::new(
            Config::default(),
            Arc::new(ManualClock::default()),
            Arc::new(SandboxPaymentProcessor::default()),
            Arc::new(StaticDirectory::new()),
        );
        let a = registry.open(Uuid::new_v4()).unwrap();
        let b = registry.open(Uuid::new_v4()).unwrap();
        assert!(registry.open(a.session_id()).is_err());
        assert_eq!(registry.len(), 2);

        for handle in [&a, &b] {
            handle.initialize(metadata()).await.unwrap();
            handle.start().await.unwrap();
        }

        registry.route(chat(a.session_id(), "viewer-1", "hi a")).unwrap();
        registry.route(chat(a.session_id(), "viewer-1", "again a")).unwrap();
        registry.route(chat(b.session_id(), "viewer-1", "hi b")).unwrap();
        let err = registry.route(chat(Uuid::new_v4(), "viewer-1", "lost")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let summary_a = registry.close(a.session_id()).await.unwrap();
        assert_eq!(summary_a.chat.message_count, 2);
        assert_eq!(b.dashboard().await.unwrap().chat.message_count, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(a.session_id()).is_none());
    }
}
