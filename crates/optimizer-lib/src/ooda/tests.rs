use super::*;
use crate::adapter::SimulatorAdapter;
use crate::cache::MemoryResponseCache;
use crate::engine::{DecisionEngine, Tier};
use crate::error::ErrorKind;
use crate::ledger::{MemoryLedger, RECOVERED_MESSAGE};
use crate::models::ActionStatus;
use crate::router::{DecisionRouter, EnhancedRouter, RouterConfig};
use crate::testing::ScriptedEngine;
use std::sync::atomic::AtomicUsize;

const RIGHTSIZE_ANSWER: &str =
    "Decision: rightsize-smaller\nConfidence: 0.85\nReasoning: idle staging VM\nAlternative: stop";

fn staging_vm() -> ResourceSnapshot {
    ResourceSnapshot::new("aws", "us-east-1", "vm-staging-01", "vm")
        .with_utilisation(0.10, 0.15)
        .with_monthly_cost(100.0)
        .with_label("env", "staging")
}

fn busy_production_vm() -> ResourceSnapshot {
    ResourceSnapshot::new("aws", "us-east-1", "vm-prod-01", "vm")
        .with_utilisation(0.85, 0.82)
        .with_monthly_cost(500.0)
        .with_label("env", "production")
}

fn settings(dry_run: bool) -> ControllerSettings {
    ControllerSettings {
        dry_run,
        ..Default::default()
    }
}

struct Harness {
    controller: Arc<Controller>,
    adapter: Arc<SimulatorAdapter>,
    ledger: Arc<dyn ActionLedger>,
    learning: Arc<MemoryLearningStore>,
    tracker: Arc<TokenTracker>,
}

fn harness(
    adapter: SimulatorAdapter,
    settings: ControllerSettings,
    engines: Vec<Arc<dyn DecisionEngine>>,
) -> Harness {
    harness_with_ledger(adapter, settings, engines, Arc::new(MemoryLedger::new()))
}

fn harness_with_ledger(
    adapter: SimulatorAdapter,
    settings: ControllerSettings,
    engines: Vec<Arc<dyn DecisionEngine>>,
    ledger: Arc<dyn ActionLedger>,
) -> Harness {
    let adapter = Arc::new(adapter);
    let learning = Arc::new(MemoryLearningStore::new());
    let tracker = Arc::new(TokenTracker::default());

    let mut builder = Controller::builder(adapter.clone(), ledger.clone())
        .settings(settings)
        .learning(learning.clone())
        .tracker(tracker.clone());
    if !engines.is_empty() {
        let mut router = DecisionRouter::builder(RouterConfig::default())
            .cache(Arc::new(MemoryResponseCache::new(64)))
            .tracker(tracker.clone());
        for engine in engines {
            router = router.engine(engine);
        }
        let router = EnhancedRouter::new(router.build().unwrap());
        builder = builder.router(Arc::new(router));
    }

    Harness {
        controller: Arc::new(builder.build()),
        adapter,
        ledger,
        learning,
        tracker,
    }
}

/// Memory ledger whose next `mark_started` or `mark_completed` calls fail
#[derive(Default)]
struct FlakyLedger {
    inner: MemoryLedger,
    failing_starts: AtomicUsize,
    failing_completions: AtomicUsize,
}

impl FlakyLedger {
    fn failing_starts(self, count: usize) -> Self {
        self.failing_starts.store(count, Ordering::SeqCst);
        self
    }

    fn failing_completions(self, count: usize) -> Self {
        self.failing_completions.store(count, Ordering::SeqCst);
        self
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl ActionLedger for FlakyLedger {
    async fn record(&self, action: NewAction) -> Result<Action> {
        self.inner.record(action).await
    }

    async fn get(&self, id: &str) -> Result<Action> {
        self.inner.get(id).await
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Action>> {
        self.inner.find_by_fingerprint(fingerprint).await
    }

    async fn list_pending(&self) -> Result<Vec<Action>> {
        self.inner.list_pending().await
    }

    async fn list_actions(&self) -> Result<Vec<Action>> {
        self.inner.list_actions().await
    }

    async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if Self::take(&self.failing_starts) {
            return Err(Error::Transient("database is locked".into()));
        }
        self.inner.mark_started(id, at).await
    }

    async fn mark_completed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if Self::take(&self.failing_completions) {
            return Err(Error::Transient("disk full".into()));
        }
        self.inner.mark_completed(id, at).await
    }

    async fn mark_failed(&self, id: &str, at: DateTime<Utc>, message: &str) -> Result<()> {
        self.inner.mark_failed(id, at, message).await
    }

    async fn mark_skipped(&self, id: &str, at: DateTime<Utc>, reason: Option<&str>) -> Result<()> {
        self.inner.mark_skipped(id, at, reason).await
    }

    async fn record_savings(&self, event: SavingsEvent) -> Result<i64> {
        self.inner.record_savings(event).await
    }

    async fn savings_for_action(&self, action_id: &str) -> Result<Vec<SavingsEvent>> {
        self.inner.savings_for_action(action_id).await
    }

    async fn stats(&self) -> Result<crate::ledger::LedgerStats> {
        self.inner.stats().await
    }
}

fn small_engine(content: &str) -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(Tier::SMALL, "small-model", content))
}

fn shared(engine: &Arc<ScriptedEngine>) -> Arc<dyn DecisionEngine> {
    engine.clone()
}

#[tokio::test]
async fn test_underutilised_instance_is_rightsized() {
    let engine = small_engine(RIGHTSIZE_ANSWER);
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![shared(&engine)],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.scanned, 1);
    assert_eq!(report.summary.analysed, 1);
    assert_eq!(report.summary.committed, 1);
    assert_eq!(report.summary.applied, 1);
    assert_eq!(report.summary.savings_usd, 40.0);
    assert!(report.summary.cost_usd > 0.0);
    assert_eq!(engine.calls(), 1);

    let action = h.ledger.get(&report.recorded[0]).await.unwrap();
    assert_eq!(action.status, ActionStatus::Completed);
    assert_eq!(action.kind, ActionKind::Rightsize);
    assert_eq!(action.payload.recommendation, "rightsize-smaller");
    assert_eq!(action.payload.model.as_deref(), Some("small-model"));
    assert_eq!(action.payload.reasoning.as_deref(), Some("idle staging VM"));
    assert!(action.risk_score <= 5.0);

    let savings = h.ledger.savings_for_action(&action.id).await.unwrap();
    assert_eq!(savings.len(), 1);
    assert_eq!(savings[0].actual, Some(40.0));

    let aggregate = h.learning.aggregate_for_resource_prefix("vm-").await.unwrap();
    assert_eq!(aggregate.success_count, 1);
    assert_eq!(h.tracker.session().savings_usd, 40.0);
}

#[tokio::test]
async fn test_busy_production_instance_is_left_alone() {
    let engine = small_engine(RIGHTSIZE_ANSWER);
    let h = harness(
        SimulatorAdapter::new(vec![busy_production_vm()]),
        settings(false),
        vec![shared(&engine)],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.analysed, 1);
    assert_eq!(report.summary.committed, 0);
    assert!(h.ledger.list_actions().await.unwrap().is_empty());
    // No-op recommendations never reach an engine
    assert_eq!(engine.calls(), 0);
    assert_eq!(h.adapter.apply_count(), 0);
}

#[tokio::test]
async fn test_identical_cycles_stage_one_action() {
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(true),
        vec![shared(&small_engine(RIGHTSIZE_ANSWER))],
    );

    let first = h.controller.run_cycle().await.unwrap();
    let second = h.controller.run_cycle().await.unwrap();

    assert_eq!(first.summary.committed, 1);
    assert_eq!(second.summary.committed, 0);
    assert_eq!(second.summary.duplicates, 1);
    assert_eq!(second.summary.cycle, 2);
    assert_eq!(h.ledger.list_actions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dry_run_never_applies() {
    let h = harness(
        SimulatorAdapter::sample_fleet(),
        settings(true),
        vec![shared(&small_engine(RIGHTSIZE_ANSWER))],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert!(report.summary.committed >= 1);
    assert_eq!(report.summary.skipped, report.summary.committed);
    assert_eq!(report.summary.applied, 0);
    assert_eq!(h.adapter.apply_count(), 0);

    for action in h.ledger.list_actions().await.unwrap() {
        assert_eq!(action.status, ActionStatus::Skipped);
        assert!(h.ledger.savings_for_action(&action.id).await.unwrap().is_empty());
    }
    assert!(h.learning.outcomes().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_decision_stages_nothing() {
    let engine = Arc::new(ScriptedEngine::new(Tier::SMALL, "small-model", RIGHTSIZE_ANSWER).failing(10));
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![shared(&engine)],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.analysed, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].resource_id, "vm-staging-01");
    assert_eq!(report.errors[0].kind, ErrorKind::Unavailable);
    assert!(h.ledger.list_actions().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cascaded_decision_still_stages_action() {
    // Busy enough to land in tier 3, idle enough to stay actionable
    let resource = ResourceSnapshot::new("aws", "us-east-1", "db-staging-01", "rds")
        .with_utilisation(0.10, 0.15)
        .with_monthly_cost(80.0);
    let medium = Arc::new(
        ScriptedEngine::new(Tier::MEDIUM, "medium-model", RIGHTSIZE_ANSWER).failing(3),
    );
    let small = small_engine(RIGHTSIZE_ANSWER);
    let h = harness(
        SimulatorAdapter::new(vec![resource]),
        settings(true),
        vec![shared(&medium), shared(&small)],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(medium.calls(), 3);
    assert_eq!(small.calls(), 1);
    let action = h.ledger.get(&report.recorded[0]).await.unwrap();
    assert_eq!(action.payload.model.as_deref(), Some("small-model"));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_deadline_cancels_engine_call() {
    let engine = Arc::new(
        ScriptedEngine::new(Tier::SMALL, "small-model", RIGHTSIZE_ANSWER)
            .with_delay(Duration::from_secs(10)),
    );
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        ControllerSettings {
            cycle_deadline: Duration::from_secs(2),
            ..settings(false)
        },
        vec![shared(&engine)],
    );

    let err = h.controller.run_cycle().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(h.ledger.list_actions().await.unwrap().is_empty());
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_verdict_and_low_confidence_downgrade() {
    let veto = small_engine("Decision: no-op\nConfidence: 0.9");
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![shared(&veto)],
    );
    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.committed, 0);

    let unsure = Arc::new(
        ScriptedEngine::new(Tier::SMALL, "small-model", "Decision: rightsize-smaller")
            .with_confidence(0.3),
    );
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![shared(&unsure)],
    );
    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.committed, 0);
    assert_eq!(h.adapter.apply_count(), 0);
}

#[tokio::test]
async fn test_cheap_resources_skip_the_router() {
    let engine = small_engine(RIGHTSIZE_ANSWER);
    let cheap = ResourceSnapshot::new("aws", "us-east-1", "vm-cheap-01", "vm")
        .with_utilisation(0.10, 0.15)
        .with_monthly_cost(30.0)
        .with_label("env", "dev");
    let h = harness(
        SimulatorAdapter::new(vec![cheap]),
        settings(false),
        vec![shared(&engine)],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(engine.calls(), 0);
    assert_eq!(report.summary.applied, 1);
    let action = h.ledger.get(&report.recorded[0]).await.unwrap();
    assert_eq!(action.payload.model, None);
}

#[tokio::test]
async fn test_apply_failure_marks_action_failed() {
    let adapter = SimulatorAdapter::new(vec![staging_vm()]);
    adapter.fail_resource("vm-staging-01", "API throttled");
    let h = harness(adapter, settings(false), vec![]);

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.failed, 1);
    let action = h.ledger.get(&report.recorded[0]).await.unwrap();
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.error_message.unwrap().contains("API throttled"));

    let aggregate = h.learning.aggregate_for_resource_prefix("vm-").await.unwrap();
    assert_eq!(aggregate.failure_count, 1);
}

#[tokio::test]
async fn test_failed_action_is_retried_next_cycle() {
    let adapter = SimulatorAdapter::new(vec![staging_vm()]);
    adapter.fail_resource("vm-staging-01", "API throttled");
    let h = harness(adapter, settings(false), vec![]);

    let first = h.controller.run_cycle().await.unwrap();
    assert_eq!(first.summary.failed, 1);

    h.adapter.clear_failures();
    let second = h.controller.run_cycle().await.unwrap();
    assert_eq!(second.summary.committed, 1);
    assert_eq!(second.summary.duplicates, 0);
    assert_eq!(second.summary.applied, 1);
    assert_eq!(h.adapter.apply_count(), 2);

    let retry = h.ledger.get(&second.recorded[0]).await.unwrap();
    assert_eq!(retry.id, format!("{}-2", first.recorded[0]));
    assert_eq!(retry.status, ActionStatus::Completed);
    assert_eq!(
        h.ledger.get(&first.recorded[0]).await.unwrap().status,
        ActionStatus::Failed
    );

    // Once completed the fingerprint stays closed
    let third = h.controller.run_cycle().await.unwrap();
    assert_eq!(third.summary.duplicates, 1);
    assert_eq!(h.adapter.apply_count(), 2);
}

#[tokio::test]
async fn test_action_left_pending_is_resumed() {
    let ledger = Arc::new(FlakyLedger::default().failing_starts(1));
    let h = harness_with_ledger(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![],
        ledger,
    );

    let first = h.controller.run_cycle().await.unwrap();
    assert_eq!(first.summary.committed, 1);
    assert_eq!(first.summary.failed, 1);
    assert_eq!(h.adapter.apply_count(), 0);
    let id = first.recorded[0].clone();
    assert_eq!(h.ledger.get(&id).await.unwrap().status, ActionStatus::Pending);

    let second = h.controller.run_cycle().await.unwrap();
    assert_eq!(second.summary.resumed, 1);
    assert_eq!(second.summary.committed, 0);
    assert_eq!(second.summary.duplicates, 0);
    assert_eq!(second.summary.applied, 1);
    assert_eq!(h.ledger.get(&id).await.unwrap().status, ActionStatus::Completed);
    assert_eq!(h.adapter.apply_count(), 1);
}

#[tokio::test]
async fn test_unwritten_completion_keeps_loop_running() {
    let ledger = Arc::new(FlakyLedger::default().failing_completions(1));
    let h = harness_with_ledger(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![],
        ledger,
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.unrecorded, 1);
    assert_eq!(report.summary.applied, 0);
    assert!(!h.controller.is_shut_down());
    let id = report.recorded[0].clone();
    assert_eq!(h.ledger.get(&id).await.unwrap().status, ActionStatus::InProgress);

    // The next cycle neither restages nor re-applies it
    let next = h.controller.run_cycle().await.unwrap();
    assert_eq!(next.summary.duplicates, 1);
    assert_eq!(h.adapter.apply_count(), 1);

    let recovery = h.controller.recover().await.unwrap();
    assert_eq!(recovery.reapplied, 1);
    assert_eq!(h.ledger.get(&id).await.unwrap().status, ActionStatus::Completed);
    assert_eq!(h.adapter.apply_count(), 2);
}

#[tokio::test]
async fn test_observe_failure_aborts_cycle() {
    struct BrokenAdapter;

    #[async_trait::async_trait]
    impl CloudAdapter for BrokenAdapter {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_resources(&self, _deadline: &Deadline) -> Result<Vec<ResourceSnapshot>> {
            Err(Error::Transient("connection reset".into()))
        }

        async fn get_resource(&self, id: &str, _deadline: &Deadline) -> Result<ResourceSnapshot> {
            Err(Error::NotFound(id.to_string()))
        }

        async fn apply_optimization(
            &self,
            _snapshot: &ResourceSnapshot,
            _payload: &crate::models::ActionPayload,
            _deadline: &Deadline,
        ) -> Result<f64> {
            Ok(0.0)
        }
    }

    let controller = Controller::builder(Arc::new(BrokenAdapter), Arc::new(MemoryLedger::new()))
        .build();
    let err = controller.run_cycle().await.unwrap_err();
    assert!(matches!(err, Error::ObserveFailed(_)));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn test_invalid_snapshot_only_drops_that_resource() {
    let broken = ResourceSnapshot::new("aws", "us-east-1", "vm-bad-01", "vm")
        .with_utilisation(1.7, 0.1)
        .with_monthly_cost(100.0);
    let h = harness(
        SimulatorAdapter::new(vec![broken, staging_vm()]),
        settings(true),
        vec![],
    );

    let report = h.controller.run_cycle().await.unwrap();
    assert_eq!(report.summary.scanned, 2);
    assert_eq!(report.summary.analysed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, ErrorKind::Invalid);
}

#[tokio::test(start_paused = true)]
async fn test_second_cycle_does_not_start_while_one_runs() {
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]).with_latency(Duration::from_secs(5)),
        settings(true),
        vec![],
    );

    let controller = h.controller.clone();
    let first = tokio::spawn(async move { controller.run_cycle().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(h.controller.is_running());
    assert!(h.controller.start_cycle().await.unwrap().is_none());
    assert!(matches!(h.controller.run_cycle().await, Err(Error::Transient(_))));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.summary.committed, 1);
    assert!(!h.controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_running_cycle() {
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]).with_latency(Duration::from_secs(60)),
        settings(true),
        vec![],
    );
    let (tx, rx) = broadcast::channel(1);

    let controller = h.controller.clone();
    let looping = tokio::spawn(async move { controller.run(rx).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.controller.is_running());

    tx.send(()).unwrap();
    looping.await.unwrap().unwrap();

    assert!(h.controller.is_shut_down());
    assert!(!h.controller.is_running());
    assert!(matches!(h.controller.start_cycle().await, Err(Error::Cancelled)));
    assert!(h.ledger.list_actions().await.unwrap().is_empty());
}

async fn interrupted_action(h: &Harness, snapshot: &ResourceSnapshot, started: bool) -> Action {
    let opportunity = ScoringEngine::default()
        .score(Arc::new(snapshot.clone()), ScoringContext::at(Utc::now()))
        .unwrap();
    let action = h
        .ledger
        .record(NewAction::from_opportunity(&opportunity))
        .await
        .unwrap();
    if started {
        h.ledger.mark_started(&action.id, Utc::now()).await.unwrap();
    }
    action
}

#[tokio::test]
async fn test_recovery_reapplies_interrupted_action() {
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        settings(false),
        vec![],
    );
    let action = interrupted_action(&h, &staging_vm(), true).await;

    let report = h.controller.recover().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.reapplied, 1);

    let recovered = h.ledger.get(&action.id).await.unwrap();
    assert_eq!(recovered.status, ActionStatus::Completed);
    assert_eq!(h.adapter.applied(), vec![("vm-staging-01".to_string(), ActionKind::Rightsize)]);
    assert!(h.ledger.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_mark_failed_policy() {
    let h = harness(
        SimulatorAdapter::new(vec![staging_vm()]),
        ControllerSettings {
            recovery_policy: RecoveryPolicy::MarkFailed,
            ..settings(false)
        },
        vec![],
    );
    let action = interrupted_action(&h, &staging_vm(), true).await;

    let report = h.controller.recover().await.unwrap();
    assert_eq!(report.failed, 1);
    let recovered = h.ledger.get(&action.id).await.unwrap();
    assert_eq!(recovered.status, ActionStatus::Failed);
    assert_eq!(recovered.error_message.as_deref(), Some(RECOVERED_MESSAGE));
    assert_eq!(h.adapter.apply_count(), 0);
}

#[tokio::test]
async fn test_recovery_in_dry_run_and_for_missing_resources() {
    let h = harness(SimulatorAdapter::new(vec![]), settings(true), vec![]);
    let pending = interrupted_action(&h, &staging_vm(), false).await;
    let report = h.controller.recover().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.ledger.get(&pending.id).await.unwrap().status, ActionStatus::Skipped);

    let h = harness(SimulatorAdapter::new(vec![]), settings(false), vec![]);
    let started = interrupted_action(&h, &staging_vm(), true).await;
    let report = h.controller.recover().await.unwrap();
    assert_eq!(report.failed, 1);
    let gone = h.ledger.get(&started.id).await.unwrap();
    assert_eq!(gone.status, ActionStatus::Failed);
    assert!(gone.error_message.unwrap().contains("not found"));
}
