//! Observe-orient-decide-act controller
//!
//! One cycle:
//! 1. Observe: list resources through the cloud adapter
//! 2. Orient: score every resource on a bounded worker set, asking the
//!    decision router about expensive ones
//! 3. Decide: stage qualifying opportunities in the action ledger, in order
//! 4. Act: apply staged actions on a second bounded worker set
//!
//! Cycles are single-flight and bounded by a cycle deadline. Shutdown
//! cancels the running cycle and refuses new ones.

mod recovery;
mod summary;

#[cfg(test)]
mod tests;

pub use summary::{CycleReport, CycleSummary, RecoveryReport, ResourceError};

use crate::adapter::{quote_spot, CloudAdapter};
use crate::config::{OptimizerConfig, RecoveryPolicy};
use crate::deadline::Deadline;
use crate::engine::DecisionResponse;
use crate::error::{Error, Result};
use crate::learning::{similarity_prefix, LearningStore, MemoryLearningStore};
use crate::ledger::ActionLedger;
use crate::models::{
    Action, ActionKind, ActionParameters, ActionStatus, DecisionOutcome, NewAction, Opportunity,
    ResourceSnapshot, SavingsEvent,
};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::router::OpportunityRouter;
use crate::scoring::vectors::is_compute;
use crate::scoring::{ScoringContext, ScoringEngine};
use crate::tracker::{net_roi, TokenTracker};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Controller tuning, usually derived from [`OptimizerConfig`]
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub cycle_interval: Duration,
    pub cycle_deadline: Duration,
    pub max_observe_workers: usize,
    pub max_decide_workers: usize,
    pub risk_threshold: f64,
    pub min_savings_threshold: f64,
    pub dry_run: bool,
    pub decision_cost_threshold: f64,
    pub min_decision_confidence: f64,
    pub recovery_policy: RecoveryPolicy,
    pub adapter_timeout: Duration,
    pub ledger_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&OptimizerConfig::default())
    }
}

impl From<&OptimizerConfig> for ControllerSettings {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            cycle_interval: config.cycle_interval(),
            cycle_deadline: config.cycle_deadline(),
            max_observe_workers: config.max_observe_workers.max(1),
            max_decide_workers: config.max_decide_workers.max(1),
            risk_threshold: config.risk_threshold,
            min_savings_threshold: config.min_savings_threshold,
            dry_run: config.dry_run,
            decision_cost_threshold: config.decision_cost_threshold,
            min_decision_confidence: config.min_decision_confidence,
            recovery_policy: config.recovery_policy,
            adapter_timeout: config.adapter_timeout(),
            ledger_timeout: config.ledger_timeout(),
        }
    }
}

/// Result of applying one staged action
#[derive(Debug, Clone, PartialEq)]
enum ActOutcome {
    Applied(f64),
    Failed(String),
    Skipped,
    /// Applied, but the ledger refused the completion; the action stays in
    /// progress and recovery re-applies it
    Unrecorded(f64),
    /// Deadline hit mid-apply; the action stays in progress for recovery
    Interrupted,
}

/// Components shared with worker tasks
struct Shared {
    settings: ControllerSettings,
    adapter: Arc<dyn CloudAdapter>,
    ledger: Arc<dyn ActionLedger>,
    learning: Arc<dyn LearningStore>,
    scoring: ScoringEngine,
    router: Option<Arc<dyn OpportunityRouter>>,
    tracker: Option<Arc<TokenTracker>>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

pub struct ControllerBuilder {
    settings: ControllerSettings,
    adapter: Arc<dyn CloudAdapter>,
    ledger: Arc<dyn ActionLedger>,
    learning: Option<Arc<dyn LearningStore>>,
    scoring: ScoringEngine,
    router: Option<Arc<dyn OpportunityRouter>>,
    tracker: Option<Arc<TokenTracker>>,
    logger: Option<StructuredLogger>,
}

impl ControllerBuilder {
    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn learning(mut self, learning: Arc<dyn LearningStore>) -> Self {
        self.learning = Some(learning);
        self
    }

    pub fn scoring(mut self, scoring: ScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn router(mut self, router: Arc<dyn OpportunityRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn tracker(mut self, tracker: Arc<TokenTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Controller {
        let learning = self
            .learning
            .unwrap_or_else(|| Arc::new(MemoryLearningStore::new()));
        Controller {
            shared: Arc::new(Shared {
                settings: self.settings,
                adapter: self.adapter,
                ledger: self.ledger,
                learning,
                scoring: self.scoring,
                router: self.router,
                tracker: self.tracker,
                metrics: OptimizerMetrics::new(),
                logger: self
                    .logger
                    .unwrap_or_else(|| StructuredLogger::new("cost-optimizer")),
            }),
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Releases the single-flight flag when the cycle ends or is dropped
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    running: AtomicBool,
    cycles: AtomicU64,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn builder(adapter: Arc<dyn CloudAdapter>, ledger: Arc<dyn ActionLedger>) -> ControllerBuilder {
        ControllerBuilder {
            settings: ControllerSettings::default(),
            adapter,
            ledger,
            learning: None,
            scoring: ScoringEngine::default(),
            router: None,
            tracker: None,
            logger: None,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.shared.settings
    }

    pub fn ledger(&self) -> &Arc<dyn ActionLedger> {
        &self.shared.ledger
    }

    pub fn learning(&self) -> &Arc<dyn LearningStore> {
        &self.shared.learning
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel the running cycle and refuse new ones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run one cycle, failing with `Transient` if another is in flight
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.start_cycle()
            .await?
            .ok_or_else(|| Error::Transient("a cycle is already running".to_string()))
    }

    /// Run one cycle unless one is already in flight, in which case return
    /// `Ok(None)` immediately
    pub async fn start_cycle(&self) -> Result<Option<CycleReport>> {
        if self.is_shut_down() {
            return Err(Error::Cancelled);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cycle already running, not starting another");
            return Ok(None);
        }
        let _guard = CycleGuard(&self.running);

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline =
            Deadline::with_token(self.shared.settings.cycle_deadline, self.shutdown.child_token());
        let started = Instant::now();

        let result = self.execute(cycle, &deadline).await;
        // Workers still holding the token stop at their next suspension point
        deadline.cancel();

        let elapsed = started.elapsed();
        self.shared.metrics.observe_cycle_duration(elapsed.as_secs_f64());
        match result {
            Ok(mut report) => {
                report.summary.duration_ms = elapsed.as_millis() as u64;
                self.shared.logger.log_cycle_completed(&report.summary);
                self.refresh_gauges().await;
                Ok(Some(report))
            }
            Err(e) => {
                warn!(cycle = cycle, error = %e, elapsed_ms = elapsed.as_millis() as u64, "Cycle aborted");
                Err(e)
            }
        }
    }

    /// Periodic loop: one cycle immediately, then one per interval until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let settings = &self.shared.settings;
        self.shared.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.shared.adapter.name(),
            settings.dry_run,
        );
        info!(
            interval_secs = settings.cycle_interval.as_secs(),
            deadline_secs = settings.cycle_deadline.as_secs(),
            "Starting optimization loop"
        );

        let mut ticker = interval(settings.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = tokio::select! {
                        outcome = self.start_cycle() => outcome,
                        _ = shutdown.recv() => {
                            self.shutdown();
                            break;
                        }
                    };
                    match outcome {
                        Ok(_) => {}
                        Err(Error::Cancelled) if self.is_shut_down() => break,
                        Err(e @ Error::Fatal(_)) => {
                            error!(error = %e, "Fatal error, stopping optimization loop");
                            self.shared.logger.log_shutdown("fatal error");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "Cycle failed, retrying at next tick"),
                    }
                }
                _ = shutdown.recv() => {
                    self.shutdown();
                    break;
                }
            }
        }

        self.shared.logger.log_shutdown("shutdown signal");
        Ok(())
    }

    async fn execute(&self, cycle: u64, deadline: &Deadline) -> Result<CycleReport> {
        let shared = &self.shared;
        let cost_before = shared.session_cost();
        let mut report = CycleReport::default();
        report.summary.cycle = cycle;
        report.summary.dry_run = shared.settings.dry_run;

        // Observe
        let snapshots = deadline
            .run(
                shared.settings.adapter_timeout,
                shared.adapter.fetch_resources(deadline),
            )
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::ObserveFailed(Box::new(other)),
            })?;
        report.summary.scanned = snapshots.len();
        shared.metrics.add_resources_scanned(snapshots.len());
        debug!(cycle = cycle, resources = snapshots.len(), "Observed resources");

        // Orient
        let mut opportunities = self.orient(snapshots, deadline, &mut report).await?;
        report.summary.analysed = opportunities.len();
        shared.metrics.add_opportunities(opportunities.len());

        // Decide
        opportunities.sort_by(|a, b| a.resource_id().cmp(b.resource_id()));
        let staged = shared.decide(&opportunities, deadline, &mut report).await?;

        // Act
        let mut workers = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(shared.settings.max_decide_workers));
        for (action, snapshot) in staged {
            let shared = Arc::clone(shared);
            let semaphore = Arc::clone(&semaphore);
            let deadline = deadline.clone();
            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ActOutcome::Interrupted;
                };
                shared.act(action, snapshot, &deadline).await
            });
        }

        let mut interrupted = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(ActOutcome::Applied(savings)) => {
                    report.summary.applied += 1;
                    report.summary.savings_usd += savings;
                }
                Ok(ActOutcome::Failed(message)) => {
                    debug!(cycle = cycle, error = %message, "Action did not apply");
                    report.summary.failed += 1;
                }
                Ok(ActOutcome::Skipped) => report.summary.skipped += 1,
                Ok(ActOutcome::Unrecorded(savings)) => {
                    warn!(cycle = cycle, savings = savings, "Applied action left in progress");
                    report.summary.unrecorded += 1;
                }
                Ok(ActOutcome::Interrupted) => interrupted = true,
                Err(e) => {
                    error!(error = %e, "Act worker panicked");
                    report.summary.failed += 1;
                }
            }
        }
        if interrupted {
            return Err(Error::Cancelled);
        }

        report.summary.cost_usd = (shared.session_cost() - cost_before).max(0.0);
        report.summary.roi_percent = net_roi(report.summary.savings_usd, report.summary.cost_usd);
        Ok(report)
    }

    /// Score every resource on the observe worker set
    async fn orient(
        &self,
        snapshots: Vec<ResourceSnapshot>,
        deadline: &Deadline,
        report: &mut CycleReport,
    ) -> Result<Vec<Opportunity>> {
        let workers_allowed = self.shared.settings.max_observe_workers;
        let semaphore = Arc::new(Semaphore::new(workers_allowed));
        let (tx, mut rx) = mpsc::channel(workers_allowed);
        let now = Utc::now();

        let mut workers = JoinSet::new();
        for snapshot in snapshots {
            let shared = Arc::clone(&self.shared);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let deadline = deadline.clone();
            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let resource_id = snapshot.resource_id().to_string();
                let result = shared.orient(snapshot, now, &deadline).await;
                let _ = tx.send((resource_id, result)).await;
            });
        }
        drop(tx);

        let mut opportunities = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = deadline.expired() => {
                    workers.abort_all();
                    return Err(Error::Cancelled);
                }
                received = rx.recv() => match received {
                    Some((_, Ok(opportunity))) => opportunities.push(opportunity),
                    Some((_, Err(Error::Cancelled))) => {
                        workers.abort_all();
                        return Err(Error::Cancelled);
                    }
                    Some((resource_id, Err(e))) => {
                        warn!(resource_id = %resource_id, error = %e, "Resource dropped from cycle");
                        report.errors.push(ResourceError::new(resource_id, &e));
                    }
                    None => break,
                },
            }
        }
        Ok(opportunities)
    }

    async fn refresh_gauges(&self) {
        let shared = &self.shared;
        match tokio::time::timeout(shared.settings.ledger_timeout, shared.ledger.stats()).await {
            Ok(Ok(stats)) => shared
                .metrics
                .set_pending_actions(stats.pending + stats.in_progress),
            Ok(Err(e)) => debug!(error = %e, "Could not read ledger stats"),
            Err(_) => debug!("Ledger stats timed out"),
        }
        if let Some(tracker) = &shared.tracker {
            shared.metrics.set_net_roi(tracker.session().net_roi);
        }
    }
}

/// Apply a routed decision to an opportunity
///
/// A verdict can only downgrade the recommendation; a confident engine never
/// turns a monitor into an action.
pub(crate) fn apply_decision(
    opportunity: &mut Opportunity,
    response: &DecisionResponse,
    min_confidence: f64,
) {
    opportunity.model = Some(response.model.clone());
    opportunity.reasoning = response.reasoning.clone();
    opportunity.confidence = response.confidence;

    match response.verdict() {
        Some(ActionKind::NoOp) => opportunity.parameters = ActionParameters::NoOp,
        Some(ActionKind::Monitor) => opportunity.parameters = ActionParameters::Monitor,
        Some(kind) if kind != opportunity.recommendation() => debug!(
            resource_id = %opportunity.resource_id(),
            recommended = %opportunity.recommendation(),
            verdict = %kind,
            "Ignoring verdict that differs from the scored recommendation"
        ),
        _ => {}
    }

    if opportunity.recommendation().is_actionable() && response.confidence < min_confidence {
        opportunity.parameters = ActionParameters::Monitor;
    }
}

/// Run `fut` with only a per-call timeout
async fn bounded<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(Error::Timeout(timeout)))
}

impl Shared {
    fn session_cost(&self) -> f64 {
        self.tracker
            .as_ref()
            .map_or(0.0, |tracker| tracker.session().cost_usd)
    }

    async fn orient(
        &self,
        snapshot: ResourceSnapshot,
        now: DateTime<Utc>,
        deadline: &Deadline,
    ) -> Result<Opportunity> {
        let snapshot = Arc::new(snapshot);
        let prefix = similarity_prefix(snapshot.resource_id());

        let history = match deadline
            .run(
                self.settings.ledger_timeout,
                self.learning.aggregate_for_resource_prefix(prefix),
            )
            .await
        {
            Ok(aggregate) => Some(aggregate),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                debug!(prefix = %prefix, error = %e, "Learning lookup failed, scoring without history");
                None
            }
        };

        let spot = if is_compute(snapshot.kind()) {
            match deadline
                .run(
                    self.settings.adapter_timeout,
                    quote_spot(self.adapter.as_ref(), &snapshot),
                )
                .await
            {
                Ok(quote) => quote,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(resource_id = %snapshot.resource_id(), error = %e, "Spot quote unavailable");
                    None
                }
            }
        } else {
            None
        };

        let mut context = ScoringContext::at(now);
        if let Some(history) = &history {
            context = context.with_history(history);
        }
        if let Some(spot) = &spot {
            context = context.with_spot(spot);
        }
        let mut opportunity = self.scoring.score(snapshot, context)?;

        let worth_asking = opportunity.snapshot.monthly_cost >= self.settings.decision_cost_threshold
            && opportunity.recommendation().is_actionable();
        if let (true, Some(router)) = (worth_asking, &self.router) {
            let routed = router.decide(&opportunity, deadline).await?;
            apply_decision(
                &mut opportunity,
                &routed.response,
                self.settings.min_decision_confidence,
            );
        }
        Ok(opportunity)
    }

    /// Stage qualifying opportunities, one ledger write at a time
    async fn decide(
        &self,
        opportunities: &[Opportunity],
        deadline: &Deadline,
        report: &mut CycleReport,
    ) -> Result<Vec<(Action, Arc<ResourceSnapshot>)>> {
        let mut staged = Vec::new();
        for opportunity in opportunities {
            let qualifies = opportunity.recommendation().is_actionable()
                && opportunity.risk_score <= self.settings.risk_threshold
                && opportunity.estimated_savings >= self.settings.min_savings_threshold;
            if !qualifies {
                debug!(
                    resource_id = %opportunity.resource_id(),
                    recommendation = %opportunity.recommendation(),
                    risk_score = opportunity.risk_score,
                    estimated_savings = opportunity.estimated_savings,
                    "Opportunity not staged"
                );
                continue;
            }

            let new = NewAction::from_opportunity(opportunity);
            match deadline
                .run(self.settings.ledger_timeout, self.ledger.record(new))
                .await
            {
                Ok(action) => {
                    self.metrics.inc_actions_recorded();
                    self.logger.log_action_recorded(&action);
                    report.summary.committed += 1;
                    report.recorded.push(action.id.clone());
                    staged.push((action, Arc::clone(&opportunity.snapshot)));
                }
                Err(Error::Duplicate(fingerprint)) => {
                    if let Some(action) = self.stranded(&fingerprint, deadline).await? {
                        info!(
                            event = "action_resumed",
                            action_id = %action.id,
                            resource_id = %opportunity.resource_id(),
                            "Resuming action left pending by an earlier cycle"
                        );
                        report.summary.resumed += 1;
                        staged.push((action, Arc::clone(&opportunity.snapshot)));
                        continue;
                    }
                    self.metrics.inc_actions_duplicate();
                    report.summary.duplicates += 1;
                    info!(
                        event = "action_duplicate",
                        resource_id = %opportunity.resource_id(),
                        fingerprint = %fingerprint,
                        "Action already in ledger"
                    );
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(resource_id = %opportunity.resource_id(), error = %e, "Failed to stage action");
                    report
                        .errors
                        .push(ResourceError::new(opportunity.resource_id(), &e));
                }
            }
        }
        Ok(staged)
    }

    /// The pending action behind a duplicate fingerprint, if any
    ///
    /// Only a pending action is returned: one that never started because its
    /// cycle ended or its start could not be written.
    async fn stranded(&self, fingerprint: &str, deadline: &Deadline) -> Result<Option<Action>> {
        let found = deadline
            .run(
                self.settings.ledger_timeout,
                self.ledger.find_by_fingerprint(fingerprint),
            )
            .await;
        match found {
            Ok(action) => Ok(action.filter(|a| a.status == ActionStatus::Pending)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Could not look up duplicate action");
                Ok(None)
            }
        }
    }

    async fn act(
        &self,
        action: Action,
        snapshot: Arc<ResourceSnapshot>,
        deadline: &Deadline,
    ) -> ActOutcome {
        if self.settings.dry_run {
            return self.skip(&action, "dry run").await;
        }

        match deadline
            .run(
                self.settings.ledger_timeout,
                self.ledger.mark_started(&action.id, Utc::now()),
            )
            .await
        {
            Ok(()) => {}
            Err(Error::Cancelled) => return ActOutcome::Interrupted,
            Err(e) => {
                warn!(action_id = %action.id, error = %e, "Could not start action, leaving it pending for the next cycle");
                return ActOutcome::Failed(e.to_string());
            }
        }
        self.apply_started(&action, &snapshot, deadline).await
    }

    /// Apply an in-progress action and record how it ended
    async fn apply_started(
        &self,
        action: &Action,
        snapshot: &ResourceSnapshot,
        deadline: &Deadline,
    ) -> ActOutcome {
        let applied = deadline
            .run(
                self.settings.adapter_timeout,
                self.adapter
                    .apply_optimization(snapshot, &action.payload, deadline),
            )
            .await;
        match applied {
            Ok(savings) => self.complete(action, savings.max(0.0)).await,
            Err(Error::Cancelled) => {
                info!(action_id = %action.id, "Cycle ended mid-apply, leaving action in progress");
                ActOutcome::Interrupted
            }
            Err(e) => self.fail(action, &e.to_string()).await,
        }
    }

    async fn complete(&self, action: &Action, savings: f64) -> ActOutcome {
        let timeout = self.settings.ledger_timeout;
        let now = Utc::now();
        if let Err(e) = bounded(timeout, self.ledger.mark_completed(&action.id, now)).await {
            // Applied but not recorded; recovery re-applies idempotently
            warn!(action_id = %action.id, error = %e, "Applied action could not be marked completed");
            return ActOutcome::Unrecorded(savings);
        }

        let event = SavingsEvent {
            action_id: action.id.clone(),
            resource_id: action.resource_id.clone(),
            kind: action.kind,
            estimated: action.estimated_savings,
            actual: Some(savings),
            created_at: now,
        };
        if let Err(e) = bounded(timeout, self.ledger.record_savings(event)).await {
            warn!(action_id = %action.id, error = %e, "Failed to record savings event");
        }
        self.record_outcome(action, savings, true).await;
        if let Some(tracker) = &self.tracker {
            tracker.record_savings(savings);
        }

        self.metrics.inc_actions_applied();
        self.logger.log_action_applied(action, savings);
        ActOutcome::Applied(savings)
    }

    async fn fail(&self, action: &Action, message: &str) -> ActOutcome {
        if let Err(e) = bounded(
            self.settings.ledger_timeout,
            self.ledger.mark_failed(&action.id, Utc::now(), message),
        )
        .await
        {
            warn!(action_id = %action.id, error = %e, "Failed to mark action failed");
        }
        self.record_outcome(action, 0.0, false).await;
        self.metrics.inc_actions_failed();
        self.logger.log_action_failed(action, message);
        ActOutcome::Failed(message.to_string())
    }

    async fn skip(&self, action: &Action, reason: &str) -> ActOutcome {
        match bounded(
            self.settings.ledger_timeout,
            self.ledger.mark_skipped(&action.id, Utc::now(), Some(reason)),
        )
        .await
        {
            Ok(()) => {
                self.metrics.inc_actions_skipped();
                self.logger.log_action_skipped(action, reason);
                ActOutcome::Skipped
            }
            Err(e) => {
                warn!(action_id = %action.id, error = %e, "Failed to mark action skipped");
                ActOutcome::Failed(e.to_string())
            }
        }
    }

    async fn record_outcome(&self, action: &Action, savings: f64, success: bool) {
        let outcome = DecisionOutcome {
            action_id: action.id.clone(),
            resource_id: action.resource_id.clone(),
            kind: action.kind,
            risk_score: action.risk_score,
            actual_savings: savings,
            success,
            created_at: Utc::now(),
        };
        if let Err(e) = bounded(self.settings.ledger_timeout, self.learning.record_outcome(outcome)).await {
            warn!(action_id = %action.id, error = %e, "Failed to record decision outcome");
        }
    }
}
