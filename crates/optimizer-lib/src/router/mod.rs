//! Risk-tiered decision routing
//!
//! The router picks a tier from the opportunity's risk, serves from the
//! response cache when it can, and otherwise calls the tier's engine with
//! bounded retries. An exhausted tier cascades to the next cheaper tier that
//! has an engine; routing never escalates to a more expensive tier.

pub mod enhanced;
pub mod prompt;

pub use enhanced::EnhancedRouter;

use crate::cache::{cache_key, ResponseCache};
use crate::deadline::Deadline;
use crate::engine::{DecisionEngine, DecisionRequest, DecisionResponse, Tier};
use crate::error::{Error, Result};
use crate::models::Opportunity;
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::tracker::TokenTracker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Lower risk bounds of tiers 2 to 5
    pub tier_thresholds: [f64; 4],
    pub retry_max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    /// Per-call engine timeout, indexed by tier
    pub engine_timeouts: [Duration; 5],
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tier_thresholds: [3.0, 5.0, 7.0, 9.0],
            retry_max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(3600),
            cache_timeout: Duration::from_secs(1),
            engine_timeouts: [30, 45, 60, 90, 120].map(Duration::from_secs),
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

impl RouterConfig {
    pub fn engine_timeout(&self, tier: Tier) -> Duration {
        self.engine_timeouts[tier.index()]
    }

    /// Sleep before `attempt` (1-based); zero for the first attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(20);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Tier for a risk score; NaN maps to the cheapest tier
pub fn select_tier(thresholds: &[f64; 4], risk: f64) -> Tier {
    if risk.is_nan() {
        return Tier::HEURISTIC;
    }
    let band = thresholds.iter().take_while(|bound| risk >= **bound).count();
    Tier::ALL[band]
}

/// A decision together with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedDecision {
    pub response: DecisionResponse,
    pub requested_tier: Tier,
    pub served_tier: Tier,
    pub cached: bool,
    pub cache_key: String,
}

/// Anything that can turn a scored opportunity into a decision
#[async_trait]
pub trait OpportunityRouter: Send + Sync {
    async fn decide(&self, opportunity: &Opportunity, deadline: &Deadline)
        -> Result<RoutedDecision>;
}

pub struct DecisionRouterBuilder {
    config: RouterConfig,
    engines: BTreeMap<Tier, Arc<dyn DecisionEngine>>,
    cache: Option<Arc<dyn ResponseCache>>,
    tracker: Option<Arc<TokenTracker>>,
    logger: Option<StructuredLogger>,
}

impl DecisionRouterBuilder {
    /// Register an engine under its own tier, replacing any previous one
    pub fn engine(mut self, engine: Arc<dyn DecisionEngine>) -> Self {
        self.engines.insert(engine.tier(), engine);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
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

    pub fn build(self) -> Result<DecisionRouter> {
        if self.engines.is_empty() {
            return Err(Error::Invalid("router needs at least one engine".to_string()));
        }
        if self.config.retry_max_attempts == 0 {
            return Err(Error::Invalid("retry_max_attempts must be at least 1".to_string()));
        }
        let cache = self.cache.ok_or_else(|| {
            Error::Invalid("router needs a response cache".to_string())
        })?;
        Ok(DecisionRouter {
            config: self.config,
            engines: self.engines,
            cache,
            tracker: self.tracker,
            metrics: OptimizerMetrics::new(),
            logger: self.logger.unwrap_or_else(|| StructuredLogger::new("router")),
        })
    }
}

/// Core router: tier selection, cache, retries and cascade
pub struct DecisionRouter {
    config: RouterConfig,
    engines: BTreeMap<Tier, Arc<dyn DecisionEngine>>,
    cache: Arc<dyn ResponseCache>,
    tracker: Option<Arc<TokenTracker>>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl DecisionRouter {
    pub fn builder(config: RouterConfig) -> DecisionRouterBuilder {
        DecisionRouterBuilder {
            config,
            engines: BTreeMap::new(),
            cache: None,
            tracker: None,
            logger: None,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.engines.keys().copied()
    }

    pub fn select_tier(&self, risk: f64) -> Tier {
        select_tier(&self.config.tier_thresholds, risk)
    }

    /// Next cheaper tier below `tier` with a registered engine
    fn next_tier(&self, tier: Tier) -> Option<Tier> {
        self.engines.range(..tier).next_back().map(|(t, _)| *t)
    }

    /// Obtain a decision for a rendered prompt
    pub async fn route(&self, prompt: &str, risk: f64, deadline: &Deadline) -> Result<RoutedDecision> {
        let requested = self.select_tier(risk);
        let key = cache_key(prompt);

        if let Some(hit) = self.lookup(&key, deadline).await? {
            self.metrics.inc_cache_hits();
            let served = hit.response.tier;
            debug!(key = %key, model = %hit.response.model, "Decision served from cache");
            return Ok(RoutedDecision {
                response: hit.response,
                requested_tier: requested,
                served_tier: served,
                cached: true,
                cache_key: key,
            });
        }
        self.metrics.inc_cache_misses();

        let mut request = DecisionRequest::new(prompt)
            .with_metadata("risk_score", format!("{risk:.2}"))
            .with_metadata("requested_tier", requested.to_string());
        request.max_tokens = self.config.max_tokens;
        request.temperature = self.config.temperature;

        let mut tier = self
            .engines
            .contains_key(&requested)
            .then_some(requested)
            .or_else(|| self.next_tier(requested));
        let mut last_error = None;

        while let Some(current) = tier {
            let Some(engine) = self.engines.get(&current) else {
                break;
            };
            match self.call_tier(engine.as_ref(), &request, deadline).await {
                Ok(response) => {
                    if let Some(tracker) = &self.tracker {
                        tracker.record_usage(
                            &response.model,
                            current,
                            response.tokens_used,
                            response.cost,
                        );
                    }
                    self.store(&key, &response, deadline).await;
                    return Ok(RoutedDecision {
                        response,
                        requested_tier: requested,
                        served_tier: current,
                        cached: false,
                        cache_key: key,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    let next = self.next_tier(current);
                    self.metrics.inc_tier_cascades();
                    self.logger.log_tier_cascade(current, next, &e.to_string());
                    last_error = Some(e);
                    tier = next;
                }
            }
        }

        Err(Error::Unavailable(match last_error {
            Some(e) => format!("all tiers at or below {requested} failed, last error: {e}"),
            None => format!("no engine registered at or below {requested}"),
        }))
    }

    /// Route an opportunity through its rendered prompt
    pub async fn route_opportunity(
        &self,
        opportunity: &Opportunity,
        deadline: &Deadline,
    ) -> Result<RoutedDecision> {
        let prompt = prompt::render(opportunity);
        let routed = self.route(&prompt, opportunity.risk_score, deadline).await?;
        self.logger.log_decision_routed(
            opportunity.resource_id(),
            routed.requested_tier,
            routed.served_tier,
            &routed.response.model,
            routed.cached,
            routed.response.confidence,
            if routed.cached { 0.0 } else { routed.response.cost },
        );
        Ok(routed)
    }

    /// Up to `retry_max_attempts` calls against one engine
    async fn call_tier(
        &self,
        engine: &dyn DecisionEngine,
        request: &DecisionRequest,
        deadline: &Deadline,
    ) -> Result<DecisionResponse> {
        let tier = engine.tier();
        let timeout = self.config.engine_timeout(tier);
        let mut last_error = None;

        for attempt in 1..=self.config.retry_max_attempts {
            if attempt > 1 {
                deadline.sleep(self.config.backoff_for(attempt)).await?;
            }

            let started = Instant::now();
            match deadline.run(timeout, engine.analyse(request, deadline)).await {
                Ok(response) => {
                    self.metrics
                        .observe_engine_latency(tier, started.elapsed().as_secs_f64());
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    debug!(
                        tier = tier.get(),
                        model = %engine.model(),
                        attempt = attempt,
                        error = %e,
                        "Decision engine attempt failed"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Unavailable(format!("{tier} made no attempt"))))
    }

    /// Cache read; anything but cancellation counts as a miss
    async fn lookup(
        &self,
        key: &str,
        deadline: &Deadline,
    ) -> Result<Option<crate::cache::CachedResponse>> {
        match deadline.run(self.config.cache_timeout, self.cache.get(key)).await {
            Ok(found) => Ok(found),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(key = %key, error = %e, "Decision cache lookup failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn store(&self, key: &str, response: &DecisionResponse, deadline: &Deadline) {
        let put = self.cache.put(key, response.clone(), self.config.cache_ttl);
        if let Err(e) = deadline.run(self.config.cache_timeout, put).await {
            warn!(key = %key, error = %e, "Failed to cache decision");
        }
    }
}

#[async_trait]
impl OpportunityRouter for DecisionRouter {
    async fn decide(
        &self,
        opportunity: &Opportunity,
        deadline: &Deadline,
    ) -> Result<RoutedDecision> {
        self.route_opportunity(opportunity, deadline).await
    }
}

#[cfg(test)]
mod tests;
