

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::models::{
    ExternalSubmissionOutcome, FaultKind, ResolutionFault, ResolutionRequest, ResolutionResult,
    ResolutionStatus, VotingPlace,
};
use super::status::{CapabilityOutcome, compute_status};
use crate::captcha::{ChallengeSite, ChallengeSolver, SolverError, Token, TokenCache};
use crate::core::cache::FailureCircuitCache;
use crate::core::config::ResolverConfig;
use crate::core::retry::RetryPolicy;
use crate::sources::{
    ExternalSink, Registry, SinkError, SourceAdapter, SourceError, SourceQuery, SourceRecord, Submission,
};
use crate::utils::mask_identifier;


/// Anything that turns a request into a result without ever failing the call.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, request: &ResolutionRequest) -> ResolutionResult;
}


#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Bound on one adapter call.
    pub source_timeout: Duration,
    /// Bound on the whole name capability across every source.
    pub name_deadline: Duration,
    pub voting_place_timeout: Duration,
    pub solve_timeout: Duration,
    pub sink_timeout: Duration,
    pub retry: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            source_timeout: Duration::from_secs(config.source_timeout),
            name_deadline: Duration::from_secs(config.name_deadline),
            voting_place_timeout: Duration::from_secs(config.voting_place_timeout),
            solve_timeout: Duration::from_secs(config.solver_timeout),
            sink_timeout: Duration::from_secs(config.sink_timeout),
            retry: RetryPolicy::new(
                config.transient_retries,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default())
    }
}


type NameOutcome = CapabilityOutcome<(String, Registry)>;
type PlaceOutcome = CapabilityOutcome<VotingPlace>;


pub struct ResolutionOrchestrator {
    name_sources: Vec<Arc<dyn SourceAdapter>>,
    authoritative_name_source: Option<Registry>,
    voting_place_source: Option<Arc<dyn SourceAdapter>>,
    token_pools: HashMap<ChallengeSite, Arc<TokenCache>>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    circuit: Arc<FailureCircuitCache>,
    sink: Option<Arc<dyn ExternalSink>>,
    settings: OrchestratorSettings,
}


pub struct OrchestratorBuilder {
    inner: ResolutionOrchestrator,
}

impl OrchestratorBuilder {

    /// Appends a name source; call order is priority order.
    pub fn name_source(mut self, source: Arc<dyn SourceAdapter>) -> Self {
        self.inner.name_sources.push(source);
        self
    }


    pub fn authoritative_name_source(mut self, registry: Registry) -> Self {
        self.inner.authoritative_name_source = Some(registry);
        self
    }

    pub fn voting_place_source(mut self, source: Arc<dyn SourceAdapter>) -> Self {
        self.inner.voting_place_source = Some(source);
        self
    }

    pub fn token_pool(mut self, pool: Arc<TokenCache>) -> Self {
        self.inner.token_pools.insert(pool.site().clone(), pool);
        self
    }

    pub fn solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.inner.solver = Some(solver);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ExternalSink>) -> Self {
        self.inner.sink = Some(sink);
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.inner.settings = settings;
        self
    }

    pub fn build(self) -> ResolutionOrchestrator {
        let o = &self.inner;
        info!(
            "ResolutionOrchestrator initialized: name_sources=[{}], voting_place={}, pools={}, sink={}",
            o.name_sources
                .iter()
                .map(|s| s.registry().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            o.voting_place_source
                .as_ref()
                .map(|s| s.registry().to_string())
                .unwrap_or_else(|| "none".to_string()),
            o.token_pools.len(),
            o.sink.is_some()
        );
        self.inner
    }
}

impl ResolutionOrchestrator {

    pub fn builder(circuit: Arc<FailureCircuitCache>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            inner: Self {
                name_sources: Vec::new(),
                authoritative_name_source: None,
                voting_place_source: None,
                token_pools: HashMap::new(),
                solver: None,
                circuit,
                sink: None,
                settings: OrchestratorSettings::default(),
            },
        }
    }

    pub fn circuit(&self) -> &Arc<FailureCircuitCache> {
        &self.circuit
    }


    pub async fn resolve(&self, request: &ResolutionRequest) -> ResolutionResult {
        let started = Instant::now();
        let identifier = request.identifier.trim();

        let mut result = match AssertUnwindSafe(self.resolve_inner(identifier, request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Resolution of {} panicked: {}", mask_identifier(identifier), message);
                ResolutionResult::failed(
                    identifier,
                    ResolutionFault::new(FaultKind::Internal, format!("unexpected fault: {}", message)),
                )
            }
        };

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }


    async fn resolve_inner(&self, identifier: &str, request: &ResolutionRequest) -> ResolutionResult {
        if self.circuit.is_blocked(identifier) {
            info!("Identifier {} blocked: failed recently", mask_identifier(identifier));
            return ResolutionResult::failed(
                identifier,
                ResolutionFault::new(
                    FaultKind::Blocked,
                    format!(
                        "blocked: identifier failed within the last {} minutes, retry later",
                        self.circuit.cooldown().as_secs() / 60
                    ),
                ),
            );
        }

        info!(
            "Resolving {} (name={}, voting_place={}, external={})",
            mask_identifier(identifier),
            request.want_name,
            request.want_voting_place,
            request.send_to_external
        );

        let name_step = async {
            if request.want_name {
                self.resolve_name(identifier, request.issue_date.as_deref()).await
            } else {
                CapabilityOutcome::Skipped
            }
        };
        let place_step = async {
            if request.want_voting_place {
                self.resolve_voting_place(identifier).await
            } else {
                CapabilityOutcome::Skipped
            }
        };

        let (name, place) = tokio::join!(name_step, place_step);

        let status = compute_status(&name, &place);

        let confirmed_absent = status == ResolutionStatus::NotFound
            && (name.confirmed_by_authority() || place.confirmed_by_authority());
        let refused = status == ResolutionStatus::Error
            && (name.refused_by_authority() || place.refused_by_authority());
        if confirmed_absent || refused {
            self.circuit.record_failure(identifier);
        }

        let error = if status == ResolutionStatus::Error {
            Some(merge_faults(&name, &place))
        } else {
            None
        };

        let (name, name_source) = match name.found() {
            Some((name, source)) => (Some(name), Some(source)),
            None => (None, None),
        };
        let voting_place = place.found();

        let external_submission = if request.send_to_external && (name.is_some() || voting_place.is_some()) {
            Some(
                self.submit_external(identifier, name.as_deref(), voting_place.as_ref())
                    .await,
            )
        } else {
            None
        };

        info!(
            "Resolved {}: status={}, name_source={}",
            mask_identifier(identifier),
            status,
            name_source.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        );

        ResolutionResult {
            identifier: identifier.to_string(),
            name,
            name_source,
            voting_place,
            status,
            error,
            external_submission,
            elapsed_ms: 0,
        }
    }


    /// Priority walk over the name sources; the first non-empty name wins.
    async fn resolve_name(&self, identifier: &str, issue_date: Option<&str>) -> NameOutcome {
        let deadline = Instant::now() + self.settings.name_deadline;
        let authoritative = self
            .authoritative_name_source
            .or_else(|| self.name_sources.first().map(|s| s.registry()));

        let mut answered = false;
        let mut authority_confirmed = false;
        let mut refusals: Vec<String> = Vec::new();
        let mut authority_refused = false;
        let mut failures: Vec<String> = Vec::new();
        let mut timed_out = false;

        for source in &self.name_sources {
            let registry = source.registry();

            if source.requires_issue_date() && issue_date.is_none() {
                debug!("Skipping {}: no issue date supplied", registry);
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Name deadline elapsed before {} was tried", registry);
                timed_out = true;
                break;
            }

            let attempt = tokio::time::timeout(
                remaining,
                self.query_source(source.as_ref(), identifier, issue_date),
            )
            .await;

            let Ok(result) = attempt else {
                warn!(
                    "Name deadline ({}s) elapsed while querying {}",
                    self.settings.name_deadline.as_secs(),
                    registry
                );
                timed_out = true;
                break;
            };

            match result {
                Ok(SourceRecord::Name(name)) if !name.trim().is_empty() => {
                    info!("Name for {} resolved by {}", mask_identifier(identifier), registry);
                    return CapabilityOutcome::Found((name.trim().to_string(), registry));
                }
                Ok(SourceRecord::Name(_)) => {
                    debug!("{} returned an empty name", registry);
                    answered = true;
                }
                Ok(SourceRecord::NotFound) => {
                    debug!("{} has no record", registry);
                    answered = true;
                    authority_confirmed |= Some(registry) == authoritative;
                }
                Ok(SourceRecord::VotingPlace(_)) => {
                    warn!("{} returned a voting place to a name query", registry);
                    failures.push(format!("{}: unexpected record type", registry));
                }
                Err(SourceError::Forbidden(reason)) => {
                    warn!("{} refused the request for {}: {}", registry, mask_identifier(identifier), reason);
                    refusals.push(format!("{} refused the request: {}", registry, reason));
                    authority_refused |= Some(registry) == authoritative;
                }
                Err(e) if e.is_terminal() => {
                    info!("{} rejected {}: {}", registry, mask_identifier(identifier), e);
                    answered = true;
                    authority_confirmed |= Some(registry) == authoritative;
                }
                Err(e) => {
                    warn!("{} failed, trying next source: {}", registry, e);
                    failures.push(format!("{}: {}", registry, e));
                }
            }
        }

        if authority_confirmed {
            return CapabilityOutcome::Absent { authoritative: true };
        }

        if !refusals.is_empty() {
            return CapabilityOutcome::Refused {
                fault: ResolutionFault::new(
                    FaultKind::Refused,
                    refusals.iter().chain(&failures).cloned().collect::<Vec<_>>().join("; "),
                ),
                authoritative: authority_refused,
            };
        }

        if answered {
            return CapabilityOutcome::Absent { authoritative: false };
        }

        if timed_out {
            failures.push(format!(
                "name deadline of {}s elapsed",
                self.settings.name_deadline.as_secs()
            ));
            return CapabilityOutcome::Failed(ResolutionFault::new(FaultKind::Timeout, failures.join("; ")));
        }

        if failures.is_empty() {
            return CapabilityOutcome::Failed(ResolutionFault::new(
                FaultKind::Unavailable,
                "no name source available for this request",
            ));
        }

        CapabilityOutcome::Failed(ResolutionFault::new(FaultKind::Unavailable, failures.join("; ")))
    }


    async fn resolve_voting_place(&self, identifier: &str) -> PlaceOutcome {
        let Some(source) = self.voting_place_source.as_ref() else {
            return CapabilityOutcome::Failed(ResolutionFault::new(
                FaultKind::Unavailable,
                "no voting place source configured",
            ));
        };
        let registry = source.registry();
        let limit = self.settings.voting_place_timeout;

        let Ok(result) =
            tokio::time::timeout(limit, self.query_source(source.as_ref(), identifier, None)).await
        else {
            warn!("Voting place lookup timed out after {}s", limit.as_secs());
            return CapabilityOutcome::Failed(ResolutionFault::new(
                FaultKind::Timeout,
                format!("{}: voting place lookup exceeded {}s", registry, limit.as_secs()),
            ));
        };

        match result {
            Ok(SourceRecord::VotingPlace(place)) => {
                info!("Voting place for {} resolved by {}", mask_identifier(identifier), registry);
                CapabilityOutcome::Found(place)
            }
            Ok(SourceRecord::NotFound) => CapabilityOutcome::Absent { authoritative: true },
            Err(SourceError::Forbidden(reason)) => {
                warn!("{} refused the request for {}: {}", registry, mask_identifier(identifier), reason);
                CapabilityOutcome::Refused {
                    fault: ResolutionFault::new(
                        FaultKind::Refused,
                        format!("{} refused the request: {}", registry, reason),
                    ),
                    authoritative: true,
                }
            }
            Ok(SourceRecord::Name(_)) => CapabilityOutcome::Failed(ResolutionFault::new(
                FaultKind::Internal,
                format!("{}: unexpected record type", registry),
            )),
            Err(e) if e.is_terminal() => {
                info!("{} rejected {}: {}", registry, mask_identifier(identifier), e);
                CapabilityOutcome::Absent { authoritative: true }
            }
            Err(e) => {
                warn!("Voting place lookup via {} failed: {}", registry, e);
                let kind = match e {
                    SourceError::Timeout(_) => FaultKind::Timeout,
                    SourceError::Internal(_) => FaultKind::Internal,
                    _ => FaultKind::Unavailable,
                };
                CapabilityOutcome::Failed(ResolutionFault::new(kind, format!("{}: {}", registry, e)))
            }
        }
    }


    /// One adapter call: token acquisition, per-call timeout, bounded
    /// transient retries and a single fresh-token retry on rejection.
    async fn query_source(
        &self,
        source: &dyn SourceAdapter,
        identifier: &str,
        issue_date: Option<&str>,
    ) -> Result<SourceRecord, SourceError> {
        let registry = source.registry();
        let label: &'static str = registry.into();
        let call_timeout = self.settings.source_timeout;
        let mut fresh_token_retry = true;

        loop {
            let token = match source.challenge() {
                Some(site) => Some(self.obtain_token(site).await?),
                None => None,
            };
            let had_token = token.is_some();

            let query = SourceQuery {
                identifier: identifier.to_string(),
                issue_date: issue_date.map(str::to_string),
                token: token.map(|t| t.value),
            };
            let query = &query;

            let result = self
                .settings
                .retry
                .run(
                    label,
                    move || async move {
                        match tokio::time::timeout(call_timeout, source.lookup(query)).await {
                            Ok(result) => result,
                            Err(_) => Err(SourceError::Timeout(call_timeout)),
                        }
                    },
                    SourceError::is_transient,
                )
                .await;

            match result {
                Err(SourceError::TokenRejected(reason)) if had_token && fresh_token_retry => {
                    warn!("{} rejected the token ({}), retrying once with a fresh one", registry, reason);
                    fresh_token_retry = false;
                }
                Err(SourceError::TokenRejected(reason)) if had_token => {
                    warn!("{} rejected a fresh token as well: {}", registry, reason);
                    return Err(SourceError::Forbidden(format!("fresh token rejected: {}", reason)));
                }
                other => return other,
            }
        }
    }


    async fn obtain_token(&self, site: &ChallengeSite) -> Result<Token, SourceError> {
        let pool = self.token_pools.get(site);

        let result = match (pool, self.solver.as_ref()) {
            (Some(pool), Some(solver)) => pool.acquire(solver.as_ref()).await,
            (Some(pool), None) => pool.try_get(pool.ttl()).ok_or_else(|| {
                SolverError::NotConfigured("token pool empty and no solver configured".to_string())
            }),
            (None, Some(solver)) => {
                match tokio::time::timeout(self.settings.solve_timeout, solver.solve(site)).await {
                    Ok(Ok(value)) => Ok(Token::new(value)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SolverError::Timeout(self.settings.solve_timeout)),
                }
            }
            (None, None) => Err(SolverError::NotConfigured("no challenge solver configured".to_string())),
        };

        result.map_err(|e| {
            warn!("Could not obtain challenge token: {}", e);
            SourceError::Challenge(e.to_string())
        })
    }


    async fn submit_external(
        &self,
        identifier: &str,
        name: Option<&str>,
        voting_place: Option<&VotingPlace>,
    ) -> ExternalSubmissionOutcome {
        let Some(sink) = self.sink.as_ref() else {
            return ExternalSubmissionOutcome {
                called: false,
                error: Some("no external sink configured".to_string()),
                ..Default::default()
            };
        };

        let submission = Submission {
            identifier: identifier.to_string(),
            name: name.map(str::to_string),
            voting_place: voting_place.cloned(),
        };

        match tokio::time::timeout(self.settings.sink_timeout, sink.submit(&submission)).await {
            Ok(Ok(ack)) => ExternalSubmissionOutcome {
                called: true,
                status: ack.status,
                message: ack.message,
                error: None,
            },
            Ok(Err(e)) => {
                warn!("External submission for {} failed: {}", mask_identifier(identifier), e);
                ExternalSubmissionOutcome {
                    called: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
            Err(_) => {
                warn!("External submission for {} timed out", mask_identifier(identifier));
                ExternalSubmissionOutcome {
                    called: false,
                    error: Some(SinkError::Timeout(self.settings.sink_timeout).to_string()),
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl Resolver for ResolutionOrchestrator {
    async fn resolve(&self, request: &ResolutionRequest) -> ResolutionResult {
        ResolutionOrchestrator::resolve(self, request).await
    }
}


fn merge_faults(name: &NameOutcome, place: &PlaceOutcome) -> ResolutionFault {
    let faults: Vec<(&str, &ResolutionFault)> = [("name", name.failure()), ("voting place", place.failure())]
        .into_iter()
        .filter_map(|(label, fault)| fault.map(|f| (label, f)))
        .collect();

    let kind = faults
        .first()
        .map(|(_, f)| f.kind)
        .unwrap_or(FaultKind::Internal);
    let message = faults
        .iter()
        .map(|(label, f)| format!("{}: {}", label, f.message))
        .collect::<Vec<_>>()
        .join(" | ");

    ResolutionFault::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::PoolSettings;
    use crate::sources::SinkAck;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Step {
        Reply(Result<SourceRecord, SourceError>),
        Delay(Duration, Result<SourceRecord, SourceError>),
        Hang,
        Panic,
    }

    struct MockSource {
        registry: Registry,
        challenge: Option<ChallengeSite>,
        requires_issue_date: bool,
        script: Mutex<VecDeque<Step>>,
        fallback: Step,
        calls: AtomicUsize,
        tokens_seen: Mutex<Vec<Option<String>>>,
    }

    impl MockSource {
        fn new(registry: Registry, fallback: Step) -> Self {
            Self {
                registry,
                challenge: None,
                requires_issue_date: false,
                script: Mutex::new(VecDeque::new()),
                fallback,
                calls: AtomicUsize::new(0),
                tokens_seen: Mutex::new(Vec::new()),
            }
        }

        fn replying(registry: Registry, reply: Result<SourceRecord, SourceError>) -> Arc<Self> {
            Arc::new(Self::new(registry, Step::Reply(reply)))
        }

        fn with_script(mut self, steps: Vec<Step>) -> Self {
            self.script = Mutex::new(steps.into());
            self
        }

        fn gated(mut self, site: ChallengeSite) -> Self {
            self.challenge = Some(site);
            self
        }

        fn needing_issue_date(mut self) -> Self {
            self.requires_issue_date = true;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for MockSource {
        fn registry(&self) -> Registry {
            self.registry
        }

        fn challenge(&self) -> Option<&ChallengeSite> {
            self.challenge.as_ref()
        }

        fn requires_issue_date(&self) -> bool {
            self.requires_issue_date
        }

        async fn lookup(&self, query: &SourceQuery) -> Result<SourceRecord, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens_seen.lock().push(query.token.clone());
            let step = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
            match step {
                Step::Reply(reply) => reply,
                Step::Delay(delay, reply) => {
                    tokio::time::sleep(delay).await;
                    reply
                }
                Step::Hang => std::future::pending().await,
                Step::Panic => panic!("adapter bug"),
            }
        }
    }

    struct SequentialSolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChallengeSolver for SequentialSolver {
        async fn solve(&self, _site: &ChallengeSite) -> Result<String, SolverError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("solved-{}", n))
        }

        fn solver_name(&self) -> &str {
            "sequential"
        }
    }

    struct RecordingSink {
        fail: bool,
        received: Mutex<Vec<Submission>>,
    }

    #[async_trait]
    impl ExternalSink for RecordingSink {
        async fn submit(&self, submission: &Submission) -> Result<SinkAck, SinkError> {
            self.received.lock().push(submission.clone());
            if self.fail {
                return Err(SinkError::Rejected("HTTP 500".to_string()));
            }
            Ok(SinkAck {
                status: Some("ok".to_string()),
                message: Some("stored".to_string()),
            })
        }
    }

    struct HangingSink;

    #[async_trait]
    impl ExternalSink for HangingSink {
        async fn submit(&self, _submission: &Submission) -> Result<SinkAck, SinkError> {
            std::future::pending().await
        }
    }

    fn site() -> ChallengeSite {
        ChallengeSite::new("site-key", "https://registry.example.gov.co/identificacion")
    }

    fn circuit() -> Arc<FailureCircuitCache> {
        Arc::new(FailureCircuitCache::new(Duration::from_secs(1200), 100))
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            source_timeout: Duration::from_secs(30),
            name_deadline: Duration::from_secs(120),
            voting_place_timeout: Duration::from_secs(90),
            solve_timeout: Duration::from_secs(60),
            sink_timeout: Duration::from_secs(20),
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
        }
    }

    fn place() -> VotingPlace {
        VotingPlace {
            department: "CUNDINAMARCA".to_string(),
            municipality: "SOACHA".to_string(),
            station_name: "COLEGIO GENERAL SANTANDER".to_string(),
            address: "CRA 7 # 13-40".to_string(),
            table: "8".to_string(),
            zone: "01".to_string(),
        }
    }

    fn name(n: &str) -> Result<SourceRecord, SourceError> {
        Ok(SourceRecord::Name(n.to_string()))
    }

    #[tokio::test]
    async fn test_first_name_source_with_a_name_wins() {
        let a = MockSource::replying(Registry::Sisben, Ok(SourceRecord::NotFound));
        let b = MockSource::replying(Registry::Procuraduria, name("ANA MARIA PEREZ"));
        let c = MockSource::replying(Registry::Policia, name("SOMEONE ELSE"));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(b.clone())
            .name_source(c.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("1020304050")).await;

        assert_eq!(result.status, ResolutionStatus::Success);
        assert_eq!(result.name.as_deref(), Some("ANA MARIA PEREZ"));
        assert_eq!(result.name_source, Some(Registry::Procuraduria));
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_blocked_identifier_short_circuits() {
        let cache = circuit();
        cache.record_failure("1020304050");
        let a = MockSource::replying(Registry::Sisben, name("X"));
        let solver = Arc::new(SequentialSolver { calls: AtomicUsize::new(0) });

        let orchestrator = ResolutionOrchestrator::builder(cache)
            .name_source(a.clone())
            .solver(solver.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::combined(" 1020304050 ")).await;

        assert_eq!(result.status, ResolutionStatus::Error);
        assert!(result.is_blocked());
        assert_eq!(a.calls(), 0);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_timeout_moves_to_next_source() {
        let a = Arc::new(MockSource::new(Registry::Sisben, Step::Hang));
        let b = MockSource::replying(Registry::Procuraduria, name("LUIS GOMEZ"));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(b.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("55667788")).await;

        assert_eq!(result.name_source, Some(Registry::Procuraduria));
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_deadline_stops_iteration() {
        let a = Arc::new(MockSource::new(
            Registry::Sisben,
            Step::Delay(Duration::from_secs(25), Err(SourceError::Timeout(Duration::from_secs(25)))),
        ));
        let b = MockSource::replying(Registry::Procuraduria, name("TOO LATE"));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(b.clone())
            .settings(OrchestratorSettings {
                name_deadline: Duration::from_secs(20),
                ..settings()
            })
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("55667788")).await;

        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(FaultKind::Timeout));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voting_place_survives_slow_name_lookup() {
        let a = Arc::new(MockSource::new(Registry::Sisben, Step::Hang));
        let registraduria = MockSource::replying(Registry::Registraduria, Ok(SourceRecord::VotingPlace(place())));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .voting_place_source(registraduria.clone())
            .settings(OrchestratorSettings {
                source_timeout: Duration::from_secs(300),
                name_deadline: Duration::from_secs(60),
                ..settings()
            })
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::combined("11223344")).await;

        assert_eq!(result.status, ResolutionStatus::PartialSuccess);
        assert_eq!(result.voting_place, Some(place()));
        assert!(result.name.is_none());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_is_retried_once_with_fresh_token() {
        let registraduria = Arc::new(
            MockSource::new(Registry::Registraduria, Step::Reply(Ok(SourceRecord::VotingPlace(place()))))
                .gated(site())
                .with_script(vec![Step::Reply(Err(SourceError::TokenRejected("403".to_string())))]),
        );
        let solver = Arc::new(SequentialSolver { calls: AtomicUsize::new(0) });

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .voting_place_source(registraduria.clone())
            .solver(solver.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::voting_place_only("11223344")).await;

        assert_eq!(result.status, ResolutionStatus::Success);
        assert_eq!(registraduria.calls(), 2);
        assert_eq!(
            *registraduria.tokens_seen.lock(),
            vec![Some("solved-0".to_string()), Some("solved-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_second_token_rejection_is_a_refusal() {
        let registraduria = Arc::new(
            MockSource::new(Registry::Registraduria, Step::Reply(Err(SourceError::TokenRejected("403".to_string()))))
                .gated(site()),
        );
        let solver = Arc::new(SequentialSolver { calls: AtomicUsize::new(0) });

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .voting_place_source(registraduria.clone())
            .solver(solver.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::voting_place_only("11223344")).await;

        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(FaultKind::Refused));
        assert_eq!(registraduria.calls(), 2);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
        assert!(orchestrator.circuit().is_blocked("11223344"));
    }

    #[tokio::test]
    async fn test_pooled_token_is_used_before_solving() {
        let pool = Arc::new(TokenCache::new(site(), PoolSettings::default()));
        pool.put(Token::new("pre-solved"));
        let registraduria = Arc::new(
            MockSource::new(Registry::Registraduria, Step::Reply(Ok(SourceRecord::VotingPlace(place()))))
                .gated(site()),
        );
        let solver = Arc::new(SequentialSolver { calls: AtomicUsize::new(0) });

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .voting_place_source(registraduria.clone())
            .token_pool(pool.clone())
            .solver(solver.clone())
            .settings(settings())
            .build();

        orchestrator.resolve(&ResolutionRequest::voting_place_only("1")).await;
        orchestrator.resolve(&ResolutionRequest::voting_place_only("2")).await;

        let seen = registraduria.tokens_seen.lock().clone();
        assert_eq!(seen, vec![Some("pre-solved".to_string()), Some("solved-0".to_string())]);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_gated_source_without_solver_fails_softly() {
        let gated = Arc::new(MockSource::new(Registry::Sisben, Step::Reply(name("NEVER"))).gated(site()));
        let open = MockSource::replying(Registry::Procuraduria, name("OPEN SOURCE NAME"));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(gated.clone())
            .name_source(open.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("9988")).await;

        assert_eq!(gated.calls(), 0);
        assert_eq!(result.name_source, Some(Registry::Procuraduria));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_boundedly() {
        let flaky = Arc::new(MockSource::new(
            Registry::Sisben,
            Step::Reply(Err(SourceError::Transient("HTTP 502".to_string()))),
        ));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(flaky.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("12345678")).await;

        assert_eq!(flaky.calls(), 3);
        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(FaultKind::Unavailable));
        assert!(!orchestrator.circuit().is_blocked("12345678"));
    }

    #[tokio::test]
    async fn test_authoritative_absence_is_recorded() {
        let a = MockSource::replying(Registry::Sisben, Ok(SourceRecord::NotFound));
        let b = MockSource::replying(Registry::Procuraduria, Ok(SourceRecord::NotFound));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(b.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("10101010")).await;

        assert_eq!(result.status, ResolutionStatus::NotFound);
        assert!(orchestrator.circuit().is_blocked("10101010"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_authoritative_absence_is_not_recorded() {
        let a = MockSource::replying(Registry::Sisben, Err(SourceError::Transient("reset".to_string())));
        let b = MockSource::replying(Registry::Procuraduria, Ok(SourceRecord::NotFound));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(b.clone())
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("20202020")).await;

        assert_eq!(result.status, ResolutionStatus::NotFound);
        assert!(!orchestrator.circuit().is_blocked("20202020"));
    }

    #[tokio::test]
    async fn test_forbidden_voting_place_is_an_error_and_recorded() {
        let registraduria =
            MockSource::replying(Registry::Registraduria, Err(SourceError::Forbidden("HTTP 403".to_string())));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .voting_place_source(registraduria.clone())
            .settings(settings())
            .build();

        let first = orchestrator.resolve(&ResolutionRequest::voting_place_only("30303030")).await;

        assert_eq!(first.status, ResolutionStatus::Error);
        let fault = first.error.clone().unwrap();
        assert_eq!(fault.kind, FaultKind::Refused);
        assert!(fault.message.contains("refused"));
        assert!(fault.message.contains("HTTP 403"));
        assert!(orchestrator.circuit().is_blocked("30303030"));

        let second = orchestrator.resolve(&ResolutionRequest::voting_place_only("30303030")).await;
        assert!(second.is_blocked());
        assert_eq!(registraduria.calls(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_name_source_is_an_error_unless_later_source_answers() {
        let a = MockSource::replying(Registry::Sisben, Err(SourceError::Forbidden("HTTP 403".to_string())));
        let b = MockSource::replying(Registry::Procuraduria, Ok(SourceRecord::NotFound));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(b.clone())
            .settings(settings())
            .build();

        let refused = orchestrator.resolve(&ResolutionRequest::name_only("31313131")).await;

        assert_eq!(refused.status, ResolutionStatus::Error);
        assert_eq!(refused.error.as_ref().map(|e| e.kind), Some(FaultKind::Refused));
        assert_eq!(b.calls(), 1);
        assert!(orchestrator.circuit().is_blocked("31313131"));

        let c = MockSource::replying(Registry::Procuraduria, name("JUAN TORRES"));
        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(c)
            .settings(settings())
            .build();

        let found = orchestrator.resolve(&ResolutionRequest::name_only("32323232")).await;

        assert_eq!(found.status, ResolutionStatus::Success);
        assert_eq!(found.name_source, Some(Registry::Procuraduria));
        assert!(!orchestrator.circuit().is_blocked("32323232"));
    }

    #[tokio::test]
    async fn test_refusal_by_non_authoritative_source_is_not_recorded() {
        let a = MockSource::replying(Registry::Sisben, Err(SourceError::Transient("reset".to_string())));
        let b = MockSource::replying(Registry::Procuraduria, Err(SourceError::Forbidden("HTTP 403".to_string())));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a)
            .name_source(b)
            .settings(OrchestratorSettings {
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                ..settings()
            })
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("33333333")).await;

        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(FaultKind::Refused));
        assert!(!orchestrator.circuit().is_blocked("33333333"));
    }

    #[tokio::test]
    async fn test_issue_date_gates_third_source() {
        let a = MockSource::replying(Registry::Sisben, Ok(SourceRecord::NotFound));
        let c = Arc::new(MockSource::new(Registry::Policia, Step::Reply(name("CARLOS RUIZ"))).needing_issue_date());

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a.clone())
            .name_source(c.clone())
            .settings(settings())
            .build();

        let without = orchestrator.resolve(&ResolutionRequest::name_only("40404040")).await;
        assert_eq!(without.status, ResolutionStatus::NotFound);
        assert_eq!(c.calls(), 0);

        let other = ResolutionRequest::name_only("50505050").with_issue_date("01/02/2010");
        let with = orchestrator.resolve(&other).await;
        assert_eq!(with.name_source, Some(Registry::Policia));
        assert_eq!(c.calls(), 1);
    }

    #[tokio::test]
    async fn test_external_submission_is_annotated() {
        let registraduria = MockSource::replying(Registry::Registraduria, Ok(SourceRecord::VotingPlace(place())));
        let sink = Arc::new(RecordingSink {
            fail: false,
            received: Mutex::new(Vec::new()),
        });

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .voting_place_source(registraduria)
            .sink(sink.clone())
            .settings(settings())
            .build();

        let request = ResolutionRequest::voting_place_only("60606060").with_external(true);
        let result = orchestrator.resolve(&request).await;

        let outcome = result.external_submission.unwrap();
        assert!(outcome.called);
        assert_eq!(outcome.status.as_deref(), Some("ok"));
        assert_eq!(sink.received.lock()[0].voting_place, Some(place()));
    }

    #[tokio::test]
    async fn test_sink_failure_never_changes_status() {
        let a = MockSource::replying(Registry::Sisben, name("ROSA DIAZ"));
        let sink = Arc::new(RecordingSink {
            fail: true,
            received: Mutex::new(Vec::new()),
        });

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a)
            .sink(sink)
            .settings(settings())
            .build();

        let request = ResolutionRequest::name_only("70707070").with_external(true);
        let result = orchestrator.resolve(&request).await;

        assert_eq!(result.status, ResolutionStatus::Success);
        let outcome = result.external_submission.unwrap();
        assert!(!outcome.called);
        assert!(outcome.error.unwrap().contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_timeout_is_reported() {
        let a = MockSource::replying(Registry::Sisben, name("ROSA DIAZ"));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a)
            .sink(Arc::new(HangingSink))
            .settings(settings())
            .build();

        let request = ResolutionRequest::name_only("70707071").with_external(true);
        let result = orchestrator.resolve(&request).await;

        assert_eq!(result.status, ResolutionStatus::Success);
        let outcome = result.external_submission.unwrap();
        assert!(!outcome.called);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_nothing_resolved_means_no_submission() {
        let a = MockSource::replying(Registry::Sisben, Ok(SourceRecord::NotFound));
        let sink = Arc::new(RecordingSink {
            fail: false,
            received: Mutex::new(Vec::new()),
        });

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(a)
            .sink(sink.clone())
            .settings(settings())
            .build();

        let request = ResolutionRequest::name_only("80808080").with_external(true);
        let result = orchestrator.resolve(&request).await;

        assert!(result.external_submission.is_none());
        assert!(sink.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_adapter_panic_becomes_internal_error() {
        let broken = Arc::new(MockSource::new(Registry::Sisben, Step::Panic));

        let orchestrator = ResolutionOrchestrator::builder(circuit())
            .name_source(broken)
            .settings(settings())
            .build();

        let result = orchestrator.resolve(&ResolutionRequest::name_only("90909090")).await;

        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.error.unwrap().kind, FaultKind::Internal);
    }
}
