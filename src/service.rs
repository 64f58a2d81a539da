

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::captcha::{ChallengeSolver, PoolSettings, PoolStats, TokenCache, TwoCaptchaSolver};
use crate::core::cache::{CircuitStats, FailureCircuitCache};
use crate::core::config::ResolverConfig;
use crate::core::error::{ResolverError, Result};
use crate::resolution::{
    OrchestratorSettings, ResolutionOrchestrator, ResolutionRequest, ResolutionResult, Resolver,
};
use crate::sources::{ExternalSink, HttpSink, SourceAdapter};
use crate::tasks::{BulkTask, BulkTaskManager, FileTaskStore, ManagerSettings, TaskKind, TaskStore, TaskSummary};
use crate::worker::{HttpPendingQueue, QueueWorker, WorkerSettings, WorkerStats};


lazy_static! {
    static ref IDENTIFIER_PATTERN: Option<Regex> = Regex::new(r"^[0-9]{4,15}$").ok();
    static ref ISSUE_DATE_PATTERN: Option<Regex> = Regex::new(r"^\d{2}/\d{2}/\d{4}$").ok();
}


/// Trimmed identifier if it is 4 to 15 ASCII digits.
pub fn validate_identifier(identifier: &str) -> Result<String> {
    let trimmed = identifier.trim();
    let valid = IDENTIFIER_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(trimmed));
    if !valid {
        return Err(ResolverError::validation(format!(
            "identifier must be 4 to 15 digits, got {:?}",
            crate::utils::safe_truncate(trimmed, 20)
        )));
    }
    Ok(trimmed.to_string())
}


/// `dd/mm/yyyy`, a real calendar date.
pub fn validate_issue_date(issue_date: &str) -> Result<String> {
    let trimmed = issue_date.trim();
    let shaped = ISSUE_DATE_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(trimmed));
    if !shaped || NaiveDate::parse_from_str(trimmed, "%d/%m/%Y").is_err() {
        return Err(ResolverError::validation(format!(
            "issue date must be dd/mm/yyyy, got {:?}",
            crate::utils::safe_truncate(trimmed, 20)
        )));
    }
    Ok(trimmed.to_string())
}


/// Adapters and collaborators supplied by the embedding application.
pub struct ServiceParts {
    /// Priority order.
    pub name_sources: Vec<Arc<dyn SourceAdapter>>,
    pub voting_place_source: Option<Arc<dyn SourceAdapter>>,
    pub solver: Option<Arc<dyn ChallengeSolver>>,
    pub sink: Option<Arc<dyn ExternalSink>>,
    pub store: Arc<dyn TaskStore>,
}


/// Entry point for the serving layer: single lookups and bulk tasks.
pub struct ResolverService {
    config: ResolverConfig,
    orchestrator: Arc<ResolutionOrchestrator>,
    tasks: BulkTaskManager,
    circuit: Arc<FailureCircuitCache>,
    token_pool: Arc<TokenCache>,
    solver: Option<Arc<dyn ChallengeSolver>>,
}

impl ResolverService {

    pub fn new(config: ResolverConfig, parts: ServiceParts) -> Result<Self> {
        config.validate()?;

        let circuit = Arc::new(FailureCircuitCache::new(
            config.failure_cooldown(),
            config.failure_cache_capacity,
        ));
        let token_pool = Arc::new(TokenCache::new(
            config.challenge_site(),
            PoolSettings {
                capacity: config.token_pool_capacity,
                low_water: config.token_pool_low_water,
                ttl: config.token_ttl(),
                refill_interval: Duration::from_millis(config.token_refill_interval_ms),
                solve_timeout: Duration::from_secs(config.solver_timeout),
            },
        ));

        let mut builder = ResolutionOrchestrator::builder(Arc::clone(&circuit))
            .token_pool(Arc::clone(&token_pool))
            .settings(OrchestratorSettings::from_config(&config));
        for source in parts.name_sources {
            builder = builder.name_source(source);
        }
        if let Some(source) = parts.voting_place_source {
            builder = builder.voting_place_source(source);
        }
        if let Some(solver) = parts.solver.as_ref() {
            builder = builder.solver(Arc::clone(solver));
        }
        if let Some(sink) = parts.sink {
            builder = builder.sink(sink);
        }
        let orchestrator = Arc::new(builder.build());

        let tasks = BulkTaskManager::new(
            parts.store,
            Arc::clone(&orchestrator) as Arc<dyn Resolver>,
            ManagerSettings::from_config(&config),
        );

        info!(
            "ResolverService initialized: solver={}, cooldown={}s",
            parts
                .solver
                .as_ref()
                .map(|s| s.solver_name().to_string())
                .unwrap_or_else(|| "none".to_string()),
            config.failure_cooldown
        );

        Ok(Self {
            config,
            orchestrator,
            tasks,
            circuit,
            token_pool,
            solver: parts.solver,
        })
    }


    /// Wires the HTTP solver, sink and file-backed task store from config.
    pub async fn from_config(
        config: ResolverConfig,
        name_sources: Vec<Arc<dyn SourceAdapter>>,
        voting_place_source: Option<Arc<dyn SourceAdapter>>,
    ) -> Result<Self> {
        let solver: Option<Arc<dyn ChallengeSolver>> = match config.captcha_api_key.as_deref() {
            Some(key) => Some(Arc::new(
                TwoCaptchaSolver::new(key, &config.captcha_service_url)
                    .map_err(|e| ResolverError::Config(e.to_string()))?,
            )),
            None => {
                warn!("No challenge solver API key configured; gated sources will fail");
                None
            }
        };

        let sink: Option<Arc<dyn ExternalSink>> = match config.external_sink_url.as_deref() {
            Some(url) => Some(Arc::new(
                HttpSink::new(url, Duration::from_secs(config.sink_timeout))
                    .map_err(|e| ResolverError::Config(e.to_string()))?,
            )),
            None => None,
        };

        let store = Arc::new(FileTaskStore::open(&config.tasks_dir).await?);

        Self::new(
            config,
            ServiceParts {
                name_sources,
                voting_place_source,
                solver,
                sink,
                store,
            },
        )
    }


    /// Pre-fills the token pool and starts its background filler.
    pub async fn start(&self) -> usize {
        let Some(solver) = self.solver.as_ref() else {
            return 0;
        };
        let warmed = self
            .token_pool
            .warmup(self.config.token_warmup, solver.as_ref())
            .await;
        self.token_pool.start_background_filler(Arc::clone(solver));
        warmed
    }

    pub fn shutdown(&self) {
        self.token_pool.stop_filler();
    }


    pub async fn resolve(&self, request: ResolutionRequest) -> Result<ResolutionResult> {
        let mut request = request;
        request.identifier = validate_identifier(&request.identifier)?;
        request.issue_date = request
            .issue_date
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(validate_issue_date)
            .transpose()?;

        Ok(self.orchestrator.resolve(&request).await)
    }


    /// Creates the task and runs it detached; returns immediately.
    pub async fn create_bulk_task(&self, identifiers: Vec<String>, kind: TaskKind) -> Result<Uuid> {
        let identifiers = identifiers
            .iter()
            .map(|i| validate_identifier(i))
            .collect::<Result<Vec<_>>>()?;

        let task_id = self.tasks.create_task(identifiers, kind).await?;
        self.tasks.spawn_task(task_id);
        Ok(task_id)
    }

    pub async fn get_bulk_task(&self, task_id: Uuid) -> Result<BulkTask> {
        self.tasks.get_task(task_id).await
    }

    pub async fn delete_bulk_task(&self, task_id: Uuid) -> Result<bool> {
        self.tasks.delete_task(task_id).await
    }

    pub async fn list_bulk_tasks(&self, kind: Option<TaskKind>) -> Result<Vec<TaskSummary>> {
        self.tasks.list_tasks(kind).await
    }


    /// Starts the pending-queue worker when a queue URL and token are set.
    pub fn spawn_queue_worker(&self, shutdown: CancellationToken) -> Result<Option<JoinHandle<WorkerStats>>> {
        let (Some(url), Some(token)) = (
            self.config.queue_url.as_deref(),
            self.config.queue_api_token.as_deref(),
        ) else {
            info!("Queue worker disabled: QUEUE_URL or QUEUE_API_TOKEN missing");
            return Ok(None);
        };

        let queue = HttpPendingQueue::new(url, token, Duration::from_secs(30))
            .map_err(|e| ResolverError::Config(e.to_string()))?;
        let worker = QueueWorker::new(
            Arc::new(queue),
            Arc::clone(&self.orchestrator) as Arc<dyn Resolver>,
            Arc::clone(&self.circuit),
            WorkerSettings::from_config(&self.config),
        );

        Ok(Some(tokio::spawn(async move { worker.run(shutdown).await })))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.token_pool.stats()
    }

    pub fn circuit_stats(&self) -> CircuitStats {
        self.circuit.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert_eq!(validate_identifier("  1020304050 ").unwrap(), "1020304050");
        assert!(validate_identifier("1234").is_ok());
        assert!(validate_identifier("123456789012345").is_ok());

        for bad in ["", "123", "1234567890123456", "10203O4050", "-1234", "12 34"] {
            assert!(
                matches!(validate_identifier(bad), Err(ResolverError::Validation(_))),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_issue_date_validation() {
        assert_eq!(validate_issue_date("01/02/2010").unwrap(), "01/02/2010");
        assert!(validate_issue_date("31/02/2010").is_err());
        assert!(validate_issue_date("2010-02-01").is_err());
        assert!(validate_issue_date("1/2/2010").is_err());
    }
}
