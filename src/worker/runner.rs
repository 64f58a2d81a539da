

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{LookupReport, PendingLookup, PendingQueue, QueueError};
use crate::core::cache::FailureCircuitCache;
use crate::core::config::ResolverConfig;
use crate::resolution::{ResolutionRequest, ResolutionResult, ResolutionStatus, Resolver};
use crate::service::validate_identifier;
use crate::utils::mask_identifier;


#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Queue type to pull; `registraduria` asks for voting places only.
    pub kind: String,
    pub batch_size: usize,
    pub pacing: Duration,
    pub idle_wait: Duration,
    pub batch_wait: Duration,
    pub error_wait: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            kind: config.queue_kind.clone(),
            batch_size: config.queue_batch_size.max(1),
            pacing: config.item_pacing(),
            ..Self::default()
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            kind: "registraduria".to_string(),
            batch_size: 2,
            pacing: Duration::from_secs(2),
            idle_wait: Duration::from_secs(30),
            batch_wait: Duration::from_secs(5),
            error_wait: Duration::from_secs(10),
        }
    }
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles: u64,
    pub processed: u64,
    pub acknowledged: u64,
    pub report_failures: u64,
    pub fetch_errors: u64,
    pub swept: u64,
    /// Entries reported as failed without a lookup: malformed identifier.
    pub rejected: u64,
}


/// Long-running loop draining the remote pending-lookup queue.
pub struct QueueWorker {
    queue: Arc<dyn PendingQueue>,
    resolver: Arc<dyn Resolver>,
    circuit: Arc<FailureCircuitCache>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn PendingQueue>,
        resolver: Arc<dyn Resolver>,
        circuit: Arc<FailureCircuitCache>,
        settings: WorkerSettings,
    ) -> Self {
        info!(
            "QueueWorker initialized: kind={}, batch_size={}, pacing={}ms",
            settings.kind,
            settings.batch_size,
            settings.pacing.as_millis()
        );

        Self {
            queue,
            resolver,
            circuit,
            settings,
        }
    }


    /// Runs until `shutdown` is cancelled. Never returns early on errors.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!("QueueWorker started");

        while !shutdown.is_cancelled() {
            stats.cycles += 1;

            let wait = match self.run_once(&shutdown, &mut stats).await {
                Ok(0) => {
                    debug!("No pending lookups, waiting {}s", self.settings.idle_wait.as_secs());
                    self.settings.idle_wait
                }
                Ok(_) => self.settings.batch_wait,
                Err(e) => {
                    error!("Queue cycle failed: {}", e);
                    stats.fetch_errors += 1;
                    self.settings.error_wait
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(
            "QueueWorker stopped: cycles={}, processed={}, acknowledged={}",
            stats.cycles, stats.processed, stats.acknowledged
        );
        stats
    }


    /// One fetch-resolve-report cycle. Returns the number of lookups handled.
    pub async fn run_once(&self, shutdown: &CancellationToken, stats: &mut WorkerStats) -> Result<usize, QueueError> {
        let swept = self.circuit.sweep();
        if swept > 0 {
            debug!("Swept {} expired failure entries", swept);
        }
        stats.swept += swept as u64;

        let pending = self
            .queue
            .fetch_pending(&self.settings.kind, self.settings.batch_size)
            .await?;

        let mut handled = 0;
        for (index, lookup) in pending.iter().enumerate() {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, leaving {} lookups queued", pending.len() - index);
                break;
            }
            if index > 0 && !self.settings.pacing.is_zero() {
                tokio::time::sleep(self.settings.pacing).await;
            }

            let report = match validate_identifier(&lookup.identifier) {
                Ok(identifier) => {
                    let result = self.resolver.resolve(&self.request_for(&identifier)).await;
                    self.report_for(lookup, &result)
                }
                Err(e) => {
                    warn!("Entry {} skipped: {}", lookup.queue_id, e);
                    stats.rejected += 1;
                    self.rejection_for(lookup, e.to_string())
                }
            };
            stats.processed += 1;
            handled += 1;

            match self.queue.report(&report).await {
                Ok(true) => stats.acknowledged += 1,
                Ok(false) => stats.report_failures += 1,
                Err(e) => {
                    warn!("Could not report entry {}: {}", lookup.queue_id, e);
                    stats.report_failures += 1;
                }
            }
        }

        Ok(handled)
    }


    fn request_for(&self, identifier: &str) -> ResolutionRequest {
        match self.settings.kind.as_str() {
            "registraduria" => ResolutionRequest::voting_place_only(identifier),
            "nombre" => ResolutionRequest::name_only(identifier),
            _ => ResolutionRequest::combined(identifier),
        }
    }


    fn rejection_for(&self, lookup: &PendingLookup, reason: String) -> LookupReport {
        LookupReport {
            queue_id: lookup.queue_id.clone(),
            identifier: lookup.identifier.clone(),
            kind: self.settings.kind.clone(),
            success: false,
            data: BTreeMap::new(),
            error: Some(reason),
        }
    }


    fn report_for(&self, lookup: &PendingLookup, result: &ResolutionResult) -> LookupReport {
        let mut data = BTreeMap::new();
        if let Some(name) = &result.name {
            data.insert("nombre".to_string(), name.clone());
        }
        if let Some(place) = &result.voting_place {
            for (key, value) in [
                ("departamento_votacion", &place.department),
                ("municipio_votacion", &place.municipality),
                ("puesto_votacion", &place.station_name),
                ("direccion_puesto", &place.address),
                ("mesa", &place.table),
                ("zona_votacion", &place.zone),
            ] {
                if !value.is_empty() {
                    data.insert(key.to_string(), value.clone());
                }
            }
        }

        let error = match result.status {
            ResolutionStatus::Success | ResolutionStatus::PartialSuccess => None,
            ResolutionStatus::NotFound => Some("identifier not found".to_string()),
            ResolutionStatus::Error => Some(
                result
                    .error
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| "lookup failed".to_string()),
            ),
        };

        info!(
            "Entry {} ({}): {}",
            lookup.queue_id,
            mask_identifier(&lookup.identifier),
            result.status
        );

        LookupReport {
            queue_id: lookup.queue_id.clone(),
            identifier: lookup.identifier.clone(),
            kind: self.settings.kind.clone(),
            success: result.is_successful(),
            data,
            error,
        }
    }
}
