

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::solver::{ChallengeSite, ChallengeSolver, SolverError};
use crate::utils::safe_truncate_ellipsis;


/// A solved challenge. Dispensed at most once.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub issued_at: Instant,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            issued_at: Instant::now(),
        }
    }


    pub fn issued_ago(value: impl Into<String>, age: Duration) -> Self {
        let now = Instant::now();
        Self {
            value: value.into(),
            issued_at: now.checked_sub(age).unwrap_or(now),
        }
    }

    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }
}


#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub capacity: usize,
    pub low_water: usize,
    pub ttl: Duration,
    pub refill_interval: Duration,
    pub solve_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: crate::DEFAULT_TOKEN_POOL_CAPACITY,
            low_water: 2,
            ttl: Duration::from_secs(crate::DEFAULT_TOKEN_TTL),
            refill_interval: Duration::from_secs(1),
            solve_timeout: Duration::from_secs(120),
        }
    }
}


#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    pub dispensed: u64,
    pub discarded_stale: u64,
    pub rejected_full: u64,
    pub solved: u64,
    pub solve_failures: u64,
}


/// Bounded FIFO of pre-solved challenge tokens for one challenge site.
///
/// Staleness is checked when a token is dispensed; nothing sweeps the queue.
pub struct TokenCache {
    site: ChallengeSite,
    settings: PoolSettings,
    queue: Mutex<VecDeque<Token>>,
    filler_started: AtomicBool,
    shutdown: CancellationToken,
    dispensed: AtomicU64,
    discarded_stale: AtomicU64,
    rejected_full: AtomicU64,
    solved: AtomicU64,
    solve_failures: AtomicU64,
}

impl TokenCache {

    pub fn new(site: ChallengeSite, settings: PoolSettings) -> Self {
        info!(
            "TokenCache initialized: site_key={}, capacity={}, low_water={}, ttl={}s",
            safe_truncate_ellipsis(&site.site_key, 12),
            settings.capacity,
            settings.low_water,
            settings.ttl.as_secs()
        );

        Self {
            site,
            settings,
            queue: Mutex::new(VecDeque::with_capacity(settings.capacity)),
            filler_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            dispensed: AtomicU64::new(0),
            discarded_stale: AtomicU64::new(0),
            rejected_full: AtomicU64::new(0),
            solved: AtomicU64::new(0),
            solve_failures: AtomicU64::new(0),
        }
    }

    pub fn site(&self) -> &ChallengeSite {
        &self.site
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }


    pub fn try_get(&self, max_age: Duration) -> Option<Token> {
        let mut queue = self.queue.lock();

        while let Some(token) = queue.pop_front() {
            let age = token.age();
            if age < max_age {
                self.dispensed.fetch_add(1, Ordering::Relaxed);
                debug!("Token dispensed from pool (age: {:.1}s, left: {})", age.as_secs_f64(), queue.len());
                return Some(token);
            }
            self.discarded_stale.fetch_add(1, Ordering::Relaxed);
            debug!("Discarded stale token (age: {:.1}s)", age.as_secs_f64());
        }

        None
    }


    pub fn put(&self, token: Token) -> bool {
        let mut queue = self.queue.lock();

        if queue.len() >= self.settings.capacity {
            self.rejected_full.fetch_add(1, Ordering::Relaxed);
            debug!("Pool full ({}), token discarded", queue.len());
            return false;
        }

        queue.push_back(token);
        debug!("Token added to pool (total: {})", queue.len());
        true
    }

    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }


    /// Pool first; solves synchronously when the pool has nothing fresh.
    pub async fn acquire(&self, solver: &dyn ChallengeSolver) -> Result<Token, SolverError> {
        if let Some(token) = self.try_get(self.settings.ttl) {
            return Ok(token);
        }

        debug!("Pool empty, solving challenge synchronously");
        let value = self.solve_once(solver).await?;
        Ok(Token::new(value))
    }


    async fn solve_once(&self, solver: &dyn ChallengeSolver) -> Result<String, SolverError> {
        let result = match tokio::time::timeout(self.settings.solve_timeout, solver.solve(&self.site)).await {
            Ok(result) => result,
            Err(_) => Err(SolverError::Timeout(self.settings.solve_timeout)),
        };

        match &result {
            Ok(_) => {
                self.solved.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.solve_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }


    /// Starts the refill loop. Returns false if a filler is already running.
    pub fn start_background_filler(self: &Arc<Self>, solver: Arc<dyn ChallengeSolver>) -> bool {
        if self
            .filler_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Token filler already running");
            return false;
        }

        let pool = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            info!("Token filler started ({})", solver.solver_name());
            let mut ticker = tokio::time::interval(pool.settings.refill_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if pool.size() >= pool.settings.low_water {
                    continue;
                }

                let solved = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    solved = pool.solve_once(solver.as_ref()) => solved,
                };

                match solved {
                    Ok(value) => {
                        pool.put(Token::new(value));
                    }
                    Err(e) => warn!("Token filler solve failed, retrying next tick: {}", e),
                }
            }

            info!("Token filler stopped");
        });

        true
    }


    pub fn stop_filler(&self) {
        self.shutdown.cancel();
    }

    pub fn is_filler_running(&self) -> bool {
        self.filler_started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }


    /// Fires `n` concurrent solves and pools the results. Returns how many landed.
    pub async fn warmup(&self, n: usize, solver: &dyn ChallengeSolver) -> usize {
        if n == 0 {
            return 0;
        }
        info!("Warmup: solving {} token(s) in parallel", n);

        let attempts = (0..n).map(|_| self.solve_once(solver));
        let results = join_all(attempts).await;

        let mut added = 0;
        for result in results {
            match result {
                Ok(value) => {
                    if self.put(Token::new(value)) {
                        added += 1;
                    }
                }
                Err(e) => warn!("Warmup solve failed: {}", e),
            }
        }

        info!("Warmup complete: pool={} token(s)", self.size());
        added
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            dispensed: self.dispensed.load(Ordering::Relaxed),
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            solved: self.solved.load(Ordering::Relaxed),
            solve_failures: self.solve_failures.load(Ordering::Relaxed),
        }
    }
}
