

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::utils::mask_identifier;


struct FailureEntry {
    failed_at: Instant,
}


/// Per-identifier cooldown after a terminal lookup failure.
///
/// Entries expire logically once `cooldown` has elapsed; expired entries are
/// treated as absent and removed on the next read. Capacity is LRU-bounded.
pub struct FailureCircuitCache {
    entries: Mutex<LruCache<String, FailureEntry>>,
    cooldown: Duration,
    stats: Mutex<CircuitStats>,
}


#[derive(Debug, Default, Clone)]
pub struct CircuitStats {
    pub recorded: u64,
    pub blocked: u64,
    pub expired: u64,
}

impl FailureCircuitCache {

    pub fn new(cooldown: Duration, capacity: usize) -> Self {
        info!(
            "FailureCircuitCache initialized: cooldown={}s, capacity={}",
            cooldown.as_secs(),
            capacity
        );

        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            cooldown,
            stats: Mutex::new(CircuitStats::default()),
        }
    }


    pub fn is_blocked(&self, identifier: &str) -> bool {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.peek(identifier) else {
            return false;
        };

        if entry.failed_at.elapsed() < self.cooldown {
            self.stats.lock().blocked += 1;
            debug!("Identifier {} blocked by recent failure", identifier);
            return true;
        }

        entries.pop(identifier);
        self.stats.lock().expired += 1;
        debug!("Failure entry expired for {}", identifier);
        false
    }


    pub fn record_failure(&self, identifier: &str) {
        self.entries.lock().put(
            identifier.to_string(),
            FailureEntry {
                failed_at: Instant::now(),
            },
        );
        self.stats.lock().recorded += 1;

        info!(
            "Identifier {} recorded as failed (cooldown {}min)",
            mask_identifier(identifier),
            self.cooldown.as_secs() / 60
        );
    }


    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.failed_at.elapsed() >= self.cooldown)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        if !expired.is_empty() {
            self.stats.lock().expired += expired.len() as u64;
            debug!("Swept {} expired failure entries", expired.len());
        }

        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn stats(&self) -> CircuitStats {
        self.stats.lock().clone()
    }
}
