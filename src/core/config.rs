

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ResolverError, Result};
use crate::captcha::ChallengeSite;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {

    pub captcha_api_key: Option<String>,
    pub captcha_service_url: String,
    pub captcha_site_key: String,
    pub captcha_page_url: String,
    pub solver_timeout: u64,


    pub token_pool_capacity: usize,
    pub token_pool_low_water: usize,
    pub token_ttl: u64,
    pub token_warmup: usize,
    pub token_refill_interval_ms: u64,

    // Independent of token_ttl.
    pub failure_cooldown: u64,
    pub failure_cache_capacity: usize,


    pub source_timeout: u64,
    pub name_deadline: u64,
    pub voting_place_timeout: u64,
    pub transient_retries: u32,
    pub retry_base_delay_ms: u64,


    pub item_timeout: u64,
    pub item_pacing_ms: u64,
    pub max_bulk_items: usize,
    pub tasks_dir: String,


    pub external_sink_url: Option<String>,
    pub sink_timeout: u64,


    pub queue_url: Option<String>,
    pub queue_api_token: Option<String>,
    pub queue_kind: String,
    pub queue_batch_size: usize,
}

impl ResolverConfig {

    pub fn new(site_key: &str, page_url: &str) -> Self {
        Self {
            captcha_api_key: None,
            captcha_service_url: crate::DEFAULT_CAPTCHA_SERVICE_URL.to_string(),
            captcha_site_key: site_key.to_string(),
            captcha_page_url: page_url.to_string(),
            solver_timeout: 120,

            token_pool_capacity: crate::DEFAULT_TOKEN_POOL_CAPACITY,
            token_pool_low_water: 2,
            token_ttl: crate::DEFAULT_TOKEN_TTL,
            token_warmup: 2,
            token_refill_interval_ms: 1000,

            failure_cooldown: crate::DEFAULT_FAILURE_COOLDOWN,
            failure_cache_capacity: 10_000,

            source_timeout: 45,
            name_deadline: 150,
            voting_place_timeout: 120,
            transient_retries: 3,
            retry_base_delay_ms: 2000,

            item_timeout: crate::DEFAULT_ITEM_TIMEOUT,
            item_pacing_ms: 2000,
            max_bulk_items: crate::DEFAULT_MAX_BULK_ITEMS,
            tasks_dir: "tasks".to_string(),

            external_sink_url: None,
            sink_timeout: 20,

            queue_url: None,
            queue_api_token: None,
            queue_kind: "registraduria".to_string(),
            queue_batch_size: 2,
        }
    }


    pub fn from_env() -> Self {
        let mut config = Self::new(
            &std::env::var("CAPTCHA_SITE_KEY")
                .unwrap_or_else(|_| crate::DEFAULT_SITE_KEY.to_string()),
            &std::env::var("CAPTCHA_PAGE_URL")
                .unwrap_or_else(|_| crate::DEFAULT_PAGE_URL.to_string()),
        );

        config.captcha_api_key = std::env::var("TWOCAPTCHA_API_KEY")
            .or_else(|_| std::env::var("APIKEY_2CAPTCHA"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Ok(url) = std::env::var("CAPTCHA_SERVICE_URL") {
            config.captcha_service_url = url;
        }
        if let Some(v) = env_parse("SOLVER_TIMEOUT_SECS") {
            config.solver_timeout = v;
        }
        if let Some(v) = env_parse("TOKEN_POOL_CAPACITY") {
            config.token_pool_capacity = v;
        }
        if let Some(v) = env_parse("TOKEN_POOL_LOW_WATER") {
            config.token_pool_low_water = v;
        }
        if let Some(v) = env_parse("TOKEN_TTL_SECS") {
            config.token_ttl = v;
        }
        if let Some(v) = env_parse("TOKEN_WARMUP") {
            config.token_warmup = v;
        }
        if let Some(v) = env_parse("FAILURE_COOLDOWN_SECS") {
            config.failure_cooldown = v;
        }
        if let Some(v) = env_parse("FAILURE_CACHE_CAPACITY") {
            config.failure_cache_capacity = v;
        }
        if let Some(v) = env_parse("SOURCE_TIMEOUT_SECS") {
            config.source_timeout = v;
        }
        if let Some(v) = env_parse("NAME_DEADLINE_SECS") {
            config.name_deadline = v;
        }
        if let Some(v) = env_parse("VOTING_PLACE_TIMEOUT_SECS") {
            config.voting_place_timeout = v;
        }
        if let Some(v) = env_parse("ITEM_TIMEOUT_SECS") {
            config.item_timeout = v;
        }
        if let Some(v) = env_parse("ITEM_PACING_MS") {
            config.item_pacing_ms = v;
        }
        if let Some(v) = env_parse("MAX_BULK_ITEMS") {
            config.max_bulk_items = v;
        }
        if let Ok(dir) = std::env::var("TASKS_DIR") {
            config.tasks_dir = dir;
        }
        if let Ok(url) = std::env::var("EXTERNAL_SINK_URL") {
            config.external_sink_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(v) = env_parse("SINK_TIMEOUT_SECS") {
            config.sink_timeout = v;
        }
        config.queue_url = std::env::var("QUEUE_URL")
            .or_else(|_| std::env::var("SUPABASE_FUNCTIONS_URL"))
            .ok()
            .filter(|u| !u.trim().is_empty());
        config.queue_api_token = std::env::var("QUEUE_API_TOKEN")
            .or_else(|_| std::env::var("CONSULTA_API_TOKEN"))
            .ok()
            .filter(|t| !t.trim().is_empty());

        config
    }


    pub fn validate(&self) -> Result<()> {
        if self.token_pool_capacity == 0 {
            return Err(ResolverError::Config(
                "token_pool_capacity must be at least 1".to_string(),
            ));
        }
        if self.token_pool_low_water > self.token_pool_capacity {
            return Err(ResolverError::Config(format!(
                "token_pool_low_water ({}) exceeds token_pool_capacity ({})",
                self.token_pool_low_water, self.token_pool_capacity
            )));
        }
        if self.token_ttl == 0 || self.failure_cooldown == 0 {
            return Err(ResolverError::Config(
                "token_ttl and failure_cooldown must be positive".to_string(),
            ));
        }
        if self.max_bulk_items == 0 {
            return Err(ResolverError::Config(
                "max_bulk_items must be at least 1".to_string(),
            ));
        }
        if self.source_timeout == 0 || self.item_timeout == 0 {
            return Err(ResolverError::Config(
                "source_timeout and item_timeout must be positive".to_string(),
            ));
        }
        url::Url::parse(&self.captcha_page_url).map_err(|e| {
            ResolverError::Config(format!("invalid captcha_page_url: {}", e))
        })?;
        Ok(())
    }

    pub fn challenge_site(&self) -> ChallengeSite {
        ChallengeSite::new(&self.captcha_site_key, &self.captcha_page_url)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout)
    }

    pub fn item_pacing(&self) -> Duration {
        Duration::from_millis(self.item_pacing_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SITE_KEY, crate::DEFAULT_PAGE_URL)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
