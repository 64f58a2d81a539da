

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::retry::RetryPolicy;


#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Solver not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Solver service error: {0}")]
    Service(String),

    #[error("Solve timed out after {0:?}")]
    Timeout(Duration),

    #[error("Site key rejected by solver service")]
    WrongSiteKey,
}


#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeSite {
    pub site_key: String,
    pub page_url: String,
}

impl ChallengeSite {
    pub fn new(site_key: impl Into<String>, page_url: impl Into<String>) -> Self {
        Self {
            site_key: site_key.into(),
            page_url: page_url.into(),
        }
    }


    pub fn origin(&self) -> Option<String> {
        let origin = url::Url::parse(&self.page_url).ok()?.origin();
        origin.is_tuple().then(|| origin.ascii_serialization())
    }
}


/// Turns a challenge into a single-use solution token.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {

    async fn solve(&self, site: &ChallengeSite) -> Result<String, SolverError>;


    fn solver_name(&self) -> &str;
}


#[async_trait]
impl ChallengeSolver for Arc<dyn ChallengeSolver> {
    async fn solve(&self, site: &ChallengeSite) -> Result<String, SolverError> {
        (**self).solve(site).await
    }

    fn solver_name(&self) -> &str {
        (**self).solver_name()
    }
}


#[derive(Deserialize)]
struct ServiceResponse {
    status: i64,
    request: String,
}

const NOT_READY: &str = "CAPCHA_NOT_READY";
const WRONG_SITE_KEY: &str = "ERROR_WRONG_GOOGLEKEY";
const FAST_POLLS: u32 = 10;
const MAX_POLLS: u32 = 50;


/// Client for a 2captcha-compatible solving service.
pub struct TwoCaptchaSolver {
    api_key: String,
    base_url: String,
    client: Client,
    submit_retry: RetryPolicy,
    fast_poll: Duration,
    slow_poll: Duration,
}

impl TwoCaptchaSolver {

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, SolverError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SolverError::NotConfigured("missing API key".to_string()));
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();

        info!("TwoCaptchaSolver initialized: base_url={}", base_url);

        Ok(Self {
            api_key,
            base_url,
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            submit_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            fast_poll: Duration::from_millis(1500),
            slow_poll: Duration::from_secs(2),
        })
    }

    pub fn with_poll_intervals(mut self, fast: Duration, slow: Duration) -> Self {
        self.fast_poll = fast;
        self.slow_poll = slow;
        self
    }


    pub async fn balance(&self) -> Result<f64, SolverError> {
        let response: ServiceResponse = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[("key", self.api_key.as_str()), ("action", "getbalance"), ("json", "1")])
            .send()
            .await?
            .json()
            .await?;

        if response.status != 1 {
            return Err(SolverError::Service(response.request));
        }

        response
            .request
            .parse::<f64>()
            .map_err(|e| SolverError::Service(format!("unparseable balance: {}", e)))
    }


    async fn submit(&self, site_key: &str, page_url: &str) -> Result<String, SolverError> {
        let form = [
            ("key", self.api_key.as_str()),
            ("method", "userrecaptcha"),
            ("googlekey", site_key),
            ("pageurl", page_url),
            ("json", "1"),
        ];

        let form = &form;
        let this = self;
        let response: ServiceResponse = self
            .submit_retry
            .run(
                "captcha submit",
                move || async move {
                    this.client
                        .post(format!("{}/in.php", this.base_url))
                        .form(form)
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<ServiceResponse>()
                        .await
                },
                |e: &reqwest::Error| e.is_timeout() || e.is_connect() || e.is_status(),
            )
            .await?;

        if response.status != 1 {
            if response.request == WRONG_SITE_KEY {
                return Err(SolverError::WrongSiteKey);
            }
            return Err(SolverError::Service(response.request));
        }

        debug!("Challenge submitted, id={}", response.request);
        Ok(response.request)
    }


    async fn poll(&self, captcha_id: &str) -> Result<String, SolverError> {
        for attempt in 0..MAX_POLLS {
            let interval = if attempt < FAST_POLLS { self.fast_poll } else { self.slow_poll };
            tokio::time::sleep(interval).await;

            let response = self
                .client
                .get(format!("{}/res.php", self.base_url))
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", captcha_id),
                    ("json", "1"),
                ])
                .send()
                .await;

            let parsed = match response {
                Ok(resp) => resp.json::<ServiceResponse>().await,
                Err(e) => Err(e),
            };

            match parsed {
                Ok(r) if r.status == 1 => {
                    info!("Challenge solved (poll {})", attempt + 1);
                    return Ok(r.request);
                }
                Ok(r) if r.request == NOT_READY => continue,
                Ok(r) => return Err(SolverError::Service(r.request)),
                Err(e) => {
                    debug!("Poll {} failed, continuing: {}", attempt + 1, e);
                    continue;
                }
            }
        }

        let waited = self.fast_poll * FAST_POLLS + self.slow_poll * (MAX_POLLS - FAST_POLLS);
        Err(SolverError::Timeout(waited))
    }
}

#[async_trait]
impl ChallengeSolver for TwoCaptchaSolver {
    async fn solve(&self, site: &ChallengeSite) -> Result<String, SolverError> {
        let captcha_id = match self.submit(&site.site_key, &site.page_url).await {
            Ok(id) => id,
            Err(SolverError::WrongSiteKey) => {
                let origin = site.origin().ok_or(SolverError::WrongSiteKey)?;
                warn!("{}, retrying with origin {}", WRONG_SITE_KEY, origin);
                self.submit(&site.site_key, &origin).await?
            }
            Err(e) => return Err(e),
        };

        self.poll(&captcha_id).await
    }

    fn solver_name(&self) -> &str {
        "2captcha"
    }
}
