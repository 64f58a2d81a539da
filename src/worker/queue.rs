

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::safe_truncate;


#[derive(Error, Debug)]
pub enum QueueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Queue rejected credentials (HTTP {0})")]
    Unauthorized(StatusCode),

    #[error("Queue returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
}


/// One lookup waiting in the remote queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendingLookup {
    #[serde(rename = "id", deserialize_with = "string_or_number")]
    pub queue_id: String,
    #[serde(rename = "cedula")]
    pub identifier: String,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupReport {
    #[serde(rename = "cola_id")]
    pub queue_id: String,
    #[serde(rename = "cedula")]
    pub identifier: String,
    #[serde(rename = "tipo")]
    pub kind: String,
    #[serde(rename = "exito")]
    pub success: bool,
    #[serde(rename = "datos")]
    pub data: BTreeMap<String, String>,
    pub error: Option<String>,
}


#[async_trait]
pub trait PendingQueue: Send + Sync {

    async fn fetch_pending(&self, kind: &str, limit: usize) -> Result<Vec<PendingLookup>, QueueError>;

    /// Returns whether the queue acknowledged the report.
    async fn report(&self, report: &LookupReport) -> Result<bool, QueueError>;
}


#[async_trait]
impl PendingQueue for Arc<dyn PendingQueue> {
    async fn fetch_pending(&self, kind: &str, limit: usize) -> Result<Vec<PendingLookup>, QueueError> {
        (**self).fetch_pending(kind, limit).await
    }

    async fn report(&self, report: &LookupReport) -> Result<bool, QueueError> {
        (**self).report(report).await
    }
}


#[derive(Deserialize)]
struct PendingResponse {
    #[serde(default, rename = "consultas")]
    lookups: Vec<PendingLookup>,
}


#[derive(Deserialize, Default)]
struct ReportAck {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}


/// `GET {base}/consultas-pendientes` and `POST {base}/recibir-datos` with a
/// bearer token.
pub struct HttpPendingQueue {
    base_url: String,
    api_token: String,
    client: Client,
}

impl HttpPendingQueue {
    pub fn new(base_url: &str, api_token: impl Into<String>, timeout: Duration) -> Result<Self, QueueError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!("HttpPendingQueue initialized: base_url={}", base_url);

        Ok(Self {
            base_url,
            api_token: api_token.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl PendingQueue for HttpPendingQueue {
    async fn fetch_pending(&self, kind: &str, limit: usize) -> Result<Vec<PendingLookup>, QueueError> {
        let response = self
            .client
            .get(format!("{}/consultas-pendientes", self.base_url))
            .query(&[("tipo", kind.to_string()), ("limit", limit.to_string())])
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(QueueError::Unauthorized(status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status,
                body: safe_truncate(&body, 200),
            });
        }

        let pending: PendingResponse = response.json().await?;
        debug!("Queue returned {} pending lookups", pending.lookups.len());
        Ok(pending.lookups)
    }

    async fn report(&self, report: &LookupReport) -> Result<bool, QueueError> {
        let response = self
            .client
            .post(format!("{}/recibir-datos", self.base_url))
            .bearer_auth(&self.api_token)
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status,
                body: safe_truncate(&body, 200),
            });
        }
        let response = response.error_for_status()?;

        let ack: ReportAck = response.json().await.unwrap_or_default();
        if !ack.success {
            warn!("Queue did not acknowledge report for entry {}", report.queue_id);
        } else if let Some(message) = ack.message.filter(|m| !m.is_empty()) {
            debug!("Queue acknowledged entry {}: {}", report.queue_id, message);
        }
        Ok(ack.success)
    }
}


fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected queue id: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_response_accepts_numeric_and_string_ids() {
        let body = r#"{"consultas": [
            {"id": 17, "cedula": "1020304050", "tipo": "registraduria"},
            {"id": "a9f3", "cedula": "80808080"}
        ]}"#;

        let parsed: PendingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.lookups.len(), 2);
        assert_eq!(parsed.lookups[0].queue_id, "17");
        assert_eq!(parsed.lookups[1].queue_id, "a9f3");
        assert_eq!(parsed.lookups[1].identifier, "80808080");
    }

    #[test]
    fn test_missing_list_means_nothing_pending() {
        let parsed: PendingResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.lookups.is_empty());
    }

    #[test]
    fn test_report_wire_names() {
        let report = LookupReport {
            queue_id: "17".to_string(),
            identifier: "1020304050".to_string(),
            kind: "registraduria".to_string(),
            success: false,
            data: BTreeMap::new(),
            error: Some("identifier not found".to_string()),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cola_id"], "17");
        assert_eq!(json["cedula"], "1020304050");
        assert_eq!(json["tipo"], "registraduria");
        assert_eq!(json["exito"], false);
        assert!(json["datos"].as_object().unwrap().is_empty());
    }
}
