

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::resolution::VotingPlace;


#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink rejected submission: {0}")]
    Rejected(String),

    #[error("Sink call timed out after {0:?}")]
    Timeout(Duration),
}


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_place: Option<VotingPlace>,
}


#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SinkAck {
    pub status: Option<String>,
    pub message: Option<String>,
}


/// Best-effort downstream notification of resolved fields.
#[async_trait]
pub trait ExternalSink: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<SinkAck, SinkError>;
}


#[async_trait]
impl ExternalSink for Arc<dyn ExternalSink> {
    async fn submit(&self, submission: &Submission) -> Result<SinkAck, SinkError> {
        (**self).submit(submission).await
    }
}


#[derive(Serialize)]
struct SinkPayload<'a> {
    numerodocumento: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    nombre: Option<&'a str>,
    departamento: &'a str,
    municipio: &'a str,
    puesto: &'a str,
    direccion: &'a str,
    mesa: &'a str,
}

impl<'a> From<&'a Submission> for SinkPayload<'a> {
    fn from(submission: &'a Submission) -> Self {
        let place = submission.voting_place.as_ref();
        Self {
            numerodocumento: &submission.identifier,
            nombre: submission.name.as_deref(),
            departamento: place.map(|p| p.department.as_str()).unwrap_or_default(),
            municipio: place.map(|p| p.municipality.as_str()).unwrap_or_default(),
            puesto: place.map(|p| p.station_name.as_str()).unwrap_or_default(),
            direccion: place.map(|p| p.address.as_str()).unwrap_or_default(),
            mesa: place.map(|p| p.table.as_str()).unwrap_or_default(),
        }
    }
}


/// POSTs resolved fields as JSON to a configured endpoint.
pub struct HttpSink {
    url: String,
    client: Client,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let url = url.into();
        info!("HttpSink initialized: url={}", url);

        Ok(Self {
            url,
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ExternalSink for HttpSink {
    async fn submit(&self, submission: &Submission) -> Result<SinkAck, SinkError> {
        debug!("Submitting resolved fields for {}", submission.identifier);

        let response = self
            .client
            .post(&self.url)
            .json(&SinkPayload::from(submission))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!(
                "HTTP {}: {}",
                status,
                crate::utils::safe_truncate(&body, 200)
            )));
        }

        Ok(response.json::<SinkAck>().await.unwrap_or_default())
    }
}
