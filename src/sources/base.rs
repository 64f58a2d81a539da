

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::captcha::ChallengeSite;
use crate::resolution::VotingPlace;


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Registry {
    Sisben,
    Procuraduria,
    Policia,
    Registraduria,
}


#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Challenge token rejected: {0}")]
    TokenRejected(String),

    #[error("Request forbidden by source: {0}")]
    Forbidden(String),

    #[error("Identifier rejected as invalid: {0}")]
    InvalidIdentifier(String),

    #[error("Source call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Could not obtain challenge token: {0}")]
    Challenge(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SourceError {

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }


    /// Retrying this source for the identifier will not change the answer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::InvalidIdentifier(_))
    }
}


#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    Name(String),
    VotingPlace(VotingPlace),
    /// The source states that it holds no record for the identifier.
    NotFound,
}


#[derive(Debug, Clone)]
pub struct SourceQuery {
    pub identifier: String,
    pub issue_date: Option<String>,
    pub token: Option<String>,
}


/// One external registry. Markup/field extraction lives behind this seam.
#[async_trait]
pub trait SourceAdapter: Send + Sync {

    fn registry(&self) -> Registry;


    fn challenge(&self) -> Option<&ChallengeSite> {
        None
    }


    fn requires_issue_date(&self) -> bool {
        false
    }


    async fn lookup(&self, query: &SourceQuery) -> Result<SourceRecord, SourceError>;
}


#[async_trait]
impl SourceAdapter for Arc<dyn SourceAdapter> {
    fn registry(&self) -> Registry {
        (**self).registry()
    }

    fn challenge(&self) -> Option<&ChallengeSite> {
        (**self).challenge()
    }

    fn requires_issue_date(&self) -> bool {
        (**self).requires_issue_date()
    }

    async fn lookup(&self, query: &SourceQuery) -> Result<SourceRecord, SourceError> {
        (**self).lookup(query).await
    }
}
