

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::sources::Registry;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingPlace {
    pub department: String,
    pub municipality: String,
    pub station_name: String,
    pub address: String,
    pub table: String,
    pub zone: String,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub identifier: String,
    pub want_name: bool,
    pub want_voting_place: bool,
    #[serde(default)]
    pub send_to_external: bool,
    /// Document issue date (`dd/mm/yyyy`); gates sources that require it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
}

impl ResolutionRequest {
    pub fn new(identifier: impl Into<String>, want_name: bool, want_voting_place: bool) -> Self {
        Self {
            identifier: identifier.into(),
            want_name,
            want_voting_place,
            send_to_external: false,
            issue_date: None,
        }
    }

    pub fn name_only(identifier: impl Into<String>) -> Self {
        Self::new(identifier, true, false)
    }

    pub fn voting_place_only(identifier: impl Into<String>) -> Self {
        Self::new(identifier, false, true)
    }

    pub fn combined(identifier: impl Into<String>) -> Self {
        Self::new(identifier, true, true)
    }

    pub fn with_external(mut self, send: bool) -> Self {
        self.send_to_external = send;
        self
    }

    pub fn with_issue_date(mut self, issue_date: impl Into<String>) -> Self {
        self.issue_date = Some(issue_date.into());
        self
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ResolutionStatus {
    Success,
    PartialSuccess,
    NotFound,
    Error,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    /// Recently failed identifier; retry after the cooldown.
    Blocked,
    /// A registry refused the request outright (e.g. HTTP 403).
    Refused,
    Unavailable,
    Timeout,
    Internal,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFault {
    pub kind: FaultKind,
    pub message: String,
}

impl ResolutionFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}


#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSubmissionOutcome {
    pub called: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub identifier: String,
    pub name: Option<String>,
    pub name_source: Option<Registry>,
    pub voting_place: Option<VotingPlace>,
    pub status: ResolutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResolutionFault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_submission: Option<ExternalSubmissionOutcome>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ResolutionResult {

    pub fn failed(identifier: impl Into<String>, fault: ResolutionFault) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            name_source: None,
            voting_place: None,
            status: ResolutionStatus::Error,
            error: Some(fault),
            external_submission: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(&self.error, Some(f) if f.kind == FaultKind::Blocked)
    }


    pub fn is_successful(&self) -> bool {
        matches!(self.status, ResolutionStatus::Success | ResolutionStatus::PartialSuccess)
    }
}
