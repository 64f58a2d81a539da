

mod models;
mod orchestrator;
mod status;

pub use models::{
    ExternalSubmissionOutcome, FaultKind, ResolutionFault, ResolutionRequest, ResolutionResult,
    ResolutionStatus, VotingPlace,
};
pub use orchestrator::{OrchestratorBuilder, OrchestratorSettings, ResolutionOrchestrator, Resolver};
pub use status::{CapabilityOutcome, compute_status};
