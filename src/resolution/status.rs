

use super::models::{ResolutionFault, ResolutionStatus};


/// What happened to one requested capability (name or voting place).
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityOutcome<T> {
    /// Not requested.
    Skipped,
    Found(T),
    /// Definitive negative. `authoritative` is set when the authoritative
    /// source for the capability confirmed absence or rejected the identifier.
    Absent { authoritative: bool },
    /// No source could give a definitive answer.
    Failed(ResolutionFault),
    /// A source refused the request. Counts as a failure for the status;
    /// `authoritative` marks a refusal worth suppressing retries for.
    Refused {
        fault: ResolutionFault,
        authoritative: bool,
    },
}

impl<T> CapabilityOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Refused { .. })
    }

    pub fn confirmed_by_authority(&self) -> bool {
        matches!(self, Self::Absent { authoritative: true })
    }

    pub fn refused_by_authority(&self) -> bool {
        matches!(self, Self::Refused { authoritative: true, .. })
    }

    pub fn failure(&self) -> Option<&ResolutionFault> {
        match self {
            Self::Failed(reason) => Some(reason),
            Self::Refused { fault, .. } => Some(fault),
            _ => None,
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}


pub fn compute_status<N, V>(
    name: &CapabilityOutcome<N>,
    voting_place: &CapabilityOutcome<V>,
) -> ResolutionStatus {
    if voting_place.is_found() && name.is_requested() && !name.is_found() {
        return ResolutionStatus::PartialSuccess;
    }
    if name.is_found() || voting_place.is_found() {
        return ResolutionStatus::Success;
    }
    if name.is_failed() || voting_place.is_failed() {
        return ResolutionStatus::Error;
    }
    ResolutionStatus::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::models::FaultKind;

    type Outcome = CapabilityOutcome<&'static str>;

    fn found() -> Outcome {
        CapabilityOutcome::Found("x")
    }

    fn absent() -> Outcome {
        CapabilityOutcome::Absent { authoritative: false }
    }

    fn failed() -> Outcome {
        CapabilityOutcome::Failed(ResolutionFault::new(FaultKind::Timeout, "timeout"))
    }

    fn skipped() -> Outcome {
        CapabilityOutcome::Skipped
    }

    fn refused() -> Outcome {
        CapabilityOutcome::Refused {
            fault: ResolutionFault::new(FaultKind::Refused, "HTTP 403"),
            authoritative: true,
        }
    }

    #[test]
    fn test_status_for_every_combination() {
        use ResolutionStatus::*;

        let cases: Vec<(Outcome, Outcome, ResolutionStatus)> = vec![
            (found(), found(), Success),
            (found(), absent(), Success),
            (found(), failed(), Success),
            (found(), skipped(), Success),
            (absent(), found(), PartialSuccess),
            (failed(), found(), PartialSuccess),
            (skipped(), found(), Success),
            (absent(), absent(), NotFound),
            (absent(), skipped(), NotFound),
            (skipped(), absent(), NotFound),
            (skipped(), skipped(), NotFound),
            (absent(), failed(), Error),
            (failed(), absent(), Error),
            (failed(), failed(), Error),
            (failed(), skipped(), Error),
            (skipped(), failed(), Error),
            (found(), refused(), Success),
            (refused(), found(), PartialSuccess),
            (skipped(), refused(), Error),
            (absent(), refused(), Error),
            (refused(), skipped(), Error),
        ];

        for (name, place, expected) in cases {
            assert_eq!(
                compute_status(&name, &place),
                expected,
                "name={:?} voting_place={:?}",
                name,
                place
            );
        }
    }

    #[test]
    fn test_authority_flag() {
        let confirmed: Outcome = CapabilityOutcome::Absent { authoritative: true };
        assert!(confirmed.confirmed_by_authority());
        assert!(!absent().confirmed_by_authority());
        assert_eq!(failed().failure().map(|f| f.kind), Some(FaultKind::Timeout));
        assert!(refused().refused_by_authority());
        assert!(!refused().confirmed_by_authority());
        assert_eq!(refused().failure().map(|f| f.kind), Some(FaultKind::Refused));
        assert_eq!(found().found(), Some("x"));
    }
}
