use crate::authz::types::PolicyStatus;
use crate::errors::ArbiterError;

/// A requested lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activate,
    Archive,
}

impl Transition {
    /// The only state this transition may start from.
    pub fn from_status(&self) -> PolicyStatus {
        match self {
            Transition::Activate => PolicyStatus::Draft,
            Transition::Archive => PolicyStatus::Active,
        }
    }

    pub fn to_status(&self) -> PolicyStatus {
        match self {
            Transition::Activate => PolicyStatus::Active,
            Transition::Archive => PolicyStatus::Archived,
        }
    }
}

/// Draft -> Active -> Archived. Nothing leaves Archived.
pub fn transition(
    id: &str,
    current: PolicyStatus,
    requested: Transition,
) -> Result<PolicyStatus, ArbiterError> {
    if current == requested.from_status() {
        Ok(requested.to_status())
    } else {
        Err(ArbiterError::InvalidState {
            id: id.to_string(),
            actual: current,
            expected: requested.from_status(),
        })
    }
}

/// Rules may only change while the policy is a draft.
pub fn ensure_mutable(id: &str, current: PolicyStatus) -> Result<(), ArbiterError> {
    match current {
        PolicyStatus::Draft => Ok(()),
        status => Err(ArbiterError::ImmutablePolicy {
            id: id.to_string(),
            status,
        }),
    }
}

pub fn ensure_deletable(id: &str, current: PolicyStatus) -> Result<(), ArbiterError> {
    match current {
        PolicyStatus::Draft => Ok(()),
        actual => Err(ArbiterError::InvalidState {
            id: id.to_string(),
            actual,
            expected: PolicyStatus::Draft,
        }),
    }
}
