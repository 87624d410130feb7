use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RemediationOutcome {
    #[serde(rename = "APPLIED")]
    Applied,
    #[serde(rename = "ALREADY_COMPLIANT")]
    AlreadyCompliant,
    #[serde(rename = "FAILED")]
    Failed { reason: RemediationFailure },
}

impl RemediationOutcome {
    pub fn failed(reason: RemediationFailure) -> Self {
        RemediationOutcome::Failed { reason }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, RemediationOutcome::Failed { .. })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RemediationOutcome::Applied => "APPLIED",
            RemediationOutcome::AlreadyCompliant => "ALREADY_COMPLIANT",
            RemediationOutcome::Failed { .. } => "FAILED",
        }
    }
}

impl fmt::Display for RemediationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationOutcome::Failed { reason } => write!(f, "FAILED({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RemediationFailure {
    #[serde(rename = "TRANSPORT")]
    Transport { message: String },
    #[serde(rename = "REGISTRY_INCONSISTENCY")]
    RegistryInconsistency { remediation_id: String },
    #[serde(rename = "VERIFICATION_MISMATCH")]
    VerificationMismatch { attempted: String, observed: String },
}

impl fmt::Display for RemediationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationFailure::Transport { message } => f.write_str(message),
            RemediationFailure::RegistryInconsistency { remediation_id } => {
                write!(f, "remediation not found: {remediation_id}")
            }
            RemediationFailure::VerificationMismatch {
                attempted,
                observed,
            } => write!(
                f,
                "write accepted but not verified (attempted: {attempted}; observed: {observed})"
            ),
        }
    }
}

/// One corrective write issued to the provider during a remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAttempt {
    pub operation: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
