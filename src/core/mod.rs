mod evidence;
mod finding;
mod outcome;
mod report;
mod rule;
mod snapshot;

pub use evidence::{Evidence, EvidenceKind};
pub use finding::{ComplianceStatus, Finding};
pub use outcome::{RemediationFailure, RemediationOutcome, WriteAttempt};
pub use report::{Recommendation, RemediationRecord, Report, ReportSummary};
pub use rule::{RemediationKind, Rule};
pub use snapshot::{
    ENCRYPTION_AES256, PublicAccessBlock, ResourceSnapshot, VERSIONING_DISABLED,
    VERSIONING_ENABLED,
};
