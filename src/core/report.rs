use crate::core::{ComplianceStatus, Finding, RemediationOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub compliant: usize,
    pub non_compliant: usize,
    pub unknown: usize,
    pub notes: Vec<String>,
}

impl ReportSummary {
    pub fn from_findings(findings: &[Finding], notes: Vec<String>) -> Self {
        let count = |status: ComplianceStatus| findings.iter().filter(|f| f.status == status).count();
        Self {
            compliant: count(ComplianceStatus::Compliant),
            non_compliant: count(ComplianceStatus::NonCompliant),
            unknown: count(ComplianceStatus::Unknown),
            notes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub issue: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub issue: String,
    pub outcome: RemediationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub resource_id: String,
    pub summary: ReportSummary,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediations: Vec<RemediationRecord>,
}
