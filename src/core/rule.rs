use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub issue: String,
    pub remediation_id: String,
    pub benchmark_reference: String,
}

impl Rule {
    pub fn new(
        issue: impl Into<String>,
        remediation_id: impl Into<String>,
        benchmark_reference: impl Into<String>,
    ) -> Self {
        Self {
            issue: issue.into(),
            remediation_id: remediation_id.into(),
            benchmark_reference: benchmark_reference.into(),
        }
    }

    /// Resolves `remediation_id` through the static dispatch table.
    pub fn kind(&self) -> Option<RemediationKind> {
        self.remediation_id.parse().ok()
    }
}

/// Closed set of remediation routines. Each kind also selects the detection
/// predicate of the rule it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemediationKind {
    #[serde(rename = "remediate_public_access")]
    PublicAccess,
    #[serde(rename = "remediate_missing_versioning")]
    MissingVersioning,
    #[serde(rename = "remediate_block_public_access")]
    BlockPublicAccess,
    #[serde(rename = "remediate_missing_encryption")]
    MissingEncryption,
}

impl RemediationKind {
    pub const ALL: [RemediationKind; 4] = [
        RemediationKind::PublicAccess,
        RemediationKind::MissingVersioning,
        RemediationKind::BlockPublicAccess,
        RemediationKind::MissingEncryption,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            RemediationKind::PublicAccess => "remediate_public_access",
            RemediationKind::MissingVersioning => "remediate_missing_versioning",
            RemediationKind::BlockPublicAccess => "remediate_block_public_access",
            RemediationKind::MissingEncryption => "remediate_missing_encryption",
        }
    }
}

impl fmt::Display for RemediationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RemediationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        RemediationKind::ALL
            .into_iter()
            .find(|kind| kind.id() == s)
            .ok_or_else(|| format!("remediation not found: {s}"))
    }
}
