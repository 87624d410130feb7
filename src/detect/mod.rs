//! Per-rule compliance predicates.
//!
//! Every check reads the live property from the provider; nothing is cached
//! between calls. Failures never abort a scan: a rule whose property cannot be
//! read yields an `UNKNOWN` finding and the next rule is evaluated.

use serde_json::Value;

use crate::core::{
    ComplianceStatus, ENCRYPTION_AES256, Evidence, Finding, PublicAccessBlock, RemediationKind,
    Rule, VERSIONING_DISABLED, VERSIONING_ENABLED,
};
use crate::provider::{Operation, ProviderError, ResourceProvider};

/// Result of evaluating one predicate against freshly fetched state.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub status: ComplianceStatus,
    pub detail: String,
    pub recommendation: Option<String>,
    /// Short description of the observed state, used in verification failures.
    pub observed: String,
    pub evidence: Vec<Evidence>,
}

impl Check {
    fn new(status: ComplianceStatus, detail: impl Into<String>, observed: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            recommendation: None,
            observed: observed.into(),
            evidence: Vec::new(),
        }
    }

    fn recommend(mut self, text: &str) -> Self {
        self.recommendation = Some(text.to_string());
        self
    }

    fn unknown(what: &str, err: &ProviderError) -> Self {
        Self::new(
            ComplianceStatus::Unknown,
            format!("Could not read {what}: {err}"),
            format!("{what}: unreadable ({err})"),
        )
    }

    fn traced(mut self, op: Operation, resource: &str) -> Self {
        self.evidence.insert(0, Evidence::call(format!("{op} --bucket {resource}")));
        self.evidence.push(Evidence::state(self.observed.clone()));
        self
    }

    pub fn is_compliant(&self) -> bool {
        self.status == ComplianceStatus::Compliant
    }
}

pub fn detect(provider: &dyn ResourceProvider, resource: &str, rules: &[Rule]) -> Vec<Finding> {
    rules
        .iter()
        .map(|rule| evaluate(provider, resource, rule))
        .collect()
}

pub fn evaluate(provider: &dyn ResourceProvider, resource: &str, rule: &Rule) -> Finding {
    let check = match rule.kind() {
        Some(kind) => check(provider, resource, kind),
        None => Check::new(
            ComplianceStatus::Unknown,
            format!(
                "No check registered for remediation '{}'.",
                rule.remediation_id
            ),
            "not evaluated",
        ),
    };
    Finding {
        rule: rule.clone(),
        status: check.status,
        detail: check.detail,
        recommendation: check.recommendation,
        evidence: check.evidence,
    }
}

pub fn check(provider: &dyn ResourceProvider, resource: &str, kind: RemediationKind) -> Check {
    match kind {
        RemediationKind::PublicAccess => check_public_policy(provider, resource),
        RemediationKind::MissingVersioning => check_versioning(provider, resource),
        RemediationKind::BlockPublicAccess => check_public_access_block(provider, resource),
        RemediationKind::MissingEncryption => check_encryption(provider, resource),
    }
}

fn check_public_policy(provider: &dyn ResourceProvider, resource: &str) -> Check {
    let check = match provider.get_policy(resource) {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(doc) if policy_is_public(&doc) => Check::new(
                ComplianceStatus::NonCompliant,
                "Public access is enabled: the bucket policy grants access to Principal \"*\".",
                "policy: public",
            )
            .recommend("Disable public access by removing public policies."),
            Ok(_) => Check::new(
                ComplianceStatus::Compliant,
                "Bucket policy does not grant public access.",
                "policy: private",
            ),
            Err(err) => Check::new(
                ComplianceStatus::Unknown,
                format!("Bucket policy could not be parsed: {err}"),
                "policy: unparsable",
            ),
        },
        Err(ProviderError::NotConfigured(_)) => Check::new(
            ComplianceStatus::Compliant,
            "No bucket policy found (private by default).",
            "policy: absent",
        ),
        Err(err) => Check::unknown("bucket policy", &err),
    };
    check.traced(Operation::GetBucketPolicy, resource)
}

fn check_versioning(provider: &dyn ResourceProvider, resource: &str) -> Check {
    let check = match provider.get_versioning(resource) {
        Ok(status) => {
            let status = status.as_deref().unwrap_or(VERSIONING_DISABLED);
            if status == VERSIONING_ENABLED {
                Check::new(
                    ComplianceStatus::Compliant,
                    format!("Versioning is enabled for '{resource}'."),
                    format!("versioning: {status}"),
                )
            } else {
                Check::new(
                    ComplianceStatus::NonCompliant,
                    format!("Versioning is {} for '{resource}'.", status.to_ascii_lowercase()),
                    format!("versioning: {status}"),
                )
                .recommend("Enable versioning to prevent accidental data loss.")
            }
        }
        Err(err) => Check::unknown("versioning status", &err),
    };
    check.traced(Operation::GetBucketVersioning, resource)
}

fn check_public_access_block(provider: &dyn ResourceProvider, resource: &str) -> Check {
    let check = match provider.get_public_access_block(resource) {
        Ok(block) if block.all_enabled() => Check::new(
            ComplianceStatus::Compliant,
            "'Block All Public Access' is enabled.",
            observed_block(Some(block)),
        ),
        Ok(block) => Check::new(
            ComplianceStatus::NonCompliant,
            format!("'Block All Public Access' is disabled ({}).", block.describe()),
            observed_block(Some(block)),
        )
        .recommend("Enable 'Block All Public Access' in the bucket settings."),
        Err(ProviderError::NotConfigured(_)) => Check::new(
            ComplianceStatus::NonCompliant,
            "No 'Block All Public Access' configuration found.",
            observed_block(None),
        )
        .recommend("Manually enable 'Block All Public Access' in the bucket settings."),
        Err(err) => Check::unknown("public access block", &err),
    };
    check.traced(Operation::GetPublicAccessBlock, resource)
}

fn observed_block(block: Option<PublicAccessBlock>) -> String {
    match block {
        Some(block) => format!("public access block: {}", block.describe()),
        None => "public access block: absent".to_string(),
    }
}

fn check_encryption(provider: &dyn ResourceProvider, resource: &str) -> Check {
    let check = match provider.get_encryption(resource) {
        Ok(alg) if alg == ENCRYPTION_AES256 => Check::new(
            ComplianceStatus::Compliant,
            "Encryption is enabled using SSE-S3 (AES-256).",
            format!("encryption: {alg}"),
        ),
        Ok(alg) => Check::new(
            ComplianceStatus::NonCompliant,
            format!("Unexpected encryption type detected: {alg}"),
            format!("encryption: {alg}"),
        )
        .recommend("Ensure bucket is encrypted using SSE-S3 (AES-256)."),
        Err(ProviderError::NotConfigured(_)) => Check::new(
            ComplianceStatus::NonCompliant,
            "No encryption settings found.",
            "encryption: absent",
        )
        .recommend("Enable AES-256 encryption for security."),
        Err(err) => Check::unknown("encryption settings", &err),
    };
    check.traced(Operation::GetBucketEncryption, resource)
}

/// True when any statement names the anonymous principal, either directly
/// (`"Principal": "*"`) or as a value of a principal map.
pub fn policy_is_public(doc: &Value) -> bool {
    let statements: Vec<&Value> = match doc.get("Statement") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => return false,
    };
    statements
        .into_iter()
        .filter_map(|s| s.get("Principal"))
        .any(principal_is_wildcard)
}

fn principal_is_wildcard(principal: &Value) -> bool {
    match principal {
        Value::String(s) => s == "*",
        Value::Object(map) => map.values().any(|v| match v {
            Value::String(s) => s == "*",
            Value::Array(items) => items.iter().any(|i| i.as_str() == Some("*")),
            _ => false,
        }),
        _ => false,
    }
}
