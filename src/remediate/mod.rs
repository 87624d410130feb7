//! Check, fix, verify.
//!
//! A remediation always re-reads the property before writing and again after
//! writing. A write the provider accepted but which is not reflected in the
//! re-read state is reported as a verification mismatch, never as success.

use time::OffsetDateTime;

use crate::core::{
    ComplianceStatus, ENCRYPTION_AES256, PublicAccessBlock, RemediationFailure, RemediationKind,
    RemediationOutcome, Rule, VERSIONING_ENABLED, WriteAttempt,
};
use crate::detect::{self, Check};
use crate::provider::{Operation, ProviderError, ProviderResult, ResourceProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct Remediation {
    pub outcome: RemediationOutcome,
    pub writes: Vec<WriteAttempt>,
    /// State observed by the final re-read, when one happened.
    pub after: Option<Check>,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
}

impl Remediation {
    fn without_writes(
        started_at: OffsetDateTime,
        outcome: RemediationOutcome,
        after: Option<Check>,
    ) -> Self {
        Self {
            outcome,
            writes: Vec::new(),
            after,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        }
    }
}

pub fn remediate(provider: &dyn ResourceProvider, resource: &str, rule: &Rule) -> Remediation {
    let started_at = OffsetDateTime::now_utc();
    let Some(kind) = rule.kind() else {
        return Remediation::without_writes(
            started_at,
            RemediationOutcome::failed(RemediationFailure::RegistryInconsistency {
                remediation_id: rule.remediation_id.clone(),
            }),
            None,
        );
    };

    let before = detect::check(provider, resource, kind);
    match before.status {
        ComplianceStatus::Compliant => {
            return Remediation::without_writes(
                started_at,
                RemediationOutcome::AlreadyCompliant,
                Some(before),
            );
        }
        ComplianceStatus::Unknown => {
            return Remediation::without_writes(
                started_at,
                RemediationOutcome::failed(RemediationFailure::Transport {
                    message: before.detail.clone(),
                }),
                Some(before),
            );
        }
        ComplianceStatus::NonCompliant => {}
    }

    let mut writes = Vec::new();
    let read_error = apply(provider, resource, kind, &mut writes).err();

    let mut after = detect::check(provider, resource, kind);
    if kind == RemediationKind::PublicAccess && after.is_compliant() {
        // The fix is only complete once the block is confirmed as well.
        let block = detect::check(provider, resource, RemediationKind::BlockPublicAccess);
        if !block.is_compliant() {
            after = block;
        }
    }
    let outcome = if after.is_compliant() {
        RemediationOutcome::Applied
    } else if let Some(message) = read_error
        .map(|e| e.to_string())
        .or_else(|| writes.iter().find_map(|w| w.error.clone()))
    {
        RemediationOutcome::failed(RemediationFailure::Transport { message })
    } else if after.status == ComplianceStatus::Unknown {
        RemediationOutcome::failed(RemediationFailure::Transport {
            message: after.detail.clone(),
        })
    } else {
        RemediationOutcome::failed(RemediationFailure::VerificationMismatch {
            attempted: describe_writes(&writes),
            observed: after.observed.clone(),
        })
    };

    Remediation {
        outcome,
        writes,
        after: Some(after),
        started_at,
        finished_at: OffsetDateTime::now_utc(),
    }
}

/// Issues the corrective writes for `kind`. Write failures are recorded on
/// the attempt; only a failed pre-write read is returned as an error.
fn apply(
    provider: &dyn ResourceProvider,
    resource: &str,
    kind: RemediationKind,
    writes: &mut Vec<WriteAttempt>,
) -> ProviderResult<()> {
    match kind {
        RemediationKind::PublicAccess => {
            // Both steps are attempted even if the first one fails.
            let policy = exists(provider.get_policy(resource));
            if let Ok(true) = policy {
                record(writes, Operation::DeleteBucketPolicy, "policy", || {
                    provider.delete_policy(resource)
                });
            }
            // An unreadable block is written anyway; the write is idempotent.
            match provider.get_public_access_block(resource) {
                Ok(block) if block.all_enabled() => {}
                _ => enable_block(provider, resource, writes),
            }
            policy.map(|_| ())
        }
        RemediationKind::MissingVersioning => {
            record(
                writes,
                Operation::PutBucketVersioning,
                VERSIONING_ENABLED,
                || provider.set_versioning(resource, VERSIONING_ENABLED),
            );
            Ok(())
        }
        RemediationKind::BlockPublicAccess => {
            enable_block(provider, resource, writes);
            Ok(())
        }
        RemediationKind::MissingEncryption => {
            record(
                writes,
                Operation::PutBucketEncryption,
                ENCRYPTION_AES256,
                || provider.set_encryption(resource, ENCRYPTION_AES256),
            );
            Ok(())
        }
    }
}

fn exists<T>(res: ProviderResult<T>) -> ProviderResult<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(ProviderError::NotConfigured(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

fn enable_block(provider: &dyn ResourceProvider, resource: &str, writes: &mut Vec<WriteAttempt>) {
    let block = PublicAccessBlock::ALL_ENABLED;
    record(
        writes,
        Operation::PutPublicAccessBlock,
        &block.describe(),
        || provider.set_public_access_block(resource, block),
    );
}

fn record(
    writes: &mut Vec<WriteAttempt>,
    op: Operation,
    value: &str,
    write: impl FnOnce() -> ProviderResult<()>,
) {
    let error = write().err().map(|e| e.to_string());
    writes.push(WriteAttempt {
        operation: op.as_str().to_string(),
        value: value.to_string(),
        error,
    });
}

fn describe_writes(writes: &[WriteAttempt]) -> String {
    if writes.is_empty() {
        return "no write".to_string();
    }
    writes
        .iter()
        .map(|w| format!("{} {}", w.operation, w.value))
        .collect::<Vec<_>>()
        .join("; ")
}
