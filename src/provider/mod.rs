//! Storage-service access behind a narrow trait.
//!
//! Reads distinguish "not configured" (the property was never set) from
//! transport failures; detection treats the two very differently.

mod aws;
mod file;
mod memory;

use std::fmt;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::core::{PublicAccessBlock, ResourceSnapshot};

pub use aws::AwsCliProvider;
pub use file::FileProvider;
pub use memory::{BucketState, MemoryProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The property is absent on the resource. Carries the service error code.
    NotConfigured(String),
    Transport(String),
}

impl ProviderError {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, ProviderError::NotConfigured(_))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotConfigured(code) => write!(f, "not configured ({code})"),
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Every call a provider can receive. Also names writes in transaction logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    ListBuckets,
    GetBucketPolicy,
    DeleteBucketPolicy,
    GetPublicAccessBlock,
    PutPublicAccessBlock,
    GetBucketVersioning,
    PutBucketVersioning,
    GetBucketEncryption,
    PutBucketEncryption,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::ListBuckets => "list-buckets",
            Operation::GetBucketPolicy => "get-bucket-policy",
            Operation::DeleteBucketPolicy => "delete-bucket-policy",
            Operation::GetPublicAccessBlock => "get-public-access-block",
            Operation::PutPublicAccessBlock => "put-public-access-block",
            Operation::GetBucketVersioning => "get-bucket-versioning",
            Operation::PutBucketVersioning => "put-bucket-versioning",
            Operation::GetBucketEncryption => "get-bucket-encryption",
            Operation::PutBucketEncryption => "put-bucket-encryption",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ResourceProvider {
    /// Short adapter name for diagnostics (`aws`, `file`, `memory`).
    fn name(&self) -> &'static str;

    fn list_resources(&self) -> ProviderResult<Vec<String>>;

    /// Raw policy document as stored by the service.
    fn get_policy(&self, resource: &str) -> ProviderResult<String>;
    fn delete_policy(&self, resource: &str) -> ProviderResult<()>;

    fn get_public_access_block(&self, resource: &str) -> ProviderResult<PublicAccessBlock>;
    fn set_public_access_block(
        &self,
        resource: &str,
        block: PublicAccessBlock,
    ) -> ProviderResult<()>;

    /// `Ok(None)` when versioning was never configured.
    fn get_versioning(&self, resource: &str) -> ProviderResult<Option<String>>;
    fn set_versioning(&self, resource: &str, status: &str) -> ProviderResult<()>;

    /// Default server-side encryption algorithm.
    fn get_encryption(&self, resource: &str) -> ProviderResult<String>;
    fn set_encryption(&self, resource: &str, algorithm: &str) -> ProviderResult<()>;
}

pub const NO_SUCH_BUCKET_POLICY: &str = "NoSuchBucketPolicy";
pub const NO_SUCH_PUBLIC_ACCESS_BLOCK: &str = "NoSuchPublicAccessBlockConfiguration";
pub const NO_SUCH_ENCRYPTION: &str = "ServerSideEncryptionConfigurationNotFoundError";

/// Reads every property once. Absent properties become `None`; other failures
/// are collected in `errors` instead of aborting the read.
pub fn fetch_snapshot(provider: &dyn ResourceProvider, resource: &str) -> ResourceSnapshot {
    let mut snapshot = ResourceSnapshot {
        resource_id: resource.to_string(),
        ..ResourceSnapshot::default()
    };

    snapshot.policy = keep(
        provider.get_policy(resource),
        Operation::GetBucketPolicy,
        &mut snapshot.errors,
    );
    snapshot.public_access_block = keep(
        provider.get_public_access_block(resource),
        Operation::GetPublicAccessBlock,
        &mut snapshot.errors,
    );
    snapshot.versioning = keep(
        provider.get_versioning(resource),
        Operation::GetBucketVersioning,
        &mut snapshot.errors,
    )
    .flatten();
    snapshot.encryption = keep(
        provider.get_encryption(resource),
        Operation::GetBucketEncryption,
        &mut snapshot.errors,
    );

    snapshot
}

fn keep<T>(res: ProviderResult<T>, op: Operation, errors: &mut Vec<String>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(ProviderError::NotConfigured(_)) => None,
        Err(err) => {
            errors.push(format!("{op}: {err}"));
            None
        }
    }
}

pub fn from_config(cfg: &ProviderConfig, timeout: Duration) -> Result<Box<dyn ResourceProvider>> {
    match cfg.kind {
        ProviderKind::Aws => Ok(Box::new(AwsCliProvider::new(
            cfg.aws_bin.clone(),
            cfg.profile.clone(),
            cfg.region.clone(),
            timeout,
        ))),
        ProviderKind::File => {
            let path = cfg.state_file.clone().ok_or_else(|| {
                anyhow!("provider.kind = \"file\" には provider.state_file（または --state-file）が必要です")
            })?;
            Ok(Box::new(FileProvider::open(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ENCRYPTION_AES256;

    #[test]
    fn snapshot_treats_not_configured_as_absent() {
        let provider = MemoryProvider::new().with_bucket("bkt", BucketState::default());
        let snap = fetch_snapshot(&provider, "bkt");
        assert_eq!(snap.policy, None);
        assert_eq!(snap.public_access_block, None);
        assert_eq!(snap.versioning_status(), "Disabled");
        assert_eq!(snap.encryption, None);
        assert!(snap.errors.is_empty(), "errors={:?}", snap.errors);
    }

    #[test]
    fn snapshot_collects_transport_errors() {
        let provider = MemoryProvider::new().with_bucket(
            "bkt",
            BucketState {
                encryption: Some(ENCRYPTION_AES256.to_string()),
                ..BucketState::default()
            },
        );
        provider.fail(Operation::GetBucketPolicy, "connection reset");
        let snap = fetch_snapshot(&provider, "bkt");
        assert_eq!(snap.encryption.as_deref(), Some("AES256"));
        assert_eq!(snap.errors.len(), 1);
        assert!(snap.errors[0].starts_with("get-bucket-policy:"));
    }
}
