use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Deserializer, Serialize};

use super::{
    NO_SUCH_BUCKET_POLICY, NO_SUCH_ENCRYPTION, NO_SUCH_PUBLIC_ACCESS_BLOCK, Operation,
    ProviderError, ProviderResult, ResourceProvider,
};
use crate::core::{ENCRYPTION_AES256, PublicAccessBlock, VERSIONING_ENABLED};

/// Stored configuration of one bucket. `None` means the property was never set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    #[serde(
        default,
        deserialize_with = "policy_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_access_block: Option<PublicAccessBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
}

impl BucketState {
    pub fn compliant() -> Self {
        Self {
            policy: None,
            public_access_block: Some(PublicAccessBlock::ALL_ENABLED),
            versioning: Some(VERSIONING_ENABLED.to_string()),
            encryption: Some(ENCRYPTION_AES256.to_string()),
        }
    }
}

// Policies may be written inline as JSON objects in state files.
fn policy_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// In-process provider. Counts calls and writes, and can inject failures per
/// operation or accept writes without applying them.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    buckets: Mutex<BTreeMap<String, BucketState>>,
    failures: Mutex<BTreeMap<Operation, String>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    frozen: AtomicBool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_buckets(buckets: BTreeMap<String, BucketState>) -> Self {
        Self {
            buckets: Mutex::new(buckets),
            ..Self::default()
        }
    }

    pub fn with_bucket(self, name: &str, state: BucketState) -> Self {
        self.insert(name, state);
        self
    }

    pub fn insert(&self, name: &str, state: BucketState) {
        self.buckets_mut().insert(name.to_string(), state);
    }

    pub fn state(&self, name: &str) -> Option<BucketState> {
        self.buckets_mut().get(name).cloned()
    }

    pub fn buckets(&self) -> BTreeMap<String, BucketState> {
        self.buckets_mut().clone()
    }

    /// Every subsequent `op` call fails with a transport error.
    pub fn fail(&self, op: Operation, message: &str) {
        self.failures_mut().insert(op, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures_mut().clear();
    }

    /// While frozen, writes succeed but leave the stored state untouched.
    pub fn freeze_writes(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    fn buckets_mut(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BucketState>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn failures_mut(&self) -> std::sync::MutexGuard<'_, BTreeMap<Operation, String>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: Operation) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures_mut().get(&op) {
            Some(msg) => Err(ProviderError::Transport(msg.clone())),
            None => Ok(()),
        }
    }

    fn read<T>(
        &self,
        op: Operation,
        resource: &str,
        f: impl FnOnce(&BucketState) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        self.check(op)?;
        let buckets = self.buckets_mut();
        let state = buckets.get(resource).ok_or_else(|| no_such_bucket(resource))?;
        f(state)
    }

    fn write(
        &self,
        op: Operation,
        resource: &str,
        f: impl FnOnce(&mut BucketState),
    ) -> ProviderResult<()> {
        self.check(op)?;
        let mut buckets = self.buckets_mut();
        let state = buckets
            .get_mut(resource)
            .ok_or_else(|| no_such_bucket(resource))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !self.frozen.load(Ordering::SeqCst) {
            f(state);
        }
        Ok(())
    }
}

fn no_such_bucket(resource: &str) -> ProviderError {
    ProviderError::Transport(format!("NoSuchBucket: {resource}"))
}

fn not_configured<T>(value: Option<T>, code: &str) -> ProviderResult<T> {
    value.ok_or_else(|| ProviderError::NotConfigured(code.to_string()))
}

impl ResourceProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list_resources(&self) -> ProviderResult<Vec<String>> {
        self.check(Operation::ListBuckets)?;
        Ok(self.buckets_mut().keys().cloned().collect())
    }

    fn get_policy(&self, resource: &str) -> ProviderResult<String> {
        self.read(Operation::GetBucketPolicy, resource, |s| {
            not_configured(s.policy.clone(), NO_SUCH_BUCKET_POLICY)
        })
    }

    fn delete_policy(&self, resource: &str) -> ProviderResult<()> {
        self.write(Operation::DeleteBucketPolicy, resource, |s| s.policy = None)
    }

    fn get_public_access_block(&self, resource: &str) -> ProviderResult<PublicAccessBlock> {
        self.read(Operation::GetPublicAccessBlock, resource, |s| {
            not_configured(s.public_access_block, NO_SUCH_PUBLIC_ACCESS_BLOCK)
        })
    }

    fn set_public_access_block(
        &self,
        resource: &str,
        block: PublicAccessBlock,
    ) -> ProviderResult<()> {
        self.write(Operation::PutPublicAccessBlock, resource, |s| {
            s.public_access_block = Some(block)
        })
    }

    fn get_versioning(&self, resource: &str) -> ProviderResult<Option<String>> {
        self.read(Operation::GetBucketVersioning, resource, |s| {
            Ok(s.versioning.clone())
        })
    }

    fn set_versioning(&self, resource: &str, status: &str) -> ProviderResult<()> {
        self.write(Operation::PutBucketVersioning, resource, |s| {
            s.versioning = Some(status.to_string())
        })
    }

    fn get_encryption(&self, resource: &str) -> ProviderResult<String> {
        self.read(Operation::GetBucketEncryption, resource, |s| {
            not_configured(s.encryption.clone(), NO_SUCH_ENCRYPTION)
        })
    }

    fn set_encryption(&self, resource: &str, algorithm: &str) -> ProviderResult<()> {
        self.write(Operation::PutBucketEncryption, resource, |s| {
            s.encryption = Some(algorithm.to_string())
        })
    }
}
