use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{BucketState, MemoryProvider, ProviderError, ProviderResult, ResourceProvider};
use crate::core::PublicAccessBlock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    buckets: BTreeMap<String, BucketState>,
}

/// Buckets described by a JSON state file. Every accepted write is persisted
/// back to the file before returning.
#[derive(Debug)]
pub struct FileProvider {
    path: PathBuf,
    inner: MemoryProvider,
}

impl FileProvider {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("状態ファイルの読み込みに失敗しました: {}", path.display()))?;
        let state: StateFile = serde_json::from_str(&contents)
            .with_context(|| format!("状態ファイルの解析に失敗しました: {}", path.display()))?;
        Ok(Self {
            path,
            inner: MemoryProvider::from_buckets(state.buckets),
        })
    }

    fn persist(&self) -> ProviderResult<()> {
        let state = StateFile {
            buckets: self.inner.buckets(),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| ProviderError::Transport(format!("state encode: {e}")))?;
        std::fs::write(&self.path, json).map_err(|e| {
            ProviderError::Transport(format!("state write {}: {e}", self.path.display()))
        })
    }

    fn persisted(&self, res: ProviderResult<()>) -> ProviderResult<()> {
        res?;
        self.persist()
    }
}

impl ResourceProvider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    fn list_resources(&self) -> ProviderResult<Vec<String>> {
        self.inner.list_resources()
    }

    fn get_policy(&self, resource: &str) -> ProviderResult<String> {
        self.inner.get_policy(resource)
    }

    fn delete_policy(&self, resource: &str) -> ProviderResult<()> {
        self.persisted(self.inner.delete_policy(resource))
    }

    fn get_public_access_block(&self, resource: &str) -> ProviderResult<PublicAccessBlock> {
        self.inner.get_public_access_block(resource)
    }

    fn set_public_access_block(
        &self,
        resource: &str,
        block: PublicAccessBlock,
    ) -> ProviderResult<()> {
        self.persisted(self.inner.set_public_access_block(resource, block))
    }

    fn get_versioning(&self, resource: &str) -> ProviderResult<Option<String>> {
        self.inner.get_versioning(resource)
    }

    fn set_versioning(&self, resource: &str, status: &str) -> ProviderResult<()> {
        self.persisted(self.inner.set_versioning(resource, status))
    }

    fn get_encryption(&self, resource: &str) -> ProviderResult<String> {
        self.inner.get_encryption(resource)
    }

    fn set_encryption(&self, resource: &str, algorithm: &str) -> ProviderResult<()> {
        self.persisted(self.inner.set_encryption(resource, algorithm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_state(contents: &str) -> PathBuf {
        let n = SEQ.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "bucketguard-state-{}-{n}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn writes_are_persisted_to_disk() {
        let path = temp_state(r#"{"buckets": {"bkt-1": {"versioning": "Suspended"}}}"#);
        let provider = FileProvider::open(&path).unwrap();
        provider.set_versioning("bkt-1", "Enabled").unwrap();

        let reopened = FileProvider::open(&path).unwrap();
        assert_eq!(
            reopened.get_versioning("bkt-1").unwrap().as_deref(),
            Some("Enabled")
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_state_file_is_an_error() {
        let path = std::env::temp_dir().join("bucketguard-state-does-not-exist.json");
        let err = FileProvider::open(&path).unwrap_err();
        assert!(err.to_string().contains("状態ファイル"), "err={err:#}");
    }
}
