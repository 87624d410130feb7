use serde::{Deserialize, Serialize};

pub const VERSIONING_ENABLED: &str = "Enabled";
pub const VERSIONING_DISABLED: &str = "Disabled";
pub const ENCRYPTION_AES256: &str = "AES256";

/// The four public-access-block switches, named as the storage service names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub ignore_public_acls: bool,
    pub block_public_policy: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    pub const ALL_ENABLED: PublicAccessBlock = PublicAccessBlock {
        block_public_acls: true,
        ignore_public_acls: true,
        block_public_policy: true,
        restrict_public_buckets: true,
    };

    pub fn all_enabled(&self) -> bool {
        self.block_public_acls
            && self.ignore_public_acls
            && self.block_public_policy
            && self.restrict_public_buckets
    }

    pub fn describe(&self) -> String {
        format!(
            "BlockPublicAcls={} IgnorePublicAcls={} BlockPublicPolicy={} RestrictPublicBuckets={}",
            self.block_public_acls,
            self.ignore_public_acls,
            self.block_public_policy,
            self.restrict_public_buckets
        )
    }
}

/// Live configuration of one resource, read field by field from the provider.
/// `errors` collects reads that failed for reasons other than "not configured".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResourceSnapshot {
    pub resource_id: String,
    pub policy: Option<String>,
    pub public_access_block: Option<PublicAccessBlock>,
    pub versioning: Option<String>,
    pub encryption: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ResourceSnapshot {
    pub fn versioning_status(&self) -> &str {
        self.versioning.as_deref().unwrap_or(VERSIONING_DISABLED)
    }
}
