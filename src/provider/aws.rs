use std::time::Duration;

use serde::Deserialize;

use super::{
    NO_SUCH_BUCKET_POLICY, NO_SUCH_ENCRYPTION, NO_SUCH_PUBLIC_ACCESS_BLOCK, Operation,
    ProviderError, ProviderResult, ResourceProvider,
};
use crate::core::PublicAccessBlock;
use crate::platform::Invocation;

const NOT_CONFIGURED_CODES: &[&str] = &[
    NO_SUCH_BUCKET_POLICY,
    NO_SUCH_PUBLIC_ACCESS_BLOCK,
    NO_SUCH_ENCRYPTION,
];

/// Talks to the storage service through `aws s3api`.
#[derive(Debug, Clone)]
pub struct AwsCliProvider {
    bin: String,
    profile: Option<String>,
    region: Option<String>,
    timeout: Duration,
}

impl AwsCliProvider {
    pub fn new(
        bin: String,
        profile: Option<String>,
        region: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            bin,
            profile,
            region,
            timeout,
        }
    }

    fn s3api(&self, op: Operation, args: &[&str]) -> ProviderResult<String> {
        let mut argv: Vec<&str> = vec!["s3api", op.as_str()];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["--output", "json"]);
        if let Some(profile) = self.profile.as_deref() {
            argv.extend_from_slice(&["--profile", profile]);
        }
        if let Some(region) = self.region.as_deref() {
            argv.extend_from_slice(&["--region", region]);
        }

        let out = Invocation::new(&self.bin, &argv, self.timeout)
            .env("AWS_PAGER", "")
            .as_invoking_user()
            .run()
            .map_err(|e| ProviderError::Transport(format!("{e:#}")))?;
        if out.success() {
            return Ok(out.stdout);
        }
        Err(classify_stderr(&out.stderr, out.exit_code))
    }

    fn bucket_call(&self, op: Operation, resource: &str, extra: &[&str]) -> ProviderResult<String> {
        let mut args = vec!["--bucket", resource];
        args.extend_from_slice(extra);
        self.s3api(op, &args)
    }
}

/// Maps `An error occurred (Code) when calling ...` to the error taxonomy.
fn classify_stderr(stderr: &str, exit_code: i32) -> ProviderError {
    let message = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string();
    if let Some(code) = error_code(&message) {
        if NOT_CONFIGURED_CODES.contains(&code) {
            return ProviderError::NotConfigured(code.to_string());
        }
    }
    if message.is_empty() {
        return ProviderError::Transport(format!("aws exited with code {exit_code}"));
    }
    ProviderError::Transport(message)
}

fn error_code(message: &str) -> Option<&str> {
    let start = message.find('(')? + 1;
    let end = start + message[start..].find(')')?;
    let code = message[start..end].trim();
    (!code.is_empty()).then_some(code)
}

fn decode<'a, T: Deserialize<'a>>(op: Operation, stdout: &'a str) -> ProviderResult<T> {
    serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Transport(format!("{op}: unexpected output: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketsOutput {
    #[serde(default)]
    buckets: Vec<BucketEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyOutput {
    policy: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PublicAccessBlockOutput {
    public_access_block_configuration: PublicAccessBlock,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersioningOutput {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptionOutput {
    server_side_encryption_configuration: EncryptionConfiguration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptionConfiguration {
    #[serde(default)]
    rules: Vec<EncryptionRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptionRule {
    apply_server_side_encryption_by_default: Option<EncryptionDefault>,
}

#[derive(Debug, Deserialize)]
struct EncryptionDefault {
    #[serde(rename = "SSEAlgorithm")]
    sse_algorithm: String,
}

fn parse_list_buckets(stdout: &str) -> ProviderResult<Vec<String>> {
    let out: ListBucketsOutput = decode(Operation::ListBuckets, stdout)?;
    Ok(out.buckets.into_iter().map(|b| b.name).collect())
}

fn parse_versioning(stdout: &str) -> ProviderResult<Option<String>> {
    // Never-configured buckets print nothing at all.
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let out: VersioningOutput = decode(Operation::GetBucketVersioning, stdout)?;
    Ok(out.status)
}

fn parse_encryption(stdout: &str) -> ProviderResult<String> {
    let out: EncryptionOutput = decode(Operation::GetBucketEncryption, stdout)?;
    out.server_side_encryption_configuration
        .rules
        .into_iter()
        .find_map(|r| r.apply_server_side_encryption_by_default)
        .map(|d| d.sse_algorithm)
        .ok_or_else(|| ProviderError::NotConfigured(NO_SUCH_ENCRYPTION.to_string()))
}

fn block_argument(block: PublicAccessBlock) -> String {
    format!(
        "BlockPublicAcls={},IgnorePublicAcls={},BlockPublicPolicy={},RestrictPublicBuckets={}",
        block.block_public_acls,
        block.ignore_public_acls,
        block.block_public_policy,
        block.restrict_public_buckets
    )
}

impl ResourceProvider for AwsCliProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn list_resources(&self) -> ProviderResult<Vec<String>> {
        let stdout = self.s3api(Operation::ListBuckets, &[])?;
        parse_list_buckets(&stdout)
    }

    fn get_policy(&self, resource: &str) -> ProviderResult<String> {
        let stdout = self.bucket_call(Operation::GetBucketPolicy, resource, &[])?;
        let out: PolicyOutput = decode(Operation::GetBucketPolicy, &stdout)?;
        Ok(out.policy)
    }

    fn delete_policy(&self, resource: &str) -> ProviderResult<()> {
        self.bucket_call(Operation::DeleteBucketPolicy, resource, &[])
            .map(|_| ())
    }

    fn get_public_access_block(&self, resource: &str) -> ProviderResult<PublicAccessBlock> {
        let stdout = self.bucket_call(Operation::GetPublicAccessBlock, resource, &[])?;
        let out: PublicAccessBlockOutput = decode(Operation::GetPublicAccessBlock, &stdout)?;
        Ok(out.public_access_block_configuration)
    }

    fn set_public_access_block(
        &self,
        resource: &str,
        block: PublicAccessBlock,
    ) -> ProviderResult<()> {
        let arg = block_argument(block);
        self.bucket_call(
            Operation::PutPublicAccessBlock,
            resource,
            &["--public-access-block-configuration", &arg],
        )
        .map(|_| ())
    }

    fn get_versioning(&self, resource: &str) -> ProviderResult<Option<String>> {
        let stdout = self.bucket_call(Operation::GetBucketVersioning, resource, &[])?;
        parse_versioning(&stdout)
    }

    fn set_versioning(&self, resource: &str, status: &str) -> ProviderResult<()> {
        let arg = format!("Status={status}");
        self.bucket_call(
            Operation::PutBucketVersioning,
            resource,
            &["--versioning-configuration", &arg],
        )
        .map(|_| ())
    }

    fn get_encryption(&self, resource: &str) -> ProviderResult<String> {
        let stdout = self.bucket_call(Operation::GetBucketEncryption, resource, &[])?;
        parse_encryption(&stdout)
    }

    fn set_encryption(&self, resource: &str, algorithm: &str) -> ProviderResult<()> {
        let arg = serde_json::json!({
            "Rules": [{ "ApplyServerSideEncryptionByDefault": { "SSEAlgorithm": algorithm } }]
        })
        .to_string();
        self.bucket_call(
            Operation::PutBucketEncryption,
            resource,
            &["--server-side-encryption-configuration", &arg],
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_codes_are_recognized() {
        let err = classify_stderr(
            "\nAn error occurred (NoSuchBucketPolicy) when calling the GetBucketPolicy operation: The bucket policy does not exist\n",
            254,
        );
        assert_eq!(err, ProviderError::NotConfigured("NoSuchBucketPolicy".to_string()));

        let err = classify_stderr(
            "An error occurred (ServerSideEncryptionConfigurationNotFoundError) when calling the GetBucketEncryption operation: x",
            254,
        );
        assert!(err.is_not_configured());
    }

    #[test]
    fn other_service_errors_are_transport() {
        let err = classify_stderr(
            "An error occurred (AccessDenied) when calling the GetBucketPolicy operation: Access Denied",
            254,
        );
        match err {
            ProviderError::Transport(msg) => assert!(msg.contains("AccessDenied")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            classify_stderr("", 1),
            ProviderError::Transport("aws exited with code 1".to_string())
        );
    }

    #[test]
    fn parses_bucket_list() {
        let names = parse_list_buckets(
            r#"{"Buckets":[{"Name":"a","CreationDate":"2024-01-01T00:00:00Z"},{"Name":"b"}],"Owner":{"ID":"x"}}"#,
        )
        .unwrap();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn empty_versioning_output_means_never_configured() {
        assert_eq!(parse_versioning("").unwrap(), None);
        assert_eq!(parse_versioning("{}").unwrap(), None);
        assert_eq!(
            parse_versioning(r#"{"Status":"Suspended"}"#).unwrap().as_deref(),
            Some("Suspended")
        );
    }

    #[test]
    fn parses_default_encryption_algorithm() {
        let alg = parse_encryption(
            r#"{"ServerSideEncryptionConfiguration":{"Rules":[{"ApplyServerSideEncryptionByDefault":{"SSEAlgorithm":"aws:kms","KMSMasterKeyID":"k"},"BucketKeyEnabled":true}]}}"#,
        )
        .unwrap();
        assert_eq!(alg, "aws:kms");
    }

    #[test]
    fn block_argument_lists_all_flags() {
        assert_eq!(
            block_argument(PublicAccessBlock::ALL_ENABLED),
            "BlockPublicAcls=true,IgnorePublicAcls=true,BlockPublicPolicy=true,RestrictPublicBuckets=true"
        );
    }
}
