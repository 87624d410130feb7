use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{RemediationFailure, RemediationOutcome, Rule, WriteAttempt};

#[derive(Debug, Serialize)]
struct RemediationLog<'a> {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    provider: &'a str,
    resource_id: &'a str,
    rule: &'a Rule,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    writes: &'a [WriteAttempt],
}

pub struct RemediationEntry<'a> {
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub provider: &'a str,
    pub resource_id: &'a str,
    pub rule: &'a Rule,
    pub outcome: &'a RemediationOutcome,
    pub writes: &'a [WriteAttempt],
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    crate::config::config_dir(home_dir).join("logs")
}

pub fn log_status(outcome: &RemediationOutcome) -> &'static str {
    match outcome {
        RemediationOutcome::Applied => "applied",
        RemediationOutcome::AlreadyCompliant => "already_compliant",
        RemediationOutcome::Failed {
            reason: RemediationFailure::RegistryInconsistency { .. },
        } => "registry_inconsistency",
        RemediationOutcome::Failed { .. } => "failed",
    }
}

/// Writes one JSON transaction log per remediation attempt.
pub fn write_remediation_log(home_dir: &Path, entry: &RemediationEntry<'_>) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("ログディレクトリの作成に失敗しました: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = entry.finished_at.unix_timestamp_nanos();
    let mut path = dir.join(format!("remediate-{pid}-{ts}.json"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("remediate-{pid}-{ts}-{n}.json"));
        n += 1;
    }

    let reason = match entry.outcome {
        RemediationOutcome::Failed { reason } => Some(reason.to_string()),
        _ => None,
    };

    let log = RemediationLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: "remediate",
        started_at: entry
            .started_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        finished_at: entry
            .finished_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        provider: entry.provider,
        resource_id: entry.resource_id,
        rule: entry.rule,
        status: log_status(entry.outcome),
        reason,
        writes: entry.writes,
    };

    let json = serde_json::to_vec_pretty(&log).context("ログのシリアライズに失敗しました")?;
    std::fs::write(&path, json)
        .with_context(|| format!("ログの書き込みに失敗しました: {}", path.display()))?;
    Ok(path)
}

/// `~/...` form of `path` for user-facing hints.
pub fn display_path(path: &Path, home_dir: &Path) -> String {
    path.strip_prefix(home_dir)
        .map(|p| format!("~/{}", p.display()))
        .unwrap_or_else(|_| path.display().to_string())
}
