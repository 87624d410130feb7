//! Ordered rule registry backed by a TOML file of `[[rule]]` tables.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::{RemediationKind, Rule};

pub const PUBLIC_ACCESS_ISSUE: &str = "Public access is enabled";
pub const VERSIONING_ISSUE: &str = "Versioning is disabled";
pub const BLOCK_PUBLIC_ACCESS_ISSUE: &str = "Block Public Access is disabled";
pub const ENCRYPTION_ISSUE: &str = "Default encryption is not SSE-S3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInconsistency {
    pub remediation_id: String,
}

impl fmt::Display for RegistryInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remediation not found: {}", self.remediation_id)
    }
}

impl std::error::Error for RegistryInconsistency {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut registry = Self::default();
        for rule in rules {
            registry.upsert(rule);
        }
        registry
    }

    /// The three canonical benchmark rules.
    pub fn builtin() -> Self {
        Self::new(vec![
            Rule::new(
                PUBLIC_ACCESS_ISSUE,
                RemediationKind::PublicAccess.id(),
                "CIS AWS Foundations Benchmark S3.8",
            ),
            Rule::new(
                VERSIONING_ISSUE,
                RemediationKind::MissingVersioning.id(),
                "CIS AWS Foundations Benchmark S3.14",
            ),
            Rule::new(
                BLOCK_PUBLIC_ACCESS_ISSUE,
                RemediationKind::BlockPublicAccess.id(),
                "CIS AWS Foundations Benchmark S3.1",
            ),
        ])
    }

    /// Opt-in rule; not part of `builtin`.
    pub fn encryption_rule() -> Rule {
        Rule::new(
            ENCRYPTION_ISSUE,
            RemediationKind::MissingEncryption.id(),
            "CIS AWS Foundations Benchmark S3.4",
        )
    }

    /// Loads the whole store or fails. A missing file yields `builtin()`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("ルールファイルの読み取りに失敗しました: {}", path.display()))?;
        Self::parse(&s)
            .with_context(|| format!("ルールファイルの解析に失敗しました: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(s)?;
        for (idx, rule) in file.rule.iter().enumerate() {
            validate(rule).with_context(|| format!("rule #{}", idx + 1))?;
        }
        Ok(Self::new(file.rule))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("ディレクトリ作成に失敗しました: {}", parent.display())
            })?;
        }
        let file = RuleFile {
            rule: self.rules.clone(),
        };
        let s = toml::to_string_pretty(&file).context("ルールのシリアライズに失敗しました")?;
        std::fs::write(path, s)
            .with_context(|| format!("ルールファイルの書き込みに失敗しました: {}", path.display()))
    }

    /// Keyed by `issue`. An existing rule keeps its position.
    pub fn upsert(&mut self, rule: Rule) -> Upsert {
        match self.rules.iter_mut().find(|r| r.issue == rule.issue) {
            Some(existing) => {
                existing.remediation_id = rule.remediation_id;
                existing.benchmark_reference = rule.benchmark_reference;
                Upsert::Updated
            }
            None => {
                self.rules.push(rule);
                Upsert::Inserted
            }
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find_by_issue(&self, issue: &str) -> Option<&Rule> {
        let issue = issue.trim();
        self.rules.iter().find(|r| r.issue == issue)
    }

    pub fn lookup(&self, remediation_id: &str) -> Result<RemediationKind, RegistryInconsistency> {
        remediation_id
            .parse::<RemediationKind>()
            .map_err(|_| RegistryInconsistency {
                remediation_id: remediation_id.to_string(),
            })
    }
}

fn validate(rule: &Rule) -> Result<()> {
    if rule.issue.trim().is_empty() {
        return Err(anyhow!("issue は空にできません"));
    }
    if rule.remediation_id.trim().is_empty() {
        return Err(anyhow!("remediation_id は空にできません: {}", rule.issue));
    }
    Ok(())
}
