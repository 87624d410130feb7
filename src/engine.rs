use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{
    ComplianceStatus, Finding, Recommendation, RemediationFailure, RemediationOutcome,
    RemediationRecord, Report, ReportSummary, ResourceSnapshot, Rule,
};
use crate::provider::ResourceProvider;
use crate::registry::RuleRegistry;
use crate::remediate::Remediation;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Stop in `AwaitingDecision` when a scan finds non-compliant rules.
    pub offer_remediation: bool,
    pub include_evidence: bool,
    pub show_progress: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            offer_remediation: true,
            include_evidence: false,
            show_progress: false,
        }
    }
}

pub struct Engine {
    provider: Box<dyn ResourceProvider>,
    registry: Arc<RuleRegistry>,
    opts: EngineOptions,
}

impl Engine {
    pub fn new(
        provider: Box<dyn ResourceProvider>,
        registry: Arc<RuleRegistry>,
        opts: EngineOptions,
    ) -> Self {
        Self {
            provider,
            registry,
            opts,
        }
    }

    /// A new engine over `provider` sharing this engine's registry and options.
    pub fn with_provider(&self, provider: Box<dyn ResourceProvider>) -> Engine {
        Engine {
            provider,
            registry: Arc::clone(&self.registry),
            opts: self.opts.clone(),
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &dyn ResourceProvider {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    pub fn list_resources(&self) -> Result<Vec<String>> {
        self.provider.list_resources().map_err(|e| {
            crate::exit::provider_failed(format!(
                "バケット一覧の取得に失敗しました（{}）: {e}",
                self.provider.name()
            ))
        })
    }

    pub fn inspect(&self, resource: &str) -> ResourceSnapshot {
        crate::provider::fetch_snapshot(self.provider.as_ref(), resource)
    }

    /// Evaluates every registered rule once, in registry order.
    pub fn scan(&self, resource: &str) -> Vec<Finding> {
        use std::io::IsTerminal;
        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message(format!("検査中 {resource} ..."));
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let findings = crate::detect::detect(self.provider.as_ref(), resource, self.registry.rules());

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        findings
    }

    /// Remediates the rule registered under `issue`.
    pub fn remediate(&self, resource: &str, issue: &str) -> Result<Remediation> {
        let rule = self.registry.find_by_issue(issue).ok_or_else(|| {
            crate::exit::invalid_args(format!(
                "未登録の issue です: {issue}（`bucketguard rules list` で確認してください）"
            ))
        })?;
        Ok(crate::remediate::remediate(
            self.provider.as_ref(),
            resource,
            rule,
        ))
    }

    pub fn begin(&self, resource: &str) -> ScanCycle<'_> {
        ScanCycle {
            engine: self,
            resource: resource.to_string(),
            state: ScanState::Idle,
            history: vec![ScanState::Idle],
            findings: Vec::new(),
            attempts: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn report(
        &self,
        resource: &str,
        findings: Vec<Finding>,
        attempts: &[Attempt],
        notes: Vec<String>,
    ) -> Report {
        build_report(
            resource,
            findings,
            attempts,
            notes,
            self.opts.include_evidence,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    Idle,
    Detecting,
    AwaitingDecision,
    Remediating,
    Reverifying,
    Reporting,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "IDLE",
            ScanState::Detecting => "DETECTING",
            ScanState::AwaitingDecision => "AWAITING_DECISION",
            ScanState::Remediating => "REMEDIATING",
            ScanState::Reverifying => "REVERIFYING",
            ScanState::Reporting => "REPORTING",
        };
        f.write_str(s)
    }
}

/// One remediation issued during a cycle.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub rule: Rule,
    pub remediation: Remediation,
}

/// A single detect, decide, remediate, re-verify, report pass over one resource.
pub struct ScanCycle<'a> {
    engine: &'a Engine,
    resource: String,
    state: ScanState,
    history: Vec<ScanState>,
    findings: Vec<Finding>,
    attempts: Vec<Attempt>,
    notes: Vec<String>,
}

impl<'a> ScanCycle<'a> {
    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn history(&self) -> &[ScanState] {
        &self.history
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    fn enter(&mut self, state: ScanState) {
        self.state = state;
        self.history.push(state);
    }

    fn expect_state(&self, expected: ScanState) -> Result<()> {
        if self.state != expected {
            return Err(anyhow!(
                "scan cycle is in {} (expected {expected})",
                self.state
            ));
        }
        Ok(())
    }

    /// IDLE → DETECTING → AWAITING_DECISION | REPORTING.
    pub fn detect(&mut self) -> Result<&[Finding]> {
        self.expect_state(ScanState::Idle)?;
        self.enter(ScanState::Detecting);
        self.findings = self.engine.scan(&self.resource);

        let any_non_compliant = self.findings.iter().any(Finding::is_non_compliant);
        if any_non_compliant && self.engine.opts.offer_remediation {
            self.enter(ScanState::AwaitingDecision);
        } else {
            self.enter(ScanState::Reporting);
        }
        Ok(&self.findings)
    }

    /// Resolves the decision point. Declining leaves every finding untouched.
    pub fn resolve(&mut self, accept: bool) -> Result<()> {
        self.expect_state(ScanState::AwaitingDecision)?;
        if !accept {
            self.notes.push("Remediation was declined.".to_string());
            self.enter(ScanState::Reporting);
            return Ok(());
        }

        let engine = self.engine;
        let provider = engine.provider.as_ref();
        for idx in 0..self.findings.len() {
            if !self.findings[idx].is_non_compliant() {
                continue;
            }
            let rule = self.findings[idx].rule.clone();

            self.enter(ScanState::Remediating);
            let remediation = crate::remediate::remediate(provider, &self.resource, &rule);

            self.enter(ScanState::Reverifying);
            let fresh = crate::detect::evaluate(provider, &self.resource, &rule);
            let finding = &mut self.findings[idx];
            if fresh.status == ComplianceStatus::Compliant {
                *finding = fresh;
            } else if let RemediationOutcome::Failed { reason } = &remediation.outcome {
                finding.detail = format!("{} Remediation failed: {reason}.", finding.detail);
                if let RemediationFailure::RegistryInconsistency { .. } = reason {
                    self.notes.push(format!(
                        "Registry inconsistency for '{}': {reason}.",
                        rule.issue
                    ));
                }
            } else {
                finding.detail = format!(
                    "{} Re-verification did not confirm the fix: {}",
                    finding.detail, fresh.detail
                );
            }

            self.attempts.push(Attempt { rule, remediation });
        }

        self.enter(ScanState::Reporting);
        Ok(())
    }

    /// REPORTING → IDLE.
    pub fn finish(&mut self) -> Result<Report> {
        self.expect_state(ScanState::Reporting)?;
        let report = self.engine.report(
            &self.resource,
            self.findings.clone(),
            &self.attempts,
            std::mem::take(&mut self.notes),
        );
        self.enter(ScanState::Idle);
        Ok(report)
    }
}

pub fn build_report(
    resource: &str,
    mut findings: Vec<Finding>,
    attempts: &[Attempt],
    mut notes: Vec<String>,
    include_evidence: bool,
) -> Report {
    if !include_evidence {
        for finding in &mut findings {
            finding.evidence.clear();
        }
    }

    let recommendations = findings
        .iter()
        .filter(|f| f.status != ComplianceStatus::Compliant)
        .filter_map(|f| {
            f.recommendation.as_ref().map(|text| Recommendation {
                issue: f.rule.issue.clone(),
                text: text.clone(),
            })
        })
        .collect();

    let remediations = attempts
        .iter()
        .map(|a| RemediationRecord {
            issue: a.rule.issue.clone(),
            outcome: a.remediation.outcome.clone(),
        })
        .collect();

    let unknown = findings
        .iter()
        .filter(|f| f.status == ComplianceStatus::Unknown)
        .count();
    if unknown > 0 {
        notes.push(format!(
            "{unknown} rule(s) could not be evaluated; see the finding details."
        ));
    }

    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    Report {
        schema_version: "1.0".to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at,
        resource_id: resource.to_string(),
        summary: ReportSummary::from_findings(&findings, notes),
        findings,
        recommendations,
        remediations,
    }
}
