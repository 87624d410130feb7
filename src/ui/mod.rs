use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{
    ComplianceStatus, Finding, RemediationOutcome, RemediationRecord, Report, ResourceSnapshot,
    Rule,
};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `bucketguard --help` を参照してください"
    );
}

pub fn print_findings(resource: &str, findings: &[Finding], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_findings(&mut out, resource, findings, cfg);
}

fn write_findings(out: &mut dyn Write, resource: &str, findings: &[Finding], cfg: &UiConfig) {
    let count = |s: ComplianceStatus| findings.iter().filter(|f| f.status == s).count();
    let _ = writeln!(
        out,
        "バケット: {resource}  準拠={}  非準拠={}  不明={}",
        count(ComplianceStatus::Compliant),
        count(ComplianceStatus::NonCompliant),
        count(ComplianceStatus::Unknown)
    );
    let _ = writeln!(out);

    let rows = cfg.max_table_rows.max(1).min(findings.len());
    print_findings_table(out, findings, rows, cfg.color);
    if findings.len() > rows {
        let _ = writeln!(out, "- ...（残り{}件）", findings.len() - rows);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "所見:");
    for finding in findings {
        let _ = writeln!(
            out,
            "- [{}] {}",
            format_status(finding.status, cfg.color),
            finding.detail
        );
        if cfg.verbose {
            for ev in &finding.evidence {
                let _ = writeln!(out, "    {:?}: {}", ev.kind, ev.value);
            }
        }
    }

    let recs: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.status != ComplianceStatus::Compliant && f.recommendation.is_some())
        .collect();
    if !recs.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "推奨される修正:");
        for f in recs {
            if let Some(rec) = &f.recommendation {
                let _ = writeln!(out, "- {rec}（{}）", f.rule.benchmark_reference);
            }
        }
    }
}

pub fn print_report(report: &Report, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_findings(&mut out, &report.resource_id, &report.findings, cfg);
    if !report.remediations.is_empty() {
        let _ = writeln!(out);
        write_remediations(&mut out, &report.remediations, cfg.color);
    }
    if !report.summary.notes.is_empty() {
        let _ = writeln!(out);
        for note in &report.summary.notes {
            let _ = writeln!(out, "注記: {note}");
        }
    }
}

pub fn print_remediations(records: &[RemediationRecord], cfg: &UiConfig) {
    if cfg.quiet || records.is_empty() {
        return;
    }
    let mut out = io::stdout().lock();
    write_remediations(&mut out, records, cfg.color);
}

fn write_remediations(out: &mut dyn Write, records: &[RemediationRecord], color: bool) {
    let _ = writeln!(out, "是正結果:");
    for r in records {
        let _ = writeln!(out, "- {}: {}", r.issue, format_outcome(&r.outcome, color));
    }
}

pub fn print_buckets(buckets: &[String], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if buckets.is_empty() {
        let _ = writeln!(out, "バケットが見つかりませんでした。");
        return;
    }
    let w = buckets.len().to_string().len();
    for (idx, name) in buckets.iter().enumerate() {
        let _ = writeln!(out, "{}  {name}", pad_start_display(&(idx + 1).to_string(), w));
    }
}

pub fn print_snapshot(snapshot: &ResourceSnapshot, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let absent = "（未設定）";
    let _ = writeln!(out, "バケット: {}", snapshot.resource_id);
    let _ = writeln!(
        out,
        "- ポリシー: {}",
        snapshot
            .policy
            .as_deref()
            .map(|p| truncate_middle(p, 120))
            .unwrap_or_else(|| absent.to_string())
    );
    let _ = writeln!(
        out,
        "- パブリックアクセスブロック: {}",
        snapshot
            .public_access_block
            .map(|b| b.describe())
            .unwrap_or_else(|| absent.to_string())
    );
    let _ = writeln!(out, "- バージョニング: {}", snapshot.versioning_status());
    let _ = writeln!(
        out,
        "- 既定の暗号化: {}",
        snapshot.encryption.as_deref().unwrap_or(absent)
    );
    for err in &snapshot.errors {
        let _ = writeln!(out, "- 取得失敗: {err}");
    }
}

pub fn print_rules(rules: &[Rule], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let label_issue = "問題";
    let label_id = "是正ID";
    let label_ref = "基準";

    let issue_w = rules
        .iter()
        .map(|r| visible_width_ansi(&r.issue))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_issue));
    let id_w = rules
        .iter()
        .map(|r| visible_width_ansi(&r.remediation_id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));

    let _ = writeln!(
        out,
        "{}  {}  {label_ref}",
        pad_end_display(label_issue, issue_w),
        pad_end_display(label_id, id_w)
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(issue_w),
        "-".repeat(id_w),
        "-".repeat(visible_width_ansi(label_ref))
    );
    for rule in rules {
        let _ = writeln!(
            out,
            "{}  {}  {}",
            pad_end_display(&rule.issue, issue_w),
            pad_end_display(&rule.remediation_id, id_w),
            rule.benchmark_reference
        );
    }
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s.chars().skip(len - right).collect();

    format!("{prefix}...{suffix}")
}

fn print_findings_table(out: &mut dyn Write, findings: &[Finding], rows: usize, color: bool) {
    let label_status = "状態";
    let label_issue = "問題";
    let label_ref = "基準";

    let status_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.status.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_status));
    let issue_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&f.rule.issue))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_issue));

    let _ = writeln!(
        out,
        "{}  {}  {label_ref}",
        pad_end_display(label_status, status_w),
        pad_end_display(label_issue, issue_w)
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(status_w),
        "-".repeat(issue_w),
        "-".repeat(visible_width_ansi(label_ref).max(4))
    );

    for finding in findings.iter().take(rows) {
        let status = pad_end_ansi(&format_status(finding.status, color), status_w);
        let issue = pad_end_display(&finding.rule.issue, issue_w);
        let _ = writeln!(out, "{status}  {issue}  {}", finding.rule.benchmark_reference);
    }
}

pub fn format_status(status: ComplianceStatus, color: bool) -> String {
    let s = status.as_str();
    if !color {
        return s.to_string();
    }
    let code = match status {
        ComplianceStatus::Compliant => "32",
        ComplianceStatus::NonCompliant => "31",
        ComplianceStatus::Unknown => "33",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

pub fn format_outcome(outcome: &RemediationOutcome, color: bool) -> String {
    let s = outcome.to_string();
    if !color {
        return s;
    }
    let code = match outcome {
        RemediationOutcome::Applied => "32",
        RemediationOutcome::AlreadyCompliant => "90",
        RemediationOutcome::Failed { .. } => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> UiConfig {
        UiConfig {
            color: false,
            stdin_is_tty: false,
            stdout_is_tty: false,
            stderr_is_tty: false,
            max_table_rows: 20,
            quiet: false,
            verbose: false,
        }
    }

    #[test]
    fn ansi_sequences_have_no_width() {
        let colored = format_status(ComplianceStatus::NonCompliant, true);
        assert_eq!(visible_width_ansi(&colored), "NON_COMPLIANT".len());
        assert_eq!(visible_width_ansi("状態"), 4);
    }

    #[test]
    fn truncate_middle_keeps_both_ends() {
        assert_eq!(truncate_middle("abcdefghij", 7), "ab...ij");
        assert_eq!(truncate_middle("short", 10), "short");
    }

    #[test]
    fn findings_listing_shows_only_open_recommendations() {
        let rule = |issue: &str| Rule::new(issue, "remediate_x", "CIS AWS Foundations Benchmark S3.1");
        let findings = vec![
            Finding {
                rule: rule("A"),
                status: ComplianceStatus::Compliant,
                detail: "fine".to_string(),
                recommendation: Some("stale advice".to_string()),
                evidence: vec![],
            },
            Finding {
                rule: rule("B"),
                status: ComplianceStatus::NonCompliant,
                detail: "broken".to_string(),
                recommendation: Some("fix B".to_string()),
                evidence: vec![],
            },
        ];
        let mut buf = Vec::new();
        write_findings(&mut buf, "bkt", &findings, &cfg());
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("準拠=1  非準拠=1  不明=0"), "{s}");
        assert!(s.contains("- fix B（CIS AWS Foundations Benchmark S3.1）"), "{s}");
        assert!(!s.contains("stale advice"), "{s}");
    }
}
