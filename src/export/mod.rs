//! Report artifacts on disk.
//!
//! Text, Markdown and PDF are for human review and keep status glyphs. JSON and
//! CSV are consumed by other tools, so their free text is reduced to plain
//! characters first.

use std::fmt;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::core::{ComplianceStatus, RemediationOutcome, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportFormat {
    #[serde(rename = "txt")]
    Text,
    #[serde(rename = "md")]
    Markdown,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "pdf")]
    Pdf,
}

impl ReportFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
        }
    }

    pub const fn is_structured(self) -> bool {
        matches!(self, ReportFormat::Json | ReportFormat::Csv)
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(ReportFormat::Text),
            "md" | "markdown" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            "pdf" => Ok(ReportFormat::Pdf),
            other => Err(format!(
                "未対応のレポート形式です: {other}（txt|md|json|csv|pdf を指定してください）"
            )),
        }
    }
}

/// Writes one new artifact under `<dir>/<ext>/` and returns its path.
pub fn export(dir: &Path, report: &Report, format: ReportFormat) -> Result<PathBuf> {
    let body = render(report, format)?;

    let out_dir = dir.join(format.extension());
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("出力ディレクトリの作成に失敗しました: {}", out_dir.display()))?;

    let stamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]_[hour]-[minute]-[second]"
        ))
        .unwrap_or_else(|_| "unknown".to_string());
    let base = format!(
        "BucketGuard_Report_{}_{stamp}",
        file_component(&report.resource_id)
    );

    for i in 0..=1000u32 {
        let name = if i == 0 {
            format!("{base}.{}", format.extension())
        } else {
            format!("{base}_{i}.{}", format.extension())
        };
        let path = out_dir.join(name);
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("レポートを作成できません: {}", path.display()));
            }
        };
        file.write_all(&body)
            .with_context(|| format!("レポートの書き込みに失敗しました: {}", path.display()))?;
        return Ok(path);
    }

    Err(anyhow!("一意なレポートファイル名を決定できませんでした: {base}"))
}

/// Renders `report` in `format`. Every format except PDF is UTF-8 text.
pub fn render(report: &Report, format: ReportFormat) -> Result<Vec<u8>> {
    match format {
        ReportFormat::Text => Ok(render_text(report).into_bytes()),
        ReportFormat::Markdown => Ok(render_markdown(report).into_bytes()),
        ReportFormat::Json => {
            let mut s = serde_json::to_string_pretty(&sanitized(report))?;
            s.push('\n');
            Ok(s.into_bytes())
        }
        ReportFormat::Csv => Ok(render_csv(&sanitized(report)).into_bytes()),
        ReportFormat::Pdf => render_pdf(report),
    }
}

/// Drops pictographs, dingbats and emoji presentation marks. Letters, digits,
/// punctuation of any script and whitespace are kept.
pub fn sanitize(s: &str) -> String {
    let kept: String = s.chars().filter(|&c| !is_pictograph(c)).collect();
    kept.trim().to_string()
}

fn is_pictograph(c: char) -> bool {
    matches!(
        c as u32,
        0x2190..=0x21FF
            | 0x2300..=0x23FF
            | 0x25A0..=0x27BF
            | 0x2900..=0x297F
            | 0x2B00..=0x2BFF
            | 0x1F000..=0x1FAFF
            | 0xFE00..=0xFE0F
            | 0x200D
            | 0x20E3
            | 0xE0020..=0xE007F
    )
}

fn sanitized(report: &Report) -> Report {
    let mut r = report.clone();
    for f in &mut r.findings {
        f.detail = sanitize(&f.detail);
        f.recommendation = f.recommendation.as_deref().map(sanitize);
        for ev in &mut f.evidence {
            ev.value = sanitize(&ev.value);
        }
    }
    for rec in &mut r.recommendations {
        rec.text = sanitize(&rec.text);
    }
    for note in &mut r.summary.notes {
        *note = sanitize(note);
    }
    r
}

fn file_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn glyph(status: ComplianceStatus) -> &'static str {
    match status {
        ComplianceStatus::Compliant => "✅",
        ComplianceStatus::NonCompliant => "⚠️",
        ComplianceStatus::Unknown => "❓",
    }
}

fn outcome_glyph(outcome: &RemediationOutcome) -> &'static str {
    match outcome {
        RemediationOutcome::Applied => "✅",
        RemediationOutcome::AlreadyCompliant => "✔️",
        RemediationOutcome::Failed { .. } => "❌",
    }
}

fn render_text(report: &Report) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "BucketGuard Security Report");
    let _ = writeln!(out, "Bucket: {}", report.resource_id);
    let _ = writeln!(out, "Generated: {}", report.generated_at);
    let _ = writeln!(out, "Tool version: {}", report.tool_version);
    let _ = writeln!(
        out,
        "Summary: {} compliant, {} non-compliant, {} unknown",
        report.summary.compliant, report.summary.non_compliant, report.summary.unknown
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Findings:");
    for f in &report.findings {
        let _ = writeln!(
            out,
            "{} [{}] {} ({})",
            glyph(f.status),
            f.status,
            f.rule.issue,
            f.rule.benchmark_reference
        );
        let _ = writeln!(out, "    {}", f.detail);
        for ev in &f.evidence {
            let _ = writeln!(out, "    - {}", ev.value);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "⚠️ Recommended Fixes:");
    if report.recommendations.is_empty() {
        let _ = writeln!(out, "✅ No fixes needed.");
    } else {
        for rec in &report.recommendations {
            let _ = writeln!(out, "- {}", rec.text);
        }
    }

    if !report.remediations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Remediations:");
        for r in &report.remediations {
            let _ = writeln!(
                out,
                "{} {}: {}",
                outcome_glyph(&r.outcome),
                r.issue,
                r.outcome
            );
        }
    }

    if !report.summary.notes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Notes:");
        for note in &report.summary.notes {
            let _ = writeln!(out, "- {note}");
        }
    }

    out
}

fn render_markdown(report: &Report) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# BucketGuard Security Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Bucket: `{}`", report.resource_id);
    let _ = writeln!(out, "- Generated: {}", report.generated_at);
    let _ = writeln!(out, "- Tool version: {}", report.tool_version);
    let _ = writeln!(
        out,
        "- Summary: {} compliant / {} non-compliant / {} unknown",
        report.summary.compliant, report.summary.non_compliant, report.summary.unknown
    );
    for note in &report.summary.notes {
        let _ = writeln!(out, "- Note: {note}");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Findings");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Status | Issue | Benchmark | Detail |");
    let _ = writeln!(out, "| --- | --- | --- | --- |");
    for f in &report.findings {
        let _ = writeln!(
            out,
            "| {} {} | {} | {} | {} |",
            glyph(f.status),
            f.status,
            md_cell(&f.rule.issue),
            md_cell(&f.rule.benchmark_reference),
            md_cell(&f.detail)
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Recommended Fixes");
    let _ = writeln!(out);
    if report.recommendations.is_empty() {
        let _ = writeln!(out, "✅ No fixes needed.");
    } else {
        for rec in &report.recommendations {
            let _ = writeln!(out, "- **{}**: {}", rec.issue, rec.text);
        }
    }

    if !report.remediations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Remediations");
        let _ = writeln!(out);
        for r in &report.remediations {
            let _ = writeln!(
                out,
                "- {} {}: `{}`",
                outcome_glyph(&r.outcome),
                r.issue,
                r.outcome
            );
        }
    }

    out
}

const PDF_PAGE_W: f32 = 210.0;
const PDF_PAGE_H: f32 = 297.0;
const PDF_MARGIN: f32 = 20.0;
const PDF_FONT_SIZE: f32 = 10.0;
const PDF_LINE_H: f32 = 5.0;
const PDF_WRAP: usize = 95;

/// A4 pages of the text rendering, wrapped to the page width.
fn render_pdf(report: &Report) -> Result<Vec<u8>> {
    let title = format!("BucketGuard Security Report: {}", report.resource_id);
    let (doc, page, layer) =
        PdfDocument::new(&title, Mm(PDF_PAGE_W), Mm(PDF_PAGE_H), "report");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("PDF フォントの読み込みに失敗しました: {e:?}"))?;

    let per_page = ((PDF_PAGE_H - 2.0 * PDF_MARGIN) / PDF_LINE_H) as usize;
    let lines = pdf_lines(report);
    let mut current = doc.get_page(page).get_layer(layer);
    for (idx, line) in lines.iter().enumerate() {
        let row = idx % per_page;
        if idx > 0 && row == 0 {
            let (page, layer) = doc.add_page(Mm(PDF_PAGE_W), Mm(PDF_PAGE_H), "report");
            current = doc.get_page(page).get_layer(layer);
        }
        let y = PDF_PAGE_H - PDF_MARGIN - row as f32 * PDF_LINE_H;
        current.use_text(line.as_str(), PDF_FONT_SIZE, Mm(PDF_MARGIN), Mm(y), &font);
    }

    doc.save_to_bytes()
        .map_err(|e| anyhow!("PDF の生成に失敗しました: {e:?}"))
}

fn pdf_lines(report: &Report) -> Vec<String> {
    render_text(report)
        .lines()
        .flat_map(|line| wrap(line, PDF_WRAP))
        .collect()
}

/// Splits at spaces so no line exceeds `width` display columns. A single word
/// wider than `width` is cut.
fn wrap(line: &str, width: usize) -> Vec<String> {
    let indent: String = line.chars().take_while(|c| *c == ' ').collect();
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut cur_w = 0usize;
    for word in line.split_whitespace() {
        let mut word = word.to_string();
        loop {
            let word_w = UnicodeWidthStr::width(word.as_str());
            let lead = if cur.is_empty() { indent.len() } else { cur_w + 1 };
            if lead + word_w <= width {
                if cur.is_empty() {
                    cur.push_str(&indent);
                    cur_w = indent.len();
                } else {
                    cur.push(' ');
                    cur_w += 1;
                }
                cur.push_str(&word);
                cur_w += word_w;
                break;
            }
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
                cur_w = 0;
                continue;
            }
            let (head, tail) = split_at_width(&word, width.saturating_sub(indent.len()).max(1));
            out.push(format!("{indent}{head}"));
            word = tail;
            if word.is_empty() {
                break;
            }
        }
    }
    if !cur.is_empty() || out.is_empty() {
        out.push(cur);
    }
    out
}

fn split_at_width(word: &str, width: usize) -> (String, String) {
    let mut w = 0usize;
    for (idx, c) in word.char_indices() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if w + cw > width && idx > 0 {
            return (word[..idx].to_string(), word[idx..].to_string());
        }
        w += cw;
    }
    (word.to_string(), String::new())
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn render_csv(report: &Report) -> String {
    let mut out = String::new();
    let mut row = |fields: &[&str]| {
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        let _ = writeln!(out, "{}", line.join(","));
    };

    row(&["section", "issue", "status", "benchmark_reference", "detail"]);
    for f in &report.findings {
        row(&[
            "finding",
            f.rule.issue.as_str(),
            f.status.as_str(),
            f.rule.benchmark_reference.as_str(),
            f.detail.as_str(),
        ]);
    }
    for rec in &report.recommendations {
        row(&["recommendation", rec.issue.as_str(), "", "", rec.text.as_str()]);
    }
    for r in &report.remediations {
        let detail = match &r.outcome {
            RemediationOutcome::Failed { reason } => sanitize(&reason.to_string()),
            _ => String::new(),
        };
        row(&["remediation", r.issue.as_str(), r.outcome.as_str(), "", detail.as_str()]);
    }
    for note in &report.summary.notes {
        row(&["note", "", "", "", note.as_str()]);
    }

    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Finding;

    #[test]
    fn sanitize_strips_pictographs_only() {
        assert_eq!(
            sanitize("⚠️ WARNING: 'Block All Public Access' is DISABLED!"),
            "WARNING: 'Block All Public Access' is DISABLED!"
        );
        assert_eq!(sanitize("✅ バケット ok"), "バケット ok");
        assert_eq!(sanitize("❌ ✔️ ❓ 🔧 done"), "done");
    }

    #[test]
    fn sanitize_keeps_text_punctuation_of_any_script() {
        assert_eq!(
            sanitize("タイムアウトしました（30s）：aws"),
            "タイムアウトしました（30s）：aws"
        );
        assert_eq!(sanitize("“quoted” ‘text’ — ok…"), "“quoted” ‘text’ — ok…");
    }

    #[test]
    fn wrap_respects_width_and_indent() {
        let lines = wrap("    alpha beta gamma delta", 16);
        assert_eq!(lines, vec!["    alpha beta", "    gamma delta"]);
        assert!(lines.iter().all(|l| UnicodeWidthStr::width(l.as_str()) <= 16));

        let long = wrap(&"x".repeat(25), 10);
        assert_eq!(long, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
        assert_eq!(wrap("", 10), vec![String::new()]);
    }

    #[test]
    fn pdf_lines_keep_glyphs() {
        let report = crate::engine::build_report(
            "bkt-1",
            vec![Finding {
                rule: crate::core::Rule::new(
                    "Versioning is disabled",
                    "remediate_missing_versioning",
                    "CIS AWS Foundations Benchmark S3.14",
                ),
                status: ComplianceStatus::NonCompliant,
                detail: format!("Versioning is suspended. {}", "word ".repeat(40)),
                recommendation: Some("Enable versioning.".to_string()),
                evidence: Vec::new(),
            }],
            &[],
            vec![],
            false,
        );
        let lines = pdf_lines(&report);
        assert!(lines.iter().any(|l| l.starts_with("⚠️ [NON_COMPLIANT]")));
        assert!(lines.iter().all(|l| UnicodeWidthStr::width(l.as_str()) <= PDF_WRAP));
    }

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn format_names_and_aliases() {
        assert_eq!("markdown".parse::<ReportFormat>(), Ok(ReportFormat::Markdown));
        assert_eq!(" TXT ".parse::<ReportFormat>(), Ok(ReportFormat::Text));
        assert_eq!("PDF".parse::<ReportFormat>(), Ok(ReportFormat::Pdf));
        assert!("docx".parse::<ReportFormat>().is_err());
        assert!(!ReportFormat::Pdf.is_structured());
        assert!(ReportFormat::Csv.is_structured());
        assert!(!ReportFormat::Markdown.is_structured());
    }

    #[test]
    fn file_component_replaces_path_separators() {
        assert_eq!(file_component("my/bucket name"), "my_bucket_name");
    }
}
