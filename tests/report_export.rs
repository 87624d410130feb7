use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bucketguard::core::{ComplianceStatus, Finding, Report, Rule};
use bucketguard::engine::build_report;
use bucketguard::export::{ReportFormat, export, render};

fn make_temp_dir() -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "bucketguard-export-test-{}-{n}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn render_text(report: &Report, format: ReportFormat) -> String {
    String::from_utf8(render(report, format).unwrap()).expect("utf-8 rendering")
}

fn sample_report() -> Report {
    let findings = vec![
        Finding {
            rule: Rule::new(
                "Versioning is disabled",
                "remediate_missing_versioning",
                "CIS AWS Foundations Benchmark S3.14",
            ),
            status: ComplianceStatus::NonCompliant,
            detail: "⚠️ Versioning is suspended for 'bkt-1'.".to_string(),
            recommendation: Some("🔧 Enable versioning to prevent accidental data loss.".to_string()),
            evidence: Vec::new(),
        },
        Finding {
            rule: Rule::new(
                "Block Public Access is disabled",
                "remediate_block_public_access",
                "CIS AWS Foundations Benchmark S3.1",
            ),
            status: ComplianceStatus::Compliant,
            detail: "'Block All Public Access' is enabled.".to_string(),
            recommendation: None,
            evidence: Vec::new(),
        },
    ];
    build_report("bkt-1", findings, &[], vec![], false)
}

#[test]
fn artifact_is_named_after_bucket_and_timestamp() {
    let dir = make_temp_dir();
    let path = export(&dir, &sample_report(), ReportFormat::Markdown).unwrap();

    assert_eq!(path.parent().unwrap(), dir.join("md"));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("BucketGuard_Report_bkt-1_"), "name={name}");
    assert!(name.ends_with(".md"), "name={name}");
    // BucketGuard_Report_bkt-1_YYYY-MM-DD_HH-MM-SS.md
    let stamp = name
        .trim_start_matches("BucketGuard_Report_bkt-1_")
        .trim_end_matches(".md");
    assert_eq!(stamp.len(), "2024-01-01_00-00-00".len(), "stamp={stamp}");
}

#[test]
fn repeated_exports_never_overwrite() {
    let dir = make_temp_dir();
    let report = sample_report();
    let mut paths = Vec::new();
    for _ in 0..3 {
        paths.push(export(&dir, &report, ReportFormat::Text).unwrap());
    }
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 3);
    for path in &paths {
        assert!(path.exists(), "missing {}", path.display());
    }
}

#[test]
fn structured_formats_strip_glyphs() {
    let report = sample_report();

    let json = render_text(&report, ReportFormat::Json);
    assert!(!json.contains('⚠'), "{json}");
    assert!(!json.contains('🔧'), "{json}");
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(
        value["findings"][0]["detail"],
        "Versioning is suspended for 'bkt-1'."
    );
    assert_eq!(
        value["recommendations"][0]["text"],
        "Enable versioning to prevent accidental data loss."
    );

    let csv = render_text(&report, ReportFormat::Csv);
    assert!(!csv.contains('⚠'), "{csv}");
}

#[test]
fn human_formats_keep_glyphs() {
    let report = sample_report();
    let text = render_text(&report, ReportFormat::Text);
    assert!(text.contains("⚠️ Versioning is suspended"), "{text}");
    assert!(text.contains("✅ [COMPLIANT]"), "{text}");

    let md = render_text(&report, ReportFormat::Markdown);
    assert!(md.contains("## Recommended Fixes"), "{md}");
    assert!(md.contains("🔧 Enable versioning"), "{md}");
}

#[test]
fn csv_has_header_and_quotes_fields() {
    let csv = render_text(&sample_report(), ReportFormat::Csv);
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("section,issue,status,benchmark_reference,detail")
    );
    let first = lines.next().unwrap();
    assert!(first.starts_with("finding,Versioning is disabled,NON_COMPLIANT,"), "{first}");
    assert!(csv.lines().any(|l| l.starts_with("recommendation,")), "{csv}");
}

#[test]
fn json_artifact_parses_back_into_a_report() {
    let dir = make_temp_dir();
    let path = export(&dir, &sample_report(), ReportFormat::Json).unwrap();
    let raw = std::fs::read_to_string(path).unwrap();
    let report: Report = serde_json::from_str(&raw).unwrap();
    assert_eq!(report.resource_id, "bkt-1");
    assert_eq!(report.summary.non_compliant, 1);
}

#[test]
fn pdf_artifact_is_written_under_its_own_directory() {
    let dir = make_temp_dir();
    let path = export(&dir, &sample_report(), ReportFormat::Pdf).unwrap();
    assert_eq!(path.parent().unwrap(), dir.join("pdf"));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("pdf"));

    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"%PDF-"), "not a pdf: {:?}", &bytes[..8.min(bytes.len())]);
}

#[test]
fn long_reports_span_several_pdf_pages() {
    let mut report = sample_report();
    for n in 0..120 {
        report.summary.notes.push(format!("note {n}: {}", "detail ".repeat(20)));
    }
    let bytes = render(&report, ReportFormat::Pdf).unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    assert!(bytes.len() > render(&sample_report(), ReportFormat::Pdf).unwrap().len());
}
