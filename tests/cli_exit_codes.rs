use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

const ENV_VARS: &[&str] = &[
    "BUCKETGUARD_CONFIG",
    "BUCKETGUARD_UI_COLOR",
    "BUCKETGUARD_UI_MAX_TABLE_ROWS",
    "BUCKETGUARD_PROVIDER_KIND",
    "BUCKETGUARD_AWS_BIN",
    "BUCKETGUARD_PROFILE",
    "BUCKETGUARD_REGION",
    "BUCKETGUARD_STATE_FILE",
    "BUCKETGUARD_RULES_PATH",
    "BUCKETGUARD_REPORT_DIR",
    "BUCKETGUARD_REPORT_FORMATS",
    "BUCKETGUARD_REPORT_INCLUDE_EVIDENCE",
    "BUCKETGUARD_SCAN_OFFER_REMEDIATION",
    "SUDO_USER",
    "SUDO_UID",
];

fn bucketguard_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bucketguard"));
    cmd.env("HOME", home);
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("BUCKETGUARD_REPORT_DIR", home.join("reports"));
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    bucketguard_cmd(home).args(args).output().expect("run bucketguard")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!(
        "bucketguard-exit-test-{}-{seq}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

/// `bkt-1` has versioning suspended and no public access block; `clean` passes every rule.
fn write_state(home: &Path) -> String {
    let path = home.join("state.json");
    std::fs::write(
        &path,
        r#"{
  "buckets": {
    "bkt-1": {
      "versioning": "Suspended",
      "encryption": "AES256"
    },
    "clean": {
      "public_access_block": {
        "BlockPublicAcls": true,
        "IgnorePublicAcls": true,
        "BlockPublicPolicy": true,
        "RestrictPublicBuckets": true
      },
      "versioning": "Enabled",
      "encryption": "AES256"
    }
  }
}
"#,
    )
    .expect("write state");
    path.display().to_string()
}

fn stdout_json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not json ({e}): {}",
            String::from_utf8_lossy(&out.stdout)
        )
    })
}

fn log_files(home: &Path) -> Vec<PathBuf> {
    let dir = home.join(".config/bucketguard/logs");
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_explicit_config_exits_2() {
    let home = make_temp_home();
    let missing = home.join("nope.toml");
    let out = run(&home, &["--config", missing.to_str().unwrap(), "config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_without_bucket_requires_tty_exits_2() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(&home, &["--state-file", &state, "scan"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_json_reports_and_declines_without_tty() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(&home, &["--state-file", &state, "--json", "scan", "bkt-1"]);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let v = stdout_json(&out);
    assert_eq!(v["resource_id"], "bkt-1");
    assert_eq!(v["summary"]["non_compliant"], 2);
    assert_eq!(v["summary"]["compliant"], 1);
    assert_eq!(v["recommendations"].as_array().unwrap().len(), 2);
    assert!(v.get("remediations").is_none());
    assert!(
        v["summary"]["notes"]
            .as_array()
            .unwrap()
            .iter()
            .any(|n| n.as_str().unwrap_or("").contains("declined"))
    );

    let raw = std::fs::read_to_string(&state).unwrap();
    assert!(raw.contains("Suspended"), "state was modified: {raw}");
    assert!(log_files(&home).is_empty());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_fix_without_yes_requires_tty_exits_2() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(&home, &["--state-file", &state, "scan", "bkt-1", "--fix"]);
    assert_eq!(out.status.code(), Some(2));
    let raw = std::fs::read_to_string(&state).unwrap();
    assert!(raw.contains("Suspended"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_fix_yes_applies_persists_and_logs() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(
        &home,
        &["--state-file", &state, "--json", "scan", "bkt-1", "--fix", "--yes"],
    );
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let v = stdout_json(&out);
    assert_eq!(v["summary"]["non_compliant"], 0);
    assert_eq!(v["summary"]["compliant"], 3);
    let remediations = v["remediations"].as_array().unwrap();
    assert_eq!(remediations.len(), 2);
    assert!(
        remediations
            .iter()
            .all(|r| r["outcome"]["status"] == "APPLIED")
    );

    let state_json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    assert_eq!(state_json["buckets"]["bkt-1"]["versioning"], "Enabled");
    assert_eq!(
        state_json["buckets"]["bkt-1"]["public_access_block"]["RestrictPublicBuckets"],
        true
    );

    assert_eq!(log_files(&home).len(), 2);

    // A second pass finds nothing to fix.
    let again = run(
        &home,
        &["--state-file", &state, "--json", "scan", "bkt-1", "--fix", "--yes"],
    );
    assert_eq!(again.status.code(), Some(0));
    let v = stdout_json(&again);
    assert_eq!(v["summary"]["compliant"], 3);
    assert!(v.get("remediations").is_none());
    assert_eq!(log_files(&home).len(), 2);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_export_writes_requested_formats() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(
        &home,
        &["--state-file", &state, "scan", "clean", "--export", "md,csv,md"],
    );
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(
        std::fs::read_dir(home.join("reports/md")).unwrap().count(),
        1
    );
    assert_eq!(
        std::fs::read_dir(home.join("reports/csv")).unwrap().count(),
        1
    );
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn remediate_requires_yes_without_tty_exits_2() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(
        &home,
        &["--state-file", &state, "remediate", "bkt-1", "--issue", "Versioning is disabled"],
    );
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn remediate_unknown_issue_exits_2() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(
        &home,
        &[
            "--state-file",
            &state,
            "remediate",
            "bkt-1",
            "--issue",
            "Logging is disabled",
            "--yes",
        ],
    );
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn remediate_json_reports_applied_then_already_compliant() {
    let home = make_temp_home();
    let state = write_state(&home);
    let args = [
        "--state-file",
        state.as_str(),
        "--json",
        "remediate",
        "bkt-1",
        "--issue",
        "Versioning is disabled",
        "--yes",
    ];

    let out = run(&home, &args);
    assert_eq!(out.status.code(), Some(0));
    let v = stdout_json(&out);
    assert_eq!(v["outcome"]["status"], "APPLIED");
    assert_eq!(v["writes"][0]["operation"], "put-bucket-versioning");
    assert!(v["log"].as_str().unwrap().starts_with("~/.config/bucketguard/logs/"));

    let out = run(&home, &args);
    assert_eq!(out.status.code(), Some(0));
    let v = stdout_json(&out);
    assert_eq!(v["outcome"]["status"], "ALREADY_COMPLIANT");
    assert_eq!(v["writes"].as_array().unwrap().len(), 0);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn rule_without_remediation_fails_remediate_with_30() {
    let home = make_temp_home();
    let state = write_state(&home);

    let out = run(
        &home,
        &[
            "rules",
            "upsert",
            "--issue",
            "Logging is disabled",
            "--remediation-id",
            "remediate_missing_logging",
            "--benchmark-reference",
            "CIS AWS Foundations Benchmark S3.9",
        ],
    );
    assert_eq!(out.status.code(), Some(0));
    assert!(home.join(".config/bucketguard/rules.toml").exists());

    let out = run(
        &home,
        &[
            "--state-file",
            &state,
            "--json",
            "remediate",
            "bkt-1",
            "--issue",
            "Logging is disabled",
            "--yes",
        ],
    );
    assert_eq!(out.status.code(), Some(30));
    let v = stdout_json(&out);
    assert_eq!(v["outcome"]["status"], "FAILED");
    assert_eq!(v["outcome"]["reason"]["kind"], "REGISTRY_INCONSISTENCY");

    let logs = log_files(&home);
    assert_eq!(logs.len(), 1);
    let log: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&logs[0]).unwrap()).unwrap();
    assert_eq!(log["status"], "registry_inconsistency");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unknown_rule_scans_as_unknown_and_exits_0() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(
        &home,
        &[
            "rules",
            "upsert",
            "--issue",
            "Logging is disabled",
            "--remediation-id",
            "remediate_missing_logging",
            "--benchmark-reference",
            "CIS AWS Foundations Benchmark S3.9",
        ],
    );
    assert_eq!(out.status.code(), Some(0));

    let out = run(&home, &["--state-file", &state, "--json", "scan", "clean"]);
    assert_eq!(out.status.code(), Some(0));
    let v = stdout_json(&out);
    assert_eq!(v["summary"]["unknown"], 1);
    assert_eq!(v["summary"]["compliant"], 3);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_provider_binary_exits_20() {
    let home = make_temp_home();
    let out = bucketguard_cmd(&home)
        .env("BUCKETGUARD_AWS_BIN", home.join("no-such-aws"))
        .args(["buckets"])
        .output()
        .expect("run bucketguard");
    assert_eq!(out.status.code(), Some(20));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn inspect_unknown_bucket_exits_20() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(&home, &["--state-file", &state, "--json", "inspect", "ghost"]);
    assert_eq!(out.status.code(), Some(20));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn buckets_json_lists_state_file_buckets() {
    let home = make_temp_home();
    let state = write_state(&home);
    let out = run(&home, &["--state-file", &state, "--json", "buckets"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout_json(&out), serde_json::json!(["bkt-1", "clean"]));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn file_provider_without_state_file_exits_2() {
    let home = make_temp_home();
    let out = bucketguard_cmd(&home)
        .env("BUCKETGUARD_PROVIDER_KIND", "file")
        .args(["buckets"])
        .output()
        .expect("run bucketguard");
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}
