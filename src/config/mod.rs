use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::ReportFormat;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub ui: UiConfig,
    pub provider: ProviderConfig,
    pub rules: RulesConfig,
    pub report: ReportConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    File,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Aws => f.write_str("aws"),
            ProviderKind::File => f.write_str("file"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(ProviderKind::Aws),
            "file" => Ok(ProviderKind::File),
            other => Err(format!("未対応のプロバイダです: {other}（aws|file）")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub aws_bin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub dir: PathBuf,
    pub formats: Vec<ReportFormat>,
    pub include_evidence: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub offer_remediation: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            provider: ProviderConfig {
                kind: ProviderKind::Aws,
                aws_bin: "aws".to_string(),
                profile: None,
                region: None,
                state_file: None,
            },
            rules: RulesConfig { path: None },
            report: ReportConfig {
                dir: PathBuf::from("generated_reports"),
                formats: vec![ReportFormat::Json],
                include_evidence: false,
            },
            scan: ScanConfig {
                offer_remediation: true,
            },
        }
    }
}

impl EffectiveConfig {
    /// Rule store location; defaults next to the config file.
    pub fn rules_path(&self, home_dir: &Path) -> PathBuf {
        self.rules
            .path
            .clone()
            .unwrap_or_else(|| default_rules_path(home_dir))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    provider: Option<RawProviderConfig>,
    rules: Option<RawRulesConfig>,
    report: Option<RawReportConfig>,
    scan: Option<RawScanConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawProviderConfig {
    kind: Option<ProviderKind>,
    aws_bin: Option<String>,
    profile: Option<String>,
    region: Option<String>,
    state_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawRulesConfig {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    dir: Option<PathBuf>,
    formats: Option<Vec<ReportFormat>>,
    include_evidence: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawScanConfig {
    offer_remediation: Option<bool>,
}

pub fn config_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/bucketguard")
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("config.toml")
}

pub fn default_rules_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("rules.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        return Err(anyhow::anyhow!(
            "設定ファイルが見つかりません: {}",
            path.display()
        ));
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(provider) = raw.provider {
        if let Some(kind) = provider.kind {
            cfg.provider.kind = kind;
        }
        if let Some(aws_bin) = provider.aws_bin {
            cfg.provider.aws_bin = aws_bin;
        }
        if provider.profile.is_some() {
            cfg.provider.profile = provider.profile;
        }
        if provider.region.is_some() {
            cfg.provider.region = provider.region;
        }
        if provider.state_file.is_some() {
            cfg.provider.state_file = provider.state_file;
        }
    }

    if let Some(rules) = raw.rules {
        if rules.path.is_some() {
            cfg.rules.path = rules.path;
        }
    }

    if let Some(report) = raw.report {
        if let Some(dir) = report.dir {
            cfg.report.dir = dir;
        }
        if let Some(formats) = report.formats {
            cfg.report.formats = formats;
        }
        if let Some(include_evidence) = report.include_evidence {
            cfg.report.include_evidence = include_evidence;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(offer_remediation) = scan.offer_remediation {
            cfg.scan.offer_remediation = offer_remediation;
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    let v = std::env::var(name).ok()?;
    let v = v.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("BUCKETGUARD_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "BUCKETGUARD_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("BUCKETGUARD_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "BUCKETGUARD_UI_MAX_TABLE_ROWS")?;
    }
    if let Some(v) = env_string("BUCKETGUARD_PROVIDER_KIND") {
        cfg.provider.kind = v
            .parse::<ProviderKind>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "BUCKETGUARD_PROVIDER_KIND")?;
    }
    if let Some(v) = env_string("BUCKETGUARD_AWS_BIN") {
        cfg.provider.aws_bin = v;
    }
    if let Some(v) = env_string("BUCKETGUARD_PROFILE") {
        cfg.provider.profile = Some(v);
    }
    if let Some(v) = env_string("BUCKETGUARD_REGION") {
        cfg.provider.region = Some(v);
    }
    if let Some(v) = env_string("BUCKETGUARD_STATE_FILE") {
        cfg.provider.state_file = Some(PathBuf::from(v));
    }
    if let Some(v) = env_string("BUCKETGUARD_RULES_PATH") {
        cfg.rules.path = Some(PathBuf::from(v));
    }
    if let Some(v) = env_string("BUCKETGUARD_REPORT_DIR") {
        cfg.report.dir = PathBuf::from(v);
    }
    if let Some(v) = env_string("BUCKETGUARD_REPORT_FORMATS") {
        let formats = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ReportFormat>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .with_context(|| "BUCKETGUARD_REPORT_FORMATS")?;
        if !formats.is_empty() {
            cfg.report.formats = formats;
        }
    }
    if let Ok(v) = std::env::var("BUCKETGUARD_REPORT_INCLUDE_EVIDENCE") {
        cfg.report.include_evidence =
            parse_bool(&v).with_context(|| "BUCKETGUARD_REPORT_INCLUDE_EVIDENCE")?;
    }
    if let Ok(v) = std::env::var("BUCKETGUARD_SCAN_OFFER_REMEDIATION") {
        cfg.scan.offer_remediation =
            parse_bool(&v).with_context(|| "BUCKETGUARD_SCAN_OFFER_REMEDIATION")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(" YES ").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn raw_config_overrides_only_present_fields() {
        let raw: RawConfig = toml::from_str(
            r#"
[provider]
kind = "file"
state_file = "/tmp/state.json"

[report]
formats = ["txt", "csv"]
"#,
        )
        .unwrap();
        let mut cfg = EffectiveConfig::default();
        apply_raw_config(&mut cfg, raw);

        assert_eq!(cfg.provider.kind, ProviderKind::File);
        assert_eq!(cfg.provider.aws_bin, "aws");
        assert_eq!(
            cfg.provider.state_file.as_deref(),
            Some(Path::new("/tmp/state.json"))
        );
        assert_eq!(
            cfg.report.formats,
            vec![ReportFormat::Text, ReportFormat::Csv]
        );
        assert!(!cfg.report.include_evidence);
        assert!(cfg.scan.offer_remediation);
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<RawConfig>("[privacy]\nmask_home = true\n").is_err());
    }

    #[test]
    fn effective_config_serializes_as_toml() {
        let s = toml::to_string_pretty(&EffectiveConfig::default()).unwrap();
        assert!(s.contains("[provider]"), "{s}");
        assert!(s.contains("kind = \"aws\""), "{s}");
        assert!(s.contains("offer_remediation = true"), "{s}");
    }
}
