use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::config::{EffectiveConfig, ProviderKind};
use crate::core::{RemediationFailure, RemediationOutcome, Rule, WriteAttempt};
use crate::engine::{Engine, EngineOptions, ScanState};
use crate::export::ReportFormat;
use crate::registry::{RuleRegistry, Upsert};
use crate::remediate::Remediation;
use crate::ui::UiConfig;

mod interactive;

#[derive(Debug, Parser)]
#[command(
    name = "bucketguard",
    version,
    about = "オブジェクトストレージのバケット設定を CIS ベンチマークに照らして監査し、是正とレポート出力を行う"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Per-call timeout for provider commands, in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,
    #[arg(long, global = true)]
    pub profile: Option<String>,
    #[arg(long, global = true)]
    pub region: Option<String>,
    /// Read and write bucket state from a JSON file instead of the AWS CLI.
    #[arg(long = "state-file", global = true)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Buckets,
    Scan(ScanArgs),
    Remediate(RemediateArgs),
    Inspect(InspectArgs),
    Report(ReportArgs),
    Rules(RulesArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    pub bucket: Option<String>,
    /// Remediate non-compliant rules after the scan.
    #[arg(long)]
    pub fix: bool,
    /// Skip the confirmation prompt for --fix.
    #[arg(long)]
    pub yes: bool,
    /// Export the final report in these formats (txt, md, pdf, json, csv).
    #[arg(long, value_delimiter = ',')]
    pub export: Vec<ReportFormat>,
}

#[derive(Debug, Args)]
pub struct RemediateArgs {
    pub bucket: String,
    #[arg(long)]
    pub issue: String,
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    pub bucket: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    pub bucket: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub format: Vec<ReportFormat>,
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
    #[arg(long)]
    pub include_evidence: bool,
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    List,
    Upsert {
        #[arg(long)]
        issue: String,
        #[arg(long)]
        remediation_id: String,
        #[arg(long)]
        benchmark_reference: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("BUCKETGUARD_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    apply_cli_overrides(&mut cfg, &cli);

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let rules_path = cfg.rules_path(&home_dir);

    match &cli.command {
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "bucketguard", &mut out);
            return Ok(());
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `bucketguard config --show` を使用してください");
            }
            return Ok(());
        }
        Commands::Rules(args) => return run_rules(&args.command, &rules_path, &cli, &ui_cfg),
        _ => {}
    }

    let registry = RuleRegistry::load(&rules_path)?;
    if ui_cfg.verbose {
        eprintln!(
            "ルール: {} 件（{}）",
            registry.len(),
            crate::logs::display_path(&rules_path, &home_dir)
        );
    }

    let provider = crate::provider::from_config(&cfg.provider, Duration::from_secs(cli.timeout))
        .map_err(crate::exit::invalid_args_err)?;
    if ui_cfg.verbose {
        eprintln!("プロバイダ: {}", provider.name());
    }

    let offer_remediation =
        cfg.scan.offer_remediation || matches!(&cli.command, Commands::Scan(a) if a.fix);
    let include_evidence = cfg.report.include_evidence
        || matches!(&cli.command, Commands::Report(a) if a.include_evidence);
    let engine = Engine::new(
        provider,
        Arc::new(registry),
        EngineOptions {
            offer_remediation,
            include_evidence,
            show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
        },
    );

    match &cli.command {
        Commands::Buckets => {
            let buckets = engine.list_resources()?;
            if cli.json {
                write_json(&buckets)?;
            } else {
                crate::ui::print_buckets(&buckets, &ui_cfg);
            }
        }
        Commands::Scan(args) => {
            let bucket = resolve_bucket(args.bucket.as_deref(), &engine, &cli, &ui_cfg)?;
            run_scan(&engine, &bucket, args, &cli, &cfg, &ui_cfg, &home_dir)?;
        }
        Commands::Remediate(args) => {
            run_remediate(&engine, args, &cli, &ui_cfg, &home_dir)?;
        }
        Commands::Inspect(args) => {
            let bucket = resolve_bucket(args.bucket.as_deref(), &engine, &cli, &ui_cfg)?;
            let snapshot = engine.inspect(&bucket);
            if cli.json {
                write_json(&snapshot)?;
            } else {
                crate::ui::print_snapshot(&snapshot, &ui_cfg);
            }
            if snapshot.errors.len() == 4 {
                return Err(crate::exit::provider_failed(format!(
                    "バケットの設定を取得できませんでした: {bucket}\n{}",
                    snapshot.errors.join("\n")
                )));
            }
        }
        Commands::Report(args) => {
            let bucket = resolve_bucket(args.bucket.as_deref(), &engine, &cli, &ui_cfg)?;
            let findings = engine.scan(&bucket);
            let report = engine.report(&bucket, findings, &[], vec![]);

            let formats = if args.format.is_empty() {
                cfg.report.formats.clone()
            } else {
                args.format.clone()
            };
            let out_dir = args.out_dir.clone().unwrap_or_else(|| cfg.report.dir.clone());
            let paths = export_all(&out_dir, &report, &formats)?;

            if cli.json {
                write_json(&paths)?;
            } else if !ui_cfg.quiet {
                crate::ui::print_report(&report, &ui_cfg);
                println!();
                for path in &paths {
                    println!("レポート: {}", path.display());
                }
            }
        }
        Commands::Rules(_) | Commands::Completion(_) | Commands::Config(_) => {}
    }

    Ok(())
}

fn apply_cli_overrides(cfg: &mut EffectiveConfig, cli: &Cli) {
    if let Some(profile) = &cli.profile {
        cfg.provider.profile = Some(profile.clone());
    }
    if let Some(region) = &cli.region {
        cfg.provider.region = Some(region.clone());
    }
    if let Some(state_file) = &cli.state_file {
        cfg.provider.kind = ProviderKind::File;
        cfg.provider.state_file = Some(state_file.clone());
    }
}

fn resolve_bucket(
    arg: Option<&str>,
    engine: &Engine,
    cli: &Cli,
    ui_cfg: &UiConfig,
) -> Result<String> {
    if let Some(bucket) = arg {
        let bucket = bucket.trim();
        if bucket.is_empty() {
            return Err(crate::exit::invalid_args("バケット名は空にできません"));
        }
        return Ok(bucket.to_string());
    }

    if cli.json || !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
        return Err(crate::exit::invalid_args(
            "バケット名を指定してください（対話選択には TTY が必要です）",
        ));
    }

    let buckets = engine.list_resources()?;
    if buckets.is_empty() {
        return Err(crate::exit::provider_failed(
            "選択できるバケットがありません",
        ));
    }
    crate::ui::print_buckets(&buckets, &UiConfig {
        quiet: false,
        ..ui_cfg.clone()
    });
    match interactive::prompt_bucket(&buckets).map_err(crate::exit::invalid_args_err)? {
        Some(idx) => Ok(buckets[idx].clone()),
        None => Err(crate::exit::invalid_args("バケットが選択されませんでした")),
    }
}

fn run_scan(
    engine: &Engine,
    bucket: &str,
    args: &ScanArgs,
    cli: &Cli,
    cfg: &EffectiveConfig,
    ui_cfg: &UiConfig,
    home_dir: &Path,
) -> Result<()> {
    let mut cycle = engine.begin(bucket);
    cycle.detect()?;

    if !cli.json {
        crate::ui::print_findings(bucket, cycle.findings(), ui_cfg);
    }

    if cycle.state() == ScanState::AwaitingDecision {
        let accept = decide(args, cli, ui_cfg)?;
        cycle.resolve(accept)?;
        if !accept && !ui_cfg.quiet && !cli.json {
            eprintln!("是正は行いませんでした。");
        }
    }

    for attempt in cycle.attempts() {
        report_attempt(engine, bucket, &attempt.rule, &attempt.remediation, ui_cfg, home_dir);
    }

    let report = cycle.finish()?;
    if cli.json {
        write_json(&report)?;
    } else if !report.remediations.is_empty() {
        crate::ui::print_remediations(&report.remediations, ui_cfg);
    }

    let paths = export_all(&cfg.report.dir, &report, &args.export)?;
    if !cli.json && !ui_cfg.quiet {
        for path in &paths {
            println!("レポート: {}", path.display());
        }
    }

    let failed = report
        .remediations
        .iter()
        .filter(|r| !r.outcome.is_success())
        .count();
    if failed > 0 {
        return Err(crate::exit::remediation_failed(format!(
            "{failed} 件の是正に失敗しました: {bucket}"
        )));
    }
    Ok(())
}

fn decide(args: &ScanArgs, cli: &Cli, ui_cfg: &UiConfig) -> Result<bool> {
    let interactive = ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty && !cli.json;
    if args.fix {
        if args.yes {
            return Ok(true);
        }
        if !interactive {
            return Err(crate::exit::invalid_args(
                "scan --fix は TTY が必要です（非対話で実行するには --yes を付けてください）",
            ));
        }
        return confirm_exact(
            "非準拠の項目を是正します。続行するには 'yes' と入力してください: ",
            "yes",
        );
    }
    if !interactive {
        return Ok(false);
    }
    interactive::confirm_yes_no("非準拠の項目を是正しますか？ [y/N]: ")
}

#[derive(Debug, Serialize)]
struct RemediateOutput<'a> {
    resource_id: &'a str,
    issue: &'a str,
    outcome: &'a RemediationOutcome,
    writes: &'a [WriteAttempt],
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<String>,
}

fn run_remediate(
    engine: &Engine,
    args: &RemediateArgs,
    cli: &Cli,
    ui_cfg: &UiConfig,
    home_dir: &Path,
) -> Result<()> {
    let bucket = args.bucket.trim();
    if bucket.is_empty() {
        return Err(crate::exit::invalid_args("バケット名は空にできません"));
    }
    let rule = engine
        .registry()
        .find_by_issue(&args.issue)
        .cloned()
        .ok_or_else(|| {
            crate::exit::invalid_args(format!(
                "未登録の issue です: {}（`bucketguard rules list` で確認してください）",
                args.issue
            ))
        })?;

    if !args.yes {
        if cli.json || !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
            return Err(crate::exit::invalid_args(
                "remediate は TTY が必要です（非対話で実行するには --yes を付けてください）",
            ));
        }
        let prompt = format!(
            "{bucket} の「{}」を是正します。続行するには 'yes' と入力してください: ",
            rule.issue
        );
        if !confirm_exact(&prompt, "yes")? {
            if !ui_cfg.quiet {
                eprintln!("キャンセルしました。");
            }
            return Ok(());
        }
    }

    let remediation = engine.remediate(bucket, &rule.issue)?;
    let log = report_attempt(engine, bucket, &rule, &remediation, ui_cfg, home_dir);

    if cli.json {
        write_json(&RemediateOutput {
            resource_id: bucket,
            issue: &rule.issue,
            outcome: &remediation.outcome,
            writes: &remediation.writes,
            log,
        })?;
    } else if !ui_cfg.quiet {
        println!(
            "{}: {}",
            rule.issue,
            crate::ui::format_outcome(&remediation.outcome, ui_cfg.color)
        );
        if let Some(log) = log {
            println!("ログ: {log}");
        }
    }

    if let RemediationOutcome::Failed { reason } = &remediation.outcome {
        return Err(crate::exit::remediation_failed(format!(
            "是正に失敗しました: {bucket} / {}: {reason}",
            rule.issue
        )));
    }
    Ok(())
}

/// Writes the transaction log for one remediation and surfaces registry
/// inconsistencies. Returns the log location for display.
fn report_attempt(
    engine: &Engine,
    bucket: &str,
    rule: &Rule,
    remediation: &Remediation,
    ui_cfg: &UiConfig,
    home_dir: &Path,
) -> Option<String> {
    if let RemediationOutcome::Failed {
        reason: RemediationFailure::RegistryInconsistency { remediation_id },
    } = &remediation.outcome
    {
        eprintln!(
            "警告: ルール「{}」の是正ID `{remediation_id}` に対応する是正処理がありません（ルール定義を確認してください）",
            rule.issue
        );
    }

    let entry = crate::logs::RemediationEntry {
        started_at: remediation.started_at,
        finished_at: remediation.finished_at,
        provider: engine.provider().name(),
        resource_id: bucket,
        rule,
        outcome: &remediation.outcome,
        writes: &remediation.writes,
    };
    match crate::logs::write_remediation_log(home_dir, &entry) {
        Ok(path) => {
            let hint = crate::logs::display_path(&path, home_dir);
            if ui_cfg.verbose {
                eprintln!("ログ: {hint}");
            }
            Some(hint)
        }
        Err(err) => {
            eprintln!("警告: 是正ログの書き込みに失敗しました: {err:#}");
            None
        }
    }
}

fn run_rules(command: &RulesCommand, rules_path: &Path, cli: &Cli, ui_cfg: &UiConfig) -> Result<()> {
    match command {
        RulesCommand::List => {
            let registry = RuleRegistry::load(rules_path)?;
            if cli.json {
                write_json(registry.rules())?;
            } else {
                crate::ui::print_rules(registry.rules(), ui_cfg);
            }
        }
        RulesCommand::Upsert {
            issue,
            remediation_id,
            benchmark_reference,
        } => {
            let issue = issue.trim();
            let remediation_id = remediation_id.trim();
            if issue.is_empty() || remediation_id.is_empty() {
                return Err(crate::exit::invalid_args(
                    "rules upsert: --issue と --remediation-id は空にできません",
                ));
            }
            let mut registry = RuleRegistry::load(rules_path)?;
            if let Err(err) = registry.lookup(remediation_id) {
                eprintln!("警告: {err}（このルールの検査結果は UNKNOWN になります）");
            }
            let outcome = registry.upsert(Rule::new(
                issue,
                remediation_id,
                benchmark_reference.trim(),
            ));
            registry
                .save(rules_path)
                .context("rules upsert: ルールの保存に失敗しました")?;
            if !ui_cfg.quiet {
                let verb = match outcome {
                    Upsert::Inserted => "追加しました",
                    Upsert::Updated => "更新しました",
                };
                println!("{verb}: {issue}");
            }
        }
    }
    Ok(())
}

fn export_all(
    dir: &Path,
    report: &crate::core::Report,
    formats: &[ReportFormat],
) -> Result<Vec<PathBuf>> {
    let mut seen = Vec::new();
    let mut paths = Vec::new();
    for &format in formats {
        if seen.contains(&format) {
            continue;
        }
        seen.push(format);
        paths.push(crate::export::export(dir, report, format)?);
    }
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn confirm_exact(prompt: &str, expected: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    let mut stderr = std::io::stderr().lock();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = std::io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(false);
    }
    Ok(input.trim() == expected)
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}
