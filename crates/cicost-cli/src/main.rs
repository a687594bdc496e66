mod display;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use cicost_core::aggregate::{Dimension, GroupingSpec, RunFilter, TimeBucket};
use cicost_core::config::{self, EngineConfig};
use cicost_core::normalize::{Provider, RawRun};
use cicost_core::run::Conclusion;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cicost",
    version,
    about = "cicost — CI/CD Cost & Redundancy Analyzer",
    long_about = "Turn exported CI/CD workflow runs into cost, waste and anomaly insights.\n\nFailed and redundant runs cost real money. cicost tells you how much."
)]
struct Cli {
    /// Enable debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze exported workflow runs for cost, waste and anomalies
    Analyze {
        /// JSON file or directory of JSON files with raw run payloads
        path: PathBuf,

        /// Payload format (github, gitlab, canonical)
        #[arg(short, long, default_value = "github")]
        provider: String,

        /// Repository for payloads that do not name one
        #[arg(long)]
        repo: Option<String>,

        /// Engine configuration file (defaults to ./cicost.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comma-separated grouping dimensions
        /// (repository, branch, workflow, classification, conclusion)
        #[arg(long, default_value = "repository")]
        group_by: String,

        /// Time bucket (day, week, month); enables anomaly detection
        #[arg(long)]
        bucket: Option<String>,

        /// Inclusive start date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// Exclusive end date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        to: Option<String>,

        /// Only include these branches
        #[arg(long)]
        branch: Vec<String>,

        /// Only include these conclusions (success, failure, cancelled, skipped)
        #[arg(long)]
        conclusion: Vec<String>,

        /// Number of recent runs to list
        #[arg(long, default_value = "5")]
        recent: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the resolved rate table
    Rates {
        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate an engine configuration file
    CheckConfig {
        /// Path to the TOML configuration
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Analyze {
            path,
            provider,
            repo,
            config,
            group_by,
            bucket,
            from,
            to,
            branch,
            conclusion,
            recent,
            format,
        } => {
            let grouping = parse_grouping(&group_by, bucket.as_deref())?;
            let filter = build_filter(from.as_deref(), to.as_deref(), branch, &conclusion)?;
            cmd_analyze(
                &path,
                &provider,
                repo.as_deref(),
                config.as_deref(),
                &grouping,
                &filter,
                recent,
                &format,
            )
        }
        Commands::Rates { config } => cmd_rates(config.as_deref()),
        Commands::CheckConfig { path } => cmd_check_config(&path),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => config::load_config(p),
        None => {
            let local = Path::new("cicost.toml");
            if local.is_file() {
                config::load_config(local)
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}

fn parse_grouping(group_by: &str, bucket: Option<&str>) -> Result<GroupingSpec> {
    let mut dimensions = Vec::new();
    for name in group_by.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let dimension = Dimension::parse(name)
            .with_context(|| format!("Unknown grouping dimension '{}'", name))?;
        dimensions.push(dimension);
    }

    let mut grouping = GroupingSpec::new(dimensions);
    if let Some(b) = bucket {
        let time_bucket =
            TimeBucket::parse(b).with_context(|| format!("Unknown time bucket '{}'", b))?;
        grouping = grouping.by(time_bucket);
    }
    Ok(grouping)
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn build_filter(
    from: Option<&str>,
    to: Option<&str>,
    branches: Vec<String>,
    conclusions: &[String],
) -> Result<RunFilter> {
    let start = from.map(parse_date).transpose()?;
    let end = to.map(parse_date).transpose()?;
    let mut filter = RunFilter::between(start, end);

    if !branches.is_empty() {
        filter.branches = Some(branches.into_iter().collect());
    }
    if !conclusions.is_empty() {
        let parsed: BTreeSet<Conclusion> = conclusions
            .iter()
            .map(|c| {
                Conclusion::parse(c).with_context(|| format!("Unknown conclusion '{}'", c))
            })
            .collect::<Result<_>>()?;
        filter.conclusions = Some(parsed);
    }
    Ok(filter)
}

fn discover_run_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let pattern = format!("{}/**/*.json", path.display());
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|r| r.ok())
            .collect();
        files.sort();
        return Ok(files);
    }

    anyhow::bail!("Path '{}' does not exist", path.display());
}

/// Accepts a bare array, a single run object, or an API listing envelope.
fn extract_payloads(doc: Value) -> Vec<Value> {
    match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for envelope in ["workflow_runs", "runs", "pipelines"] {
                if let Some(Value::Array(items)) = map.remove(envelope) {
                    return items;
                }
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}

fn load_raw_runs(path: &Path, provider: Provider, repo: Option<&str>) -> Result<Vec<RawRun>> {
    let files = discover_run_files(path)?;
    if files.is_empty() {
        anyhow::bail!(
            "No run files found at '{}'. \
            Point at a JSON export or a directory containing JSON exports.",
            path.display()
        );
    }

    let mut raw_runs = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let doc: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON in {}", file.display()))?;

        let payloads = extract_payloads(doc);
        debug!(file = %file.display(), runs = payloads.len(), "loaded run export");
        for payload in payloads {
            let mut raw = RawRun::new(provider, payload);
            if let Some(r) = repo {
                raw = raw.with_repository(r);
            }
            raw_runs.push(raw);
        }
    }
    Ok(raw_runs)
}

#[allow(clippy::too_many_arguments)]
fn cmd_analyze(
    path: &Path,
    provider: &str,
    repo: Option<&str>,
    config_path: Option<&Path>,
    grouping: &GroupingSpec,
    filter: &RunFilter,
    recent: usize,
    format: &str,
) -> Result<()> {
    let provider = Provider::parse(provider)?;
    let config = resolve_config(config_path)?;
    let raw_runs = load_raw_runs(path, provider, repo)?;

    let report = cicost_core::analyze_batch(&raw_runs, &config, grouping, filter, Utc::now())
        .context("Invalid engine configuration")?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&report)?;
            println!("{}", json);
        }
        _ => display::print_insight_report(&path.display().to_string(), &report, recent),
    }

    Ok(())
}

fn cmd_rates(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let table = config.rate_table().context("Invalid rate configuration")?;
    display::print_rate_table(&table);
    Ok(())
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = config::load_config(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in '{}'", path.display()))?;
    display::print_config_ok(path, &config);
    Ok(())
}
