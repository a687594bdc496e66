use cicost_core::anomaly::AnomalyResult;
use cicost_core::config::EngineConfig;
use cicost_core::rates::RateTable;
use cicost_core::report::InsightReport;
use cicost_core::run::{Classification, Run};
use colored::*;
use std::path::Path;

/// Print the full insight report to the terminal.
pub fn print_insight_report(source: &str, report: &InsightReport, recent: usize) {
    println!();
    println!(
        "{}",
        format!(" cicost v{} — Analyzing {}", env!("CARGO_PKG_VERSION"), source).bold()
    );
    println!();

    let kpis = &report.kpis;
    println!(" {}", "Overview".bold().underline());
    println!(" {} Total runs:          {}", "|-".dimmed(), kpis.total_runs);
    println!(
        " {} Successful / failed: {} / {}",
        "|-".dimmed(),
        kpis.success_count.to_string().green(),
        if kpis.failure_count > 0 {
            kpis.failure_count.to_string().red().bold().to_string()
        } else {
            "0".to_string()
        }
    );
    println!(
        " {} Success rate:        {:.1}%",
        "|-".dimmed(),
        kpis.success_rate * 100.0
    );
    println!(
        " {} Avg duration:        {}",
        "|-".dimmed(),
        format_minutes(kpis.avg_duration_minutes)
    );
    println!();

    println!(" {}", "Cost".bold().underline());
    println!(" {} Overall:    {}", "|-".dimmed(), money(kpis.total_cost).bold());
    println!(" {} Failed:     {}", "|-".dimmed(), money(kpis.failed_cost).red());
    println!(
        " {} Redundant:  {} ({:.1}% of spend)",
        "|-".dimmed(),
        money(kpis.redundant_cost).yellow(),
        kpis.redundant_cost_ratio * 100.0
    );
    println!(
        " {} Est. savings at {:.0}% waste reduction: {} {}",
        "|-".dimmed(),
        report.savings.target_reduction_fraction * 100.0,
        money(report.savings.projected_savings).green(),
        "(estimate)".dimmed()
    );
    println!();

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    if report.buckets.is_empty() {
        println!(" {} No runs matched the filter.", "--".dimmed());
    } else {
        println!(" {}", "Breakdown".bold().underline());
        for bucket in &report.buckets {
            println!(
                " {} {:<40} {:>4} runs  {:>10}  failed {:>9}  redundant {:>9}  avg {}",
                "|-".dimmed(),
                bucket.label(),
                bucket.run_count,
                money(bucket.total_cost),
                money(bucket.failed_cost),
                money(bucket.redundant_cost),
                format_minutes(bucket.avg_duration_minutes)
            );
        }
    }
    println!();

    if !report.anomalies.is_empty() || !report.skipped_anomaly_keys.is_empty() {
        println!(" {}", "Anomalies".bold().underline());
        for anomaly in &report.anomalies {
            print_anomaly(&anomaly.key.join("/"), &anomaly.result);
        }
        for skipped in &report.skipped_anomaly_keys {
            println!(
                " {} {} {}",
                "|-".dimmed(),
                skipped.key.join("/"),
                format!("skipped: {}", skipped.reason).dimmed()
            );
        }
        println!();
    }

    let runs = report.recent_runs(recent);
    if !runs.is_empty() {
        println!(" {}", "Recent Runs".bold().underline());
        for run in runs {
            print_run(run);
        }
        println!();
    }

    if !report.rejected.is_empty() {
        println!(
            " {} {} run(s) could not be normalized:",
            "WARN".yellow().bold(),
            report.rejected.len()
        );
        for rejected in &report.rejected {
            println!(
                "   {} #{} {} {}",
                "|".dimmed(),
                rejected.index,
                rejected.id.as_deref().unwrap_or("<no id>"),
                rejected.error.to_string().dimmed()
            );
        }
        println!();
    }
}

fn print_anomaly(label: &str, result: &AnomalyResult) {
    let period = result.period.as_deref().unwrap_or("latest");
    if result.is_anomalous() {
        let deviation = result.deviation.unwrap_or(0.0);
        println!(
            " {} {} {} {} {} vs baseline {:.2} ({:+.2}{})",
            " ANOMALY ".on_red().white().bold(),
            label.bold(),
            period,
            result.metric.as_str(),
            format!("{:.2}", result.observed).red(),
            result.baseline_mean,
            deviation,
            result
                .z_score
                .map(|z| format!(", {:.1}σ", z))
                .unwrap_or_default()
        );
    } else {
        println!(
            " {} {} {} {} {:.2} within {:.2}",
            "OK".green().bold(),
            label,
            period,
            result.metric.as_str(),
            result.observed,
            result.threshold
        );
    }
}

fn print_run(run: &Run) {
    let label = match run.classification {
        Some(Classification::Failed) => "failed".red().to_string(),
        Some(Classification::Redundant) => "redundant".yellow().to_string(),
        Some(Classification::Productive) => "productive".green().to_string(),
        None => "unclassified".dimmed().to_string(),
    };
    println!(
        " {} {} | {} | {} | {} | {} | {}",
        "|-".dimmed(),
        run.started_at.format("%Y-%m-%d %H:%M"),
        run.repository,
        run.branch,
        run.conclusion.map(|c| c.as_str()).unwrap_or(run.status.as_str()),
        label,
        money(run.cost_amount())
    );
}

/// Print the rate table.
pub fn print_rate_table(table: &RateTable) {
    println!();
    println!("{}", " cicost Rate Table".bold());
    println!();
    let entries = table.entries();
    if entries.is_empty() {
        println!(" {} No provider-specific rates configured.", "|-".dimmed());
    }
    for entry in entries {
        println!(
            " {} {:<12} {:<12} {}/min",
            "|-".dimmed(),
            entry.provider,
            entry.runner_class.as_str(),
            money_precise(entry.per_minute)
        );
    }
    println!(
        " {} {:<25} {}/min",
        "|-".dimmed(),
        "default".cyan(),
        money_precise(table.default_rate())
    );
    println!();
}

pub fn print_config_ok(path: &Path, config: &EngineConfig) {
    println!(
        " {} {} is valid ({} rate entries, anomaly k={}, window={})",
        "OK".green().bold(),
        path.display(),
        config.rates.entries.len(),
        config.anomaly.sensitivity,
        config.anomaly.baseline_window
    );
}

fn money(amount: f64) -> String {
    format!("${:.2}", amount)
}

fn money_precise(amount: f64) -> String {
    format!("${:.4}", amount)
}

/// Format minutes as `1h 05m`, `12m 30s` or `45s`.
pub fn format_minutes(minutes: f64) -> String {
    let secs = (minutes * 60.0).round() as u64;
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes() {
        assert_eq!(format_minutes(0.5), "30s");
        assert_eq!(format_minutes(12.5), "12m 30s");
        assert_eq!(format_minutes(65.0), "1h 05m");
    }

    #[test]
    fn formats_money() {
        assert_eq!(money(20.0), "$20.00");
        assert_eq!(money_precise(0.008), "$0.0080");
    }
}
