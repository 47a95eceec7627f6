use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sprawl_core::{
    Scan, ScanConfig, ScanOutcome, ScanReport, ScanStatus, Target, format_duration,
    modules::{JsonSink, ParentDomains, UrlHosts},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sprawl")]
#[command(about = "Expand a target into a provenance-tracked graph of discoveries")]
struct Cli {
    /// Seeds: host names, IPs, host:port pairs or URLs
    #[arg(required = true)]
    seeds: Vec<String>,

    /// In-scope entries. Defaults to the seeds
    #[arg(short, long, num_args = 1..)]
    whitelist: Vec<String>,

    /// Entries that are never scanned, even when whitelisted
    #[arg(short, long, num_args = 1..)]
    blacklist: Vec<String>,

    /// Don't treat sub-domains of scope entries as in scope
    #[arg(long)]
    strict_scope: bool,

    /// Overrides `max_scope_distance` from the config
    #[arg(short = 'd', long)]
    max_distance: Option<u32>,

    /// TOML scan config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON lines output. Defaults to ~/.sprawl/scans/<name>/output.jsonl
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Scan name
    #[arg(short, long)]
    name: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool, config_filter: Option<&str>) {
    let fallback = if verbose {
        "debug"
    } else {
        config_filter.unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.cyan} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(spinner_style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn default_output(name: &str) -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".sprawl").join("scans").join(name).join("output.jsonl"))
}

/// `--output` wins over `[modules.json] path`, and is written back so the
/// sink and the summary agree. `None` means neither was given.
fn resolve_output(cli_output: Option<PathBuf>, config: &mut ScanConfig) -> Option<PathBuf> {
    match cli_output {
        Some(path) => {
            if let Some(opts) = config.modules.get_mut("json") {
                opts.remove("path");
            }
            Some(path)
        }
        None => config
            .module_options("json")
            .and_then(|opts| opts.get("path"))
            .and_then(toml::Value::as_str)
            .map(PathBuf::from),
    }
}

fn print_summary(report: &ScanReport, output: &std::path::Path) {
    let mark = match &report.status {
        ScanStatus::Finished(ScanOutcome::Succeeded) => style("✓").green().bold(),
        ScanStatus::Finished(ScanOutcome::Aborted) => style("!").yellow().bold(),
        _ => style("✗").red().bold(),
    };
    println!(
        "{} Scan {} {} in {}",
        mark,
        style(&report.name).bold(),
        report.status.label(),
        style(format_duration(report.duration)).dim()
    );
    if let ScanStatus::Finished(ScanOutcome::Failed { reason }) = &report.status {
        println!("  {} {}", style("reason:").red(), reason);
    }

    println!("{}", style("─".repeat(60)).dim());
    let mut by_type: std::collections::BTreeMap<&str, usize> = Default::default();
    for record in &report.graph {
        *by_type.entry(record.event.event_type()).or_default() += 1;
    }
    for (event_type, count) in by_type {
        println!("  {:<20} {}", style(event_type).cyan(), count);
    }

    let stats = &report.stats;
    println!(
        "  {}",
        style(format!(
            "{} merged, {} blacklisted, {} invalid, {} past scope",
            stats.duplicates, stats.blacklisted, stats.invalid, stats.distance_capped
        ))
        .dim()
    );
    println!("{}", style("─".repeat(60)).dim());

    if let Some(summary) = report.failure_summary() {
        println!("{}", style("Module failures:").yellow().bold());
        print!("{summary}");
    }
    println!("{} {}", style("Output:").bold(), output.display());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ScanConfig::load(path)
            .await
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ScanConfig::default(),
    };
    init_tracing(cli.verbose, config.log_filter.as_deref());

    if let Some(distance) = cli.max_distance {
        config.max_scope_distance = distance;
    }
    if cli.name.is_some() {
        config.name = cli.name.clone();
    }

    let mut target = Target::builder(cli.seeds.clone())
        .strict_scope(cli.strict_scope)
        .blacklist(cli.blacklist.clone());
    if !cli.whitelist.is_empty() {
        target = target.whitelist(cli.whitelist.clone());
    }
    let target = target.build()?;

    let configured = resolve_output(cli.output.clone(), &mut config);
    let scan = Scan::new(config, target)?;
    let output = match configured {
        Some(path) => path,
        None => default_output(scan.name())?,
    };
    info!(scan = scan.name(), output = %output.display(), "writing scan output");
    let scan = scan
        .with_module(UrlHosts)
        .with_module(ParentDomains)
        .with_module(JsonSink::new(&output));

    println!(
        "\n{}  {}\n",
        style("sprawl").cyan().bold(),
        style(scan.name()).dim()
    );

    let cancel = scan.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, aborting scan");
            cancel.cancel();
        }
    });

    let spinner = create_spinner("Scanning...");
    let report = scan.run().await;
    spinner.finish_and_clear();
    let report = report?;

    print_summary(&report, &output);
    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}
