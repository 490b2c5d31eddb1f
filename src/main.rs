//! billwatch - cloud billing reports and cost alerts
//!
//! Reads a BigQuery billing export table, prints cost summaries, and
//! watches for cost increases.
//!
//! ## Usage
//!
//! ```bash
//! # Cost per SKU over the last 40 days
//! billwatch report
//!
//! # Per-service report over 7 days with a per-day breakdown
//! billwatch report --days 7 --group-by service --daily
//!
//! # Poll every 10 minutes, alert on a rise of 5$ or more
//! billwatch monitor -s 600 -t 5
//!
//! # Debug logs, also written as JSON to ~/.billwatch/logs/
//! billwatch -v debug -f monitor
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use billwatch_core::{BillingError, BillwatchConfig, LogGuard, init_logging};
use billwatch_monitor::{
    BillingMonitor, DEFAULT_POLL_SECS, DEFAULT_WINDOW_DAYS, ErrorPolicy, MonitorConfig,
    SlackNotifier,
};
use billwatch_query::{BigQueryExecutor, BillingQuery, Columns, DEFAULT_LIMIT};
use billwatch_report::{BarScale, DEFAULT_BAR_WIDTH, GroupBy, REPORT_INDEX, ReportOptions, build_report};

/// Cloud billing reports and cost-delta alerts
///
/// Queries a BigQuery billing export table configured in a YAML file
/// (--config, or the GCLOUD_CONFIG_FILE environment variable).
#[derive(Parser, Debug)]
#[command(name = "billwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level
    #[arg(
        short,
        long,
        global = true,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warning", "error", "critical"]
    )]
    verbosity: String,

    /// Also write JSON logs to a daily rolling file
    #[arg(short = 'f', long = "file", global = true)]
    log_to_file: bool,

    /// Directory for log files (defaults to ~/.billwatch/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Path to the YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a cost summary of recent billing rows
    Report(ReportArgs),
    /// Poll billing costs and alert on increases
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Number of past days to include
    #[arg(long, default_value_t = 40, value_parser = clap::value_parser!(u32).range(1..))]
    days: u32,

    /// Column to group costs by
    #[arg(long, value_enum, default_value_t = GroupByArg::Sku)]
    group_by: GroupByArg,

    /// Number of bins of the cost bar column
    #[arg(long, default_value_t = DEFAULT_BAR_WIDTH)]
    bar_width: usize,

    /// Scale bars over 0..1 instead of the observed range
    #[arg(long)]
    fixed_bar_scale: bool,

    /// Also print cost per day
    #[arg(long)]
    daily: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GroupByArg {
    Sku,
    Service,
    Project,
}

impl From<GroupByArg> for GroupBy {
    fn from(arg: GroupByArg) -> Self {
        match arg {
            GroupByArg::Sku => GroupBy::Sku,
            GroupByArg::Service => GroupBy::Service,
            GroupByArg::Project => GroupBy::Project,
        }
    }
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Seconds between polls
    #[arg(short, long, default_value_t = DEFAULT_POLL_SECS)]
    seconds: u64,

    /// Cost rise in USD between polls that triggers an alert
    #[arg(short = 't', long, default_value_t = 1.0)]
    usd_threshold: f64,

    /// Trailing window in days summed on every poll
    #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS as u32, value_parser = clap::value_parser!(u32).range(1..))]
    window_days: u32,

    /// Slack channel for alerts (defaults to slack.channel in the config)
    #[arg(long)]
    channel: Option<String>,

    /// Log failed polls and keep polling instead of exiting
    #[arg(long)]
    keep_going: bool,

    /// Stop after this many polls
    #[arg(long)]
    max_iterations: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = friendly_message(&e);
            error!("billwatch error: {}", message);
            eprintln!("Error: {}", message);
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> billwatch_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), &cli.verbosity, cli.log_to_file)
}

fn friendly_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<BillingError>() {
        Some(billing) => billing.friendly_message(),
        None => format!("{e:#}"),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = BillwatchConfig::load_from(cli.config.as_deref())?;
    match cli.command {
        Command::Report(args) => run_report(&config, args).await,
        Command::Monitor(args) => run_monitor(&config, args).await,
    }
}

async fn run_report(config: &BillwatchConfig, args: ReportArgs) -> anyhow::Result<()> {
    let executor = BigQueryExecutor::from_config(&config.bigquery)?;
    let query = BillingQuery::new(&executor, &config.bigquery.billing_table_name);

    let from = Utc::now() - TimeDelta::days(i64::from(args.days));
    info!(days = args.days, %from, "fetching billing rows");
    let rows = query
        .fetch_nonzero(Columns::All, REPORT_INDEX, from, DEFAULT_LIMIT)
        .await?;
    if rows.len() as u64 == DEFAULT_LIMIT {
        warn!(limit = DEFAULT_LIMIT, "row limit reached, report may be incomplete");
    }

    let options = ReportOptions {
        group_by: args.group_by.into(),
        bar_width: args.bar_width,
        bar_scale: if args.fixed_bar_scale {
            BarScale::Fixed
        } else {
            BarScale::Observed
        },
        daily: args.daily,
    };
    let report = build_report(&rows, &options)?;
    println!("{}", report.render());
    Ok(())
}

async fn run_monitor(config: &BillwatchConfig, args: MonitorArgs) -> anyhow::Result<()> {
    let slack = config.require_slack()?;
    let executor = BigQueryExecutor::from_config(&config.bigquery)?;
    let notifier = SlackNotifier::from_config(slack)?;

    let mut monitor_config = MonitorConfig::new(
        config.bigquery.billing_table_name.clone(),
        args.channel.unwrap_or_else(|| slack.channel.clone()),
    );
    monitor_config.poll_interval = Duration::from_secs(args.seconds);
    monitor_config.usd_threshold = args.usd_threshold;
    monitor_config.window = TimeDelta::days(i64::from(args.window_days));
    monitor_config.max_iterations = args.max_iterations;
    if args.keep_going {
        monitor_config.error_policy = ErrorPolicy::Continue;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping monitor");
            on_signal.cancel();
        }
    });

    let mut monitor = BillingMonitor::new(&executor, &notifier, monitor_config);
    let state = monitor
        .run(cancel)
        .await
        .context("monitor stopped")?;
    info!(
        iterations = state.iteration_count,
        last_cost = state.last_cost,
        "monitor finished"
    );
    Ok(())
}
