use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use kb_bakeoff::compare::run_compare;
use kb_bakeoff::config::{CompareConfig, DatabaseTarget, RunConfig, TestType};
use kb_bakeoff::error::{
    BenchError, EXIT_CONDITIONAL_PASS, EXIT_FAIL, EXIT_INTERNAL, EXIT_INTERRUPTED, EXIT_PASS,
    EXIT_USAGE,
};
use kb_bakeoff::executor::run_benchmark;
use kb_bakeoff::report::{print_console_summary, write_artifacts};
use kb_bakeoff::thresholds::{evaluate_session, Thresholds, Verdict};

#[derive(Parser, Debug)]
#[command(author, version, about = "Knowledge-base database bake-off benchmark driver")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one benchmark session against a SUT
    Run(RunArgs),
    /// Drive the full database comparison matrix
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Base URL of the system under test
    base_url: String,

    /// Mix pattern: a builtin name or an ad-hoc lookup/analytics/write triple
    #[arg(long)]
    pattern: String,

    /// Total request budget
    #[arg(long, default_value_t = 10_000, value_parser = value_parser!(u64).range(1..))]
    requests: u64,

    /// Maximum requests in flight
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Warm-up requests issued and discarded before measurement
    #[arg(long, default_value_t = 0)]
    warmup: u64,

    /// Per-request deadline in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Record the session as cache-enabled (the cache itself lives in the SUT)
    #[arg(long)]
    cache: bool,

    /// Prefix for the JSON/CSV/evaluation artifacts
    #[arg(long)]
    output: Option<PathBuf>,

    /// Path segment prepended to catalogue paths for SUTs multiplexing
    /// several databases
    #[arg(long)]
    db_prefix: Option<String>,

    /// JSON file of curated identifier pools
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// RNG seed for reproducible request sequences
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Session label used in artifacts (defaults to the pattern name)
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Base URL of the system under test
    base_url: String,

    /// Database targets, comma separated (name or name=prefix)
    #[arg(long, required = true, value_delimiter = ',')]
    databases: Vec<String>,

    /// Mix patterns to sweep, comma separated
    #[arg(long, value_delimiter = ',', default_value = "lookup-95,balanced-50,analytics-20")]
    workloads: Vec<String>,

    /// Concurrency levels to sweep, comma separated
    #[arg(long, value_delimiter = ',', default_value = "10")]
    concurrency: Vec<usize>,

    /// Which matrix axes to sweep
    #[arg(long, value_enum, default_value_t = TestType::Both)]
    test_type: TestType,

    /// Request budget per measured session
    #[arg(long, default_value_t = 10_000, value_parser = value_parser!(u64).range(1..))]
    requests: u64,

    /// Skip the warm-up session before each measured session
    #[arg(long)]
    no_warmup: bool,

    /// Per-request deadline in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Directory receiving summaries and per-run artifacts
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// JSON file of externally assessed curation/operational scores
    #[arg(long)]
    scores: Option<PathBuf>,

    /// JSON file of curated identifier pools
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// RNG seed for reproducible request sequences
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::from(EXIT_INTERNAL);
    }

    // A first Ctrl-C stops issuance; in-flight requests settle and the
    // partial session is still reported.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight work");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = match cli.command {
        Command::Run(args) => run_command(args, shutdown_rx).await,
        Command::Compare(args) => compare_command(args, shutdown_rx).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn verdict_exit(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Pass => EXIT_PASS,
        Verdict::ConditionalPass => EXIT_CONDITIONAL_PASS,
        Verdict::Fail => EXIT_FAIL,
    }
}

async fn run_command(
    args: RunArgs,
    shutdown: watch::Receiver<bool>,
) -> Result<ExitCode, BenchError> {
    let cfg = RunConfig {
        base_url: args.base_url,
        pattern: args.pattern,
        requests: args.requests,
        concurrency: args.concurrency,
        warmup: args.warmup,
        timeout: Duration::from_secs(args.timeout_secs),
        cache_enabled: args.cache,
        output: args.output,
        db_prefix: args.db_prefix,
        dataset: args.dataset,
        seed: args.seed,
        name: args.name,
    };

    let metrics = run_benchmark(&cfg, shutdown).await?;
    let evaluation = evaluate_session(&metrics, &Thresholds::baseline());
    print_console_summary(&metrics, &evaluation);
    if let Some(prefix) = &cfg.output {
        write_artifacts(prefix, &metrics, &evaluation).await?;
    }

    let code = match metrics.meta.interrupted {
        true => EXIT_INTERRUPTED,
        false => verdict_exit(evaluation.verdict),
    };
    Ok(ExitCode::from(code))
}

async fn compare_command(
    args: CompareArgs,
    shutdown: watch::Receiver<bool>,
) -> Result<ExitCode, BenchError> {
    let mut databases = Vec::with_capacity(args.databases.len());
    for raw in &args.databases {
        databases.push(DatabaseTarget::parse(raw)?);
    }

    let cfg = CompareConfig {
        base_url: args.base_url,
        databases,
        workloads: args.workloads,
        concurrency_levels: args.concurrency,
        test_type: args.test_type,
        requests: args.requests,
        warmup: !args.no_warmup,
        timeout: Duration::from_secs(args.timeout_secs),
        output_dir: args.output_dir,
        scores: args.scores,
        dataset: args.dataset,
        seed: args.seed,
    };

    let worst = run_compare(&cfg, shutdown).await?;
    Ok(ExitCode::from(verdict_exit(worst)))
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
