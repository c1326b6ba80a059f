//! CLI entrypoint for `parkaudit`.
//!
//! Parses command-line arguments, validates input files, runs the library
//! engine over the subscription and transaction exports, prints a terminal
//! summary, and optionally writes CSV exports when an output directory is
//! provided.
use std::fs;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use log::{LevelFilter, error};
use parkaudit::{
    engine::{Engine, EngineOptions},
    export::{save_roster_csv, save_sessions_csv},
    io::DEFAULT_MMAP_THRESHOLD_BYTES,
    report::render_summary_with_top,
    rows::RowFilter,
    ticks::TickMode,
};

#[derive(Parser, Debug)]
#[command(
    name = "parkaudit",
    version,
    about = "Parking subscription overlap auditor"
)]
struct Args {
    /// Path to the enterprise subscription export
    #[arg(short = 's', long = "subscriptions", required = true)]
    subscriptions: PathBuf,

    /// Path to the transaction export
    #[arg(short = 't', long = "transactions", required = true)]
    transactions: PathBuf,

    /// Path to the output directory
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Subscription program to include (repeatable; defaults to the
    /// primary and additional vehicle programs)
    #[arg(long = "program")]
    programs: Vec<String>,

    /// Transaction site to include (repeatable; defaults to the garage sites)
    #[arg(long = "site")]
    sites: Vec<String>,

    /// Include transactions from every site
    #[arg(long = "all-sites", conflicts_with = "sites")]
    all_sites: bool,

    /// Subscription status to exclude from transactions (repeatable;
    /// defaults to Transient)
    #[arg(long = "exclude-status")]
    excluded_statuses: Vec<String>,

    /// Do not backfill user ids for subscribers registered without email
    #[arg(long = "skip-id-search")]
    skip_id_search: bool,

    /// Encode visit times as exact calendar minutes
    #[arg(long = "calendar-ticks")]
    calendar_ticks: bool,

    /// Skip transactions with malformed dates, times or durations instead
    /// of aborting
    #[arg(long = "skip-malformed")]
    skip_malformed: bool,

    /// Override mmap threshold in bytes. If zero, disable mmap.
    #[arg(long = "mmap-threshold", default_value_t = DEFAULT_MMAP_THRESHOLD_BYTES)]
    mmap_threshold: u64,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Load inputs and scan identities in parallel
    #[arg(long = "parallel")]
    parallel: bool,

    /// Limit number of entries in "Top Violators"
    #[arg(long = "top", default_value_t = 10)]
    top_limit: usize,

    /// Control color output (auto, always, never)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Suppress summary output (still writes exports if -o is provided)
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

const ASCII_TITLE: &str = r#"
                    __                   ___ __
    ____  ____ ______/ /______ ___  ______/ (_) /_
   / __ \/ __ `/ ___/ //_/ __ `/ / / / __  / / __/
  / /_/ / /_/ / /  / ,< / /_/ / /_/ / /_/ / / /_
 / .___/\__,_/_/  /_/|_|\__,_/\__,_/\__,_/_/\__/
/_/
"#;

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

fn verify_inputs(args: &Args) -> Result<()> {
    if !args.subscriptions.exists() {
        bail!(
            "subscription file not found: {}",
            args.subscriptions.display()
        );
    }
    if !args.transactions.exists() {
        bail!(
            "transaction file not found: {}",
            args.transactions.display()
        );
    }
    Ok(())
}

fn row_filter(args: &Args) -> RowFilter {
    let defaults = RowFilter::default();
    RowFilter {
        programs: if args.programs.is_empty() {
            defaults.programs
        } else {
            args.programs.clone()
        },
        sites: if args.all_sites {
            Vec::new()
        } else if args.sites.is_empty() {
            defaults.sites
        } else {
            args.sites.clone()
        },
        excluded_statuses: if args.excluded_statuses.is_empty() {
            defaults.excluded_statuses
        } else {
            args.excluded_statuses.clone()
        },
    }
}

fn engine_options(args: &Args) -> EngineOptions {
    EngineOptions {
        tick_mode: if args.calendar_ticks {
            TickMode::Calendar
        } else {
            TickMode::Approximate
        },
        identify_unknown: !args.skip_id_search,
        skip_malformed: args.skip_malformed,
        parallel: args.parallel,
    }
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose);
    // Configure color policy
    match args.color {
        ColorChoice::Always => {
            colored::control::set_override(true);
        }
        ColorChoice::Never => {
            colored::control::set_override(false);
        }
        ColorChoice::Auto => {}
    }
    if let Err(e) = verify_inputs(&args) {
        error!("{}", e);
        std::process::exit(2);
    }
    let mut engine = Engine::with_options(engine_options(&args), row_filter(&args));
    let threshold = if args.mmap_threshold == 0 {
        u64::MAX
    } else {
        args.mmap_threshold
    };

    let load_res = if args.parallel {
        engine.load_from_file_paths_parallel_with_threshold(
            &args.subscriptions,
            &args.transactions,
            threshold,
        )
    } else {
        engine.load_from_file_paths_with_threshold(
            &args.subscriptions,
            &args.transactions,
            threshold,
        )
    };
    if let Err(e) = load_res {
        error!("failed to process inputs: {:#}", e);
        std::process::exit(3);
    }

    if !args.quiet {
        // Print banner and summary
        println!("{}", ASCII_TITLE.bold().green());
        let summary = render_summary_with_top(&engine, args.top_limit);
        println!("{}", summary);
    }

    if let Some(outdir) = args.output {
        if let Err(e) = fs::create_dir_all(&outdir) {
            error!(
                "failed to create output directory {}: {}",
                outdir.display(),
                e
            );
            std::process::exit(4);
        }
        let ts = chrono::Local::now().format("%Y.%m.%d_%H.%M.%S");
        let roster = outdir.join(format!("parkaudit_roster_{}.csv", ts));
        let sessions = outdir.join(format!("parkaudit_sessions_{}.csv", ts));
        if let Err(e) = save_roster_csv(&engine, &roster) {
            error!("failed to write {}: {}", roster.display(), e);
            std::process::exit(5);
        }
        if let Err(e) = save_sessions_csv(&engine, &sessions) {
            error!("failed to write {}: {}", sessions.display(), e);
            std::process::exit(6);
        }
        log::info!(
            "wrote {} and {}",
            roster.display(),
            sessions.display()
        );
    }
}
