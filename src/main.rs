//! detqa CLI entry point.
//!
//! Provides `run` (distributed), `local` (sequential), `inspect`, and the
//! hidden `worker` subcommand the distributed controller spawns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use detqa::config::{resolve_config, Config};
use detqa::controller::{self, Pipeline, RunOptions, WorkerEndpoints};
use detqa::logging;

/// detqa: quality assessment of per-detector instrument images.
#[derive(Parser)]
#[command(name = "detqa", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,

    /// Log progress at info level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.detqa/config.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Input and output locations.
#[derive(Args)]
struct IoArgs {
    /// Directory with the input images.
    #[arg(short = 'i', long = "input", default_value = "./")]
    input_dir: PathBuf,

    /// Report document (`-` writes it to stdout in `local`).
    #[arg(short = 'o', long = "output", default_value = "report.out")]
    report: PathBuf,

    /// Intermediate results document (`-` as for `--output`).
    #[arg(short = 'r', long = "results", default_value = "results.out")]
    results: PathBuf,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Process a directory with a pool of workers.
    Run {
        #[command(flatten)]
        io: IoArgs,

        /// Number of workers.
        #[arg(short = 'p', long = "processors", default_value_t = 2,
              value_parser = clap::value_parser!(u16).range(1..))]
        processors: u16,

        /// Run workers as tasks in this process instead of child processes.
        #[arg(long)]
        tasks: bool,
    },
    /// Process a directory sequentially in this process.
    Local {
        #[command(flatten)]
        io: IoArgs,
    },
    /// Load images and print their metadata and resolved plan.
    Inspect {
        /// Work items (`path` or `path[N]`).
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// Worker process body (spawned by `run`).
    #[command(hide = true)]
    Worker {
        /// Worker index, for logs.
        #[arg(long)]
        id: usize,

        /// Work queue address.
        #[arg(long)]
        queue: SocketAddr,

        /// Report sink address.
        #[arg(long)]
        report_sink: SocketAddr,

        /// Results sink address.
        #[arg(long)]
        result_sink: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    let _guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir, cli.verbose)?),
        None => {
            logging::init_cli(cli.verbose);
            None
        }
    };

    let options = |io: IoArgs, workers: usize| RunOptions {
        input_dir: io.input_dir,
        report_path: io.report,
        results_path: io.results,
        workers,
        verbose: cli.verbose,
        config_path: cli.config.clone(),
    };

    match cli.command {
        Command::Run {
            io,
            processors,
            tasks,
        } => handle_run(&config, options(io, usize::from(processors)), tasks).await,
        Command::Local { io } => handle_local(&config, options(io, 1)).await,
        Command::Inspect { items } => handle_inspect(&config, &items),
        Command::Worker {
            id,
            queue,
            report_sink,
            result_sink,
        } => {
            let endpoints = WorkerEndpoints {
                queue,
                report_sink,
                result_sink,
            };
            controller::run_worker(&config, id, endpoints).await?;
            Ok(())
        }
    }
}

/// Run the distributed pipeline and report timing.
async fn handle_run(config: &Config, options: RunOptions, tasks: bool) -> anyhow::Result<()> {
    let started = Instant::now();
    let summary = if tasks {
        controller::run_in_process(config, &options).await?
    } else {
        controller::run_distributed(config, &options).await?
    };
    if summary.failed_workers > 0 {
        error!(
            failed = summary.failed_workers,
            workers = summary.workers,
            "some workers failed"
        );
    }
    info!(
        items = summary.items_served,
        reports = summary.reports_written,
        results = summary.results_written,
        "run complete"
    );
    println!("Execution time: {:.2} s", started.elapsed().as_secs_f64());
    Ok(())
}

/// Run the sequential pipeline and report timing.
async fn handle_local(config: &Config, options: RunOptions) -> anyhow::Result<()> {
    let started = Instant::now();
    let summary = controller::run_local(config, &options).await?;
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        "run complete"
    );
    println!("Execution time: {:.2} s", started.elapsed().as_secs_f64());
    Ok(())
}

/// Print metadata and the resolved plan for each item.
fn handle_inspect(config: &Config, items: &[String]) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config).context("failed to build pipeline")?;
    for item in items {
        let (image, plan) = pipeline.inspect(item)?;
        println!("{}", image.name);
        println!("  instrument: {}", image.instrument);
        println!("  mode:       {}", image.observing_mode);
        match (image.detector, image.quadrant) {
            (Some(detector), Some(quadrant)) => {
                println!("  location:   detector {detector}, quadrant {quadrant}");
            }
            _ => println!("  location:   unknown"),
        }
        println!("  checks:     {}", plan.check_names().join(", "));
        println!("  reports:    {}", plan.report_names().join(", "));
    }
    Ok(())
}
