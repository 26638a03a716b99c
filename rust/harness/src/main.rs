//! AlgoPerf Launcher CLI
//!
//! Launches benchmark workloads one container at a time and prints worker
//! bootstrap settings.

use std::{collections::BTreeMap, path::PathBuf};

use algoperf_config::{Framework, RunPercentage};
use algoperf_core::{
    DeviceContext, ProcessEnv, Profiler, bootstrap::init_from_env, logging::rank_filter,
};
use algoperf_harness::{
    config::{
        DEFAULT_DOCKER_IMAGE_URL, DEFAULT_EXPERIMENT_BASENAME, DEFAULT_SUBMISSION_PATH,
        DEFAULT_TUNING_SEARCH_SPACE, LauncherConfig, LauncherFile, RunOptions,
    },
    docker::DockerHost,
    scheduler::Scheduler,
};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "algoperf-harness", about = "AlgoPerf Workload Launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch every workload in sequence
    Run(RunArgs),

    /// Print the workload table with step budgets
    Workloads {
        /// Percentage of each workload's max steps
        #[arg(long, alias = "run_percentage", default_value = "100")]
        run_percentage: RunPercentage,

        /// Path to a launcher.toml with a workload table override
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Bootstrap this process and print the resulting worker environment
    Bootstrap {
        /// Print JSON instead of `export` lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Framework the submission is written for
    #[arg(long, value_enum, ignore_case = true)]
    framework: Framework,

    /// Algorithm name, used for the experiment directory
    #[arg(long)]
    algorithm: String,

    #[arg(long, alias = "docker_image_url", default_value = DEFAULT_DOCKER_IMAGE_URL)]
    docker_image_url: String,

    /// Image tag appended to the image URL
    #[arg(long)]
    tag: Option<String>,

    /// Percentage of each workload's max steps
    #[arg(long, alias = "run_percentage", default_value = "100")]
    run_percentage: RunPercentage,

    /// Top directory for results
    #[arg(long, alias = "experiment_basename", default_value = DEFAULT_EXPERIMENT_BASENAME)]
    experiment_basename: String,

    /// Have containers rsync datasets from the bucket
    #[arg(long, alias = "rsync_data", action = ArgAction::Set, default_value_t = true)]
    rsync_data: bool,

    /// Mount the local benchmark checkout into the containers
    #[arg(long)]
    local: bool,

    #[arg(long, alias = "submission_path", default_value = DEFAULT_SUBMISSION_PATH)]
    submission_path: String,

    #[arg(long, alias = "tuning_search_space", default_value = DEFAULT_TUNING_SEARCH_SPACE)]
    tuning_search_space: String,

    /// Print commands instead of running them
    #[arg(long, alias = "dry_run")]
    dry_run: bool,

    /// Path to a launcher.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only launch these workloads (repeatable)
    #[arg(short, long = "workload")]
    workloads: Vec<String>,

    /// Seconds between container checks
    #[arg(long, alias = "poll_interval_secs")]
    poll_interval_secs: Option<u64>,

    /// Give up waiting for running containers after this many seconds
    #[arg(long, alias = "wait_timeout_secs")]
    wait_timeout_secs: Option<u64>,

    /// Do not drop the page cache between workloads
    #[arg(long, alias = "no_clear_caches")]
    no_clear_caches: bool,

    /// Write a JSON report of all launches to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            framework: self.framework,
            algorithm: self.algorithm.clone(),
            docker_image_url: self.docker_image_url.clone(),
            tag: self.tag.clone(),
            run_percentage: self.run_percentage,
            experiment_basename: self.experiment_basename.clone(),
            rsync_data: self.rsync_data,
            local: self.local,
            submission_path: self.submission_path.clone(),
            tuning_search_space: self.tuning_search_space.clone(),
            dry_run: self.dry_run,
        }
    }

    fn load_config(&self) -> Result<LauncherConfig, Box<dyn std::error::Error>> {
        let mut config = LauncherConfig::load(self.options(), self.config.as_deref())?;
        config.select_workloads(&self.workloads)?;

        if let Some(secs) = self.poll_interval_secs {
            config.host.poll_interval_secs = secs;
        }
        if let Some(secs) = self.wait_timeout_secs {
            config.host.wait_timeout_secs = Some(secs);
        }
        if self.no_clear_caches {
            config.host.clear_caches = false;
        }
        config.validate_host()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // tracing needs to be initialized with indicatif_layer to not clobber progress bars
    let indicatif_layer = IndicatifLayer::new();

    // non-primary ranks only report warnings unless RUST_LOG says otherwise
    let default_level = DeviceContext::from_source(&ProcessEnv, 0)
        .map_or(LevelFilter::INFO, |ctx| rank_filter(&ctx));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with(indicatif_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = args.load_config()?;
            let host = DockerHost::new(config.host.docker_binary.clone());

            let version = host.check_available().await?;
            tracing::info!("Docker engine {version}");

            println!(
                "Launching {} workloads: {} {} at {}{}",
                config.workloads.len(),
                config.run.framework,
                config.run.algorithm,
                config.run.run_percentage,
                if config.run.dry_run { " (dry run)" } else { "" }
            );

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, aborting launcher");
                    on_signal.cancel();
                }
            });

            let scheduler = Scheduler::new(config, host).with_cancellation(cancel);
            let result = scheduler.run().await?;

            println!();
            println!("=== Launcher Complete ===");
            println!("Total: {}", result.total);
            println!("Succeeded: {}", result.succeeded);
            println!("Failed: {}", result.failed);

            if result.failed > 0 {
                println!();
                println!("Failed workloads:");
                for outcome in result.outcomes.iter().filter(|o| !o.success) {
                    println!("  - {}", outcome.workload);
                }
            }

            if let Some(ref path) = args.report {
                result.write_json(path)?;
                println!("Report written to {}", path.display());
            }
        }

        Commands::Workloads {
            run_percentage,
            config,
        } => {
            let file = match config {
                Some(path) => LauncherFile::load(path)?,
                None => LauncherFile::default(),
            };
            let workloads = file.workloads()?;

            println!("=== Workloads at {run_percentage} ===");
            for workload in &workloads {
                println!(
                    "{:24} {:12} {:>8} / {:>8} steps",
                    workload.name,
                    workload.dataset.to_string(),
                    workload.step_budget(run_percentage),
                    workload.max_steps
                );
            }
        }

        Commands::Bootstrap { json } => {
            let mut profiler = Profiler::new();
            let boot = init_from_env(&mut profiler)?;
            let env: BTreeMap<_, _> = boot.settings.env_vars().into_iter().collect();

            if json {
                let value = serde_json::json!({
                    "distributed": boot.context.distributed,
                    "local_rank": boot.context.local_rank,
                    "device": boot.context.device.to_string(),
                    "env": env,
                    "membership": boot.membership,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                if let Some(ref membership) = boot.membership {
                    println!(
                        "# rank {}/{} via {} at {}:{}",
                        membership.rank,
                        membership.world_size,
                        membership.backend,
                        membership.master_addr,
                        membership.master_port
                    );
                }
                for (key, value) in &env {
                    println!("export {key}={value}");
                }
            }
        }
    }

    Ok(())
}
