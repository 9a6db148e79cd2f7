//! atmos-host CLI

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atmos_host::util::config::{load_config, load_user_config};
use atmos_host::util::link::decode_program;
use atmos_host::util::logger::{self, LogLevel};
use atmos_host::{HostCapabilities, RunOutcome, Runner, StderrStatus, Tier, NAME, VERSION};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Run Lua programs under a host-driven cooperative scheduler
#[derive(Parser, Debug)]
#[command(name = "atmos-host")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a program file, `-` for stdin, inline code or a shareable link
    Run {
        /// Program file
        #[arg(value_name = "FILE", conflicts_with_all = ["eval", "b64"])]
        file: Option<PathBuf>,

        /// Program text given inline
        #[arg(short, long, value_name = "CODE")]
        eval: Option<String>,

        /// Shareable link `…#<base64>` or bare base64 program text
        #[arg(long, value_name = "LINK", conflicts_with = "eval")]
        b64: Option<String>,

        /// Host configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Execution tier: bare, direct or compiled
        #[arg(short, long)]
        tier: Option<Tier>,

        /// Tick period in milliseconds
        #[arg(long, value_name = "MS")]
        period_ms: Option<u64>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_with_level(LogLevel::from_verbosity(args.verbose));

    match args.command {
        Commands::Run {
            file,
            eval,
            b64,
            config,
            tier,
            period_ms,
        } => {
            let (config, base_dir) = match &config {
                Some(path) => load_config(path).with_context(|| format!("Failed to load config: {}", path.display()))?,
                None => load_user_config().context("Failed to load user config")?,
            };
            let mut config = config;
            if let Some(tier) = tier {
                config.run.tier = tier;
            }
            if let Some(period_ms) = period_ms {
                config.tick.period_ms = period_ms;
            }
            if let Some(name) = file.as_deref().filter(|p| p.as_os_str() != "-").and_then(|p| p.file_name()) {
                config.run.source_name = name.to_string_lossy().into_owned();
            }
            let plan = config
                .plan_relative_to(base_dir.as_deref())
                .context("Invalid host configuration")?;

            let program = match (file, eval) {
                (_, Some(code)) => Some(code),
                (None, None) => match b64 {
                    Some(link) => decode_program(&link).context("Failed to decode program link")?,
                    None => None,
                },
                (Some(path), None) if path.as_os_str() == "-" => {
                    let mut code = String::new();
                    std::io::stdin()
                        .read_to_string(&mut code)
                        .context("Failed to read program from stdin")?;
                    Some(code)
                }
                (Some(path), None) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read: {}", path.display()))?,
                ),
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build runtime")?;
            let runner = Runner::new(plan, HostCapabilities::console(), Arc::new(StderrStatus));
            let stop = runner.stop_handle();

            let report = runtime.block_on(async move {
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        stop.stop();
                    }
                });
                runner.run(program.as_deref()).await
            });
            // The Ctrl-C listener is still parked.
            runtime.shutdown_timeout(Duration::from_millis(100));

            info!(outcome = ?report.outcome, state = %report.state, modules = report.modules.len(), "run finished");
            match report.outcome {
                RunOutcome::Errored => std::process::exit(1),
                RunOutcome::Cancelled => warn!("run stopped before completion"),
                RunOutcome::NoInput | RunOutcome::Done => {}
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
