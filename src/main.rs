//! simfleet - Repeat-run mobile UI test suites across emulators and simulators
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::eyre;

use simfleet::RunOverrides;
use simfleet_app::config::init_config_dir;
use simfleet_app::{ProcessExecutor, ToolAvailability};
use simfleet_daemon::{discover_devices, group_simulators_by_runtime};

/// simfleet - Repeat-run mobile UI test suites across emulators and simulators
#[derive(Parser, Debug)]
#[command(name = "simfleet")]
#[command(about = "Repeat-run mobile UI test suites across emulators and simulators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured suite, printing NDJSON events to stdout
    Run(RunArgs),

    /// List Android AVDs and iOS simulators on this machine
    Devices,

    /// Write a default .simfleet/config.toml
    Init {
        /// Project directory
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Project directory containing .simfleet/config.toml
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Total number of iterations
    #[arg(long, value_name = "N")]
    retries: Option<usize>,

    /// Iterations per batch
    #[arg(long, value_name = "P")]
    partition_size: Option<usize>,

    /// Repetitions of every iteration within its batch
    #[arg(long, value_name = "N")]
    consume: Option<usize>,

    /// Print the planned iterations without booting any engine
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            retries: self.retries,
            partition_size: self.partition_size,
            consume: self.consume,
            dry_run: self.dry_run,
        }
    }
}

fn project_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    simfleet_core::logging::init()?;

    match cli.command {
        Command::Run(args) => {
            let overrides = args.overrides();
            let report = simfleet::run_headless(&project_path(args.path), &overrides).await?;
            if !report.is_success() {
                return Err(eyre!(
                    "{} of {} iterations failed",
                    report.failed(),
                    report.iterations.len()
                ));
            }
            Ok(())
        }
        Command::Devices => {
            list_devices().await;
            Ok(())
        }
        Command::Init { path } => init(&project_path(path)),
    }
}

async fn list_devices() {
    let tools = ToolAvailability::check().await;
    let inventory = discover_devices(&ProcessExecutor::new(), &tools).await;

    if !inventory.android.is_empty() {
        println!("Android emulators:");
        for avd in &inventory.android {
            match avd.api_level {
                Some(level) => println!("  {} (API {})  [{}]", avd.display_name, level, avd.name),
                None => println!("  {}  [{}]", avd.display_name, avd.name),
            }
        }
    }

    if !inventory.ios.is_empty() {
        println!("iOS simulators:");
        for (runtime, sims) in group_simulators_by_runtime(&inventory.ios) {
            println!("  {}", runtime);
            for sim in sims {
                println!("    {} ({:?})  [{}]", sim.name, sim.state, sim.udid);
            }
        }
    }

    if inventory.is_empty() && inventory.errors.is_empty() {
        println!("No emulators or simulators found.");
    }
    for message in &inventory.errors {
        eprintln!("⚠ {}", message);
    }
}

fn init(project: &Path) -> color_eyre::Result<()> {
    let path = init_config_dir(project)?;
    eprintln!("✅ Config ready at {}", path.display());
    eprintln!("   Set [suite] command and add [[engines]] before running.");
    Ok(())
}
