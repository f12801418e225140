use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vortex_auton_runtime::config;
use vortex_auton_runtime::hardware::{self, sim::SimRig};
use vortex_auton_runtime::mission::{Mission, MissionOutcome, MissionRunner};
use vortex_auton_runtime::motion::{StopFlag, SystemClock};
use vortex_auton_runtime::telemetry::LogSink;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run a scripted autonomous mission
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port of the drive controller board
    #[arg(long, default_value = config::CONTROLLER_PORT)]
    port: String,

    /// Built-in mission to run (see --list)
    #[arg(long)]
    mission: Option<String>,

    /// JSON mission script to run instead of a built-in
    #[arg(long)]
    script: Option<PathBuf>,

    /// Run against the simulated rig instead of hardware
    #[arg(long)]
    sim: bool,

    /// List built-in missions and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BoxError> {
    if args.list {
        for name in Mission::BUILTIN_NAMES {
            println!("{}", name);
        }
        return Ok(());
    }

    let mission = load_mission(&args)?;

    // Ctrl-C raises the cooperative stop; the active primitive unwinds at rest
    let stop = StopFlag::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested, unwinding at rest");
            ctrl_c_stop.raise();
        }
    });

    // The mission itself is strictly sequential and blocking
    let outcome = tokio::task::spawn_blocking(move || run_mission(args, mission, stop)).await??;
    match outcome {
        MissionOutcome::Completed => info!("Mission completed"),
        MissionOutcome::Cancelled => warn!("Mission cancelled"),
    }
    Ok(())
}

fn load_mission(args: &Args) -> Result<Mission, BoxError> {
    if let Some(path) = &args.script {
        let text = std::fs::read_to_string(path)?;
        return Ok(Mission::from_json(&text)?);
    }
    let name = args
        .mission
        .as_deref()
        .ok_or("pass --mission <name> or --script <file>; --list shows built-ins")?;
    Mission::builtin(name).ok_or_else(|| format!("unknown mission '{}'", name).into())
}

fn run_mission(args: Args, mission: Mission, stop: StopFlag) -> Result<MissionOutcome, BoxError> {
    let clock = Arc::new(SystemClock::new());
    let rig = if args.sim {
        info!("Using simulated rig");
        SimRig::new(clock.clone()).rig()
    } else {
        hardware::bootstrap(&args.port)?
    };

    let mut runner =
        MissionRunner::new(rig, clock, stop).with_telemetry(Box::new(LogSink));
    Ok(runner.run(&mission)?)
}
