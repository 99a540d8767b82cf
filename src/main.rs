// Headless driver: load a preset, advance it, print the state as JSON

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use orbital_architect_lib::presets::load_preset_file;
use orbital_architect_lib::{AppState, Preset};

#[derive(Parser, Debug)]
#[command(about = "2D Newtonian N-body sandbox")]
struct Args {
    /// Built-in preset: solar-system or binary-star
    #[arg(short, long, default_value = "solar-system")]
    preset: Preset,

    /// JSON file with preset bodies (overrides --preset)
    #[arg(short = 'f', long)]
    preset_file: Option<PathBuf>,

    /// Advance exactly this many steps instead of running the frame loop
    #[arg(short, long)]
    steps: Option<usize>,

    /// Run the frame loop for this many seconds
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Ask the analysis service about the final state
    #[arg(long)]
    analyze: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    orbital_architect_lib::config::load_dotenv();
    env_logger::init();

    let args = Args::parse();
    let app = Arc::new(AppState::from_env());

    match &args.preset_file {
        Some(path) => {
            let bodies = load_preset_file(path).map_err(anyhow::Error::msg)?;
            app.load_preset_bodies(&bodies)
                .with_context(|| format!("invalid preset in {}", path.display()))?;
        }
        None => app.load_preset(args.preset)?,
    }

    let state = match args.steps {
        Some(steps) => {
            info!("advancing {} steps", steps);
            app.simulation.write().advance(steps);
            app.get_simulation_state()
        }
        None => {
            // The frame loop sleeps, keep it off the async workers
            let runner = app.clone();
            let duration = Duration::from_secs(args.seconds);
            tokio::task::spawn_blocking(move || orbital_architect_lib::run(&runner, duration))
                .await?
        }
    };

    if args.analyze {
        if let Some(report) = app.analyze_system().await {
            eprintln!("{}", report.text);
        }
    }

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
