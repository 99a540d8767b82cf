// Orbital Architect - 2D Newtonian N-Body Sandbox
// Library entry point shared by the headless driver and any frontend

pub mod api_client;
pub mod config;
pub mod physics_engine;
pub mod presets;
pub mod state_manager;

pub use config::{AnalysisConfig, SimConfig};
pub use physics_engine::{
    step, BodyError, BodyId, CelestialBody, NewBodyParams, SymplecticEulerIntegrator, Trail,
    Vector2,
};
pub use presets::{Preset, PresetBody};
pub use state_manager::{AppState, FrontendState, SimulationState};

use log::info;
use std::time::Duration;

/// Run the background loop for `duration`, then stop it and return the final state
pub fn run(app_state: &AppState, duration: Duration) -> FrontendState {
    info!("running simulation for {:?}", duration);

    if app_state.start() {
        std::thread::sleep(duration);
        app_state.stop();
    }

    app_state.get_simulation_state()
}
