// State Manager - Thread-safe simulation state handling
// Owns the body registry, the frame loop and the commands a frontend calls

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::api_client::{AnalysisCache, AnalysisClient, AnalysisReport};
use crate::config::{clamp_time_scale, AnalysisConfig, SimConfig};
use crate::physics_engine::{
    calculate_total_energy, calculate_total_momentum, BodyError, BodyId, CelestialBody,
    NewBodyParams, SymplecticEulerIntegrator, Trail, Vector2,
};
use crate::presets::{Preset, PresetBody};

// =============================================================================
// BODY IDS
// =============================================================================

/// Hands out ids that are never repeated for the lifetime of the generator
#[derive(Debug, Clone)]
pub struct IdGenerator {
    salt: u32,
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            salt: rand::thread_rng().gen_range(0..0x100_0000),
            next: 0,
        }
    }

    pub fn next_id(&mut self) -> BodyId {
        let id = format!("{:06x}-{}", self.salt, self.next);
        self.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// VIEWPORT (display transform only, never used by physics)
// =============================================================================

pub const DEFAULT_ZOOM: f64 = 0.8;
pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 5.0;
const ZOOM_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f64,
    pub offset: Vector2,
}

impl Viewport {
    pub fn zoom_in(&mut self) {
        self.scale = (self.scale * ZOOM_FACTOR).min(MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.scale = (self.scale / ZOOM_FACTOR).max(MIN_ZOOM);
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.offset = self.offset.add(&Vector2::new(dx, dy));
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Map a world position onto a canvas of the given size
    pub fn to_screen(&self, world: Vector2, width: f64, height: f64) -> Vector2 {
        Vector2::new(
            width / 2.0 + self.offset.x + world.x * self.scale,
            height / 2.0 + self.offset.y + world.y * self.scale,
        )
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: DEFAULT_ZOOM,
            offset: Vector2::zero(),
        }
    }
}

// =============================================================================
// SIMULATION STATE
// =============================================================================

#[derive(Debug, Clone)]
pub struct SimulationState {
    pub bodies: Vec<CelestialBody>,
    pub is_running: bool,
    pub g: f64,
    pub dt: f64,
    pub time_scale: f64,
    pub time: f64,
    pub step_count: u64,
    pub viewport: Viewport,
    pub total_energy: f64,   // For drift monitoring
    pub initial_energy: f64, // Reference energy since the last registry change
    trail_length: usize,
    trail_min_step: f64,
    ids: IdGenerator,
}

impl SimulationState {
    /// Empty registry configured from `config`
    pub fn new(config: &SimConfig) -> Self {
        Self {
            bodies: Vec::new(),
            is_running: true,
            g: config.g,
            dt: config.dt,
            time_scale: config.time_scale,
            time: 0.0,
            step_count: 0,
            viewport: Viewport::default(),
            total_energy: 0.0,
            initial_energy: 0.0,
            trail_length: config.trail_length,
            trail_min_step: config.trail_min_step,
            ids: IdGenerator::new(),
        }
    }

    pub fn with_preset(config: &SimConfig, preset: Preset) -> Self {
        let mut state = Self::new(config);
        if let Err(e) = state.load_preset(&preset.bodies()) {
            // Built-in presets are validated by tests
            warn!("built-in preset {} rejected: {}", preset, e);
        }
        state
    }

    fn empty_trail(&self) -> Trail {
        Trail::new(self.trail_length, self.trail_min_step)
    }

    /// Add a body with a fresh id and an empty trail
    pub fn add_body(&mut self, params: NewBodyParams) -> Result<BodyId, BodyError> {
        params.validate()?;

        let id = self.ids.next_id();
        info!("adding body '{}' ({})", params.name, id);
        let body = CelestialBody::from_params(id.clone(), params, self.empty_trail());
        self.bodies.push(body);
        self.reset_energy_reference();
        Ok(id)
    }

    pub fn remove_body(&mut self, body_id: &str) -> Result<CelestialBody, BodyError> {
        let index = self
            .bodies
            .iter()
            .position(|b| b.id == body_id)
            .ok_or_else(|| BodyError::NotFound(body_id.to_string()))?;

        let removed = self.bodies.remove(index);
        info!("removed body '{}' ({})", removed.name, removed.id);
        self.reset_energy_reference();
        Ok(removed)
    }

    pub fn clear_bodies(&mut self) {
        info!("clearing {} bodies", self.bodies.len());
        self.bodies.clear();
        self.reset_energy_reference();
    }

    /// Replace the whole collection. Trails start empty; missing or duplicate
    /// ids are replaced by generated ones. On error nothing is changed.
    pub fn load_preset(&mut self, preset: &[PresetBody]) -> Result<(), BodyError> {
        for body in preset {
            body.to_params().validate()?;
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut bodies = Vec::with_capacity(preset.len());
        for body in preset {
            let id = match &body.id {
                Some(id) if !id.is_empty() && seen.insert(id.clone()) => id.clone(),
                _ => {
                    let id = self.ids.next_id();
                    seen.insert(id.clone());
                    id
                }
            };
            bodies.push(CelestialBody::from_params(
                id,
                body.to_params(),
                self.empty_trail(),
            ));
        }

        info!("loaded preset with {} bodies", bodies.len());
        self.bodies = bodies;
        self.time = 0.0;
        self.step_count = 0;
        self.reset_energy_reference();
        Ok(())
    }

    /// Advance one integrator step regardless of the running flag
    pub fn step(&mut self) {
        SymplecticEulerIntegrator::new(self.g, self.dt).step(&mut self.bodies);
        self.time += self.dt;
        self.step_count += 1;
    }

    /// Advance `steps` steps and refresh the energy diagnostic once
    pub fn advance(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
        self.total_energy = calculate_total_energy(&self.bodies, self.g);
    }

    fn reset_energy_reference(&mut self) {
        self.total_energy = calculate_total_energy(&self.bodies, self.g);
        self.initial_energy = self.total_energy;
    }

    pub fn energy_drift(&self) -> f64 {
        if self.initial_energy.abs() > 1e-20 {
            (self.total_energy - self.initial_energy).abs() / self.initial_energy.abs()
        } else {
            0.0
        }
    }

    pub fn steps_per_frame(&self) -> usize {
        clamp_time_scale(self.time_scale).round() as usize
    }
}

// =============================================================================
// SERIALIZABLE STATE FOR FRONTEND
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendBody {
    pub id: String,
    pub name: String,
    pub color: String,
    pub mass: f64,
    pub radius: f64,
    pub position: [f64; 2],
    pub velocity: [f64; 2],
    pub is_locked: bool,
    pub trail: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendState {
    pub bodies: Vec<FrontendBody>,
    pub is_running: bool,
    pub g: f64,
    pub time: f64,
    pub step_count: u64,
    pub time_scale: f64,
    pub energy_drift: f64,
    pub momentum: [f64; 2],
    pub viewport: Viewport,
}

impl From<&CelestialBody> for FrontendBody {
    fn from(b: &CelestialBody) -> Self {
        FrontendBody {
            id: b.id.clone(),
            name: b.name.clone(),
            color: b.color.clone(),
            mass: b.mass,
            radius: b.radius,
            position: [b.position.x, b.position.y],
            velocity: [b.velocity.x, b.velocity.y],
            is_locked: b.is_locked,
            trail: b.trail.iter().map(|p| [p.x, p.y]).collect(),
        }
    }
}

impl SimulationState {
    pub fn to_frontend(&self) -> FrontendState {
        let momentum = calculate_total_momentum(&self.bodies);

        FrontendState {
            bodies: self.bodies.iter().map(FrontendBody::from).collect(),
            is_running: self.is_running,
            g: self.g,
            time: self.time,
            step_count: self.step_count,
            time_scale: self.time_scale,
            energy_drift: self.energy_drift(),
            momentum: [momentum.x, momentum.y],
            viewport: self.viewport,
        }
    }
}

// =============================================================================
// SIMULATION LOOP (runs in background thread)
// =============================================================================

pub fn start_simulation_loop(
    state: Arc<RwLock<SimulationState>>,
    loop_active: Arc<RwLock<bool>>,
    config: &SimConfig,
) -> JoinHandle<()> {
    let target_frame_time = config.frame_time();

    thread::spawn(move || {
        debug!("simulation loop started ({:?} per frame)", target_frame_time);

        loop {
            // Check if we should stop
            if !*loop_active.read() {
                break;
            }

            let start = Instant::now();

            let (should_run, steps) = {
                let sim = state.read();
                (sim.is_running, sim.steps_per_frame())
            };

            if should_run {
                // One write guard per frame: readers never see a half-applied step
                state.write().advance(steps);
            }

            // Sleep to maintain frame rate
            let elapsed = start.elapsed();
            if elapsed < target_frame_time {
                thread::sleep(target_frame_time - elapsed);
            }
        }

        debug!("simulation loop stopped");
    })
}

// =============================================================================
// GLOBAL STATE
// =============================================================================

/// A running frame loop: its own stop flag plus the thread to join
struct LoopHandle {
    active: Arc<RwLock<bool>>,
    thread: JoinHandle<()>,
}

pub struct AppState {
    pub simulation: Arc<RwLock<SimulationState>>,
    pub analysis: Arc<AnalysisClient>,
    pub analysis_cache: Arc<AnalysisCache>,
    frame_loop: Mutex<Option<LoopHandle>>,
    config: SimConfig,
}

impl AppState {
    pub fn new(config: SimConfig, analysis: AnalysisConfig) -> Self {
        Self {
            simulation: Arc::new(RwLock::new(SimulationState::with_preset(
                &config,
                Preset::SolarSystem,
            ))),
            analysis: Arc::new(AnalysisClient::new(analysis)),
            analysis_cache: Arc::new(AnalysisCache::new()),
            frame_loop: Mutex::new(None),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(SimConfig::from_env(), AnalysisConfig::from_env())
    }

    /// Start the background loop. Returns false if it is already running.
    ///
    /// Each loop gets a fresh stop flag, so a stopped loop can never be
    /// revived by a later start.
    pub fn start(&self) -> bool {
        let mut frame_loop = self.frame_loop.lock();
        if frame_loop.is_some() {
            return false;
        }

        let active = Arc::new(RwLock::new(true));
        let thread = start_simulation_loop(self.simulation.clone(), active.clone(), &self.config);
        *frame_loop = Some(LoopHandle { active, thread });
        true
    }

    /// Stop the background loop and wait for its thread to exit
    pub fn stop(&self) {
        let Some(handle) = self.frame_loop.lock().take() else {
            return;
        };

        *handle.active.write() = false;
        if handle.thread.join().is_err() {
            error!("simulation loop panicked");
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(SimConfig::default(), AnalysisConfig::default())
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

impl AppState {
    pub fn get_simulation_state(&self) -> FrontendState {
        self.simulation.read().to_frontend()
    }

    pub fn set_running(&self, running: bool) {
        self.simulation.write().is_running = running;
    }

    pub fn toggle_running(&self) -> bool {
        let mut sim = self.simulation.write();
        sim.is_running = !sim.is_running;
        sim.is_running
    }

    pub fn set_time_scale(&self, scale: f64) {
        self.simulation.write().time_scale = clamp_time_scale(scale);
    }

    pub fn add_body(&self, params: NewBodyParams) -> Result<BodyId, BodyError> {
        self.simulation.write().add_body(params)
    }

    pub fn remove_body(&self, body_id: &str) -> Result<(), BodyError> {
        self.simulation.write().remove_body(body_id).map(|_| ())
    }

    pub fn clear_bodies(&self) {
        self.simulation.write().clear_bodies();
    }

    /// Load preset bodies, reset the view and drop the previous analysis
    pub fn load_preset_bodies(&self, preset: &[PresetBody]) -> Result<(), BodyError> {
        {
            let mut sim = self.simulation.write();
            sim.load_preset(preset)?;
            sim.viewport.reset();
        }
        self.analysis_cache.clear();
        Ok(())
    }

    pub fn load_preset(&self, preset: Preset) -> Result<(), BodyError> {
        self.load_preset_bodies(&preset.bodies())
    }

    pub fn zoom_in(&self) -> f64 {
        let mut sim = self.simulation.write();
        sim.viewport.zoom_in();
        sim.viewport.scale
    }

    pub fn zoom_out(&self) -> f64 {
        let mut sim = self.simulation.write();
        sim.viewport.zoom_out();
        sim.viewport.scale
    }

    pub fn pan(&self, dx: f64, dy: f64) {
        self.simulation.write().viewport.pan(dx, dy);
    }

    pub fn reset_view(&self) {
        self.simulation.write().viewport.reset();
    }

    /// Ask the analysis service about the current bodies.
    ///
    /// The bodies are copied out first so the lock is not held across the
    /// request. Returns None while another analysis is in flight.
    pub async fn analyze_system(&self) -> Option<AnalysisReport> {
        // Released on drop, including when the caller abandons this future
        let _in_flight = self.analysis_cache.begin()?;

        let snapshot = self.simulation.read().bodies.clone();
        let text = self.analysis.analyze(&snapshot).await;
        Some(self.analysis_cache.store(text, snapshot.len()))
    }

    pub fn get_latest_analysis(&self) -> Option<AnalysisReport> {
        self.analysis_cache.latest()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MISSING_KEY_MESSAGE;
    use crate::presets::default_new_body;
    use std::time::Duration;

    #[test]
    fn test_add_body_assigns_unique_ids() {
        let mut state = SimulationState::new(&SimConfig::default());
        let a = state.add_body(default_new_body()).unwrap();
        let b = state.add_body(default_new_body()).unwrap();

        assert_ne!(a, b);
        assert_eq!(state.bodies.len(), 2);
        assert!(state.bodies.iter().all(|b| b.trail.is_empty() && !b.is_locked));
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let mut state = SimulationState::new(&SimConfig::default());
        let first = state.add_body(default_new_body()).unwrap();
        state.clear_bodies();
        let second = state.add_body(default_new_body()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_add_body_rejects_bad_mass() {
        let mut state = SimulationState::new(&SimConfig::default());
        let mut params = default_new_body();
        params.mass = 0.0;

        assert!(matches!(
            state.add_body(params),
            Err(BodyError::InvalidBodyParams(_))
        ));
        assert!(state.bodies.is_empty());
    }

    #[test]
    fn test_remove_body() {
        let mut state = SimulationState::with_preset(&SimConfig::default(), Preset::SolarSystem);
        let removed = state.remove_body("earth").unwrap();
        assert_eq!(removed.name, "Earth");
        assert_eq!(state.bodies.len(), 2);
        assert_eq!(
            state.remove_body("earth").unwrap_err(),
            BodyError::NotFound("earth".to_string())
        );
    }

    #[test]
    fn test_load_preset_resets_trails_and_fills_ids() {
        let mut state = SimulationState::with_preset(&SimConfig::default(), Preset::BinaryStar);
        state.advance(10);
        assert!(state.bodies.iter().all(|b| !b.trail.is_empty()));

        let mut preset = Preset::SolarSystem.bodies();
        preset[1].id = None;
        preset[2].id = Some("sun".to_string());
        state.load_preset(&preset).unwrap();

        assert_eq!(state.step_count, 0);
        assert!(state.bodies.iter().all(|b| b.trail.is_empty()));
        let ids: HashSet<&str> = state.bodies.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(state.bodies[0].id, "sun");
    }

    #[test]
    fn test_invalid_preset_leaves_state_untouched() {
        let mut state = SimulationState::with_preset(&SimConfig::default(), Preset::BinaryStar);
        let mut preset = Preset::SolarSystem.bodies();
        preset[0].radius = -1.0;

        assert!(state.load_preset(&preset).is_err());
        assert_eq!(state.bodies.len(), 2);
    }

    #[test]
    fn test_viewport_zoom_clamps() {
        let mut viewport = Viewport::default();
        for _ in 0..50 {
            viewport.zoom_in();
        }
        assert_eq!(viewport.scale, MAX_ZOOM);
        for _ in 0..50 {
            viewport.zoom_out();
        }
        assert_eq!(viewport.scale, MIN_ZOOM);

        viewport.reset();
        viewport.pan(10.0, -20.0);
        let p = viewport.to_screen(Vector2::new(100.0, 100.0), 800.0, 600.0);
        assert!((p.x - (400.0 + 10.0 + 80.0)).abs() < 1e-9);
        assert!((p.y - (300.0 - 20.0 + 80.0)).abs() < 1e-9);
    }

    #[test]
    fn test_frontend_snapshot() {
        let mut state = SimulationState::with_preset(&SimConfig::default(), Preset::SolarSystem);
        state.advance(3);
        let frontend = state.to_frontend();

        assert_eq!(frontend.bodies.len(), 3);
        assert_eq!(frontend.step_count, 3);
        assert_eq!(frontend.bodies[1].name, "Earth");
        assert_eq!(frontend.bodies[1].trail.len(), state.bodies[1].trail.len());
    }

    #[test]
    fn test_background_loop_steps_and_stops() {
        let config = SimConfig {
            frame_ms: 1,
            ..SimConfig::default()
        };
        let app = AppState::new(config, AnalysisConfig::default());
        assert!(app.start());
        assert!(!app.start());

        std::thread::sleep(Duration::from_millis(50));
        app.stop();

        let steps = app.get_simulation_state().step_count;
        assert!(steps > 0);

        // Paused state does not advance
        app.set_running(false);
        assert!(app.start());
        std::thread::sleep(Duration::from_millis(20));
        app.stop();
        assert_eq!(app.get_simulation_state().step_count, steps);

        // Stopping twice is harmless
        app.stop();
    }

    #[test]
    fn test_stop_joins_and_restart_runs_one_loop() {
        let config = SimConfig {
            frame_ms: 50,
            ..SimConfig::default()
        };
        let app = AppState::new(config, AnalysisConfig::default());

        assert!(app.start());
        std::thread::sleep(Duration::from_millis(10));
        app.stop();

        // Nothing advances once stop has returned
        let stopped_at = app.get_simulation_state().step_count;
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(app.get_simulation_state().step_count, stopped_at);

        // Restart straight after stopping: a single loop ticks about every 50ms
        assert!(app.start());
        app.stop();
        assert!(app.start());
        std::thread::sleep(Duration::from_millis(260));
        app.stop();

        let advanced = app.get_simulation_state().step_count - stopped_at;
        assert!(advanced >= 1);
        assert!(advanced <= 8, "more than one loop was stepping: {} steps", advanced);
    }

    #[test]
    fn test_commands_update_view_and_preset() {
        let app = AppState::default();
        app.zoom_in();
        app.pan(5.0, 5.0);
        app.analysis_cache.store("old".to_string(), 3);

        app.load_preset(Preset::BinaryStar).unwrap();

        let frontend = app.get_simulation_state();
        assert_eq!(frontend.bodies.len(), 2);
        assert_eq!(frontend.viewport.scale, DEFAULT_ZOOM);
        assert!(app.get_latest_analysis().is_none());
        assert!(!app.toggle_running());
    }

    #[tokio::test]
    async fn test_analyze_without_key() {
        let app = AppState::default();
        let report = app.analyze_system().await.unwrap();

        assert_eq!(report.text, MISSING_KEY_MESSAGE);
        assert_eq!(report.body_count, 3);
        assert!(!app.analysis_cache.is_analyzing());
    }

    #[tokio::test]
    async fn test_cancelled_analysis_releases_in_flight() {
        // Accepts connections but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let analysis = AnalysisConfig {
            api_key: Some("test-key".to_string()),
            base_url: format!("http://{}", addr),
            timeout: Duration::from_secs(10),
            ..AnalysisConfig::default()
        };
        let app = AppState::new(SimConfig::default(), analysis);

        let cancelled = tokio::time::timeout(Duration::from_millis(100), app.analyze_system()).await;
        assert!(cancelled.is_err());

        assert!(!app.analysis_cache.is_analyzing());
        assert!(app.analysis_cache.begin().is_some());
        drop(listener);
    }
}
