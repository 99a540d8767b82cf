// Physics Engine - 2D Gravitational N-Body Core
// Implements pairwise Newtonian gravity, symplectic Euler integration and trails

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// =============================================================================
// SIMULATION CONSTANTS (screen units, tuned for 60 fps)
// =============================================================================

/// Gravitational constant in simulation units. Coupled with `TIME_STEP`:
/// changing one without the other changes every orbital period.
pub const SIMULATION_G: f64 = 0.5;

/// Time advanced by one call to the integrator
pub const TIME_STEP: f64 = 1.0;

/// Maximum number of samples kept per trail
pub const TRAIL_LENGTH: usize = 100;

/// Minimum axis-wise displacement before a new trail sample is recorded
pub const TRAIL_MIN_STEP: f64 = 1.0;

// =============================================================================
// 2D VECTOR MATHEMATICS
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn scale(&self, s: f64) -> Self {
        Self {
            x: self.x * s,
            y: self.y * s,
        }
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

// =============================================================================
// TRAIL (bounded position history)
// =============================================================================

/// Fixed-capacity FIFO of past positions, oldest first.
///
/// A sample is only recorded when the body has moved more than `min_step`
/// along either axis since the last sample, so resting bodies do not grow
/// their trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trail {
    samples: VecDeque<Vector2>,
    capacity: usize,
    min_step: f64,
    /// Samples ever recorded, including evicted ones
    recorded: u64,
}

impl Trail {
    pub fn new(capacity: usize, min_step: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.saturating_add(1)),
            capacity,
            min_step,
            recorded: 0,
        }
    }

    /// Record `position` if the gate allows it. Returns true when a sample was added.
    pub fn record(&mut self, position: Vector2) -> bool {
        let should_record = match self.samples.back() {
            None => true,
            Some(last) => {
                (position.x - last.x).abs() > self.min_step
                    || (position.y - last.y).abs() > self.min_step
            }
        };

        if !should_record {
            return false;
        }

        self.samples.push_back(position);
        self.recorded += 1;
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Vector2> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&Vector2> {
        self.samples.front()
    }

    pub fn total_recorded(&self) -> u64 {
        self.recorded
    }

    /// Index (in recording order) of the oldest sample still retained.
    /// A deserialized trail may carry a stale counter, so this never underflows.
    pub fn oldest_index(&self) -> u64 {
        self.recorded.saturating_sub(self.samples.len() as u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vector2> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<Vector2> {
        self.samples.iter().copied().collect()
    }
}

impl Default for Trail {
    fn default() -> Self {
        Self::new(TRAIL_LENGTH, TRAIL_MIN_STEP)
    }
}

// =============================================================================
// CELESTIAL BODY
// =============================================================================

/// Opaque body identifier, unique within a registry
pub type BodyId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CelestialBody {
    pub id: BodyId,
    pub name: String,
    /// Must be > 0; also the inertia divisor
    pub mass: f64,
    /// Only used for the overlap skip and drawing
    pub radius: f64,
    pub position: Vector2,
    pub velocity: Vector2,
    pub color: String,
    /// Locked bodies attract others but never move
    pub is_locked: bool,
    pub trail: Trail,
}

/// Parameters for creating a body. All numeric fields are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBodyParams {
    pub name: String,
    pub mass: f64,
    pub radius: f64,
    pub position: Vector2,
    pub velocity: Vector2,
    pub color: String,
    #[serde(default)]
    pub is_locked: bool,
}

impl NewBodyParams {
    /// Reject parameters that would make the integrator produce NaN
    pub fn validate(&self) -> Result<(), BodyError> {
        if !self.mass.is_finite() || self.mass <= 0.0 {
            return Err(BodyError::InvalidBodyParams(format!(
                "mass must be positive and finite, got {}",
                self.mass
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(BodyError::InvalidBodyParams(format!(
                "radius must be positive and finite, got {}",
                self.radius
            )));
        }
        if !self.position.is_finite() {
            return Err(BodyError::InvalidBodyParams(
                "position must be finite".to_string(),
            ));
        }
        if !self.velocity.is_finite() {
            return Err(BodyError::InvalidBodyParams(
                "velocity must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl CelestialBody {
    /// Build a body from already-validated parameters with an empty trail
    pub fn from_params(id: BodyId, params: NewBodyParams, trail: Trail) -> Self {
        Self {
            id,
            name: params.name,
            mass: params.mass,
            radius: params.radius,
            position: params.position,
            velocity: params.velocity,
            color: params.color,
            is_locked: params.is_locked,
            trail,
        }
    }

    pub fn momentum(&self) -> Vector2 {
        self.velocity.scale(self.mass)
    }

    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.magnitude_squared()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BodyError {
    InvalidBodyParams(String),
    NotFound(BodyId),
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyError::InvalidBodyParams(reason) => write!(f, "invalid body parameters: {}", reason),
            BodyError::NotFound(id) => write!(f, "no body with id '{}'", id),
        }
    }
}

impl std::error::Error for BodyError {}

// =============================================================================
// SYMPLECTIC EULER INTEGRATOR
// =============================================================================

pub struct SymplecticEulerIntegrator {
    /// Gravitational constant
    pub g: f64,
    /// Time step per invocation
    pub dt: f64,
}

impl SymplecticEulerIntegrator {
    pub fn new(g: f64, dt: f64) -> Self {
        Self { g, dt }
    }

    /// Step the simulation forward by dt
    /// Uses semi-implicit Euler: v(t+dt) = v(t) + a(t)*dt
    ///                           x(t+dt) = x(t) + v(t+dt)*dt
    ///
    /// Locked bodies are skipped entirely but still attract the others.
    /// Mass must be positive for every unlocked body.
    pub fn step(&self, bodies: &mut [CelestialBody]) {
        let n = bodies.len();
        if n == 0 {
            return;
        }
        let dt = self.dt;

        // All forces come from pre-step positions
        let mut forces: Vec<Vector2> = vec![Vector2::zero(); n];
        for i in 0..n {
            if bodies[i].is_locked {
                continue;
            }
            forces[i] = self.calculate_force(i, bodies);
        }

        // Kick
        for (body, force) in bodies.iter_mut().zip(forces.iter()) {
            if body.is_locked {
                continue;
            }
            let accel = force.scale(1.0 / body.mass);
            body.velocity = body.velocity.add(&accel.scale(dt));
        }

        // Drift with the updated velocity, then sample the trail
        for body in bodies.iter_mut() {
            if body.is_locked {
                continue;
            }
            body.position = body.position.add(&body.velocity.scale(dt));
            body.trail.record(body.position);
        }
    }

    /// Net gravitational force on body `index` from every other body.
    ///
    /// Pairs whose centres are closer than the sum of their radii contribute
    /// nothing: overlapping bodies pass through each other with no response.
    pub fn calculate_force(&self, index: usize, bodies: &[CelestialBody]) -> Vector2 {
        let body = &bodies[index];
        let mut total_force = Vector2::zero();

        for (j, other) in bodies.iter().enumerate() {
            if j == index {
                continue;
            }

            let d = other.position.sub(&body.position);
            let distance = d.magnitude();

            if distance < body.radius + other.radius {
                continue;
            }

            // F = G*m_i*m_j / r² along d / r
            let force_mag = self.g * body.mass * other.mass / (distance * distance);
            total_force = total_force.add(&d.scale(force_mag / distance));
        }

        total_force
    }
}

impl Default for SymplecticEulerIntegrator {
    fn default() -> Self {
        Self::new(SIMULATION_G, TIME_STEP)
    }
}

/// Advance `bodies` by one step of `dt` under gravitational constant `g`
pub fn step(bodies: &mut [CelestialBody], g: f64, dt: f64) {
    SymplecticEulerIntegrator::new(g, dt).step(bodies);
}

// =============================================================================
// ENERGY & MOMENTUM (for drift monitoring)
// =============================================================================

/// Total mechanical energy of the system under gravitational constant `g`
pub fn calculate_total_energy(bodies: &[CelestialBody], g: f64) -> f64 {
    let kinetic: f64 = bodies.iter().map(CelestialBody::kinetic_energy).sum();

    // Potential energy: -G * m1 * m2 / r for each pair
    let mut potential = 0.0;
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let r = bodies[i].position.sub(&bodies[j].position).magnitude();
            if r > 1e-10 {
                potential -= g * bodies[i].mass * bodies[j].mass / r;
            }
        }
    }

    kinetic + potential
}

/// Total linear momentum Σ m·v
pub fn calculate_total_momentum(bodies: &[CelestialBody]) -> Vector2 {
    bodies
        .iter()
        .fold(Vector2::zero(), |acc, b| acc.add(&b.momentum()))
}

// =============================================================================
// TESTS
// =============================================================================
