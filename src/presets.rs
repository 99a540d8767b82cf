// Presets - starting configurations for the body registry
// Preset bodies match the CelestialBody shape minus id and trail

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::physics_engine::{NewBodyParams, Vector2};

/// One body of a preset. `id` is optional; missing ids are generated on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetBody {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub mass: f64,
    pub radius: f64,
    pub position: Vector2,
    pub velocity: Vector2,
    pub color: String,
    #[serde(default)]
    pub is_locked: bool,
}

impl PresetBody {
    fn new(
        id: &str,
        name: &str,
        mass: f64,
        radius: f64,
        position: (f64, f64),
        velocity: (f64, f64),
        color: &str,
    ) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            mass,
            radius,
            position: Vector2::new(position.0, position.1),
            velocity: Vector2::new(velocity.0, velocity.1),
            color: color.to_string(),
            is_locked: false,
        }
    }

    pub fn to_params(&self) -> NewBodyParams {
        NewBodyParams {
            name: self.name.clone(),
            mass: self.mass,
            radius: self.radius,
            position: self.position,
            velocity: self.velocity,
            color: self.color.clone(),
            is_locked: self.is_locked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    SolarSystem,
    BinaryStar,
}

impl Preset {
    pub fn bodies(&self) -> Vec<PresetBody> {
        match self {
            // Earth: v ≈ sqrt(0.5 * 5000 / 300) ≈ 2.88
            Preset::SolarSystem => vec![
                PresetBody::new("sun", "Sun", 5000.0, 40.0, (0.0, 0.0), (0.0, 0.0), "#fbbf24"),
                PresetBody::new("earth", "Earth", 100.0, 12.0, (300.0, 0.0), (0.0, 2.8), "#3b82f6"),
                PresetBody::new("mars", "Mars", 50.0, 8.0, (450.0, 0.0), (0.0, 2.3), "#ef4444"),
            ],
            Preset::BinaryStar => vec![
                PresetBody::new("star1", "Alpha", 3000.0, 30.0, (-150.0, 0.0), (0.0, 1.5), "#f472b6"),
                PresetBody::new("star2", "Beta", 3000.0, 30.0, (150.0, 0.0), (0.0, -1.5), "#22d3ee"),
            ],
        }
    }

    pub fn all() -> [Preset; 2] {
        [Preset::SolarSystem, Preset::BinaryStar]
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::SolarSystem => write!(f, "solar-system"),
            Preset::BinaryStar => write!(f, "binary-star"),
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "solar-system" | "solar" => Ok(Preset::SolarSystem),
            "binary-star" | "binary" => Ok(Preset::BinaryStar),
            other => Err(format!("unknown preset '{}'", other)),
        }
    }
}

/// Defaults of the add-body form
pub fn default_new_body() -> NewBodyParams {
    NewBodyParams {
        name: "New Planet".to_string(),
        mass: 50.0,
        radius: 10.0,
        position: Vector2::new(200.0, 0.0),
        velocity: Vector2::new(0.0, 1.5),
        color: "#3b82f6".to_string(),
        is_locked: false,
    }
}

/// Parse a JSON array of preset bodies
pub fn parse_preset_json(json: &str) -> Result<Vec<PresetBody>, String> {
    serde_json::from_str(json).map_err(|e| format!("Failed to parse preset: {}", e))
}

pub fn load_preset_file(path: &Path) -> Result<Vec<PresetBody>, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_preset_json(&contents)
}
