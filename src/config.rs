// Configuration - simulation tuning and analysis service settings
// Values come from the environment (optionally a .env file), falling back to defaults

use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::physics_engine::{SIMULATION_G, TIME_STEP, TRAIL_LENGTH, TRAIL_MIN_STEP};

pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ANALYSIS_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Numerical and loop parameters for a simulation run.
///
/// `g` and `dt` are a coupled pair: the presets are tuned for G = 0.5 with
/// one unit of time per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub g: f64,
    pub dt: f64,
    pub trail_length: usize,
    pub trail_min_step: f64,
    /// Target frame time of the background loop
    pub frame_ms: u64,
    /// Physics steps per frame
    pub time_scale: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            g: SIMULATION_G,
            dt: TIME_STEP,
            trail_length: TRAIL_LENGTH,
            trail_min_step: TRAIL_MIN_STEP,
            frame_ms: 16,
            time_scale: 1.0,
        }
    }
}

impl SimConfig {
    /// Read `ORBITAL_*` variables; anything missing or malformed keeps its default
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            g: parse_or(&lookup, "ORBITAL_G", defaults.g),
            dt: parse_or(&lookup, "ORBITAL_DT", defaults.dt),
            trail_length: parse_or(&lookup, "ORBITAL_TRAIL_LENGTH", defaults.trail_length),
            trail_min_step: parse_or(&lookup, "ORBITAL_TRAIL_MIN_STEP", defaults.trail_min_step),
            frame_ms: parse_or(&lookup, "ORBITAL_FRAME_MS", defaults.frame_ms),
            time_scale: parse_or(&lookup, "ORBITAL_TIME_SCALE", defaults.time_scale),
        };

        config.sanitized()
    }

    /// Replace values the integrator cannot work with by their defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.g.is_finite() || self.g <= 0.0 {
            warn!("gravitational constant {} rejected, using {}", self.g, defaults.g);
            self.g = defaults.g;
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            warn!("time step {} rejected, using {}", self.dt, defaults.dt);
            self.dt = defaults.dt;
        }
        if self.trail_length == 0 {
            warn!("trail length must be at least 1, using {}", defaults.trail_length);
            self.trail_length = defaults.trail_length;
        }
        if !self.trail_min_step.is_finite() || self.trail_min_step < 0.0 {
            self.trail_min_step = defaults.trail_min_step;
        }
        if self.frame_ms == 0 {
            self.frame_ms = defaults.frame_ms;
        }
        self.time_scale = clamp_time_scale(self.time_scale);
        self
    }

    pub fn frame_time(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }
}

/// Steps per frame are kept within 1..=100
pub fn clamp_time_scale(scale: f64) -> f64 {
    if scale.is_finite() {
        scale.max(1.0).min(100.0)
    } else {
        1.0
    }
}

/// Connection settings for the text-generation collaborator
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_ANALYSIS_MODEL.to_string(),
            base_url: DEFAULT_ANALYSIS_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let api_key = lookup("API_KEY")
            .or_else(|| lookup("GEMINI_API_KEY"))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        // A zero timeout would fail every request immediately
        let mut timeout_secs = parse_or(
            &lookup,
            "ORBITAL_ANALYSIS_TIMEOUT_SECS",
            defaults.timeout.as_secs(),
        );
        if timeout_secs == 0 {
            warn!(
                "analysis timeout must be at least 1s, using {}s",
                defaults.timeout.as_secs()
            );
            timeout_secs = defaults.timeout.as_secs();
        }

        Self {
            api_key,
            model: lookup("ORBITAL_ANALYSIS_MODEL").unwrap_or(defaults.model),
            base_url: lookup("ORBITAL_ANALYSIS_URL").unwrap_or(defaults.base_url),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// Load a `.env` file if one exists. Missing files are not an error.
pub fn load_dotenv() {
    if let Ok(path) = dotenv::dotenv() {
        log::debug!("loaded environment from {}", path.display());
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring malformed {}='{}'", key, raw);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_constants() {
        let config = SimConfig::from_lookup(|_| None);
        assert_eq!(config.g, 0.5);
        assert_eq!(config.dt, 1.0);
        assert_eq!(config.trail_length, 100);
        assert_eq!(config.trail_min_step, 1.0);
        assert_eq!(config.frame_ms, 16);
    }

    #[test]
    fn test_env_overrides_and_bad_values() {
        let config = SimConfig::from_lookup(lookup_from(&[
            ("ORBITAL_G", "1.25"),
            ("ORBITAL_DT", "not-a-number"),
            ("ORBITAL_TRAIL_LENGTH", "0"),
            ("ORBITAL_TIME_SCALE", "500"),
        ]));

        assert_eq!(config.g, 1.25);
        assert_eq!(config.dt, 1.0);
        assert_eq!(config.trail_length, 100);
        assert_eq!(config.time_scale, 100.0);
    }

    #[test]
    fn test_analysis_config_key_fallback() {
        let config = AnalysisConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", " abc ")]));
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.model, DEFAULT_ANALYSIS_MODEL);

        let blank = AnalysisConfig::from_lookup(lookup_from(&[("API_KEY", "  ")]));
        assert!(blank.api_key.is_none());
    }

    #[test]
    fn test_analysis_timeout_rejects_zero() {
        let zero = AnalysisConfig::from_lookup(lookup_from(&[("ORBITAL_ANALYSIS_TIMEOUT_SECS", "0")]));
        assert_eq!(zero.timeout, Duration::from_secs(30));

        let custom = AnalysisConfig::from_lookup(lookup_from(&[("ORBITAL_ANALYSIS_TIMEOUT_SECS", "5")]));
        assert_eq!(custom.timeout, Duration::from_secs(5));
    }
}
