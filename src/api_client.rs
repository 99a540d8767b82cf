// Analysis API Client
// Sends a text summary of the system to a generateContent endpoint and returns prose

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::physics_engine::CelestialBody;

pub const MISSING_KEY_MESSAGE: &str =
    "API Key is missing. Please configure your environment to use AI features.";
pub const FAILURE_MESSAGE: &str = "Failed to analyze the system. Please try again later.";
pub const EMPTY_RESPONSE_MESSAGE: &str = "No analysis available.";

const API_KEY_HEADER: &str = "x-goog-api-key";

// =============================================================================
// API REQUEST / RESPONSE TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

impl GenerateContentRequest {
    pub fn from_prompt(prompt: String) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
        }
    }
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// =============================================================================
// PROMPT
// =============================================================================

/// One line per body: name, mass, position and velocity
pub fn describe_system(bodies: &[CelestialBody]) -> String {
    bodies
        .iter()
        .map(|b| {
            format!(
                "- {}: Mass={:.1}, Position=({:.0}, {:.0}), Velocity=({:.2}, {:.2})",
                b.name, b.mass, b.position.x, b.position.y, b.velocity.x, b.velocity.y
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(bodies: &[CelestialBody]) -> String {
    format!(
        "You are an expert astrophysicist analyzing a 2D solar system simulation.\n\
         \n\
         Here is the current state of the system:\n\
         {}\n\
         \n\
         Please provide a brief, fun, and scientific analysis of this system.\n\
         1. Is it likely stable?\n\
         2. Are there any potential collisions imminent based on positions?\n\
         3. Suggest one new body (name, mass, approx position/velocity) that would be interesting to add to this specific configuration.\n\
         \n\
         Keep the response under 150 words.",
        describe_system(bodies)
    )
}

// =============================================================================
// API CLIENT
// =============================================================================

pub struct AnalysisClient {
    config: AnalysisConfig,
    client: reqwest::Client,
}

impl AnalysisClient {
    pub fn new(config: AnalysisConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Request an analysis. Errors are descriptive strings for logging and
    /// never contain the API key: it travels in a header and URLs are stripped.
    pub async fn generate(&self, prompt: String) -> Result<Option<String>, String> {
        let api_key = self.config.api_key.as_deref().ok_or("API key not set")?;

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&GenerateContentRequest::from_prompt(prompt))
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e.without_url()))?;

        if !response.status().is_success() {
            return Err(format!("API returned status: {}", response.status()));
        }

        let data: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e.without_url()))?;

        Ok(data.text())
    }

    /// Analyze a snapshot of bodies. Never fails: problems become a static message.
    pub async fn analyze(&self, bodies: &[CelestialBody]) -> String {
        if !self.is_configured() {
            return MISSING_KEY_MESSAGE.to_string();
        }

        let prompt = build_prompt(bodies);
        debug!("requesting analysis of {} bodies", bodies.len());

        // Outer guard in case the transport ignores its own timeout
        let request = self.generate(prompt);
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => EMPTY_RESPONSE_MESSAGE.to_string(),
            Ok(Err(e)) => {
                error!("analysis request failed: {}", e);
                FAILURE_MESSAGE.to_string()
            }
            Err(_) => {
                error!("analysis request timed out after {:?}", self.config.timeout);
                FAILURE_MESSAGE.to_string()
            }
        }
    }
}

// =============================================================================
// ANALYSIS CACHE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub text: String,
    pub body_count: usize,
    pub generated_at: DateTime<Utc>,
}

/// Marks an analysis as in flight until dropped, so a cancelled request
/// releases the slot as well as a finished one.
pub struct InFlightGuard {
    in_flight: Arc<RwLock<bool>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        *self.in_flight.write() = false;
    }
}

/// Holds the most recent report so a UI can show it without re-requesting
pub struct AnalysisCache {
    latest: Arc<RwLock<Option<AnalysisReport>>>,
    in_flight: Arc<RwLock<bool>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(RwLock::new(false)),
        }
    }

    pub fn latest(&self) -> Option<AnalysisReport> {
        self.latest.read().clone()
    }

    pub fn store(&self, text: String, body_count: usize) -> AnalysisReport {
        let report = AnalysisReport {
            text,
            body_count,
            generated_at: Utc::now(),
        };
        *self.latest.write() = Some(report.clone());
        report
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }

    /// Mark a request as started. Returns None if one is already running.
    pub fn begin(&self) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.write();
        if *in_flight {
            return None;
        }
        *in_flight = true;
        Some(InFlightGuard {
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_analyzing(&self) -> bool {
        *self.in_flight.read()
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics_engine::{Trail, Vector2};
    use std::time::Duration;

    fn sample_bodies() -> Vec<CelestialBody> {
        vec![CelestialBody {
            id: "earth".to_string(),
            name: "Earth".to_string(),
            mass: 100.0,
            radius: 12.0,
            position: Vector2::new(300.4, -0.6),
            velocity: Vector2::new(0.0, 2.8),
            color: "#3b82f6".to_string(),
            is_locked: false,
            trail: Trail::default(),
        }]
    }

    #[test]
    fn test_describe_system_format() {
        let description = describe_system(&sample_bodies());
        assert_eq!(
            description,
            "- Earth: Mass=100.0, Position=(300, -1), Velocity=(0.00, 2.80)"
        );
    }

    #[test]
    fn test_prompt_contains_description() {
        let prompt = build_prompt(&sample_bodies());
        assert!(prompt.contains("- Earth: Mass=100.0"));
        assert!(prompt.contains("under 150 words"));
    }

    #[test]
    fn test_response_text_extraction() {
        let json = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Stable "},{"text":"enough."}]},"finishReason":"STOP"}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text().as_deref(), Some("Stable enough."));

        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.text().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_returns_static_message() {
        let client = AnalysisClient::new(AnalysisConfig::default());
        assert_eq!(client.analyze(&sample_bodies()).await, MISSING_KEY_MESSAGE);
    }

    #[tokio::test]
    async fn test_unreachable_service_returns_failure_message() {
        let client = AnalysisClient::new(AnalysisConfig {
            api_key: Some("test-key".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(2),
            ..AnalysisConfig::default()
        });
        assert_eq!(client.analyze(&sample_bodies()).await, FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_request_errors_do_not_leak_key() {
        let client = AnalysisClient::new(AnalysisConfig {
            api_key: Some("SECRET-KEY-123".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(2),
            ..AnalysisConfig::default()
        });

        let err = client.generate("hello".to_string()).await.unwrap_err();
        assert!(err.starts_with("Request failed"), "unexpected error: {}", err);
        assert!(!err.contains("SECRET-KEY-123"), "key leaked: {}", err);
        assert!(!err.contains("127.0.0.1"), "url leaked: {}", err);
    }

    #[test]
    fn test_cache_single_flight() {
        let cache = AnalysisCache::new();
        let guard = cache.begin();
        assert!(guard.is_some());
        assert!(cache.begin().is_none());
        assert!(cache.is_analyzing());
        drop(guard);
        assert!(!cache.is_analyzing());
        assert!(cache.begin().is_some());

        cache.store("ok".to_string(), 3);
        assert_eq!(cache.latest().map(|r| r.body_count), Some(3));
        cache.clear();
        assert!(cache.latest().is_none());
    }
}
