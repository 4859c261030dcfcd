use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use shared_config::AppConfig;
use shared_models::{ModelScore, SymptomModel};

/// Rules-only deployment: never produces a prediction, so every assessment
/// takes the vitals-only path.
pub struct RulesEngine;

#[async_trait]
impl SymptomModel for RulesEngine {
    async fn predict(&self, _symptoms_text: &str) -> Option<ModelScore> {
        None
    }
}

/// HTTP client for the external urgency model. Fails soft on every error
/// path: unset URL, transport failure, timeout, non-2xx status, undecodable
/// or out-of-range payloads all come back as `None`.
pub struct RemoteSymptomModel {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RemoteSymptomModel {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.triage_model_url.clone(),
            api_key: config.triage_model_api_key.clone(),
            timeout: Duration::from_secs(config.triage_model_timeout_s),
        }
    }
}

#[async_trait]
impl SymptomModel for RemoteSymptomModel {
    async fn predict(&self, symptoms_text: &str) -> Option<ModelScore> {
        if self.base_url.is_empty() {
            warn!("Triage model URL is not set; scoring from vitals only");
            return None;
        }

        let url = format!("{}/predict", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({ "symptoms_text": symptoms_text }));
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Model call failed, scoring from vitals only: url={} err={}", url, e);
                return None;
            }
        };

        let status = response.status();
        info!(
            "Model request done status={} elapsed_ms={} url={}",
            status,
            started.elapsed().as_millis(),
            url
        );

        if !status.is_success() {
            warn!("Model returned status {}, scoring from vitals only", status);
            return None;
        }

        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Model response was not JSON, scoring from vitals only: {}", e);
                return None;
            }
        };

        let score = data.get("score").and_then(Value::as_i64);
        let confidence = data.get("confidence").and_then(Value::as_i64);

        let Some(score @ 1..=10) = score else {
            warn!("Invalid model score {:?}, scoring from vitals only", data.get("score"));
            return None;
        };
        let Some(confidence @ 0..=100) = confidence else {
            warn!(
                "Invalid model confidence {:?}, scoring from vitals only",
                data.get("confidence")
            );
            return None;
        };

        Some(ModelScore {
            score: score as u8,
            confidence: confidence as u8,
        })
    }
}
