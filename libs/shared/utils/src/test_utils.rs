//! Helpers shared by the workspace's tests.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, FixedOffset, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use shared_config::AppConfig;
use shared_database::{AppState, Database};
use shared_models::{ModelScore, SymptomModel};

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

/// An `AppConfig` suitable for tests: clinic clock at +03:00, rules-only
/// triage, short-lived rebooking tokens.
pub fn test_config() -> AppConfig {
    AppConfig {
        database_path: ":memory:".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        clinic_utc_offset: FixedOffset::east_opt(3 * 3600).expect("offset in range"),
        triage_engine: "rules".to_string(),
        triage_model_url: String::new(),
        triage_model_api_key: String::new(),
        triage_model_timeout_s: 2,
        rebooking_token_validity_days: 14,
        slot_range_max_days: 31,
    }
}

/// A symptom model that always answers with the same canned score.
/// `StubSymptomModel(None)` behaves like the rules-only deployment.
pub struct StubSymptomModel(pub Option<ModelScore>);

#[async_trait]
impl SymptomModel for StubSymptomModel {
    async fn predict(&self, _symptoms_text: &str) -> Option<ModelScore> {
        self.0
    }
}

/// A fresh in-memory application state with the schema applied.
pub async fn test_state() -> Arc<AppState> {
    test_state_with_model(StubSymptomModel(None)).await
}

pub async fn test_state_with_model(model: impl SymptomModel + 'static) -> Arc<AppState> {
    let db = Database::open_in_memory()
        .await
        .expect("in-memory database opens");
    Arc::new(AppState::new(test_config(), db, Arc::new(model)))
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(
        user_id: i64,
        role: &str,
        secret: &str,
        exp_hours: Option<i64>,
    ) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user_id.to_string(),
            "role": role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user_id: i64, role: &str, secret: &str) -> String {
        Self::create_test_token(user_id, role, secret, Some(-1))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}
