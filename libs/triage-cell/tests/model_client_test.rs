use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_models::{ModelScore, SymptomModel};
use shared_utils::test_utils::test_config;
use triage_cell::services::{RemoteSymptomModel, RulesEngine};

fn model_config(url: &str) -> AppConfig {
    let mut config = test_config();
    config.triage_engine = "model".to_string();
    config.triage_model_url = url.to_string();
    config.triage_model_timeout_s = 1;
    config
}

#[tokio::test]
async fn valid_prediction_is_returned() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(body_partial_json(json!({"symptoms_text": "chest pain"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "score": 7,
            "confidence": 55
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let model = RemoteSymptomModel::new(&model_config(&mock_server.uri()));
    let prediction = model.predict("chest pain").await;

    assert_eq!(
        prediction,
        Some(ModelScore {
            score: 7,
            confidence: 55
        })
    );
}

#[tokio::test]
async fn api_key_is_sent_as_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(header("Authorization", "Bearer test-model-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "score": 3,
            "confidence": 80
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = model_config(&mock_server.uri());
    config.triage_model_api_key = "test-model-key".to_string();

    let model = RemoteSymptomModel::new(&config);
    let prediction = model.predict("mild rash").await;

    assert!(prediction.is_some());
}

#[tokio::test]
async fn out_of_range_score_degrades_to_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "score": 11,
            "confidence": 90
        })))
        .mount(&mock_server)
        .await;

    let model = RemoteSymptomModel::new(&model_config(&mock_server.uri()));
    assert_eq!(model.predict("dizziness").await, None);
}

#[tokio::test]
async fn non_integer_score_degrades_to_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "score": "7",
            "confidence": 55
        })))
        .mount(&mock_server)
        .await;

    let model = RemoteSymptomModel::new(&model_config(&mock_server.uri()));
    assert_eq!(model.predict("dizziness").await, None);
}

#[tokio::test]
async fn invalid_confidence_degrades_to_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "score": 5,
            "confidence": 140
        })))
        .mount(&mock_server)
        .await;

    let model = RemoteSymptomModel::new(&model_config(&mock_server.uri()));
    assert_eq!(model.predict("dizziness").await, None);
}

#[tokio::test]
async fn server_error_degrades_to_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let model = RemoteSymptomModel::new(&model_config(&mock_server.uri()));
    assert_eq!(model.predict("dizziness").await, None);
}

#[tokio::test]
async fn slow_model_times_out_to_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"score": 5, "confidence": 50}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let model = RemoteSymptomModel::new(&model_config(&mock_server.uri()));
    assert_eq!(model.predict("dizziness").await, None);
}

#[tokio::test]
async fn unset_url_degrades_to_none() {
    let model = RemoteSymptomModel::new(&model_config(""));
    assert_eq!(model.predict("dizziness").await, None);
}

#[tokio::test]
async fn rules_engine_never_predicts() {
    assert_eq!(RulesEngine.predict("anything at all").await, None);
}
