//! Therapy service client
//!
//! The prediction, recommendation, sentiment and emotion models run behind a
//! small HTTP service. [`TherapyApi`] is the seam the fetcher and feedback
//! recorder depend on; [`HttpTherapyApi`] is the reqwest implementation.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{NormalizedResponse, SentimentAnalysis, SentimentLabel};

/// Output of the therapy recommendation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapyRecommendation {
    pub therapy: String,
    #[serde(default)]
    pub therapy_description: Option<String>,
    pub environment_id: String,
}

/// Remote model endpoints
#[async_trait]
pub trait TherapyApi: Send + Sync {
    /// Classify the user's condition from the 15 normalized responses
    async fn predict_condition(&self, responses: &NormalizedResponse)
        -> Result<String, PipelineError>;

    /// Map a condition to a therapy and its environment
    async fn recommend_therapy(&self, condition: &str)
        -> Result<TherapyRecommendation, PipelineError>;

    /// Sentiment summary of free-text feedback
    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentAnalysis, PipelineError>;

    /// Emotion summary of a face image
    async fn analyze_emotion(
        &self,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<String, PipelineError>;

    /// Check that the service root answers
    async fn check_connectivity(&self) -> Result<(), PipelineError>;
}

/// Extract the sentiment word from "... suggests positive. ..."
pub fn parse_sentiment_label(result: &str) -> Option<SentimentLabel> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"suggests (\w+)\.").ok())
        .as_ref()?;

    let word = pattern.captures(result)?.get(1)?.as_str().to_lowercase();
    Some(match word.as_str() {
        "positive" => SentimentLabel::Positive,
        "negative" => SentimentLabel::Negative,
        _ => SentimentLabel::Other(word),
    })
}

/// reqwest-backed client of the therapy service
pub struct HttpTherapyApi {
    http_client: reqwest::Client,
    config: PipelineConfig,
}

impl HttpTherapyApi {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("calmia/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PipelineError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// POST a JSON body and return the decoded JSON reply
    ///
    /// Transport failures and non-2xx statuses are mapped through `wrap`; the
    /// service's `error` field is preferred as the message when present.
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        wrap: fn(String) -> PipelineError,
    ) -> Result<Value, PipelineError> {
        let url = self.config.endpoint(path);
        tracing::debug!(url = %url, "POST");

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| wrap(format!("Request to {path} failed: {e}")))?;

        read_json(response, path, wrap).await
    }
}

async fn read_json(
    response: reqwest::Response,
    path: &str,
    wrap: fn(String) -> PipelineError,
) -> Result<Value, PipelineError> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{path} returned HTTP {}", status.as_u16()));
        tracing::warn!(path, status = status.as_u16(), error = %message, "Service error");
        return Err(wrap(message));
    }

    Ok(body)
}

fn required_str(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl TherapyApi for HttpTherapyApi {
    async fn predict_condition(
        &self,
        responses: &NormalizedResponse,
    ) -> Result<String, PipelineError> {
        let body = json!({ "responses": responses.values() });
        let reply = self
            .post_json("/predict_pre_therapy", &body, PipelineError::Prediction)
            .await?;

        required_str(&reply, "condition").ok_or_else(|| {
            PipelineError::Prediction("No condition returned from prediction".to_string())
        })
    }

    async fn recommend_therapy(
        &self,
        condition: &str,
    ) -> Result<TherapyRecommendation, PipelineError> {
        let body = json!({ "condition": condition });
        let reply = self
            .post_json("/recommend_therapy", &body, PipelineError::Recommendation)
            .await?;

        let therapy = required_str(&reply, "therapy");
        let environment_id = required_str(&reply, "environmentId");
        match (therapy, environment_id) {
            (Some(therapy), Some(environment_id)) => Ok(TherapyRecommendation {
                therapy,
                therapy_description: required_str(&reply, "therapyDescription"),
                environment_id,
            }),
            _ => Err(PipelineError::Recommendation(
                "Invalid therapy recommendation response".to_string(),
            )),
        }
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentAnalysis, PipelineError> {
        let reply = self
            .post_json("/sentiment", &json!({ "text": text }), PipelineError::Network)
            .await?;

        let result = required_str(&reply, "result")
            .ok_or_else(|| PipelineError::Network("No sentiment result returned".to_string()))?;
        let label = parse_sentiment_label(&result);
        Ok(SentimentAnalysis { result, label })
    }

    async fn analyze_emotion(
        &self,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<String, PipelineError> {
        let url = self.config.endpoint("/analyze_emotion");
        let part = reqwest::multipart::Part::bytes(image).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("Emotion upload failed: {e}")))?;

        let reply = read_json(response, "/analyze_emotion", PipelineError::Network).await?;
        required_str(&reply, "result")
            .ok_or_else(|| PipelineError::Network("No emotion result returned".to_string()))
    }

    async fn check_connectivity(&self) -> Result<(), PipelineError> {
        let url = self.config.endpoint("/");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Network(format!("{} unreachable: {}", self.config.api_url, e))
            })?;

        if response.status().is_server_error() {
            return Err(PipelineError::Network(format!(
                "{} returned HTTP {}",
                self.config.api_url,
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sentiment_label_parsing() {
        assert_eq!(
            parse_sentiment_label("Your tone suggests positive. Let's try a relaxation technique."),
            Some(SentimentLabel::Positive)
        );
        assert_eq!(
            parse_sentiment_label("Your tone suggests Negative. Breathe."),
            Some(SentimentLabel::Negative)
        );
        assert_eq!(
            parse_sentiment_label("Your tone suggests neutral."),
            Some(SentimentLabel::Other("neutral".to_string()))
        );
        assert_eq!(parse_sentiment_label("No idea"), None);
    }

    #[test]
    fn test_recommendation_payload_shape() {
        let reply: TherapyRecommendation = serde_json::from_value(json!({
            "therapy": "stress Therapy",
            "environmentId": "forest",
            "environment": {"title": "Forest"}
        }))
        .unwrap();
        assert_eq!(reply.environment_id, "forest");
        assert_eq!(reply.therapy_description, None);
    }

    #[test]
    fn test_required_str_rejects_blank() {
        let body = json!({"condition": "  ", "therapy": "Calm"});
        assert_eq!(required_str(&body, "condition"), None);
        assert_eq!(required_str(&body, "therapy"), Some("Calm".to_string()));
        assert_eq!(required_str(&body, "missing"), None);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let config = PipelineConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 1,
            ..Default::default()
        };
        let api = HttpTherapyApi::new(config).unwrap();
        let err = api.check_connectivity().await.unwrap_err();
        assert!(matches!(err, PipelineError::Network(_)));
    }
}
