//! Core types for the Calmia pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: decoded questions, raw answers, normalized responses, and the
//! composed therapy recommendation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::PipelineError;
use crate::EXPECTED_QUESTION_COUNT;

/// Value carried by a question option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Number(f64),
    Text(String),
}

impl OptionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Number(n) => Some(*n),
            OptionValue::Text(_) => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Number(n) => write!(f, "{n}"),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// A selectable answer of a multiple-choice question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: OptionValue,
}

impl QuestionOption {
    pub fn new(label: impl Into<String>, value: OptionValue) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Numeric range of a slider question
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 5.0,
            step: 1.0,
        }
    }
}

impl ScaleRange {
    /// Midpoint of the range, snapped to the nearest step
    pub fn midpoint(&self) -> f64 {
        let mid = (self.min + self.max) / 2.0;
        if self.step > 0.0 {
            let steps = ((mid - self.min) / self.step).round();
            self.clamp(self.min + steps * self.step)
        } else {
            mid
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min.min(self.max), self.max.max(self.min))
    }
}

/// Question kind, decoded once from the stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Scale { range: ScaleRange },
    Numeric { range: ScaleRange },
    Options { options: Vec<QuestionOption> },
    Binary { options: Vec<QuestionOption> },
    Categorical { options: Vec<QuestionOption> },
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Scale { .. } => "scale",
            QuestionKind::Numeric { .. } => "numeric",
            QuestionKind::Options { .. } => "options",
            QuestionKind::Binary { .. } => "binary",
            QuestionKind::Categorical { .. } => "categorical",
        }
    }

    /// Slider range for scale and numeric questions
    pub fn range(&self) -> Option<ScaleRange> {
        match self {
            QuestionKind::Scale { range } | QuestionKind::Numeric { range } => Some(*range),
            _ => None,
        }
    }

    pub fn options(&self) -> &[QuestionOption] {
        match self {
            QuestionKind::Options { options }
            | QuestionKind::Binary { options }
            | QuestionKind::Categorical { options } => options,
            _ => &[],
        }
    }

    /// Whether answers are held in transient slider state until confirmed
    pub fn is_slider(&self) -> bool {
        self.range().is_some()
    }
}

/// A questionnaire entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Raw answer as collected from the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
}

impl From<f64> for AnswerValue {
    fn from(v: f64) -> Self {
        AnswerValue::Number(v)
    }
}

impl From<i64> for AnswerValue {
    fn from(v: i64) -> Self {
        AnswerValue::Number(v as f64)
    }
}

impl From<&str> for AnswerValue {
    fn from(v: &str) -> Self {
        AnswerValue::Text(v.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(v: String) -> Self {
        AnswerValue::Text(v)
    }
}

impl From<OptionValue> for AnswerValue {
    fn from(v: OptionValue) -> Self {
        match v {
            OptionValue::Number(n) => AnswerValue::Number(n),
            OptionValue::Text(s) => AnswerValue::Text(s),
        }
    }
}

impl AnswerValue {
    /// An answer that carries no information (blank text or NaN)
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Number(n) => n.is_nan(),
            AnswerValue::Text(s) => s.trim().is_empty(),
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Number(n) => write!(f, "{n}"),
            AnswerValue::Text(s) => f.write_str(s),
        }
    }
}

/// Answers keyed by 0-based question index
pub type AnswerMap = BTreeMap<usize, AnswerValue>;

/// A single entry of the positional vector sent to the prediction model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Number(i64),
    Label(String),
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Number(n) => write!(f, "{n}"),
            NormalizedValue::Label(s) => f.write_str(s),
        }
    }
}

/// Diagnostic flag for an entry that could not be mapped and was defaulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationFlag {
    pub index: usize,
    pub question_id: String,
    pub raw: String,
}

/// Ordered, validated response vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResponse {
    values: Vec<NormalizedValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    flags: Vec<NormalizationFlag>,
}

impl NormalizedResponse {
    /// Build a response, enforcing the fixed length and non-empty entries
    pub fn new(
        values: Vec<NormalizedValue>,
        flags: Vec<NormalizationFlag>,
    ) -> Result<Self, PipelineError> {
        if values.len() != EXPECTED_QUESTION_COUNT {
            return Err(PipelineError::Validation(format!(
                "Invalid number of responses: expected {}, got {}",
                EXPECTED_QUESTION_COUNT,
                values.len()
            )));
        }

        if let Some(index) = values
            .iter()
            .position(|v| matches!(v, NormalizedValue::Label(s) if s.trim().is_empty()))
        {
            return Err(PipelineError::Validation(format!(
                "Response at index {index} is empty"
            )));
        }

        Ok(Self { values, flags })
    }

    /// Build a response from values produced elsewhere (e.g. a stored record)
    pub fn from_values(values: Vec<NormalizedValue>) -> Result<Self, PipelineError> {
        Self::new(values, Vec::new())
    }

    pub fn values(&self) -> &[NormalizedValue] {
        &self.values
    }

    pub fn flags(&self) -> &[NormalizationFlag] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Placeholder description used when the backend omits one
pub const DEFAULT_THERAPY_DESCRIPTION: &str =
    "A personalized therapy to support your mental well-being.";

/// Themed therapy setting associated with a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMetadata {
    pub title: String,
    pub description: String,
    pub benefits: Vec<String>,
    pub image_url: String,
    pub duration: String,
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub guidance_audio_url: String,
    #[serde(default)]
    pub ambient_audio_url: String,
}

/// Final result of one session's recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    pub condition: String,
    pub therapy: String,
    pub therapy_description: String,
    pub environment_id: String,
    pub environment: EnvironmentMetadata,
}

/// `therapySuggestions` document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapySuggestionRecord {
    pub user_id: String,
    pub session_id: String,
    pub condition: String,
    pub suggestion: String,
    #[serde(default)]
    pub therapy_description: Option<String>,
    pub environment_id: String,
    pub environment: EnvironmentMetadata,
    pub recommended_at: DateTime<Utc>,
}

impl TherapySuggestionRecord {
    pub fn new(
        user_id: &str,
        session_id: &str,
        result: &RecommendationResult,
        recommended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            condition: result.condition.clone(),
            suggestion: result.therapy.clone(),
            therapy_description: Some(result.therapy_description.clone()),
            environment_id: result.environment_id.clone(),
            environment: result.environment.clone(),
            recommended_at,
        }
    }

    pub fn into_result(self) -> RecommendationResult {
        RecommendationResult {
            condition: self.condition,
            therapy: self.suggestion,
            therapy_description: self
                .therapy_description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_THERAPY_DESCRIPTION.to_string()),
            environment_id: self.environment_id,
            environment: self.environment,
        }
    }
}

/// `Responses` document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub user_id: String,
    pub session_id: String,
    pub responses: Vec<NormalizedValue>,
    pub timestamp: DateTime<Utc>,
}

/// Sentiment classification extracted from the backend's free-text summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Other(String),
}

/// Response of the sentiment endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub result: String,
    pub label: Option<SentimentLabel>,
}

/// `feedback` document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub user_id: String,
    pub session_id: String,
    pub feedback: String,
    pub sentiment: String,
    pub sentiment_label: Option<SentimentLabel>,
    pub emotion: String,
    pub sessions_taken: usize,
    pub mental_health_issue: String,
    pub therapy: String,
    /// History ordering key shared with journal entries
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// `journal` document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    pub user_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_midpoint_snaps_to_step() {
        let range = ScaleRange {
            min: 1.0,
            max: 10.0,
            step: 1.0,
        };
        // 5.5 rounds to the nearest step
        assert_eq!(range.midpoint(), 6.0);
        assert_eq!(ScaleRange::default().midpoint(), 3.0);
    }

    #[test]
    fn test_normalized_response_length_enforced() {
        let values = vec![NormalizedValue::Number(1); 14];
        let err = NormalizedResponse::from_values(values).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let values = vec![NormalizedValue::Number(1); 15];
        assert_eq!(NormalizedResponse::from_values(values).unwrap().len(), 15);
    }

    #[test]
    fn test_normalized_response_rejects_blank_label() {
        let mut values = vec![NormalizedValue::Number(1); 15];
        values[4] = NormalizedValue::Label("  ".to_string());
        let err = NormalizedResponse::from_values(values).unwrap_err();
        assert!(err.to_string().contains("index 4"));
    }

    #[test]
    fn test_normalized_values_serialize_positionally() {
        let mut values = vec![NormalizedValue::Number(2); 15];
        values[0] = NormalizedValue::Label("Yes".to_string());
        let response = NormalizedResponse::from_values(values).unwrap();
        let json = serde_json::to_value(response.values()).unwrap();
        assert_eq!(json[0], "Yes");
        assert_eq!(json[1], 2);
    }

    #[test]
    fn test_question_kind_round_trip_shape() {
        let question = Question {
            id: "q1".to_string(),
            text: "How stressed are you?".to_string(),
            kind: QuestionKind::Scale {
                range: ScaleRange::default(),
            },
        };
        let json = serde_json::to_value(&question).unwrap();
        assert_eq!(json["type"], "scale");
        assert_eq!(json["range"]["max"], 5.0);
    }

    #[test]
    fn test_suggestion_record_defaults_description() {
        let record = TherapySuggestionRecord {
            user_id: "u".to_string(),
            session_id: "s".to_string(),
            condition: "stress".to_string(),
            suggestion: "Forest Walk".to_string(),
            therapy_description: None,
            environment_id: "forest".to_string(),
            environment: EnvironmentMetadata {
                title: "Forest".to_string(),
                description: "Calm woods".to_string(),
                benefits: vec!["Relaxation".to_string()],
                image_url: "https://img".to_string(),
                duration: "20min".to_string(),
                video_url: String::new(),
                guidance_audio_url: String::new(),
                ambient_audio_url: String::new(),
            },
            recommended_at: Utc::now(),
        };
        let result = record.into_result();
        assert_eq!(result.therapy, "Forest Walk");
        assert_eq!(result.therapy_description, DEFAULT_THERAPY_DESCRIPTION);
    }
}
