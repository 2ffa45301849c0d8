//! Test doubles shared across module tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{parse_sentiment_label, TherapyApi, TherapyRecommendation};
use crate::error::PipelineError;
use crate::store::{MemoryDocumentStore, ENVIRONMENTS_COLLECTION, QUESTIONS_COLLECTION};
use crate::types::{
    AnswerMap, AnswerValue, NormalizedResponse, NormalizedValue, OptionValue, Question,
    QuestionKind, QuestionOption, ScaleRange, SentimentAnalysis,
};

/// A call received by [`StubApi`]
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Connectivity,
    Predict(Vec<NormalizedValue>),
    Recommend(Value),
    Sentiment(String),
    Emotion(String),
}

/// Scripted therapy service
pub struct StubApi {
    condition: Option<String>,
    recommendation: Option<TherapyRecommendation>,
    recommend_failures: AtomicUsize,
    sentiment: Option<String>,
    emotion: Option<String>,
    online: AtomicBool,
    cancel_on_connectivity: Mutex<Option<CancellationToken>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl StubApi {
    /// Predicts "stress" and recommends the forest environment
    pub fn healthy() -> Self {
        Self {
            condition: Some("stress".to_string()),
            recommendation: Some(TherapyRecommendation {
                therapy: "stress Therapy".to_string(),
                therapy_description: Some("Guided forest immersion".to_string()),
                environment_id: "forest".to_string(),
            }),
            recommend_failures: AtomicUsize::new(0),
            sentiment: Some("Your tone suggests positive. Let's try a relaxation technique.".to_string()),
            emotion: Some("You seem happy. Let's try a breathing exercise.".to_string()),
            online: AtomicBool::new(true),
            cancel_on_connectivity: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_condition(mut self) -> Self {
        self.condition = None;
        self
    }

    pub fn without_recommendation(mut self) -> Self {
        self.recommendation = None;
        self
    }

    /// Fail the first `n` recommendation calls
    pub fn failing_recommendations(self, n: usize) -> Self {
        self.recommend_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_environment(mut self, environment_id: &str) -> Self {
        if let Some(rec) = self.recommendation.as_mut() {
            rec.environment_id = environment_id.to_string();
        }
        self
    }

    pub fn without_sentiment(mut self) -> Self {
        self.sentiment = None;
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Fire `token` while the connectivity check is answering
    pub fn cancel_during_connectivity(&self, token: CancellationToken) {
        *self.cancel_on_connectivity.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: fn(&ApiCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matcher(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TherapyApi for StubApi {
    async fn predict_condition(
        &self,
        responses: &NormalizedResponse,
    ) -> Result<String, PipelineError> {
        self.record(ApiCall::Predict(responses.values().to_vec()));
        self.condition
            .clone()
            .ok_or_else(|| PipelineError::Prediction("No condition returned from prediction".to_string()))
    }

    async fn recommend_therapy(
        &self,
        condition: &str,
    ) -> Result<TherapyRecommendation, PipelineError> {
        self.record(ApiCall::Recommend(json!({ "condition": condition })));
        let remaining = self.recommend_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.recommend_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::Recommendation("HTTP 500".to_string()));
        }
        self.recommendation
            .clone()
            .ok_or_else(|| PipelineError::Recommendation("Invalid therapy recommendation response".to_string()))
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentAnalysis, PipelineError> {
        self.record(ApiCall::Sentiment(text.to_string()));
        let result = self
            .sentiment
            .clone()
            .ok_or_else(|| PipelineError::Network("sentiment unavailable".to_string()))?;
        let label = parse_sentiment_label(&result);
        Ok(SentimentAnalysis { result, label })
    }

    async fn analyze_emotion(&self, _image: Vec<u8>, file_name: &str) -> Result<String, PipelineError> {
        self.record(ApiCall::Emotion(file_name.to_string()));
        self.emotion
            .clone()
            .ok_or_else(|| PipelineError::Network("emotion unavailable".to_string()))
    }

    async fn check_connectivity(&self) -> Result<(), PipelineError> {
        self.record(ApiCall::Connectivity);
        if let Some(token) = self.cancel_on_connectivity.lock().unwrap().take() {
            token.cancel();
        }
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::Network("offline".to_string()))
        }
    }
}

/// Fifteen questions cycling through scale, options and binary kinds
pub fn fifteen_questions() -> Vec<Question> {
    (0..15)
        .map(|i| Question {
            id: format!("q{i:02}"),
            text: format!("Question {i}"),
            kind: match i % 3 {
                0 => QuestionKind::Scale {
                    range: ScaleRange {
                        min: 1.0,
                        max: 10.0,
                        step: 1.0,
                    },
                },
                1 => QuestionKind::Options {
                    options: vec![
                        QuestionOption::new("High", OptionValue::Text("High".to_string())),
                        QuestionOption::new("Low", OptionValue::Text("Low".to_string())),
                    ],
                },
                _ => QuestionKind::Binary {
                    options: vec![
                        QuestionOption::new("Yes", OptionValue::Text("Yes".to_string())),
                        QuestionOption::new("No", OptionValue::Text("No".to_string())),
                    ],
                },
            },
        })
        .collect()
}

/// Complete answers matching [`fifteen_questions`]
pub fn fifteen_answers() -> AnswerMap {
    (0..15)
        .map(|i| {
            let value = match i % 3 {
                0 => AnswerValue::Number(7.0),
                1 => AnswerValue::from("High"),
                _ => AnswerValue::from("No"),
            };
            (i, value)
        })
        .collect()
}

/// A normalized response of fifteen entries
pub fn normalized_response() -> NormalizedResponse {
    NormalizedResponse::from_values(vec![NormalizedValue::Number(2); 15]).unwrap()
}

/// A complete `environments` document
pub fn environment_doc(title: &str) -> Value {
    json!({
        "title": title,
        "description": format!("{title} ambience"),
        "benefits": ["Relaxation", "Focus"],
        "imageUrl": format!("https://img.example/{}.jpg", title.to_lowercase()),
        "duration": "15min",
        "videoUrl": "https://video.example/forest.mp4"
    })
}

/// Store seeded with the fifteen questions and a "forest" environment
pub fn seeded_store() -> MemoryDocumentStore {
    let store = MemoryDocumentStore::new();
    for question in fifteen_questions() {
        let mut doc = json!({ "text": question.text, "type": question.kind.as_str() });
        match &question.kind {
            QuestionKind::Scale { range } => {
                doc["minValue"] = json!(range.min);
                doc["maxValue"] = json!(range.max);
            }
            kind => {
                doc["options"] = json!(kind
                    .options()
                    .iter()
                    .map(|o| o.label.clone())
                    .collect::<Vec<_>>());
            }
        }
        store.insert(QUESTIONS_COLLECTION, &question.id, doc).unwrap();
    }
    store
        .insert(ENVIRONMENTS_COLLECTION, "forest", environment_doc("Forest"))
        .unwrap();
    store
}
