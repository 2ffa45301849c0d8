//! Response normalization
//!
//! This module maps collected raw answers into the positional vocabulary the
//! prediction model expects.
//! - Choice answers mapped to integers through the categorical vocabulary
//! - Binary answers canonicalized to "Yes"/"No"
//! - Scale answers parsed as integers
//! - Unmappable choice answers defaulted to 0 and flagged

use crate::error::PipelineError;
use crate::types::{
    AnswerMap, AnswerValue, NormalizationFlag, NormalizedResponse, NormalizedValue, Question,
    QuestionKind,
};
use crate::EXPECTED_QUESTION_COUNT;

/// Categorical labels understood by the prediction model and their integer codes
pub const CATEGORICAL_VOCABULARY: [(&str, i64); 9] = [
    ("High", 3),
    ("Medium", 2),
    ("Low", 1),
    ("No", 0),
    ("Poor", 1),
    ("Good", 3),
    ("Yes", 1),
    ("True", 1),
    ("False", 0),
];

/// Case-insensitive vocabulary lookup returning the canonical key and its code
pub fn vocabulary_entry(raw: &str) -> Option<(&'static str, i64)> {
    let raw = raw.trim();
    CATEGORICAL_VOCABULARY
        .iter()
        .copied()
        .find(|(key, _)| key.eq_ignore_ascii_case(raw))
}

/// One normalized entry plus whether it fell back to the default
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    pub value: NormalizedValue,
    pub defaulted: bool,
}

impl NormalizedEntry {
    fn mapped(value: NormalizedValue) -> Self {
        Self {
            value,
            defaulted: false,
        }
    }
}

/// Normalizer for converting collected answers into a model-ready response
pub struct Normalizer;

impl Normalizer {
    /// Normalize a complete answer map against its questions
    pub fn normalize(
        answers: &AnswerMap,
        questions: &[Question],
    ) -> Result<NormalizedResponse, PipelineError> {
        if questions.len() != EXPECTED_QUESTION_COUNT {
            return Err(PipelineError::Validation(format!(
                "Expected {} questions, got {}",
                EXPECTED_QUESTION_COUNT,
                questions.len()
            )));
        }

        if answers.len() != questions.len() {
            return Err(PipelineError::Validation(format!(
                "Invalid number of responses: expected {}, got {}",
                questions.len(),
                answers.len()
            )));
        }

        let mut values = Vec::with_capacity(questions.len());
        let mut flags = Vec::new();

        // Question order is the model's positional order
        for (index, question) in questions.iter().enumerate() {
            let raw = answers.get(&index).ok_or_else(|| {
                PipelineError::Validation(format!("Missing response for question {index}"))
            })?;

            let entry = Self::normalize_entry(index, raw, question)?;
            if entry.defaulted {
                tracing::warn!(
                    index,
                    question_id = %question.id,
                    raw = %raw,
                    "Unmapped answer defaulted to 0"
                );
                flags.push(NormalizationFlag {
                    index,
                    question_id: question.id.clone(),
                    raw: raw.to_string(),
                });
            }
            values.push(entry.value);
        }

        NormalizedResponse::new(values, flags)
    }

    /// Normalize one raw answer according to its question's kind
    ///
    /// Blank or NaN answers and unparsable slider answers are errors; an
    /// unmappable choice answer is not (it defaults to 0).
    pub fn normalize_entry(
        index: usize,
        raw: &AnswerValue,
        question: &Question,
    ) -> Result<NormalizedEntry, PipelineError> {
        if raw.is_blank() {
            return Err(PipelineError::Validation(format!(
                "Response at index {index} is empty"
            )));
        }

        match &question.kind {
            QuestionKind::Options { .. } => Ok(normalize_choice(raw, question)),
            QuestionKind::Scale { .. } | QuestionKind::Numeric { .. } => parse_integer(raw)
                .map(|n| NormalizedEntry::mapped(NormalizedValue::Number(n)))
                .ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "Response at index {index} ({raw}) is not a number"
                    ))
                }),
            QuestionKind::Binary { .. } => Ok(NormalizedEntry::mapped(normalize_binary(raw))),
            QuestionKind::Categorical { .. } => {
                Ok(NormalizedEntry::mapped(normalize_categorical(raw)))
            }
        }
    }
}

fn normalize_choice(raw: &AnswerValue, question: &Question) -> NormalizedEntry {
    let text = match raw {
        AnswerValue::Number(n) => {
            return match finite_integer(*n) {
                Some(n) => NormalizedEntry::mapped(NormalizedValue::Number(n)),
                None => defaulted(),
            };
        }
        AnswerValue::Text(s) => s.trim(),
    };

    if let Some((_, code)) = vocabulary_entry(text) {
        return NormalizedEntry::mapped(NormalizedValue::Number(code));
    }

    // Fall back to the question's own option table
    let matched = question
        .kind
        .options()
        .iter()
        .find(|opt| opt.value.to_string() == text || opt.label == text);
    if let Some(option) = matched {
        if let Some(n) = option.value.as_f64().and_then(finite_integer) {
            return NormalizedEntry::mapped(NormalizedValue::Number(n));
        }
        if let Some((_, code)) = vocabulary_entry(&option.label) {
            return NormalizedEntry::mapped(NormalizedValue::Number(code));
        }
    }

    match parse_integer(raw) {
        Some(n) => NormalizedEntry::mapped(NormalizedValue::Number(n)),
        None => defaulted(),
    }
}

fn normalize_binary(raw: &AnswerValue) -> NormalizedValue {
    match raw {
        AnswerValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => NormalizedValue::Label("Yes".to_string()),
            "no" | "false" => NormalizedValue::Label("No".to_string()),
            _ => NormalizedValue::Label(s.clone()),
        },
        AnswerValue::Number(n) => NormalizedValue::Number(n.trunc() as i64),
    }
}

fn normalize_categorical(raw: &AnswerValue) -> NormalizedValue {
    match raw {
        AnswerValue::Text(s) => match vocabulary_entry(s) {
            Some((key, _)) => NormalizedValue::Label(key.to_string()),
            None => NormalizedValue::Label(s.clone()),
        },
        AnswerValue::Number(n) => NormalizedValue::Number(n.trunc() as i64),
    }
}

fn defaulted() -> NormalizedEntry {
    NormalizedEntry {
        value: NormalizedValue::Number(0),
        defaulted: true,
    }
}

fn finite_integer(n: f64) -> Option<i64> {
    n.is_finite().then(|| n.trunc() as i64)
}

/// Integer parse with a leading-number fallback ("7", "7.6", " 3 ")
fn parse_integer(raw: &AnswerValue) -> Option<i64> {
    match raw {
        AnswerValue::Number(n) => finite_integer(*n),
        AnswerValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(finite_integer))
        }
    }
}
