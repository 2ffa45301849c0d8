//! Questionnaire document decoding
//!
//! Stored questions come in several shapes: `type` may be missing (and is then
//! inferred from the fields present), options may be plain strings or
//! `{text|label, value}` objects, and scale bounds may be absent.

use serde_json::{Map, Value};

use crate::error::QuestionError;
use crate::store::Document;
use crate::types::{OptionValue, Question, QuestionKind, QuestionOption, ScaleRange};

/// Outcome of decoding one stored document
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDocumentReport {
    pub document_id: String,
    pub error: Option<QuestionError>,
}

/// Decode a stored questionnaire document into a typed question
pub fn decode_question(doc: &Document) -> Result<Question, QuestionError> {
    let data = doc.data.as_object().ok_or(QuestionError::NotAnObject)?;

    let text = data
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(QuestionError::MissingText)?;

    let declared = data
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty());

    let type_name = match declared {
        Some(t) => t,
        None => infer_type(data).ok_or(QuestionError::InvalidType(None))?,
    };

    let kind = match type_name.as_str() {
        "scale" => QuestionKind::Scale {
            range: decode_range(data)?,
        },
        "numeric" => QuestionKind::Numeric {
            range: decode_range(data)?,
        },
        "options" => {
            let options = decode_options(data);
            if options.is_empty() {
                return Err(QuestionError::MissingOptions);
            }
            QuestionKind::Options { options }
        }
        "binary" => {
            let mut options = decode_options(data);
            if options.is_empty() {
                options = vec![
                    QuestionOption::new("Yes", OptionValue::Text("Yes".to_string())),
                    QuestionOption::new("No", OptionValue::Text("No".to_string())),
                ];
            }
            QuestionKind::Binary { options }
        }
        "categorical" => QuestionKind::Categorical {
            options: decode_options(data),
        },
        _ => return Err(QuestionError::InvalidType(Some(type_name))),
    };

    Ok(Question {
        id: doc.id.clone(),
        text: text.to_string(),
        kind,
    })
}

/// Infer a missing `type` from the fields present
fn infer_type(data: &Map<String, Value>) -> Option<String> {
    let has_options = data
        .get("options")
        .and_then(Value::as_array)
        .is_some_and(|o| !o.is_empty());

    if has_options {
        Some("options".to_string())
    } else if data.contains_key("minValue") || data.contains_key("maxValue") {
        Some("scale".to_string())
    } else {
        None
    }
}

fn decode_range(data: &Map<String, Value>) -> Result<ScaleRange, QuestionError> {
    let defaults = ScaleRange::default();
    let number = |key: &str| data.get(key).and_then(Value::as_f64);
    let range = ScaleRange {
        min: number("minValue").unwrap_or(defaults.min),
        max: number("maxValue").unwrap_or(defaults.max),
        step: number("step").filter(|s| *s > 0.0).unwrap_or(defaults.step),
    };

    // Bounds are filled from defaults independently, so a lone minValue can
    // land above the default maximum.
    if range.min > range.max {
        return Err(QuestionError::InvalidRange(format!(
            "minValue {} is above maxValue {}",
            range.min, range.max
        )));
    }
    Ok(range)
}

fn decode_options(data: &Map<String, Value>) -> Vec<QuestionOption> {
    let Some(raw) = data.get("options").and_then(Value::as_array) else {
        return Vec::new();
    };

    raw.iter()
        .enumerate()
        .map(|(i, opt)| decode_option(i, opt))
        .collect()
}

fn decode_option(index: usize, raw: &Value) -> QuestionOption {
    let fallback_label = format!("Option {}", index + 1);
    match raw {
        Value::String(s) => QuestionOption::new(s.trim(), OptionValue::Text(s.clone())),
        Value::Object(obj) => {
            let label = obj
                .get("label")
                .or_else(|| obj.get("text"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or(fallback_label);
            let value = match obj.get("value") {
                Some(Value::String(s)) => OptionValue::Text(s.clone()),
                Some(Value::Number(n)) => OptionValue::Number(n.as_f64().unwrap_or(index as f64)),
                Some(Value::Bool(b)) => OptionValue::Text(if *b { "True" } else { "False" }.to_string()),
                _ => OptionValue::Number(index as f64),
            };
            QuestionOption::new(label, value)
        }
        _ => QuestionOption::new(fallback_label, OptionValue::Number(index as f64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document {
            id: id.to_string(),
            data,
        }
    }

    #[test]
    fn test_infers_options_type() {
        let q = decode_question(&doc(
            "q1",
            json!({"text": " Sleep quality? ", "options": ["Poor", "Good"]}),
        ))
        .unwrap();

        assert_eq!(q.text, "Sleep quality?");
        assert_eq!(
            q.kind,
            QuestionKind::Options {
                options: vec![
                    QuestionOption::new("Poor", OptionValue::Text("Poor".to_string())),
                    QuestionOption::new("Good", OptionValue::Text("Good".to_string())),
                ]
            }
        );
    }

    #[test]
    fn test_infers_scale_type_with_defaults() {
        let q = decode_question(&doc("q2", json!({"text": "Stress level", "maxValue": 10})))
            .unwrap();
        assert_eq!(
            q.kind,
            QuestionKind::Scale {
                range: ScaleRange {
                    min: 1.0,
                    max: 10.0,
                    step: 1.0
                }
            }
        );
    }

    #[test]
    fn test_object_options_default_label_and_value() {
        let q = decode_question(&doc(
            "q3",
            json!({
                "text": "Energy?",
                "type": "options",
                "options": [{"text": "High", "value": 3}, {"value": "Low"}, {}, 42]
            }),
        ))
        .unwrap();

        let options = q.kind.options();
        assert_eq!(options[0], QuestionOption::new("High", OptionValue::Number(3.0)));
        assert_eq!(options[1], QuestionOption::new("Option 2", OptionValue::Text("Low".to_string())));
        assert_eq!(options[2], QuestionOption::new("Option 3", OptionValue::Number(2.0)));
        assert_eq!(options[3], QuestionOption::new("Option 4", OptionValue::Number(3.0)));
    }

    #[test]
    fn test_rejects_invalid_documents() {
        assert_eq!(
            decode_question(&doc("a", json!({"type": "scale"}))),
            Err(QuestionError::MissingText)
        );
        assert_eq!(
            decode_question(&doc("b", json!({"text": "Free text"}))),
            Err(QuestionError::InvalidType(None))
        );
        assert_eq!(
            decode_question(&doc("c", json!({"text": "x", "type": "slider"}))),
            Err(QuestionError::InvalidType(Some("slider".to_string())))
        );
        assert_eq!(
            decode_question(&doc("d", json!({"text": "x", "type": "options", "options": []}))),
            Err(QuestionError::MissingOptions)
        );
        assert_eq!(
            decode_question(&doc("e", json!(["not", "an", "object"]))),
            Err(QuestionError::NotAnObject)
        );
    }

    #[test]
    fn test_rejects_inverted_range() {
        let err = decode_question(&doc("q5", json!({"text": "Hours of sleep", "minValue": 6})))
            .unwrap_err();
        assert!(matches!(err, QuestionError::InvalidRange(_)));

        let err = decode_question(&doc(
            "q6",
            json!({"text": "Hours", "type": "numeric", "minValue": 10, "maxValue": 2}),
        ))
        .unwrap_err();
        assert!(matches!(err, QuestionError::InvalidRange(_)));

        let q = decode_question(&doc("q7", json!({"text": "Hours", "minValue": 5})))
            .unwrap();
        assert_eq!(q.kind.as_str(), "scale");
    }

    #[test]
    fn test_binary_gets_default_options() {
        let q = decode_question(&doc("q4", json!({"text": "Do you exercise?", "type": "Binary"})))
            .unwrap();
        assert_eq!(q.kind.as_str(), "binary");
        assert_eq!(q.kind.options().len(), 2);
    }
}
