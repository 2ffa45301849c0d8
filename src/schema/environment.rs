//! Environment document decoding

use serde_json::Value;

use crate::error::PipelineError;
use crate::types::EnvironmentMetadata;

/// Fields an environment document must carry to be playable
pub const REQUIRED_ENVIRONMENT_FIELDS: [&str; 4] = ["title", "description", "benefits", "imageUrl"];

const DEFAULT_DURATION: &str = "20min";
const UNKNOWN_BENEFITS: &str = "Unknown benefits";

/// Decode and validate an `environments` document
pub fn decode_environment(id: &str, data: &Value) -> Result<EnvironmentMetadata, PipelineError> {
    let missing: Vec<&str> = REQUIRED_ENVIRONMENT_FIELDS
        .iter()
        .copied()
        .filter(|field| !is_present(data.get(*field)))
        .collect();

    if !missing.is_empty() {
        return Err(PipelineError::EnvironmentNotFound {
            id: id.to_string(),
            reason: format!("missing required fields: {}", missing.join(", ")),
        });
    }

    let benefits = match data.get("benefits") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|b| b.as_str().map(str::to_string))
            .collect(),
        _ => vec![UNKNOWN_BENEFITS.to_string()],
    };

    let duration = match data.get("duration") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => format!("{n}min"),
        _ => DEFAULT_DURATION.to_string(),
    };

    Ok(EnvironmentMetadata {
        title: text(data, "title"),
        description: text(data, "description"),
        benefits,
        image_url: text(data, "imageUrl"),
        duration,
        video_url: text(data, "videoUrl"),
        guidance_audio_url: text(data, "guidanceAudioUrl"),
        ambient_audio_url: text(data, "ambientAudioUrl"),
    })
}

/// Truthiness of a stored field: absent, null, false and "" count as missing
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn text(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
