//! Boundary to the external classification and timetable-parsing services.
//!
//! The engine only sees the two traits below. Whatever comes back is decoded
//! and validated here before anything is installed into the plan.

pub mod gemini;

pub use gemini::GeminiClient;

use crate::model::{ClassificationResult, RawClassification, TimetableResult, ValidationError};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Brain dump plus the hours available today
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    pub text: String,
    pub hours: Option<f32>,
}

/// Encoded timetable screenshot
#[derive(Debug, Clone)]
pub struct TimetableImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl TimetableImage {
    /// Read an image file, guessing the media type from its extension
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let mime_type = match ext.as_deref() {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            Some("heic") => "image/heic",
            _ => "image/jpeg",
        };
        Ok(Self {
            data,
            mime_type: mime_type.to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rejected response: {0}")]
    Validation(#[from] ValidationError),
}

impl ServiceError {
    /// Short text for the dismissible notice shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceError::MissingApiKey(_) => "The classification service is not configured.",
            ServiceError::Network(_) => "Could not reach the classification service. Try again.",
            ServiceError::Api { status, .. } if *status == 429 => {
                "The service is busy right now. Try again in a minute."
            }
            _ => "Something went wrong while sorting your tasks. Try again.",
        }
    }
}

pub trait Classifier: Send + Sync {
    fn classify(&self, request: &ClassificationRequest)
        -> Result<ClassificationResult, ServiceError>;
}

pub trait TimetableParser: Send + Sync {
    fn parse_timetable(&self, image: &TimetableImage) -> Result<TimetableResult, ServiceError>;
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("static regex"))
}

/// First `{` through last `}` of a chatty reply
pub fn extract_json_object(text: &str) -> Option<&str> {
    json_object_pattern().find(text).map(|m| m.as_str())
}

/// Decode and validate a classification reply.
pub fn decode_classification(text: &str) -> Result<ClassificationResult, ServiceError> {
    let body = extract_json_object(text)
        .ok_or_else(|| ServiceError::InvalidResponse("no JSON object in reply".to_string()))?;
    let raw: RawClassification = serde_json::from_str(body)?;
    Ok(ClassificationResult::try_from(raw)?)
}

/// Decode and validate a timetable reply. A reply without a JSON object fails.
pub fn decode_timetable(text: &str) -> Result<TimetableResult, ServiceError> {
    let body = extract_json_object(text)
        .ok_or_else(|| ServiceError::InvalidResponse("JSON not found in response".to_string()))?;
    let table: TimetableResult = serde_json::from_str(body)?;
    Ok(table.validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"freeHours\": 3}\n```\nEnjoy!";
        assert_eq!(extract_json_object(reply), Some("{\"freeHours\": 3}"));
        assert_eq!(extract_json_object("no braces here"), None);
    }

    #[test]
    fn test_decode_classification() {
        let result = decode_classification(
            r#"{"top3": ["write report"], "shallow": ["buy milk"], "deep": [], "micro": []}"#,
        )
        .unwrap();
        assert_eq!(result.top3, vec!["write report".to_string()]);
        assert_eq!(result.shallow, vec!["buy milk".to_string()]);
    }

    #[test]
    fn test_decode_classification_rejects_bad_shapes() {
        assert!(matches!(
            decode_classification("sorry, I can't"),
            Err(ServiceError::InvalidResponse(_))
        ));
        assert!(matches!(
            decode_classification(r#"{"top3": "not a list"}"#),
            Err(ServiceError::Json(_))
        ));
        assert!(matches!(
            decode_classification(r#"{"shallow": []}"#),
            Err(ServiceError::Validation(ValidationError::MissingTop3))
        ));
    }

    #[test]
    fn test_decode_timetable() {
        let table = decode_timetable(
            r#"Result: {"freeHours": 2.5, "totalFreeMinutes": 750,
              "slots": [{"day": "Mon", "start": "10:00", "end": "12:00", "label": "Mon 10-12"}],
              "summary": "free mornings"}"#,
        )
        .unwrap();
        assert_eq!(table.slots.len(), 1);
        assert_eq!(table.available_minutes(), 150);

        assert!(decode_timetable("nothing").is_err());
        assert!(matches!(
            decode_timetable(r#"{"freeHours": 0}"#),
            Err(ServiceError::Validation(ValidationError::NoFreeHours))
        ));
    }

    #[test]
    fn test_user_message_is_never_empty() {
        let errors = [
            ServiceError::MissingApiKey("X".into()),
            ServiceError::Api {
                status: 429,
                message: "slow down".into(),
            },
            ServiceError::InvalidResponse("x".into()),
        ];
        for e in errors {
            assert!(!e.user_message().is_empty());
        }
    }

    #[test]
    fn test_image_mime_from_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("week.PNG");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();
        let image = TimetableImage::from_path(&path).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data.len(), 3);
    }
}
