//! Gemini `generateContent` client for both external services.

use crate::config::ClassifierConfig;
use crate::model::{ClassificationResult, TimetableResult};
use crate::service::{
    decode_classification, decode_timetable, ClassificationRequest, Classifier, ServiceError,
    TimetableImage, TimetableParser,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CLASSIFY_PROMPT: &str = r#"You are a sharp productivity assistant.
The user has dumped everything on their mind, one item per line, in no particular order.
Sort it into the JSON shape below.

- top3: the three most important and urgent things to do today, each as a short sentence
- shallow: low-effort chores and errands (reply to an email, buy something)
- deep: work that needs sustained focus (write a proposal, study)
- micro: for goals too vague to start, one tiny concrete first action each ("learn Spanish" -> "install Duolingo")
- timeblocks: [{"label": string, "minutes": number}] splitting the available time; minutes must add up to exactly {minutes}
- groups: [{"category": string, "emoji": string, "tasks": [string], "tip": string}] clustering related tasks
- sequence: [{"phase": string, "tasks": [string], "reason": string}] in the order warm-up, deep-focus, wind-down

Available time today: {hours}

User input:
"""
{text}
"""

Respond with JSON only."#;

const TIMETABLE_PROMPT: &str = r#"This image is a weekly class timetable.
Find the free time that has no class scheduled.

Rules:
1. Only consider 09:00 to 22:00.
2. Exclude every slot that already has a class.
3. Keep only free blocks of one hour or more.
4. List the free blocks for each weekday (Monday to Friday).

Respond with JSON only, in this shape:
{
  "freeHours": number (average free hours per day, whole or .5),
  "totalFreeMinutes": number (total free minutes for the week),
  "slots": [
    { "day": "Mon", "start": "10:00", "end": "12:00", "label": "Monday 10:00-12:00" }
  ],
  "summary": "one-line overview, e.g. Mon/Wed/Fri mornings free, Tue/Thu 2h gap after lunch"
}"#;

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Build a client from the classifier section of the config.
    pub fn from_config(cfg: &ClassifierConfig) -> Result<Self, ServiceError> {
        let api_key = cfg
            .api_key()
            .ok_or_else(|| ServiceError::MissingApiKey(cfg.api_key_env.clone()))?;
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("zzwarak/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        })
    }

    fn generate(&self, parts: Vec<Part>, json_only: bool) -> Result<String, ServiceError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: json_only.then(|| GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };
        debug!(model = %self.model, json_only, "calling generateContent");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "generateContent failed");
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: GenerateContentResponse = response.json()?;
        reply_text(reply)
    }
}

fn reply_text(reply: GenerateContentResponse) -> Result<String, ServiceError> {
    let text: String = reply
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ServiceError::InvalidResponse(
            "reply had no text".to_string(),
        ));
    }
    Ok(text)
}

pub fn classification_prompt(request: &ClassificationRequest) -> String {
    let (hours, minutes) = match request.hours {
        Some(h) => (format!("{} hours", h), format!("{}", (h * 60.0).round() as u32)),
        None => ("not specified".to_string(), "the time you judge realistic".to_string()),
    };
    CLASSIFY_PROMPT
        .replace("{hours}", &hours)
        .replace("{minutes}", &minutes)
        .replace("{text}", &request.text)
}

impl Classifier for GeminiClient {
    fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ServiceError> {
        let prompt = classification_prompt(request);
        let text = self.generate(
            vec![Part {
                text: Some(prompt),
                ..Part::default()
            }],
            true,
        )?;
        let result = decode_classification(&text)?;
        if let Some(hours) = request.hours {
            let expected = (hours * 60.0).round() as u32;
            let got = result.timeblock_minutes();
            if !result.timeblocks.is_empty() && got != expected {
                warn!(expected, got, "timeblocks do not add up to the available time");
            }
        }
        Ok(result)
    }
}

impl TimetableParser for GeminiClient {
    fn parse_timetable(&self, image: &TimetableImage) -> Result<TimetableResult, ServiceError> {
        let parts = vec![
            Part {
                text: Some(TIMETABLE_PROMPT.to_string()),
                ..Part::default()
            },
            Part {
                inline_data: Some(InlineData {
                    mime_type: image.mime_type.clone(),
                    data: STANDARD.encode(&image.data),
                }),
                ..Part::default()
            },
        ];
        let text = self.generate(parts, false)?;
        decode_timetable(&text)
    }
}
