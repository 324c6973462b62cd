use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::annotator::AnnotateError;
use crate::error::Result;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One structured-output request to a text generation service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// JSON schema the response text must follow.
    pub schema: serde_json::Value,
}

/// A text generation backend. Implementations classify their own failures:
/// anything worth another attempt is `Transient`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, AnnotateError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, AnnotateError> {
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &request.schema,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnnotateError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let envelope: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AnnotateError::Transient(format!("reading response failed: {}", e)))?;

        extract_text(envelope)
    }
}

fn classify_status(status: StatusCode, body: &str) -> AnnotateError {
    let message = format!("API error {}: {}", status, body.trim());
    AnnotateError::Transient(message)
}

fn extract_text(envelope: GenerateContentResponse) -> std::result::Result<String, AnnotateError> {
    let text: String = envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AnnotateError::Permanent("response carried no text".into()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_camel_case_fields() {
        let schema = serde_json::json!({"type": "OBJECT"});
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: "system" }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: "hello" }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &schema,
            },
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "system");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(value["generationConfig"]["responseSchema"]["type"], "OBJECT");
    }

    #[test]
    fn response_parts_are_concatenated() {
        let envelope: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(envelope).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn empty_response_is_permanent() {
        let envelope: GenerateContentResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(extract_text(envelope), Err(AnnotateError::Permanent(_))));
    }

    #[test]
    fn error_status_is_retryable() {
        let err = classify_status(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        assert!(matches!(err, AnnotateError::Transient(m) if m.contains("503")));
    }

    #[test]
    fn endpoint_includes_model() {
        let client = GeminiClient::new("key".into(), "gemini-2.5-flash-lite".into(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
        assert_eq!(client.model(), "gemini-2.5-flash-lite");
    }
}
