use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;

use super::gemini::{GenerationRequest, TextGenerator};
use super::preprocess::Preprocessor;
use crate::error::Result;
use crate::models::{Annotation, Category};

const SYSTEM_PROMPT: &str = r#"You analyze software engineering blog posts written in Korean or English.
Return JSON with:
- keywords: 3 to 5 specific technical terms (technologies, tools, techniques) as they appear in the text.
- category: exactly one of the allowed categories.
- summary: one sentence in Korean describing what the post is about.
Do not invent technologies that the text does not mention."#;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnotateError {
    /// Transport failures and error statuses; worth another attempt.
    #[error("transient annotator failure: {0}")]
    Transient(String),

    #[error("permanent annotator failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    #[serde(default)]
    keywords: Vec<String>,
    category: String,
    #[serde(default)]
    summary: String,
}

pub struct KeywordAnnotator {
    generator: Arc<dyn TextGenerator>,
    preprocessor: Preprocessor,
    max_attempts: u32,
    delays: Vec<Duration>,
}

impl KeywordAnnotator {
    pub fn new(generator: Arc<dyn TextGenerator>, max_attempts: u32, delays: Vec<Duration>) -> Result<Self> {
        Ok(Self {
            generator,
            preprocessor: Preprocessor::new()?,
            max_attempts: max_attempts.max(1),
            delays,
        })
    }

    /// Delay before the attempt following `attempt` (1-based). The last
    /// configured delay repeats when attempts outnumber delays.
    fn delay_after(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).saturating_sub(1);
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    fn request_for(&self, text: &str) -> GenerationRequest {
        let categories = Category::names().join(", ");
        GenerationRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: format!("Allowed categories: {}\n\nPost:\n{}", categories, text),
            schema: response_schema(),
        }
    }

    pub async fn annotate(&self, post_id: &str, raw_content: &str) -> std::result::Result<Annotation, AnnotateError> {
        let text = self.preprocessor.prepare(raw_content);
        if text.is_empty() {
            return Err(AnnotateError::Permanent("no text left after preprocessing".into()));
        }
        let request = self.request_for(&text);

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(post_id, attempt, chars = text.chars().count(), "calling annotator");

            match self.generator.generate(&request).await {
                Ok(body) => return parse_annotation(post_id, &body),
                Err(AnnotateError::Transient(reason)) if attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(post_id, attempt, ?delay, %reason, "annotator call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(AnnotateError::Transient(reason)) => {
                    return Err(AnnotateError::Transient(format!(
                        "gave up after {} attempts: {}",
                        attempt, reason
                    )));
                }
                Err(permanent) => return Err(permanent),
            }
        }
    }

    /// Annotate `(post_id, raw_content)` pairs with at most `width` calls in
    /// flight. Results come back in completion order.
    pub async fn annotate_all(
        &self,
        items: Vec<(String, String)>,
        width: usize,
    ) -> Vec<(String, std::result::Result<Annotation, AnnotateError>)> {
        stream::iter(items)
            .map(|(post_id, raw_content)| async move {
                let result = self.annotate(&post_id, &raw_content).await;
                match &result {
                    Ok(annotation) => tracing::info!(
                        post_id = %post_id,
                        category = %annotation.category,
                        keywords = annotation.keywords.len(),
                        "annotated post"
                    ),
                    Err(e) => tracing::warn!(post_id = %post_id, error = %e, "annotation failed"),
                }
                (post_id, result)
            })
            .buffer_unordered(width.max(1))
            .collect()
            .await
    }
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "keywords": {"type": "ARRAY", "items": {"type": "STRING"}},
            "category": {"type": "STRING", "enum": Category::names()},
            "summary": {"type": "STRING"}
        },
        "required": ["keywords", "category", "summary"]
    })
}

/// Parse the service's JSON answer. Anything that does not fit the expected
/// shape is permanent; asking again would produce the same text.
pub fn parse_annotation(post_id: &str, body: &str) -> std::result::Result<Annotation, AnnotateError> {
    let json = strip_code_fence(body);
    let raw: RawAnnotation = serde_json::from_str(json)
        .map_err(|e| AnnotateError::Permanent(format!("malformed response: {}", e)))?;

    let category: Category = raw
        .category
        .parse()
        .map_err(AnnotateError::Permanent)?;

    let keywords = raw
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    Ok(Annotation {
        post_id: post_id.to_string(),
        keywords,
        category,
        summary: raw.summary.trim().to_string(),
    })
}

fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
