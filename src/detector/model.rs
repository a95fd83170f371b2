//! Model-assisted semantic detection
//!
//! The optional slow pass: content that looks like it contains factual claims
//! is sent to an external LLM with a structured-JSON-only prompt asking it to
//! flag hallucinations and contradictions. Every failure mode here (backend
//! error, timeout, unparseable reply) degrades to zero issues so the
//! ingestion path can never be stalled or crashed by this pass.

use crate::config::{ModelBackendKind, ModelConfig};
use crate::error::DetectionError;
use crate::events::{DetectedIssue, DetectionThresholds, IssueSeverity, IssueType};
use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Content shorter than this carries too little signal to be worth a call
const MIN_CONTENT_LEN: usize = 100;
/// Content longer than this is too expensive to review per entry
const MAX_CONTENT_LEN: usize = 5000;

/// Trait for LLM backend implementations
pub trait LlmBackend: Send + Sync {
    /// Send a prompt and return the raw completion text
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, DetectionError>> + Send + 'a>>;
}

/// Backend for any OpenAI-compatible chat-completions endpoint
///
/// Covers both hosted APIs and local inference servers that speak the same
/// protocol.
pub struct ChatCompletionsBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

/// Request format for the chat-completions API
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

/// Message format for the chat-completions API
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response format specification forcing JSON output
#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

/// Response format from the chat-completions API
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl ChatCompletionsBackend {
    /// Create a new chat-completions backend
    ///
    /// # Arguments
    /// * `endpoint` - API base URL (e.g., "https://api.openai.com/v1")
    /// * `model` - Model name to use
    /// * `api_key` - Bearer token, omitted for unauthenticated local servers
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint,
            model,
            api_key,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn system_prompt() -> String {
        "You are a quality reviewer for AI application output. You respond with JSON only."
            .to_string()
    }
}

impl LlmBackend for ChatCompletionsBackend {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, DetectionError>> + Send + 'a>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: vec![
                    ChatMessage {
                        role: "system".to_string(),
                        content: Self::system_prompt(),
                    },
                    ChatMessage {
                        role: "user".to_string(),
                        content: prompt.to_string(),
                    },
                ],
                // Low temperature for consistent review verdicts
                temperature: 0.1,
                max_tokens: 800,
                response_format: ResponseFormat {
                    format_type: "json_object".to_string(),
                },
            };

            let mut builder = self.client.post(self.api_url()).json(&request);
            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", format!("Bearer {}", key));
            }

            let response = builder.send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(DetectionError::BackendError(format!(
                    "Model API returned error {}: {}",
                    status, error_text
                )));
            }

            let chat_response: ChatResponse = response.json().await.map_err(|e| {
                DetectionError::InvalidResponse(format!("Failed to parse API response: {}", e))
            })?;

            chat_response
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content)
                .ok_or_else(|| {
                    DetectionError::InvalidResponse("Response contained no choices".to_string())
                })
        })
    }
}

/// Canned backend for tests and dry runs
pub struct MockBackend {
    reply: Result<String, String>,
}

impl MockBackend {
    /// A backend that always returns the given reply text
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
        }
    }

    /// A backend that reports no issues for any content
    pub fn empty() -> Self {
        Self::with_reply(r#"{"issues": []}"#)
    }

    /// A backend that always fails
    pub fn failing() -> Self {
        Self {
            reply: Err("mock backend failure".to_string()),
        }
    }
}

impl LlmBackend for MockBackend {
    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, DetectionError>> + Send + 'a>> {
        Box::pin(async move {
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(DetectionError::BackendError(message.clone())),
            }
        })
    }
}

/// One finding reported by the model
#[derive(Debug, Deserialize)]
struct ModelFinding {
    kind: String,
    #[serde(default)]
    severity: Option<String>,
    description: String,
    confidence: f64,
}

/// Expected JSON structure of the model reply
#[derive(Debug, Deserialize)]
struct ModelReview {
    issues: Vec<ModelFinding>,
}

/// The model-assisted detection pass
///
/// Holds the backend (if any), the per-call timeout, and the compiled gate
/// predicate that bounds how often the model is consulted.
pub struct ModelAssistedDetector {
    backend: Option<Arc<dyn LlmBackend>>,
    timeout: Duration,
    factual_indicator: Regex,
}

impl ModelAssistedDetector {
    /// Build from service configuration
    pub fn from_config(config: &ModelConfig) -> Self {
        let backend: Option<Arc<dyn LlmBackend>> = match config.backend {
            ModelBackendKind::Disabled => None,
            ModelBackendKind::Mock => Some(Arc::new(MockBackend::empty())),
            ModelBackendKind::Chat => Some(Arc::new(ChatCompletionsBackend::new(
                config.endpoint.clone(),
                config.model.clone(),
                config.api_key.clone(),
            ))),
        };
        Self::new(backend, Duration::from_secs(config.timeout_seconds))
    }

    /// Build with an explicit backend, primarily for tests
    pub fn new(backend: Option<Arc<dyn LlmBackend>>, timeout: Duration) -> Self {
        let factual_indicator = RegexBuilder::new(
            r"\b(19|20)\d{2}\b|[$€£]\s?\d|\d+(\.\d+)?\s?%|studies show|research (shows|indicates)|according to|statistics",
        )
        .case_insensitive(true)
        .build()
        .expect("invalid factual-indicator pattern");
        Self {
            backend,
            timeout,
            factual_indicator,
        }
    }

    /// A detector that never consults a model
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(15))
    }

    /// Cheap predicate bounding model usage
    ///
    /// True only for content of reviewable size that contains at least one
    /// factual-claim indicator (a year, a currency amount, a percentage, or a
    /// citation phrase).
    pub fn should_run(&self, content: &str) -> bool {
        let len = content.len();
        (MIN_CONTENT_LEN..=MAX_CONTENT_LEN).contains(&len)
            && self.factual_indicator.is_match(content)
    }

    /// Run the pass; failures degrade to zero issues
    pub async fn detect(
        &self,
        content: &str,
        thresholds: &DetectionThresholds,
    ) -> Vec<DetectedIssue> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        if !self.should_run(content) {
            return Vec::new();
        }

        let prompt = Self::build_prompt(content);
        let reply = match tokio::time::timeout(self.timeout, backend.complete(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("model-assisted detection failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    "model-assisted detection timed out after {:?}",
                    self.timeout
                );
                return Vec::new();
            }
        };

        match Self::parse_review(&reply, thresholds) {
            Ok(issues) => issues,
            Err(e) => {
                warn!("could not parse model review: {}", e);
                Vec::new()
            }
        }
    }

    /// Structured-JSON-only review prompt
    fn build_prompt(content: &str) -> String {
        format!(
            r#"Review the following AI application output for hallucinations, internal contradictions, and unsupported factual claims.

Output to review:
---
{}
---

Respond with JSON only, in this exact shape:
{{
  "issues": [
    {{
      "kind": "hallucination" | "contradiction" | "unsupported_claim",
      "severity": "low" | "medium" | "high" | "critical",
      "description": "what is wrong, in one sentence",
      "confidence": 0.0
    }}
  ]
}}

Report an empty issues array if the output looks sound."#,
            content
        )
    }

    /// Extract JSON from the reply and convert findings to issues
    ///
    /// Findings below the configured confidence floor are discarded here so a
    /// chatty model cannot flood the pipeline with weak guesses.
    fn parse_review(
        reply: &str,
        thresholds: &DetectionThresholds,
    ) -> Result<Vec<DetectedIssue>, DetectionError> {
        let json_text = extract_json(reply);
        let review: ModelReview = serde_json::from_str(&json_text).map_err(|e| {
            DetectionError::InvalidResponse(format!(
                "Failed to parse model JSON: {}. Reply was: {}",
                e, json_text
            ))
        })?;

        let mut issues = Vec::new();
        for finding in review.issues {
            if finding.confidence < thresholds.hallucination_confidence {
                debug!(
                    "dropping model finding below confidence floor: {}",
                    finding.description
                );
                continue;
            }
            let issue_type = match finding.kind.as_str() {
                "hallucination" | "contradiction" => IssueType::Hallucination,
                _ => IssueType::AccuracyIssue,
            };
            let severity = match finding.severity.as_deref() {
                Some("critical") => IssueSeverity::Critical,
                Some("high") => IssueSeverity::High,
                Some("low") => IssueSeverity::Low,
                _ => IssueSeverity::Medium,
            };
            issues.push(DetectedIssue::new(
                issue_type,
                severity,
                finding.description,
                finding.confidence,
            ));
        }
        Ok(issues)
    }
}

/// Extract the JSON portion of a model reply
///
/// Models sometimes wrap JSON in markdown code blocks or add surrounding
/// prose; this peels those layers off before parsing.
fn extract_json(reply: &str) -> String {
    let text = reply.trim();

    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        if let Some(end) = after.find("```") {
            let candidate = after[..end].trim();
            if candidate.starts_with('{') && candidate.ends_with('}') {
                return candidate.to_string();
            }
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if start < end {
                return text[start..=end].to_string();
            }
        }
    }

    text.to_string()
}
