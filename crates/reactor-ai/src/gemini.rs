//! Gemini `generateContent` client.
//!
//! Two ways in: Vertex AI (project + region, OAuth bearer token) or the
//! Generative Language API (API key). Both accept the same request body and
//! return the same response shape.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reactor_auth::TokenSource;
use reactor_core::{GenerateError, ReactorConfig, TextGenerator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const X_GOOG_API_KEY: &str = "x-goog-api-key";
const GENERATIVE_LANGUAGE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

enum Auth {
    Bearer(Arc<dyn TokenSource>),
    ApiKey(String),
}

/// Gemini client bound to one model.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    /// Path of the model resource below `base_url`, without the `:generateContent` verb.
    model_path: String,
    auth: Auth,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.auth {
            Auth::Bearer(_) => "bearer",
            Auth::ApiKey(_) => "api-key [REDACTED]",
        };
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model_path", &self.model_path)
            .field("auth", &auth)
            .finish()
    }
}

// ── Wire types ──

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    /// Thinking models return their reasoning as separate, flagged parts.
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiClient {
    /// Vertex AI in `config.region`, authenticated with OAuth tokens.
    pub fn vertex(config: &ReactorConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://{}-aiplatform.googleapis.com/v1", config.region),
            model_path: format!(
                "projects/{}/locations/{}/publishers/google/models/{}",
                config.project_id, config.region, config.model
            ),
            auth: Auth::Bearer(tokens),
        }
    }

    /// Generative Language API, authenticated with an API key.
    pub fn api_key(model: &str, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GENERATIVE_LANGUAGE_BASE_URL.to_string(),
            model_path: format!("models/{model}"),
            auth: Auth::ApiKey(api_key),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound each generation call; by default a call may wait indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, GenerateError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerateError::Transport(Box::new(e)))?;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model_path)
    }

    async fn authorize(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, GenerateError> {
        match &self.auth {
            Auth::Bearer(tokens) => {
                let token = tokens
                    .token()
                    .await
                    .map_err(|e| GenerateError::Auth(Box::new(e)))?;
                Ok(req.bearer_auth(token))
            }
            Auth::ApiKey(key) => Ok(req.header(X_GOOG_API_KEY, key)),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
        };

        let url = self.endpoint();
        debug!(url = %url, "sending generateContent");
        let req = self.authorize(self.client.post(&url).json(&body)).await?;
        let resp = req
            .send()
            .await
            .map_err(|e| GenerateError::Transport(Box::new(e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerateError::Transport(Box::new(e)))?;
        if !status.is_success() {
            return Err(GenerateError::Server {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| GenerateError::Decode(e.to_string()))?;
        let answer = response_text(parsed)?;
        info!(chars = answer.len(), "model answered");
        Ok(answer)
    }
}

/// Concatenated text of the first candidate, excluding thought parts.
fn response_text(resp: GenerateResponse) -> Result<String, GenerateError> {
    if let Some(feedback) = resp.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            let detail = match feedback.block_reason_message {
                Some(message) => format!("{reason}: {message}"),
                None => reason,
            };
            return Err(GenerateError::Blocked(detail));
        }
    }

    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerateError::Empty("no candidates".into()))?;

    let texts: Vec<String> = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.thought)
        .filter_map(|p| p.text)
        .collect();

    if texts.is_empty() {
        return Err(GenerateError::Empty(
            candidate
                .finish_reason
                .unwrap_or_else(|| "unspecified".into()),
        ));
    }
    Ok(texts.concat())
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if parsed.error.status.is_empty() => parsed.error.message,
        Ok(parsed) => format!("{}: {}", parsed.error.status, parsed.error.message),
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}
