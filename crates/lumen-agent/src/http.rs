//! HTTP implementation of `AgentClient` against a chat-completions style
//! endpoint with inline image support.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use tracing::debug;

use crate::{AgentClient, AgentContext, AgentError, AgentReply};

/// Agent service configuration.
#[derive(Clone)]
pub struct HttpAgentConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

impl std::fmt::Debug for HttpAgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgentConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl HttpAgentConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 1024,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// HTTP agent client.
pub struct HttpAgentClient {
    config: HttpAgentConfig,
    http: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(config: HttpAgentConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Build the request body: system prompt, bounded history, then the query
    /// with any photos inlined as base64 image parts.
    fn build_request_body(
        &self,
        query: &str,
        photos: &[Vec<u8>],
        context: &AgentContext,
    ) -> serde_json::Value {
        let mut messages = Vec::new();
        messages.push(serde_json::json!({
            "role": "system",
            "content": context.system_prompt(),
        }));

        for (role, content) in context.history_messages() {
            messages.push(serde_json::json!({ "role": role, "content": content }));
        }

        if photos.is_empty() {
            messages.push(serde_json::json!({ "role": "user", "content": query }));
        } else {
            let mut parts = vec![serde_json::json!({ "type": "text", "text": query })];
            for bytes in photos {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/jpeg;base64,{}", B64.encode(bytes)),
                    },
                }));
            }
            messages.push(serde_json::json!({ "role": "user", "content": parts }));
        }

        serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        })
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<AgentReply, AgentError> {
        let response = json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AgentError::ParseError("no content in response".to_string()))?;

        Ok(AgentReply {
            response: response.to_string(),
        })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn generate(
        &self,
        query: &str,
        photos: &[Vec<u8>],
        context: &AgentContext,
    ) -> Result<AgentReply, AgentError> {
        let body = self.build_request_body(query, photos, context);

        debug!(
            model = %self.config.model,
            photos = photos.len(),
            history = context.conversation_history.len(),
            "Agent request"
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else {
                    AgentError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AgentError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(AgentError::ApiError(format!("HTTP {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))?;

        self.parse_response(json)
    }
}
