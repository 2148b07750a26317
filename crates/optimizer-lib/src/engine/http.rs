//! Network-hosted engines speaking the OpenAI-compatible chat completions API

use super::{parse_confidence, DecisionEngine, DecisionRequest, DecisionResponse, Tier};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a cloud cost optimization reviewer. Answer with a \
`Decision:` line naming one of rightsize-smaller, migrate-zone, stop, terminate, monitor or \
no-op, a `Confidence:` line between 0 and 1, a `Reasoning:` line, and optional \
`Alternative:` lines.";

/// Settings for one network-hosted engine
#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    pub tier: Tier,
    pub model: String,
    /// Base URL, e.g. `https://api.openai.com`
    pub endpoint: String,
    pub api_key: Option<String>,
    pub price_per_million_tokens: f64,
    /// Per-call timeout
    pub timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// Engine backed by a remote chat completions endpoint
pub struct HttpDecisionEngine {
    client: Client,
    config: HttpEngineConfig,
}

impl HttpDecisionEngine {
    pub fn new(config: HttpEngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Invalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn cost_for(&self, tokens: u64) -> f64 {
        tokens as f64 / 1_000_000.0 * self.config.price_per_million_tokens
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn complete(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        let start = Instant::now();
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .authorize(self.client.post(self.url("/v1/chat/completions")))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Invalid("completion carried no content".to_string()))?;
        let tokens = parsed
            .usage
            .map(|usage| usage.total_tokens)
            .unwrap_or_else(|| request.estimated_tokens());
        let confidence =
            parse_confidence(&content).unwrap_or_else(|| self.config.tier.default_confidence());

        debug!(
            model = %self.config.model,
            tier = %self.config.tier,
            tokens = tokens,
            "Decision engine responded"
        );

        Ok(DecisionResponse {
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
            tier: self.config.tier,
            tokens_used: tokens,
            cost: self.cost_for(tokens),
            latency_ms: start.elapsed().as_millis() as u64,
            confidence,
            reasoning: None,
            alternatives: Vec::new(),
            content,
        })
    }
}

/// Rate limits and server errors are worth retrying; other rejections are not
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("engine returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Error::Transient(message)
    } else {
        Error::Invalid(message)
    }
}

#[async_trait]
impl DecisionEngine for HttpDecisionEngine {
    async fn analyse(
        &self,
        request: &DecisionRequest,
        deadline: &Deadline,
    ) -> Result<DecisionResponse> {
        deadline
            .run(self.config.timeout, self.complete(request))
            .await
    }

    fn estimated_cost(&self, request: &DecisionRequest) -> f64 {
        self.cost_for(request.estimated_tokens())
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn tier(&self) -> Tier {
        self.config.tier
    }

    async fn health_check(&self, deadline: &Deadline) -> Result<()> {
        let listing = async {
            let response = self
                .authorize(self.client.get(self.url("/v1/models")))
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(status_error(status, ""))
            }
        };
        deadline.run(self.config.timeout, listing).await
    }
}
