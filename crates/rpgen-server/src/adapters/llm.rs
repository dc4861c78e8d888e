//! OpenAI-compatible chat provider as a [`Synthesizer`] and a [`TestAuthor`].
//!
//! Supports `openrouter` (default base URL) and `openai_compatible`
//! (explicit base URL). Network errors, 429 and 5xx responses are retried
//! here with linear backoff; if the provider is still unavailable after
//! `max_attempts`, the controller sees a [`SynthesisError::Transient`].

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::collab::{
    Candidate, NodeBrief, RepairContext, SynthesisError, Synthesizer, TestAuthor,
};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_SYSTEM_PROMPT: &str = "You generate one source file at a time for a planned \
code base. Reply with the complete file content in a single fenced code block and nothing else.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Provider calls per synthesis, including the first.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: Some("openrouter".to_string()),
            api_base_url: None,
            api_key: None,
            model: None,
            system_prompt: None,
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl LlmConfig {
    /// Reads `RPGEN_LLM_PROVIDER`, `RPGEN_LLM_BASE_URL`, `RPGEN_LLM_API_KEY`
    /// and `RPGEN_LLM_MODEL`.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let defaults = LlmConfig::default();
        LlmConfig {
            provider: var("RPGEN_LLM_PROVIDER").or(defaults.provider),
            api_base_url: var("RPGEN_LLM_BASE_URL"),
            api_key: var("RPGEN_LLM_API_KEY"),
            model: var("RPGEN_LLM_MODEL"),
            ..defaults
        }
    }

    fn base_url(&self) -> Result<String, String> {
        match self.provider.as_deref().unwrap_or_default() {
            "openrouter" => Ok(self
                .api_base_url
                .clone()
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string())),
            "openai_compatible" => self
                .api_base_url
                .clone()
                .ok_or_else(|| "openai_compatible provider requires api_base_url".to_string()),
            other => Err(format!(
                "unsupported provider '{other}': use openrouter or openai_compatible"
            )),
        }
    }
}

enum ChatError {
    Retryable(String),
    Fatal(String),
}

pub struct LlmSynthesizer {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmSynthesizer {
    pub fn new(config: LlmConfig) -> Self {
        LlmSynthesizer {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, prompt: &str) -> Result<String, ChatError> {
        let base_url = self.config.base_url().map_err(ChatError::Fatal)?;
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let body = json!({
            "model": self.config.model.clone().unwrap_or_default(),
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": prompt },
            ],
        });

        let mut req = self
            .client
            .post(endpoint)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.clone().unwrap_or_default()),
            )
            .json(&body);
        if self.config.provider.as_deref() == Some("openrouter") {
            req = req.header("X-Title", "rpgen");
        }

        let response = req
            .send()
            .await
            .map_err(|err| ChatError::Retryable(format!("provider request failed: {err}")))?;
        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|err| ChatError::Retryable(format!("provider response read failed: {err}")))?;

        if !status.is_success() {
            let message = format!("provider request failed ({status}): {body_text}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                ChatError::Retryable(message)
            } else {
                ChatError::Fatal(message)
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body_text).map_err(|err| {
            ChatError::Retryable(format!("provider response parse failed: {err}"))
        })?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// One chat completion with provider retries, reduced to its code block.
    async fn complete(&self, node: &NodeBrief, prompt: &str) -> Result<String, SynthesisError> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.chat(prompt).await {
                Ok(reply) => {
                    debug!(node = %node.id, attempt, chars = reply.len(), "provider replied");
                    return extract_code(&reply);
                }
                Err(ChatError::Fatal(message)) => return Err(SynthesisError::Transient(message)),
                Err(ChatError::Retryable(message)) if attempt == attempts => {
                    return Err(SynthesisError::Transient(message))
                }
                Err(ChatError::Retryable(message)) => {
                    warn!(node = %node.id, attempt, error = %message, "provider call failed, retrying");
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
        Err(SynthesisError::Transient("no provider attempts made".into()))
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        node: &NodeBrief,
        repair: Option<&RepairContext>,
    ) -> Result<Candidate, SynthesisError> {
        self.complete(node, &build_prompt(node, repair))
            .await
            .map(Candidate::new)
    }
}

#[async_trait]
impl TestAuthor for LlmSynthesizer {
    async fn write_test(&self, node: &NodeBrief) -> Result<String, SynthesisError> {
        self.complete(node, &build_test_prompt(node)).await
    }
}

/// Renders the user message for one node.
pub fn build_prompt(node: &NodeBrief, repair: Option<&RepairContext>) -> String {
    let meta = &node.metadata;
    let mut prompt = format!("Generate the {} `{}` (id {}).\n", node.kind, node.name, node.id);
    if let Some(path) = &meta.path_hint {
        let _ = writeln!(prompt, "Target file: {path}");
    }
    if let Some(signature) = &meta.signature {
        let _ = writeln!(prompt, "Signature: {signature}");
    }
    if let Some(doc) = &meta.doc {
        let _ = writeln!(prompt, "Purpose: {doc}");
    }

    let Some(repair) = repair else {
        return prompt;
    };
    let _ = writeln!(prompt, "\nThis is attempt {}. Earlier attempts failed.", repair.attempt);
    if let Some(failure) = repair.last_failure() {
        let _ = writeln!(prompt, "\nLatest failure output:\n```\n{failure}\n```");
    }
    if let Some(previous) = &repair.previous_candidate {
        let _ = writeln!(prompt, "\nPrevious candidate:\n```\n{previous}\n```");
    }
    if !repair.dependencies.is_empty() {
        let _ = writeln!(prompt, "\nDependencies:");
        for dep in &repair.dependencies {
            let _ = writeln!(prompt, "- {}", dep.summary);
            if let Some(excerpt) = &dep.excerpt {
                let _ = writeln!(prompt, "```\n{excerpt}\n```");
            }
        }
    }
    if !repair.related.is_empty() {
        let _ = writeln!(prompt, "\nRelated:");
        for entry in &repair.related {
            let _ = writeln!(prompt, "- {}", entry.summary);
        }
    }
    prompt
}

/// Renders the request for a unit test of one node. The test is written
/// from the node's interface only, never from a candidate.
pub fn build_test_prompt(node: &NodeBrief) -> String {
    let meta = &node.metadata;
    let mut prompt = format!(
        "Write unit tests for the {} `{}` (id {}).\n",
        node.kind, node.name, node.id
    );
    if let Some(path) = &meta.path_hint {
        let _ = writeln!(prompt, "The code under test lives in: {path}");
    }
    if let Some(signature) = &meta.signature {
        let _ = writeln!(prompt, "Signature: {signature}");
    }
    if let Some(doc) = &meta.doc {
        let _ = writeln!(prompt, "Purpose: {doc}");
    }
    prompt.push_str(
        "\nCover normal inputs and edge cases. Import the unit from its module \
         instead of redefining it. Reply with the complete test file only.\n",
    );
    prompt
}

/// Takes the body of the first fenced code block, or the whole reply if it
/// has none.
pub fn extract_code(reply: &str) -> Result<String, SynthesisError> {
    let body = match reply.find("```") {
        Some(open) => {
            let after_fence = &reply[open + 3..];
            let start = after_fence.find('\n').map_or(after_fence.len(), |i| i + 1);
            let rest = &after_fence[start..];
            match rest.find("```") {
                Some(close) => &rest[..close],
                None => return Err(SynthesisError::Malformed("unterminated code block".into())),
            }
        }
        None => reply,
    };
    let body = body.trim_matches('\n');
    if body.trim().is_empty() {
        return Err(SynthesisError::Malformed("empty candidate".into()));
    }
    Ok(format!("{body}\n"))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
