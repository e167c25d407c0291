use async_trait::async_trait;
use serde::Deserialize;

use super::{build_http_client, status_error, transport_error, with_retry, RetryPolicy};
use crate::error::ClientError;

/// One chat-completion request: fixed (system, user) message pair plus the
/// sampling controls the generator is allowed to vary.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Seam for the LLM provider so tests and the generator can substitute a
/// scripted fake.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ClientError>;
    fn model_name(&self) -> &str;
}

/// HTTP client for an OpenAI-compatible chat-completion endpoint.
pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            http: build_http_client(),
            // LLM calls cost money; retry transient failures only once.
            policy: RetryPolicy {
                retries: 1,
                ..RetryPolicy::default()
            },
        }
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        with_retry("llm completion", self.policy, || async {
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(e, "llm provider"))?;
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "llm provider"));
            }
            let completion: CompletionResponse = resp
                .json()
                .await
                .map_err(|e| ClientError::Parse(format!("llm completion: {e}")))?;
            let content = completion
                .choices
                .first()
                .map(|c| c.message.content.clone())
                .ok_or_else(|| ClientError::Parse("llm completion had no choices".to_string()))?;
            Ok(ChatResponse {
                content,
                input_tokens: completion.usage.prompt_tokens,
                output_tokens: completion.usage.completion_tokens,
            })
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted fake for tests elsewhere in the crate: pops one canned reply per
/// call and records every prompt it saw.
#[cfg(test)]
pub struct ScriptedChatModel {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<String, ClientError>>>,
    pub seen: std::sync::Mutex<Vec<ChatRequest>>,
    pub delay: std::time::Duration,
}

#[cfg(test)]
impl ScriptedChatModel {
    pub fn new(replies: Vec<Result<String, ClientError>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
            seen: std::sync::Mutex::new(Vec::new()),
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[cfg(test)]
#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ClientError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(ChatResponse {
                content,
                input_tokens: 100,
                output_tokens: 50,
            }),
            Some(Err(e)) => Err(e),
            None => Err(ClientError::InvariantViolated(
                "scripted model ran out of replies".to_string(),
            )),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_system_and_user_messages_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "messages": [
                    {"role": "system", "content": "You are terse."},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "key", "test-model");
        let resp = client
            .complete(ChatRequest {
                system: "You are terse.".to_string(),
                user: "hi".to_string(),
                temperature: 0.7,
                max_tokens: 300,
            })
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.input_tokens, 12);
        assert_eq!(resp.output_tokens, 3);
    }

    #[tokio::test]
    async fn empty_choice_list_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "choices": [], "usage": {} })),
            )
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "key", "test-model");
        let err = client
            .complete(ChatRequest {
                system: String::new(),
                user: "hi".to_string(),
                temperature: 0.7,
                max_tokens: 300,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }
}
