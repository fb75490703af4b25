//! OpenRouterProvider -- [`LlmProvider`] over OpenRouter's OpenAI-compatible
//! chat completions endpoint.
//!
//! Serves the secondary backend: restricted content is routed here by
//! policy, and standard content falls back here when the primary fails.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use parley_core::llm::provider::LlmProvider;
use parley_types::config::ProviderSettings;
use parley_types::llm::{Completion, GenerateOptions, LlmError, Message, MessageRole};

use super::{classify_status, estimate_tokens, http_client, map_reqwest_error, read_json};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter provider.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: SecretString,
    name: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenRouterProvider {
    pub fn new(settings: &ProviderSettings, api_key: SecretString) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(settings)?,
            api_key,
            name: settings.name.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_request<'a>(&'a self, messages: &'a [Message], options: &'a GenerateOptions) -> ChatRequest<'a> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &options.system {
            wire.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        wire.extend(messages.iter().map(|m| ChatMessage {
            role: role_str(m.role),
            content: &m.content,
        }));

        ChatRequest {
            model: &self.model,
            messages: wire,
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
        }
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.to_request(messages, options);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .header("X-Title", "parley")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let error_body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &error_body));
        }

        let parsed: ChatResponse = read_json(response).await?;
        parsed.into_completion()
    }

    async fn health(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(provider = %self.name, error = %e, "health probe failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    /// OpenRouter reports some upstream failures inside a 200 body.
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
}

impl ChatResponse {
    fn into_completion(self) -> Result<Completion, LlmError> {
        if let Some(err) = self.error {
            let message = err.message.unwrap_or_else(|| "upstream error".to_string());
            return Err(match err.code {
                Some(code) if (400..500).contains(&code) && code != 408 && code != 429 => {
                    LlmError::InvalidRequest(message)
                }
                _ => LlmError::Provider { message },
            });
        }

        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LlmError::Provider {
                message: "response contained no message content".to_string(),
            })?;

        let token_count = self
            .usage
            .and_then(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&text));
        Ok(Completion { text, token_count })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_types::llm::ProviderKind;

    use super::*;

    fn provider(base_url: Option<&str>) -> OpenRouterProvider {
        let settings = ProviderSettings {
            name: "openrouter".to_string(),
            kind: ProviderKind::OpenRouter,
            model: "meta-llama/llama-3.1-70b-instruct".to_string(),
            base_url: base_url.map(str::to_string),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            temperature: 0.9,
            max_tokens: 1024,
            timeout: Duration::from_secs(2),
        };
        OpenRouterProvider::new(&settings, SecretString::from("sk-or-test".to_string())).unwrap()
    }

    #[test]
    fn test_request_prepends_system_prompt() {
        let p = provider(None);
        let options = GenerateOptions {
            system: Some("Stay in character.".to_string()),
            temperature: Some(0.2),
            max_tokens: None,
        };
        let messages = [Message::user("hi"), Message::assistant("hey")];
        let json = serde_json::to_value(p.to_request(&messages, &options)).unwrap();

        let wire = json["messages"].as_array().unwrap();
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["role"], "assistant");
        assert_eq!(json["model"], "meta-llama/llama-3.1-70b-instruct");
        assert_eq!(json["max_tokens"], 1024);
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "id": "gen-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Sure thing"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        }"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        let completion = resp.into_completion().unwrap();
        assert_eq!(completion.text, "Sure thing");
        assert_eq!(completion.token_count, 3);
    }

    #[test]
    fn test_response_without_usage_estimates_tokens() {
        let body = r#"{"choices": [{"message": {"content": "a b c d e f g h i j"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.into_completion().unwrap().token_count, 13);
    }

    #[test]
    fn test_error_in_success_body() {
        let body = r#"{"error": {"code": 502, "message": "upstream down"}}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(resp.into_completion().unwrap_err().is_transient());

        let body = r#"{"error": {"code": 400, "message": "bad model"}}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(!resp.into_completion().unwrap_err().is_transient());
    }

    #[test]
    fn test_empty_choices_is_transient() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(resp.into_completion().unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let p = provider(Some("http://127.0.0.1:1/api/v1"));
        let err = p
            .generate(&[Message::user("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected: {err}");
        assert!(!p.health().await);
    }

    #[tokio::test]
    async fn test_truncated_success_body_is_transient() {
        use crate::llm::tests::{TRUNCATED_OK, one_shot_server};

        let origin = one_shot_server(TRUNCATED_OK).await;
        let base_url = format!("{origin}/api/v1");
        let p = provider(Some(base_url.as_str()));
        let err = p
            .generate(&[Message::user("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected: {err}");
    }
}
