//! GeminiProvider -- [`LlmProvider`] implementation for Google Gemini.
//!
//! Calls `models/{model}:generateContent` on the Generative Language API.
//! The API key is wrapped in [`SecretString`] and only exposed when
//! building the request header.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use parley_core::llm::provider::LlmProvider;
use parley_types::config::ProviderSettings;
use parley_types::llm::{Completion, GenerateOptions, LlmError, Message, MessageRole};

use super::{classify_status, estimate_tokens, http_client, map_reqwest_error, read_json};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    name: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiProvider {
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

    fn to_request(&self, messages: &[Message], options: &GenerateOptions) -> GeminiRequest {
        let contents = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| GeminiContent {
                role: Some(match m.role {
                    MessageRole::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                }),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        // System messages in the history are folded into the instruction.
        let mut system: Vec<&str> = options.system.iter().map(String::as_str).collect();
        system.extend(
            messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(|m| m.content.as_str()),
        );
        let system_instruction = (!system.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: system.join("\n\n"),
            }],
        });

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: options.temperature.unwrap_or(self.temperature),
                max_output_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            },
        }
    }
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = self.to_request(messages, options);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
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

        let parsed: GeminiResponse = read_json(response).await?;
        parsed.into_completion()
    }

    async fn health(&self) -> bool {
        let url = format!("{}/models/{}", self.base_url, self.model);
        match self
            .client
            .get(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
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
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    candidates_token_count: Option<u32>,
}

impl GeminiResponse {
    fn into_completion(self) -> Result<Completion, LlmError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::InvalidRequest(format!("prompt blocked: {reason}")));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider {
                message: "response contained no candidates".to_string(),
            })?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
            return Err(match reason.as_str() {
                "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => {
                    LlmError::InvalidRequest(format!("response blocked: {reason}"))
                }
                _ => LlmError::Provider {
                    message: format!("empty response (finish reason: {reason})"),
                },
            });
        }

        let token_count = self
            .usage_metadata
            .and_then(|u| u.candidates_token_count)
            .unwrap_or_else(|| estimate_tokens(&text));
        Ok(Completion { text, token_count })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_types::llm::ProviderKind;

    use super::*;

    fn provider(base_url: Option<&str>) -> GeminiProvider {
        let settings = ProviderSettings {
            name: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            model: "gemini-2.5-flash".to_string(),
            base_url: base_url.map(str::to_string),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.4,
            max_tokens: 512,
            timeout: Duration::from_secs(2),
        };
        GeminiProvider::new(&settings, SecretString::from("test-key".to_string())).unwrap()
    }

    #[test]
    fn test_request_maps_roles_and_system() {
        let p = provider(None);
        let messages = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you?"),
        ];
        let options = GenerateOptions {
            system: Some("You are terse.".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(p.to_request(&messages, &options)).unwrap();

        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "how are you?");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You are terse.");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_request_without_system_omits_instruction() {
        let p = provider(None);
        let json =
            serde_json::to_value(p.to_request(&[Message::user("x")], &GenerateOptions::default()))
                .unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_with_usage() {
        let body = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        }"#;
        let resp: GeminiResponse = serde_json::from_str(body).unwrap();
        let completion = resp.into_completion().unwrap();
        assert_eq!(completion.text, "Hello there");
        assert_eq!(completion.token_count, 2);
    }

    #[test]
    fn test_response_without_usage_estimates_tokens() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "one two three"}]}}]}"#;
        let resp: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.into_completion().unwrap().token_count, 4);
    }

    #[test]
    fn test_blocked_prompt_is_permanent() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let resp: GeminiResponse = serde_json::from_str(body).unwrap();
        let err = resp.into_completion().unwrap_err();
        assert!(!err.is_transient());

        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let resp: GeminiResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            resp.into_completion().unwrap_err(),
            LlmError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        // Port 1 on loopback refuses connections.
        let p = provider(Some("http://127.0.0.1:1/v1beta"));
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
        let base_url = format!("{origin}/v1beta");
        let p = provider(Some(base_url.as_str()));
        let err = p
            .generate(&[Message::user("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected: {err}");
    }
}
