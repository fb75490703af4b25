//! Generation provider implementations.
//!
//! Concrete implementations of the [`LlmProvider`] trait defined in
//! `parley-core`: Google Gemini (`generateContent`) and OpenRouter
//! (OpenAI-compatible chat completions).
//!
//! Also provides a provider factory ([`create_provider`]) and the shared
//! HTTP error classification both clients use, so transient failures
//! (timeouts, resets, 5xx, 429) are retried and permanent ones are not.
//!
//! [`LlmProvider`]: parley_core::llm::provider::LlmProvider

pub mod gemini;
pub mod openrouter;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::SecretString;
use serde::de::DeserializeOwned;

use parley_core::llm::box_provider::BoxLlmProvider;
use parley_types::config::ProviderSettings;
use parley_types::error::ConfigError;
use parley_types::llm::{LlmError, ProviderKind};

use self::gemini::GeminiProvider;
use self::openrouter::OpenRouterProvider;

pub use parley_core::llm::estimate_tokens;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Read the API key named by `settings.api_key_env` from the environment.
pub fn resolve_api_key(settings: &ProviderSettings) -> Result<SecretString, ConfigError> {
    match std::env::var(&settings.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(SecretString::from(key)),
        _ => Err(ConfigError::MissingEnv(settings.api_key_env.clone())),
    }
}

/// Create a [`BoxLlmProvider`] from provider settings and a resolved key.
pub fn create_provider(
    settings: &ProviderSettings,
    api_key: SecretString,
) -> Result<BoxLlmProvider, LlmError> {
    let provider = match settings.kind {
        ProviderKind::Gemini => BoxLlmProvider::new(GeminiProvider::new(settings, api_key)?),
        ProviderKind::OpenRouter => {
            BoxLlmProvider::new(OpenRouterProvider::new(settings, api_key)?)
        }
    };
    tracing::debug!(
        provider = %settings.name,
        kind = %settings.kind,
        model = %settings.model,
        "provider client created"
    );
    Ok(provider)
}

/// Build the shared HTTP client for a provider.
pub(crate) fn http_client(settings: &ProviderSettings) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.timeout.min(std::time::Duration::from_secs(10)))
        .build()
        .map_err(|e| LlmError::Provider {
            message: format!("failed to create HTTP client: {e}"),
        })
}

/// Map a non-success HTTP response to an [`LlmError`].
///
/// 429 -> RateLimited (with `Retry-After`), 503/529 -> Overloaded,
/// 408 -> Timeout, other 5xx -> Provider: all transient.
/// 400 -> InvalidRequest, 401/403 -> AuthenticationFailed,
/// 413 -> ContextLengthExceeded, other 4xx -> InvalidRequest: all permanent.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> LlmError {
    let body = truncate(body);
    match status.as_u16() {
        400 => LlmError::InvalidRequest(body),
        401 | 403 => LlmError::AuthenticationFailed,
        408 => LlmError::Timeout(format!("HTTP {status}")),
        413 => LlmError::ContextLengthExceeded(body),
        429 => LlmError::RateLimited {
            retry_after_ms: parse_retry_after(headers),
        },
        503 | 529 => LlmError::Overloaded(body),
        s if s >= 500 => LlmError::Provider {
            message: format!("HTTP {status}: {body}"),
        },
        _ => LlmError::InvalidRequest(format!("HTTP {status}: {body}")),
    }
}

/// Map a transport-level reqwest error to an [`LlmError`].
///
/// Response bodies are parsed with serde_json after being read in full,
/// so a reqwest body or decode error here always means the stream broke
/// off mid-read and is retryable.
pub(crate) fn map_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(err.to_string())
    } else if err.is_body() || err.is_decode() {
        LlmError::Provider {
            message: format!("failed to read response body: {err}"),
        }
    } else if err.is_connect() {
        LlmError::Provider {
            message: format!("connection failed: {err}"),
        }
    } else {
        LlmError::Provider {
            message: format!("HTTP request failed: {err}"),
        }
    }
}

/// Read a success body in full, then parse it.
///
/// A body that arrives complete but does not match `T` is a
/// [`LlmError::Deserialization`]; a body that is cut short is transient.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LlmError> {
    let body = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&body)
        .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0) as u64)
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one connection: read the request, write `response` verbatim,
    /// then hang up. Returns the `http://host:port` origin.
    pub(crate) async fn one_shot_server(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    /// Headers promise 500 bytes; the connection closes after a handful.
    pub(crate) const TRUNCATED_OK: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 500\r\n\r\n{\"candidates\":[";

    async fn fetch(response: &'static [u8]) -> reqwest::Response {
        let origin = one_shot_server(response).await;
        reqwest::Client::new()
            .post(format!("{origin}/generate"))
            .body("{}")
            .send()
            .await
            .unwrap()
    }

    fn classify(code: u16) -> LlmError {
        classify_status(StatusCode::from_u16(code).unwrap(), &HeaderMap::new(), "body")
    }

    fn settings(kind: ProviderKind) -> ProviderSettings {
        ProviderSettings {
            name: kind.to_string(),
            kind,
            model: "test-model".to_string(),
            base_url: None,
            api_key_env: "PARLEY_TEST_UNSET_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_transient_statuses() {
        for code in [408, 429, 500, 502, 503, 504, 529] {
            assert!(classify(code).is_transient(), "{code} should be transient");
        }
        assert!(matches!(classify(529), LlmError::Overloaded(_)));
        assert!(matches!(classify(502), LlmError::Provider { .. }));
    }

    #[test]
    fn test_permanent_statuses() {
        for code in [400, 401, 403, 404, 413, 422] {
            assert!(!classify(code).is_transient(), "{code} should be permanent");
        }
        assert!(matches!(classify(401), LlmError::AuthenticationFailed));
        assert!(matches!(classify(413), LlmError::ContextLengthExceeded(_)));
    }

    #[test]
    fn test_retry_after_header_is_honoured() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_ms: Some(3000)
            }
        ));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let LlmError::InvalidRequest(msg) = classify_status(StatusCode::BAD_REQUEST, &HeaderMap::new(), &body)
        else {
            panic!("expected InvalidRequest");
        };
        assert_eq!(msg.len(), MAX_ERROR_BODY + 3);
    }

    #[tokio::test]
    async fn test_body_cut_short_is_transient() {
        let response = fetch(TRUNCATED_OK).await;
        assert!(response.status().is_success());
        let err = read_json::<serde_json::Value>(response).await.unwrap_err();
        assert!(matches!(err, LlmError::Provider { .. }), "unexpected: {err}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_complete_malformed_body_is_permanent() {
        let response = fetch(
            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 8\r\n\r\nnot json",
        )
        .await;
        let err = read_json::<serde_json::Value>(response).await.unwrap_err();
        assert!(matches!(err, LlmError::Deserialization(_)), "unexpected: {err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let err = resolve_api_key(&settings(ProviderKind::Gemini)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(ref v) if v == "PARLEY_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_create_provider_uses_configured_name() {
        let provider = create_provider(
            &settings(ProviderKind::OpenRouter),
            SecretString::from("sk-test".to_string()),
        )
        .unwrap();
        assert_eq!(provider.name(), "openrouter");
    }
}
