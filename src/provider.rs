//! The vision-model capability consumed by the pipeline.
//!
//! The pipeline never talks HTTP itself. It holds an `Arc<dyn Provider>`
//! and only relies on the call returning text or an error. Retries, auth
//! and transport details belong to the implementation.

use std::sync::Arc;

use base64::Engine;
use futures::future::BoxFuture;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::anthropic::AnthropicProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

/// One image handed to a provider.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    /// Standard base64 encoding of the image bytes.
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:` URL form used by OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Per-call options. `model: None` means the provider's default model.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub model: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Option<Usage>,
    pub model: Option<String>,
}

/// A hosted or local vision model.
///
/// Futures are boxed so providers can be swapped at runtime behind
/// `Arc<dyn Provider>` (primary vs. size fallback).
pub trait Provider: Send + Sync {
    /// Stable provider name. Part of the cache key.
    fn name(&self) -> &str;

    /// Model used when the caller does not pick one.
    fn default_model(&self) -> &str;

    /// Largest image payload the provider accepts, in bytes.
    fn max_image_bytes(&self) -> u64;

    /// Describe a single image.
    fn analyze<'a>(
        &'a self,
        image: &'a ImageInput,
        options: &'a AnalyzeOptions,
    ) -> BoxFuture<'a, Result<ProviderResponse, ProviderError>>;

    /// Describe several images in one request.
    fn compare<'a>(
        &'a self,
        images: &'a [ImageInput],
        options: &'a AnalyzeOptions,
    ) -> BoxFuture<'a, Result<ProviderResponse, ProviderError>>;
}

/// Errors raised by provider implementations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing credential for {provider}: set {variable}")]
    MissingCredential { provider: String, variable: String },

    #[error("Cannot connect to {provider} at {endpoint}: {message}")]
    Connection {
        provider: String,
        endpoint: String,
        message: String,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("Unknown provider '{0}' (expected anthropic, openai or ollama)")]
    UnknownProvider(String),
}

/// Build a provider by name, reading credentials from the environment.
pub fn provider_from_name(name: &str, client: Client) -> Result<Arc<dyn Provider>, ProviderError> {
    match name.trim().to_lowercase().as_str() {
        "anthropic" | "claude" => Ok(Arc::new(AnthropicProvider::from_env(client)?)),
        "openai" | "gpt" => Ok(Arc::new(OpenAiProvider::from_env(client)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::from_env(client))),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

/// Read a non-empty environment variable.
pub(crate) fn env_credential(provider: &str, variable: &str) -> Result<String, ProviderError> {
    match std::env::var(variable) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ProviderError::MissingCredential {
            provider: provider.to_string(),
            variable: variable.to_string(),
        }),
    }
}

/// Turn a non-success HTTP response into [`ProviderError::Http`], or
/// decode the JSON body.
pub(crate) async fn read_json(
    provider: &str,
    resp: Response,
) -> Result<serde_json::Value, ProviderError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status,
            body,
        });
    }

    resp.json()
        .await
        .map_err(|e| ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: e.to_string(),
        })
}

/// Reject blank model output.
pub(crate) fn non_empty(provider: &str, text: String) -> Result<String, ProviderError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse(provider.to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_includes_mime_and_payload() {
        let image = ImageInput::new(vec![1, 2, 3], "image/png", "a.png");
        assert_eq!(image.data_url(), "data:image/png;base64,AQID");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = provider_from_name("nope", Client::new());
        assert!(matches!(result, Err(ProviderError::UnknownProvider(_))));
    }

    #[test]
    fn ollama_needs_no_credential() {
        let provider = provider_from_name("ollama", Client::new()).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn non_empty_trims_and_rejects_blank() {
        assert_eq!(non_empty("x", "  hi \n".into()).unwrap(), "hi");
        assert!(matches!(
            non_empty("x", "   ".into()),
            Err(ProviderError::EmptyResponse(_))
        ));
    }
}
