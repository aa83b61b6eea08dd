use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::json;

use crate::parser;
use crate::provider::{
    non_empty, read_json, AnalyzeOptions, ImageInput, Provider, ProviderError, ProviderResponse,
    Usage,
};

const NAME: &str = "ollama";

/// Local Ollama vision model via `/api/chat`.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    /// Ollama API endpoint (e.g., "http://localhost:11434")
    pub endpoint: String,
    /// Vision model name (e.g., "llava", "llama3.2-vision", "minicpm-v")
    pub model: String,
    /// Request timeout (default: 120s)
    pub timeout: Duration,
    /// Maximum tokens to generate
    pub num_predict: u32,
}

impl OllamaProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: "http://localhost:11434".to_string(),
            model: "llava".to_string(),
            timeout: Duration::from_secs(120),
            num_predict: 1024,
        }
    }

    /// Honors `OLLAMA_HOST` when set.
    pub fn from_env(client: Client) -> Self {
        let provider = Self::new(client);
        match std::env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => provider.endpoint(host),
            _ => provider,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn chat(
        &self,
        images: &[ImageInput],
        options: &AnalyzeOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let encoded: Vec<String> = images.iter().map(ImageInput::base64).collect();

        let mut messages = vec![];
        if !options.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": options.system_prompt}));
        }
        messages.push(json!({
            "role": "user",
            "content": options.user_prompt,
            "images": encoded,
        }));

        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": {
                "num_predict": self.num_predict,
                "repeat_penalty": 1.2,
            },
        });

        let url = format!("{}/api/chat", self.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection {
                provider: NAME.to_string(),
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let json = read_json(NAME, resp).await?;

        let raw = json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let text = non_empty(NAME, parser::strip_think_tags(raw))?;

        let usage = match (
            json.get("prompt_eval_count").and_then(|v| v.as_u64()),
            json.get("eval_count").and_then(|v| v.as_u64()),
        ) {
            (None, None) => None,
            (input, output) => Some(Usage {
                input_tokens: input.unwrap_or(0),
                output_tokens: output.unwrap_or(0),
            }),
        };

        Ok(ProviderResponse {
            text,
            usage,
            model: json
                .get("model")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| Some(model.to_string())),
        })
    }
}

impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn max_image_bytes(&self) -> u64 {
        20 * 1024 * 1024
    }

    fn analyze<'a>(
        &'a self,
        image: &'a ImageInput,
        options: &'a AnalyzeOptions,
    ) -> BoxFuture<'a, Result<ProviderResponse, ProviderError>> {
        Box::pin(self.chat(std::slice::from_ref(image), options))
    }

    fn compare<'a>(
        &'a self,
        images: &'a [ImageInput],
        options: &'a AnalyzeOptions,
    ) -> BoxFuture<'a, Result<ProviderResponse, ProviderError>> {
        Box::pin(self.chat(images, options))
    }
}
