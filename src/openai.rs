use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::{json, Value};

use crate::provider::{
    env_credential, non_empty, read_json, AnalyzeOptions, ImageInput, Provider, ProviderError,
    ProviderResponse, Usage,
};

const NAME: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";

/// OpenAI-compatible chat completions with `data:` URL images.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }

    /// Reads `OPENAI_API_KEY` and, if set, `OPENAI_BASE_URL`.
    pub fn from_env(client: Client) -> Result<Self, ProviderError> {
        let key = env_credential(NAME, API_KEY_VAR)?;
        let provider = Self::new(client, key);
        Ok(match std::env::var(BASE_URL_VAR) {
            Ok(url) if !url.trim().is_empty() => provider.base_url(url),
            _ => provider,
        })
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, images: &[ImageInput], options: &AnalyzeOptions) -> Value {
        let model = options.model.as_deref().unwrap_or(&self.model);

        let mut content = vec![json!({"type": "text", "text": options.user_prompt})];
        content.extend(images.iter().map(|image| {
            json!({
                "type": "image_url",
                "image_url": {"url": image.data_url()},
            })
        }));

        let mut messages = vec![];
        if !options.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": options.system_prompt}));
        }
        messages.push(json!({"role": "user", "content": content}));

        json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        })
    }

    async fn send(
        &self,
        images: &[ImageInput],
        options: &AnalyzeOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = self.request_body(images, options);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection {
                provider: NAME.to_string(),
                endpoint: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let json = read_json(NAME, resp).await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &Value) -> Result<ProviderResponse, ProviderError> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: NAME.to_string(),
            message: "missing choices[0].message.content".to_string(),
        })?;

    let usage = json.get("usage").map(|u| Usage {
        input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    });

    Ok(ProviderResponse {
        text: non_empty(NAME, text.to_string())?,
        usage,
        model: json.get("model").and_then(|v| v.as_str()).map(str::to_string),
    })
}

impl Provider for OpenAiProvider {
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
        Box::pin(self.send(std::slice::from_ref(image), options))
    }

    fn compare<'a>(
        &'a self,
        images: &'a [ImageInput],
        options: &'a AnalyzeOptions,
    ) -> BoxFuture<'a, Result<ProviderResponse, ProviderError>> {
        Box::pin(self.send(images, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_data_urls() {
        let provider = OpenAiProvider::new(Client::new(), "key").with_model("gpt-4.1");
        let images = vec![
            ImageInput::new(vec![1], "image/jpeg", "a.jpg"),
            ImageInput::new(vec![2], "image/png", "b.png"),
        ];
        let body = provider.request_body(&images, &AnalyzeOptions::default());

        assert_eq!(body["model"], "gpt-4.1");
        // no system message when the system prompt is empty
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn parses_choice_content_and_usage() {
        let json = json!({
            "model": "gpt-4o-2024",
            "choices": [{"message": {"content": "DESCRIPTION: hi"}}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3}
        });
        let resp = parse_chat_response(&json).unwrap();
        assert_eq!(resp.text, "DESCRIPTION: hi");
        assert_eq!(
            resp.usage,
            Some(Usage {
                input_tokens: 7,
                output_tokens: 3
            })
        );
    }

    #[test]
    fn missing_choices_is_invalid() {
        let json = json!({"error": "nope"});
        assert!(matches!(
            parse_chat_response(&json),
            Err(ProviderError::InvalidResponse { .. })
        ));
    }
}
