use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::{json, Value};

use crate::provider::{
    env_credential, non_empty, read_json, AnalyzeOptions, ImageInput, Provider, ProviderError,
    ProviderResponse, Usage,
};

const NAME: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Claude vision models through the Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: "https://api.anthropic.com".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }

    /// Reads `ANTHROPIC_API_KEY`.
    pub fn from_env(client: Client) -> Result<Self, ProviderError> {
        let key = env_credential(NAME, API_KEY_VAR)?;
        Ok(Self::new(client, key))
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, images: &[ImageInput], options: &AnalyzeOptions) -> Value {
        let model = options.model.as_deref().unwrap_or(&self.model);

        let mut content: Vec<Value> = images
            .iter()
            .map(|image| {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.mime_type,
                        "data": image.base64(),
                    },
                })
            })
            .collect();
        content.push(json!({"type": "text", "text": options.user_prompt}));

        let mut body = json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": content}],
        });
        if !options.system_prompt.is_empty() {
            body["system"] = json!(options.system_prompt);
        }
        body
    }

    async fn send(
        &self,
        images: &[ImageInput],
        options: &AnalyzeOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = self.request_body(images, options);
        let url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection {
                provider: NAME.to_string(),
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let json = read_json(NAME, resp).await?;
        parse_messages_response(&json)
    }
}

/// Join every text block of a Messages API response.
fn parse_messages_response(json: &Value) -> Result<ProviderResponse, ProviderError> {
    let blocks = json
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: NAME.to_string(),
            message: "missing content array".to_string(),
        })?;

    let text = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    let usage = json.get("usage").map(|u| Usage {
        input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
    });

    Ok(ProviderResponse {
        text: non_empty(NAME, text)?,
        usage,
        model: json.get("model").and_then(|v| v.as_str()).map(str::to_string),
    })
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn max_image_bytes(&self) -> u64 {
        5 * 1024 * 1024
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
    fn body_puts_images_before_prompt() {
        let provider = AnthropicProvider::new(Client::new(), "key");
        let images = vec![ImageInput::new(vec![1, 2, 3], "image/png", "a.png")];
        let options = AnalyzeOptions {
            model: None,
            system_prompt: "sys".into(),
            user_prompt: "describe".into(),
        };
        let body = provider.request_body(&images, &options);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["system"], "sys");
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[1]["text"], "describe");
    }

    #[test]
    fn response_text_blocks_are_joined() {
        let json = json!({
            "model": "claude-x",
            "content": [
                {"type": "text", "text": "TYPE: photo"},
                {"type": "text", "text": "SUBJECT: a cat"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4}
        });
        let resp = parse_messages_response(&json).unwrap();
        assert_eq!(resp.text, "TYPE: photo\nSUBJECT: a cat");
        assert_eq!(resp.model.as_deref(), Some("claude-x"));
        assert_eq!(resp.usage.unwrap().output_tokens, 4);
    }

    #[test]
    fn empty_content_is_an_error() {
        let json = json!({"content": []});
        assert!(matches!(
            parse_messages_response(&json),
            Err(ProviderError::EmptyResponse(_))
        ));
    }
}
