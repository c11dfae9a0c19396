//! Anthropic Messages 接口

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProviderSpec, VisionProvider};
use crate::error::ProviderError;
use crate::infrastructure::ImagePayload;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    spec: &'static ProviderSpec,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: Vec<RequestBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

impl AnthropicProvider {
    pub fn new(
        id: impl Into<String>,
        spec: &'static ProviderSpec,
        api_key: String,
        base_url: String,
        model: String,
    ) -> Self {
        Self {
            id: id.into(),
            spec,
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl VisionProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }

    async fn complete(&self, image: &ImagePayload, prompt: &str) -> Result<String, ProviderError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.spec.max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    RequestBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: image.mime,
                            data: image.base64(),
                        },
                    },
                    RequestBlock::Text { text: prompt },
                ],
            }],
        };

        let url = format!("{}/messages", self.base_url);
        debug!("调用 {} ({})", self.id, url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::call_failed(&self.id, e))?;

        let status = resp.status();
        let parsed: MessagesResponse = resp.json().await.map_err(|e| {
            ProviderError::call_failed(&self.id, format!("HTTP {}: 响应格式异常: {}", status, e))
        })?;

        if !status.is_success() {
            let message = match parsed.error {
                Some(err) => format!("HTTP {}: {} {}", status, err.kind, err.message),
                None => format!("HTTP {}", status),
            };
            warn!("{} API 调用失败: {}", self.id, message);
            return Err(ProviderError::call_failed(&self.id, message));
        }

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let content = content.trim();

        if content.is_empty() {
            let reason = parsed.stop_reason.unwrap_or_else(|| "unknown".to_string());
            return Err(ProviderError::no_content(&self.id, reason));
        }
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::catalog;

    fn provider(base_url: String) -> AnthropicProvider {
        let spec = catalog::lookup("claude").unwrap();
        AnthropicProvider::new("claude", spec, "sk-ant".into(), base_url, spec.model.into())
    }

    #[tokio::test]
    async fn test_complete_sends_base64_image_block() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "sk-ant")
            .match_header("anthropic-version", API_VERSION)
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "max_tokens": 1000,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "image", "source": { "type": "base64", "media_type": "image/jpeg", "data": "AQID" } },
                        { "type": "text", "text": "批改" }
                    ]
                }]
            })))
            .with_status(200)
            .with_body(r#"{"id":"msg_1","type":"message","content":[{"type":"text","text":"{\"score\":9}"}],"stop_reason":"end_turn"}"#)
            .create_async()
            .await;

        let text = provider(server.url())
            .complete(&ImagePayload::jpeg(vec![1, 2, 3]), "批改")
            .await
            .unwrap();
        assert_eq!(text, "{\"score\":9}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_is_call_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/messages")
            .with_status(529)
            .with_body(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .create_async()
            .await;

        let err = provider(server.url())
            .complete(&ImagePayload::jpeg(vec![1]), "批改")
            .await
            .unwrap_err();
        match err {
            ProviderError::CallFailed { provider, message } => {
                assert_eq!(provider, "claude");
                assert!(message.contains("overloaded_error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
