//! OpenAI 兼容接口
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（如 智谱 GLM、Gemini 中转等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ProviderSpec, VisionProvider};
use crate::error::ProviderError;
use crate::infrastructure::ImagePayload;

pub struct OpenAiCompatProvider {
    id: String,
    spec: &'static ProviderSpec,
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        spec: &'static ProviderSpec,
        api_key: String,
        base_url: String,
        model_name: String,
    ) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);

        Self {
            id: id.into(),
            spec,
            client: Client::with_config(openai_config),
            model_name,
        }
    }

    fn build_message(
        &self,
        image: &ImagePayload,
        prompt: &str,
    ) -> Result<ChatCompletionRequestMessage, ProviderError> {
        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: prompt.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: image.data_url(),
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(|e| ProviderError::call_failed(&self.id, e))?;

        Ok(ChatCompletionRequestMessage::User(user_msg))
    }
}

#[async_trait]
impl VisionProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }

    fn prefers_strict_json(&self) -> bool {
        self.spec.strict_json_hint
    }

    async fn complete(&self, image: &ImagePayload, prompt: &str) -> Result<String, ProviderError> {
        debug!(
            "调用 {} (模型: {}), 提示词 {} 字符, 图片 {} 字节",
            self.id,
            self.model_name,
            prompt.chars().count(),
            image.bytes.len()
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![self.build_message(image, prompt)?])
            .temperature(0.2)
            .max_tokens(self.spec.max_tokens)
            .build()
            .map_err(|e| ProviderError::call_failed(&self.id, e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("{} API 调用失败: {}", self.id, e);
            ProviderError::call_failed(&self.id, e)
        })?;

        let Some(choice) = response.choices.first() else {
            return Err(ProviderError::no_content(&self.id, "响应中没有 choices"));
        };

        if let Some(refusal) = choice.message.refusal.as_deref() {
            warn!("{} 拒绝回答: {}", self.id, refusal);
        }

        match choice.message.content.as_deref().map(str::trim) {
            Some(content) if !content.is_empty() => Ok(content.to_string()),
            _ => {
                let reason = match (&choice.message.refusal, &choice.finish_reason) {
                    (Some(refusal), _) => format!("refusal: {}", refusal),
                    (None, Some(finish)) => format!("finish_reason: {:?}", finish),
                    (None, None) => "unknown".to_string(),
                };
                Err(ProviderError::no_content(&self.id, reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::catalog;

    fn completion_body(content: serde_json::Value, finish_reason: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "glm-4v",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish_reason,
                "logprobs": null
            }]
        })
        .to_string()
    }

    fn provider(base_url: String) -> OpenAiCompatProvider {
        let spec = catalog::lookup("glm-4v").unwrap();
        OpenAiCompatProvider::new("glm-4v", spec, "sk-test".into(), base_url, "glm-4v".into())
    }

    #[tokio::test]
    async fn test_complete_returns_trimmed_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::Regex("data:image/jpeg;base64,".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(
                serde_json::json!("  {\"score\": 4}\n"),
                "stop",
            ))
            .create_async()
            .await;

        let result = provider(server.url())
            .complete(&ImagePayload::jpeg(vec![0xFF, 0xD8]), "批改")
            .await
            .unwrap();

        assert_eq!(result, "{\"score\": 4}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_content_reports_finish_reason() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(serde_json::Value::Null, "length"))
            .create_async()
            .await;

        let err = provider(server.url())
            .complete(&ImagePayload::jpeg(vec![1]), "批改")
            .await
            .unwrap_err();

        match err {
            ProviderError::NoContent { provider, reason } => {
                assert_eq!(provider, "glm-4v");
                assert!(reason.contains("Length"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
