//! 阿里云 DashScope 多模态接口（通义千问 VL 系列）

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProviderSpec, VisionProvider};
use crate::error::ProviderError;
use crate::infrastructure::ImagePayload;

const GENERATION_PATH: &str = "services/aigc/multimodal-generation/generation";

pub struct DashScopeProvider {
    id: String,
    spec: &'static ProviderSpec,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    input: GenerationInput<'a>,
    parameters: GenerationParameters,
}

#[derive(Serialize)]
struct GenerationInput<'a> {
    messages: Vec<GenerationMessage<'a>>,
}

#[derive(Serialize)]
struct GenerationMessage<'a> {
    role: &'a str,
    content: Vec<ContentItem>,
}

/// 图片与文本分属不同条目
#[derive(Serialize)]
#[serde(untagged)]
enum ContentItem {
    Image { image: String },
    Text { text: String },
}

#[derive(Serialize)]
struct GenerationParameters {
    max_tokens: u32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct GenerationResponse {
    output: Option<GenerationOutput>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct GenerationOutput {
    choices: Vec<GenerationChoice>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct GenerationChoice {
    message: GenerationChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct GenerationChoiceMessage {
    content: Vec<ReturnedItem>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ReturnedItem {
    text: Option<String>,
}

impl DashScopeProvider {
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
impl VisionProvider for DashScopeProvider {
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
        let body = GenerationRequest {
            model: &self.model,
            input: GenerationInput {
                messages: vec![GenerationMessage {
                    role: "user",
                    content: vec![
                        ContentItem::Image {
                            image: image.data_url(),
                        },
                        ContentItem::Text {
                            text: prompt.to_string(),
                        },
                    ],
                }],
            },
            parameters: GenerationParameters {
                max_tokens: self.spec.max_tokens,
            },
        };

        let url = format!("{}/{}", self.base_url, GENERATION_PATH);
        debug!("调用 {} ({})", self.id, url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::call_failed(&self.id, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::call_failed(&self.id, e))?;
        let parsed: GenerationResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::call_failed(&self.id, format!("HTTP {}: 响应格式异常: {}", status, e))
        })?;

        if !status.is_success() {
            let message = format!(
                "HTTP {}: {} {}",
                status,
                parsed.code.unwrap_or_default(),
                parsed.message.unwrap_or_default()
            );
            warn!("{} API 调用失败: {}", self.id, message);
            return Err(ProviderError::call_failed(&self.id, message));
        }

        let choice = parsed
            .output
            .and_then(|o| o.choices.into_iter().next())
            .ok_or_else(|| ProviderError::no_content(&self.id, "响应中没有 choices"))?;

        let content = choice
            .message
            .content
            .into_iter()
            .find_map(|item| item.text)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            let reason = choice.finish_reason.unwrap_or_else(|| "unknown".to_string());
            return Err(ProviderError::no_content(&self.id, reason));
        }
        Ok(content)
    }
}
