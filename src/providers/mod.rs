//! 视觉模型接入层
//!
//! 每个接口类型一个模块，统一实现 [`VisionProvider`]：
//! - `openai_compat`: OpenAI 兼容接口（async-openai）
//! - `dashscope`: 阿里云 DashScope 原生接口（reqwest）
//! - `anthropic`: Anthropic Messages 接口（reqwest）

pub mod anthropic;
pub mod catalog;
pub mod dashscope;
pub mod openai_compat;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::{Config, ProviderSettings};
use crate::error::ProviderError;
use crate::infrastructure::ImagePayload;

pub use anthropic::AnthropicProvider;
pub use catalog::{ProviderFamily, ProviderSpec};
pub use dashscope::DashScopeProvider;
pub use openai_compat::OpenAiCompatProvider;

/// 一个可以"看图回答"的模型
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str {
        self.id()
    }

    /// 是否需要在提示词末尾追加严格 JSON 要求
    fn prefers_strict_json(&self) -> bool {
        false
    }

    /// 发送一张图片和提示词，返回模型的原始文本
    async fn complete(&self, image: &ImagePayload, prompt: &str) -> Result<String, ProviderError>;
}

/// 对外展示的模型可用状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_if_unavailable: Option<String>,
}

/// 已配置凭据的模型集合，保持目录顺序
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn VisionProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl ProviderRegistry {
    /// 为每个配置了 API Key 的目录模型创建客户端
    pub fn from_config(config: &Config) -> Self {
        let mut providers: Vec<Arc<dyn VisionProvider>> = Vec::new();
        for (id, spec) in catalog::CATALOG.entries() {
            let Some(settings) = config.provider(id) else {
                debug!("模型 {} 未配置 API Key，跳过", id);
                continue;
            };
            providers.push(build_provider(id, spec, settings));
        }
        Self { providers }
    }

    /// 直接注入模型实现（测试或自定义接入）
    pub fn with_providers(providers: Vec<Arc<dyn VisionProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.id())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn VisionProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    /// 目录中的所有模型加上注入的模型，标注是否可用
    pub fn list_available(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<ProviderInfo> = catalog::CATALOG
            .entries()
            .map(|(id, spec)| {
                let available = self.get(id).is_some();
                ProviderInfo {
                    id: id.to_string(),
                    display_name: spec.display_name.to_string(),
                    available,
                    reason_if_unavailable: (!available).then(|| "未配置 API Key".to_string()),
                }
            })
            .collect();

        for provider in &self.providers {
            if catalog::lookup(provider.id()).is_none() {
                infos.push(ProviderInfo {
                    id: provider.id().to_string(),
                    display_name: provider.display_name().to_string(),
                    available: true,
                    reason_if_unavailable: None,
                });
            }
        }
        infos
    }

    /// 选出本次要用的模型
    ///
    /// 未选择时使用全部可用模型；否则按选择顺序取可用的部分，重复项只保留一次
    pub fn resolve(&self, selected: &[String]) -> Vec<Arc<dyn VisionProvider>> {
        if selected.is_empty() {
            return self.providers.clone();
        }
        let mut resolved: Vec<Arc<dyn VisionProvider>> = Vec::new();
        for id in selected {
            if resolved.iter().any(|p| p.id() == id) {
                continue;
            }
            match self.get(id) {
                Some(provider) => resolved.push(provider),
                None => debug!("所选模型 {} 不可用，忽略", id),
            }
        }
        resolved
    }
}

fn build_provider(
    id: &str,
    spec: &'static ProviderSpec,
    settings: &ProviderSettings,
) -> Arc<dyn VisionProvider> {
    let api_key = settings.api_key.clone().unwrap_or_default();
    let base_url = settings
        .base_url
        .clone()
        .unwrap_or_else(|| spec.default_base_url.to_string());
    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| spec.model.to_string());

    match spec.family {
        ProviderFamily::OpenAiCompatible => Arc::new(OpenAiCompatProvider::new(
            id, spec, api_key, base_url, model,
        )),
        ProviderFamily::DashScope => {
            Arc::new(DashScopeProvider::new(id, spec, api_key, base_url, model))
        }
        ProviderFamily::Anthropic => {
            Arc::new(AnthropicProvider::new(id, spec, api_key, base_url, model))
        }
    }
}
