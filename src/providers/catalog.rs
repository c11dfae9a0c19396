//! 已知视觉模型目录
//!
//! 目录顺序即默认调用顺序

use phf::phf_ordered_map;

/// 模型接口类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// OpenAI 兼容的 chat completions 接口
    OpenAiCompatible,
    /// 阿里云 DashScope 多模态接口
    DashScope,
    /// Anthropic Messages 接口
    Anthropic,
}

/// 单个模型的静态描述
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub display_name: &'static str,
    pub family: ProviderFamily,
    pub api_key_env: &'static str,
    pub base_url_env: &'static str,
    pub default_base_url: &'static str,
    pub model: &'static str,
    pub max_tokens: u32,
    /// 是否需要额外强调"只输出 JSON"
    pub strict_json_hint: bool,
}

pub static CATALOG: phf::OrderedMap<&'static str, ProviderSpec> = phf_ordered_map! {
    "qwen-vl-max" => ProviderSpec {
        display_name: "通义千问 VL Max",
        family: ProviderFamily::DashScope,
        api_key_env: "DASHSCOPE_API_KEY",
        base_url_env: "DASHSCOPE_BASE_URL",
        default_base_url: "https://dashscope.aliyuncs.com/api/v1",
        model: "qwen-vl-max",
        max_tokens: 2000,
        strict_json_hint: false,
    },
    "claude" => ProviderSpec {
        display_name: "Claude",
        family: ProviderFamily::Anthropic,
        api_key_env: "ANTHROPIC_API_KEY",
        base_url_env: "ANTHROPIC_BASE_URL",
        default_base_url: "https://api.anthropic.com/v1",
        model: "claude-3-5-sonnet-20241022",
        max_tokens: 1000,
        strict_json_hint: false,
    },
    "gemini-3-pro" => ProviderSpec {
        display_name: "Gemini 3 Pro",
        family: ProviderFamily::OpenAiCompatible,
        api_key_env: "XHUOAI_API_KEY",
        base_url_env: "XHUOAI_BASE_URL",
        default_base_url: "https://api.xhuoai.com/v1",
        model: "gemini-3-pro",
        max_tokens: 32000,
        strict_json_hint: true,
    },
    "glm-4v" => ProviderSpec {
        display_name: "智谱 GLM-4V",
        family: ProviderFamily::OpenAiCompatible,
        api_key_env: "ZHIPUAI_API_KEY",
        base_url_env: "ZHIPUAI_BASE_URL",
        default_base_url: "https://open.bigmodel.cn/api/paas/v4",
        model: "glm-4v",
        max_tokens: 1024,
        strict_json_hint: false,
    },
};

pub fn lookup(id: &str) -> Option<&'static ProviderSpec> {
    CATALOG.get(id)
}

/// 按目录顺序列出所有模型 id
pub fn ids() -> impl Iterator<Item = &'static str> {
    CATALOG.keys().copied()
}
