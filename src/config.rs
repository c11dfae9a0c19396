use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};
use crate::providers::catalog;

/// 单个模型的连接配置
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 试卷未识别到分值时的默认每题满分
    pub default_max_score: f64,
    /// 结构分析失败时兜底生成的题目数量
    pub fallback_question_count: usize,
    /// 单次模型调用超时（秒）
    pub request_timeout_secs: u64,
    /// 同一道题的多个模型是否并发调用
    pub parallel_providers: bool,
    /// 结构分析提示词中标准答案的最大字符数
    pub answer_hint_limit: usize,
    /// 临时图片目录
    pub temp_dir: String,
    /// 批改报告目录
    pub grading_dir: String,
    /// 对外可访问的报告副本目录
    pub upload_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 模型配置（按模型 id） ---
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_max_score: 10.0,
            fallback_question_count: 10,
            request_timeout_secs: 180,
            parallel_providers: false,
            answer_hint_limit: 3000,
            temp_dir: "temp".to_string(),
            grading_dir: "static/grading".to_string(),
            upload_dir: "static/uploads".to_string(),
            verbose_logging: false,
            providers: HashMap::new(),
        }
    }
}

/// TOML 配置文件结构，所有字段可选
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    default_max_score: Option<f64>,
    fallback_question_count: Option<usize>,
    request_timeout_secs: Option<u64>,
    parallel_providers: Option<bool>,
    answer_hint_limit: Option<usize>,
    temp_dir: Option<String>,
    grading_dir: Option<String>,
    upload_dir: Option<String>,
    verbose_logging: Option<bool>,
    providers: HashMap<String, ProviderSettings>,
}

impl Config {
    /// 默认值 → 配置文件（可选）→ 环境变量
    pub fn load() -> AppResult<Self> {
        let path =
            std::env::var("EXAM_GRADER_CONFIG").unwrap_or_else(|_| "grader.toml".to_string());
        let base = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| AppError::file_read_failed(&path, e))?;
            let file: FileConfig = toml::from_str(&content).map_err(|e| {
                ConfigError::FileParseFailed {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?;
            Self::from_file_config(file)
        } else {
            Self::default()
        };
        Ok(base.overlay_env())
    }

    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// 在默认值之上应用 TOML 配置
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let file: FileConfig = toml::from_str(content)?;
        Ok(Self::from_file_config(file))
    }

    fn from_file_config(file: FileConfig) -> Self {
        let default = Self::default();
        Self {
            default_max_score: file.default_max_score.unwrap_or(default.default_max_score),
            fallback_question_count: file
                .fallback_question_count
                .unwrap_or(default.fallback_question_count),
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(default.request_timeout_secs),
            parallel_providers: file.parallel_providers.unwrap_or(default.parallel_providers),
            answer_hint_limit: file.answer_hint_limit.unwrap_or(default.answer_hint_limit),
            temp_dir: file.temp_dir.unwrap_or(default.temp_dir),
            grading_dir: file.grading_dir.unwrap_or(default.grading_dir),
            upload_dir: file.upload_dir.unwrap_or(default.upload_dir),
            verbose_logging: file.verbose_logging.unwrap_or(default.verbose_logging),
            providers: file.providers,
        }
    }

    fn overlay_env(self) -> Self {
        let mut providers = self.providers;
        for (id, spec) in catalog::CATALOG.entries() {
            if let Some(key) = non_empty_env(spec.api_key_env) {
                providers.entry(id.to_string()).or_default().api_key = Some(key);
            }
            if let Some(url) = non_empty_env(spec.base_url_env) {
                providers.entry(id.to_string()).or_default().base_url = Some(url);
            }
        }

        Self {
            default_max_score: std::env::var("DEFAULT_MAX_SCORE").ok().and_then(|v| v.parse().ok()).unwrap_or(self.default_max_score),
            fallback_question_count: std::env::var("FALLBACK_QUESTION_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(self.fallback_question_count),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(self.request_timeout_secs),
            parallel_providers: std::env::var("PARALLEL_PROVIDERS").ok().and_then(|v| v.parse().ok()).unwrap_or(self.parallel_providers),
            answer_hint_limit: std::env::var("ANSWER_HINT_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(self.answer_hint_limit),
            temp_dir: std::env::var("TEMP_DIR").unwrap_or(self.temp_dir),
            grading_dir: std::env::var("GRADING_DIR").unwrap_or(self.grading_dir),
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or(self.upload_dir),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(self.verbose_logging),
            providers,
        }
    }

    /// 已配置凭据的模型设置
    pub fn provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.get(id).filter(|s| {
            s.api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false)
        })
    }

    /// 校验数值配置
    pub fn validate(&self) -> AppResult<()> {
        if !self.default_max_score.is_finite() || self.default_max_score <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "default_max_score".to_string(),
                value: self.default_max_score.to_string(),
            }
            .into());
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_overrides_defaults() {
        let config = Config::from_toml_str(
            r#"
            default_max_score = 5.0
            parallel_providers = true

            [providers.claude]
            api_key = "sk-test"
            model = "claude-3-haiku"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_max_score, 5.0);
        assert!(config.parallel_providers);
        assert_eq!(config.fallback_question_count, 10);
        let claude = config.provider("claude").unwrap();
        assert_eq!(claude.model.as_deref(), Some("claude-3-haiku"));
    }

    #[test]
    fn test_provider_without_key_is_not_configured() {
        let mut config = Config::default();
        config.providers.insert(
            "glm-4v".to_string(),
            ProviderSettings {
                api_key: Some("  ".to_string()),
                ..Default::default()
            },
        );
        assert!(config.provider("glm-4v").is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("default_max_score = \"ten\"").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_non_positive_max_score() {
        let config = Config {
            default_max_score: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
