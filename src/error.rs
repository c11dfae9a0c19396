use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（没有任何可用模型时对任务致命）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 单个模型调用错误
    #[error("模型调用错误: {0}")]
    Provider(#[from] ProviderError),
    /// 模型输出无法解析
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 试卷结构分析错误
    #[error("结构分析错误: {0}")]
    Structure(#[from] StructureError),
    /// 图像错误
    #[error("图像错误: {0}")]
    Image(#[from] ImageError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 没有选中或可用的模型
    #[error("没有可用的模型，请检查 API Key 配置或选择的模型 (已选择: {selected:?})")]
    NoProviderAvailable { selected: Vec<String> },
    /// 配置项取值非法
    #[error("配置项 {key} 取值非法: '{value}'")]
    InvalidValue { key: String, value: String },
    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {message}")]
    FileParseFailed { path: String, message: String },
}

/// 模型调用错误
///
/// 所有变体都不会中断整道题的批改，只会变成 0 分的单模型结果
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 未配置凭据，未发出请求
    #[error("未配置 {provider} 的 API Key")]
    NotConfigured { provider: String },
    /// 传输层或服务端异常
    #[error("{provider} 调用失败: {message}")]
    CallFailed { provider: String, message: String },
    /// 返回内容为空或被拒绝
    #[error("{provider} 返回内容为空 (原因: {reason})")]
    NoContent { provider: String, reason: String },
    /// 超时
    #[error("{provider} 调用超时 ({secs} 秒)")]
    Timeout { provider: String, secs: u64 },
}

impl ProviderError {
    pub fn call_failed(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ProviderError::CallFailed {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn no_content(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderError::NoContent {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// 面向阅卷报告的简短说明
    pub fn short_comment(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured { .. } => "API密钥未配置",
            ProviderError::CallFailed { .. } => "模型调用异常",
            ProviderError::NoContent { .. } => "模型未返回内容",
            ProviderError::Timeout { .. } => "模型调用超时",
        }
    }
}

/// 模型输出解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 所有恢复策略都失败
    #[error("无法解析 {provider} 的响应: {preview}")]
    Unparseable { provider: String, preview: String },
}

/// 试卷结构分析错误（始终在本地被兜底，不会上抛给调用方）
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("结构分析调用失败: {0}")]
    Provider(#[from] ProviderError),
    #[error("结构分析响应无法解析为 JSON")]
    Unparseable,
    #[error("结构分析未识别到任何题目")]
    NoQuestions,
}

/// 图像错误
#[derive(Debug, Error)]
pub enum ImageError {
    /// 无法解码为图片
    #[error("无法解码图片 {name}: {message}")]
    Undecodable { name: String, message: String },
    /// 没有提供任何页面
    #[error("没有可合并的图片页面")]
    EmptyPageList,
    /// 编码临时图片失败
    #[error("图片编码失败: {0}")]
    EncodeFailed(String),
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("不支持的文件格式: {path}")]
    Unsupported { path: String },
}

// ========== 从常见错误类型转换 ==========

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: err,
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON 处理失败: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::FileParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            message: err.to_string(),
        })
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Image(ImageError::EncodeFailed(err.to_string()))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建"无可用模型"错误
    pub fn no_provider(selected: &[String]) -> Self {
        AppError::Config(ConfigError::NoProviderAvailable {
            selected: selected.to_vec(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_provider_message_mentions_selection() {
        let err = AppError::no_provider(&["claude".to_string()]);
        let msg = err.to_string();
        assert!(msg.contains("没有可用的模型"));
        assert!(msg.contains("claude"));
    }

    #[test]
    fn test_provider_error_short_comment() {
        let err = ProviderError::Timeout {
            provider: "glm-4v".to_string(),
            secs: 5,
        };
        assert_eq!(err.short_comment(), "模型调用超时");
        assert!(err.to_string().contains("glm-4v"));
    }
}
