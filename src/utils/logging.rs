//! 日志工具模块
//!
//! 提供日志初始化和输出格式化的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 `debug` 或 `info`。
/// 重复调用是安全的（测试中会多次调用）。
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config, available: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 阅卷引擎启动");
    info!("📊 可用模型数量: {}", available);
    info!("📝 默认每题满分: {}", config.default_max_score);
    info!(
        "⏱️ 单次调用超时: {} 秒, 并发调用: {}",
        config.request_timeout_secs, config.parallel_providers
    );
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars_not_bytes() {
        assert_eq!(truncate_text("批改完成", 2), "批改...");
        assert_eq!(truncate_text("ok", 10), "ok");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
    }
}
