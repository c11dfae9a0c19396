//! 批改任务上下文
//!
//! 封装"我正在批改哪个任务的哪张试卷"这一信息

use std::fmt::Display;

/// 批改任务上下文（仅用于日志与报告）
#[derive(Debug, Clone)]
pub struct GradingCtx {
    /// 任务ID
    pub task_id: String,

    /// 试卷图片名
    pub image_name: String,
}

impl GradingCtx {
    pub fn new(task_id: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            image_name: image_name.into(),
        }
    }
}

impl Display for GradingCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[任务 {}]", self.task_id)
    }
}
