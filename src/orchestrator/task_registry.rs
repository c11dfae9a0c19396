//! 任务状态表 - 编排层
//!
//! ## 职责
//!
//! 保存所有批改任务的可轮询状态，是唯一在多个 worker 之间共享的状态。
//!
//! - 读（poll）可以并发
//! - 每个任务只由它自己的 worker 写入
//! - 进度单调不减：迟到的低进度事件只更新消息，不回退进度
//! - 任务不会自动删除，只能通过 `clear` 显式重置

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{Task, TaskStatus};
use crate::services::PersistedReport;
use crate::workflow::ProgressEvent;

/// 任务状态表（克隆后共享同一张表）
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新任务：processing / 0% / "正在初始化..."
    pub async fn init(&self, id: &str) -> Task {
        let task = Task::new(id);
        self.tasks.write().await.insert(id.to_string(), task.clone());
        debug!("登记任务 {}", id);
        task
    }

    /// 应用一条进度事件
    ///
    /// 已结束的任务不再接受进度
    pub async fn apply_progress(&self, id: &str, event: &ProgressEvent) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(id) else {
            warn!("⚠️ 收到未知任务 {} 的进度", id);
            return;
        };
        if task.is_finished() {
            return;
        }
        task.progress = task.progress.max(event.percent.min(100));
        task.message = event.message.clone();
        task.updated_at = Local::now();
    }

    /// 标记任务完成
    pub async fn complete(&self, id: &str, report: &PersistedReport) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(id) {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.message = "批改完成！".to_string();
            task.result_filename = Some(report.result_filename.clone());
            task.report_path = Some(report.report_path.display().to_string());
            task.updated_at = Local::now();
        }
    }

    /// 标记任务失败（进度保持不变）
    pub async fn fail(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(id) {
            task.status = TaskStatus::Error;
            task.message = format!("处理失败: {}", message);
            task.error = Some(message);
            task.updated_at = Local::now();
        }
    }

    /// 查询任务快照
    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// 清空所有任务
    pub async fn clear(&self) {
        self.tasks.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
