use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

/// 一次批改任务的可轮询状态
///
/// 序列化后的键名（`status` / `progress` / `message` / `result_filename` /
/// `report_path`）是外部轮询方依赖的约定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id: id.into(),
            status: TaskStatus::Processing,
            progress: 0,
            message: "正在初始化...".to_string(),
            result_filename: None,
            report_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != TaskStatus::Processing
    }
}
