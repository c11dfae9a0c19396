//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务调度和状态登记，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `grading_app` - 批改任务门面
//! - 管理应用生命周期（初始化、提交、查询、清理）
//! - 每个任务派发一个 tokio worker
//! - 把流程进度写入任务状态表
//! - 批改完成后写出报告
//!
//! ### `task_registry` - 任务状态表
//! - 多个 worker 共享的唯一状态
//! - 并发读，单任务单写
//! - 进度单调不减
//!
//! ## 层次关系
//!
//! ```text
//! grading_app (处理 Submission → Task)
//!     ↓
//! workflow::GradingFlow (处理一张试卷)
//!     ↓
//! services (能力层：structure / gateway / parser / aggregator / report)
//!     ↓
//! providers + infrastructure (模型客户端、图片、标准答案)
//! ```

pub mod grading_app;
pub mod task_registry;

pub use grading_app::{GradingApp, Submission};
pub use task_registry::TaskRegistry;
