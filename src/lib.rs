//! # Exam Grader
//!
//! 一个调用多个视觉大模型批改试卷图片的 Rust 阅卷引擎
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Providers）
//! - `infrastructure/` - 图片解码与合并、临时图片、标准答案读取
//! - `providers/` - 各模型家族的客户端，统一实现 `VisionProvider`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单次调用或单道题
//! - `ProviderGateway` - 向指定模型提交"图片 + 提示词"
//! - `response_parser` - 容错解析模型返回的 JSON
//! - `StructureAnalyzer` - 识别题目与分值
//! - `ScoreAggregator` - 综合多模型评分
//! - `ReportWriter` - 写出批改报告
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一张试卷"的完整批改流程
//! - `GradingCtx` - 上下文封装（task_id + image_name）
//! - `GradingFlow` - 流程编排（结构分析 → 逐题批改 → 综合）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/grading_app` - 任务门面，派发 worker、登记进度
//! - `orchestrator/task_registry` - 可轮询的任务状态表
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::ExamImage;
pub use models::{ExamReport, Question, Task, TaskStatus};
pub use orchestrator::{GradingApp, Submission, TaskRegistry};
pub use providers::{ProviderInfo, VisionProvider};
pub use workflow::{GradingCtx, GradingFlow, ProgressEvent};
