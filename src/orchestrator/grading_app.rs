//! 批改任务门面 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个引擎的入口，负责任务的接收、调度和状态登记。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、创建目录、按配置创建模型客户端
//! 2. **提交任务**：立即返回任务ID，每个任务由一个独立的 tokio worker 执行
//! 3. **进度登记**：worker 内部通过 channel 接收流程事件并写入任务状态表
//! 4. **结果落盘**：批改完成后把报告交给 `ReportWriter`
//! 5. **查询**：轮询任务、列出模型可用性、等待任务结束
//!
//! ## 设计特点
//!
//! - **不阻塞提交方**：`submit` 只登记并派发
//! - **资源所有者**：唯一持有任务状态表的模块
//! - **向下委托**：具体流程委托给 `workflow::GradingFlow`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{read_answer_key, ExamImage};
use crate::models::Task;
use crate::orchestrator::task_registry::TaskRegistry;
use crate::providers::{ProviderInfo, ProviderRegistry, VisionProvider};
use crate::services::{ProviderGateway, ReportWriter};
use crate::utils::logging::log_startup;
use crate::workflow::{GradingCtx, GradingFlow, GradingRequest, GradingStage, ProgressEvent};

/// 一次批改提交
#[derive(Debug, Clone)]
pub struct Submission {
    /// 已合并的试卷图片
    pub image: ExamImage,
    pub question_count: Option<usize>,
    pub default_max_score: Option<f64>,
    /// 空表示使用全部可用模型
    pub provider_ids: Vec<String>,
    /// 标准答案文件（txt / md / docx）
    pub answer_key_path: Option<PathBuf>,
}

impl Submission {
    pub fn new(image: ExamImage) -> Self {
        Self {
            image,
            question_count: None,
            default_max_score: None,
            provider_ids: Vec::new(),
            answer_key_path: None,
        }
    }
}

/// 应用主结构
pub struct GradingApp {
    flow: Arc<GradingFlow>,
    writer: Arc<ReportWriter>,
    tasks: TaskRegistry,
}

impl GradingApp {
    /// 初始化应用，模型按配置中的 API Key 创建
    pub async fn initialize(config: Config) -> AppResult<Self> {
        let registry = ProviderRegistry::from_config(&config);
        Self::build(config, registry).await
    }

    /// 使用注入的模型实现初始化
    pub async fn with_providers(
        config: Config,
        providers: Vec<Arc<dyn VisionProvider>>,
    ) -> AppResult<Self> {
        Self::build(config, ProviderRegistry::with_providers(providers)).await
    }

    async fn build(config: Config, registry: ProviderRegistry) -> AppResult<Self> {
        config.validate()?;
        for dir in [&config.temp_dir, &config.grading_dir, &config.upload_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::file_write_failed(dir.clone(), e))?;
        }

        log_startup(&config, registry.len());
        if registry.is_empty() {
            warn!("⚠️ 没有配置任何模型的 API Key，提交的任务都会失败");
        }

        let gateway = ProviderGateway::new(
            registry,
            &config.temp_dir,
            Duration::from_secs(config.request_timeout_secs),
        );
        Ok(Self {
            flow: Arc::new(GradingFlow::new(&config, gateway)),
            writer: Arc::new(ReportWriter::new(&config.grading_dir, &config.upload_dir)),
            tasks: TaskRegistry::new(),
        })
    }

    /// 提交批改任务，立即返回任务ID
    pub async fn submit(&self, submission: Submission) -> String {
        let task_id = Uuid::new_v4().to_string();
        self.tasks.init(&task_id).await;
        info!("📥 接收批改任务 {} ({})", task_id, submission.image.name());

        let worker = tokio::spawn(run_task(
            Arc::clone(&self.flow),
            Arc::clone(&self.writer),
            self.tasks.clone(),
            task_id.clone(),
            submission,
        ));
        tokio::spawn(supervise(worker, self.tasks.clone(), task_id.clone()));
        task_id
    }

    /// 查询任务状态
    pub async fn poll(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).await
    }

    /// 列出所有模型及其可用性（只看是否配置了凭据）
    pub fn list_available_providers(&self) -> Vec<ProviderInfo> {
        self.flow.gateway().registry().list_available()
    }

    /// 轮询直到任务结束，进度变化时输出日志
    ///
    /// 任务不存在时返回 `None`
    pub async fn wait_for(&self, task_id: &str, interval: Duration) -> Option<Task> {
        let mut last_progress = None;
        loop {
            let task = self.tasks.get(task_id).await?;
            if task.is_finished() {
                return Some(task);
            }
            if last_progress != Some(task.progress) {
                info!("⏳ [{}%] {}", task.progress, task.message);
                last_progress = Some(task.progress);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// 清空任务状态表
    pub async fn clear_tasks(&self) {
        self.tasks.clear().await;
        info!("🧹 已清空任务状态");
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }
}

/// 等待 worker 结束；worker 异常退出时把任务标记为失败
async fn supervise(worker: JoinHandle<()>, tasks: TaskRegistry, task_id: String) {
    if let Err(e) = worker.await {
        error!("❌ [任务 {}] 任务执行失败: {}", task_id, e);
        tasks.fail(&task_id, format!("任务执行异常中止: {}", e)).await;
    }
}

/// 单个任务的 worker
async fn run_task(
    flow: Arc<GradingFlow>,
    writer: Arc<ReportWriter>,
    tasks: TaskRegistry,
    task_id: String,
    submission: Submission,
) {
    let ctx = GradingCtx::new(&task_id, submission.image.name());
    let stem = submission.image.stem();

    let answer_key = match &submission.answer_key_path {
        Some(path) => read_answer_key(path).await,
        None => None,
    };

    // ========== 进度事件 → 任务状态表 ==========
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let consumer = {
        let tasks = tasks.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tasks.apply_progress(&task_id, &event).await;
            }
        })
    };

    let request = GradingRequest {
        image: submission.image,
        question_count: submission.question_count,
        default_max_score: submission.default_max_score,
        provider_ids: submission.provider_ids,
        answer_key,
    };
    let outcome = match flow.run(&ctx, request, &tx).await {
        Ok(report) => writer.persist(&report, &stem).await,
        Err(e) => Err(e),
    };
    if outcome.is_ok() {
        let _ = tx.send(ProgressEvent {
            stage: GradingStage::Done,
            percent: 100,
            message: "批改完成！".to_string(),
        });
    }

    // 先让所有进度落地，再写终态
    drop(tx);
    if let Err(e) = consumer.await {
        warn!("⚠️ {} 进度消费任务异常: {}", ctx, e);
    }

    match outcome {
        Ok(persisted) => {
            info!("✅ {} 批改完成: {}", ctx, persisted.result_filename);
            tasks.complete(&task_id, &persisted).await;
        }
        Err(e) => {
            error!("❌ {} 批改失败: {}", ctx, e);
            tasks.fail(&task_id, e.to_string()).await;
        }
    }
}
