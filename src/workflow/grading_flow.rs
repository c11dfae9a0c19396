//! 整卷批改流程 - 流程层
//!
//! 核心职责：定义"一张试卷"的完整批改流程
//!
//! 流程顺序：
//! 1. 初始化：确定本次使用的模型，没有可用模型时失败
//! 2. 结构分析：未指定题目数量时识别题目与分值（失败自动兜底）
//! 3. 逐题批改：每道题依次调用所有模型，结果立即汇入综合器
//! 4. 综合：计算整卷得分
//!
//! 进度通过 channel 发出，不直接写任务状态

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::ExamImage;
use crate::models::{numbered_sequence, ExamReport, ProviderResult};
use crate::providers::VisionProvider;
use crate::services::{ProviderGateway, ReportMeta, ScoreAggregator, ScoreRequest, StructureAnalyzer};
use crate::workflow::grading_ctx::GradingCtx;

/// 流程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStage {
    Initializing,
    AnalyzingStructure,
    GradingQuestions,
    Aggregating,
    Done,
    Failed,
}

/// 一条进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: GradingStage,
    pub percent: u8,
    pub message: String,
}

/// 一次批改请求
#[derive(Debug, Clone)]
pub struct GradingRequest {
    /// 已合并、已解码的试卷图片
    pub image: ExamImage,
    /// 指定题目数量时跳过结构分析
    pub question_count: Option<usize>,
    /// 未识别到分值时的每题满分
    pub default_max_score: Option<f64>,
    /// 选择的模型，空表示全部可用模型
    pub provider_ids: Vec<String>,
    /// 标准答案文本
    pub answer_key: Option<String>,
}

/// 整卷批改流程
///
/// - 编排结构分析 → 逐题批改 → 综合
/// - 只依赖业务能力（services）
/// - 不持有任务状态
pub struct GradingFlow {
    gateway: ProviderGateway,
    default_max_score: f64,
    fallback_question_count: usize,
    answer_hint_limit: usize,
    parallel_providers: bool,
}

impl GradingFlow {
    pub fn new(config: &Config, gateway: ProviderGateway) -> Self {
        Self {
            gateway,
            default_max_score: config.default_max_score,
            fallback_question_count: config.fallback_question_count,
            answer_hint_limit: config.answer_hint_limit,
            parallel_providers: config.parallel_providers,
        }
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// 执行完整批改流程
    ///
    /// 只有在没有任何可用模型时返回错误
    pub async fn run(
        &self,
        ctx: &GradingCtx,
        request: GradingRequest,
        progress: &UnboundedSender<ProgressEvent>,
    ) -> AppResult<ExamReport> {
        let emit = |stage: GradingStage, percent: u8, message: String| {
            info!("{} {}% {}", ctx, percent, message);
            // 接收端已关闭时不影响批改
            let _ = progress.send(ProgressEvent {
                stage,
                percent,
                message,
            });
        };

        emit(GradingStage::Initializing, 0, "正在初始化...".to_string());

        // ========== 初始化：确定模型 ==========
        let providers = self.gateway.registry().resolve(&request.provider_ids);
        if providers.is_empty() {
            let err = AppError::no_provider(&request.provider_ids);
            emit(GradingStage::Failed, 0, err.to_string());
            return Err(err);
        }
        let provider_ids: Vec<String> = providers.iter().map(|p| p.id().to_string()).collect();
        emit(
            GradingStage::Initializing,
            5,
            format!("将使用以下模型进行批改: {}", provider_ids.join(", ")),
        );

        let default_max_score = request
            .default_max_score
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(self.default_max_score);
        let answer_key = request.answer_key.as_deref().filter(|k| !k.trim().is_empty());

        // ========== 结构分析 ==========
        let question_count = request.question_count.filter(|c| *c > 0);
        let questions = match question_count {
            Some(count) => {
                info!("{} 已指定题目数量 {}，跳过结构分析", ctx, count);
                numbered_sequence(count)
            }
            None => {
                emit(
                    GradingStage::AnalyzingStructure,
                    10,
                    "正在分析试卷结构（这可能需要几秒钟）...".to_string(),
                );
                StructureAnalyzer::new(&self.gateway, self.answer_hint_limit)
                    .with_fallback_count(self.fallback_question_count)
                    .analyze(&request.image, answer_key, &provider_ids[0], None)
                    .await
            }
        };

        emit(
            GradingStage::GradingQuestions,
            20,
            format!("已识别出 {} 道题，准备逐题批改...", questions.len()),
        );

        // ========== 逐题批改 ==========
        let mut aggregator = ScoreAggregator::new(default_max_score);
        let total = questions.len();
        for (index, question) in questions.iter().enumerate() {
            let max_score = question.effective_max_score(default_max_score);
            emit(
                GradingStage::GradingQuestions,
                grading_percent(index, total),
                format!("正在批改 {} (满分{}分)...", question.describe(), max_score),
            );

            let score_request = ScoreRequest {
                question,
                max_score,
                answer_key,
            };
            let results = self
                .grade_question(&request.image, &providers, score_request)
                .await;
            let aggregated = aggregator.push_question(question, results);
            info!(
                "{} [题目 {}] 综合得分 {}/{} ({})",
                ctx,
                aggregated.question_id,
                aggregated.final_score,
                aggregated.max_score,
                aggregated.comment
            );
        }

        // ========== 综合 ==========
        emit(
            GradingStage::Aggregating,
            90,
            "正在综合多模型评分结果...".to_string(),
        );
        let report = aggregator.finish(ReportMeta {
            task_id: ctx.task_id.clone(),
            image_name: ctx.image_name.clone(),
            providers: provider_ids,
            question_count,
        });
        emit(
            GradingStage::Aggregating,
            95,
            format!(
                "综合完成，总分 {}/{}，正确 {}/{} 题",
                report.total_score, report.max_total_score, report.correct_count, report.total_count
            ),
        );

        Ok(report)
    }

    /// 一道题交给所有模型批改，结果顺序与模型顺序一致
    async fn grade_question(
        &self,
        image: &ExamImage,
        providers: &[Arc<dyn VisionProvider>],
        request: ScoreRequest<'_>,
    ) -> Vec<ProviderResult> {
        if self.parallel_providers {
            join_all(
                providers
                    .iter()
                    .map(|p| self.gateway.grade(image, request, p.id())),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(providers.len());
            for provider in providers {
                results.push(self.gateway.grade(image, request, provider.id()).await);
            }
            results
        }
    }
}

/// 逐题阶段的进度：20% 到 90% 按已完成题数线性分配
fn grading_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 20;
    }
    (20 + completed.min(total) * 70 / total) as u8
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ProviderError;
    use crate::infrastructure::ImagePayload;
    use crate::providers::ProviderRegistry;

    /// 按顺序返回预设回复的模型
    struct Scripted {
        id: &'static str,
        replies: Mutex<Vec<Result<String, ProviderError>>>,
    }

    impl Scripted {
        fn new(id: &'static str, replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                id,
                replies: Mutex::new(replies.into_iter().rev().map(|r| Ok(r.to_string())).collect()),
            })
        }
    }

    #[async_trait]
    impl VisionProvider for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn complete(&self, _: &ImagePayload, _: &str) -> Result<String, ProviderError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::no_content(self.id, "script exhausted")))
        }
    }

    fn flow(dir: &std::path::Path, providers: Vec<Arc<dyn VisionProvider>>, parallel: bool) -> GradingFlow {
        let config = Config {
            parallel_providers: parallel,
            ..Default::default()
        };
        let gateway = ProviderGateway::new(
            ProviderRegistry::with_providers(providers),
            dir,
            Duration::from_secs(5),
        );
        GradingFlow::new(&config, gateway)
    }

    fn request(question_count: Option<usize>) -> GradingRequest {
        GradingRequest {
            image: ExamImage::from_dynamic("exam.jpg", DynamicImage::ImageRgb8(RgbImage::new(4, 4))),
            question_count,
            default_max_score: None,
            provider_ids: vec![],
            answer_key: None,
        }
    }

    #[test]
    fn test_grading_percent() {
        assert_eq!(grading_percent(0, 4), 20);
        assert_eq!(grading_percent(2, 4), 55);
        assert_eq!(grading_percent(4, 4), 90);
        assert_eq!(grading_percent(0, 0), 20);
    }

    #[tokio::test]
    async fn test_run_with_explicit_count_and_truncated_reply() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(
            "p",
            vec![
                r#"{"score":8,"is_correct":true,"comment":"ok"}"#,
                r#"{"score":3,"is_correct":false,"comment":"weak""#,
            ],
        );
        let flow = flow(dir.path(), vec![provider], false);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = flow
            .run(&GradingCtx::new("t", "exam.jpg"), request(Some(2)), &tx)
            .await
            .unwrap();
        assert_eq!(report.details.get("1").unwrap().final_score, 8.0);
        assert_eq!(report.details.get("2").unwrap().final_score, 3.0);
        assert_eq!(report.total_score, 11.0);
        assert_eq!(report.correct_count, 1);

        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events.iter().all(|e| e.stage != GradingStage::AnalyzingStructure));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(events.last().unwrap().percent, 95);
    }

    #[tokio::test]
    async fn test_run_without_providers_fails() {
        let dir = tempfile::tempdir().unwrap();
        let flow = flow(dir.path(), vec![], false);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = flow
            .run(&GradingCtx::new("t", "exam.jpg"), request(None), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, GradingStage::Initializing);
        assert_eq!(rx.recv().await.unwrap().stage, GradingStage::Failed);
    }

    #[tokio::test]
    async fn test_structure_analysis_drives_question_list() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(
            "p",
            vec![
                r#"{"groups":[{"name":"一、选择题","questions":[{"id":"1"},{"id":"2"}]}]}"#,
                r#"{"score":3}"#,
                r#"{"score":1}"#,
            ],
        );
        let flow = flow(dir.path(), vec![provider], false);
        let (tx, _rx) = mpsc::unbounded_channel();

        let report = flow
            .run(&GradingCtx::new("t", "exam.jpg"), request(None), &tx)
            .await
            .unwrap();
        assert_eq!(report.max_total_score, 6.0);
        assert_eq!(report.total_score, 4.0);
        let first = report.details.get("一、选择题-1").unwrap();
        assert_eq!(first.group_name.as_deref(), Some("一、选择题"));
        assert_eq!(first.sub_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_parallel_providers_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = Scripted::new("a", vec![r#"{"score":10}"#]);
        let b = Scripted::new("b", vec![r#"{"score":6}"#]);
        let flow = flow(dir.path(), vec![a, b], true);
        let (tx, _rx) = mpsc::unbounded_channel();

        let report = flow
            .run(&GradingCtx::new("t", "exam.jpg"), request(Some(1)), &tx)
            .await
            .unwrap();
        let q = report.details.get("1").unwrap();
        assert_eq!(q.final_score, 8.0);
        let order: Vec<&str> = q.provider_results.iter().map(|r| r.provider_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }
}
