//! 多模型评分综合 - 业务能力层
//!
//! 只负责"把多个模型的意见合成一个分数"能力
//!
//! - 单题：成功模型得分取平均，四舍五入到 0.5 分，再裁剪到 `[0, 满分]`；
//!   失败的模型不计入平均，全部失败时为 0 分
//! - 整卷：总分、满分合计、得分率、正确题数

use std::collections::HashMap;

use chrono::Local;

use crate::models::{
    split_unique_id, AggregatedQuestionResult, ExamReport, ProviderResult, ProviderTotal,
    Question, QuestionDetails, Verdict,
};

/// 舍入到最近的 0.5，恰好居中时取偶数个半分（7.25 → 7.0，7.75 → 8.0）
pub fn round_to_half(value: f64) -> f64 {
    (value * 2.0).round_ties_even() / 2.0
}

/// 综合单道题的多个模型结果
pub fn aggregate_question(
    question: &Question,
    max_score: f64,
    provider_results: Vec<ProviderResult>,
) -> AggregatedQuestionResult {
    let scores: Vec<f64> = provider_results
        .iter()
        .filter(|r| r.success)
        .map(|r| r.score)
        .collect();

    let final_score = if scores.is_empty() {
        0.0
    } else {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        round_to_half(mean).clamp(0.0, max_score)
    };

    let verdict = Verdict::from_score(final_score, max_score);

    let analysis = provider_results
        .iter()
        .map(|r| r.analysis.trim())
        .find(|a| !a.is_empty())
        .or_else(|| {
            provider_results
                .iter()
                .map(|r| r.comment.trim())
                .filter(|c| !c.is_empty())
                .max_by_key(|c| c.chars().count())
        })
        .unwrap_or_default()
        .to_string();

    let (group_name, sub_id) = match (&question.group, split_unique_id(&question.unique_id)) {
        (Some(_), Some((group, sub))) => (Some(group.to_string()), Some(sub.to_string())),
        _ => (None, None),
    };

    AggregatedQuestionResult {
        question_id: question.unique_id.clone(),
        group_name,
        sub_id,
        final_score,
        max_score,
        is_correct: verdict.is_correct(),
        verdict,
        comment: verdict.label().to_string(),
        analysis,
        provider_results,
        region: question.region,
    }
}

/// 报告的描述信息
#[derive(Debug, Clone, Default)]
pub struct ReportMeta {
    pub task_id: String,
    pub image_name: String,
    pub providers: Vec<String>,
    pub question_count: Option<usize>,
}

/// 逐题累积结果，最后生成整卷报告
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    default_max_score: f64,
    details: QuestionDetails,
    provider_totals: Vec<ProviderTotal>,
}

impl ScoreAggregator {
    pub fn new(default_max_score: f64) -> Self {
        Self {
            default_max_score,
            details: QuestionDetails::default(),
            provider_totals: Vec::new(),
        }
    }

    pub fn default_max_score(&self) -> f64 {
        self.default_max_score
    }

    /// 加入一道题的全部模型结果
    pub fn push_question(
        &mut self,
        question: &Question,
        provider_results: Vec<ProviderResult>,
    ) -> &AggregatedQuestionResult {
        for result in &provider_results {
            match self
                .provider_totals
                .iter_mut()
                .find(|t| t.provider_id == result.provider_id)
            {
                Some(total) => total.total += result.score,
                None => self.provider_totals.push(ProviderTotal {
                    provider_id: result.provider_id.clone(),
                    total: result.score,
                }),
            }
        }

        let max_score = question.effective_max_score(self.default_max_score);
        self.details
            .push(aggregate_question(question, max_score, provider_results))
    }

    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// 计算整卷合计并生成报告
    pub fn finish(self, meta: ReportMeta) -> ExamReport {
        let total_score: f64 = self.details.iter().map(|r| r.final_score).sum();
        let max_total_score: f64 = self.details.iter().map(|r| r.max_score).sum();
        let accuracy = if max_total_score > 0.0 {
            total_score / max_total_score
        } else {
            0.0
        };
        let correct_count = self.details.iter().filter(|r| r.is_correct).count();
        let total_count = self.details.len();

        ExamReport {
            task_id: meta.task_id,
            image_name: meta.image_name,
            graded_at: Local::now(),
            providers: meta.providers,
            default_max_score: self.default_max_score,
            question_count: meta.question_count,
            details: self.details,
            total_score,
            max_total_score,
            accuracy,
            correct_count,
            total_count,
            provider_totals: self.provider_totals,
        }
    }
}

/// 一次性综合所有题目
///
/// 按题目列表顺序处理，没有任何模型结果的题目记为 0 分
pub fn combine(
    mut results: HashMap<String, Vec<ProviderResult>>,
    questions: &[Question],
    default_max_score: f64,
    meta: ReportMeta,
) -> ExamReport {
    let mut aggregator = ScoreAggregator::new(default_max_score);
    for question in questions {
        let provider_results = results.remove(&question.unique_id).unwrap_or_default();
        aggregator.push_question(question, provider_results);
    }
    aggregator.finish(meta)
}
