use chrono::{DateTime, Local};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// 从模型输出中恢复出的结构化批改结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedGrading {
    pub score: f64,
    pub is_correct: bool,
    pub analysis: String,
    pub comment: String,
}

/// 单个模型对单道题的批改结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_id: String,
    pub score: f64,
    pub is_correct: bool,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub comment: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResult {
    pub fn from_parsed(provider_id: impl Into<String>, parsed: ParsedGrading) -> Self {
        Self {
            provider_id: provider_id.into(),
            score: parsed.score,
            is_correct: parsed.is_correct,
            analysis: parsed.analysis,
            comment: parsed.comment,
            success: true,
            error: None,
        }
    }

    /// 调用或解析失败：0 分，不参与平均
    pub fn failure(
        provider_id: impl Into<String>,
        error: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            score: 0.0,
            is_correct: false,
            analysis: String::new(),
            comment: comment.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// 综合评定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    MostlyCorrect,
    PartiallyCorrect,
    Incorrect,
}

impl Verdict {
    /// 按最终得分与满分的比例评定
    pub fn from_score(final_score: f64, max_score: f64) -> Self {
        if final_score >= max_score * 0.6 {
            Verdict::Correct
        } else if final_score >= max_score * 0.5 {
            Verdict::MostlyCorrect
        } else if final_score > 0.0 {
            Verdict::PartiallyCorrect
        } else {
            Verdict::Incorrect
        }
    }

    pub fn is_correct(self) -> bool {
        self == Verdict::Correct
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Correct => "正确",
            Verdict::MostlyCorrect => "基本正确",
            Verdict::PartiallyCorrect => "部分正确",
            Verdict::Incorrect => "错误",
        }
    }
}

/// 一道题的多模型综合结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedQuestionResult {
    pub question_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
    pub final_score: f64,
    pub max_score: f64,
    pub is_correct: bool,
    pub verdict: Verdict,
    pub comment: String,
    pub analysis: String,
    pub provider_results: Vec<ProviderResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<[f64; 4]>,
}

/// 按发现顺序保存的逐题结果，序列化为以 unique_id 为键的 JSON 对象
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionDetails(Vec<AggregatedQuestionResult>);

impl QuestionDetails {
    /// 追加一道题，返回刚加入的结果
    pub fn push(&mut self, result: AggregatedQuestionResult) -> &AggregatedQuestionResult {
        self.0.push(result);
        &self.0[self.0.len() - 1]
    }

    pub fn get(&self, unique_id: &str) -> Option<&AggregatedQuestionResult> {
        self.0.iter().find(|r| r.question_id == unique_id)
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.get(unique_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregatedQuestionResult> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for QuestionDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for result in &self.0 {
            map.serialize_entry(&result.question_id, result)?;
        }
        map.end()
    }
}

/// 单个模型在整张试卷上的原始得分合计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderTotal {
    pub provider_id: String,
    pub total: f64,
}

/// 一次批改任务的最终报告
#[derive(Debug, Clone, Serialize)]
pub struct ExamReport {
    pub task_id: String,
    pub image_name: String,
    pub graded_at: DateTime<Local>,
    pub providers: Vec<String>,
    pub default_max_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_count: Option<usize>,
    pub details: QuestionDetails,
    pub total_score: f64,
    pub max_total_score: f64,
    pub accuracy: f64,
    pub correct_count: usize,
    pub total_count: usize,
    pub provider_totals: Vec<ProviderTotal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_thresholds() {
        assert_eq!(Verdict::from_score(6.0, 10.0), Verdict::Correct);
        assert_eq!(Verdict::from_score(5.5, 10.0), Verdict::MostlyCorrect);
        assert_eq!(Verdict::from_score(0.5, 10.0), Verdict::PartiallyCorrect);
        assert_eq!(Verdict::from_score(0.0, 10.0), Verdict::Incorrect);
        assert!(!Verdict::MostlyCorrect.is_correct());
    }

    #[test]
    fn test_details_serialize_in_discovery_order() {
        let make = |id: &str| AggregatedQuestionResult {
            question_id: id.to_string(),
            group_name: None,
            sub_id: None,
            final_score: 1.0,
            max_score: 2.0,
            is_correct: false,
            verdict: Verdict::MostlyCorrect,
            comment: Verdict::MostlyCorrect.label().to_string(),
            analysis: String::new(),
            provider_results: vec![],
            region: None,
        };
        let mut details = QuestionDetails::default();
        for id in ["10", "2", "1"] {
            details.push(make(id));
        }

        let json = serde_json::to_string(&details).unwrap();
        let pos = |key: &str| json.find(&format!("\"{}\":{{", key)).unwrap();
        assert!(pos("10") < pos("2"));
        assert!(pos("2") < pos("1"));
        assert!(json.contains("\"verdict\":\"mostly_correct\""));
    }
}
