//! 试卷结构分析 - 业务能力层
//!
//! 只负责"识别题目与分值"能力：一次模型调用，失败时兜底生成序号题
//!
//! 单题分值的确定顺序：
//! 1. 题目自身标注的分值
//! 2. 所属大题的默认分值
//! 3. 标准答案文本中该题型的"每题 X 分"
//! 4. 题型固定默认值（选择 3，填空 2，判断 2）
//! 5. 留空，批改前用默认满分补齐

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::StructureError;
use crate::infrastructure::{extract_group_scores, ExamImage, QuestionCategory};
use crate::models::{numbered_sequence, Question};
use crate::services::gateway::ProviderGateway;
use crate::services::{prompt, response_parser};
use crate::utils::truncate_text;

/// 未指定题目数量时兜底生成的题目数
pub const DEFAULT_FALLBACK_COUNT: usize = 10;
/// 按 total_questions 合成题目时的上限
const MAX_SYNTHESIZED: usize = 200;
const UNKNOWN_GROUP: &str = "未知大题";

/// 试卷结构分析服务
///
/// 职责：
/// - 调用一次模型识别大题、小题和分值
/// - 结合答案文本补齐分值
/// - 任何失败都退化为序号题列表，从不返回错误
pub struct StructureAnalyzer<'a> {
    gateway: &'a ProviderGateway,
    hint_limit: usize,
    fallback_count: usize,
}

impl<'a> StructureAnalyzer<'a> {
    pub fn new(gateway: &'a ProviderGateway, hint_limit: usize) -> Self {
        Self {
            gateway,
            hint_limit,
            fallback_count: DEFAULT_FALLBACK_COUNT,
        }
    }

    pub fn with_fallback_count(mut self, count: usize) -> Self {
        self.fallback_count = count;
        self
    }

    /// 识别试卷题目；失败时返回 `requested`（或默认数量）道序号题
    pub async fn analyze(
        &self,
        image: &ExamImage,
        answer_key: Option<&str>,
        provider_id: &str,
        requested: Option<usize>,
    ) -> Vec<Question> {
        match self.discover(image, answer_key, provider_id).await {
            Ok(questions) => {
                info!("✅ 试卷结构分析完成，识别到 {} 道题", questions.len());
                questions
            }
            Err(e) => {
                let count = requested.unwrap_or(self.fallback_count);
                warn!("⚠️ 试卷结构分析失败 ({})，按 {} 道序号题批改", e, count);
                numbered_sequence(count)
            }
        }
    }

    async fn discover(
        &self,
        image: &ExamImage,
        answer_key: Option<&str>,
        provider_id: &str,
    ) -> Result<Vec<Question>, StructureError> {
        let prompt = prompt::structure_prompt(
            answer_key,
            self.hint_limit,
            self.gateway.prefers_strict_json(provider_id),
        );
        info!("🔍 使用 {} 分析试卷结构", provider_id);
        let raw = self
            .gateway
            .submit(image, &prompt, provider_id, "structure")
            .await?;

        let (_, object) = response_parser::parse_object(&raw).ok_or_else(|| {
            warn!("结构分析响应无法解析: {}", truncate_text(&raw, 500));
            StructureError::Unparseable
        })?;

        let rules = answer_key.map(extract_group_scores).unwrap_or_default();
        questions_from_structure(&object, &rules)
    }
}

/// 把结构分析 JSON 转成题目列表
pub fn questions_from_structure(
    object: &Map<String, Value>,
    rules: &HashMap<QuestionCategory, f64>,
) -> Result<Vec<Question>, StructureError> {
    let total = object
        .get("total_questions")
        .and_then(number_of)
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| (n as usize).min(MAX_SYNTHESIZED));

    let mut questions = match object.get("groups").and_then(Value::as_array) {
        Some(groups) => grouped_questions(groups, rules),
        None => match object.get("question_numbers").and_then(Value::as_array) {
            Some(numbers) => numbers
                .iter()
                .filter_map(id_of)
                .map(|id| Question::ungrouped(id, None))
                .collect(),
            None => Vec::new(),
        },
    };

    if questions.is_empty() {
        if let Some(total) = total {
            warn!("结构分析未列出题目，按 total_questions={} 生成序号题", total);
            questions = numbered_sequence(total);
        }
    }

    let mut seen = HashSet::new();
    questions.retain(|q| {
        let fresh = seen.insert(q.unique_id.clone());
        if !fresh {
            warn!("重复的题目 {}，已忽略", q.unique_id);
        }
        fresh
    });

    if questions.is_empty() {
        return Err(StructureError::NoQuestions);
    }
    Ok(questions)
}

fn grouped_questions(groups: &[Value], rules: &HashMap<QuestionCategory, f64>) -> Vec<Question> {
    let mut questions = Vec::new();
    for group in groups.iter().filter_map(Value::as_object) {
        let name = group
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_GROUP);
        let group_default = group.get("default_score").and_then(points_of);

        let Some(items) = group.get("questions").and_then(Value::as_array) else {
            continue;
        };
        for item in items.iter().filter_map(Value::as_object) {
            let Some(id) = item.get("id").and_then(id_of) else {
                continue;
            };
            let category = QuestionCategory::detect(name).or_else(|| {
                item.get("type")
                    .and_then(Value::as_str)
                    .and_then(QuestionCategory::detect)
            });

            let max_score = item
                .get("score")
                .and_then(points_of)
                .or(group_default)
                .or_else(|| category.and_then(|c| rules.get(&c).copied()))
                .or_else(|| category.and_then(QuestionCategory::default_points));

            let region = item.get("box_2d").and_then(region_of);
            questions.push(Question::grouped(name, id, max_score, region));
        }
    }
    questions
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('分').trim().parse().ok(),
        _ => None,
    }
}

/// 只接受有限正数
fn points_of(value: &Value) -> Option<f64> {
    number_of(value).filter(|p| p.is_finite() && *p > 0.0)
}

fn id_of(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.trim().trim_end_matches(['.', '、', '．']).trim().to_string(),
        Value::Number(n) => match (n.as_u64(), n.as_f64()) {
            (Some(u), _) => u.to_string(),
            (None, Some(f)) => f.to_string(),
            _ => return None,
        },
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn region_of(value: &Value) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut region = [0.0; 4];
    for (slot, item) in region.iter_mut().zip(items) {
        *slot = item.as_f64()?;
    }
    Some(region)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use serde_json::json;

    use super::*;
    use crate::error::ProviderError;
    use crate::infrastructure::ImagePayload;
    use crate::providers::{ProviderRegistry, VisionProvider};

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_grouped_structure_with_score_precedence() {
        let structure = object(json!({
            "total_questions": 5,
            "groups": [
                {
                    "name": "一、填空题",
                    "default_score": "1.5",
                    "questions": [
                        {"id": "1", "score": 4, "box_2d": [1, 2, 3, 4]},
                        {"id": 2, "box_2d": [1, 2, 3]}
                    ]
                },
                {
                    "name": "二、简答题",
                    "questions": [{"id": "1.", "score": null}]
                },
                {
                    "name": "三、选择题",
                    "questions": [{"id": "1", "score": -3}]
                },
                {
                    "name": "四、附加题",
                    "questions": [{"id": "1"}]
                }
            ]
        }));
        let mut rules = HashMap::new();
        rules.insert(QuestionCategory::ShortAnswer, 10.0);

        let questions = questions_from_structure(&structure, &rules).unwrap();
        let summary: Vec<(&str, Option<f64>)> = questions
            .iter()
            .map(|q| (q.unique_id.as_str(), q.max_score))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("一、填空题-1", Some(4.0)),
                ("一、填空题-2", Some(1.5)),
                ("二、简答题-1", Some(10.0)),
                ("三、选择题-1", Some(3.0)),
                ("四、附加题-1", None),
            ]
        );
        assert_eq!(questions[0].region, Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(questions[1].region, None);
    }

    #[test]
    fn test_flat_structure_and_synthesis() {
        let flat = object(json!({"total_questions": 3, "question_numbers": ["1", 2, "3"]}));
        let ids: Vec<String> = questions_from_structure(&flat, &HashMap::new())
            .unwrap()
            .into_iter()
            .map(|q| q.unique_id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let count_only = object(json!({"total_questions": 4}));
        assert_eq!(questions_from_structure(&count_only, &HashMap::new()).unwrap().len(), 4);

        let empty_groups = object(json!({"total_questions": 2, "groups": []}));
        assert_eq!(questions_from_structure(&empty_groups, &HashMap::new()).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicates_dropped_and_empty_is_error() {
        let dup = object(json!({
            "groups": [{"name": "一、选择题", "questions": [{"id": "1"}, {"id": "1"}, {"id": "2"}]}]
        }));
        assert_eq!(questions_from_structure(&dup, &HashMap::new()).unwrap().len(), 2);

        let nothing = object(json!({"groups": [{"name": "一、选择题", "questions": []}]}));
        assert!(matches!(
            questions_from_structure(&nothing, &HashMap::new()),
            Err(StructureError::NoQuestions)
        ));
    }

    struct Reply(Result<&'static str, ()>);

    #[async_trait]
    impl VisionProvider for Reply {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _: &ImagePayload, prompt: &str) -> Result<String, ProviderError> {
            assert!(prompt.contains("题目结构"));
            self.0
                .map(str::to_string)
                .map_err(|_| ProviderError::call_failed("scripted", "boom"))
        }
    }

    async fn analyze_with(reply: Result<&'static str, ()>, requested: Option<usize>) -> Vec<Question> {
        let dir = tempfile::tempdir().unwrap();
        let gateway = ProviderGateway::new(
            ProviderRegistry::with_providers(vec![Arc::new(Reply(reply))]),
            dir.path(),
            Duration::from_secs(5),
        );
        let image = ExamImage::from_dynamic("exam.png", DynamicImage::ImageRgb8(RgbImage::new(4, 4)));
        StructureAnalyzer::new(&gateway, 3000)
            .analyze(&image, None, "scripted", requested)
            .await
    }

    #[tokio::test]
    async fn test_analyze_parses_fenced_response() {
        let questions = analyze_with(
            Ok("```json\n{\"groups\": [{\"name\": \"一、判断题\", \"questions\": [{\"id\": \"1\"}]}]}\n```"),
            None,
        )
        .await;
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].max_score, Some(2.0));
        assert_eq!(questions[0].group.as_deref(), Some("一、判断题"));
    }

    #[tokio::test]
    async fn test_analyze_falls_back_to_ten_numbered_questions() {
        let questions = analyze_with(Err(()), None).await;
        let ids: Vec<&str> = questions.iter().map(|q| q.unique_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
        assert!(questions.iter().all(|q| q.group.is_none()));

        let unparsed = analyze_with(Ok("这张试卷共有若干题"), Some(3)).await;
        assert_eq!(unparsed.len(), 3);
    }
}
