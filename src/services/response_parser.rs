//! 模型响应解析 - 业务能力层
//!
//! 只负责"从任意文本中恢复 JSON 结果"能力，不关心是哪个模型返回的
//!
//! 恢复策略按顺序尝试，第一个成功的生效：
//! 1. `FencedBlock`：代码块内容，按长度从长到短
//! 2. `OuterBrace`：全文第一个 `{` 到最后一个 `}`
//! 3. `BalancedRepair`：补齐未闭合的引号和括号后再解析

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::ParsedGrading;

/// 未给出 is_correct 时按得分比例推断
const CORRECT_RATIO: f64 = 0.6;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#+\s*").unwrap());
static NUMBERED_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\n])\n(\d+\.\s)").unwrap());

/// 单个恢复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    FencedBlock,
    OuterBrace,
    BalancedRepair,
}

impl RecoveryStrategy {
    pub const CHAIN: [RecoveryStrategy; 3] = [
        RecoveryStrategy::FencedBlock,
        RecoveryStrategy::OuterBrace,
        RecoveryStrategy::BalancedRepair,
    ];

    /// 尝试用本策略恢复出一个非空 JSON 对象
    pub fn attempt(self, raw: &str) -> Option<Map<String, Value>> {
        match self {
            RecoveryStrategy::FencedBlock => {
                let mut blocks: Vec<&str> = FENCED_BLOCK
                    .captures_iter(raw)
                    .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                    .collect();
                blocks.sort_by(|a, b| b.len().cmp(&a.len()));
                blocks
                    .into_iter()
                    .find_map(|block| brace_slice(block).and_then(strict_object))
            }
            RecoveryStrategy::OuterBrace => brace_slice(raw).and_then(strict_object),
            RecoveryStrategy::BalancedRepair => {
                let start = raw.find('{')?;
                strict_object(&balance(&raw[start..]))
            }
        }
    }
}

/// 依次执行恢复策略，返回第一个成功的结果
pub fn parse_object(raw: &str) -> Option<(RecoveryStrategy, Map<String, Value>)> {
    RecoveryStrategy::CHAIN
        .iter()
        .find_map(|strategy| strategy.attempt(raw).map(|obj| (*strategy, obj)))
}

/// 解析单题批改结果
///
/// 完全无法恢复时返回 None，由调用方当作该模型失败处理
pub fn parse(raw: &str, max_score: f64) -> Option<ParsedGrading> {
    let (strategy, object) = parse_object(raw)?;
    if strategy != RecoveryStrategy::FencedBlock {
        debug!("响应通过 {:?} 策略恢复", strategy);
    }
    Some(finalize(&object, max_score))
}

/// 分数裁剪到 `[0, max_score]`，清理分析文本
fn finalize(object: &Map<String, Value>, max_score: f64) -> ParsedGrading {
    let score = object
        .get("score")
        .and_then(number_of)
        .filter(|s| s.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, max_score.max(0.0));

    let is_correct = match object.get("is_correct") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => false,
        _ => score >= max_score * CORRECT_RATIO,
    };

    ParsedGrading {
        score,
        is_correct,
        analysis: object
            .get("analysis")
            .and_then(Value::as_str)
            .map(clean_analysis)
            .unwrap_or_default(),
        comment: object
            .get("comment")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_string())
            .unwrap_or_default(),
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('分').trim().parse().ok(),
        _ => None,
    }
}

/// 去掉 Markdown 强调与标题标记，并让编号小节各自成段
pub fn clean_analysis(text: &str) -> String {
    let text = text.replace(['·', '•'], "-");
    let text = BOLD.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = NUMBERED_SECTION.replace_all(&text, "$1\n\n$2");
    text.trim().to_string()
}

/// 第一个 `{` 到最后一个 `}`
fn brace_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 严格解析为非空对象；字符串内的裸控制字符先转义
fn strict_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(&escape_control_chars(text)) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

fn escape_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else if c.is_control() && (c as u32) < 0x20 {
                match c {
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    other => out.push_str(&format!("\\u{:04x}", other as u32)),
                }
                continue;
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

/// 补齐被截断的 JSON：闭合字符串，去掉悬空的逗号/冒号，按嵌套顺序补括号
fn balance(text: &str) -> String {
    let mut out = text.trim_end().to_string();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in out.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    } else {
        let trimmed_len = out.trim_end_matches([',', ' ', '\n', '\r', '\t']).len();
        out.truncate(trimmed_len);
        if out.ends_with(':') {
            out.push_str("null");
        }
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_object() {
        let parsed = parse(r#"{"score": 8, "is_correct": true, "comment": "ok"}"#, 10.0).unwrap();
        assert_eq!(parsed.score, 8.0);
        assert!(parsed.is_correct);
        assert_eq!(parsed.comment, "ok");
        assert_eq!(parsed.analysis, "");
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let raw = "好的，批改如下：\n```json\n{\"score\": 4.5, \"is_correct\": false, \"comment\": \"步骤缺失\"}\n```\n以上。";
        let (strategy, _) = parse_object(raw).unwrap();
        assert_eq!(strategy, RecoveryStrategy::FencedBlock);
        assert_eq!(parse(raw, 10.0).unwrap().score, 4.5);
    }

    #[test]
    fn test_longest_fenced_block_wins() {
        let raw = "```\n{\"score\": 1}\n```\n```json\n{\"score\": 2, \"comment\": \"longer block\"}\n```";
        assert_eq!(parse(raw, 10.0).unwrap().score, 2.0);
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "分析完毕 {\"score\": 6, \"is_correct\": true} 请查收";
        let (strategy, _) = parse_object(raw).unwrap();
        assert_eq!(strategy, RecoveryStrategy::OuterBrace);
    }

    #[test]
    fn test_missing_closing_brace() {
        let raw = r#"{"score":3,"is_correct":false,"comment":"weak""#;
        let (strategy, _) = parse_object(raw).unwrap();
        assert_eq!(strategy, RecoveryStrategy::BalancedRepair);
        let parsed = parse(raw, 10.0).unwrap();
        assert_eq!(parsed.score, 3.0);
        assert!(!parsed.is_correct);
        assert_eq!(parsed.comment, "weak");
    }

    #[test]
    fn test_missing_closing_quote() {
        let parsed = parse(r#"{"score": 5, "comment": "答案基本正确，但"#, 10.0).unwrap();
        assert_eq!(parsed.score, 5.0);
        assert_eq!(parsed.comment, "答案基本正确，但");
    }

    #[test]
    fn test_truncated_nested_object_keeps_later_fields() {
        let raw = r#"{"detail": {"step": 1}, "score": 7, "items": [1, 2,"#;
        let parsed = parse(raw, 10.0).unwrap();
        assert_eq!(parsed.score, 7.0);
    }

    #[test]
    fn test_prose_without_brace_is_none() {
        assert!(parse("这道题学生没有作答，给 0 分。", 10.0).is_none());
        assert!(parse("", 10.0).is_none());
    }

    #[test]
    fn test_empty_shell_and_non_object_are_none() {
        assert!(parse("{}", 10.0).is_none());
        assert!(parse("```json\n[1, 2]\n```", 10.0).is_none());
    }

    #[test]
    fn test_score_clamped_and_coerced() {
        assert_eq!(parse(r#"{"score": 15}"#, 10.0).unwrap().score, 10.0);
        assert_eq!(parse(r#"{"score": -2}"#, 10.0).unwrap().score, 0.0);
        assert_eq!(parse(r#"{"score": "7.5分"}"#, 10.0).unwrap().score, 7.5);
        assert_eq!(parse(r#"{"score": "满分", "comment": "x"}"#, 10.0).unwrap().score, 0.0);
        assert_eq!(parse(r#"{"comment": "no score"}"#, 10.0).unwrap().score, 0.0);
    }

    #[test]
    fn test_missing_is_correct_is_derived() {
        assert!(parse(r#"{"score": 6}"#, 10.0).unwrap().is_correct);
        assert!(!parse(r#"{"score": 5.5}"#, 10.0).unwrap().is_correct);
        assert!(parse(r#"{"score": 1, "is_correct": "TRUE"}"#, 10.0).unwrap().is_correct);
    }

    #[test]
    fn test_raw_newlines_inside_strings() {
        let raw = "{\"score\": 2, \"analysis\": \"第一行\n第二行\tend\"}";
        let parsed = parse(raw, 2.0).unwrap();
        assert_eq!(parsed.analysis, "第一行\n第二行\tend");
    }

    #[test]
    fn test_clean_analysis() {
        let text = "## 分析\n**1. 识别题目**：略\n2. 识别答案 · 选 B\n\n3. 结论";
        assert_eq!(
            clean_analysis(text),
            "分析\n\n1. 识别题目：略\n\n2. 识别答案 - 选 B\n\n3. 结论"
        );
    }
}
