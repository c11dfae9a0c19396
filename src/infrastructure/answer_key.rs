//! 标准答案文档读取与大题分值规则提取
//!
//! 支持 `.txt` / `.md` / `.docx`，其他格式只记录警告，不影响批改

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{AppError, AppResult, FileError};

/// 题型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionCategory {
    FillIn,
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Calculation,
    Analysis,
    Design,
    Programming,
}

/// 题型关键词，按匹配优先级排列
const CATEGORY_KEYWORDS: &[(QuestionCategory, &[&str])] = &[
    (QuestionCategory::FillIn, &["填空", "fill"]),
    (QuestionCategory::MultipleChoice, &["选择", "choice"]),
    (QuestionCategory::TrueFalse, &["判断", "true/false", "true or false"]),
    (QuestionCategory::ShortAnswer, &["简答", "short"]),
    (QuestionCategory::Calculation, &["计算", "calculat"]),
    (QuestionCategory::Analysis, &["分析", "analy"]),
    (QuestionCategory::Design, &["设计", "design"]),
    (QuestionCategory::Programming, &["编程", "program"]),
];

impl QuestionCategory {
    /// 从大题名称识别题型
    pub fn detect(section_name: &str) -> Option<Self> {
        let lowered = section_name.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
            .map(|(category, _)| *category)
    }

    /// 只有客观题有固定默认分值
    pub fn default_points(self) -> Option<f64> {
        match self {
            QuestionCategory::MultipleChoice => Some(3.0),
            QuestionCategory::FillIn | QuestionCategory::TrueFalse => Some(2.0),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QuestionCategory::FillIn => "填空",
            QuestionCategory::MultipleChoice => "选择",
            QuestionCategory::TrueFalse => "判断",
            QuestionCategory::ShortAnswer => "简答",
            QuestionCategory::Calculation => "计算",
            QuestionCategory::Analysis => "分析",
            QuestionCategory::Design => "设计",
            QuestionCategory::Programming => "编程",
        }
    }
}

/// `一、填空题（每空2分，共20分）`
static CHINESE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[一二三四五六七八九十]+[、.．]\s*([^\n（(]+)[（(].*?每[题空小][^\d]*(\d+(?:\.\d+)?)\s*分")
        .unwrap()
});

/// `2. 选择题（每小题3分）`
static NUMBERED_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+[.．、]\s*([^\n（(]+)[（(].*?每[题空小][^\d]*(\d+(?:\.\d+)?)\s*分").unwrap()
});

/// `I. Multiple-choice (10 questions, 3 points each)`
static ENGLISH_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[IVX]+[.、]\s*([^\n(]+)\(.*?(\d+(?:\.\d+)?)\s*points?\s+each").unwrap()
});

static DOCX_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").unwrap());

static DOCX_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br/>").unwrap()
});

/// 从答案文本中提取每道小题的分值规则（题型 → 分值）
///
/// 同一题型出现多次时以最后一次为准
pub fn extract_group_scores(text: &str) -> HashMap<QuestionCategory, f64> {
    let mut rules = HashMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let captures = CHINESE_SECTION
            .captures(line)
            .or_else(|| NUMBERED_SECTION.captures(line))
            .or_else(|| ENGLISH_SECTION.captures(line));
        let Some(caps) = captures else {
            continue;
        };

        let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let points = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        if let (Some(category), Some(points)) = (QuestionCategory::detect(name), points) {
            if points.is_finite() && points > 0.0 {
                debug!("答案分值规则: {} -> 每题 {} 分", category.label(), points);
                rules.insert(category, points);
            }
        }
    }
    rules
}

/// 读取标准答案文档，失败时记录警告并返回 None
pub async fn read_answer_key(path: &Path) -> Option<String> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || read_document(&owned)).await;

    match result {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            info!(
                "📄 已读取标准答案: {} ({} 字符)",
                path.display(),
                text.chars().count()
            );
            Some(text)
        }
        Ok(Ok(_)) => {
            warn!("标准答案文档为空: {}", path.display());
            None
        }
        Ok(Err(e)) => {
            warn!("读取标准答案失败，按无答案批改: {}", e);
            None
        }
        Err(e) => {
            warn!("读取标准答案任务失败: {}", e);
            None
        }
    }
}

fn read_document(path: &Path) -> AppResult<String> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let display = path.display().to_string();

    match extension.as_str() {
        "txt" | "md" => {
            std::fs::read_to_string(path).map_err(|e| AppError::file_read_failed(display, e))
        }
        "docx" => {
            let bytes = std::fs::read(path).map_err(|e| AppError::file_read_failed(&display, e))?;
            docx_text(&bytes).map_err(|message| {
                AppError::Other(format!("无法解析 docx ({}): {}", display, message))
            })
        }
        _ => Err(FileError::Unsupported { path: display }.into()),
    }
}

/// 提取 docx 正文的段落文本，每段一行
fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("Failed to read zip archive: {e}"))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| format!("Missing word/document.xml: {e}"))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("Failed to read document.xml: {e}"))?;

    let paragraphs: Vec<String> = DOCX_PARAGRAPH
        .find_iter(&xml)
        .map(|para| {
            DOCX_RUN
                .captures_iter(para.as_str())
                .map(|caps| match caps.get(1) {
                    Some(text) => unescape_xml(text.as_str()),
                    None if caps[0].starts_with("<w:tab") => "\t".to_string(),
                    None => "\n".to_string(),
                })
                .collect()
        })
        .collect();
    Ok(paragraphs.join("\n"))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
