use serde::{Deserialize, Serialize};

/// 大题名与小题号之间的分隔符
pub const UNIQUE_ID_SEPARATOR: char = '-';

/// 待批改的一道小题
///
/// 由结构分析生成（或兜底按序号合成），之后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// 题号（如 "1"）
    pub id: String,
    /// 所属大题（如 "一、填空题"），无分组时为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// 汇总用的唯一键：有分组时为 `大题-题号`，否则即题号
    pub unique_id: String,
    /// 满分，未识别时为 None，批改前用默认满分补齐
    pub max_score: Option<f64>,
    /// 题号位置 `[ymin, xmin, ymax, xmax]`（0-1000 归一化）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<[f64; 4]>,
}

impl Question {
    /// 无分组的序号题
    pub fn numbered(number: usize) -> Self {
        Self::ungrouped(number.to_string(), None)
    }

    /// 无分组的题目，题号即唯一键
    pub fn ungrouped(id: impl Into<String>, max_score: Option<f64>) -> Self {
        let id = id.into();
        Self {
            unique_id: id.clone(),
            id,
            group: None,
            max_score,
            region: None,
        }
    }

    /// 带分组的题目
    pub fn grouped(
        group: impl Into<String>,
        id: impl Into<String>,
        max_score: Option<f64>,
        region: Option<[f64; 4]>,
    ) -> Self {
        let group = group.into();
        let id = id.into();
        Self {
            unique_id: format!("{}{}{}", group, UNIQUE_ID_SEPARATOR, id),
            id,
            group: Some(group),
            max_score,
            region,
        }
    }

    /// 实际使用的满分
    pub fn effective_max_score(&self, default_max_score: f64) -> f64 {
        match self.max_score {
            Some(score) if score.is_finite() && score > 0.0 => score,
            _ => default_max_score,
        }
    }

    /// 提示词与日志中的题目描述
    pub fn describe(&self) -> String {
        match &self.group {
            Some(group) => format!("{} 中的 第{}题", group, self.id),
            None => format!("第{}题", self.id),
        }
    }
}

/// 生成 `1..=count` 的序号题列表
pub fn numbered_sequence(count: usize) -> Vec<Question> {
    (1..=count).map(Question::numbered).collect()
}

/// 把 `大题-题号` 拆回 (大题, 题号)
///
/// 以最后一个分隔符为界，大题名本身可以包含分隔符
pub fn split_unique_id(unique_id: &str) -> Option<(&str, &str)> {
    unique_id.rsplit_once(UNIQUE_ID_SEPARATOR)
}
