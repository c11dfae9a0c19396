//! 报告写入服务 - 业务能力层
//!
//! 只负责"把报告写成 JSON 文件"能力，不关心流程

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::ExamReport;

/// 已写入的报告位置
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedReport {
    /// 对外可访问副本的文件名
    pub result_filename: String,
    /// 对外可访问副本的完整路径（轮询方读取的报告）
    pub report_path: PathBuf,
    /// 归档报告的完整路径
    pub archive_path: PathBuf,
}

/// 报告写入服务
///
/// 职责：
/// - 写入 `<grading_dir>/<stem>/grading_<stem>.json`
/// - 复制一份到 `<upload_dir>/grading_<stem>.json`
pub struct ReportWriter {
    grading_dir: PathBuf,
    upload_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(grading_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            grading_dir: grading_dir.into(),
            upload_dir: upload_dir.into(),
        }
    }

    /// 写入报告
    ///
    /// # 参数
    /// - `report`: 批改报告
    /// - `stem`: 试卷文件名（不含扩展名）
    pub async fn persist(&self, report: &ExamReport, stem: &str) -> AppResult<PersistedReport> {
        let stem = sanitize_stem(stem);
        let file_name = format!("grading_{}.json", stem);
        let json = serde_json::to_string_pretty(report)?;

        let report_dir = self.grading_dir.join(&stem);
        create_dir(&report_dir).await?;
        let archive_path = report_dir.join(&file_name);
        tokio::fs::write(&archive_path, json.as_bytes())
            .await
            .map_err(|e| AppError::file_write_failed(archive_path.display().to_string(), e))?;
        debug!("报告已归档: {}", archive_path.display());

        create_dir(&self.upload_dir).await?;
        let public_path = self.upload_dir.join(&file_name);
        tokio::fs::copy(&archive_path, &public_path)
            .await
            .map_err(|e| AppError::file_write_failed(public_path.display().to_string(), e))?;

        info!("💾 批改报告已保存: {}", public_path.display());
        Ok(PersistedReport {
            result_filename: file_name,
            report_path: public_path,
            archive_path,
        })
    }
}

async fn create_dir(dir: &Path) -> AppResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::file_write_failed(dir.display().to_string(), e))
}

/// 去掉路径分隔符，避免写出目录之外
fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "exam".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::score_aggregator::{ReportMeta, ScoreAggregator};

    #[tokio::test]
    async fn test_persist_writes_archive_and_public_copy() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("grading"), dir.path().join("uploads"));
        let report = ScoreAggregator::new(10.0).finish(ReportMeta {
            task_id: "t1".into(),
            image_name: "期中卷.jpg".into(),
            ..Default::default()
        });

        let persisted = writer.persist(&report, "期中卷").await.unwrap();
        assert_eq!(persisted.result_filename, "grading_期中卷.json");
        assert_eq!(
            persisted.archive_path,
            dir.path().join("grading").join("期中卷").join("grading_期中卷.json")
        );
        assert!(persisted.archive_path.exists());

        let public = dir.path().join("uploads").join("grading_期中卷.json");
        assert_eq!(persisted.report_path, public);
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(public).unwrap()).unwrap();
        assert_eq!(value["task_id"], "t1");
        assert_eq!(value["total_count"], 0);
        assert!(value["details"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_stem(".."), "exam");
        assert_eq!(sanitize_stem("卷 A"), "卷 A");
    }
}
