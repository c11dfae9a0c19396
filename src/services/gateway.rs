//! 模型调用网关 - 业务能力层
//!
//! 只负责"把一张图和一段提示词交给某个模型"能力，不关心流程
//!
//! 每次调用：写临时图片 → 调用模型（带超时）→ 删除临时图片

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ParseError, ProviderError};
use crate::infrastructure::{ExamImage, TempArtifact};
use crate::models::{ProviderResult, Question};
use crate::providers::ProviderRegistry;
use crate::services::{prompt, response_parser};
use crate::utils::truncate_text;

/// 单题批改请求
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub question: &'a Question,
    pub max_score: f64,
    pub answer_key: Option<&'a str>,
}

/// 模型调用网关
///
/// 职责：
/// - 按 id 找到模型，未配置时不发请求
/// - 为每次调用准备独立的临时图片并在结束后清理
/// - 统一超时与错误类型
/// - 只处理单个 (题目, 模型) 组合
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    registry: ProviderRegistry,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl ProviderGateway {
    pub fn new(registry: ProviderRegistry, temp_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            registry,
            temp_dir: temp_dir.into(),
            timeout,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// 模型是否需要严格 JSON 提示（未知模型按 false）
    pub fn prefers_strict_json(&self, provider_id: &str) -> bool {
        self.registry
            .get(provider_id)
            .map(|p| p.prefers_strict_json())
            .unwrap_or(false)
    }

    /// 发送图片与提示词，返回模型原始文本
    pub async fn submit(
        &self,
        image: &ExamImage,
        prompt: &str,
        provider_id: &str,
        tag: &str,
    ) -> Result<String, ProviderError> {
        let provider = self
            .registry
            .get(provider_id)
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: provider_id.to_string(),
            })?;

        let artifact = TempArtifact::write(&self.temp_dir, &format!("{}_{}", provider_id, tag), image)
            .await
            .map_err(|e| ProviderError::call_failed(provider_id, e))?;

        let result = match artifact.payload().await {
            Ok(payload) => {
                match tokio::time::timeout(self.timeout, provider.complete(&payload, prompt)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: provider_id.to_string(),
                        secs: self.timeout.as_secs(),
                    }),
                }
            }
            Err(e) => Err(ProviderError::call_failed(provider_id, e)),
        };

        artifact.cleanup().await;
        result
    }

    /// 单题评分请求，返回模型原始文本
    pub async fn score(
        &self,
        image: &ExamImage,
        request: ScoreRequest<'_>,
        provider_id: &str,
    ) -> Result<String, ProviderError> {
        let prompt = prompt::grading_prompt(
            request.question,
            request.max_score,
            request.answer_key,
            self.prefers_strict_json(provider_id),
        );
        debug!(
            "[题目 {}] 发送给 {}，提示词 {} 字符",
            request.question.unique_id,
            provider_id,
            prompt.chars().count()
        );
        self.submit(image, &prompt, provider_id, &request.question.unique_id)
            .await
    }

    /// 评分并解析；任何失败都变成 0 分的单模型结果，不会中断整道题
    pub async fn grade(
        &self,
        image: &ExamImage,
        request: ScoreRequest<'_>,
        provider_id: &str,
    ) -> ProviderResult {
        let question_id = &request.question.unique_id;

        let raw = match self.score(image, request, provider_id).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[题目 {}] {}", question_id, e);
                return ProviderResult::failure(provider_id, e.to_string(), e.short_comment());
            }
        };
        debug!(
            "[题目 {}] {} 原始响应: {}",
            question_id,
            provider_id,
            truncate_text(&raw, 500)
        );

        match response_parser::parse(&raw, request.max_score) {
            Some(parsed) => {
                info!(
                    "[题目 {}] {} 评分: {}/{}",
                    question_id, provider_id, parsed.score, request.max_score
                );
                ProviderResult::from_parsed(provider_id, parsed)
            }
            None => {
                let err = ParseError::Unparseable {
                    provider: provider_id.to_string(),
                    preview: truncate_text(&raw, 200),
                };
                warn!("[题目 {}] {}", question_id, err);
                ProviderResult::failure(provider_id, err.to_string(), "返回格式无法解析")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};

    use super::*;
    use crate::infrastructure::ImagePayload;
    use crate::providers::VisionProvider;

    struct Scripted {
        id: &'static str,
        reply: Result<&'static str, &'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl VisionProvider for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn complete(&self, image: &ImagePayload, _: &str) -> Result<String, ProviderError> {
            assert!(!image.bytes.is_empty());
            tokio::time::sleep(self.delay).await;
            self.reply
                .map(str::to_string)
                .map_err(|m| ProviderError::call_failed(self.id, m))
        }
    }

    fn scripted(id: &'static str, reply: Result<&'static str, &'static str>) -> Arc<dyn VisionProvider> {
        Arc::new(Scripted {
            id,
            reply,
            delay: Duration::ZERO,
        })
    }

    fn image() -> ExamImage {
        ExamImage::from_dynamic("exam.png", DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
    }

    fn gateway(dir: &std::path::Path, providers: Vec<Arc<dyn VisionProvider>>) -> ProviderGateway {
        ProviderGateway::new(
            ProviderRegistry::with_providers(providers),
            dir,
            Duration::from_millis(200),
        )
    }

    fn request(question: &Question) -> ScoreRequest<'_> {
        ScoreRequest {
            question,
            max_score: 10.0,
            answer_key: None,
        }
    }

    #[tokio::test]
    async fn test_grade_success_cleans_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path(), vec![scripted("a", Ok(r#"{"score": 12, "comment": "好"}"#))]);
        let q = Question::numbered(1);

        let result = gw.grade(&image(), request(&q), "a").await;
        assert!(result.success);
        assert_eq!(result.score, 10.0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path(), vec![]);
        let q = Question::numbered(1);

        let err = gw.score(&image(), request(&q), "claude").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));
        assert!(!dir.path().read_dir().unwrap().any(|_| true));

        let result = gw.grade(&image(), request(&q), "claude").await;
        assert!(!result.success);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.comment, "API密钥未配置");
    }

    #[tokio::test]
    async fn test_call_failure_and_unparseable_become_zero() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(
            dir.path(),
            vec![scripted("down", Err("503")), scripted("prose", Ok("看不清题目"))],
        );
        let q = Question::numbered(2);

        let failed = gw.grade(&image(), request(&q), "down").await;
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("503"));

        let unparsed = gw.grade(&image(), request(&q), "prose").await;
        assert!(!unparsed.success);
        assert_eq!(unparsed.comment, "返回格式无法解析");
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let slow = Arc::new(Scripted {
            id: "slow",
            reply: Ok(r#"{"score": 5}"#),
            delay: Duration::from_secs(5),
        });
        let gw = gateway(dir.path(), vec![slow]);
        let q = Question::numbered(1);

        let err = gw.score(&image(), request(&q), "slow").await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
