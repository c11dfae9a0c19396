//! 试卷图像与单次调用的临时图片
//!
//! - `ExamImage`：已解码、已合并的一张试卷图像，解码失败在任何模型调用前被拒绝
//! - `TempArtifact`：每次模型调用专用的临时 JPEG，调用结束后删除
//! - `ImagePayload`：发送给模型的图片字节

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, ImageError};

/// 临时文件删除的最大尝试次数
const CLEANUP_ATTEMPTS: usize = 3;
/// 两次删除尝试之间的等待
const CLEANUP_BACKOFF: Duration = Duration::from_millis(500);

/// 一张可解码的试卷图像
#[derive(Clone)]
pub struct ExamImage {
    name: String,
    image: Arc<DynamicImage>,
}

impl fmt::Debug for ExamImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExamImage")
            .field("name", &self.name)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

impl ExamImage {
    /// 从内存字节解码
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, ImageError> {
        let name = name.into();
        let image = image::load_from_memory(bytes).map_err(|e| ImageError::Undecodable {
            name: name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name,
            image: Arc::new(image),
        })
    }

    pub fn from_dynamic(name: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            name: name.into(),
            image: Arc::new(image),
        }
    }

    /// 读取并解码单个文件
    pub async fn open(path: &Path) -> AppResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "exam.jpg".to_string());

        let decoded = tokio::task::spawn_blocking(move || ExamImage::from_bytes(name, &bytes))
            .await
            .map_err(|e| AppError::Other(format!("图片解码任务失败: {}", e)))??;
        Ok(decoded)
    }

    /// 读取多页并纵向合并；只有一页时直接返回
    pub async fn open_pages(paths: &[PathBuf]) -> AppResult<Self> {
        let mut pages = Vec::with_capacity(paths.len());
        for path in paths {
            pages.push(Self::open(path).await?);
        }
        if pages.len() == 1 {
            return pages.pop().ok_or_else(|| ImageError::EmptyPageList.into());
        }
        let name = format!("{}.jpg", Uuid::new_v4());
        Ok(Self::merge_pages(name, pages)?)
    }

    /// 纵向合并多页：白色背景，宽度取最大值，每页水平居中
    pub fn merge_pages(name: impl Into<String>, pages: Vec<ExamImage>) -> Result<Self, ImageError> {
        if pages.is_empty() {
            return Err(ImageError::EmptyPageList);
        }
        let max_width = pages.iter().map(|p| p.width()).max().unwrap_or(0);
        let total_height: u32 = pages.iter().map(|p| p.height()).sum();

        let mut canvas = RgbImage::from_pixel(max_width, total_height, Rgb([255, 255, 255]));
        let mut y_offset: i64 = 0;
        for page in &pages {
            let x_offset = i64::from((max_width - page.width()) / 2);
            imageops::overlay(&mut canvas, &page.image.to_rgb8(), x_offset, y_offset);
            y_offset += i64::from(page.height());
        }

        Ok(Self::from_dynamic(name, DynamicImage::ImageRgb8(canvas)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 文件名去掉扩展名，用于报告命名
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }

    /// 编码为 JPEG（JPEG 不支持透明通道，先转 RGB）
    pub fn encode_jpeg(&self) -> Result<Vec<u8>, ImageError> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.image.to_rgb8())
            .write_to(&mut buf, ImageFormat::Jpeg)
            .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

/// 发送给模型的图片
#[derive(Clone)]
pub struct ImagePayload {
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImagePayload {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            mime: "image/jpeg",
            bytes,
        }
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64())
    }
}

/// 单次模型调用专用的临时图片文件
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    /// 把图片编码为 JPEG 写入临时目录
    pub async fn write(dir: &Path, tag: &str, image: &ExamImage) -> AppResult<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::file_write_failed(dir.display().to_string(), e))?;

        let image = image.clone();
        let bytes = tokio::task::spawn_blocking(move || image.encode_jpeg())
            .await
            .map_err(|e| AppError::Other(format!("图片编码任务失败: {}", e)))??;

        let path = dir.join(format!(
            "temp_{}_{}.jpg",
            sanitize_tag(tag),
            Uuid::new_v4().simple()
        ));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        debug!("临时图片已写入: {} ({} 字节)", path.display(), bytes.len());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取临时图片作为请求负载
    pub async fn payload(&self) -> AppResult<ImagePayload> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| AppError::file_read_failed(self.path.display().to_string(), e))?;
        Ok(ImagePayload::jpeg(bytes))
    }

    /// 删除临时文件，失败时有限次重试，最终失败只记录警告
    ///
    /// 返回文件是否已不存在
    pub async fn cleanup(self) -> bool {
        for attempt in 1..=CLEANUP_ATTEMPTS {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => return true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
                Err(e) if attempt < CLEANUP_ATTEMPTS => {
                    debug!(
                        "删除临时文件失败 (第 {} 次): {}: {}",
                        attempt,
                        self.path.display(),
                        e
                    );
                    tokio::time::sleep(CLEANUP_BACKOFF).await;
                }
                Err(e) => {
                    warn!("清理临时文件失败: {}: {}", self.path.display(), e);
                }
            }
        }
        false
    }
}

/// 调用中途异常退出（未走到 `cleanup`）时兜底删除
impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("清理临时文件失败: {}: {}", self.path.display(), e);
            }
        }
    }
}

fn sanitize_tag(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "call".to_string()
    } else {
        cleaned
    }
}
