//! 基础设施层 - 图像、临时文件与答案文档

pub mod answer_key;
pub mod image_store;

pub use answer_key::{extract_group_scores, read_answer_key, QuestionCategory};
pub use image_store::{ExamImage, ImagePayload, TempArtifact};
