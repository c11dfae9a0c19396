pub mod grading;
pub mod question;
pub mod task;

pub use grading::{
    AggregatedQuestionResult, ExamReport, ParsedGrading, ProviderResult, ProviderTotal,
    QuestionDetails, Verdict,
};
pub use question::{numbered_sequence, split_unique_id, Question};
pub use task::{Task, TaskStatus};
