pub mod gateway;
pub mod prompt;
pub mod report_writer;
pub mod response_parser;
pub mod score_aggregator;
pub mod structure_analyzer;

pub use gateway::{ProviderGateway, ScoreRequest};
pub use report_writer::{PersistedReport, ReportWriter};
pub use score_aggregator::{ReportMeta, ScoreAggregator};
pub use structure_analyzer::StructureAnalyzer;
