//! Core pipeline for binary-hash triage: admission-time deduplication,
//! bounded-concurrency metadata ingestion, sequential analysis dispatch
//! and durable run state.

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod metadata;
pub mod report;
pub mod run;
pub mod source;
pub mod state;

pub use config::TriageConfig;
pub use dedup::DedupIndex;
pub use dedup::DedupOutcome;
pub use dispatch::AnalysisDispatch;
pub use engine::AnalysisEngine;
pub use engine::EngineRegistry;
pub use error::ConfigError;
pub use error::EngineError;
pub use error::FetchError;
pub use error::PipelineError;
pub use error::StorageError;
pub use error::ValidationError;
pub use ingestion::IngestionCoordinator;
pub use metadata::validate_metadata;
pub use report::NullReportSink;
pub use report::ReportSink;
pub use run::ClearOutcome;
pub use run::RunController;
pub use run::RunSummary;
pub use source::FetchReply;
pub use source::MetadataSource;
pub use state::MemoryStateStore;
pub use state::SledStateStore;
pub use state::StateStore;
pub use state::StoreRegistry;
