//! Shared data model for the bintriage pipeline: hash and run lifecycle
//! records, binary metadata, and analysis results exchanged between the
//! ingestion, dispatch and reporting layers.

pub mod records;
pub mod report;

pub use records::HashRecord;
pub use records::HashStatus;
pub use records::HashSubmission;
pub use records::RunRecord;
pub use records::RunStatus;
pub use report::AnalysisResult;
pub use report::BinaryMetadata;
pub use report::Ioc;
