//! Delivery seam for accumulated analysis results.

use async_trait::async_trait;

use bintriage_protocol::AnalysisResult;

/// Receives the full result batch for a run. Delivery failures surface as
/// a run-level error after all per-hash work has finished.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, results: &[AnalysisResult], feed_id: &str) -> anyhow::Result<()>;
}

/// Sink that logs result counts and discards them, for runs configured
/// without a reporting target.
#[derive(Debug, Default)]
pub struct NullReportSink;

#[async_trait]
impl ReportSink for NullReportSink {
    async fn send(&self, results: &[AnalysisResult], feed_id: &str) -> anyhow::Result<()> {
        tracing::info!(
            feed_id = %feed_id,
            results = results.len(),
            "Discarding results, no report sink configured"
        );
        Ok(())
    }
}
