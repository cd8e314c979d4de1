use crate::error::StoreError;
use crate::models::{AnalysisReport, Document, Submission, SubmissionStatus};
use async_trait::async_trait;

/// Read access to submissions and documents, and the single writer of
/// report and status rows. Replacing a report is delete-then-insert, not a
/// transaction; callers serialize runs per submission.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn submission(&self, submission_id: &str) -> Result<Submission, StoreError>;

    async fn documents(&self, submission_id: &str) -> Result<Vec<Document>, StoreError>;

    async fn download(&self, storage_path: &str) -> Result<Vec<u8>, StoreError>;

    async fn delete_report(&self, submission_id: &str) -> Result<(), StoreError>;

    async fn insert_report(&self, report: &AnalysisReport) -> Result<(), StoreError>;

    async fn reports(&self, submission_id: &str) -> Result<Vec<AnalysisReport>, StoreError>;

    async fn update_status(
        &self,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), StoreError>;
}
