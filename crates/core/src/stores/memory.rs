use crate::error::StoreError;
use crate::models::{AnalysisReport, Document, Submission, SubmissionStatus};
use crate::traits::SubmissionStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    submissions: HashMap<String, Submission>,
    documents: HashMap<String, Vec<Document>>,
    blobs: HashMap<String, Vec<u8>>,
    reports: HashMap<String, Vec<AnalysisReport>>,
}

/// In-process store. Reports are kept as rows per submission, so a missing
/// delete would show up as more than one live report.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    pub fn put_submission(&self, submission: Submission) -> Result<(), StoreError> {
        self.tables()?
            .submissions
            .insert(submission.id.clone(), submission);
        Ok(())
    }

    pub fn put_document(&self, document: Document, content: Vec<u8>) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        tables.blobs.insert(document.storage_path.clone(), content);
        tables
            .documents
            .entry(document.submission_id.clone())
            .or_default()
            .push(document);
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn submission(&self, submission_id: &str) -> Result<Submission, StoreError> {
        self.tables()?
            .submissions
            .get(submission_id)
            .cloned()
            .ok_or_else(|| StoreError::SubmissionNotFound(submission_id.to_string()))
    }

    async fn documents(&self, submission_id: &str) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .tables()?
            .documents
            .get(submission_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download(&self, storage_path: &str) -> Result<Vec<u8>, StoreError> {
        self.tables()?
            .blobs
            .get(storage_path)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound(storage_path.to_string()))
    }

    async fn delete_report(&self, submission_id: &str) -> Result<(), StoreError> {
        self.tables()?.reports.remove(submission_id);
        Ok(())
    }

    async fn insert_report(&self, report: &AnalysisReport) -> Result<(), StoreError> {
        self.tables()?
            .reports
            .entry(report.submission_id.clone())
            .or_default()
            .push(report.clone());
        Ok(())
    }

    async fn reports(&self, submission_id: &str) -> Result<Vec<AnalysisReport>, StoreError> {
        Ok(self
            .tables()?
            .reports
            .get(submission_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let submission = tables
            .submissions
            .get_mut(submission_id)
            .ok_or_else(|| StoreError::SubmissionNotFound(submission_id.to_string()))?;
        submission.status = status;
        submission.updated_at = Utc::now();
        Ok(())
    }
}
