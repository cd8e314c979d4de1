use crate::error::StoreError;
use crate::models::{AnalysisReport, Document, Submission, SubmissionStatus};
use crate::traits::SubmissionStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// JSON-on-disk store rooted at a data directory:
///
/// ```text
/// submissions/<id>.json
/// documents/<submission_id>.json   (array of documents)
/// blobs/<storage_path>
/// reports/<submission_id>.json
/// ```
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn put_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let path = self.keyed("submissions", &submission.id)?;
        write_json(&path, submission).await
    }

    pub async fn put_document(&self, document: &Document, content: &[u8]) -> Result<(), StoreError> {
        let blob = self.blob_path(&document.storage_path)?;
        if let Some(parent) = blob.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&blob, content).await?;

        let listing = self.keyed("documents", &document.submission_id)?;
        let mut documents: Vec<Document> = read_json(&listing).await?.unwrap_or_default();
        documents.retain(|existing| existing.id != document.id);
        documents.push(document.clone());
        write_json(&listing, &documents).await
    }

    fn keyed(&self, table: &str, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(table).join(format!("{key}.json")))
    }

    fn blob_path(&self, storage_path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(storage_path);
        let normal = !storage_path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !normal {
            return Err(StoreError::InvalidKey(storage_path.to_string()));
        }
        Ok(self.root.join("blobs").join(relative))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Writes through a sibling temp file so readers never see half a document.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SubmissionStore for FsStore {
    async fn submission(&self, submission_id: &str) -> Result<Submission, StoreError> {
        read_json(&self.keyed("submissions", submission_id)?)
            .await?
            .ok_or_else(|| StoreError::SubmissionNotFound(submission_id.to_string()))
    }

    async fn documents(&self, submission_id: &str) -> Result<Vec<Document>, StoreError> {
        Ok(read_json(&self.keyed("documents", submission_id)?)
            .await?
            .unwrap_or_default())
    }

    async fn download(&self, storage_path: &str) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.blob_path(storage_path)?).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(StoreError::BlobNotFound(storage_path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_report(&self, submission_id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.keyed("reports", submission_id)?).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn insert_report(&self, report: &AnalysisReport) -> Result<(), StoreError> {
        let path = self.keyed("reports", &report.submission_id)?;
        if fs::try_exists(&path).await? {
            return Err(StoreError::Backend(format!(
                "a report already exists for submission {}",
                report.submission_id
            )));
        }
        write_json(&path, report).await
    }

    async fn reports(&self, submission_id: &str) -> Result<Vec<AnalysisReport>, StoreError> {
        let report: Option<AnalysisReport> =
            read_json(&self.keyed("reports", submission_id)?).await?;
        Ok(report.into_iter().collect())
    }

    async fn update_status(
        &self,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), StoreError> {
        let mut submission = self.submission(submission_id).await?;
        submission.status = status;
        submission.updated_at = Utc::now();
        self.put_submission(&submission).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;

    fn deck(submission_id: &str) -> Document {
        Document {
            id: "doc-1".to_string(),
            submission_id: submission_id.to_string(),
            file_name: "deck.pdf".to_string(),
            file_type: DocumentKind::PitchDeck,
            storage_path: format!("{submission_id}/deck.pdf"),
            file_size: Some(4),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn submissions_and_documents_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.put_submission(&Submission::new("sub-1", "Acme")).await.unwrap();
        store.put_document(&deck("sub-1"), b"%PDF").await.unwrap();
        store.put_document(&deck("sub-1"), b"%PDF-2").await.unwrap();

        let documents = store.documents("sub-1").await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(store.download("sub-1/deck.pdf").await.unwrap(), b"%PDF-2");

        store.update_status("sub-1", SubmissionStatus::Analyzing).await.unwrap();
        assert_eq!(
            store.submission("sub-1").await.unwrap().status,
            SubmissionStatus::Analyzing
        );
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert!(matches!(
            store.submission("../etc/passwd").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.download("../../secret.pdf").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn missing_rows_map_to_typed_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert!(matches!(
            store.submission("nope").await,
            Err(StoreError::SubmissionNotFound(_))
        ));
        assert!(store.documents("nope").await.unwrap().is_empty());
        assert!(store.reports("nope").await.unwrap().is_empty());
        store.delete_report("nope").await.unwrap();
    }
}
