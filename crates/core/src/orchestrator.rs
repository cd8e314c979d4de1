use crate::cancel::CancelSignal;
use crate::catalog::compute_weighted_score;
use crate::chunking::DocumentAnalyzer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, StageError, StoreError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::gateway::InferenceGateway;
use crate::models::{
    AnalysisReport, AnalysisRequest, DocumentKind, ModelTier, Submission, SubmissionStatus,
};
use crate::progress::{ProgressEvent, ProgressPublisher, RunOutcome};
use crate::prompts::AnalysisContext;
use crate::quality::{
    extraction_stats, is_meaningful_extraction, NO_DOCUMENT_MARKER, NO_MEANINGFUL_CONTENT_MARKER,
};
use crate::stages::{self, StageKind, StageOutcome, StageRunner};
use crate::traits::SubmissionStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

const PERSIST_STEP: u8 = 6;
const PERSIST_MESSAGE: &str = "Saving analysis report...";
const INSUFFICIENT_CONTENT_MESSAGE: &str =
    "Pitch deck extraction returned insufficient content — proceeding with founder-provided data only.";

pub struct AnalysisPipeline {
    gateway: Arc<dyn InferenceGateway>,
    store: Arc<dyn SubmissionStore>,
    analyzer: DocumentAnalyzer,
    config: PipelineConfig,
}

impl AnalysisPipeline {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        store: Arc<dyn SubmissionStore>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_extractor(gateway, store, Arc::new(LopdfExtractor), config)
    }

    pub fn with_extractor(
        gateway: Arc<dyn InferenceGateway>,
        store: Arc<dyn SubmissionStore>,
        extractor: Arc<dyn PdfExtractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            analyzer: DocumentAnalyzer::new(extractor, config.chunking),
            config,
        }
    }

    /// Runs the pipeline on a task of its own. The handle resolves after the
    /// single terminal event has been sent on the returned stream.
    pub fn spawn(
        self: Arc<Self>,
        request: AnalysisRequest,
        cancel: CancelSignal,
    ) -> (
        JoinHandle<Result<AnalysisReport>>,
        UnboundedReceiver<ProgressEvent>,
    ) {
        let (progress, events) = ProgressPublisher::channel();
        let handle = tokio::spawn(async move {
            let result = self.run(&request, &progress, &cancel).await;
            progress.finish(outcome_of(&result));
            result
        });
        (handle, events)
    }

    /// Fatal only on lookup or persistence failure and on cancellation; in
    /// every fatal case the submission goes back to its pre-run status.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        progress: &ProgressPublisher,
        cancel: &CancelSignal,
    ) -> Result<AnalysisReport> {
        let submission_id = request.submission_id.as_str();
        let submission = match self.store.submission(submission_id).await {
            Ok(submission) => submission,
            Err(StoreError::SubmissionNotFound(_)) => {
                return Err(PipelineError::SubmissionNotFound(submission_id.to_string()))
            }
            Err(error) => return Err(PipelineError::Lookup(error)),
        };
        let prior_status = submission.status;

        self.store
            .update_status(submission_id, SubmissionStatus::Analyzing)
            .await
            .map_err(PipelineError::Status)?;
        info!(submission_id, model = request.model.id(), "analysis started");

        // Cancellation is only observed until the report is built; once
        // persisting starts it runs to completion.
        let staged = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = progress.closed() => Err(PipelineError::Cancelled),
            staged = self.execute(&submission, request.model, progress) => staged,
        };
        let result = match staged {
            Ok(report) => self.persist(report).await,
            Err(failure) => Err(failure),
        };

        match &result {
            Ok(report) => info!(
                submission_id,
                overall_score = report.overall_score,
                degraded = ?report.degraded_stages,
                "analysis completed"
            ),
            Err(failure) => {
                warn!(submission_id, error = %failure, "analysis aborted, restoring status");
                if let Err(revert) = self.store.update_status(submission_id, prior_status).await {
                    error!(submission_id, error = %revert, "failed to restore submission status");
                }
            }
        }

        result
    }

    async fn execute(
        &self,
        submission: &Submission,
        model: ModelTier,
        progress: &ProgressPublisher,
    ) -> Result<AnalysisReport> {
        let submission_id = submission.id.as_str();

        self.store
            .delete_report(submission_id)
            .await
            .map_err(PipelineError::Persist)?;
        let documents = self
            .store
            .documents(submission_id)
            .await
            .map_err(PipelineError::Lookup)?;

        let runner = StageRunner {
            gateway: self.gateway.as_ref(),
            model,
            budgets: self.config.max_tokens,
            submission_id,
        };
        let mut ledger = StageLedger::default();
        let founder_inputs = submission.founder_inputs();

        progress.step(StageKind::Extraction.step(), StageKind::Extraction.start_message());
        let on_chunk = |done: usize, total: usize| {
            progress.step(
                StageKind::Extraction.step(),
                format!("Extracting pitch deck... (part {done} of {total})"),
            );
        };
        let deck = documents
            .iter()
            .find(|document| document.file_type == DocumentKind::PitchDeck);
        let extraction = match deck {
            None => {
                runner
                    .extraction(&self.analyzer, None, self.config.document_stage_timeout, &on_chunk)
                    .await
            }
            Some(document) => match self.store.download(&document.storage_path).await {
                Ok(bytes) => {
                    runner
                        .extraction(
                            &self.analyzer,
                            Some(Arc::from(bytes)),
                            self.config.document_stage_timeout,
                            &on_chunk,
                        )
                        .await
                }
                Err(error) => {
                    warn!(
                        submission_id,
                        storage_path = %document.storage_path,
                        error = %error,
                        "pitch deck download failed"
                    );
                    stages::extraction_unavailable(StageError::from(error))
                }
            },
        };
        let mut extracted_data = ledger.absorb(StageKind::Extraction, extraction, progress);

        if extracted_data != NO_DOCUMENT_MARKER && !is_meaningful_extraction(&extracted_data) {
            warn!(
                submission_id,
                snippet = %extracted_data.chars().take(200).collect::<String>(),
                "extraction quality gate failed"
            );
            progress.step(StageKind::Extraction.step(), INSUFFICIENT_CONTENT_MESSAGE);
            extracted_data = NO_MEANINGFUL_CONTENT_MARKER.to_string();
        }
        ledger.keep_raw(StageKind::Extraction, extracted_data.clone());
        progress.extraction_stats(extraction_stats(&extracted_data));

        progress.step(StageKind::Research.step(), StageKind::Research.start_message());
        let research = ledger.absorb(StageKind::Research, runner.research(submission).await, progress);
        let research_data = serde_json::to_string_pretty(&research).unwrap_or_default();

        let context = AnalysisContext {
            founder_inputs: &founder_inputs,
            extracted_data: &extracted_data,
            research_data: &research_data,
        };

        progress.step(StageKind::Scoring.step(), StageKind::Scoring.start_message());
        let criteria_scores = ledger.absorb(StageKind::Scoring, runner.scoring(context).await, progress);

        progress.step(
            StageKind::FlagDetection.step(),
            StageKind::FlagDetection.start_message(),
        );
        let flags = ledger.absorb(
            StageKind::FlagDetection,
            runner.flag_detection(context).await,
            progress,
        );

        progress.step(
            StageKind::Recommendation.step(),
            StageKind::Recommendation.start_message(),
        );
        let recommendation = runner
            .recommendation(&founder_inputs, &criteria_scores, &flags, &research_data)
            .await;
        let recommendation = ledger.absorb(StageKind::Recommendation, recommendation, progress);

        progress.step(PERSIST_STEP, PERSIST_MESSAGE);
        let overall_score = recommendation
            .overall_score
            .unwrap_or_else(|| compute_weighted_score(&criteria_scores));

        let report = AnalysisReport {
            id: Uuid::new_v4().to_string(),
            submission_id: submission_id.to_string(),
            overall_score,
            recommendation: recommendation.recommendation,
            executive_summary: recommendation.executive_summary,
            criteria_scores,
            green_flags: flags.green_flags,
            red_flags: flags.red_flags,
            market_research: research,
            detailed_rationale: recommendation.detailed_rationale,
            raw_responses: ledger.raw,
            degraded_stages: ledger.degraded,
            generated_at: Utc::now(),
        };

        Ok(report)
    }

    async fn persist(&self, report: AnalysisReport) -> Result<AnalysisReport> {
        self.store
            .insert_report(&report)
            .await
            .map_err(PipelineError::Persist)?;
        self.store
            .update_status(&report.submission_id, SubmissionStatus::Completed)
            .await
            .map_err(PipelineError::Status)?;
        Ok(report)
    }
}

/// Folds stage outcomes into the report's raw map and degraded list.
#[derive(Default)]
struct StageLedger {
    raw: BTreeMap<String, String>,
    degraded: Vec<String>,
}

impl StageLedger {
    fn absorb<T>(
        &mut self,
        stage: StageKind,
        outcome: StageOutcome<T>,
        progress: &ProgressPublisher,
    ) -> T {
        self.keep_raw(stage, outcome.raw);
        if outcome.degraded {
            self.degraded.push(stage.label().to_string());
            progress.step(stage.step(), stage.degraded_message());
        }
        outcome.value
    }

    fn keep_raw(&mut self, stage: StageKind, raw: String) {
        self.raw.insert(stage.raw_key().to_string(), raw);
    }
}

fn outcome_of(result: &Result<AnalysisReport>) -> RunOutcome {
    match result {
        Ok(report) => RunOutcome::Completed {
            score: report.overall_score,
            recommendation: report.recommendation.clone(),
        },
        Err(error) => RunOutcome::Failed {
            error: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::catalog::{fallback_scores, SCREENING_CRITERIA};
    use crate::error::GatewayError;
    use crate::gateway::InferenceRequest;
    use crate::models::Document;
    use crate::prompts;
    use crate::stores::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Script = dyn Fn(StageKind) -> std::result::Result<String, GatewayError> + Send + Sync;

    /// Answers by recognising which stage's system prompt it was sent.
    struct ScriptedGateway {
        script: Box<Script>,
        stall_on: Option<StageKind>,
        calls: Mutex<Vec<StageKind>>,
    }

    impl ScriptedGateway {
        fn new(
            script: impl Fn(StageKind) -> std::result::Result<String, GatewayError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                stall_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn stalling_on(mut self, stage: StageKind) -> Self {
            self.stall_on = Some(stage);
            self
        }
    }

    fn stage_of(request: &InferenceRequest) -> StageKind {
        if request.system == prompts::EXTRACTION_SYSTEM {
            StageKind::Extraction
        } else if request.system == prompts::RESEARCH_SYSTEM {
            StageKind::Research
        } else if request.system == prompts::scoring_system() {
            StageKind::Scoring
        } else if request.system == prompts::flags_system() {
            StageKind::FlagDetection
        } else {
            StageKind::Recommendation
        }
    }

    #[async_trait]
    impl InferenceGateway for ScriptedGateway {
        async fn complete(
            &self,
            request: &InferenceRequest,
        ) -> std::result::Result<String, GatewayError> {
            let stage = stage_of(request);
            self.calls.lock().unwrap().push(stage);
            if self.stall_on == Some(stage) {
                std::future::pending::<()>().await;
            }
            (self.script)(stage)
        }
    }

    fn healthy(stage: StageKind) -> std::result::Result<String, GatewayError> {
        let text = match stage {
            StageKind::Extraction => json!({
                "company_name": "Acme",
                "problem": "Invoicing is slow",
                "solution": "Automated ledgers",
                "team": "Two repeat founders"
            })
            .to_string(),
            StageKind::Research => json!({
                "market_size": "$4B",
                "competitors": ["Ledgerly"],
                "trends": ["Automation"],
                "sources": [],
                "summary": "Growing market."
            })
            .to_string(),
            StageKind::Scoring => {
                let scores: Vec<_> = SCREENING_CRITERIA
                    .iter()
                    .map(|criterion| json!({"key": criterion.key, "score": 4, "rationale": "Solid."}))
                    .collect();
                json!({ "scores": scores }).to_string()
            }
            StageKind::FlagDetection => json!({
                "green_flags": [],
                "red_flags": [{"flag": "High burn rate", "category": "Business Model", "evidence": "Nine months runway"}]
            })
            .to_string(),
            StageKind::Recommendation => json!({
                "overall_score": 72,
                "recommendation": "Deep dive required.",
                "executive_summary": "Promising team.",
                "detailed_rationale": "Long form reasoning."
            })
            .to_string(),
        };
        Ok(text)
    }

    fn seeded_store(with_deck: bool) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let mut submission = Submission::new("sub-1", "Acme");
        submission.status = SubmissionStatus::InReview;
        submission.sector = Some("Fintech".to_string());
        store.put_submission(submission).unwrap();
        if with_deck {
            let document = Document {
                id: "doc-1".to_string(),
                submission_id: "sub-1".to_string(),
                file_name: "deck.pdf".to_string(),
                file_type: DocumentKind::PitchDeck,
                storage_path: "sub-1/deck.pdf".to_string(),
                file_size: Some(8),
                uploaded_at: Utc::now(),
            };
            store.put_document(document, b"%PDF-1.7".to_vec()).unwrap();
        }
        Arc::new(store)
    }

    fn pipeline(
        gateway: impl Into<Arc<ScriptedGateway>>,
        store: Arc<dyn SubmissionStore>,
    ) -> Arc<AnalysisPipeline> {
        let gateway: Arc<ScriptedGateway> = gateway.into();
        Arc::new(AnalysisPipeline::new(gateway, store, PipelineConfig::default()))
    }

    fn request(model: ModelTier) -> AnalysisRequest {
        AnalysisRequest::new("sub-1", model)
    }

    async fn drain(mut events: UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn missing_deck_uses_the_marker_and_still_completes() {
        let store = seeded_store(false);
        let gateway = Arc::new(ScriptedGateway::new(healthy));
        let pipeline = pipeline(gateway.clone(), store.clone());

        let (handle, events) = pipeline.spawn(request(ModelTier::Haiku), CancelSignal::never());
        let events = drain(events).await;
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.raw_responses["extraction"], NO_DOCUMENT_MARKER);
        assert!(!gateway.calls.lock().unwrap().contains(&StageKind::Extraction));
        assert_eq!(report.overall_score, 72);
        assert_eq!(report.criteria_scores.len(), SCREENING_CRITERIA.len());
        assert!(report.degraded_stages.is_empty());
        assert_eq!(store.reports("sub-1").await.unwrap().len(), 1);
        assert_eq!(
            store.submission("sub-1").await.unwrap().status,
            SubmissionStatus::Completed
        );

        let terminal: Vec<_> = events.iter().filter(|event| event.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(events.last().unwrap().done, Some(true));
        assert_eq!(events.last().unwrap().final_score, Some(72));
    }

    #[tokio::test]
    async fn scoring_failure_falls_back_to_neutral_scores() {
        let store = seeded_store(true);
        let gateway = ScriptedGateway::new(|stage| match stage {
            StageKind::Scoring => Err(GatewayError::Api {
                status: 500,
                body: "internal".to_string(),
            }),
            StageKind::Recommendation => Ok(json!({"recommendation": "Hold."}).to_string()),
            other => healthy(other),
        });
        let pipeline = pipeline(gateway, store.clone());

        let (handle, events) = pipeline.spawn(request(ModelTier::Opus), CancelSignal::never());
        let events = drain(events).await;
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.criteria_scores, fallback_scores());
        assert_eq!(report.overall_score, compute_weighted_score(&fallback_scores()));
        assert_eq!(report.overall_score, 60);
        assert_eq!(report.degraded_stages, vec!["scoring".to_string()]);
        assert!(report.raw_responses["extraction"].contains("\"company_name\": \"Acme\""));
        assert!(events
            .iter()
            .any(|event| event.message.as_deref() == Some(StageKind::Scoring.degraded_message())));
        assert!(events.iter().any(|event| event.extraction_stats.is_some()));
    }

    #[tokio::test]
    async fn thin_extraction_is_replaced_by_the_no_content_marker() {
        let store = seeded_store(true);
        let gateway = ScriptedGateway::new(|stage| match stage {
            StageKind::Extraction => Ok(json!({"company_name": "Acme", "team": "n/a"}).to_string()),
            other => healthy(other),
        });
        let report = pipeline(gateway, store)
            .run(
                &request(ModelTier::Haiku),
                &ProgressPublisher::silent(),
                &CancelSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(report.raw_responses["extraction"], NO_MEANINGFUL_CONTENT_MARKER);
    }

    #[tokio::test]
    async fn rerun_leaves_exactly_one_report() {
        let store = seeded_store(true);
        let pipeline = pipeline(ScriptedGateway::new(healthy), store.clone());
        let rerun = request(ModelTier::Haiku);

        for _ in 0..2 {
            pipeline
                .run(&rerun, &ProgressPublisher::silent(), &CancelSignal::never())
                .await
                .unwrap();
        }

        assert_eq!(store.reports("sub-1").await.unwrap().len(), 1);
    }

    struct RejectingInserts(Arc<MemoryStore>);

    #[async_trait]
    impl SubmissionStore for RejectingInserts {
        async fn submission(&self, id: &str) -> std::result::Result<Submission, StoreError> {
            self.0.submission(id).await
        }

        async fn documents(&self, id: &str) -> std::result::Result<Vec<Document>, StoreError> {
            self.0.documents(id).await
        }

        async fn download(&self, path: &str) -> std::result::Result<Vec<u8>, StoreError> {
            self.0.download(path).await
        }

        async fn delete_report(&self, id: &str) -> std::result::Result<(), StoreError> {
            self.0.delete_report(id).await
        }

        async fn insert_report(&self, _report: &AnalysisReport) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn reports(&self, id: &str) -> std::result::Result<Vec<AnalysisReport>, StoreError> {
            self.0.reports(id).await
        }

        async fn update_status(
            &self,
            id: &str,
            status: SubmissionStatus,
        ) -> std::result::Result<(), StoreError> {
            self.0.update_status(id, status).await
        }
    }

    #[tokio::test]
    async fn persist_failure_restores_status_with_one_error_event() {
        let inner = seeded_store(false);
        let store = Arc::new(RejectingInserts(inner.clone()));
        let pipeline = pipeline(ScriptedGateway::new(healthy), store);

        let (handle, events) = pipeline.spawn(request(ModelTier::Haiku), CancelSignal::never());
        let events = drain(events).await;
        let result = handle.await.unwrap();

        assert!(matches!(result, Err(PipelineError::Persist(_))));
        assert_eq!(
            inner.submission("sub-1").await.unwrap().status,
            SubmissionStatus::InReview
        );

        let terminal: Vec<_> = events.iter().filter(|event| event.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(
            terminal[0].error.as_deref(),
            Some("Failed to save report: store backend error: disk full")
        );
        assert!(events.iter().all(|event| event.done.is_none()));
    }

    /// Holds `update_status(Completed)` until released.
    struct SlowCompletion {
        inner: Arc<MemoryStore>,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl SubmissionStore for SlowCompletion {
        async fn submission(&self, id: &str) -> std::result::Result<Submission, StoreError> {
            self.inner.submission(id).await
        }

        async fn documents(&self, id: &str) -> std::result::Result<Vec<Document>, StoreError> {
            self.inner.documents(id).await
        }

        async fn download(&self, path: &str) -> std::result::Result<Vec<u8>, StoreError> {
            self.inner.download(path).await
        }

        async fn delete_report(&self, id: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete_report(id).await
        }

        async fn insert_report(&self, report: &AnalysisReport) -> std::result::Result<(), StoreError> {
            self.inner.insert_report(report).await
        }

        async fn reports(&self, id: &str) -> std::result::Result<Vec<AnalysisReport>, StoreError> {
            self.inner.reports(id).await
        }

        async fn update_status(
            &self,
            id: &str,
            status: SubmissionStatus,
        ) -> std::result::Result<(), StoreError> {
            if status == SubmissionStatus::Completed {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.update_status(id, status).await
        }
    }

    #[tokio::test]
    async fn cancel_during_persist_still_completes_the_submission() {
        let inner = seeded_store(false);
        let store = Arc::new(SlowCompletion {
            inner: inner.clone(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let pipeline = pipeline(ScriptedGateway::new(healthy), store.clone());
        let (cancel, signal) = cancel_pair();

        let (handle, events) = pipeline.spawn(request(ModelTier::Haiku), signal);
        store.entered.notified().await;
        cancel.cancel();
        drop(events);
        store.release.notify_one();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.overall_score, 72);
        assert_eq!(
            inner.submission("sub-1").await.unwrap().status,
            SubmissionStatus::Completed
        );
        assert_eq!(inner.reports("sub-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_submission_is_fatal() {
        let store = seeded_store(false);
        let pipeline = pipeline(ScriptedGateway::new(healthy), store);

        let missing = AnalysisRequest::new("missing", ModelTier::Haiku);
        let (handle, events) = pipeline.spawn(missing, CancelSignal::never());
        let events = drain(events).await;

        assert!(matches!(handle.await.unwrap(), Err(PipelineError::SubmissionNotFound(_))));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error.as_deref(), Some("Submission not found"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_run_and_restores_status() {
        let store = seeded_store(false);
        let gateway = ScriptedGateway::new(healthy).stalling_on(StageKind::Research);
        let pipeline = pipeline(gateway, store.clone());
        let (cancel, signal) = cancel_pair();

        let (handle, mut events) = pipeline.spawn(request(ModelTier::Haiku), signal);
        while let Some(event) = events.recv().await {
            if event.step == StageKind::Research.step() {
                cancel.cancel();
                break;
            }
        }

        assert!(matches!(handle.await.unwrap(), Err(PipelineError::Cancelled)));
        assert_eq!(
            store.submission("sub-1").await.unwrap().status,
            SubmissionStatus::InReview
        );
        assert!(store.reports("sub-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_consumer_cancels_the_run() {
        let store = seeded_store(false);
        let gateway = ScriptedGateway::new(healthy).stalling_on(StageKind::Research);
        let pipeline = pipeline(gateway, store.clone());

        let (handle, events) = pipeline.spawn(request(ModelTier::Haiku), CancelSignal::never());
        drop(events);

        assert!(matches!(handle.await.unwrap(), Err(PipelineError::Cancelled)));
        assert_eq!(
            store.submission("sub-1").await.unwrap().status,
            SubmissionStatus::InReview
        );
    }
}
