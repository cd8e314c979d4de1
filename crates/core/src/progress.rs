//! One-way progress stream for a pipeline run.
//!
//! [`ProgressPublisher::finish`] consumes the publisher, so a run emits
//! exactly one terminal event: success with `done`, or an error.

use crate::quality::ExtractionStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

pub const TOTAL_STEPS: u8 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub step: u8,
    pub total: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_stats: Option<ExtractionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_recommendation: Option<String>,
}

impl ProgressEvent {
    pub fn message(step: u8, message: impl Into<String>) -> Self {
        Self {
            step,
            total: TOTAL_STEPS,
            message: Some(message.into()),
            error: None,
            extraction_stats: None,
            done: None,
            final_score: None,
            final_recommendation: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.done == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { score: u8, recommendation: String },
    Failed { error: String },
}

#[derive(Debug)]
pub struct ProgressPublisher {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    step: AtomicU8,
}

impl ProgressPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(Some(tx)), rx)
    }

    /// Publisher that drops every event, for batch callers.
    pub fn silent() -> Self {
        Self::with_sender(None)
    }

    fn with_sender(tx: Option<mpsc::UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            tx,
            step: AtomicU8::new(0),
        }
    }

    pub fn current_step(&self) -> u8 {
        self.step.load(Ordering::Relaxed)
    }

    pub fn step(&self, step: u8, message: impl Into<String>) {
        self.step.store(step, Ordering::Relaxed);
        self.emit(ProgressEvent::message(step, message));
    }

    pub fn extraction_stats(&self, stats: ExtractionStats) {
        let step = self.current_step();
        self.emit(ProgressEvent {
            message: None,
            extraction_stats: Some(stats),
            ..ProgressEvent::message(step, "")
        });
    }

    /// Emits the single terminal event and closes the stream.
    pub fn finish(self, outcome: RunOutcome) {
        let event = match outcome {
            RunOutcome::Completed {
                score,
                recommendation,
            } => ProgressEvent {
                done: Some(true),
                final_score: Some(score),
                final_recommendation: Some(recommendation),
                ..ProgressEvent::message(TOTAL_STEPS, "Analysis complete!")
            },
            RunOutcome::Failed { error } => ProgressEvent {
                message: None,
                error: Some(error),
                ..ProgressEvent::message(self.current_step(), "")
            },
        };
        self.emit(event);
    }

    /// Resolves when the consumer has gone away; pends forever for the
    /// silent publisher.
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver is handled through `closed()`.
            let _ = tx.send(event);
        }
    }
}

/// Server-sent-events frame for one event.
pub fn encode_sse_frame(event: &ProgressEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {payload}\n\n")
}

/// Parses an append-only SSE body. Frames that are incomplete or do not
/// decode to an event are discarded.
pub fn decode_sse_frames(body: &str) -> Vec<ProgressEvent> {
    body.split("\n\n")
        .filter_map(|frame| {
            let data = frame
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("\n");
            if data.is_empty() {
                return None;
            }
            serde_json::from_str::<ProgressEvent>(&data).ok()
        })
        .collect()
}
