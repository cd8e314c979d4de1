//! The five analysis stages. Each returns a [`StageOutcome`] instead of an
//! error: a failed call or an unparseable answer degrades to a labelled
//! fallback and the run keeps going.

use crate::catalog::{fallback_score, fallback_scores, SCREENING_CRITERIA};
use crate::chunking::{DocumentAnalyzer, DocumentPrompt};
use crate::config::StageTokenBudgets;
use crate::error::StageError;
use crate::gateway::{InferenceGateway, InferenceRequest};
use crate::models::{CriterionScore, FlagSet, MarketResearch, ModelTier, Recommendation, Submission};
use crate::prompts::{self, AnalysisContext};
use crate::quality::{EXTRACTION_FAILED_MARKER, NO_DOCUMENT_MARKER};
use crate::structured::{parse_as, parse_structured};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const RESEARCH_FALLBACK_MARKET_SIZE: &str = "Unable to determine";
pub const RESEARCH_FALLBACK_SUMMARY: &str =
    "Market research unavailable — re-analyze to generate this section.";
pub const RECOMMENDATION_FALLBACK: &str =
    "Analysis partially completed. Review available criteria scores.";
pub const EXECUTIVE_SUMMARY_FALLBACK: &str =
    "Some analysis steps were unavailable. Re-analyze for a complete report.";
/// Rationale for a criterion the model scored without explaining.
pub const MISSING_RATIONALE: &str = "No rationale provided.";

const DEFAULT_SECTOR: &str = "Technology";
const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Extraction,
    Research,
    Scoring,
    FlagDetection,
    Recommendation,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Extraction,
        StageKind::Research,
        StageKind::Scoring,
        StageKind::FlagDetection,
        StageKind::Recommendation,
    ];

    pub fn step(self) -> u8 {
        match self {
            StageKind::Extraction => 1,
            StageKind::Research => 2,
            StageKind::Scoring => 3,
            StageKind::FlagDetection => 4,
            StageKind::Recommendation => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StageKind::Extraction => "extraction",
            StageKind::Research => "research",
            StageKind::Scoring => "scoring",
            StageKind::FlagDetection => "flags",
            StageKind::Recommendation => "recommendation",
        }
    }

    /// Key under which the stage's raw model text is kept on the report.
    pub fn raw_key(self) -> &'static str {
        match self {
            StageKind::Extraction => "extraction",
            StageKind::Research => "research",
            StageKind::Scoring => "criteria",
            StageKind::FlagDetection => "flags",
            StageKind::Recommendation => "overall",
        }
    }

    pub fn start_message(self) -> &'static str {
        match self {
            StageKind::Extraction => "Extracting pitch deck data...",
            StageKind::Research => "Conducting market research...",
            StageKind::Scoring => "Scoring 7 investment criteria...",
            StageKind::FlagDetection => "Detecting green & red flags...",
            StageKind::Recommendation => "Generating investment recommendation...",
        }
    }

    pub fn degraded_message(self) -> &'static str {
        match self {
            StageKind::Extraction => "Pitch deck extraction skipped — continuing...",
            StageKind::Research => "Market research unavailable — continuing...",
            StageKind::Scoring => "Criteria scoring unavailable — using defaults...",
            StageKind::FlagDetection => "Flag detection unavailable — continuing...",
            StageKind::Recommendation => "Recommendation unavailable — saving partial results...",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome<T> {
    pub value: T,
    /// Raw model text, empty when the call itself failed.
    pub raw: String,
    pub degraded: bool,
    pub error: Option<String>,
}

impl<T> StageOutcome<T> {
    pub fn clean(value: T, raw: impl Into<String>) -> Self {
        Self {
            value,
            raw: raw.into(),
            degraded: false,
            error: None,
        }
    }

    pub fn degraded(value: T, raw: impl Into<String>, error: impl ToString) -> Self {
        Self {
            value,
            raw: raw.into(),
            degraded: true,
            error: Some(error.to_string()),
        }
    }
}

/// Neutral research section used when the stage produces nothing usable.
pub fn fallback_research() -> MarketResearch {
    MarketResearch {
        market_size: RESEARCH_FALLBACK_MARKET_SIZE.to_string(),
        competitors: Vec::new(),
        trends: Vec::new(),
        sources: Vec::new(),
        summary: RESEARCH_FALLBACK_SUMMARY.to_string(),
    }
}

pub fn fallback_recommendation() -> Recommendation {
    Recommendation {
        overall_score: None,
        recommendation: RECOMMENDATION_FALLBACK.to_string(),
        executive_summary: EXECUTIVE_SUMMARY_FALLBACK.to_string(),
        detailed_rationale: String::new(),
    }
}

/// Extraction outcome for a pitch deck whose content could not be read.
pub fn extraction_unavailable(error: StageError) -> StageOutcome<String> {
    StageOutcome::degraded(EXTRACTION_FAILED_MARKER.to_string(), "", error)
}

/// Accepts `{"scores": [...]}` or a bare array. Every catalog criterion gets
/// exactly one entry; unknown keys are dropped, missing ones fall back. A list
/// in which no entry matches a catalog key is not usable.
pub fn normalize_scores(value: &Value) -> Option<Vec<CriterionScore>> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(fields) => fields.get("scores")?.as_array()?,
        _ => return None,
    };

    let mut matched = 0;
    let scores = SCREENING_CRITERIA
        .iter()
        .map(|criterion| {
            let scored = entries
                .iter()
                .find(|entry| entry.get("key").and_then(Value::as_str) == Some(criterion.key))
                .and_then(|entry| {
                    let score = numeric(entry.get("score")?)?;
                    let rationale = entry
                        .get("rationale")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|text| !text.is_empty())
                        .unwrap_or(MISSING_RATIONALE);
                    Some(CriterionScore {
                        criterion: criterion.name.to_string(),
                        key: criterion.key.to_string(),
                        weight: criterion.weight,
                        score: score.round().clamp(1.0, 5.0) as u8,
                        rationale: rationale.to_string(),
                    })
                });
            match scored {
                Some(score) => {
                    matched += 1;
                    score
                }
                None => fallback_score(criterion),
            }
        })
        .collect();

    (matched > 0).then_some(scores)
}

/// Reads the synthesis object leniently: a missing or non-numeric score
/// stays `None`, missing prose falls back to the labelled placeholders.
pub fn normalize_recommendation(value: &Value) -> Option<Recommendation> {
    let fields = value.as_object()?;
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    Some(Recommendation {
        overall_score: fields
            .get("overall_score")
            .and_then(numeric)
            .map(|score| score.round().clamp(0.0, 100.0) as u8),
        recommendation: text("recommendation")
            .unwrap_or_else(|| RECOMMENDATION_FALLBACK.to_string()),
        executive_summary: text("executive_summary")
            .unwrap_or_else(|| EXECUTIVE_SUMMARY_FALLBACK.to_string()),
        detailed_rationale: text("detailed_rationale").unwrap_or_default(),
    })
}

fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|number| number.is_finite())
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Everything a stage needs besides its own inputs.
pub struct StageRunner<'a> {
    pub gateway: &'a dyn InferenceGateway,
    pub model: ModelTier,
    pub budgets: StageTokenBudgets,
    pub submission_id: &'a str,
}

impl StageRunner<'_> {
    fn log_failure(&self, stage: StageKind, error: &dyn std::fmt::Display, raw: &str) {
        warn!(
            stage = stage.label(),
            submission_id = self.submission_id,
            error = %error,
            snippet = snippet(raw),
            "stage degraded"
        );
    }

    async fn call(&self, system: String, user: String, max_tokens: u32) -> Result<String, StageError> {
        let request = InferenceRequest::text(system, user, self.model).with_max_tokens(max_tokens);
        Ok(self.gateway.complete(&request).await?)
    }

    /// Step 1. `deck` is `None` when the submission has no pitch deck.
    pub async fn extraction(
        &self,
        analyzer: &DocumentAnalyzer,
        deck: Option<Arc<[u8]>>,
        stage_timeout: Duration,
        on_chunk: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> StageOutcome<String> {
        let Some(pdf) = deck else {
            info!(submission_id = self.submission_id, "no pitch deck on submission");
            return StageOutcome::clean(NO_DOCUMENT_MARKER.to_string(), "");
        };

        let prompt = DocumentPrompt {
            system: prompts::EXTRACTION_SYSTEM.to_string(),
            user: prompts::extraction_user(),
            model: self.model,
            max_tokens: self.budgets.extraction,
        };

        let result = match tokio::time::timeout(
            stage_timeout,
            analyzer.analyze(self.gateway, &prompt, pdf, on_chunk),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                what: "pitch deck extraction",
                after: stage_timeout,
            }),
        };

        match result {
            Ok(raw) => {
                let value = match parse_structured(&raw) {
                    Ok(structured) => {
                        serde_json::to_string_pretty(&structured.value).unwrap_or_else(|_| raw.clone())
                    }
                    Err(_) => raw.clone(),
                };
                StageOutcome::clean(value, raw)
            }
            Err(error) => {
                self.log_failure(StageKind::Extraction, &error, "");
                extraction_unavailable(error)
            }
        }
    }

    /// Step 2. Text that is not structured becomes the research summary.
    pub async fn research(&self, submission: &Submission) -> StageOutcome<MarketResearch> {
        let user = prompts::research_user(
            &submission.startup_name,
            submission.sector.as_deref().unwrap_or(DEFAULT_SECTOR),
            submission.description.as_deref().unwrap_or_default(),
        );

        let raw = match self
            .call(prompts::RESEARCH_SYSTEM.to_string(), user, self.budgets.research)
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                self.log_failure(StageKind::Research, &error, "");
                return StageOutcome::degraded(fallback_research(), "", error);
            }
        };

        match parse_as::<MarketResearch>(&raw) {
            Ok(research) => StageOutcome::clean(research, raw),
            Err(error) => {
                self.log_failure(StageKind::Research, &error, &raw);
                let research = MarketResearch {
                    summary: raw.clone(),
                    ..fallback_research()
                };
                StageOutcome::degraded(research, raw, error)
            }
        }
    }

    /// Step 3. Always yields one entry per catalog criterion.
    pub async fn scoring(&self, context: AnalysisContext<'_>) -> StageOutcome<Vec<CriterionScore>> {
        let raw = match self
            .call(
                prompts::scoring_system(),
                prompts::scoring_user(context),
                self.budgets.scoring,
            )
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                self.log_failure(StageKind::Scoring, &error, "");
                return StageOutcome::degraded(fallback_scores(), "", error);
            }
        };

        let scores = parse_structured(&raw)
            .ok()
            .and_then(|structured| normalize_scores(&structured.value));

        match scores {
            Some(scores) => StageOutcome::clean(scores, raw),
            None => {
                let error = "scoring response had no usable score list";
                self.log_failure(StageKind::Scoring, &error, &raw);
                StageOutcome::degraded(fallback_scores(), raw, error)
            }
        }
    }

    /// Step 4.
    pub async fn flag_detection(&self, context: AnalysisContext<'_>) -> StageOutcome<FlagSet> {
        let raw = match self
            .call(
                prompts::flags_system(),
                prompts::flags_user(context),
                self.budgets.flags,
            )
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                self.log_failure(StageKind::FlagDetection, &error, "");
                return StageOutcome::degraded(FlagSet::default(), "", error);
            }
        };

        match parse_as::<FlagSet>(&raw) {
            Ok(flags) => StageOutcome::clean(flags, raw),
            Err(error) => {
                self.log_failure(StageKind::FlagDetection, &error, &raw);
                StageOutcome::degraded(FlagSet::default(), raw, error)
            }
        }
    }

    /// Step 5. An unparseable answer is kept whole as the rationale.
    pub async fn recommendation(
        &self,
        founder_inputs: &str,
        scores: &[CriterionScore],
        flags: &FlagSet,
        research_data: &str,
    ) -> StageOutcome<Recommendation> {
        let criteria_json = serde_json::to_string_pretty(scores).unwrap_or_default();
        let flags_json = serde_json::to_string_pretty(flags).unwrap_or_default();
        let user =
            prompts::recommendation_user(founder_inputs, &criteria_json, &flags_json, research_data);

        let raw = match self
            .call(
                prompts::RECOMMENDATION_SYSTEM.to_string(),
                user,
                self.budgets.recommendation,
            )
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                self.log_failure(StageKind::Recommendation, &error, "");
                return StageOutcome::degraded(fallback_recommendation(), "", error);
            }
        };

        let parsed = parse_structured(&raw)
            .ok()
            .and_then(|structured| normalize_recommendation(&structured.value));

        match parsed {
            Some(recommendation) => StageOutcome::clean(recommendation, raw),
            None => {
                let error = "recommendation response was not a structured object";
                self.log_failure(StageKind::Recommendation, &error, &raw);
                let recommendation = Recommendation {
                    detailed_rationale: raw.clone(),
                    ..fallback_recommendation()
                };
                StageOutcome::degraded(recommendation, raw, error)
            }
        }
    }
}
