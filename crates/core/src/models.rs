use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    InReview,
    Analyzing,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(default)]
    pub founder_id: Option<String>,
    pub startup_name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub hq_location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub founding_date: Option<String>,
    #[serde(default)]
    pub team_info: Option<String>,
    #[serde(default)]
    pub traction_info: Option<String>,
    #[serde(default)]
    pub business_model: Option<String>,
    #[serde(default)]
    pub funding_ask: Option<String>,
    #[serde(default)]
    pub use_of_funds: Option<String>,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(id: impl Into<String>, startup_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            founder_id: None,
            startup_name: startup_name.into(),
            website: None,
            sector: None,
            hq_location: None,
            description: None,
            founding_date: None,
            team_info: None,
            traction_info: None,
            business_model: None,
            funding_ask: None,
            use_of_funds: None,
            status: SubmissionStatus::Submitted,
            created_at: now,
            updated_at: now,
        }
    }

    /// Labelled founder-provided fields, one per line, empty ones omitted.
    pub fn founder_inputs(&self) -> String {
        let labelled = [
            ("Sector", &self.sector),
            ("Location", &self.hq_location),
            ("Website", &self.website),
            ("Description", &self.description),
            ("Team", &self.team_info),
            ("Traction", &self.traction_info),
            ("Business Model", &self.business_model),
            ("Funding Ask", &self.funding_ask),
            ("Use of Funds", &self.use_of_funds),
        ];

        let mut lines = vec![format!("Startup: {}", self.startup_name)];
        for (label, value) in labelled {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                lines.push(format!("{label}: {value}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PitchDeck,
    Financials,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub submission_id: String,
    pub file_name: String,
    pub file_type: DocumentKind,
    pub storage_path: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub criterion: String,
    pub key: String,
    pub weight: f64,
    pub score: u8,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Flag {
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FlagSet {
    #[serde(default)]
    pub green_flags: Vec<Flag>,
    #[serde(default)]
    pub red_flags: Vec<Flag>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketResearch {
    #[serde(default)]
    pub market_size: String,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    /// `None` when synthesis did not supply a usable number.
    pub overall_score: Option<u8>,
    pub recommendation: String,
    pub executive_summary: String,
    pub detailed_rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub id: String,
    pub submission_id: String,
    pub overall_score: u8,
    pub recommendation: String,
    pub executive_summary: String,
    pub criteria_scores: Vec<CriterionScore>,
    pub green_flags: Vec<Flag>,
    pub red_flags: Vec<Flag>,
    pub market_research: MarketResearch,
    pub detailed_rationale: String,
    /// Raw model text keyed by stage label (`extraction`, `research`, ...).
    pub raw_responses: BTreeMap<String, String>,
    #[serde(default)]
    pub degraded_stages: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ModelTier {
    #[default]
    Haiku,
    Sonnet,
    Opus,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [ModelTier::Haiku, ModelTier::Sonnet, ModelTier::Opus];

    pub fn id(self) -> &'static str {
        match self {
            ModelTier::Haiku => "claude-haiku-4-5-20251001",
            ModelTier::Sonnet => "claude-sonnet-4-6",
            ModelTier::Opus => "claude-opus-4-6",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.id() == id.trim())
    }

    /// Unknown or missing ids fall back to the default tier.
    pub fn resolve(requested: Option<&str>) -> Self {
        requested.and_then(Self::from_id).unwrap_or_default()
    }

    /// Cheap-tier vision is not good enough for dense slide layouts.
    pub fn for_document_vision(self) -> Self {
        match self {
            ModelTier::Haiku => ModelTier::Sonnet,
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub submission_id: String,
    pub model: ModelTier,
}

impl AnalysisRequest {
    pub fn new(submission_id: impl Into<String>, model: ModelTier) -> Self {
        Self {
            submission_id: submission_id.into(),
            model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founder_inputs_skip_empty_fields() {
        let mut submission = Submission::new("sub-1", "Acme");
        submission.sector = Some("Fintech".to_string());
        submission.website = Some("   ".to_string());
        submission.funding_ask = Some("$2M seed".to_string());

        assert_eq!(
            submission.founder_inputs(),
            "Startup: Acme\nSector: Fintech\nFunding Ask: $2M seed"
        );
    }

    #[test]
    fn unknown_model_ids_fall_back_to_default_tier() {
        assert_eq!(ModelTier::resolve(Some("gpt-4o")), ModelTier::Haiku);
        assert_eq!(ModelTier::resolve(None), ModelTier::Haiku);
        assert_eq!(ModelTier::resolve(Some("claude-opus-4-6")), ModelTier::Opus);
    }

    #[test]
    fn vision_upgrade_only_touches_cheapest_tier() {
        assert_eq!(ModelTier::Haiku.for_document_vision(), ModelTier::Sonnet);
        assert_eq!(ModelTier::Sonnet.for_document_vision(), ModelTier::Sonnet);
        assert_eq!(ModelTier::Opus.for_document_vision(), ModelTier::Opus);
    }

    #[test]
    fn status_serializes_snake_case() {
        let encoded = serde_json::to_string(&SubmissionStatus::InReview).unwrap();
        assert_eq!(encoded, "\"in_review\"");
    }
}
