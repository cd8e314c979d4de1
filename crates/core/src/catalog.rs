use crate::models::CriterionScore;
use serde::Serialize;

pub const NEUTRAL_SCORE: u8 = 3;

/// Rationale attached to every criterion whose score had to be substituted.
pub const FALLBACK_RATIONALE: &str =
    "Automated scoring unavailable — re-analyze to generate accurate scores.";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Criterion {
    pub key: &'static str,
    pub name: &'static str,
    pub weight: f64,
    pub description: &'static str,
    /// Guide text for scores 1 through 5, in order.
    pub scoring_guide: [&'static str; 5],
}

pub const SCREENING_CRITERIA: [Criterion; 7] = [
    Criterion {
        key: "market_opportunity",
        name: "Market Opportunity",
        weight: 1.5,
        description: "Total addressable market size, growth rate, timing, and market dynamics",
        scoring_guide: [
            "Tiny or shrinking market (<$100M TAM), no clear growth trajectory",
            "Small market ($100M-$500M TAM) with limited growth potential",
            "Moderate market ($500M-$1B TAM) with steady growth",
            "Large market ($1B-$10B TAM) with strong growth trends",
            "Massive market (>$10B TAM) with explosive growth and perfect timing",
        ],
    },
    Criterion {
        key: "team_quality",
        name: "Team Quality",
        weight: 1.5,
        description: "Founder experience, domain expertise, team complementarity, and execution capability",
        scoring_guide: [
            "No relevant experience, solo founder with gaps, no domain expertise",
            "Limited experience, incomplete team, some domain knowledge",
            "Decent experience, reasonable team composition, adequate expertise",
            "Strong experience, complementary team, deep domain expertise",
            "Exceptional founders with proven track records, world-class team, unfair advantage",
        ],
    },
    Criterion {
        key: "traction",
        name: "Traction",
        weight: 1.3,
        description: "User growth, revenue, engagement metrics, and product-market fit indicators",
        scoring_guide: [
            "No product, no users, just an idea",
            "MVP built, <100 users, no revenue",
            "Working product, growing user base, early revenue or strong engagement",
            "Strong growth metrics (>20% MoM), meaningful revenue, clear PMF signals",
            "Exceptional growth (>50% MoM), significant revenue, undeniable PMF",
        ],
    },
    Criterion {
        key: "business_model",
        name: "Business Model",
        weight: 1.2,
        description: "Revenue model, unit economics, margins, scalability, and path to profitability",
        scoring_guide: [
            "No clear revenue model, unsustainable economics",
            "Revenue model identified but unproven, unclear unit economics",
            "Reasonable revenue model, acceptable unit economics, path to profitability visible",
            "Strong revenue model, good unit economics (LTV/CAC > 3x), scalable",
            "Exceptional unit economics, multiple revenue streams, highly scalable with clear profitability",
        ],
    },
    Criterion {
        key: "defensibility",
        name: "Defensibility",
        weight: 1.0,
        description: "Intellectual property, network effects, switching costs, and competitive moat",
        scoring_guide: [
            "No defensibility, easily replicated, no barriers to entry",
            "Minor first-mover advantage, limited IP or differentiation",
            "Some defensibility through technology, brand, or early network effects",
            "Strong moat via patents, network effects, data advantage, or high switching costs",
            "Exceptional defensibility with multiple compounding moats",
        ],
    },
    Criterion {
        key: "execution_risk",
        name: "Execution Risk",
        weight: 1.0,
        description: "Technical complexity, go-to-market risk, regulatory exposure, and operational challenges",
        scoring_guide: [
            "Extremely high risk: unproven tech, regulatory minefield, impossible GTM",
            "High risk: significant technical or market uncertainties",
            "Moderate risk: manageable challenges with clear mitigation strategies",
            "Low risk: proven tech stack, clear GTM, manageable regulatory environment",
            "Very low risk: straightforward execution with proven playbook",
        ],
    },
    Criterion {
        key: "valuation_fairness",
        name: "Valuation Fairness",
        weight: 0.8,
        description: "Valuation relative to stage, traction, market, and comparable deals",
        scoring_guide: [
            "Extremely overvalued relative to stage and traction (>5x above comps)",
            "Somewhat overvalued, aggressive terms for the stage",
            "Fair valuation aligned with stage and market conditions",
            "Attractive valuation with favorable terms for investors",
            "Exceptional value - significantly undervalued relative to opportunity",
        ],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagPolarity {
    Green,
    Red,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FlagTemplate {
    pub name: &'static str,
    pub category: &'static str,
    pub polarity: FlagPolarity,
    pub description: &'static str,
}

pub const FLAG_CATEGORIES: [&str; 6] = [
    "Team",
    "Traction",
    "Market",
    "Product",
    "Business Model",
    "Deal Terms",
];

const fn green(name: &'static str, category: &'static str, description: &'static str) -> FlagTemplate {
    FlagTemplate { name, category, polarity: FlagPolarity::Green, description }
}

const fn red(name: &'static str, category: &'static str, description: &'static str) -> FlagTemplate {
    FlagTemplate { name, category, polarity: FlagPolarity::Red, description }
}

/// Reference flags given to the model as context. Output is not restricted to these.
pub const FLAG_CATALOG: [FlagTemplate; 39] = [
    green("Exceptional founding team", "Team", "Founders have deep domain expertise, prior startup experience, or exceptional credentials"),
    green("Strong co-founder dynamics", "Team", "Complementary skills, long working history, clear role division"),
    green("Technical founder", "Team", "At least one founder can build the core product"),
    green("Domain expert founder", "Team", "Founder has lived the problem and understands it deeply"),
    green("Repeat founder", "Team", "Founder has previous startup experience (especially successful exits)"),
    green("Strong product-market fit", "Traction", "Users love the product, high retention, organic growth"),
    green("Impressive growth metrics", "Traction", "Week-over-week or month-over-month growth exceeding 15-20%"),
    green("Revenue generating", "Traction", "Already making money, even if small amounts"),
    green("High user engagement", "Traction", "Users are active, returning frequently, and spending time on product"),
    green("Organic growth", "Traction", "Growth driven by word-of-mouth rather than paid acquisition"),
    green("Large addressable market", "Market", "TAM exceeds $1B with clear path to capture meaningful share"),
    green("Market timing is right", "Market", "Structural changes make this the right time for this solution"),
    green("Underserved market segment", "Market", "Clear gap in existing solutions for target customers"),
    green("Defensible technology", "Product", "Patent-worthy innovation, proprietary algorithms, or unique data"),
    green("Strong network effects", "Product", "Product gets more valuable as more users join"),
    green("10x better than alternatives", "Product", "Dramatically better experience than existing solutions"),
    green("Strong unit economics", "Business Model", "LTV/CAC ratio above 3x, healthy margins"),
    green("Recurring revenue model", "Business Model", "SaaS, subscription, or other predictable revenue streams"),
    green("Capital efficient", "Business Model", "Achieving significant milestones with minimal capital"),
    green("Reasonable valuation", "Deal Terms", "Valuation aligned with stage, traction, and market"),
    green("Investor-friendly terms", "Deal Terms", "Standard terms without unusual protections or restrictions"),
    red("Solo non-technical founder", "Team", "Single founder without technical skills building a tech product"),
    red("Founder-market mismatch", "Team", "Founders lack relevant domain experience or understanding"),
    red("Co-founder conflict signs", "Team", "Evidence of disagreement, unclear roles, or recent team changes"),
    red("Part-time founders", "Team", "Founders not fully committed to the venture"),
    red("No traction after launch", "Traction", "Product launched but failed to gain meaningful users or revenue"),
    red("Vanity metrics", "Traction", "Reporting downloads/signups without retention or engagement data"),
    red("Declining metrics", "Traction", "Key metrics trending downward"),
    red("Small or shrinking market", "Market", "TAM below $500M or market is declining"),
    red("Winner-take-all market with incumbent", "Market", "Dominant player exists with strong network effects"),
    red("Heavy regulatory risk", "Market", "Significant regulatory uncertainty that could kill the business"),
    red("No clear differentiation", "Product", "Product is easily replicated with no meaningful moat"),
    red("Technology risk", "Product", "Core technology is unproven or faces fundamental challenges"),
    red("Poor unit economics", "Business Model", "CAC exceeds LTV, negative margins with no clear path to improvement"),
    red("No clear revenue model", "Business Model", "No plan for monetization or unrealistic revenue assumptions"),
    red("High burn rate", "Business Model", "Spending significantly exceeds revenue with long runway to profitability"),
    red("Overvalued for stage", "Deal Terms", "Valuation significantly above comparable deals for the stage"),
    red("Unfavorable cap table", "Deal Terms", "Too many investors, excessive dilution, or complicated structure"),
    red("Non-standard terms", "Deal Terms", "Unusual provisions that could harm investor interests"),
];

pub fn criterion(key: &str) -> Option<&'static Criterion> {
    SCREENING_CRITERIA.iter().find(|criterion| criterion.key == key)
}

pub fn flags_with(polarity: FlagPolarity) -> impl Iterator<Item = &'static FlagTemplate> {
    FLAG_CATALOG
        .iter()
        .filter(move |template| template.polarity == polarity)
}

/// Neutral entry for one criterion, used when its score is missing.
pub fn fallback_score(criterion: &Criterion) -> CriterionScore {
    CriterionScore {
        criterion: criterion.name.to_string(),
        key: criterion.key.to_string(),
        weight: criterion.weight,
        score: NEUTRAL_SCORE,
        rationale: FALLBACK_RATIONALE.to_string(),
    }
}

pub fn fallback_scores() -> Vec<CriterionScore> {
    SCREENING_CRITERIA.iter().map(fallback_score).collect()
}

/// Weighted mean of the catalog criteria scaled to 0-100. Each entry's own
/// weight is used when it is positive, the catalog weight otherwise. Criteria
/// missing from `scores` count as the neutral midpoint at the catalog weight.
pub fn compute_weighted_score(scores: &[CriterionScore]) -> u8 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for criterion in &SCREENING_CRITERIA {
        let (score, weight) = match scores.iter().find(|entry| entry.key == criterion.key) {
            Some(entry) if entry.weight.is_finite() && entry.weight > 0.0 => {
                (entry.score, entry.weight)
            }
            Some(entry) => (entry.score, criterion.weight),
            None => (NEUTRAL_SCORE, criterion.weight),
        };
        weighted_sum += weight * f64::from(score);
        weight_total += weight;
    }

    let average = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        f64::from(NEUTRAL_SCORE)
    };

    ((average / 5.0) * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(score: u8) -> Vec<CriterionScore> {
        SCREENING_CRITERIA
            .iter()
            .map(|criterion| CriterionScore {
                score,
                rationale: "uniform".to_string(),
                ..fallback_score(criterion)
            })
            .collect()
    }

    #[test]
    fn uniform_scores_map_exactly_onto_percent_scale() {
        for value in 1..=5u8 {
            let expected = ((f64::from(value) / 5.0) * 100.0).round() as u8;
            assert_eq!(compute_weighted_score(&uniform(value)), expected);
        }
    }

    #[test]
    fn missing_criteria_count_as_midpoint() {
        assert_eq!(compute_weighted_score(&[]), 60);
    }

    #[test]
    fn heavier_criteria_pull_the_average() {
        let mut scores = uniform(3);
        scores[0].score = 5;
        let boosted_heavy = compute_weighted_score(&scores);

        let mut scores = uniform(3);
        scores[6].score = 5;
        let boosted_light = compute_weighted_score(&scores);

        assert!(boosted_heavy > boosted_light);
    }

    #[test]
    fn entry_weights_override_the_catalog() {
        let mut scores = uniform(1);
        for entry in scores.iter_mut() {
            entry.weight = 1.0;
        }
        scores[6].score = 5;
        scores[6].weight = 6.0;
        // (6 * 1 + 6 * 5) / 12 = 3
        assert_eq!(compute_weighted_score(&scores), 60);
    }

    #[test]
    fn unusable_entry_weights_fall_back_to_the_catalog() {
        let mut scores = uniform(4);
        scores[0].score = 2;
        let at_catalog = compute_weighted_score(&scores);

        scores[0].weight = 0.0;
        scores[1].weight = f64::NAN;
        assert_eq!(compute_weighted_score(&scores), at_catalog);
    }

    #[test]
    fn catalog_has_seven_positive_weights_and_both_polarities() {
        assert_eq!(SCREENING_CRITERIA.len(), 7);
        assert!(SCREENING_CRITERIA.iter().all(|criterion| criterion.weight > 0.0));
        assert_eq!(flags_with(FlagPolarity::Green).count(), 21);
        assert_eq!(flags_with(FlagPolarity::Red).count(), 18);
        assert!(FLAG_CATALOG
            .iter()
            .all(|template| FLAG_CATEGORIES.contains(&template.category)));
    }
}
