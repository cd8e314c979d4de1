use crate::catalog::{flags_with, FlagPolarity, SCREENING_CRITERIA};
use serde_json::json;

const JSON_ONLY: &str = "Return ONLY valid JSON. No markdown formatting.";

pub const EXTRACTION_SYSTEM: &str = "You are an expert startup analyst. Your job is to extract structured information from pitch decks and startup documents.\nExtract as much relevant information as possible. Be thorough and precise. If information is not present, note it as \"Not provided\".";

pub const RESEARCH_SYSTEM: &str = "You are a market research analyst. Based on the startup information provided, generate a comprehensive market research summary.\nFocus on verifiable facts and reasonable estimates. If you are unsure about specific data, note it as an estimate.";

pub const RECOMMENDATION_SYSTEM: &str = "You are a senior angel investor making a final investment recommendation.\nYou have access to the complete analysis including 7-criteria scores, green and red flags, and market research.\n\nScore scale (0-100):\n- 0-39: Strong Reject - Critical issues, not investment-ready\n- 40-59: Reject or Request More Information - Significant concerns\n- 60-79: Deep Dive Required - Promising but needs validation\n- 80-100: Recommend to IC - Strong opportunity, ready for investment\n\nBe calibrated. Most startups should score 40-70. Scores above 80 are rare and reserved for exceptional opportunities.";

const EXTRACTION_FIELDS: [(&str, &str); 12] = [
    ("startup_name", "name of the startup"),
    ("problem", "what problem they're solving"),
    ("solution", "their proposed solution"),
    ("team", "founder backgrounds, team size, key hires"),
    ("traction", "users, revenue, growth rates, key metrics"),
    ("market", "target market, TAM/SAM/SOM estimates, market trends"),
    ("business_model", "how they make money, pricing, unit economics"),
    ("competition", "competitors mentioned, differentiation claimed"),
    ("financials", "revenue, burn rate, projections if mentioned"),
    ("funding_ask", "amount raising, valuation, instrument type"),
    ("use_of_funds", "how they plan to use the investment"),
    ("notable_claims", "any notable claims or achievements mentioned"),
];

/// Context shared by the scoring and flag stages.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub founder_inputs: &'a str,
    pub extracted_data: &'a str,
    pub research_data: &'a str,
}

pub fn extraction_user() -> String {
    let schema = EXTRACTION_FIELDS
        .iter()
        .map(|(key, hint)| (key.to_string(), json!(hint)))
        .collect::<serde_json::Map<_, _>>();
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();

    format!(
        "Analyze this pitch deck and extract the following information in JSON format:\n\n{schema}\n\n{JSON_ONLY}"
    )
}

pub fn chunk_user(base: &str, part: usize, total: usize, chunk_text: &str) -> String {
    format!(
        "{base}\n\n[Part {part} of {total} — extract what you can from this portion.]\n\nPITCH DECK TEXT:\n{chunk_text}"
    )
}

pub fn merge_user(partials: &[String]) -> String {
    let parts = partials
        .iter()
        .enumerate()
        .map(|(index, partial)| format!("--- PART {} ---\n{}", index + 1, partial))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Merge the following {} partial pitch deck extractions into a single JSON object. For each field, use the most complete and accurate value found across all parts.\n\n{parts}\n\nReturn a single merged JSON with the same schema. {JSON_ONLY}",
        partials.len()
    )
}

pub fn research_user(startup_name: &str, sector: &str, description: &str) -> String {
    format!(
        "Research the following startup's market and competitive landscape:\n\nStartup: {startup_name}\nSector: {sector}\nDescription: {description}\n\nProvide a comprehensive market research analysis as JSON:\n{{\n  \"market_size\": \"<TAM estimate with reasoning>\",\n  \"competitors\": [\"<competitor 1 with brief description>\", \"<competitor 2>\"],\n  \"trends\": [\"<relevant market trend 1>\", \"<trend 2>\"],\n  \"sources\": [\"<data source or reference 1>\", \"<source 2>\"],\n  \"summary\": \"<2-3 paragraph market research summary covering market dynamics, competitive landscape, and growth potential>\"\n}}\n\n{JSON_ONLY}"
    )
}

pub fn scoring_system() -> String {
    let criteria = SCREENING_CRITERIA
        .iter()
        .enumerate()
        .map(|(index, criterion)| {
            let guide = criterion
                .scoring_guide
                .iter()
                .enumerate()
                .map(|(level, text)| format!("     {}/5: {}", level + 1, text))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "{}. {} (weight: {})\n   Description: {}\n   Scoring:\n{}",
                index + 1,
                criterion.name,
                criterion.weight,
                criterion.description,
                guide
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a senior angel investor analyst with 20+ years of experience evaluating early-stage startups.\nYou must score this startup on exactly {} criteria, each on a scale of 1-5.\nBe rigorous, evidence-based, and honest in your assessment. Do not inflate scores.\nEvery score must be justified with specific evidence from the provided data.\n\nTHE SCREENING CRITERIA:\n\n{criteria}",
        SCREENING_CRITERIA.len()
    )
}

pub fn scoring_user(context: AnalysisContext<'_>) -> String {
    let template = SCREENING_CRITERIA
        .iter()
        .map(|criterion| {
            json!({
                "criterion": criterion.name,
                "key": criterion.key,
                "weight": criterion.weight,
                "score": "<1-5>",
                "rationale": "<detailed 2-3 sentence rationale with specific evidence>",
            })
        })
        .collect::<Vec<_>>();
    let template = serde_json::to_string_pretty(&json!({ "scores": template })).unwrap_or_default();

    format!(
        "Based on ALL the data below, score this startup on each of the {} criteria (1-5).\n\n{}\n\nReturn your analysis as JSON with this exact structure:\n{template}\n\n{JSON_ONLY}",
        SCREENING_CRITERIA.len(),
        context_block(context)
    )
}

pub fn flags_system() -> String {
    let render = |polarity| {
        flags_with(polarity)
            .map(|template| {
                format!(
                    "- [{}] {}: {}",
                    template.category, template.name, template.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a startup evaluator trained on accelerator-style investment frameworks. Your job is to identify green flags (strengths/positive signals) and red flags (warnings/concerns) for this startup.\n\nUse the following framework categories: Team, Traction, Market, Product, Business Model, Deal Terms.\n\nReference flags to look for:\n\nGREEN FLAGS:\n{}\n\nRED FLAGS:\n{}\n\nBe specific and evidence-based. Only flag items where you have evidence. Each flag must include the supporting evidence.",
        render(FlagPolarity::Green),
        render(FlagPolarity::Red)
    )
}

pub fn flags_user(context: AnalysisContext<'_>) -> String {
    format!(
        "Analyze this startup and identify all green flags and red flags.\n\n{}\n\nReturn as JSON:\n{{\n  \"green_flags\": [\n    {{\"flag\": \"<flag name>\", \"category\": \"<Team|Traction|Market|Product|Business Model|Deal Terms>\", \"evidence\": \"<specific evidence>\"}}\n  ],\n  \"red_flags\": [\n    {{\"flag\": \"<flag name>\", \"category\": \"<Team|Traction|Market|Product|Business Model|Deal Terms>\", \"evidence\": \"<specific evidence>\"}}\n  ]\n}}\n\n{JSON_ONLY}",
        context_block(context)
    )
}

pub fn recommendation_user(
    founder_inputs: &str,
    criteria_scores: &str,
    flags: &str,
    research_data: &str,
) -> String {
    format!(
        "Generate a final investment recommendation based on all analysis data.\n\n## Founder Information:\n{founder_inputs}\n\n## Criteria Scores:\n{criteria_scores}\n\n## Green & Red Flags:\n{flags}\n\n## Market Research:\n{research_data}\n\nReturn as JSON:\n{{\n  \"overall_score\": <0-100>,\n  \"recommendation\": \"<1-2 sentence investment recommendation>\",\n  \"executive_summary\": \"<3-5 sentence executive summary of the opportunity>\",\n  \"detailed_rationale\": \"<500-800 word detailed analysis covering strengths, weaknesses, key risks, potential upside, and final reasoning for the score>\"\n}}\n\n{JSON_ONLY}"
    )
}

fn context_block(context: AnalysisContext<'_>) -> String {
    format!(
        "## Founder-Provided Information:\n{}\n\n## Extracted from Pitch Deck:\n{}\n\n## Market Research Findings:\n{}",
        context.founder_inputs, context.extracted_data, context.research_data
    )
}
