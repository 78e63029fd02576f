//! Deterministic scoring: rubric definitions, clamping, weighted aggregation
//! and the recommendation rule. No LLM arithmetic is trusted here.

use serde_json::Value;

use crate::evaluation::models::Recommendation;

pub const SCORE_MIN: f64 = 1.0;
pub const SCORE_MAX: f64 = 5.0;

/// Weight of the CV stage in the final blend; the project stage gets the rest.
pub const FINAL_CV_WEIGHT: f64 = 0.4;
pub const FINAL_PROJECT_WEIGHT: f64 = 0.6;

/// One weighted 1–5 criterion, with the per-level guidance shown to the model.
#[derive(Debug, Clone, Copy)]
pub struct Criterion {
    /// JSON field name the model must use.
    pub key: &'static str,
    pub label: &'static str,
    pub weight: f64,
    pub description: &'static str,
    /// Guidance for levels 1 through 5.
    pub levels: [&'static str; 5],
}

pub const CV_CRITERIA: [Criterion; 4] = [
    Criterion {
        key: "technical_skills_match",
        label: "Technical Skills Match",
        weight: 0.40,
        description: "Alignment with job requirements (backend, databases, APIs, cloud, AI/LLM)",
        levels: [
            "Irrelevant skills",
            "Few overlaps",
            "Partial match",
            "Strong match",
            "Excellent match + AI/LLM exposure",
        ],
    },
    Criterion {
        key: "experience_level",
        label: "Experience Level",
        weight: 0.25,
        description: "Years of experience and project complexity",
        levels: [
            "<1 yr / trivial projects",
            "1-2 yrs",
            "2-3 yrs with mid-scale projects",
            "3-4 yrs solid track record",
            "5+ yrs / high-impact projects",
        ],
    },
    Criterion {
        key: "relevant_achievements",
        label: "Relevant Achievements",
        weight: 0.20,
        description: "Impact of past work (scaling, performance, adoption)",
        levels: [
            "No clear achievements",
            "Minimal improvements",
            "Some measurable outcomes",
            "Significant contributions",
            "Major measurable impact",
        ],
    },
    Criterion {
        key: "cultural_fit",
        label: "Cultural/Collaboration Fit",
        weight: 0.15,
        description: "Communication, learning mindset, teamwork/leadership",
        levels: [
            "Not demonstrated",
            "Minimal",
            "Average",
            "Good",
            "Excellent and well-demonstrated",
        ],
    },
];

pub const PROJECT_CRITERIA: [Criterion; 5] = [
    Criterion {
        key: "correctness",
        label: "Correctness (Prompt & Chaining)",
        weight: 0.30,
        description: "Implements prompt design, LLM chaining, RAG context injection",
        levels: [
            "Not implemented",
            "Minimal attempt",
            "Works partially",
            "Works correctly",
            "Fully correct + thoughtful",
        ],
    },
    Criterion {
        key: "code_quality",
        label: "Code Quality & Structure",
        weight: 0.25,
        description: "Clean, modular, reusable, tested",
        levels: [
            "Poor",
            "Some structure",
            "Decent modularity",
            "Good structure + some tests",
            "Excellent quality + strong tests",
        ],
    },
    Criterion {
        key: "resilience_error_handling",
        label: "Resilience & Error Handling",
        weight: 0.20,
        description: "Handles long jobs, retries, randomness, API failures",
        levels: [
            "Missing",
            "Minimal",
            "Partial handling",
            "Solid handling",
            "Robust, production-ready",
        ],
    },
    Criterion {
        key: "documentation",
        label: "Documentation & Explanation",
        weight: 0.15,
        description: "README clarity, setup instructions, trade-off explanations",
        levels: [
            "Missing",
            "Minimal",
            "Adequate",
            "Clear",
            "Excellent + insightful",
        ],
    },
    Criterion {
        key: "creativity_bonus",
        label: "Creativity/Bonus",
        weight: 0.10,
        description: "Extra features beyond requirements",
        levels: [
            "None",
            "Very basic",
            "Useful extras",
            "Strong enhancements",
            "Outstanding creativity",
        ],
    },
];

/// Clamps a criterion score into [1, 5]. NaN maps to the minimum.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return SCORE_MIN;
    }
    score.clamp(SCORE_MIN, SCORE_MAX)
}

/// Reads a criterion score leniently: numbers and numeric strings are accepted,
/// anything else falls back to the minimum. The result is always clamped.
pub fn read_score(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    clamp_score(raw.unwrap_or(SCORE_MIN))
}

/// Σ(score_i × weight_i). Scores and criteria are paired in order.
pub fn weighted_score(scores: &[f64], criteria: &[Criterion]) -> f64 {
    scores
        .iter()
        .zip(criteria)
        .map(|(score, c)| score * c.weight)
        .sum()
}

/// Rounds to 2 decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Linear rescale of the 1–5 weighted CV score onto 0–1.
pub fn cv_match_rate(weighted: f64) -> f64 {
    let rate = round2((weighted - SCORE_MIN) / (SCORE_MAX - SCORE_MIN));
    // also folds -0.0 into 0.0
    if rate <= 0.0 {
        0.0
    } else {
        rate.min(1.0)
    }
}

/// The project's weighted 1–5 score, not rescaled.
pub fn project_score(weighted: f64) -> f64 {
    round2(weighted).clamp(SCORE_MIN, SCORE_MAX)
}

/// cv_match_rate × 5 × 0.4 + project_score × 0.6, rounded.
/// Spans 0.6 to 5.0: a zero match rate adds nothing, so the floor sits below 1.
pub fn final_score(cv_match_rate: f64, project_score: f64) -> f64 {
    round2(cv_match_rate * SCORE_MAX * FINAL_CV_WEIGHT + project_score * FINAL_PROJECT_WEIGHT)
}

/// Deterministic recommendation. Used whenever the model's literal is
/// missing or invalid.
pub fn determine_recommendation(cv_match_rate: f64, project_score: f64) -> Recommendation {
    if cv_match_rate > 0.75 && project_score > 4.0 {
        Recommendation::HighlyRecommended
    } else if cv_match_rate > 0.65 && project_score > 3.5 {
        Recommendation::Recommended
    } else if cv_match_rate > 0.50 || project_score > 3.0 {
        Recommendation::Consider
    } else {
        Recommendation::NotRecommended
    }
}
