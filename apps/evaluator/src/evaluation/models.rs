use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-criterion CV scores, each clamped to 1–5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvBreakdown {
    pub technical_skills_match: f64,
    pub experience_level: f64,
    pub relevant_achievements: f64,
    pub cultural_fit: f64,
}

impl CvBreakdown {
    /// Scores in `CV_CRITERIA` order.
    pub fn scores(&self) -> [f64; 4] {
        [
            self.technical_skills_match,
            self.experience_level,
            self.relevant_achievements,
            self.cultural_fit,
        ]
    }
}

/// Per-criterion project scores, each clamped to 1–5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectBreakdown {
    pub correctness: f64,
    pub code_quality: f64,
    pub resilience_error_handling: f64,
    pub documentation: f64,
    pub creativity_bonus: f64,
}

impl ProjectBreakdown {
    /// Scores in `PROJECT_CRITERIA` order.
    pub fn scores(&self) -> [f64; 5] {
        [
            self.correctness,
            self.code_quality,
            self.resilience_error_handling,
            self.documentation,
            self.creativity_bonus,
        ]
    }
}

/// Output of one scored stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult<B> {
    /// cv_match_rate (0–1) for the CV stage, project_score (1–5) for the project stage.
    pub score: f64,
    pub feedback: String,
    pub breakdown: B,
}

pub type CvEvaluation = StageResult<CvBreakdown>;
pub type ProjectEvaluation = StageResult<ProjectBreakdown>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Highly Recommended")]
    HighlyRecommended,
    #[serde(rename = "Recommended")]
    Recommended,
    #[serde(rename = "Consider")]
    Consider,
    #[serde(rename = "Not Recommended")]
    NotRecommended,
}

impl Recommendation {
    pub const ALL: [Recommendation; 4] = [
        Recommendation::HighlyRecommended,
        Recommendation::Recommended,
        Recommendation::Consider,
        Recommendation::NotRecommended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::HighlyRecommended => "Highly Recommended",
            Recommendation::Recommended => "Recommended",
            Recommendation::Consider => "Consider",
            Recommendation::NotRecommended => "Not Recommended",
        }
    }

    /// Exact match against the four literals (surrounding whitespace ignored).
    pub fn from_literal(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL.into_iter().find(|r| r.as_str() == text)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnalysis {
    pub summary: String,
    pub recommendation: Recommendation,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// Computed from the stage scores, never taken from the model.
    pub final_score: f64,
}

/// The composite record persisted per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    pub project_score: f64,
    pub project_feedback: String,
    pub final_score: f64,
    pub recommendation: Recommendation,
    pub overall_summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub cv_breakdown: CvBreakdown,
    pub project_breakdown: ProjectBreakdown,
    pub job_title: String,
    pub llm_model: String,
    pub processing_time_seconds: u64,
    pub evaluated_at: DateTime<Utc>,
}
