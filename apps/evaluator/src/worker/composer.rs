use std::time::Duration;

use chrono::Utc;

use crate::evaluation::models::{CvEvaluation, EvaluationResult, FinalAnalysis, ProjectEvaluation};

/// Flattens the three stage outputs plus run metadata into the stored record.
pub fn compose_result(
    cv: CvEvaluation,
    project: ProjectEvaluation,
    analysis: FinalAnalysis,
    job_title: &str,
    llm_model: &str,
    elapsed: Duration,
) -> EvaluationResult {
    EvaluationResult {
        cv_match_rate: cv.score,
        cv_feedback: cv.feedback,
        project_score: project.score,
        project_feedback: project.feedback,
        final_score: analysis.final_score,
        recommendation: analysis.recommendation,
        overall_summary: analysis.summary,
        strengths: analysis.strengths,
        weaknesses: analysis.weaknesses,
        cv_breakdown: cv.breakdown,
        project_breakdown: project.breakdown,
        job_title: job_title.to_string(),
        llm_model: llm_model.to_string(),
        processing_time_seconds: elapsed.as_secs_f64().round() as u64,
        evaluated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::models::{CvBreakdown, ProjectBreakdown, Recommendation, StageResult};

    #[test]
    fn test_compose_carries_stage_scores_unchanged() {
        let cv = StageResult {
            score: 0.79,
            feedback: "cv".to_string(),
            breakdown: CvBreakdown {
                technical_skills_match: 4.0,
                experience_level: 4.0,
                relevant_achievements: 4.0,
                cultural_fit: 5.0,
            },
        };
        let project = StageResult {
            score: 3.75,
            feedback: "project".to_string(),
            breakdown: ProjectBreakdown {
                correctness: 4.0,
                code_quality: 4.0,
                resilience_error_handling: 3.0,
                documentation: 5.0,
                creativity_bonus: 2.0,
            },
        };
        let analysis = FinalAnalysis {
            summary: "Solid".to_string(),
            recommendation: Recommendation::Recommended,
            strengths: vec!["Rust".to_string()],
            weaknesses: vec![],
            final_score: 3.83,
        };

        let result = compose_result(
            cv,
            project,
            analysis,
            "SRE",
            "gemini-1.5-flash",
            Duration::from_millis(12_600),
        );

        assert_eq!(result.cv_match_rate, 0.79);
        assert_eq!(result.project_score, 3.75);
        assert_eq!(result.final_score, 3.83);
        assert_eq!(result.overall_summary, "Solid");
        assert_eq!(result.cv_breakdown.cultural_fit, 5.0);
        assert_eq!(result.processing_time_seconds, 13);
        assert_eq!(result.llm_model, "gemini-1.5-flash");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["recommendation"], "Recommended");
    }
}
