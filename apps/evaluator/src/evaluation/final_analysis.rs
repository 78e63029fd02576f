//! Stage 3: synthesizes both stage results into a hiring recommendation.
//!
//! The model writes the prose. The final score is always recomputed from the
//! stage scores, and an invalid recommendation literal is replaced by the
//! deterministic rule.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::EvalError;
use crate::evaluation::json_extract::{extract_json_object, string_field, string_list};
use crate::evaluation::models::{CvEvaluation, FinalAnalysis, ProjectEvaluation, Recommendation};
use crate::evaluation::prompts::build_final_prompt;
use crate::evaluation::scoring::{determine_recommendation, final_score};
use crate::llm_client::LlmInvoker;
use crate::rag::{format_contexts, ContextRetriever};

const STAGE: &str = "final analysis";
const NO_SUMMARY: &str = "No summary provided";

pub async fn generate_final_analysis(
    cv: &CvEvaluation,
    project: &ProjectEvaluation,
    job_title: &str,
    retriever: &ContextRetriever,
    llm: &LlmInvoker,
) -> Result<FinalAnalysis, EvalError> {
    let contexts = retriever
        .retrieve_contexts(&format!("Final candidate evaluation for {job_title}"), 1, None)
        .await?;

    let prompt = build_final_prompt(cv, project, job_title, &format_contexts(&contexts));
    let response = llm.generate_text(&prompt).await?;

    let analysis = parse_final_response(&response, cv.score, project.score).map_err(|e| {
        debug!(response = %response, "unparseable {STAGE} response");
        e
    })?;
    info!(
        final_score = analysis.final_score,
        recommendation = %analysis.recommendation,
        "{STAGE} complete"
    );
    Ok(analysis)
}

pub fn parse_final_response(
    response: &str,
    cv_match_rate: f64,
    project_score: f64,
) -> Result<FinalAnalysis, EvalError> {
    let map = extract_json_object(response).map_err(|e| EvalError::parse(STAGE, e))?;

    let recommendation = match map.get("recommendation").and_then(Value::as_str) {
        Some(literal) => Recommendation::from_literal(literal).unwrap_or_else(|| {
            warn!(literal, "invalid recommendation from model, applying rule");
            determine_recommendation(cv_match_rate, project_score)
        }),
        None => determine_recommendation(cv_match_rate, project_score),
    };

    let summary = if map.contains_key("overall_summary") {
        string_field(&map, "overall_summary", NO_SUMMARY)
    } else {
        string_field(&map, "summary", NO_SUMMARY)
    };

    Ok(FinalAnalysis {
        summary,
        recommendation,
        strengths: string_list(&map, "strengths"),
        weaknesses: string_list(&map, "weaknesses"),
        final_score: final_score(cv_match_rate, project_score),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::evaluation::models::{CvBreakdown, ProjectBreakdown, StageResult};
    use crate::llm_client::testing::ScriptedGenerator;
    use crate::rag::testing::{mixed_index, FixedEmbedder};
    use crate::retry::RetryPolicy;

    #[test]
    fn test_valid_literal_is_kept_even_if_rule_disagrees() {
        let analysis = parse_final_response(
            r#"{"overall_summary": "Hire.", "recommendation": "Recommended", "strengths": ["a"], "weaknesses": []}"#,
            0.3,
            2.0,
        )
        .unwrap();
        assert_eq!(analysis.recommendation, Recommendation::Recommended);
        assert_eq!(analysis.summary, "Hire.");
        assert_eq!(analysis.strengths, vec!["a"]);
    }

    #[test]
    fn test_invalid_literal_falls_back_to_rule() {
        let analysis = parse_final_response(
            r#"{"overall_summary": "x", "recommendation": "Strong Hire"}"#,
            0.8,
            4.2,
        )
        .unwrap();
        assert_eq!(analysis.recommendation, Recommendation::HighlyRecommended);
    }

    #[test]
    fn test_missing_literal_falls_back_to_rule() {
        let analysis = parse_final_response("{}", 0.3, 2.0).unwrap();
        assert_eq!(analysis.recommendation, Recommendation::NotRecommended);
        assert_eq!(analysis.summary, NO_SUMMARY);
        assert!(analysis.strengths.is_empty());
        assert!(analysis.weaknesses.is_empty());
    }

    #[test]
    fn test_final_score_ignores_model_arithmetic() {
        let analysis = parse_final_response(
            r#"{"summary": "short form", "recommendation": "Consider", "final_score": 4.9}"#,
            0.73,
            3.75,
        )
        .unwrap();
        assert_eq!(analysis.final_score, 3.71);
        assert_eq!(analysis.summary, "short form");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_generic_context_chunk() {
        let index = Arc::new(mixed_index());
        let retriever = ContextRetriever::new(Arc::new(FixedEmbedder::default()), index.clone());
        let generator = Arc::new(ScriptedGenerator::always(|| {
            Ok(r#"{"overall_summary": "ok", "recommendation": "Consider"}"#.to_string())
        }));
        let llm = LlmInvoker::new(generator.clone(), RetryPolicy::new(3, Duration::from_secs(1)));

        let cv = StageResult {
            score: 0.6,
            feedback: "fine".to_string(),
            breakdown: CvBreakdown {
                technical_skills_match: 3.0,
                experience_level: 3.0,
                relevant_achievements: 3.0,
                cultural_fit: 3.0,
            },
        };
        let project = StageResult {
            score: 3.2,
            feedback: "fine".to_string(),
            breakdown: ProjectBreakdown {
                correctness: 3.0,
                code_quality: 3.0,
                resilience_error_handling: 3.0,
                documentation: 3.0,
                creativity_bonus: 3.0,
            },
        };

        let analysis = generate_final_analysis(&cv, &project, "SRE", &retriever, &llm)
            .await
            .unwrap();

        assert_eq!(*index.limits.lock().unwrap(), vec![1]);
        assert_eq!(analysis.recommendation, Recommendation::Consider);
        // 0.6*5*0.4 + 3.2*0.6 = 1.2 + 1.92
        assert_eq!(analysis.final_score, 3.12);
        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Backend engineer, Rust and LLMs"));
    }
}
