//! Stage 1: scores a CV against the job description and the CV rubric.

use tracing::{debug, info};

use crate::errors::EvalError;
use crate::evaluation::json_extract::{extract_json_object, string_field};
use crate::evaluation::models::{CvBreakdown, CvEvaluation, StageResult};
use crate::evaluation::prompts::build_cv_prompt;
use crate::evaluation::scoring::{cv_match_rate, read_score, weighted_score, CV_CRITERIA};
use crate::evaluation::NO_FEEDBACK;
use crate::llm_client::LlmInvoker;
use crate::rag::{format_contexts, ContextRetriever, SourceTag};

const STAGE: &str = "CV evaluation";

pub async fn evaluate_cv(
    cv_text: &str,
    job_title: &str,
    retriever: &ContextRetriever,
    llm: &LlmInvoker,
) -> Result<CvEvaluation, EvalError> {
    let mut contexts = retriever
        .retrieve_contexts(
            &format!("CV evaluation for {job_title} position"),
            2,
            Some(SourceTag::JobDescription),
        )
        .await?;
    contexts.extend(
        retriever
            .retrieve_contexts("CV scoring rubric criteria", 2, Some(SourceTag::ScoringRubric))
            .await?,
    );

    let prompt = build_cv_prompt(cv_text, job_title, &format_contexts(&contexts));
    let response = llm.generate_text(&prompt).await?;

    let result = parse_cv_response(&response).map_err(|e| {
        debug!(response = %response, "unparseable {STAGE} response");
        e
    })?;
    info!(
        cv_match_rate = result.score,
        contexts = contexts.len(),
        "{STAGE} scored"
    );
    Ok(result)
}

/// Parses the model's JSON. Missing or malformed scores fall back to the
/// minimum; only a missing/invalid JSON object is an error.
pub fn parse_cv_response(response: &str) -> Result<CvEvaluation, EvalError> {
    let map = extract_json_object(response).map_err(|e| EvalError::parse(STAGE, e))?;

    let breakdown = CvBreakdown {
        technical_skills_match: read_score(map.get("technical_skills_match")),
        experience_level: read_score(map.get("experience_level")),
        relevant_achievements: read_score(map.get("relevant_achievements")),
        cultural_fit: read_score(map.get("cultural_fit")),
    };
    let weighted = weighted_score(&breakdown.scores(), &CV_CRITERIA);

    Ok(StageResult {
        score: cv_match_rate(weighted),
        feedback: string_field(&map, "feedback", NO_FEEDBACK),
        breakdown,
    })
}
