//! Stage 2: scores the project report against the case study brief.
//! The CV match rate is passed to the model as background only.

use tracing::{debug, info};

use crate::errors::EvalError;
use crate::evaluation::json_extract::{extract_json_object, string_field};
use crate::evaluation::models::{ProjectBreakdown, ProjectEvaluation, StageResult};
use crate::evaluation::prompts::build_project_prompt;
use crate::evaluation::scoring::{project_score, read_score, weighted_score, PROJECT_CRITERIA};
use crate::evaluation::NO_FEEDBACK;
use crate::llm_client::LlmInvoker;
use crate::rag::{format_contexts, ContextRetriever, SourceTag};

const STAGE: &str = "project evaluation";

pub async fn evaluate_project(
    project_text: &str,
    job_title: &str,
    cv_match_rate: f64,
    retriever: &ContextRetriever,
    llm: &LlmInvoker,
) -> Result<ProjectEvaluation, EvalError> {
    let mut contexts = retriever
        .retrieve_contexts(
            "Case study brief requirements",
            2,
            Some(SourceTag::CaseStudyBrief),
        )
        .await?;
    contexts.extend(
        retriever
            .retrieve_contexts(
                "Project deliverable scoring rubric",
                2,
                Some(SourceTag::ScoringRubric),
            )
            .await?,
    );

    let prompt = build_project_prompt(
        project_text,
        job_title,
        cv_match_rate,
        &format_contexts(&contexts),
    );
    let response = llm.generate_text(&prompt).await?;

    let result = parse_project_response(&response).map_err(|e| {
        debug!(response = %response, "unparseable {STAGE} response");
        e
    })?;
    info!(
        project_score = result.score,
        contexts = contexts.len(),
        "{STAGE} scored"
    );
    Ok(result)
}

pub fn parse_project_response(response: &str) -> Result<ProjectEvaluation, EvalError> {
    let map = extract_json_object(response).map_err(|e| EvalError::parse(STAGE, e))?;

    let breakdown = ProjectBreakdown {
        correctness: read_score(map.get("correctness")),
        code_quality: read_score(map.get("code_quality")),
        resilience_error_handling: read_score(map.get("resilience_error_handling")),
        documentation: read_score(map.get("documentation")),
        creativity_bonus: read_score(map.get("creativity_bonus")),
    };
    let weighted = weighted_score(&breakdown.scores(), &PROJECT_CRITERIA);

    Ok(StageResult {
        score: project_score(weighted),
        feedback: string_field(&map, "feedback", NO_FEEDBACK),
        breakdown,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::llm_client::testing::ScriptedGenerator;
    use crate::llm_client::{LlmError, ProviderError};
    use crate::rag::testing::{mixed_index, FixedEmbedder};
    use crate::retry::RetryPolicy;

    const REPLY: &str = r#"Sure! {"correctness": 4, "code_quality": 4, "resilience_error_handling": 3, "documentation": 5, "creativity_bonus": 2, "feedback": "Solid chaining"}"#;

    #[test]
    fn test_parse_weights_five_criteria() {
        let result = parse_project_response(REPLY).unwrap();
        assert_eq!(result.score, 3.75);
        assert_eq!(result.breakdown.resilience_error_handling, 3.0);
        assert_eq!(result.feedback, "Solid chaining");
    }

    #[test]
    fn test_all_minimum_scores() {
        let result = parse_project_response(r#"{"correctness": -3}"#).unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.feedback, NO_FEEDBACK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cv_match_rate_reaches_prompt() {
        let retriever =
            ContextRetriever::new(Arc::new(FixedEmbedder::default()), Arc::new(mixed_index()));
        let generator = Arc::new(ScriptedGenerator::always(|| Ok(REPLY.to_string())));
        let llm = LlmInvoker::new(generator.clone(), RetryPolicy::new(3, Duration::from_secs(1)));

        let result = evaluate_project("report", "SRE", 0.79, &retriever, &llm)
            .await
            .unwrap();

        assert_eq!(result.score, 3.75);
        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("CV match rate was 0.79"));
        assert!(prompt.contains("Score 1-5 per criterion"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_llm_fails_the_stage() {
        let retriever =
            ContextRetriever::new(Arc::new(FixedEmbedder::default()), Arc::new(mixed_index()));
        let generator = Arc::new(ScriptedGenerator::always(|| Err(ProviderError::EmptyResponse)));
        let llm = LlmInvoker::new(generator, RetryPolicy::new(2, Duration::from_secs(1)));

        let err = evaluate_project("report", "SRE", 0.5, &retriever, &llm)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EvalError::Llm(LlmError::ServiceExhausted { attempts: 2 })
        ));
    }
}
