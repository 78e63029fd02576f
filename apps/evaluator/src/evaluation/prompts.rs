// Stage prompt templates. Placeholders use {double_braces} and are filled with
// `.replace()`; the JSON schemas in each template contain literal braces.

use crate::evaluation::models::{CvEvaluation, ProjectEvaluation};
use crate::evaluation::scoring::{Criterion, CV_CRITERIA, PROJECT_CRITERIA};
use crate::llm_client::prompts::{JSON_ONLY_INSTRUCTION, JSON_ONLY_REMINDER};

const CV_TEMPLATE: &str = r#"You are an expert HR recruiter evaluating a candidate's CV for a {{job_title}} position.

CONTEXT (Job Description and Scoring Rubric):
{{contexts}}

CANDIDATE CV:
{{cv_text}}

TASK:
Evaluate the candidate's CV based on the following criteria (scale 1-5):

{{rubric}}

RESPONSE FORMAT:
{{json_only}}

{
  "technical_skills_match": <integer 1-5>,
  "experience_level": <integer 1-5>,
  "relevant_achievements": <integer 1-5>,
  "cultural_fit": <integer 1-5>,
  "feedback": "<detailed 3-5 sentences explaining the scores, highlighting strengths and gaps>"
}

{{reminder}}"#;

const PROJECT_TEMPLATE: &str = r#"You are an expert technical reviewer evaluating a candidate's project report for a {{job_title}} position.

The candidate's CV match rate was {{cv_match_rate}} (0-1 scale). Use it as background only; it does not change the criteria weights.

CONTEXT (Case Study Brief and Scoring Rubric):
{{contexts}}

CANDIDATE PROJECT REPORT:
{{project_text}}

TASK:
Evaluate the project deliverable based on the following criteria (scale 1-5):

{{rubric}}

RESPONSE FORMAT:
{{json_only}}

{
  "correctness": <integer 1-5>,
  "code_quality": <integer 1-5>,
  "resilience_error_handling": <integer 1-5>,
  "documentation": <integer 1-5>,
  "creativity_bonus": <integer 1-5>,
  "feedback": "<detailed 3-5 sentences explaining the scores, highlighting strengths and areas for improvement>"
}

{{reminder}}"#;

const FINAL_TEMPLATE: &str = r#"You are an expert hiring manager making the final decision on a candidate for a {{job_title}} position.

CONTEXT:
{{contexts}}

CV EVALUATION RESULTS:
- Match Rate: {{cv_match_rate}} (0-1 scale)
{{cv_scores}}
- Feedback: {{cv_feedback}}

PROJECT EVALUATION RESULTS:
- Overall Score: {{project_score}}/5
{{project_scores}}
- Feedback: {{project_feedback}}

TASK:
Based on the CV and project evaluations, provide a final hiring recommendation.

RESPONSE FORMAT:
{{json_only}}

{
  "overall_summary": "<3-5 sentences synthesizing both evaluations, providing clear hiring recommendation>",
  "recommendation": "<one of: 'Highly Recommended' | 'Recommended' | 'Consider' | 'Not Recommended'>",
  "strengths": ["<strength 1>", "<strength 2>", "<strength 3>"],
  "weaknesses": ["<weakness 1>", "<weakness 2>"]
}

Guidelines for recommendation:
- "Highly Recommended": CV match > 0.75 AND project score > 4.0
- "Recommended": CV match > 0.65 AND project score > 3.5
- "Consider": CV match > 0.50 OR project score > 3.0
- "Not Recommended": Below thresholds

{{reminder}}"#;

/// Numbered rubric with the per-level guidance for each criterion.
fn render_rubric(criteria: &[Criterion]) -> String {
    criteria
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let levels = c
                .levels
                .iter()
                .enumerate()
                .map(|(level, text)| format!("   - {} = {text}", level + 1))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "{}. {} ({:.0}% weight): {}\n{levels}",
                i + 1,
                c.label,
                c.weight * 100.0,
                c.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_scores(criteria: &[Criterion], scores: &[f64]) -> String {
    criteria
        .iter()
        .zip(scores)
        .map(|(c, score)| format!("- {}: {score}/5", c.label))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fill_common(template: &str, job_title: &str, contexts: &str) -> String {
    template
        .replace("{{json_only}}", JSON_ONLY_INSTRUCTION)
        .replace("{{reminder}}", JSON_ONLY_REMINDER)
        .replace("{{job_title}}", job_title)
        .replace("{{contexts}}", contexts)
}

pub fn build_cv_prompt(cv_text: &str, job_title: &str, contexts: &str) -> String {
    fill_common(CV_TEMPLATE, job_title, contexts)
        .replace("{{rubric}}", &render_rubric(&CV_CRITERIA))
        // Candidate text last so its content is never re-scanned for placeholders.
        .replace("{{cv_text}}", cv_text)
}

pub fn build_project_prompt(
    project_text: &str,
    job_title: &str,
    cv_match_rate: f64,
    contexts: &str,
) -> String {
    fill_common(PROJECT_TEMPLATE, job_title, contexts)
        .replace("{{rubric}}", &render_rubric(&PROJECT_CRITERIA))
        .replace("{{cv_match_rate}}", &format!("{cv_match_rate:.2}"))
        .replace("{{project_text}}", project_text)
}

pub fn build_final_prompt(
    cv: &CvEvaluation,
    project: &ProjectEvaluation,
    job_title: &str,
    contexts: &str,
) -> String {
    fill_common(FINAL_TEMPLATE, job_title, contexts)
        .replace("{{cv_match_rate}}", &format!("{:.2}", cv.score))
        .replace(
            "{{cv_scores}}",
            &render_scores(&CV_CRITERIA, &cv.breakdown.scores()),
        )
        .replace("{{project_score}}", &format!("{:.2}", project.score))
        .replace(
            "{{project_scores}}",
            &render_scores(&PROJECT_CRITERIA, &project.breakdown.scores()),
        )
        .replace("{{cv_feedback}}", &cv.feedback)
        .replace("{{project_feedback}}", &project.feedback)
}
