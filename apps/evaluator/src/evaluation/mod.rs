pub mod cv;
pub mod final_analysis;
pub mod json_extract;
pub mod models;
pub mod project;
pub mod prompts;
pub mod scoring;

pub use cv::evaluate_cv;
pub use final_analysis::generate_final_analysis;
pub use project::evaluate_project;

/// Placeholder stored when the model omits stage feedback.
pub const NO_FEEDBACK: &str = "No feedback provided";
