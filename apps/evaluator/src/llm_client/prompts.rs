// Shared prompt fragments used by every evaluation stage.
// Stage-specific templates live in evaluation/prompts.rs.

/// Closing instruction appended to every stage prompt.
pub const JSON_ONLY_INSTRUCTION: &str = "\
Return ONLY a raw JSON object (no markdown, no code blocks, no explanations). \
Do NOT include any text outside the JSON object.";

/// Final reminder placed after the response schema.
pub const JSON_ONLY_REMINDER: &str = "IMPORTANT: Return ONLY the JSON object above, nothing else.";

/// Separator between labeled retrieved-context blocks.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
