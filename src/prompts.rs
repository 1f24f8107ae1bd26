//! Prompts sent to the recognition service.
//!
//! Callers can override the default via [`crate::config::PipelineConfig::prompt`];
//! the constants here are used only when no override is provided.

/// Default instruction sent alongside each page image.
pub const DEFAULT_OCR_PROMPT: &str = r#"Extract and transcribe the text content from this page.
Maintain the original structure but do not add any annotations.
Output only the transcribed text."#;

/// Prefix stored in `ocr_result` for error rows.
pub const ERROR_RESULT_PREFIX: &str = "ERROR: ";

/// Text stored for an error row, e.g. `ERROR: empty response from recognition service`.
pub fn error_result(reason: &str) -> String {
    format!("{ERROR_RESULT_PREFIX}{reason}")
}
