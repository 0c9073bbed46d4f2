// src/models/generation.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::similarity::ContentKind;

/// One candidate produced by the external generator: validated text plus
/// its embedding. The gate never inspects the text beyond hashing it.
#[derive(Debug, Clone)]
pub struct GeneratedCandidate {
    pub text: String,
    pub embedding: Vec<f32>,
    /// Hash of the prompt that produced this candidate, for the audit log.
    pub prompt_hash: String,
}

/// Why one generation attempt failed, as reported by the caller-supplied
/// generator. Distinguished so the audit log can tell parse failures from
/// validation failures from transient dependency errors.
#[derive(Debug, Clone)]
pub enum GenerationFailure {
    /// Model output could not be parsed into the expected shape.
    Parse(String),
    /// Parsed fine but failed structural validation.
    Validation(String),
    /// The model, embedding service, or retrieval backend was unavailable.
    Dependency(String),
}

/// Append-only audit record, one per generation attempt regardless of
/// outcome. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAttemptLog {
    pub user_id: i64,
    pub content_kind: ContentKind,
    /// 1-based attempt counter within one gate invocation.
    pub attempt_number: u32,
    pub week: i32,
    pub prompt_hash: String,
    pub parsing_succeeded: bool,
    pub validation_succeeded: bool,
    pub duplicate_detected: bool,
    /// Cosine scores against the compared history, empty when the attempt
    /// failed before the duplicate check.
    pub similarity_scores: Vec<f32>,
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
}
