// src/error.rs

use std::fmt;

/// Which per-day quota was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Quiz,
    Flip,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaKind::Quiz => write!(f, "quiz"),
            QuotaKind::Flip => write!(f, "flashcard flip"),
        }
    }
}

/// Central engine error enum.
/// The API layer maps these to user-facing responses; nothing here carries
/// HTTP semantics.
#[derive(Debug)]
pub enum EngineError {
    /// Daily limit reached; the quota resets on the next calendar day in the
    /// user's timezone.
    QuotaExceeded(QuotaKind),

    /// Answer submitted after the session's timeout instant.
    SessionExpired,

    /// Mutation attempted on a session already in a terminal status.
    SessionTerminal,

    /// The question has already used all of its permitted attempts.
    RetryLimitReached,

    /// Every generation attempt failed validation or was a near-duplicate.
    GenerationExhausted { attempts: u32 },

    /// An external collaborator (generator, embedding service) failed.
    DependencyUnavailable(String),

    /// A state transition the engine does not allow (e.g. abandoning a
    /// session that already has answers).
    InvalidState(&'static str),

    /// Persistence layer failure.
    Storage(String),

    /// Entity lookup miss.
    NotFound(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::QuotaExceeded(kind) => {
                write!(f, "daily {} quota exceeded", kind)
            }
            EngineError::SessionExpired => write!(f, "quiz session has expired"),
            EngineError::SessionTerminal => write!(f, "quiz session is already finished"),
            EngineError::RetryLimitReached => {
                write!(f, "no retries remain for this question")
            }
            EngineError::GenerationExhausted { attempts } => {
                write!(f, "content generation failed after {} attempts", attempts)
            }
            EngineError::DependencyUnavailable(msg) => {
                write!(f, "external dependency unavailable: {}", msg)
            }
            EngineError::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            EngineError::Storage(msg) => write!(f, "storage error: {}", msg),
            EngineError::NotFound(msg) => write!(f, "not found: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Converts `sqlx::Error` into `EngineError::Storage`.
/// Allows using the `?` operator on database queries.
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}
