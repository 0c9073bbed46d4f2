// src/models/similarity.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two generated-content categories subject to deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Quiz,
    Flashcard,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Quiz => "quiz",
            ContentKind::Flashcard => "flashcard",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "quiz" => Some(ContentKind::Quiz),
            "flashcard" => Some(ContentKind::Flashcard),
            _ => None,
        }
    }
}

/// Embedding of one accepted generated item. Forms a bounded FIFO history
/// per (user, content kind); the week key narrows the primary duplicate
/// lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub user_id: i64,
    pub week: i32,
    pub content_kind: ContentKind,
    pub text_hash: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a duplicate check; scores are kept for the audit trail.
#[derive(Debug, Clone, Default)]
pub struct DuplicateCheck {
    pub duplicate: bool,
    pub scores: Vec<f32>,
}
