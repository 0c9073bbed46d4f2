// src/store/mod.rs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::generation::GenerationAttemptLog;
use crate::models::profile::Profile;
use crate::models::session::{AnswerAttempt, QuizSession, SessionStatus};
use crate::models::similarity::{ContentKind, SimilarityRecord};

/// Seed for an attempt append; the store allocates `retry_index` inside its
/// critical section so two concurrent submissions for the same question
/// cannot race the allocation.
#[derive(Debug, Clone)]
pub struct AttemptSeed {
    pub question_id: i64,
    pub selected_option: String,
    pub is_correct: bool,
    pub started_at: DateTime<Utc>,
    pub answered_at: DateTime<Utc>,
}

/// Terminal outcome applied by the conditional finalize update.
#[derive(Debug, Clone)]
pub struct FinalOutcome {
    pub status: SessionStatus,
    pub score: u32,
    pub awarded_points: i64,
    pub completed_at: DateTime<Utc>,
}

/// Best-effort activity feed events. Failures to record these must never
/// abort the primary flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    QuizCompleted {
        user_id: i64,
        session_id: Uuid,
        score: u32,
        total_questions: u32,
        awarded_points: i64,
    },
    BadgeGranted {
        user_id: i64,
        code: String,
    },
}

/// Durable profile storage. Counter mutations are conditional single-row
/// updates: the condition and the increment happen in one atomic step.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<Profile>, EngineError>;

    /// Returns the existing profile or inserts a zeroed one with
    /// `last_reset_at = now`. Concurrent first accesses must converge on a
    /// single row.
    async fn get_or_create(
        &self,
        user_id: i64,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Profile, EngineError>;

    /// Zeroes the daily counters only if `last_reset_at` still equals
    /// `expected_last_reset` (compare-and-swap). Returns whether this call
    /// performed the reset.
    async fn apply_daily_reset(
        &self,
        user_id: i64,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError>;

    /// Atomic check-and-increment of `quizzes_today` against `max`.
    /// Returns false when the cap was already reached.
    async fn try_increment_quiz_count(&self, user_id: i64, max: i32)
    -> Result<bool, EngineError>;

    /// Atomic check-and-increment of `flips_today` against `max`.
    async fn try_increment_flip_count(&self, user_id: i64, max: i32)
    -> Result<bool, EngineError>;

    /// Atomically adds `delta` to both lifetime and today points.
    async fn add_points(&self, user_id: i64, delta: i64) -> Result<(), EngineError>;

    async fn update_streak(
        &self,
        user_id: i64,
        current_streak: i32,
        longest_streak: i32,
        last_quiz_date: NaiveDate,
    ) -> Result<(), EngineError>;

    /// Adds `code` to the badge set only if absent; returns whether it was
    /// newly added.
    async fn add_badge_if_absent(&self, user_id: i64, code: &str) -> Result<bool, EngineError>;

    /// Leaderboard read: profiles ordered by lifetime points, descending.
    async fn top_by_lifetime_points(&self, limit: i64) -> Result<Vec<Profile>, EngineError>;
}

/// Durable session storage. Appends and the finalize transition are atomic
/// per session document.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &QuizSession) -> Result<(), EngineError>;

    async fn get(&self, id: Uuid) -> Result<Option<QuizSession>, EngineError>;

    /// Atomically appends an attempt: rejects terminal sessions
    /// (`SessionTerminal`) and questions whose `retry_limit + 1` attempts
    /// are used up (`RetryLimitReached`); allocates the next `retry_index`
    /// and moves `Started -> InProgress` on the first attempt, all in one
    /// critical section.
    async fn append_attempt(
        &self,
        session_id: Uuid,
        seed: AttemptSeed,
        retry_limit: u32,
    ) -> Result<AnswerAttempt, EngineError>;

    /// Applies `outcome` only when the session is not yet terminal AND the
    /// stored attempt count still equals `expected_attempts`, all in one
    /// critical section. The count condition rejects outcomes scored from
    /// a stale snapshot (an answer appended between the caller's read and
    /// this call); callers re-read and recompute on false.
    async fn finalize_if_open(
        &self,
        session_id: Uuid,
        outcome: &FinalOutcome,
        expected_attempts: usize,
    ) -> Result<bool, EngineError>;

    /// Claims the one-shot right to run the profile write-back for a
    /// terminal session. Succeeds at most once per session: only when the
    /// session is terminal and `effects_applied` is still false, flipping
    /// it true in the same conditional update.
    async fn claim_completion_effects(&self, session_id: Uuid) -> Result<bool, EngineError>;

    /// Surrenders a claim whose write-back failed, so a later finalize can
    /// retry it.
    async fn release_completion_effects(&self, session_id: Uuid) -> Result<(), EngineError>;

    /// Marks the session `Abandoned` only while it is `Started` with no
    /// recorded attempts. Returns whether the transition happened.
    async fn abandon_if_unanswered(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError>;
}

/// Storage for the embedding history behind the duplicate check.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn insert(&self, record: &SimilarityRecord) -> Result<(), EngineError>;

    /// All vectors for the exact (user, week, kind) key.
    async fn vectors(
        &self,
        user_id: i64,
        week: i32,
        kind: ContentKind,
    ) -> Result<Vec<Vec<f32>>, EngineError>;

    /// The `limit` most recently created vectors for (user, kind) across
    /// all weeks, newest first.
    async fn recent_vectors(
        &self,
        user_id: i64,
        kind: ContentKind,
        limit: usize,
    ) -> Result<Vec<Vec<f32>>, EngineError>;

    /// Deletes the oldest records beyond `keep_recent` for (user, kind),
    /// ordered by `created_at` ascending. Returns how many were deleted.
    async fn evict_oldest(
        &self,
        user_id: i64,
        kind: ContentKind,
        keep_recent: usize,
    ) -> Result<u64, EngineError>;
}

/// Append-only audit trail for generation attempts.
#[async_trait]
pub trait GenerationLogStore: Send + Sync {
    async fn append(&self, entry: &GenerationAttemptLog) -> Result<(), EngineError>;
}

/// Master badge definitions, created lazily and idempotently by code.
#[async_trait]
pub trait AchievementStore: Send + Sync {
    async fn ensure_definition(
        &self,
        code: &str,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;
}

/// Best-effort activity sink. Implementations should be cheap; callers
/// swallow failures.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, event: &ActivityEvent) -> Result<(), EngineError>;
}

/// Answer-key lookup for the (external) question bank. Sessions only carry
/// answer-stripped snapshots, so correctness checks go through this seam.
#[async_trait]
pub trait AnswerKeys: Send + Sync {
    async fn correct_option(&self, question_id: i64) -> Result<Option<String>, EngineError>;
}
