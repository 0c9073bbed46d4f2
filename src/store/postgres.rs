// src/store/postgres.rs
//
// sqlx/Postgres implementations of the store contracts. Every conditional
// mutation is a single-row UPDATE whose WHERE clause carries the condition,
// so the check and the write are one atomic step on the database side.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::generation::GenerationAttemptLog;
use crate::models::profile::Profile;
use crate::models::session::{
    AnswerAttempt, Difficulty, QuestionSnapshot, QuizSession, SessionStatus,
};
use crate::models::similarity::{ContentKind, SimilarityRecord};
use crate::store::{
    AchievementStore, ActivityEvent, ActivityLog, AttemptSeed, FinalOutcome, GenerationLogStore,
    ProfileStore, SessionStore, SimilarityStore,
};

/// One pool, all store traits. Constructed once per process and shared.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with a short retry loop so the engine tolerates the
    /// database coming up after it in a fresh deployment.
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let mut retry_count = 0;
        let pool = loop {
            match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(3))
                .connect(database_url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) => {
                    retry_count += 1;
                    if retry_count > 5 {
                        return Err(EngineError::Storage(format!(
                            "failed to connect after 5 retries: {}",
                            e
                        )));
                    }
                    tracing::warn!(
                        "Database not ready, retrying in 2s... (Attempt {})",
                        retry_count
                    );
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        };
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), EngineError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // Inherent lookup so callers inside this impl block do not collide with
    // the `get` methods of the other store traits PgStore implements.
    async fn fetch_profile(&self, user_id: i64) -> Result<Option<Profile>, EngineError> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }
}

const PROFILE_COLUMNS: &str = "user_id, timezone, points_lifetime, points_today, quizzes_today, \
     flips_today, last_reset_at, current_streak, longest_streak, last_quiz_date, badges";

#[async_trait]
impl ProfileStore for PgStore {
    async fn get(&self, user_id: i64) -> Result<Option<Profile>, EngineError> {
        self.fetch_profile(user_id).await
    }

    async fn get_or_create(
        &self,
        user_id: i64,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Profile, EngineError> {
        // Concurrent first accesses converge on one row via ON CONFLICT.
        sqlx::query(
            "INSERT INTO profiles (user_id, timezone, last_reset_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(timezone)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch_profile(user_id)
            .await?
            .ok_or_else(|| EngineError::Storage(format!("profile {} vanished after upsert", user_id)))
    }

    async fn apply_daily_reset(
        &self,
        user_id: i64,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE profiles
             SET quizzes_today = 0, flips_today = 0, points_today = 0, last_reset_at = $3
             WHERE user_id = $1 AND last_reset_at = $2",
        )
        .bind(user_id)
        .bind(expected_last_reset)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_increment_quiz_count(
        &self,
        user_id: i64,
        max: i32,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE profiles SET quizzes_today = quizzes_today + 1
             WHERE user_id = $1 AND quizzes_today < $2",
        )
        .bind(user_id)
        .bind(max)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_increment_flip_count(
        &self,
        user_id: i64,
        max: i32,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE profiles SET flips_today = flips_today + 1
             WHERE user_id = $1 AND flips_today < $2",
        )
        .bind(user_id)
        .bind(max)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_points(&self, user_id: i64, delta: i64) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE profiles
             SET points_lifetime = points_lifetime + $2, points_today = points_today + $2
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_streak(
        &self,
        user_id: i64,
        current_streak: i32,
        longest_streak: i32,
        last_quiz_date: NaiveDate,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE profiles
             SET current_streak = $2, longest_streak = $3, last_quiz_date = $4
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(current_streak)
        .bind(longest_streak)
        .bind(last_quiz_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_badge_if_absent(&self, user_id: i64, code: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE profiles SET badges = array_append(badges, $2)
             WHERE user_id = $1 AND NOT ($2 = ANY(badges))",
        )
        .bind(user_id)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn top_by_lifetime_points(&self, limit: i64) -> Result<Vec<Profile>, EngineError> {
        let profiles = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles ORDER BY points_lifetime DESC LIMIT $1",
            PROFILE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(profiles)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: i64,
    difficulty: String,
    week_at_start: i32,
    status: String,
    started_at: DateTime<Utc>,
    timeout_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    total_questions: i32,
    score: i32,
    awarded_points: i64,
    effects_applied: bool,
    questions: Json<Vec<QuestionSnapshot>>,
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    question_id: i64,
    selected_option: String,
    is_correct: bool,
    retry_index: i32,
    started_at: DateTime<Utc>,
    answered_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self, attempts: Vec<AnswerAttempt>) -> Result<QuizSession, EngineError> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| EngineError::Storage(format!("unknown status {:?}", self.status)))?;
        let difficulty = Difficulty::parse(&self.difficulty).ok_or_else(|| {
            EngineError::Storage(format!("unknown difficulty {:?}", self.difficulty))
        })?;
        Ok(QuizSession {
            id: self.id,
            user_id: self.user_id,
            difficulty,
            week_at_start: self.week_at_start,
            status,
            started_at: self.started_at,
            timeout_at: self.timeout_at,
            completed_at: self.completed_at,
            total_questions: self.total_questions.max(0) as u32,
            score: self.score.max(0) as u32,
            awarded_points: self.awarded_points,
            effects_applied: self.effects_applied,
            questions: self.questions.0,
            attempts,
        })
    }
}

impl From<AttemptRow> for AnswerAttempt {
    fn from(row: AttemptRow) -> Self {
        AnswerAttempt {
            question_id: row.question_id,
            selected_option: row.selected_option,
            is_correct: row.is_correct,
            retry_index: row.retry_index.max(0) as u32,
            started_at: row.started_at,
            answered_at: row.answered_at,
        }
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert(&self, session: &QuizSession) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO quiz_sessions
             (id, user_id, difficulty, week_at_start, status, started_at, timeout_at,
              completed_at, total_questions, score, awarded_points, effects_applied, questions)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.difficulty.as_str())
        .bind(session.week_at_start)
        .bind(session.status.as_str())
        .bind(session.started_at)
        .bind(session.timeout_at)
        .bind(session.completed_at)
        .bind(session.total_questions as i32)
        .bind(session.score as i32)
        .bind(session.awarded_points)
        .bind(session.effects_applied)
        .bind(Json(&session.questions))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QuizSession>, EngineError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, user_id, difficulty, week_at_start, status, started_at, timeout_at,
                    completed_at, total_questions, score, awarded_points, effects_applied,
                    questions
             FROM quiz_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let attempts = sqlx::query_as::<_, AttemptRow>(
            "SELECT question_id, selected_option, is_correct, retry_index, started_at, answered_at
             FROM answer_attempts WHERE session_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AnswerAttempt::from)
        .collect();

        Ok(Some(row.into_session(attempts)?))
    }

    async fn append_attempt(
        &self,
        session_id: Uuid,
        seed: AttemptSeed,
        retry_limit: u32,
    ) -> Result<AnswerAttempt, EngineError> {
        // Row lock on the session serializes concurrent appends for the
        // same session, which is what makes retry_index allocation safe.
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM quiz_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status = status
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))
            .and_then(|raw| {
                SessionStatus::parse(&raw)
                    .ok_or_else(|| EngineError::Storage(format!("unknown status {:?}", raw)))
            })?;
        if status.is_terminal() {
            return Err(EngineError::SessionTerminal);
        }

        let used: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM answer_attempts WHERE session_id = $1 AND question_id = $2",
        )
        .bind(session_id)
        .bind(seed.question_id)
        .fetch_one(&mut *tx)
        .await?;
        if used as u32 > retry_limit {
            return Err(EngineError::RetryLimitReached);
        }

        let retry_index = used as i32;
        sqlx::query(
            "INSERT INTO answer_attempts
             (session_id, question_id, selected_option, is_correct, retry_index,
              started_at, answered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session_id)
        .bind(seed.question_id)
        .bind(&seed.selected_option)
        .bind(seed.is_correct)
        .bind(retry_index)
        .bind(seed.started_at)
        .bind(seed.answered_at)
        .execute(&mut *tx)
        .await?;

        if status == SessionStatus::Started {
            sqlx::query("UPDATE quiz_sessions SET status = 'in_progress' WHERE id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(AnswerAttempt {
            question_id: seed.question_id,
            selected_option: seed.selected_option,
            is_correct: seed.is_correct,
            retry_index: retry_index as u32,
            started_at: seed.started_at,
            answered_at: seed.answered_at,
        })
    }

    async fn finalize_if_open(
        &self,
        session_id: Uuid,
        outcome: &FinalOutcome,
        expected_attempts: usize,
    ) -> Result<bool, EngineError> {
        // Same row lock as append_attempt, so an answer landing after the
        // caller's read either commits before the count check (and fails
        // it) or waits until this transaction resolves.
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM quiz_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(raw) = status else {
            return Err(EngineError::NotFound(format!("session {}", session_id)));
        };
        let status = SessionStatus::parse(&raw)
            .ok_or_else(|| EngineError::Storage(format!("unknown status {:?}", raw)))?;
        if status.is_terminal() {
            return Ok(false);
        }

        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM answer_attempts WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;
        if stored as usize != expected_attempts {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE quiz_sessions
             SET status = $2, score = $3, awarded_points = $4, completed_at = $5
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(outcome.status.as_str())
        .bind(outcome.score as i32)
        .bind(outcome.awarded_points)
        .bind(outcome.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn claim_completion_effects(&self, session_id: Uuid) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE quiz_sessions SET effects_applied = TRUE
             WHERE id = $1 AND status IN ('completed', 'timed_out', 'abandoned')
               AND effects_applied = FALSE",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_completion_effects(&self, session_id: Uuid) -> Result<(), EngineError> {
        sqlx::query("UPDATE quiz_sessions SET effects_applied = FALSE WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn abandon_if_unanswered(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE quiz_sessions SET status = 'abandoned', completed_at = $2
             WHERE id = $1 AND status = 'started'
               AND NOT EXISTS (SELECT 1 FROM answer_attempts WHERE session_id = $1)",
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SimilarityStore for PgStore {
    async fn insert(&self, record: &SimilarityRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO similarity_records
             (user_id, week, content_kind, text_hash, embedding, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.user_id)
        .bind(record.week)
        .bind(record.content_kind.as_str())
        .bind(&record.text_hash)
        .bind(&record.embedding)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn vectors(
        &self,
        user_id: i64,
        week: i32,
        kind: ContentKind,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        let vectors = sqlx::query_scalar::<_, Vec<f32>>(
            "SELECT embedding FROM similarity_records
             WHERE user_id = $1 AND week = $2 AND content_kind = $3",
        )
        .bind(user_id)
        .bind(week)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(vectors)
    }

    async fn recent_vectors(
        &self,
        user_id: i64,
        kind: ContentKind,
        limit: usize,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        let vectors = sqlx::query_scalar::<_, Vec<f32>>(
            "SELECT embedding FROM similarity_records
             WHERE user_id = $1 AND content_kind = $2
             ORDER BY created_at DESC LIMIT $3",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(vectors)
    }

    async fn evict_oldest(
        &self,
        user_id: i64,
        kind: ContentKind,
        keep_recent: usize,
    ) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "DELETE FROM similarity_records WHERE id IN (
                 SELECT id FROM similarity_records
                 WHERE user_id = $1 AND content_kind = $2
                 ORDER BY created_at DESC OFFSET $3
             )",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(keep_recent as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl GenerationLogStore for PgStore {
    async fn append(&self, entry: &GenerationAttemptLog) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO generation_attempt_logs
             (user_id, content_kind, attempt_number, week, prompt_hash, parsing_succeeded,
              validation_succeeded, duplicate_detected, similarity_scores, error_kind, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(entry.user_id)
        .bind(entry.content_kind.as_str())
        .bind(entry.attempt_number as i32)
        .bind(entry.week)
        .bind(&entry.prompt_hash)
        .bind(entry.parsing_succeeded)
        .bind(entry.validation_succeeded)
        .bind(entry.duplicate_detected)
        .bind(&entry.similarity_scores)
        .bind(&entry.error_kind)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AchievementStore for PgStore {
    async fn ensure_definition(
        &self,
        code: &str,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO achievement_definitions (code, name, description, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityLog for PgStore {
    async fn record(&self, event: &ActivityEvent) -> Result<(), EngineError> {
        let payload = serde_json::to_value(event)?;
        sqlx::query("INSERT INTO activity_events (payload, created_at) VALUES ($1, $2)")
            .bind(payload)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
