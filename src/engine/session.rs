// src/engine/session.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::badges;
use crate::engine::profile::RateLimitedProfile;
use crate::error::EngineError;
use crate::models::session::{
    AttemptResult, Difficulty, FinalResult, QuestionSnapshot, QuizSession, SessionStatus,
};
use crate::store::{ActivityEvent, ActivityLog, AnswerKeys, AttemptSeed, FinalOutcome, SessionStore};
use crate::utils::calendar::local_date;

/// Session state machine: creation (quota permitting), bounded per-question
/// retries, timeout detection, scoring, and exactly-once finalization that
/// writes back into the profile.
pub struct QuizSessionEngine {
    sessions: Arc<dyn SessionStore>,
    answer_keys: Arc<dyn AnswerKeys>,
    profiles: Arc<RateLimitedProfile>,
    activity: Arc<dyn ActivityLog>,
    config: Config,
}

impl QuizSessionEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        answer_keys: Arc<dyn AnswerKeys>,
        profiles: Arc<RateLimitedProfile>,
        activity: Arc<dyn ActivityLog>,
        config: Config,
    ) -> Self {
        Self {
            sessions,
            answer_keys,
            profiles,
            activity,
            config,
        }
    }

    /// Creates a session after consuming one quiz slot from the daily
    /// quota. `questions` must be answer-stripped snapshots; the engine
    /// never sees the correct option except through the answer-key seam.
    pub async fn create_session(
        &self,
        user_id: i64,
        timezone: &str,
        difficulty: Difficulty,
        week: i32,
        questions: Vec<QuestionSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<QuizSession, EngineError> {
        let mut profile = self.profiles.get_or_create(user_id, timezone, now).await?;
        self.profiles
            .try_consume_quiz_quota(&mut profile, now)
            .await?;

        let session = QuizSession {
            id: Uuid::new_v4(),
            user_id,
            difficulty,
            week_at_start: week,
            status: SessionStatus::Started,
            started_at: now,
            timeout_at: now + Duration::minutes(self.config.session_max_minutes),
            completed_at: None,
            total_questions: questions.len() as u32,
            score: 0,
            awarded_points: 0,
            effects_applied: false,
            questions,
            attempts: Vec::new(),
        };
        self.sessions.insert(&session).await?;
        tracing::debug!(
            "Session {} created for user {} ({} questions)",
            session.id,
            user_id,
            session.total_questions
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<QuizSession, EngineError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))
    }

    pub fn is_timed_out(session: &QuizSession, now: DateTime<Utc>) -> bool {
        session.is_timed_out(now)
    }

    pub fn remaining_seconds(session: &QuizSession, now: DateTime<Utc>) -> i64 {
        session.remaining_seconds(now)
    }

    /// Records one answer attempt. Rejects terminal and expired sessions
    /// (an expired session is lazily finalized into `TimedOut` on the way
    /// out) and questions whose retries are used up. The append itself is
    /// atomic in the store, so two concurrent submissions for the same
    /// question cannot claim the same retry index.
    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        selected_option: &str,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AttemptResult, EngineError> {
        let session = self.get_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(EngineError::SessionTerminal);
        }
        if session.is_timed_out(now) {
            // Lazy timeout: the next access settles the terminal status.
            self.finalize(session_id, now).await?;
            return Err(EngineError::SessionExpired);
        }
        if !session.has_question(question_id) {
            return Err(EngineError::NotFound(format!(
                "question {} in session {}",
                question_id, session_id
            )));
        }

        let correct_option = self
            .answer_keys
            .correct_option(question_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("answer key for question {}", question_id)))?;
        let is_correct = selected_option == correct_option;

        let seed = AttemptSeed {
            question_id,
            selected_option: selected_option.to_string(),
            is_correct,
            started_at,
            answered_at: now,
        };
        let attempt = self
            .sessions
            .append_attempt(session_id, seed, self.config.answer_retry_limit)
            .await?;

        Ok(AttemptResult {
            is_correct,
            retry_index: attempt.retry_index,
            retry_remaining: attempt.retry_index < self.config.answer_retry_limit,
        })
    }

    /// Discards a session that never received an answer. Anything else is
    /// rejected: answered sessions must go through `finalize`.
    pub async fn abandon(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), EngineError> {
        let applied = self.sessions.abandon_if_unanswered(session_id, now).await?;
        if applied {
            return Ok(());
        }
        let session = self.get_session(session_id).await?;
        if session.status.is_terminal() {
            Err(EngineError::SessionTerminal)
        } else {
            Err(EngineError::InvalidState(
                "session already has recorded answers",
            ))
        }
    }

    /// Idempotent finalization. The first successful call scores the
    /// session (each question's final attempt is the one with the highest
    /// retry index), transitions it to `Completed` or `TimedOut`, and
    /// applies the profile side effects exactly once. Repeat calls return
    /// the stored result without re-awarding anything; if an earlier call
    /// committed the terminal transition but failed the profile write-back,
    /// a repeat call retries just the write-back.
    pub async fn finalize(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FinalResult, EngineError> {
        loop {
            let session = self.get_session(session_id).await?;
            if session.status.is_terminal() {
                // An abandoned session awards nothing, so it has no
                // pending write-back.
                if session.status != SessionStatus::Abandoned {
                    self.settle_completion_effects(
                        &session,
                        session.score,
                        session.awarded_points,
                        now,
                    )
                    .await?;
                }
                return Ok(stored_result(&session));
            }

            let finals = session.final_attempts();
            let score = finals.values().filter(|a| a.is_correct).count() as u32;
            let awarded_points = i64::from(score) * self.config.points_per_correct_answer;
            let status = if session.is_timed_out(now) {
                SessionStatus::TimedOut
            } else {
                SessionStatus::Completed
            };

            let outcome = FinalOutcome {
                status,
                score,
                awarded_points,
                completed_at: now,
            };
            let applied = self
                .sessions
                .finalize_if_open(session_id, &outcome, session.attempts.len())
                .await?;
            if !applied {
                // Either a concurrent finalize won, or an answer landed
                // between our read and the transition. Re-read and either
                // return the settled result or rescore from the fresh
                // attempt list.
                continue;
            }

            self.settle_completion_effects(&session, score, awarded_points, now)
                .await?;

            return Ok(FinalResult {
                status,
                score,
                total_questions: session.total_questions,
                awarded_points,
                completed_at: now,
            });
        }
    }

    /// Runs the profile write-back under a one-shot claim on the session
    /// row. A failed write-back releases the claim so the next finalize
    /// call can retry; a lost claim means another caller already ran it.
    async fn settle_completion_effects(
        &self,
        session: &QuizSession,
        score: u32,
        awarded_points: i64,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if session.effects_applied {
            return Ok(());
        }
        if !self.sessions.claim_completion_effects(session.id).await? {
            return Ok(());
        }
        if let Err(e) = self
            .apply_completion_effects(session, score, awarded_points, now)
            .await
        {
            if let Err(release_err) = self.sessions.release_completion_effects(session.id).await {
                tracing::error!(
                    "Session {} write-back failed and the retry claim could not be released: {}",
                    session.id,
                    release_err
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Profile write-back for one finalized session: points, streak, badge
    /// evaluation, and the best-effort activity event.
    async fn apply_completion_effects(
        &self,
        session: &QuizSession,
        score: u32,
        awarded_points: i64,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut profile = self.profiles.get(session.user_id).await?;

        if awarded_points > 0 {
            self.profiles
                .add_points(&mut profile, awarded_points)
                .await?;
        }
        let streak = self
            .profiles
            .record_quiz_completion(&mut profile, now)
            .await?;

        // Badge evaluation. A grant failure only loses the badge, never the
        // finalized session, so it is logged and swallowed.
        let mut eligible = Vec::new();
        if streak.first_completion {
            eligible.push((badges::FIRST_QUIZ.to_string(), badges::first_quiz_meta()));
        }
        if score == session.total_questions && session.total_questions > 0 {
            eligible.push((badges::PERFECT_SCORE.to_string(), badges::perfect_score_meta()));
        }
        if streak.current_streak >= self.config.streak_badge_days {
            let completion_date = local_date(now, profile.tz());
            eligible.push((
                badges::streak_code(self.config.streak_badge_days, completion_date),
                badges::streak_meta(self.config.streak_badge_days),
            ));
        }
        for (code, meta) in eligible {
            if let Err(e) = self
                .profiles
                .grant_badge(&mut profile, &code, Some(meta), now)
                .await
            {
                tracing::warn!("Failed to grant badge {}: {}", code, e);
            }
        }

        let event = ActivityEvent::QuizCompleted {
            user_id: session.user_id,
            session_id: session.id,
            score,
            total_questions: session.total_questions,
            awarded_points,
        };
        if let Err(e) = self.activity.record(&event).await {
            tracing::warn!("Failed to record quiz-completion event: {}", e);
        }
        Ok(())
    }
}

fn stored_result(session: &QuizSession) -> FinalResult {
    FinalResult {
        status: session.status,
        score: session.score,
        total_questions: session.total_questions,
        awarded_points: session.awarded_points,
        // A terminal session always has this set; started_at is a safe
        // fallback against a hand-edited row.
        completed_at: session.completed_at.unwrap_or(session.started_at),
    }
}
