// tests/session_tests.rs

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{at, harness, harness_with, question};
use gamification_core::engine::profile::RateLimitedProfile;
use gamification_core::engine::session::QuizSessionEngine;
use gamification_core::models::profile::Profile;
use gamification_core::models::session::{Difficulty, QuizSession, SessionStatus};
use gamification_core::store::memory::{
    MemoryAchievementStore, MemoryActivityLog, MemoryAnswerKeys, MemoryProfileStore,
    MemorySessionStore,
};
use gamification_core::store::{
    AchievementStore, ActivityEvent, ActivityLog, AnswerKeys, FinalOutcome, ProfileStore,
    SessionStore,
};
use gamification_core::{Config, EngineError};
use uuid::Uuid;

#[tokio::test]
async fn create_session_consumes_quiz_quota() {
    let h = harness_with(Config {
        max_quizzes_per_day: 1,
        ..Config::default()
    });
    let now = at(2026, 7, 1, 10, 0);

    h.engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], now)
        .await
        .unwrap();

    let err = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::QuotaExceeded(_)));
}

#[tokio::test]
async fn submitting_after_timeout_expires_the_session() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Medium, 27, vec![question(1)], t0)
        .await
        .unwrap();
    assert_eq!(session.timeout_at, t0 + Duration::minutes(5));
    assert_eq!(session.remaining_seconds(t0 + Duration::minutes(2)), 180);

    // Past the 5-minute limit: the submission is rejected and the session
    // is lazily settled as timed out.
    let late = t0 + Duration::minutes(6);
    let err = h
        .engine
        .submit_answer(session.id, 1, "A", t0, late)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionExpired));

    let settled = h.engine.get_session(session.id).await.unwrap();
    assert_eq!(settled.status, SessionStatus::TimedOut);
    assert_eq!(settled.remaining_seconds(late), 0);
}

#[tokio::test]
async fn finalize_after_timeout_sets_timed_out() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Medium, 27, vec![question(1)], t0)
        .await
        .unwrap();

    let result = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(result.status, SessionStatus::TimedOut);
    assert_eq!(result.score, 0);
}

#[tokio::test]
async fn retry_limit_is_enforced_per_question() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Hard, 27, vec![question(1)], t0)
        .await
        .unwrap();

    // First try wrong, one retry allowed.
    let first = h
        .engine
        .submit_answer(session.id, 1, "B", t0, t0 + Duration::seconds(10))
        .await
        .unwrap();
    assert!(!first.is_correct);
    assert!(first.retry_remaining);

    let second = h
        .engine
        .submit_answer(session.id, 1, "C", t0, t0 + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(second.retry_index, 1);
    assert!(!second.retry_remaining);

    let err = h
        .engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RetryLimitReached));
}

#[tokio::test]
async fn first_answer_moves_session_in_progress() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Started);

    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();
    let reloaded = h.engine.get_session(session.id).await.unwrap();
    assert_eq!(reloaded.status, SessionStatus::InProgress);
}

#[tokio::test]
async fn final_attempt_scores_the_question() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");
    h.answer_keys.set(2, "C");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Medium, 27, vec![question(1), question(2)], t0)
        .await
        .unwrap();

    // Question 1 right first try; question 2 right only on its retry.
    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(10))
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 2, "B", t0, t0 + Duration::seconds(20))
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 2, "C", t0, t0 + Duration::seconds(30))
        .await
        .unwrap();

    let result = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(result.status, SessionStatus::Completed);
    assert_eq!(result.score, 2);
    assert_eq!(result.awarded_points, 20);
}

#[tokio::test]
async fn wrong_retry_overrides_earlier_correct_attempt() {
    // The scoring attempt is the latest one, even when an earlier try was
    // correct.
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Medium, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(10))
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 1, "B", t0, t0 + Duration::seconds(20))
        .await
        .unwrap();

    let result = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(result.score, 0);
}

#[tokio::test]
async fn finalize_is_idempotent_and_awards_points_once() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();

    let first = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap();
    let second = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(first, second);

    let profile = h
        .limiter
        .get_or_create(1, "UTC", t0 + Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(profile.points_lifetime, 10);
    assert_eq!(profile.points_today, 10);

    let completions = h
        .activity
        .events()
        .iter()
        .filter(|e| matches!(e, ActivityEvent::QuizCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn terminal_session_rejects_further_answers() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap();

    let err = h
        .engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::minutes(2))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionTerminal));
}

#[tokio::test]
async fn abandon_only_before_any_answer() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let untouched = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine.abandon(untouched.id, t0).await.unwrap();
    let settled = h.engine.get_session(untouched.id).await.unwrap();
    assert_eq!(settled.status, SessionStatus::Abandoned);

    let answered = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine
        .submit_answer(answered.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();
    let err = h.engine.abandon(answered.id, t0).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn perfect_score_and_first_quiz_badges_granted_on_finalize() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();
    h.engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap();

    let profile = h
        .limiter
        .get_or_create(1, "UTC", t0 + Duration::minutes(2))
        .await
        .unwrap();
    assert!(profile.has_badge("first-quiz"));
    assert!(profile.has_badge("perfect-score"));
    assert!(h.achievements.has_definition("first-quiz"));
}

#[tokio::test]
async fn streak_badge_granted_after_seven_consecutive_days() {
    let h = harness_with(Config {
        max_quizzes_per_day: 100,
        ..Config::default()
    });
    h.answer_keys.set(1, "A");

    for day in 1..=7 {
        let t0 = at(2026, 6, day, 10, 0);
        let session = h
            .engine
            .create_session(1, "UTC", Difficulty::Easy, 23, vec![question(1)], t0)
            .await
            .unwrap();
        h.engine
            .submit_answer(session.id, 1, "A", t0, t0 + chrono::Duration::seconds(5))
            .await
            .unwrap();
        h.engine
            .finalize(session.id, t0 + chrono::Duration::minutes(1))
            .await
            .unwrap();
    }

    let profile = h
        .limiter
        .get_or_create(1, "UTC", at(2026, 6, 8, 0, 0))
        .await
        .unwrap();
    assert_eq!(profile.current_streak, 7);
    // 2026-06-07 falls in ISO week 23 of 2026.
    assert!(profile.has_badge("streak7-2026w23"));
}

#[tokio::test]
async fn finalize_rejects_outcomes_scored_from_a_stale_attempt_list() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();

    // A correct answer lands after a finalizer read the still-empty
    // attempt list.
    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();

    // The zero-answer outcome fails the attempt-count condition, so the
    // session stays open.
    let stale = FinalOutcome {
        status: SessionStatus::Completed,
        score: 0,
        awarded_points: 0,
        completed_at: t0 + Duration::minutes(1),
    };
    let applied = h
        .sessions
        .finalize_if_open(session.id, &stale, 0)
        .await
        .unwrap();
    assert!(!applied);

    // Finalizing again scores from the fresh attempt list.
    let result = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(result.status, SessionStatus::Completed);
    assert_eq!(result.score, 1);
    assert_eq!(result.awarded_points, 10);
}

/// Profile store whose next `add_points` call fails, for exercising the
/// write-back retry path.
struct FlakyProfileStore {
    inner: MemoryProfileStore,
    fail_next_add_points: AtomicBool,
}

#[async_trait]
impl ProfileStore for FlakyProfileStore {
    async fn get(&self, user_id: i64) -> Result<Option<Profile>, EngineError> {
        self.inner.get(user_id).await
    }

    async fn get_or_create(
        &self,
        user_id: i64,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Profile, EngineError> {
        self.inner.get_or_create(user_id, timezone, now).await
    }

    async fn apply_daily_reset(
        &self,
        user_id: i64,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        self.inner
            .apply_daily_reset(user_id, expected_last_reset, now)
            .await
    }

    async fn try_increment_quiz_count(
        &self,
        user_id: i64,
        max: i32,
    ) -> Result<bool, EngineError> {
        self.inner.try_increment_quiz_count(user_id, max).await
    }

    async fn try_increment_flip_count(
        &self,
        user_id: i64,
        max: i32,
    ) -> Result<bool, EngineError> {
        self.inner.try_increment_flip_count(user_id, max).await
    }

    async fn add_points(&self, user_id: i64, delta: i64) -> Result<(), EngineError> {
        if self.fail_next_add_points.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Storage("points update rejected".into()));
        }
        self.inner.add_points(user_id, delta).await
    }

    async fn update_streak(
        &self,
        user_id: i64,
        current_streak: i32,
        longest_streak: i32,
        last_quiz_date: NaiveDate,
    ) -> Result<(), EngineError> {
        self.inner
            .update_streak(user_id, current_streak, longest_streak, last_quiz_date)
            .await
    }

    async fn add_badge_if_absent(&self, user_id: i64, code: &str) -> Result<bool, EngineError> {
        self.inner.add_badge_if_absent(user_id, code).await
    }

    async fn top_by_lifetime_points(&self, limit: i64) -> Result<Vec<Profile>, EngineError> {
        self.inner.top_by_lifetime_points(limit).await
    }
}

#[tokio::test]
async fn failed_profile_write_back_is_retried_by_the_next_finalize() {
    let profiles = Arc::new(FlakyProfileStore {
        inner: MemoryProfileStore::new(),
        fail_next_add_points: AtomicBool::new(false),
    });
    let sessions = Arc::new(MemorySessionStore::new());
    let achievements = Arc::new(MemoryAchievementStore::new());
    let activity = Arc::new(MemoryActivityLog::new());
    let answer_keys = Arc::new(MemoryAnswerKeys::new());
    let config = Config::default();

    let limiter = Arc::new(RateLimitedProfile::new(
        Arc::clone(&profiles) as Arc<dyn ProfileStore>,
        Arc::clone(&achievements) as Arc<dyn AchievementStore>,
        Arc::clone(&activity) as Arc<dyn ActivityLog>,
        config.clone(),
    ));
    let engine = QuizSessionEngine::new(
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&answer_keys) as Arc<dyn AnswerKeys>,
        Arc::clone(&limiter),
        Arc::clone(&activity) as Arc<dyn ActivityLog>,
        config,
    );

    let t0 = at(2026, 7, 1, 10, 0);
    answer_keys.set(1, "A");
    let session = engine
        .create_session(1, "UTC", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();

    // Terminal transition commits, then the points write fails.
    profiles.fail_next_add_points.store(true, Ordering::SeqCst);
    engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap_err();

    let settled = engine.get_session(session.id).await.unwrap();
    assert_eq!(settled.status, SessionStatus::Completed);
    let profile = limiter.get(1).await.unwrap();
    assert_eq!(profile.points_lifetime, 0);

    // The next finalize reruns the write-back instead of short-circuiting
    // on the terminal status.
    let result = engine
        .finalize(session.id, t0 + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(result.awarded_points, 10);

    let profile = limiter.get(1).await.unwrap();
    assert_eq!(profile.points_lifetime, 10);
    assert_eq!(profile.current_streak, 1);

    // And only once: a third finalize changes nothing.
    engine
        .finalize(session.id, t0 + Duration::minutes(3))
        .await
        .unwrap();
    let profile = limiter.get(1).await.unwrap();
    assert_eq!(profile.points_lifetime, 10);
    let completions = activity
        .events()
        .iter()
        .filter(|e| matches!(e, ActivityEvent::QuizCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn finalize_requires_an_existing_profile() {
    let h = harness();
    let t0 = at(2026, 7, 1, 10, 0);

    // A session row whose profile row is gone must not finalize into a
    // fresh profile with a made-up timezone.
    let session = QuizSession {
        id: Uuid::new_v4(),
        user_id: 42,
        difficulty: Difficulty::Easy,
        week_at_start: 27,
        status: SessionStatus::Started,
        started_at: t0,
        timeout_at: t0 + Duration::minutes(5),
        completed_at: None,
        total_questions: 1,
        score: 0,
        awarded_points: 0,
        effects_applied: false,
        questions: vec![question(1)],
        attempts: Vec::new(),
    };
    h.sessions.insert(&session).await.unwrap();

    let err = h
        .engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn finalize_streak_date_follows_the_profile_timezone() {
    let h = harness();
    // 19:30 UTC on July 1st is already 00:30 July 2nd in Asia/Karachi.
    let t0 = at(2026, 7, 1, 19, 30);
    h.answer_keys.set(1, "A");

    let session = h
        .engine
        .create_session(1, "Asia/Karachi", Difficulty::Easy, 27, vec![question(1)], t0)
        .await
        .unwrap();
    h.engine
        .submit_answer(session.id, 1, "A", t0, t0 + Duration::seconds(5))
        .await
        .unwrap();
    h.engine
        .finalize(session.id, t0 + Duration::minutes(1))
        .await
        .unwrap();

    let profile = h.limiter.get(1).await.unwrap();
    assert_eq!(profile.timezone, "Asia/Karachi");
    assert_eq!(
        profile.last_quiz_date,
        Some(NaiveDate::from_ymd_opt(2026, 7, 2).unwrap())
    );
}
