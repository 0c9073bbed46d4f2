// src/store/memory.rs
//
// In-process store implementations. Each store serializes its mutations
// behind one mutex, which makes the conditional updates (quota increments,
// finalize-if-open, attempt appends) genuinely atomic; the Postgres store
// reaches the same guarantees with conditional single-row UPDATEs. Used by
// the test suite and as the reference semantics for the store contracts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::generation::GenerationAttemptLog;
use crate::models::profile::Profile;
use crate::models::session::{AnswerAttempt, QuizSession, SessionStatus};
use crate::models::similarity::{ContentKind, SimilarityRecord};
use crate::store::{
    AchievementStore, ActivityEvent, ActivityLog, AnswerKeys, AttemptSeed, FinalOutcome,
    GenerationLogStore, ProfileStore, SessionStore, SimilarityStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<i64, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, user_id: i64) -> Result<Option<Profile>, EngineError> {
        Ok(lock(&self.profiles).get(&user_id).cloned())
    }

    async fn get_or_create(
        &self,
        user_id: i64,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Profile, EngineError> {
        let mut profiles = lock(&self.profiles);
        Ok(profiles
            .entry(user_id)
            .or_insert_with(|| Profile::new(user_id, timezone, now))
            .clone())
    }

    async fn apply_daily_reset(
        &self,
        user_id: i64,
        expected_last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))?;
        if profile.last_reset_at != expected_last_reset {
            return Ok(false);
        }
        profile.quizzes_today = 0;
        profile.flips_today = 0;
        profile.points_today = 0;
        profile.last_reset_at = now;
        Ok(true)
    }

    async fn try_increment_quiz_count(
        &self,
        user_id: i64,
        max: i32,
    ) -> Result<bool, EngineError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))?;
        if profile.quizzes_today >= max {
            return Ok(false);
        }
        profile.quizzes_today += 1;
        Ok(true)
    }

    async fn try_increment_flip_count(
        &self,
        user_id: i64,
        max: i32,
    ) -> Result<bool, EngineError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))?;
        if profile.flips_today >= max {
            return Ok(false);
        }
        profile.flips_today += 1;
        Ok(true)
    }

    async fn add_points(&self, user_id: i64, delta: i64) -> Result<(), EngineError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))?;
        profile.points_lifetime += delta;
        profile.points_today += delta;
        Ok(())
    }

    async fn update_streak(
        &self,
        user_id: i64,
        current_streak: i32,
        longest_streak: i32,
        last_quiz_date: NaiveDate,
    ) -> Result<(), EngineError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))?;
        profile.current_streak = current_streak;
        profile.longest_streak = longest_streak;
        profile.last_quiz_date = Some(last_quiz_date);
        Ok(())
    }

    async fn add_badge_if_absent(&self, user_id: i64, code: &str) -> Result<bool, EngineError> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))?;
        if profile.has_badge(code) {
            return Ok(false);
        }
        profile.badges.push(code.to_string());
        Ok(true)
    }

    async fn top_by_lifetime_points(&self, limit: i64) -> Result<Vec<Profile>, EngineError> {
        let profiles = lock(&self.profiles);
        let mut all: Vec<Profile> = profiles.values().cloned().collect();
        all.sort_by(|a, b| b.points_lifetime.cmp(&a.points_lifetime));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, QuizSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &QuizSession) -> Result<(), EngineError> {
        lock(&self.sessions).insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QuizSession>, EngineError> {
        Ok(lock(&self.sessions).get(&id).cloned())
    }

    async fn append_attempt(
        &self,
        session_id: Uuid,
        seed: AttemptSeed,
        retry_limit: u32,
    ) -> Result<AnswerAttempt, EngineError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))?;

        if session.status.is_terminal() {
            return Err(EngineError::SessionTerminal);
        }

        let used = session.attempts_for(seed.question_id) as u32;
        if used > retry_limit {
            return Err(EngineError::RetryLimitReached);
        }

        let attempt = AnswerAttempt {
            question_id: seed.question_id,
            selected_option: seed.selected_option,
            is_correct: seed.is_correct,
            retry_index: used,
            started_at: seed.started_at,
            answered_at: seed.answered_at,
        };
        session.attempts.push(attempt.clone());
        if session.status == SessionStatus::Started {
            session.status = SessionStatus::InProgress;
        }
        Ok(attempt)
    }

    async fn finalize_if_open(
        &self,
        session_id: Uuid,
        outcome: &FinalOutcome,
        expected_attempts: usize,
    ) -> Result<bool, EngineError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))?;
        if session.status.is_terminal() || session.attempts.len() != expected_attempts {
            return Ok(false);
        }
        session.status = outcome.status;
        session.score = outcome.score;
        session.awarded_points = outcome.awarded_points;
        session.completed_at = Some(outcome.completed_at);
        Ok(true)
    }

    async fn claim_completion_effects(&self, session_id: Uuid) -> Result<bool, EngineError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))?;
        if !session.status.is_terminal() || session.effects_applied {
            return Ok(false);
        }
        session.effects_applied = true;
        Ok(true)
    }

    async fn release_completion_effects(&self, session_id: Uuid) -> Result<(), EngineError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))?;
        session.effects_applied = false;
        Ok(())
    }

    async fn abandon_if_unanswered(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))?;
        if session.status != SessionStatus::Started || !session.attempts.is_empty() {
            return Ok(false);
        }
        session.status = SessionStatus::Abandoned;
        session.completed_at = Some(now);
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemorySimilarityStore {
    records: Mutex<Vec<SimilarityRecord>>,
}

impl MemorySimilarityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for test assertions.
    pub fn records(&self) -> Vec<SimilarityRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl SimilarityStore for MemorySimilarityStore {
    async fn insert(&self, record: &SimilarityRecord) -> Result<(), EngineError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }

    async fn vectors(
        &self,
        user_id: i64,
        week: i32,
        kind: ContentKind,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.user_id == user_id && r.week == week && r.content_kind == kind)
            .map(|r| r.embedding.clone())
            .collect())
    }

    async fn recent_vectors(
        &self,
        user_id: i64,
        kind: ContentKind,
        limit: usize,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        let records = lock(&self.records);
        let mut matching: Vec<&SimilarityRecord> = records
            .iter()
            .filter(|r| r.user_id == user_id && r.content_kind == kind)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|r| r.embedding.clone())
            .collect())
    }

    async fn evict_oldest(
        &self,
        user_id: i64,
        kind: ContentKind,
        keep_recent: usize,
    ) -> Result<u64, EngineError> {
        let mut records = lock(&self.records);
        let mut matching: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.user_id == user_id && r.content_kind == kind)
            .map(|(i, _)| i)
            .collect();
        if matching.len() <= keep_recent {
            return Ok(0);
        }
        // Oldest first, then drop everything beyond the retained tail.
        matching.sort_by(|&a, &b| records[a].created_at.cmp(&records[b].created_at));
        let excess: Vec<usize> = matching[..matching.len() - keep_recent].to_vec();
        let deleted = excess.len() as u64;
        let mut doomed = excess;
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for index in doomed {
            records.remove(index);
        }
        Ok(deleted)
    }
}

#[derive(Default)]
pub struct MemoryGenerationLogStore {
    entries: Mutex<Vec<GenerationAttemptLog>>,
}

impl MemoryGenerationLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<GenerationAttemptLog> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl GenerationLogStore for MemoryGenerationLogStore {
    async fn append(&self, entry: &GenerationAttemptLog) -> Result<(), EngineError> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAchievementStore {
    definitions: Mutex<HashMap<String, (String, String, DateTime<Utc>)>>,
}

impl MemoryAchievementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_definition(&self, code: &str) -> bool {
        lock(&self.definitions).contains_key(code)
    }
}

#[async_trait]
impl AchievementStore for MemoryAchievementStore {
    async fn ensure_definition(
        &self,
        code: &str,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        lock(&self.definitions)
            .entry(code.to_string())
            .or_insert_with(|| (name.to_string(), description.to_string(), now));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryActivityLog {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn record(&self, event: &ActivityEvent) -> Result<(), EngineError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Static answer-key table for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryAnswerKeys {
    keys: Mutex<HashMap<i64, String>>,
}

impl MemoryAnswerKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, question_id: i64, correct_option: impl Into<String>) {
        lock(&self.keys).insert(question_id, correct_option.into());
    }
}

#[async_trait]
impl AnswerKeys for MemoryAnswerKeys {
    async fn correct_option(&self, question_id: i64) -> Result<Option<String>, EngineError> {
        Ok(lock(&self.keys).get(&question_id).cloned())
    }
}
