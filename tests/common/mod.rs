// tests/common/mod.rs
//
// Shared wiring for the integration tests: every engine component built on
// the in-memory stores, with handles kept for direct assertions.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use gamification_core::engine::generation::GenerationGate;
use gamification_core::engine::profile::RateLimitedProfile;
use gamification_core::engine::session::QuizSessionEngine;
use gamification_core::engine::similarity::SimilarityCache;
use gamification_core::models::session::QuestionSnapshot;
use gamification_core::store::memory::{
    MemoryAchievementStore, MemoryActivityLog, MemoryAnswerKeys, MemoryGenerationLogStore,
    MemoryProfileStore, MemorySessionStore, MemorySimilarityStore,
};
use gamification_core::store::{
    AchievementStore, ActivityLog, AnswerKeys, GenerationLogStore, ProfileStore, SessionStore,
    SimilarityStore,
};
use gamification_core::Config;

pub struct Harness {
    pub profiles: Arc<MemoryProfileStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub similarity: Arc<MemorySimilarityStore>,
    pub generation_logs: Arc<MemoryGenerationLogStore>,
    pub achievements: Arc<MemoryAchievementStore>,
    pub activity: Arc<MemoryActivityLog>,
    pub answer_keys: Arc<MemoryAnswerKeys>,
    pub limiter: Arc<RateLimitedProfile>,
    pub cache: Arc<SimilarityCache>,
    pub engine: QuizSessionEngine,
    pub gate: GenerationGate,
    pub config: Config,
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let profiles = Arc::new(MemoryProfileStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let similarity = Arc::new(MemorySimilarityStore::new());
    let generation_logs = Arc::new(MemoryGenerationLogStore::new());
    let achievements = Arc::new(MemoryAchievementStore::new());
    let activity = Arc::new(MemoryActivityLog::new());
    let answer_keys = Arc::new(MemoryAnswerKeys::new());

    let limiter = Arc::new(RateLimitedProfile::new(
        Arc::clone(&profiles) as Arc<dyn ProfileStore>,
        Arc::clone(&achievements) as Arc<dyn AchievementStore>,
        Arc::clone(&activity) as Arc<dyn ActivityLog>,
        config.clone(),
    ));
    let cache = Arc::new(SimilarityCache::new(
        Arc::clone(&similarity) as Arc<dyn SimilarityStore>,
        config.clone(),
    ));
    let engine = QuizSessionEngine::new(
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&answer_keys) as Arc<dyn AnswerKeys>,
        Arc::clone(&limiter),
        Arc::clone(&activity) as Arc<dyn ActivityLog>,
        config.clone(),
    );
    let gate = GenerationGate::new(
        Arc::clone(&cache),
        Arc::clone(&generation_logs) as Arc<dyn GenerationLogStore>,
        config.clone(),
    );

    Harness {
        profiles,
        sessions,
        similarity,
        generation_logs,
        achievements,
        activity,
        answer_keys,
        limiter,
        cache,
        engine,
        gate,
        config,
    }
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn question(question_id: i64) -> QuestionSnapshot {
    QuestionSnapshot {
        question_id,
        prompt: format!("Question {}", question_id),
        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
    }
}
