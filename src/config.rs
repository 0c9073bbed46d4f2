// src/config.rs

use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

/// Engine limits and tunables.
///
/// Every knob has a default; environment variables (GAMIFY_ prefix) override
/// them so deployments can tune quotas without a rebuild.
#[derive(Debug, Clone)]
pub struct Config {
    /// Max quiz sessions a user may start per calendar day.
    pub max_quizzes_per_day: i32,
    /// Max flashcard flips a user may perform per calendar day.
    pub max_flips_per_day: i32,
    /// Session lifetime from creation to timeout.
    pub session_max_minutes: i64,
    /// Extra attempts permitted per question after the first (0 = no retry).
    pub answer_retry_limit: u32,
    pub points_per_correct_answer: i64,
    /// Bounded retries inside the generation gate.
    pub generation_max_attempts: u32,
    /// Cosine similarity at or above this counts as a duplicate.
    pub similarity_threshold: f32,
    /// Similarity records retained per (user, content kind) before FIFO eviction.
    pub keep_recent: usize,
    /// Cross-week fallback cap for the duplicate check.
    pub recent_fallback_limit: usize,
    /// Consecutive calendar days required for the streak badge.
    pub streak_badge_days: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_quizzes_per_day: 10,
            max_flips_per_day: 50,
            session_max_minutes: 5,
            answer_retry_limit: 1,
            points_per_correct_answer: 10,
            generation_max_attempts: 3,
            similarity_threshold: 0.6,
            keep_recent: 1000,
            recent_fallback_limit: 200,
            streak_badge_days: 7,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let defaults = Config::default();
        Self {
            max_quizzes_per_day: env_or("GAMIFY_MAX_QUIZZES_PER_DAY", defaults.max_quizzes_per_day),
            max_flips_per_day: env_or("GAMIFY_MAX_FLIPS_PER_DAY", defaults.max_flips_per_day),
            session_max_minutes: env_or("GAMIFY_SESSION_MAX_MINUTES", defaults.session_max_minutes),
            answer_retry_limit: env_or("GAMIFY_ANSWER_RETRY_LIMIT", defaults.answer_retry_limit),
            points_per_correct_answer: env_or(
                "GAMIFY_POINTS_PER_CORRECT_ANSWER",
                defaults.points_per_correct_answer,
            ),
            generation_max_attempts: env_or(
                "GAMIFY_GENERATION_MAX_ATTEMPTS",
                defaults.generation_max_attempts,
            ),
            similarity_threshold: env_or(
                "GAMIFY_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            keep_recent: env_or("GAMIFY_KEEP_RECENT", defaults.keep_recent),
            recent_fallback_limit: env_or(
                "GAMIFY_RECENT_FALLBACK_LIMIT",
                defaults.recent_fallback_limit,
            ),
            streak_badge_days: env_or("GAMIFY_STREAK_BADGE_DAYS", defaults.streak_badge_days),
        }
    }
}

/// Reads an environment variable, falling back to `default` when the
/// variable is missing or fails to parse. A malformed value is logged rather
/// than crashing startup.
fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
