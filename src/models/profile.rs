// src/models/profile.rs

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::utils::calendar::resolve_tz;

/// Per-user gamification profile: daily counters, lifetime points, streak
/// and badge state. One row per user, created on first access, never
/// deleted by the engine.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,

    /// IANA timezone name (e.g. "Africa/Nairobi"). Daily resets and streak
    /// comparisons use calendar dates in this zone; unparseable values fall
    /// back to UTC.
    pub timezone: String,

    pub points_lifetime: i64,

    /// Points earned since the last daily reset.
    pub points_today: i64,

    pub quizzes_today: i32,
    pub flips_today: i32,

    /// Instant of the most recent daily reset. Resets are lazy: there is no
    /// background sweeper, the comparison happens at every quota touchpoint.
    pub last_reset_at: DateTime<Utc>,

    pub current_streak: i32,
    pub longest_streak: i32,

    /// Calendar date (in the profile timezone) of the most recent quiz
    /// completion; `None` until the first quiz finishes.
    pub last_quiz_date: Option<NaiveDate>,

    /// Badge codes, set semantics (no duplicates).
    pub badges: Vec<String>,
}

impl Profile {
    /// A zeroed profile as created on first access.
    pub fn new(user_id: i64, timezone: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            timezone: timezone.to_string(),
            points_lifetime: 0,
            points_today: 0,
            quizzes_today: 0,
            flips_today: 0,
            last_reset_at: now,
            current_streak: 0,
            longest_streak: 0,
            last_quiz_date: None,
            badges: Vec::new(),
        }
    }

    pub fn tz(&self) -> Tz {
        resolve_tz(&self.timezone)
    }

    pub fn has_badge(&self, code: &str) -> bool {
        self.badges.iter().any(|b| b == code)
    }
}

/// Outcome of a streak update, returned so finalization can evaluate badge
/// eligibility without re-deriving what changed.
#[derive(Debug, Clone, Copy)]
pub struct StreakUpdate {
    pub current_streak: i32,
    pub longest_streak: i32,
    /// True when this was the user's first recorded quiz completion ever.
    pub first_completion: bool,
    /// True when the completion extended or started a streak today (false
    /// for an idempotent same-day repeat).
    pub changed: bool,
}
