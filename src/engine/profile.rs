// src/engine/profile.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{EngineError, QuotaKind};
use crate::models::achievement::BadgeMeta;
use crate::models::profile::{Profile, StreakUpdate};
use crate::store::{AchievementStore, ActivityEvent, ActivityLog, ProfileStore};
use crate::utils::calendar::{is_next_day, local_date};

/// Per-user daily rate limiting and streak/badge bookkeeping.
///
/// All "periodic" behavior is lazy: the daily reset happens at the first
/// quota touchpoint after local midnight, never on a timer. Every operation
/// takes `now` explicitly so callers (and tests) control the clock.
pub struct RateLimitedProfile {
    profiles: Arc<dyn ProfileStore>,
    achievements: Arc<dyn AchievementStore>,
    activity: Arc<dyn ActivityLog>,
    config: Config,
}

impl RateLimitedProfile {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        achievements: Arc<dyn AchievementStore>,
        activity: Arc<dyn ActivityLog>,
        config: Config,
    ) -> Self {
        Self {
            profiles,
            achievements,
            activity,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the existing profile or creates a zeroed one with
    /// `last_reset_at = now`.
    pub async fn get_or_create(
        &self,
        user_id: i64,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Profile, EngineError> {
        self.profiles.get_or_create(user_id, timezone, now).await
    }

    /// Returns the existing profile, with its own stored timezone intact.
    pub async fn get(&self, user_id: i64) -> Result<Profile, EngineError> {
        self.profiles
            .get(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("profile {}", user_id)))
    }

    /// Pure decision half of the lazy reset: true when `now` falls on a
    /// different calendar date than the last reset, in the profile's
    /// timezone.
    pub fn needs_reset(profile: &Profile, now: DateTime<Utc>) -> bool {
        let tz = profile.tz();
        local_date(profile.last_reset_at, tz) != local_date(now, tz)
    }

    /// Zeroes the daily counters when the local calendar day has rolled
    /// over. Idempotent: a second call at the same instant is a no-op, and
    /// a concurrent request that loses the compare-and-swap just reloads
    /// the already-reset row.
    pub async fn reset_if_new_day(
        &self,
        profile: &mut Profile,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        if !Self::needs_reset(profile, now) {
            return Ok(false);
        }

        let applied = self
            .profiles
            .apply_daily_reset(profile.user_id, profile.last_reset_at, now)
            .await?;
        if applied {
            profile.quizzes_today = 0;
            profile.flips_today = 0;
            profile.points_today = 0;
            profile.last_reset_at = now;
            tracing::debug!("Daily counters reset for user {}", profile.user_id);
            Ok(true)
        } else {
            // Another request reset first; converge on its view.
            *profile = self
                .profiles
                .get(profile.user_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("profile {}", profile.user_id)))?;
            Ok(false)
        }
    }

    /// Consumes one quiz slot for today, or fails with `QuotaExceeded`.
    /// The check and the increment are one atomic store operation.
    pub async fn try_consume_quiz_quota(
        &self,
        profile: &mut Profile,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.reset_if_new_day(profile, now).await?;
        let consumed = self
            .profiles
            .try_increment_quiz_count(profile.user_id, self.config.max_quizzes_per_day)
            .await?;
        if !consumed {
            return Err(EngineError::QuotaExceeded(QuotaKind::Quiz));
        }
        profile.quizzes_today += 1;
        Ok(())
    }

    /// Symmetric flashcard-flip quota.
    pub async fn try_consume_flip_quota(
        &self,
        profile: &mut Profile,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.reset_if_new_day(profile, now).await?;
        let consumed = self
            .profiles
            .try_increment_flip_count(profile.user_id, self.config.max_flips_per_day)
            .await?;
        if !consumed {
            return Err(EngineError::QuotaExceeded(QuotaKind::Flip));
        }
        profile.flips_today += 1;
        Ok(())
    }

    /// Atomically adds `delta` to lifetime and today points.
    pub async fn add_points(
        &self,
        profile: &mut Profile,
        delta: i64,
    ) -> Result<(), EngineError> {
        self.profiles.add_points(profile.user_id, delta).await?;
        profile.points_lifetime += delta;
        profile.points_today += delta;
        Ok(())
    }

    /// Streak bookkeeping for one quiz completion. Comparisons use calendar
    /// dates in the profile's timezone: finishing at 23:58 and again at
    /// 00:05 local time counts as consecutive days.
    pub async fn record_quiz_completion(
        &self,
        profile: &mut Profile,
        completed_at: DateTime<Utc>,
    ) -> Result<StreakUpdate, EngineError> {
        let today = local_date(completed_at, profile.tz());
        let first_completion = profile.last_quiz_date.is_none();

        let (current, changed) = match profile.last_quiz_date {
            None => (1, true),
            Some(last) if last == today => (profile.current_streak, false),
            Some(last) if is_next_day(last, today) => (profile.current_streak + 1, true),
            Some(_) => (1, true),
        };
        let longest = profile.longest_streak.max(current);

        self.profiles
            .update_streak(profile.user_id, current, longest, today)
            .await?;
        profile.current_streak = current;
        profile.longest_streak = longest;
        profile.last_quiz_date = Some(today);

        Ok(StreakUpdate {
            current_streak: current,
            longest_streak: longest,
            first_completion,
            changed,
        })
    }

    /// Grants `code` to the profile if absent, lazily creating the master
    /// `AchievementDefinition`. Returns whether the badge was newly
    /// granted. The activity-feed event is best-effort.
    pub async fn grant_badge(
        &self,
        profile: &mut Profile,
        code: &str,
        meta: Option<BadgeMeta>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let meta = meta.unwrap_or_else(|| BadgeMeta::derived(code));
        self.achievements
            .ensure_definition(code, &meta.name, &meta.description, now)
            .await?;

        let granted = self.profiles.add_badge_if_absent(profile.user_id, code).await?;
        if !granted {
            return Ok(false);
        }
        profile.badges.push(code.to_string());
        tracing::debug!("Badge {} granted to user {}", code, profile.user_id);

        let event = ActivityEvent::BadgeGranted {
            user_id: profile.user_id,
            code: code.to_string(),
        };
        if let Err(e) = self.activity.record(&event).await {
            tracing::warn!("Failed to record badge-grant event: {}", e);
        }
        Ok(true)
    }

    /// Leaderboard read-through.
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<Profile>, EngineError> {
        self.profiles.top_by_lifetime_points(limit).await
    }
}
