// src/models/session.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quiz session lifecycle. `Completed`, `TimedOut` and `Abandoned` are
/// terminal: once reached, the session is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    InProgress,
    Completed,
    TimedOut,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::TimedOut | SessionStatus::Abandoned
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Started => "started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::TimedOut => "timed_out",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "started" => Some(SessionStatus::Started),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "timed_out" => Some(SessionStatus::TimedOut),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

/// Answer-stripped view of a question as shown to the user. The correct
/// option never enters the session document; the answer key is looked up
/// through its own seam at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSnapshot {
    pub question_id: i64,
    pub prompt: String,
    pub options: Vec<String>,
}

/// One recorded answer. Append-only within a session until the session
/// reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerAttempt {
    pub question_id: i64,
    pub selected_option: String,
    pub is_correct: bool,
    /// 0 = first try.
    pub retry_index: u32,
    /// When the question was shown.
    pub started_at: DateTime<Utc>,
    pub answered_at: DateTime<Utc>,
}

impl AnswerAttempt {
    /// Seconds between showing the question and answering, clamped to >= 0
    /// against client clock skew.
    pub fn time_taken_seconds(&self) -> i64 {
        (self.answered_at - self.started_at).num_seconds().max(0)
    }
}

/// One timed attempt at a set of quiz questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub id: Uuid,
    pub user_id: i64,
    pub difficulty: Difficulty,
    /// ISO week number captured at creation; similarity records for content
    /// generated into this session share the key.
    pub week_at_start: i32,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    /// `started_at` + the configured session lifetime.
    pub timeout_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_questions: u32,
    pub score: u32,
    pub awarded_points: i64,
    /// Whether the profile write-back (points, streak, badges) for this
    /// terminal session has completed. Lets a later finalize retry the
    /// write-back if it failed after the terminal transition committed.
    #[serde(default)]
    pub effects_applied: bool,
    pub questions: Vec<QuestionSnapshot>,
    pub attempts: Vec<AnswerAttempt>,
}

impl QuizSession {
    /// Terminal statuses resolve directly; open sessions compare the clock
    /// against `timeout_at`.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SessionStatus::TimedOut => true,
            s if s.is_terminal() => false,
            _ => now >= self.timeout_at,
        }
    }

    /// Seconds until timeout; 0 for terminal or already-expired sessions.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        if self.status.is_terminal() {
            return 0;
        }
        (self.timeout_at - now).num_seconds().max(0)
    }

    pub fn has_question(&self, question_id: i64) -> bool {
        self.questions.iter().any(|q| q.question_id == question_id)
    }

    pub fn attempts_for(&self, question_id: i64) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.question_id == question_id)
            .count()
    }

    /// The scoring attempt per question: the one with the highest
    /// retry_index.
    pub fn final_attempts(&self) -> HashMap<i64, &AnswerAttempt> {
        let mut finals: HashMap<i64, &AnswerAttempt> = HashMap::new();
        for attempt in &self.attempts {
            match finals.get(&attempt.question_id) {
                Some(existing) if existing.retry_index >= attempt.retry_index => {}
                _ => {
                    finals.insert(attempt.question_id, attempt);
                }
            }
        }
        finals
    }
}

/// Result of a single answer submission.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub is_correct: bool,
    pub retry_index: u32,
    /// Whether the question still has a retry available after this attempt.
    pub retry_remaining: bool,
}

/// Result of session finalization. Stable across repeated finalize calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalResult {
    pub status: SessionStatus,
    pub score: u32,
    pub total_questions: u32,
    pub awarded_points: i64,
    pub completed_at: DateTime<Utc>,
}
