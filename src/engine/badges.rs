// src/engine/badges.rs
//
// Badge codes and display metadata evaluated at session finalization.

use chrono::NaiveDate;

use crate::models::achievement::BadgeMeta;
use crate::utils::calendar::iso_year_week;

pub const FIRST_QUIZ: &str = "first-quiz";
pub const PERFECT_SCORE: &str = "perfect-score";

/// Streak badges are keyed by ISO year+week of the completion date, so a
/// long-running streak earns a fresh badge each week instead of one grant
/// forever.
pub fn streak_code(days: i32, completion_date: NaiveDate) -> String {
    let (year, week) = iso_year_week(completion_date);
    format!("streak{}-{}w{:02}", days, year, week)
}

pub fn streak_meta(days: i32) -> BadgeMeta {
    BadgeMeta::new(
        format!("{}-Day Streak", days),
        format!("Completed a quiz on {} consecutive days.", days),
    )
}

pub fn first_quiz_meta() -> BadgeMeta {
    BadgeMeta::new("First Quiz", "Completed your very first quiz.")
}

pub fn perfect_score_meta() -> BadgeMeta {
    BadgeMeta::new("Perfect Score", "Answered every question in a quiz correctly.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_code_is_keyed_by_iso_week() {
        // 2026-01-01 falls in ISO week 1 of 2026.
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(streak_code(7, date), "streak7-2026w01");
        // 2027-01-01 is a Friday in ISO week 53 of 2026.
        let spillover = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
        assert_eq!(streak_code(7, spillover), "streak7-2026w53");
    }
}
