//! Derived read-side values.
//!
//! Nothing computed here is stored: completion rates and day counts depend on
//! "now" and are recomputed on every read.

use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::error::StoreError;
use crate::model::{Habit, HabitView, LeaderboardEntry, LeaderboardResponse};
use crate::storage::{Storage, UserStanding};

/// Length of the trailing window used for the completion rate.
const RATE_WINDOW_DAYS: i64 = 30;

/// Upper bound on leaderboard size.
pub const MAX_LEADERBOARD_LIMIT: u32 = 100;

/// Local calendar days since the latest completion, or `None` if the habit
/// was never completed.
pub fn days_since_last_completion(
    habit: &Habit,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<i64> {
    let last = habit.latest_completion()?;
    let today = now.with_timezone(&offset).date_naive();
    let last_day = last.completed_at.with_timezone(&offset).date_naive();
    Some((today - last_day).num_days())
}

/// Percentage of expected completions achieved over the last 30 local days
/// (today included), rounded to one decimal and capped at 100.
///
/// The expectation depends on the habit's frequency; see
/// [`crate::model::Frequency::expected_per_30_days`].
pub fn completion_rate(habit: &Habit, now: DateTime<Utc>, offset: FixedOffset) -> f64 {
    let today = now.with_timezone(&offset).date_naive();
    let window_start = today - Duration::days(RATE_WINDOW_DAYS - 1);

    let in_window = habit
        .completions
        .iter()
        .map(|c| c.completed_at.with_timezone(&offset).date_naive())
        .filter(|d| *d >= window_start && *d <= today)
        .count();

    let rate = in_window as f64 / habit.frequency.expected_per_30_days() * 100.0;
    (rate.min(100.0) * 10.0).round() / 10.0
}

/// The user-level streak: the best current streak among active habits.
pub fn user_streak(habits: &[Habit]) -> u32 {
    habits
        .iter()
        .filter(|h| h.is_active)
        .map(|h| h.current_streak)
        .max()
        .unwrap_or(0)
}

/// Attach derived statistics to a habit.
pub fn habit_view(habit: Habit, now: DateTime<Utc>, offset: FixedOffset) -> HabitView {
    HabitView {
        completion_rate: completion_rate(&habit, now, offset),
        days_since_last_completion: days_since_last_completion(&habit, now, offset),
        habit,
    }
}

/// Assign competition ranks ("1, 1, 3") to standings already sorted best
/// first. Users share a rank only when their eco points are equal.
pub fn rank_standings(standings: Vec<UserStanding>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(standings.len());

    for (position, standing) in standings.into_iter().enumerate() {
        let rank = match entries.last() {
            Some(prev) if prev.eco_points == standing.eco_points => prev.rank,
            _ => position as u32 + 1,
        };
        entries.push(LeaderboardEntry {
            rank,
            username: standing.username,
            eco_points: standing.eco_points,
            total_carbon_saved: standing.total_carbon_saved,
            badge_count: standing.badge_count,
        });
    }

    entries
}

/// Build the leaderboard of the top `limit` users.
///
/// `limit` is clamped to `1..=MAX_LEADERBOARD_LIMIT`.
pub async fn build_leaderboard(
    storage: &Storage,
    limit: u32,
) -> Result<LeaderboardResponse, StoreError> {
    let limit = limit.clamp(1, MAX_LEADERBOARD_LIMIT);
    let standings = storage.top_users(limit).await?;

    Ok(LeaderboardResponse {
        entries: rank_standings(standings),
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Completion, Frequency};
    use chrono::{Offset, TimeZone};
    use uuid::Uuid;

    fn utc() -> FixedOffset {
        Utc.fix()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 31, 18, 0, 0).unwrap()
    }

    fn habit_completed_days_ago(days_ago: &[i64]) -> Habit {
        let mut habit = Habit::new(Uuid::new_v4(), "Line dry laundry".to_string(), 8, 0.9);
        for d in days_ago {
            habit.completions.push(Completion {
                completed_at: now() - Duration::days(*d),
                note: None,
                photo: None,
                verified: false,
            });
        }
        habit
    }

    fn standing(name: &str, points: i64) -> UserStanding {
        UserStanding {
            username: name.to_string(),
            eco_points: points,
            total_carbon_saved: 0.0,
            badge_count: 0,
        }
    }

    #[test]
    fn test_days_since_last_completion() {
        assert_eq!(
            days_since_last_completion(&habit_completed_days_ago(&[]), now(), utc()),
            None
        );
        assert_eq!(
            days_since_last_completion(&habit_completed_days_ago(&[5, 0]), now(), utc()),
            Some(0)
        );
        assert_eq!(
            days_since_last_completion(&habit_completed_days_ago(&[9, 3]), now(), utc()),
            Some(3)
        );
    }

    #[test]
    fn test_completion_rate_daily() {
        // 15 of 30 days, plus one outside the window
        let days: Vec<i64> = (0..15).chain([45]).collect();
        let habit = habit_completed_days_ago(&days);

        assert_eq!(completion_rate(&habit, now(), utc()), 50.0);
    }

    #[test]
    fn test_completion_rate_window_edges() {
        // Day 29 is the oldest day inside the window, day 30 is outside it
        let habit = habit_completed_days_ago(&[29, 30]);

        assert_eq!(completion_rate(&habit, now(), utc()), 3.3);
    }

    #[test]
    fn test_completion_rate_weekly_is_capped() {
        let mut habit = habit_completed_days_ago(&[0, 1, 2, 3, 4, 5]);
        habit.frequency = Frequency::Weekly;

        assert_eq!(completion_rate(&habit, now(), utc()), 100.0);

        habit.completions.truncate(1);
        assert_eq!(completion_rate(&habit, now(), utc()), 25.0);
    }

    #[test]
    fn test_user_streak_ignores_retired_habits() {
        let mut a = habit_completed_days_ago(&[]);
        a.current_streak = 4;
        let mut b = habit_completed_days_ago(&[]);
        b.current_streak = 9;
        b.is_active = false;

        assert_eq!(user_streak(&[a, b]), 4);
        assert_eq!(user_streak(&[]), 0);
    }

    #[test]
    fn test_rank_standings_shares_ties() {
        let ranked = rank_standings(vec![
            standing("a", 50),
            standing("b", 30),
            standing("c", 30),
            standing("d", 10),
        ]);

        let ranks: Vec<u32> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
    }

    #[tokio::test]
    async fn test_build_leaderboard_clamps_limit() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let board = build_leaderboard(&storage, 0).await.unwrap();
        assert_eq!(board.limit, 1);
        assert!(board.entries.is_empty());

        let board = build_leaderboard(&storage, 5000).await.unwrap();
        assert_eq!(board.limit, MAX_LEADERBOARD_LIMIT);
    }
}
