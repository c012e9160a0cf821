//! Habit progress engine.
//!
//! Decides whether a completion attempt is accepted and, if so, computes the
//! next streak state, the completion record to append, the reward delta for
//! the owning user and any badges newly earned.
//!
//! # Streak rules
//!
//! Streaks count consecutive *local calendar days*, where "local" is the UTC
//! offset the engine was built with:
//!
//! - first completion ever: streak becomes 1
//! - previous completion yesterday: streak grows by 1
//! - previous completion two or more days ago: streak restarts at 1
//! - previous completion today: rejected with
//!   [`CompletionRejected::AlreadyCompletedToday`]
//!
//! # Purity
//!
//! The engine performs no I/O and never reads the clock. It borrows the
//! habit and user snapshots it is given and returns new values; the caller
//! persists them (see [`crate::storage::Storage::commit_completion`]). A
//! snapshot alone cannot rule out a concurrent same-day completion, so the
//! commit is guarded by a version check at the storage layer.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use thiserror::Error;
use tracing::debug;

use crate::badges::BadgeCatalogue;
use crate::model::{Badge, Completion, Habit, User};

/// Why a completion attempt was turned down.
///
/// These are routine outcomes, reported back to the end user, and are
/// unrelated to storage or authentication failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionRejected {
    #[error("habit is not active")]
    NotActive,

    #[error("habit already completed today, come back tomorrow")]
    AlreadyCompletedToday,
}

/// Optional details supplied with a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionAttempt {
    pub note: Option<String>,
    pub photo: Option<String>,
}

/// Everything an accepted completion produces.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    /// The habit with the completion appended and streaks updated.
    pub habit: Habit,

    /// Points to add to the owner's `eco_points`.
    pub points_delta: i64,

    /// Carbon to add to the owner's `total_carbon_saved`.
    pub carbon_delta: f64,

    /// Badges the owner did not hold before this completion.
    pub new_badges: Vec<Badge>,

    /// The habit's new current streak.
    pub streak: u32,
}

/// The completion state machine.
#[derive(Debug, Clone)]
pub struct ProgressEngine {
    catalogue: BadgeCatalogue,
    offset: FixedOffset,
}

impl Default for ProgressEngine {
    fn default() -> Self {
        Self::new(BadgeCatalogue::default(), utc_offset())
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

impl ProgressEngine {
    pub fn new(catalogue: BadgeCatalogue, offset: FixedOffset) -> Self {
        Self { catalogue, offset }
    }

    pub fn catalogue(&self) -> &BadgeCatalogue {
        &self.catalogue
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The local calendar day an instant falls on.
    pub fn local_day(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Record a completion of `habit` by `user` at `now`.
    ///
    /// Ownership (`habit.owner == user.id`) is checked by the caller before
    /// this is invoked.
    ///
    /// # Errors
    ///
    /// - [`CompletionRejected::NotActive`] if the habit is retired
    /// - [`CompletionRejected::AlreadyCompletedToday`] if a completion
    ///   already falls on `now`'s local day
    ///
    /// Neither input is modified on any path.
    pub fn record_completion(
        &self,
        habit: &Habit,
        user: &User,
        attempt: CompletionAttempt,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, CompletionRejected> {
        if !habit.is_active {
            return Err(CompletionRejected::NotActive);
        }

        let today = self.local_day(now);
        let previous_day = habit
            .latest_completion()
            .map(|c| self.local_day(c.completed_at));

        let streak = match previous_day {
            None => 1,
            Some(day) => match (today - day).num_days() {
                // Zero, or negative when the stored history is ahead of `now`
                d if d < 1 => return Err(CompletionRejected::AlreadyCompletedToday),
                1 => habit.current_streak.saturating_add(1),
                _ => 1,
            },
        };

        let mut updated = habit.clone();
        updated.current_streak = streak;
        updated.longest_streak = updated.longest_streak.max(streak);
        updated.completions.push(Completion {
            completed_at: now,
            note: attempt.note,
            photo: attempt.photo,
            verified: false,
        });

        let new_badges = self.evaluate_badges(&updated, user, now);

        debug!(
            habit_id = %habit.id,
            streak,
            longest = updated.longest_streak,
            badges = new_badges.len(),
            "Completion accepted"
        );

        Ok(CompletionOutcome {
            points_delta: habit.eco_points,
            carbon_delta: habit.carbon_saved,
            new_badges,
            streak,
            habit: updated,
        })
    }

    /// Badges earned by the completion just appended to `habit`.
    ///
    /// Milestones match on exact streak equality, so a streak that skips
    /// past a threshold never earns it retroactively.
    fn evaluate_badges(&self, habit: &Habit, user: &User, now: DateTime<Utc>) -> Vec<Badge> {
        let mut earned = Vec::new();

        let starter = self.catalogue.starter();
        if habit.completions.len() == 1 && !user.has_badge(&starter.name) {
            earned.push(starter.award(now));
        }

        if let Some(milestone) = self.catalogue.milestone_for(habit.current_streak) {
            if !user.has_badge(&milestone.badge.name) {
                earned.push(milestone.badge.award(now));
            }
        }

        earned
    }
}
