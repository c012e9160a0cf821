//! Badge catalogue.
//!
//! Two families of badges exist: a one-time starter badge for the very first
//! completion, and a ladder of streak milestones. The catalogue is a plain
//! value handed to the engine, so tests and deployments can swap the ladder
//! without touching the completion rules.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::Badge;

/// Static description of a badge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeDefinition {
    pub name: String,
    pub description: String,
    pub icon: String,
}

impl BadgeDefinition {
    pub fn new(name: &str, description: &str, icon: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
        }
    }

    /// Instantiate this definition as an earned badge.
    pub fn award(&self, earned_at: DateTime<Utc>) -> Badge {
        Badge {
            name: self.name.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            earned_at,
        }
    }
}

/// A streak length that unlocks a badge when hit exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakMilestone {
    pub threshold_days: u32,
    pub badge: BadgeDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogueError {
    #[error("milestone threshold must be at least 1 day")]
    ZeroThreshold,

    #[error("milestone thresholds must be strictly increasing ({previous} then {next})")]
    NotIncreasing { previous: u32, next: u32 },

    #[error("duplicate badge name: {0}")]
    DuplicateName(String),
}

/// The full set of badges the engine can award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeCatalogue {
    starter: BadgeDefinition,
    milestones: Vec<StreakMilestone>,
}

impl BadgeCatalogue {
    /// Build a catalogue, validating the milestone ladder.
    ///
    /// Thresholds must be non-zero and strictly increasing, and every badge
    /// name (the starter included) must be unique.
    pub fn new(
        starter: BadgeDefinition,
        milestones: Vec<StreakMilestone>,
    ) -> Result<Self, CatalogueError> {
        let mut previous: Option<u32> = None;
        let mut names = vec![starter.name.as_str()];

        for milestone in &milestones {
            if milestone.threshold_days == 0 {
                return Err(CatalogueError::ZeroThreshold);
            }
            if let Some(prev) = previous {
                if milestone.threshold_days <= prev {
                    return Err(CatalogueError::NotIncreasing {
                        previous: prev,
                        next: milestone.threshold_days,
                    });
                }
            }
            if names.contains(&milestone.badge.name.as_str()) {
                return Err(CatalogueError::DuplicateName(milestone.badge.name.clone()));
            }
            names.push(milestone.badge.name.as_str());
            previous = Some(milestone.threshold_days);
        }

        Ok(Self {
            starter,
            milestones,
        })
    }

    pub fn starter(&self) -> &BadgeDefinition {
        &self.starter
    }

    pub fn milestones(&self) -> &[StreakMilestone] {
        &self.milestones
    }

    /// The milestone whose threshold equals `streak` exactly, if any.
    pub fn milestone_for(&self, streak: u32) -> Option<&StreakMilestone> {
        self.milestones
            .iter()
            .find(|m| m.threshold_days == streak)
    }
}

impl Default for BadgeCatalogue {
    fn default() -> Self {
        let ladder = [
            (7, "Week Warrior", "Kept a habit going for 7 days in a row", "🔥"),
            (14, "Fortnight Force", "Kept a habit going for 14 days in a row", "🌿"),
            (30, "Monthly Master", "Kept a habit going for 30 days in a row", "🌍"),
            (50, "Habit Hero", "Kept a habit going for 50 days in a row", "🦸"),
            (100, "Century Champion", "Kept a habit going for 100 days in a row", "💯"),
            (200, "Green Guardian", "Kept a habit going for 200 days in a row", "🛡️"),
            (365, "Year of Green", "Kept a habit going for a full year", "🏆"),
        ];

        Self {
            starter: BadgeDefinition::new("Eco Starter", "Completed your first eco-habit", "🌱"),
            milestones: ladder
                .into_iter()
                .map(|(days, name, description, icon)| StreakMilestone {
                    threshold_days: days,
                    badge: BadgeDefinition::new(name, description, icon),
                })
                .collect(),
        }
    }
}
