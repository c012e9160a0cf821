//! Data models for EarthTogether.
//!
//! # Ownership
//!
//! Every [`Habit`] belongs to exactly one [`User`]. Completions are children of
//! a habit and are append-only; badges are children of a user and are unique
//! by name. Reward accumulators on the user (`eco_points`,
//! `total_carbon_saved`) only ever grow: deleting a habit never takes back
//! what it already earned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of eco-action a habit tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Transport,
    Energy,
    Waste,
    Food,
    Water,
    Shopping,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Transport => "transport",
            Category::Energy => "energy",
            Category::Waste => "waste",
            Category::Food => "food",
            Category::Water => "water",
            Category::Shopping => "shopping",
            Category::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transport" => Some(Category::Transport),
            "energy" => Some(Category::Energy),
            "waste" => Some(Category::Waste),
            "food" => Some(Category::Food),
            "water" => Some(Category::Water),
            "shopping" => Some(Category::Shopping),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Target cadence of a habit.
///
/// The cadence only affects the derived completion rate. Streaks are always
/// counted in consecutive calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            "custom" => Some(Frequency::Custom),
            _ => None,
        }
    }

    /// Number of completions expected in a 30-day window.
    pub fn expected_per_30_days(&self) -> f64 {
        match self {
            Frequency::Daily | Frequency::Custom => 30.0,
            Frequency::Weekly => 4.0,
            Frequency::Monthly => 1.0,
        }
    }
}

/// One accepted fulfilment of a habit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// When the completion was recorded (UTC).
    pub completed_at: DateTime<Utc>,

    pub note: Option<String>,

    /// Reference to an uploaded photo; the file itself lives elsewhere.
    pub photo: Option<String>,

    /// Set by moderation; always false when first recorded.
    pub verified: bool,
}

/// A recurring eco-action and its progress state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub frequency: Frequency,

    /// Points awarded for each accepted completion.
    pub eco_points: i64,

    /// Kilograms of CO2 saved for each accepted completion.
    pub carbon_saved: f64,

    pub current_streak: u32,

    /// Invariant: `longest_streak >= current_streak`.
    pub longest_streak: u32,

    /// Ordered by `completed_at`, oldest first.
    pub completions: Vec<Completion>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,

    /// Optimistic-concurrency token, bumped on every write.
    #[serde(skip)]
    pub version: i64,
}

impl Habit {
    /// A fresh habit with no progress.
    pub fn new(owner: Uuid, title: String, eco_points: i64, carbon_saved: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            title,
            description: None,
            category: Category::Other,
            frequency: Frequency::Daily,
            eco_points,
            carbon_saved,
            current_streak: 0,
            longest_streak: 0,
            completions: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// The completion with the latest timestamp, if any.
    pub fn latest_completion(&self) -> Option<&Completion> {
        self.completions.iter().max_by_key(|c| c.completed_at)
    }
}

/// An earned achievement, as held by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub earned_at: DateTime<Utc>,
}

/// A registered user and their reward accumulators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub eco_points: i64,
    pub total_carbon_saved: f64,

    /// Highest current streak across the user's active habits.
    pub current_streak: u32,

    pub badges: Vec<Badge>,
    pub created_at: DateTime<Utc>,

    #[serde(skip)]
    pub version: i64,
}

impl User {
    pub fn new(username: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            eco_points: 0,
            total_carbon_saved: 0.0,
            current_streak: 0,
            badges: Vec::new(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.badges.iter().any(|b| b.name == name)
    }
}

// ============================================================================
// Request bodies
// ============================================================================

/// Request body for POST /users.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
}

/// Request body for POST /habits.
///
/// `title` is canonical; older clients send `name`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHabitRequest {
    #[serde(alias = "name")]
    pub title: String,

    pub description: Option<String>,

    #[serde(default = "default_category")]
    pub category: Category,

    #[serde(default)]
    pub frequency: Frequency,

    pub eco_points: i64,

    pub carbon_saved: f64,
}

fn default_category() -> Category {
    Category::Other
}

/// Request body for PATCH /habits/:id. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHabitRequest {
    #[serde(alias = "name")]
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub frequency: Option<Frequency>,
    pub is_active: Option<bool>,
}

/// Request body for POST /habits/:id/complete.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteRequest {
    pub note: Option<String>,
    pub photo: Option<String>,
}

/// Query parameters for GET /leaderboard.
#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// Number of entries (default: 10, max: 100).
    #[serde(default = "default_leaderboard_limit")]
    pub limit: u32,
}

fn default_leaderboard_limit() -> u32 {
    10
}

// ============================================================================
// Response bodies
// ============================================================================

/// A habit together with its derived, never-stored statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitView {
    #[serde(flatten)]
    pub habit: Habit,

    /// Percentage of expected completions achieved over the last 30 days.
    pub completion_rate: f64,

    /// Local calendar days since the latest completion.
    pub days_since_last_completion: Option<i64>,
}

/// Reward totals returned after a completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub eco_points: i64,
    pub total_carbon_saved: f64,
    pub current_streak: u32,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            eco_points: user.eco_points,
            total_carbon_saved: user.total_carbon_saved,
            current_streak: user.current_streak,
        }
    }
}

/// Response for POST /habits/:id/complete.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub habit: HabitView,
    pub user: UserSummary,
    pub points_earned: i64,
    pub carbon_saved: f64,
    pub new_badges: Vec<Badge>,
}

/// Response for GET /users/me.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: User,
    pub active_habits: u32,
    pub longest_streak: u32,
}

/// Response for POST /users.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

/// A single leaderboard row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    pub eco_points: i64,
    pub total_carbon_saved: f64,
    pub badge_count: u32,
}

/// Response for GET /leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardEntry>,
    pub limit: u32,
}
