//! SQLite storage layer for EarthTogether.
//!
//! # Schema
//!
//! - `users`: reward accumulators plus a `version` column
//! - `badges`: one row per earned badge, primary key `(user_id, name)`
//! - `habits`: configuration and streak state plus a `version` column
//! - `completions`: append-only, `UNIQUE(habit_id, local_day)`
//!
//! # Concurrency
//!
//! The progress engine decides on a snapshot. [`Storage::commit_completion`]
//! applies its outcome with conditional updates keyed on the snapshot's
//! `version` values, inside one transaction. If another writer got there
//! first, nothing is written and [`StoreError::Conflict`] is returned.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::CompletionOutcome;
use crate::error::StoreError;
use crate::model::{Badge, Category, Completion, Frequency, Habit, User};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        eco_points INTEGER NOT NULL DEFAULT 0,
        total_carbon_saved REAL NOT NULL DEFAULT 0,
        current_streak INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS badges (
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        icon TEXT NOT NULL,
        earned_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS habits (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        category TEXT NOT NULL,
        frequency TEXT NOT NULL,
        eco_points INTEGER NOT NULL,
        carbon_saved REAL NOT NULL,
        current_streak INTEGER NOT NULL DEFAULT 0,
        longest_streak INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_habits_owner
    ON habits(owner)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS completions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        habit_id TEXT NOT NULL,
        completed_at INTEGER NOT NULL,
        local_day TEXT NOT NULL,
        note TEXT,
        photo TEXT,
        verified INTEGER NOT NULL DEFAULT 0,
        UNIQUE (habit_id, local_day)
    )
    "#,
];

/// A user's public standing, as ranked on the leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStanding {
    pub username: String,
    pub eco_points: i64,
    pub total_carbon_saved: f64,
    pub badge_count: u32,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:earthtogether.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // An in-memory database lives and dies with its connections
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Insert a newly registered user.
    ///
    /// Returns [`StoreError::Conflict`] if the username or email is taken.
    pub async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, eco_points, total_carbon_saved,
                               current_streak, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.eco_points)
        .bind(user.total_carbon_saved)
        .bind(i64::from(user.current_streak))
        .bind(user.version)
        .bind(user.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| unique_as_conflict(e, "username or email already registered"))?;

        info!(user_id = %user.id, "User registered");
        Ok(())
    }

    /// Load a user together with their badges.
    pub async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, eco_points, total_carbon_saved,
                   current_streak, version, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        let badge_rows = sqlx::query(
            r#"
            SELECT name, description, icon, earned_at
            FROM badges
            WHERE user_id = ?
            ORDER BY earned_at, rowid
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let badges = badge_rows
            .iter()
            .map(badge_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        user_from_row(&row, badges)
    }

    /// Users ordered by eco points, best first.
    ///
    /// Ties are broken by carbon saved, then username.
    pub async fn top_users(&self, limit: u32) -> Result<Vec<UserStanding>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.username, u.eco_points, u.total_carbon_saved,
                   (SELECT COUNT(*) FROM badges b WHERE b.user_id = u.id) AS badge_count
            FROM users u
            ORDER BY u.eco_points DESC, u.total_carbon_saved DESC, u.username ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<UserStanding, StoreError> {
                Ok(UserStanding {
                    username: row.try_get("username")?,
                    eco_points: row.try_get("eco_points")?,
                    total_carbon_saved: row.try_get("total_carbon_saved")?,
                    badge_count: to_u32(row.try_get("badge_count")?)?,
                })
            })
            .collect()
    }

    // ========================================================================
    // Habits
    // ========================================================================

    pub async fn create_habit(&self, habit: &Habit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO habits (id, owner, title, description, category, frequency,
                                eco_points, carbon_saved, current_streak, longest_streak,
                                is_active, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(habit.id.to_string())
        .bind(habit.owner.to_string())
        .bind(&habit.title)
        .bind(&habit.description)
        .bind(habit.category.as_str())
        .bind(habit.frequency.as_str())
        .bind(habit.eco_points)
        .bind(habit.carbon_saved)
        .bind(i64::from(habit.current_streak))
        .bind(i64::from(habit.longest_streak))
        .bind(habit.is_active)
        .bind(habit.version)
        .bind(habit.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(habit_id = %habit.id, owner = %habit.owner, "Habit created");
        Ok(())
    }

    /// Load a habit with its full completion history.
    pub async fn get_habit(&self, id: Uuid) -> Result<Habit, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, title, description, category, frequency, eco_points,
                   carbon_saved, current_streak, longest_streak, is_active, version,
                   created_at
            FROM habits
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        let completion_rows = sqlx::query(
            r#"
            SELECT habit_id, completed_at, note, photo, verified
            FROM completions
            WHERE habit_id = ?
            ORDER BY completed_at, id
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let completions = completion_rows
            .iter()
            .map(completion_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        habit_from_row(&row, completions)
    }

    /// All habits of one owner, oldest first, with their completions.
    pub async fn list_habits(&self, owner: Uuid) -> Result<Vec<Habit>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, title, description, category, frequency, eco_points,
                   carbon_saved, current_streak, longest_streak, is_active, version,
                   created_at
            FROM habits
            WHERE owner = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await?;

        let completion_rows = sqlx::query(
            r#"
            SELECT c.habit_id, c.completed_at, c.note, c.photo, c.verified
            FROM completions c
            JOIN habits h ON h.id = c.habit_id
            WHERE h.owner = ?
            ORDER BY c.completed_at, c.id
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut by_habit: HashMap<String, Vec<Completion>> = HashMap::new();
        for row in &completion_rows {
            let habit_id: String = row.try_get("habit_id")?;
            by_habit
                .entry(habit_id)
                .or_default()
                .push(completion_from_row(row)?);
        }

        rows.iter()
            .map(|row| -> Result<Habit, StoreError> {
                let id: String = row.try_get("id")?;
                let completions = by_habit.remove(&id).unwrap_or_default();
                habit_from_row(row, completions)
            })
            .collect()
    }

    /// Persist edits to a habit's configuration or active flag.
    ///
    /// The write only succeeds if the stored version still matches
    /// `habit.version`. Returns the habit with its new version.
    pub async fn update_habit(&self, habit: &Habit) -> Result<Habit, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE habits
            SET title = ?, description = ?, category = ?, frequency = ?,
                is_active = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&habit.title)
        .bind(&habit.description)
        .bind(habit.category.as_str())
        .bind(habit.frequency.as_str())
        .bind(habit.is_active)
        .bind(habit.id.to_string())
        .bind(habit.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "habit was modified by another request".to_string(),
            ));
        }

        refresh_user_streak(&mut tx, habit.owner).await?;
        tx.commit().await?;

        let mut updated = habit.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Hard-delete a habit and its completions.
    ///
    /// Points and badges the habit already earned stay with the owner.
    pub async fn delete_habit(&self, id: Uuid, owner: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM habits WHERE id = ? AND owner = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM completions WHERE habit_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        refresh_user_streak(&mut tx, owner).await?;
        tx.commit().await?;

        info!(habit_id = %id, "Habit deleted");
        Ok(())
    }

    // ========================================================================
    // Completions
    // ========================================================================

    /// Atomically apply an accepted completion.
    ///
    /// # Arguments
    ///
    /// * `user` - The owner snapshot the engine decided on
    /// * `outcome` - The engine's result; `outcome.habit.version` is still the
    ///   snapshot version
    /// * `local_day` - Local calendar day of the new completion
    ///
    /// # Returns
    ///
    /// The owner as stored after the commit.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when either record changed since the
    /// snapshot or the habit already has a completion on `local_day`. No
    /// partial writes survive a failure.
    pub async fn commit_completion(
        &self,
        user: &User,
        outcome: &CompletionOutcome,
        local_day: NaiveDate,
    ) -> Result<User, StoreError> {
        let habit = &outcome.habit;
        let completion = habit
            .completions
            .last()
            .ok_or_else(|| StoreError::Corrupt("outcome has no completion".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE habits
            SET current_streak = ?, longest_streak = ?, version = version + 1
            WHERE id = ? AND version = ? AND is_active = 1
            "#,
        )
        .bind(i64::from(habit.current_streak))
        .bind(i64::from(habit.longest_streak))
        .bind(habit.id.to_string())
        .bind(habit.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "habit was modified by another request".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO completions (habit_id, completed_at, local_day, note, photo, verified)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(habit.id.to_string())
        .bind(completion.completed_at.timestamp_millis())
        .bind(local_day.to_string())
        .bind(&completion.note)
        .bind(&completion.photo)
        .bind(completion.verified)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_as_conflict(e, "habit already completed today"))?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET eco_points = eco_points + ?,
                total_carbon_saved = total_carbon_saved + ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(outcome.points_delta)
        .bind(outcome.carbon_delta)
        .bind(user.id.to_string())
        .bind(user.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "user was modified by another request".to_string(),
            ));
        }

        for badge in &outcome.new_badges {
            sqlx::query(
                r#"
                INSERT INTO badges (user_id, name, description, icon, earned_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(user.id.to_string())
            .bind(&badge.name)
            .bind(&badge.description)
            .bind(&badge.icon)
            .bind(badge.earned_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_as_conflict(e, "badge already awarded"))?;
        }

        refresh_user_streak(&mut tx, user.id).await?;
        tx.commit().await?;

        info!(
            habit_id = %habit.id,
            user_id = %user.id,
            streak = habit.current_streak,
            points = outcome.points_delta,
            new_badges = outcome.new_badges.len(),
            "Completion committed"
        );

        self.get_user(user.id).await
    }
}

/// Recompute the user-level streak as the best current streak among the
/// user's active habits.
async fn refresh_user_streak(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: Uuid,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE users
        SET current_streak = (
            SELECT COALESCE(MAX(current_streak), 0)
            FROM habits
            WHERE owner = ? AND is_active = 1
        )
        WHERE id = ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(user_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn unique_as_conflict(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn to_u32(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("counter out of range: {value}")))
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt(format!("bad id: {value}")))
}

fn from_millis(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp: {value}")))
}

fn user_from_row(row: &SqliteRow, badges: Vec<Badge>) -> Result<User, StoreError> {
    let id: String = row.try_get("id")?;
    Ok(User {
        id: parse_uuid(&id)?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        eco_points: row.try_get("eco_points")?,
        total_carbon_saved: row.try_get("total_carbon_saved")?,
        current_streak: to_u32(row.try_get("current_streak")?)?,
        badges,
        created_at: from_millis(row.try_get("created_at")?)?,
        version: row.try_get("version")?,
    })
}

fn badge_from_row(row: &SqliteRow) -> Result<Badge, StoreError> {
    Ok(Badge {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
        earned_at: from_millis(row.try_get("earned_at")?)?,
    })
}

fn habit_from_row(row: &SqliteRow, completions: Vec<Completion>) -> Result<Habit, StoreError> {
    let id: String = row.try_get("id")?;
    let owner: String = row.try_get("owner")?;
    let category: String = row.try_get("category")?;
    let frequency: String = row.try_get("frequency")?;

    Ok(Habit {
        id: parse_uuid(&id)?,
        owner: parse_uuid(&owner)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: Category::parse(&category)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown category: {category}")))?,
        frequency: Frequency::parse(&frequency)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown frequency: {frequency}")))?,
        eco_points: row.try_get("eco_points")?,
        carbon_saved: row.try_get("carbon_saved")?,
        current_streak: to_u32(row.try_get("current_streak")?)?,
        longest_streak: to_u32(row.try_get("longest_streak")?)?,
        completions,
        is_active: row.try_get("is_active")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        version: row.try_get("version")?,
    })
}

fn completion_from_row(row: &SqliteRow) -> Result<Completion, StoreError> {
    Ok(Completion {
        completed_at: from_millis(row.try_get("completed_at")?)?,
        note: row.try_get("note")?,
        photo: row.try_get("photo")?,
        verified: row.try_get("verified")?,
    })
}
