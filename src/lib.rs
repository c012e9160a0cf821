//! EarthTogether - social eco-habit tracking.
//!
//! # Overview
//!
//! Users track recurring eco-habits, earn eco points and carbon savings for
//! every completion, build day-over-day streaks and collect badges for
//! streak milestones.
//!
//! # Completion Guarantees
//!
//! - A habit accepts at most one completion per local calendar day, even
//!   under concurrent requests
//! - Streaks continue only across consecutive days; a missed day restarts
//!   the count at 1
//! - `longest_streak` never decreases
//! - Each badge is awarded at most once per user
//! - Points and carbon totals never decrease, not even when a habit is
//!   deleted
//!
//! # Modules
//!
//! - [`model`]: Habits, completions, users, badges and API bodies
//! - [`badges`]: The badge catalogue and streak-milestone ladder
//! - [`engine`]: The completion/streak/reward state machine
//! - [`aggregation`]: Derived statistics and the leaderboard
//! - [`storage`]: SQLite storage layer
//! - [`auth`]: Bearer-token authentication
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod auth;
pub mod badges;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod storage;
