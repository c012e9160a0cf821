//! HTTP API handlers for EarthTogether.
//!
//! # Layering
//!
//! Handlers authenticate the caller, load records, check ownership and then
//! hand over to the [`ProgressEngine`]. The engine decides; the handler
//! persists through [`Storage`]. Three kinds of failure stay distinct:
//!
//! - **401**: missing or invalid bearer token
//! - **400/409**: routine engine rejections (`NotActive`, `AlreadyCompletedToday`)
//! - **500**: storage failures, logged with detail and reported generically
//!
//! Habits owned by someone else are reported as 404 so their existence is
//! not disclosed.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRef, FromRequest, FromRequestParts, Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::aggregation::{build_leaderboard, habit_view, user_streak};
use crate::auth::{AuthUser, TokenSigner};
use crate::engine::{CompletionAttempt, ProgressEngine};
use crate::error::ApiError;
use crate::model::{
    CompleteRequest, CompleteResponse, CreateHabitRequest, Habit, HabitView, LeaderboardQuery,
    LeaderboardResponse, ProfileResponse, RegisterRequest, RegisterResponse, UpdateHabitRequest,
    User, UserSummary,
};
use crate::storage::Storage;

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 500;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub engine: Arc<ProgressEngine>,
    pub signer: TokenSigner,
}

impl FromRef<AppState> for TokenSigner {
    fn from_ref(state: &AppState) -> Self {
        state.signer.clone()
    }
}

/// [`Json`] whose rejections render as [`ApiError`] bodies.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// [`Query`] whose rejections render as [`ApiError`] bodies.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// [`Path`] whose rejections render as [`ApiError`] bodies.
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// All routes, without CORS (see [`cors_layer`]).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(register))
        .route("/users/me", get(get_me))
        .route("/habits", get(list_habits).post(create_habit))
        .route(
            "/habits/:id",
            get(get_habit).patch(update_habit).delete(delete_habit),
        )
        .route("/habits/:id/complete", post(complete_habit))
        .route("/leaderboard", get(get_leaderboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the single-page frontend. Any origin is allowed when none is
/// configured.
pub fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => layer.allow_origin(AllowOrigin::exact(value)),
        Some(Err(_)) => {
            warn!("Invalid CORS origin, allowing any origin");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /users - Register a user and issue their first token.
///
/// # Request Body
///
/// ```json
/// { "username": "gaia", "email": "gaia@example.com" }
/// ```
///
/// # Response
///
/// `201 Created` with `{ "user": {...}, "token": "..." }`, or `409` if the
/// username or email is taken.
#[instrument(skip(state, request))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = request.username.trim().to_string();
    let email = request.email.trim().to_string();

    let username_len = username.chars().count();
    if !(3..=30).contains(&username_len) {
        return Err(ApiError::BadRequest(
            "username must be 3 to 30 characters".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("email is not valid".to_string()));
    }

    let user = User::new(username, email);
    state.storage.create_user(&user).await.map_err(|e| {
        warn!(error = %e, "Failed to register user");
        ApiError::from(e)
    })?;

    let token = state.signer.issue(user.id, Utc::now());
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, token })))
}

/// GET /users/me - The caller's profile, points and badges.
///
/// The streak shown is recomputed from the caller's active habits.
#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let mut user = state.storage.get_user(user_id).await?;
    let habits = state.storage.list_habits(user_id).await?;

    user.current_streak = user_streak(&habits);
    let active_habits = habits.iter().filter(|h| h.is_active).count() as u32;
    let longest_streak = habits.iter().map(|h| h.longest_streak).max().unwrap_or(0);

    Ok(Json(ProfileResponse {
        user,
        active_habits,
        longest_streak,
    }))
}

/// GET /habits - The caller's habits with derived statistics.
#[instrument(skip(state))]
pub async fn list_habits(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<HabitView>>, ApiError> {
    let now = Utc::now();
    let offset = state.engine.offset();

    let habits = state.storage.list_habits(user_id).await?;
    Ok(Json(
        habits
            .into_iter()
            .map(|h| habit_view(h, now, offset))
            .collect(),
    ))
}

/// POST /habits - Create a habit.
///
/// # Request Body
///
/// ```json
/// {
///     "title": "Cycle to work",
///     "category": "transport",
///     "frequency": "daily",
///     "ecoPoints": 10,
///     "carbonSaved": 2.4
/// }
/// ```
///
/// `name` is accepted in place of `title`. Category defaults to `other`,
/// frequency to `daily`.
#[instrument(skip(state, request))]
pub async fn create_habit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(request): ApiJson<CreateHabitRequest>,
) -> Result<(StatusCode, Json<HabitView>), ApiError> {
    let title = validate_title(&request.title)?;
    let description = validate_description(request.description)?;
    if request.eco_points <= 0 {
        return Err(ApiError::BadRequest("ecoPoints must be positive".to_string()));
    }
    if !request.carbon_saved.is_finite() || request.carbon_saved <= 0.0 {
        return Err(ApiError::BadRequest(
            "carbonSaved must be a positive number".to_string(),
        ));
    }

    let mut habit = Habit::new(user_id, title, request.eco_points, request.carbon_saved);
    habit.description = description;
    habit.category = request.category;
    habit.frequency = request.frequency;

    state.storage.create_habit(&habit).await?;
    info!(habit_id = %habit.id, category = habit.category.as_str(), "Habit created");

    let view = habit_view(habit, Utc::now(), state.engine.offset());
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /habits/:id - One habit with its completion history.
#[instrument(skip(state))]
pub async fn get_habit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(habit_id): ApiPath<Uuid>,
) -> Result<Json<HabitView>, ApiError> {
    let habit = load_owned_habit(&state, habit_id, user_id).await?;
    Ok(Json(habit_view(habit, Utc::now(), state.engine.offset())))
}

/// PATCH /habits/:id - Edit a habit or retire it with `isActive: false`.
///
/// Reward values are fixed at creation and cannot be edited.
#[instrument(skip(state, request))]
pub async fn update_habit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(habit_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateHabitRequest>,
) -> Result<Json<HabitView>, ApiError> {
    let mut habit = load_owned_habit(&state, habit_id, user_id).await?;

    if let Some(title) = request.title {
        habit.title = validate_title(&title)?;
    }
    if request.description.is_some() {
        habit.description = validate_description(request.description)?;
    }
    if let Some(category) = request.category {
        habit.category = category;
    }
    if let Some(frequency) = request.frequency {
        habit.frequency = frequency;
    }
    if let Some(is_active) = request.is_active {
        habit.is_active = is_active;
    }

    let habit = state.storage.update_habit(&habit).await?;
    info!(habit_id = %habit.id, is_active = habit.is_active, "Habit updated");

    Ok(Json(habit_view(habit, Utc::now(), state.engine.offset())))
}

/// DELETE /habits/:id - Permanently remove a habit.
///
/// Points and badges it earned are kept.
#[instrument(skip(state))]
pub async fn delete_habit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(habit_id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.storage.delete_habit(habit_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /habits/:id/complete - Record today's completion.
///
/// # Request Body (optional)
///
/// ```json
/// { "note": "took the long route", "photo": "uploads/abc.jpg" }
/// ```
///
/// # Response
///
/// The updated habit, the caller's new totals, the reward for this
/// completion and any badges earned. A second completion on the same local
/// day answers `409`; a retired habit answers `400`.
#[instrument(skip(state, body))]
pub async fn complete_habit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(habit_id): ApiPath<Uuid>,
    body: Bytes,
) -> Result<Json<CompleteResponse>, ApiError> {
    // The body is optional, but a malformed one is an error
    let request: CompleteRequest = if body.is_empty() {
        CompleteRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let now = Utc::now();

    let habit = load_owned_habit(&state, habit_id, user_id).await?;
    let user = state.storage.get_user(user_id).await?;

    let attempt = CompletionAttempt {
        note: request.note,
        photo: request.photo,
    };
    let outcome = state
        .engine
        .record_completion(&habit, &user, attempt, now)
        .map_err(|rejection| {
            info!(habit_id = %habit_id, reason = %rejection, "Completion rejected");
            ApiError::from(rejection)
        })?;

    let user = state
        .storage
        .commit_completion(&user, &outcome, state.engine.local_day(now))
        .await
        .map_err(|e| {
            warn!(habit_id = %habit_id, error = %e, "Failed to commit completion");
            ApiError::from(e)
        })?;

    info!(
        habit_id = %habit_id,
        streak = outcome.streak,
        points = outcome.points_delta,
        new_badges = outcome.new_badges.len(),
        "Habit completed"
    );

    Ok(Json(CompleteResponse {
        user: UserSummary::from(&user),
        points_earned: outcome.points_delta,
        carbon_saved: outcome.carbon_delta,
        new_badges: outcome.new_badges,
        habit: habit_view(outcome.habit, now, state.engine.offset()),
    }))
}

/// GET /leaderboard - Top users by eco points.
///
/// # Query Parameters
///
/// - `limit` (optional): Number of entries (default: 10, max: 100)
#[instrument(skip(state))]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    match build_leaderboard(&state.storage, query.limit).await {
        Ok(response) => {
            info!(entries = response.entries.len(), "Leaderboard queried");
            Ok(Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Failed to build leaderboard");
            Err(e.into())
        }
    }
}

async fn load_owned_habit(
    state: &AppState,
    habit_id: Uuid,
    user_id: Uuid,
) -> Result<Habit, ApiError> {
    let habit = state.storage.get_habit(habit_id).await?;
    if habit.owner != user_id {
        return Err(ApiError::NotFound);
    }
    Ok(habit)
}

fn validate_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn validate_description(description: Option<String>) -> Result<Option<String>, ApiError> {
    match description.map(|d| d.trim().to_string()) {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_CHARS => Err(ApiError::BadRequest(
            format!("description must be at most {MAX_DESCRIPTION_CHARS} characters"),
        )),
        Some(d) if d.is_empty() => Ok(None),
        other => Ok(other),
    }
}
