//! Integration tests for the EarthTogether API endpoints.
//!
//! These tests verify the full request/response cycle through the HTTP API.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode, header::AUTHORIZATION};
use axum_test::TestServer;
use chrono::Duration;
use serde_json::{Value, json};

use earthtogether::api::{AppState, build_router};
use earthtogether::auth::TokenSigner;
use earthtogether::engine::ProgressEngine;
use earthtogether::storage::Storage;

async fn create_test_server() -> TestServer {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    let state = AppState {
        storage,
        engine: Arc::new(ProgressEngine::default()),
        signer: TokenSigner::new("integration-secret", Duration::hours(1)),
    };

    TestServer::new(build_router(state)).unwrap()
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

/// Register a user and return their token.
async fn register(server: &TestServer, username: &str) -> String {
    let response = server
        .post("/users")
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username)
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    body["token"].as_str().unwrap().to_string()
}

/// Create a habit and return its id.
async fn create_habit(server: &TestServer, token: &str, body: Value) -> String {
    let (name, value) = bearer(token);
    let response = server.post("/habits").add_header(name, value).json(&body).await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    body["id"].as_str().unwrap().to_string()
}

fn cycling() -> Value {
    json!({
        "title": "Cycle to work",
        "category": "transport",
        "frequency": "daily",
        "ecoPoints": 10,
        "carbonSaved": 0.5
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server().await;

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_validation_and_duplicates() {
    let server = create_test_server().await;
    register(&server, "gaia").await;

    server
        .post("/users")
        .json(&json!({ "username": "gaia", "email": "other@example.com" }))
        .await
        .assert_status(StatusCode::CONFLICT);

    server
        .post("/users")
        .json(&json!({ "username": "ok", "email": "ok@example.com" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/users")
        .json(&json!({ "username": "terra", "email": "not-an-email" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_habit_routes_require_token() {
    let server = create_test_server().await;

    server
        .get("/habits")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (name, value) = bearer("forged.token");
    server
        .post("/habits")
        .add_header(name, value)
        .json(&cycling())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_habit_accepts_name_alias() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;

    let (name, value) = bearer(&token);
    let response = server
        .post("/habits")
        .add_header(name, value)
        .json(&json!({ "name": "Compost scraps", "ecoPoints": 4, "carbonSaved": 0.2 }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["title"], "Compost scraps");
    assert_eq!(body["category"], "other");
    assert_eq!(body["frequency"], "daily");
    assert_eq!(body["currentStreak"], 0);
    assert_eq!(body["completionRate"], 0.0);
    assert!(body["daysSinceLastCompletion"].is_null());
}

#[tokio::test]
async fn test_create_habit_rejects_bad_rewards() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;

    for body in [
        json!({ "title": "Nothing", "ecoPoints": 0, "carbonSaved": 1.0 }),
        json!({ "title": "Nothing", "ecoPoints": 5, "carbonSaved": -1.0 }),
        json!({ "title": "   ", "ecoPoints": 5, "carbonSaved": 1.0 }),
    ] {
        let (name, value) = bearer(&token);
        server
            .post("/habits")
            .add_header(name, value)
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_malformed_habit_body_is_json_bad_request() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;

    for body in [
        json!({ "title": "x", "category": "bogus", "ecoPoints": 5, "carbonSaved": 1.0 }),
        json!({ "title": "x", "carbonSaved": 1.0 }),
        json!({ "title": "x", "ecoPoints": "lots", "carbonSaved": 1.0 }),
    ] {
        let (name, value) = bearer(&token);
        let response = server.post("/habits").add_header(name, value).json(&body).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_malformed_query_and_path_are_json_bad_requests() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;

    let response = server.get("/leaderboard?limit=-1").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].is_string());

    let (name, value) = bearer(&token);
    let response = server.get("/habits/not-a-uuid").add_header(name, value).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_malformed_completion_body_is_rejected() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;
    let habit_id = create_habit(&server, &token, cycling()).await;

    let (name, value) = bearer(&token);
    let response = server
        .post(&format!("/habits/{}/complete", habit_id))
        .add_header(name, value)
        .json(&json!({ "note": 123 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].is_string());

    // Nothing was recorded
    let (name, value) = bearer(&token);
    let habit: Value = server
        .get(&format!("/habits/{}", habit_id))
        .add_header(name, value)
        .await
        .json();
    assert!(habit["completions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_complete_habit_awards_points_and_starter_badge() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;
    let habit_id = create_habit(&server, &token, cycling()).await;

    let (name, value) = bearer(&token);
    let response = server
        .post(&format!("/habits/{}/complete", habit_id))
        .add_header(name, value)
        .json(&json!({ "note": "rode in the rain" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["pointsEarned"], 10);
    assert_eq!(body["carbonSaved"], 0.5);
    assert_eq!(body["habit"]["currentStreak"], 1);
    assert_eq!(body["habit"]["longestStreak"], 1);
    assert_eq!(body["habit"]["daysSinceLastCompletion"], 0);
    assert_eq!(body["habit"]["completions"][0]["note"], "rode in the rain");
    assert_eq!(body["habit"]["completions"][0]["verified"], false);
    assert_eq!(body["user"]["ecoPoints"], 10);
    assert_eq!(body["user"]["currentStreak"], 1);
    assert_eq!(body["newBadges"][0]["name"], "Eco Starter");
}

#[tokio::test]
async fn test_second_completion_same_day_is_rejected() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;
    let habit_id = create_habit(&server, &token, cycling()).await;
    let path = format!("/habits/{}/complete", habit_id);

    let (name, value) = bearer(&token);
    server
        .post(&path)
        .add_header(name, value)
        .await
        .assert_status_ok();

    let (name, value) = bearer(&token);
    let response = server.post(&path).add_header(name, value).await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("come back tomorrow"));

    // Nothing changed
    let (name, value) = bearer(&token);
    let habit: Value = server
        .get(&format!("/habits/{}", habit_id))
        .add_header(name, value)
        .await
        .json();
    assert_eq!(habit["completions"].as_array().unwrap().len(), 1);
    assert_eq!(habit["currentStreak"], 1);

    let (name, value) = bearer(&token);
    let me: Value = server.get("/users/me").add_header(name, value).await.json();
    assert_eq!(me["ecoPoints"], 10);
    assert_eq!(me["badges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_retired_habit_cannot_be_completed() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;
    let habit_id = create_habit(&server, &token, cycling()).await;

    let (name, value) = bearer(&token);
    let response = server
        .patch(&format!("/habits/{}", habit_id))
        .add_header(name, value)
        .json(&json!({ "isActive": false }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["isActive"], false);

    let (name, value) = bearer(&token);
    server
        .post(&format!("/habits/{}/complete", habit_id))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_other_users_habit_is_not_found() {
    let server = create_test_server().await;
    let owner = register(&server, "gaia").await;
    let intruder = register(&server, "terra").await;
    let habit_id = create_habit(&server, &owner, cycling()).await;

    for path in [
        format!("/habits/{}", habit_id),
        format!("/habits/{}/complete", habit_id),
    ] {
        let (name, value) = bearer(&intruder);
        let response = if path.ends_with("complete") {
            server.post(&path).add_header(name, value).await
        } else {
            server.get(&path).add_header(name, value).await
        };
        response.assert_status(StatusCode::NOT_FOUND);
    }

    let (name, value) = bearer(&intruder);
    server
        .delete(&format!("/habits/{}", habit_id))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_keeps_earned_rewards() {
    let server = create_test_server().await;
    let token = register(&server, "gaia").await;
    let habit_id = create_habit(&server, &token, cycling()).await;

    let (name, value) = bearer(&token);
    server
        .post(&format!("/habits/{}/complete", habit_id))
        .add_header(name, value)
        .await
        .assert_status_ok();

    let (name, value) = bearer(&token);
    server
        .delete(&format!("/habits/{}", habit_id))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let (name, value) = bearer(&token);
    server
        .get(&format!("/habits/{}", habit_id))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let (name, value) = bearer(&token);
    let me: Value = server.get("/users/me").add_header(name, value).await.json();
    assert_eq!(me["ecoPoints"], 10);
    assert_eq!(me["totalCarbonSaved"], 0.5);
    assert_eq!(me["currentStreak"], 0);
    assert_eq!(me["activeHabits"], 0);
    assert_eq!(me["badges"][0]["name"], "Eco Starter");
}

#[tokio::test]
async fn test_full_workflow() {
    let server = create_test_server().await;

    // 1. Health check
    server.get("/health").await.assert_status_ok();

    // 2. Two users, each with habits
    let gaia = register(&server, "gaia").await;
    let terra = register(&server, "terra").await;
    let cycle = create_habit(&server, &gaia, cycling()).await;
    let meal = create_habit(
        &server,
        &gaia,
        json!({ "title": "Meatless meal", "category": "food", "ecoPoints": 15, "carbonSaved": 1.5 }),
    )
    .await;
    let bottle = create_habit(
        &server,
        &terra,
        json!({ "title": "Refill bottle", "category": "waste", "ecoPoints": 3, "carbonSaved": 0.1 }),
    )
    .await;

    // 3. Complete everything once
    for (token, habit) in [(&gaia, &cycle), (&gaia, &meal), (&terra, &bottle)] {
        let (name, value) = bearer(token);
        server
            .post(&format!("/habits/{}/complete", habit))
            .add_header(name, value)
            .await
            .assert_status_ok();
    }

    // 4. Listing shows derived stats
    let (name, value) = bearer(&gaia);
    let habits: Value = server.get("/habits").add_header(name, value).await.json();
    let habits = habits.as_array().unwrap();
    assert_eq!(habits.len(), 2);
    for habit in habits {
        assert_eq!(habit["daysSinceLastCompletion"], 0);
        assert_eq!(habit["completionRate"], 3.3);
    }

    // 5. Profile
    let (name, value) = bearer(&gaia);
    let me: Value = server.get("/users/me").add_header(name, value).await.json();
    assert_eq!(me["ecoPoints"], 25);
    assert_eq!(me["currentStreak"], 1);
    assert_eq!(me["activeHabits"], 2);
    assert_eq!(me["badges"].as_array().unwrap().len(), 1);

    // 6. Leaderboard
    let response = server.get("/leaderboard?limit=5").await;
    response.assert_status_ok();
    let board: Value = response.json();
    assert_eq!(board["limit"], 5);
    let entries = board["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["username"], "gaia");
    assert_eq!(entries[0]["rank"], 1);
    assert_eq!(entries[0]["ecoPoints"], 25);
    assert_eq!(entries[1]["username"], "terra");
    assert_eq!(entries[1]["rank"], 2);
    assert!(entries[0].get("email").is_none());
}
