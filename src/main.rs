//! EarthTogether API server.
//!
//! # API Endpoints
//!
//! - `POST /users` - Register and receive a bearer token
//! - `GET /users/me` - Profile, points and badges
//! - `GET|POST /habits` - List or create habits
//! - `GET|PATCH|DELETE /habits/:id` - Read, edit/retire or delete a habit
//! - `POST /habits/:id/complete` - Record today's completion
//! - `GET /leaderboard` - Top users by eco points
//! - `GET /health` - Health check

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use earthtogether::api::{AppState, build_router, cors_layer};
use earthtogether::auth::TokenSigner;
use earthtogether::badges::BadgeCatalogue;
use earthtogether::config::ServerConfig;
use earthtogether::engine::ProgressEngine;
use earthtogether::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("earthtogether=info".parse()?))
        .init();

    let config = ServerConfig::from_env();
    info!(?config, "Starting EarthTogether server");

    if config.uses_dev_secret() {
        warn!("EARTHTOGETHER_TOKEN_SECRET not set, using the development secret");
    }

    // Initialize storage
    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let engine = ProgressEngine::new(BadgeCatalogue::default(), config.utc_offset);
    let state = AppState {
        storage,
        engine: Arc::new(engine),
        signer: TokenSigner::new(&config.token_secret, config.token_ttl),
    };

    let app = build_router(state).layer(cors_layer(config.cors_origin.as_deref()));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "EarthTogether is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
