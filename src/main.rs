mod auth;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod utils;
mod websocket;
mod ws;

use axum::{http::HeaderValue, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use routes::create_api_routes;
use docs::ApiDoc;
use config::Config;
use db::dbcolab::PgCollabStore;
use db::memstore::MemoryCollabStore;
use db::store::CollabStore;
use state::AppState;
use utils::clock::SystemClock;
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::panic;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before tracing so the configured level applies
    let loaded = Config::load();
    let log_filter = match &loaded {
        Ok(config) => config.default_log_filter(),
        Err(_) => Config::default().default_log_filter(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .init();

    info!("Starting server...");

    let config = loaded.unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    info!("Configuration loaded for the {} environment", config.environment);

    if config.auth_jwt_secret.is_none() {
        warn!("No JWT secret configured - every authenticated route will answer 500");
    }

    // Connect the store, falling back to memory without a database
    let store = open_store(&config).await;
    let state = Arc::new(AppState::new(config.clone(), store, Arc::new(SystemClock)));

    spawn_lock_sweeper(state.clone(), config.lock_sweep_interval_secs);

    // Create API routes
    let api_routes = create_api_routes(state);

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/api/v1/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}

async fn open_store(config: &Config) -> Arc<dyn CollabStore> {
    let Some(db_url) = &config.db_url else {
        warn!("No database URL configured - using the in-memory store with demo data, nothing will be persisted");
        return Arc::new(MemoryCollabStore::with_demo_data());
    };

    let store = match PgCollabStore::new(db_url, config.db_max_connections).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            panic!("Database at the configured URL is not reachable");
        }
    };
    if let Err(e) = store.ensure_schema().await {
        error!("Failed to apply database schema: {}", e);
        panic!("Database schema could not be applied");
    }
    info!("Database initialized successfully");
    Arc::new(store)
}

/// Periodically delete expired locks. Expiry is enforced on every lock operation, this only
/// keeps the table small.
fn spawn_lock_sweeper(state: Arc<AppState>, interval_secs: u64) {
    if interval_secs == 0 {
        info!("Periodic lock sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match state.leases.sweep().await {
                Ok(0) => {}
                Ok(n) => info!("Swept {} expired section locks", n),
                Err(e) => error!("Failed to sweep expired locks: {}", e),
            }
        }
    });
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        if config.is_development() {
            return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
        }
        return CorsLayer::new();
    }
    CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
}
