use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::from_fn, middleware::Logger, web, App, HttpServer};
use brainwin::{IdempotencyStore, SqliteIdempotencyStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brainwin_gateway::{
    bootstrap::ensure_admin,
    config::GatewayConfig,
    db::Database,
    gate::{request_gate, RequestGate},
    metrics::register_metrics,
    routes,
    state::AppState,
};

fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!("{context}: {err}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; bad secrets abort startup
    let config = GatewayConfig::from_env()
        .unwrap_or_else(|e| fatal("Failed to load configuration", e));
    let port = config.port;
    let allowed_origin = config.allowed_origin.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting brainwin-gateway on port {}", port);
    tracing::info!("Profile service: {}", config.profile_api_base);
    tracing::info!("Allowed origin: {}", allowed_origin);

    // Initialize databases
    let db = Database::new(&config.db_path)
        .unwrap_or_else(|e| fatal("Failed to initialize database", e));
    tracing::info!("Database initialized at: {}", config.db_path);

    // The ledger must survive restarts, so there is no in-memory fallback
    let ledger_store: Arc<dyn IdempotencyStore> =
        match SqliteIdempotencyStore::open(&config.ledger_db_path) {
            Ok(store) => {
                tracing::info!("Payment ledger: SQLite at {}", config.ledger_db_path);
                Arc::new(store)
            }
            Err(e) => fatal("Failed to open payment ledger", e),
        };

    match ensure_admin(&db, config.bootstrap_admin.as_ref()) {
        Ok(outcome) => tracing::debug!(?outcome, "admin bootstrap"),
        Err(e) => fatal("Admin bootstrap failed", e),
    }

    // Register Prometheus metrics
    register_metrics();

    let gate = web::Data::new(RequestGate::new(config.token_codec.clone()));

    // Create shared state
    let state = AppState::new(config, db, ledger_store)
        .unwrap_or_else(|e| fatal("Failed to build application state", e));
    let state_data = web::Data::new(state);

    // Configure rate limiter
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .unwrap_or_else(|| fatal("Failed to create rate limiter config", "invalid quota"));

    // Start HTTP server
    HttpServer::new(move || {
        let cors = brainwin_gateway::cors::build_cors(&allowed_origin);

        App::new()
            .app_data(state_data.clone())
            .app_data(gate.clone())
            .app_data(web::JsonConfig::default().limit(256 * 1024))
            .wrap(from_fn(request_gate))
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::health::configure)
            .configure(routes::auth::configure)
            .configure(routes::users::configure)
            .configure(routes::payments::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
