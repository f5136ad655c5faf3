use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod gateway;
mod handlers;
mod metrics;
mod models;
mod repository;

use crate::auth::AuthState;
use crate::config::{AuthConfig, FileConfig, GatewayConfig, PlazaConfig};
use crate::db::Database;
use crate::gateway::Gateway;
use crate::metrics::GatewayMetrics;
use crate::repository::CommunityRepository;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "plaza")]
#[command(about = "Community coordination server: channels, live messaging, city notifications")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.plaza)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Serve(ServeArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[derive(Clone)]
#[allow(dead_code)]
pub(crate) struct AppState {
    pub config: Arc<PlazaConfig>,
    pub auth_config: Arc<AuthConfig>,
    pub metrics: Arc<GatewayMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<CommunityRepository>,
    pub gateway: Arc<Gateway>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PlazaConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => run_server(ServeArgs::default(), config).await,
        Some(Commands::Serve(args)) => run_server(args, config).await,
    }
}

async fn run_server(args: ServeArgs, config: PlazaConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "plaza=debug,tower_http=debug,info"
    } else {
        "plaza=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Plaza community server");

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all stored channels and messages!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    // Layered figment config: defaults → config.toml → PLAZA_* env
    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Invalid configuration")?;

    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    let gateway_config = GatewayConfig::from_file(&file_config.gateway);
    info!(
        "Auth: session TTL {}s, registration {}",
        auth_config.session_ttl_secs,
        if auth_config.allow_registration {
            "open"
        } else {
            "closed"
        }
    );

    let config = Arc::new(config);

    // Initialize database and repository
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(CommunityRepository::new(db.pool.clone()));

    // Initialize metrics and the gateway service
    let metrics = Arc::new(GatewayMetrics::new());
    let gateway = Arc::new(Gateway::new(
        repository.clone(),
        metrics.clone(),
        gateway_config,
    ));

    let app_state = AppState {
        config: config.clone(),
        auth_config: auth_config.clone(),
        metrics,
        db: db.clone(),
        repository: repository.clone(),
        gateway,
    };

    let auth_state = AuthState {
        repository: repository.clone(),
        auth_config: auth_config.clone(),
    };

    // Build routes
    let mut app = Router::new()
        // Gateway (WebSocket upgrade)
        .route("/api/socket", get(handlers::socket_handler))
        // Channel routes
        .route(
            "/api/channels",
            post(handlers::create_channel).get(handlers::list_channels),
        )
        .route(
            "/api/channels/{id}",
            get(handlers::get_channel)
                .patch(handlers::update_channel)
                .delete(handlers::delete_channel),
        )
        .route("/api/channels/{id}/members", post(handlers::add_members))
        .route(
            "/api/channels/{id}/members/{user_id}",
            delete(handlers::remove_member),
        )
        // Message routes
        .route(
            "/api/channels/{id}/messages",
            post(handlers::create_message).get(handlers::list_messages),
        )
        .route(
            "/api/messages/{id}",
            patch(handlers::update_message).delete(handlers::delete_message),
        )
        // Presence and notifications
        .route("/api/presence", get(handlers::get_online_status))
        .route("/api/channels/{id}/typing", post(handlers::typing_status))
        .route("/api/cities/{id}/events", post(handlers::city_event))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler));

    // Merge auth routes and apply the bearer middleware
    app = app.merge(auth::auth_routes().with_state(auth_state.clone()));
    app = app.layer(axum::middleware::from_fn_with_state(
        auth_state,
        auth::auth_middleware,
    ));

    // Spawn periodic expired session cleanup
    let cleanup_repo = repository.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match cleanup_repo.cleanup_expired_sessions().await {
                Ok(n) if n > 0 => info!("Cleaned up {} expired sessions", n),
                Ok(_) => {}
                Err(e) => warn!("Session cleanup failed: {}", e),
            }
        }
    });

    let app = app
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(3000);

    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Plaza listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /api/socket            - Gateway WebSocket connection");
    info!("  POST   /api/channels          - Create channel");
    info!("  GET    /api/channels          - List channels for user");
    info!("  POST   /api/channels/:id/messages - Create message");
    info!("  GET    /api/channels/:id/messages - Channel history");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    info!("Shutdown complete");
    server_result
}
