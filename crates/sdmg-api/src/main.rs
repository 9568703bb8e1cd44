// SDM gateway API server

mod auth;
mod config;
mod gateway;
mod logger;
mod proxy;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sdmg_core::stores::{ConnectionStore, DefinitionStore};
use sdmg_core::{ApiExecutor, AutoResolver, Orchestrator, TokenCache};
use sdmg_storage::{ConnectionDirectory, Database, Vault};

use auth::{AuthState, RevocationSet, SessionState};
use config::Config;
use gateway::GatewayState;
use logger::RequestLogger;

/// How often old request-log rows are pruned.
const LOG_PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        gateway::health,
        gateway::proxy_dm,
        gateway::proxy_agent,
        gateway::query,
        gateway::use_case,
    ),
    tags(
        (name = "gateway", description = "Data-plane gateway endpoints")
    ),
    info(
        title = "SDM Gateway API",
        version = "0.2.0",
        description = "API gateway and orchestration engine for SAP Digital Manufacturing upstreams",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "sdmg_api={0},sdmg_core={0},tower_http=info",
                    config.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sdmg-api starting...");

    let db = Database::from_url(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db.seed_tenants()
        .await
        .context("Failed to seed well-known tenants")?;
    tracing::info!("Connected to database");

    let vault = Arc::new(Vault::new(&config.encryption_key).context("Invalid ENCRYPTION_KEY")?);

    // Engine wiring: storage implements the core store traits.
    let connections: Arc<dyn ConnectionStore> =
        Arc::new(ConnectionDirectory::new(db.clone(), vault.clone()));
    let definitions: Arc<dyn DefinitionStore> = Arc::new(db.clone());
    let tokens = Arc::new(TokenCache::new(connections.clone()));
    let executor = Arc::new(ApiExecutor::new(connections, tokens.clone()));
    let orchestrator = Arc::new(Orchestrator::new(executor, definitions.clone()));
    let resolver = Arc::new(AutoResolver::new(definitions));

    let db = Arc::new(db);
    let request_logger = Arc::new(RequestLogger::new(db.clone()));

    // Revocation sweep and request-log retention run on their own tasks.
    let revocations = Arc::new(RevocationSet::new());
    let _sweeper = revocations.spawn_sweeper();
    spawn_log_pruner(db.clone(), config.log_retention_days);

    let gateway_state = GatewayState {
        db: db.clone(),
        vault,
        tokens,
        orchestrator,
        resolver,
        logger: request_logger,
        allow_http: config.dev_mode,
    };
    let auth_state = AuthState { db: db.clone() };
    let session_state = SessionState {
        jwt_secret: config.jwt_secret.clone(),
        revocations,
    };

    // Build router
    let app = axum::Router::new()
        .merge(gateway::routes(gateway_state, auth_state))
        .merge(auth::routes(session_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

fn spawn_log_pruner(db: Arc<Database>, retention_days: u32) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LOG_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            match db.prune_request_logs(retention_days).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("pruned {} expired request log rows", removed),
                Err(e) => tracing::warn!("request log pruning failed: {e:#}"),
            }
        }
    });
}
