use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use windsock::api::{create_admin_router, create_ws_router, AdminAppState, WsAppState};
use windsock::auth::TokenAuthorizer;
use windsock::bridge::{self, RelayManager};
use windsock::broadcast::Broadcaster;
use windsock::config::{load_config, WindsockConfig};
use windsock::entity::EntityStore;
use windsock::presence::PresenceTracker;
use windsock::protocol::handlers::{viewport_handler, HandlerTable};
use windsock::protocol::SessionContext;
use windsock::registry::ConnectionRegistry;
use windsock::viewport::ViewportFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "windsock=info".into()),
        )
        .init();

    let config = load_configuration()?;
    info!("Windsock starting...");

    // Shared state, constructed once and torn down with the process
    let (registry, topic_events) = ConnectionRegistry::new();
    let registry = Arc::new(registry);
    let presence = Arc::new(PresenceTracker::new());
    let viewports = Arc::new(ViewportFilter::new());
    let entities = Arc::new(EntityStore::new());
    let authorizer = Arc::new(TokenAuthorizer::from_tokens(config.auth.tokens.clone()));

    // Domain event handlers, resolved once at startup
    let mut handlers = HandlerTable::new();
    handlers.register("*", "viewport", viewport_handler(Arc::clone(&viewports)));
    let handlers = Arc::new(handlers);

    let session_ctx = Arc::new(SessionContext {
        registry: Arc::clone(&registry),
        presence: Arc::clone(&presence),
        viewports: Arc::clone(&viewports),
        handlers,
        authorizer,
        auth_enabled: config.auth.enabled,
        join_timeout: Duration::from_secs(config.connection.join_timeout_seconds),
    });

    // Backbone bridge: ingress + relay
    let (nats_client, client_events) = bridge::connect(&config.backbone).await?;
    tokio::spawn(bridge::run_ingress(
        nats_client.clone(),
        config.backbone.entity_subjects.clone(),
        Arc::clone(&entities),
    ));
    let relay = RelayManager::new(
        nats_client,
        Arc::clone(&registry),
        config.backbone.relay_prefix.clone(),
    );
    tokio::spawn(relay.run(topic_events, client_events));

    // Periodic snapshot broadcaster
    let broadcaster = Broadcaster::new(
        Arc::clone(&registry),
        Arc::clone(&viewports),
        Arc::clone(&entities),
        Duration::from_secs(config.broadcast.interval_seconds.max(1)),
        config.broadcast.entity_expiry_seconds,
    );
    tokio::spawn(broadcaster.run());

    // HTTP surface: WebSocket upgrade + admin publish
    let ws_state = Arc::new(WsAppState {
        session_ctx,
        outbound_queue_capacity: config.connection.outbound_queue_capacity,
        slow_consumer_policy: config.connection.slow_consumer_policy,
    });
    let app = create_ws_router(ws_state).merge(create_admin_router(AdminAppState {
        registry,
        admin_token: config.auth.admin_token.clone(),
    }));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!("Listening on {}", config.server.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Config path from the first CLI argument or WINDSOCK_CONFIG; defaults
/// apply when neither is set.
fn load_configuration() -> Result<WindsockConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WINDSOCK_CONFIG").ok());

    match path {
        Some(path) => {
            info!("Loading configuration from {}", path);
            load_config(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path, e))
        }
        None => Ok(WindsockConfig::default()),
    }
}
