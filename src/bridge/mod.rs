use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};

mod ingress;
mod relay;

pub use ingress::run_ingress;
pub use relay::{subscription_plan, RelayManager};

/// Backbone (NATS) configuration
#[derive(Clone, Debug, Deserialize)]
pub struct BackboneConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Upstream subjects carrying raw entity updates
    #[serde(default = "default_entity_subjects")]
    pub entity_subjects: Vec<String>,
    /// Subject prefix for relayed application pushes: "{prefix}.{topic}.{event}"
    #[serde(default = "default_relay_prefix")]
    pub relay_prefix: String,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_entity_subjects() -> Vec<String> {
    vec!["entities.updates".to_string()]
}

fn default_relay_prefix() -> String {
    "to".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            entity_subjects: default_entity_subjects(),
            relay_prefix: default_relay_prefix(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

/// Connect to the backbone, retrying with exponential backoff until it
/// succeeds. Returns the client plus a stream of connection events (the
/// relay manager reconciles subscriptions on every reconnect).
pub async fn connect(
    config: &BackboneConfig,
) -> Result<(async_nats::Client, UnboundedReceiver<async_nats::Event>)> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let mut delay = Duration::from_millis(config.reconnect_initial_ms.max(1));
    let max_delay = Duration::from_millis(config.reconnect_max_ms.max(1));

    loop {
        info!("Connecting to backbone at {}", config.url);
        let tx = events_tx.clone();
        let options = async_nats::ConnectOptions::new().event_callback(move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });

        match options.connect(&config.url).await {
            Ok(client) => {
                info!("Backbone connected");
                return Ok((client, events_rx));
            }
            Err(e) => {
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Backbone connect failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}
