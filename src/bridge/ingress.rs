use crate::entity::{EntityStore, EntityUpdate};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};

/// Consume upstream entity updates and apply them to the store.
///
/// Subscribes every configured entity subject and merges them into one
/// stream; malformed messages are logged and skipped. Runs until the client
/// is closed.
pub async fn run_ingress(
    client: async_nats::Client,
    subjects: Vec<String>,
    store: Arc<EntityStore>,
) -> Result<()> {
    let mut streams = StreamMap::new();
    for subject in subjects {
        let subscriber = client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe entity subject '{}'", subject))?;
        info!(subject = %subject, "Subscribed entity update subject");
        streams.insert(subject, subscriber);
    }

    while let Some((subject, message)) = streams.next().await {
        match serde_json::from_slice::<EntityUpdate>(&message.payload) {
            Ok(update) => {
                debug!(subject = %subject, entity_id = %update.id, "Entity update");
                store.apply(update);
            }
            Err(e) => {
                warn!(subject = %subject, error = %e, "Skipping malformed entity update");
            }
        }
    }

    warn!("Entity ingress stream ended");
    Ok(())
}
