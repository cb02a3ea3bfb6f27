use crate::config::{BusType, Config};
use anyhow::Context;
use event_bus::{EventBus, InMemoryBus, NatsBus, NatsBusConfig};
use std::sync::Arc;

/// Connect the configured event bus; for NATS the backing stream is created
/// if missing.
pub async fn connect_bus(config: &Config) -> anyhow::Result<Arc<dyn EventBus>> {
    match config.bus_type {
        BusType::InMemory => {
            tracing::warn!("Using InMemory event bus; events will not leave this process");
            Ok(Arc::new(InMemoryBus::new()))
        }
        BusType::Nats => {
            tracing::info!(nats_url = %config.nats_url, "Connecting to NATS");
            let client = async_nats::connect(&config.nats_url)
                .await
                .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;

            let bus = NatsBus::new(
                client,
                NatsBusConfig {
                    stream_name: config.stream_name.clone(),
                    subjects: vec![format!("{}.>", config.topic)],
                    ..Default::default()
                },
            );
            bus.ensure_stream()
                .await
                .context("Failed to ensure JetStream stream")?;

            Ok(Arc::new(bus))
        }
    }
}
