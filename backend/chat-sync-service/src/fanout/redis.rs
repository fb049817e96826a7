use super::{Channel, Delivery, EventType, LocalTransport, Transport, TransportError};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, RedisResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_PREFIX: &str = "chat:";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Wire envelope published on the channel
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    event: &'a str,
    data: &'a Value,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    event: String,
    data: Value,
}

/// Turn one pub/sub payload back into a local delivery for `channel`
fn decode_envelope(channel: &str, raw: &str) -> Result<Delivery, TransportError> {
    let envelope: InboundEnvelope = serde_json::from_str(raw)?;
    Ok(Delivery {
        channel: channel.to_string(),
        event: envelope.event.parse()?,
        payload: envelope.data,
    })
}

/// Cross-process fan-out over Redis PUBLISH
#[derive(Clone)]
pub struct RedisTransport {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisTransport {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, channel: &Channel) -> String {
        format!("{}{}", self.prefix, channel.name())
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn trigger(
        &self,
        channel: &Channel,
        event: EventType,
        payload: &Value,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_string(&Envelope {
            event: event.as_str(),
            data: payload,
        })?;
        // ConnectionManager is a cheap handle over one multiplexed connection
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(self.key(channel), body).await?;
        tracing::debug!(channel = %channel, event = %event, receivers, "published");
        Ok(())
    }
}

/// Pattern-subscribes to every prefixed channel and re-delivers each event into
/// a node-local [`LocalTransport`], where client event streams are registered.
pub struct RedisRelay {
    client: Client,
    prefix: String,
    hub: LocalTransport,
}

impl RedisRelay {
    pub fn new(client: Client, hub: LocalTransport) -> Self {
        Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
            hub,
        }
    }

    pub fn from_url(url: &str, hub: LocalTransport) -> RedisResult<Self> {
        Ok(Self::new(Client::open(url)?, hub))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Relay until the runtime shuts down, reconnecting after connection loss
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.pump().await {
                    Ok(()) => tracing::warn!("fan-out relay subscription ended"),
                    Err(e) => tracing::error!(error = %e, "fan-out relay failed"),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn pump(&self) -> Result<(), TransportError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let pattern = format!("{}*", self.prefix);
        pubsub.psubscribe(&pattern).await?;
        tracing::info!(pattern = %pattern, "fan-out relay subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let Some(channel) = msg.get_channel_name().strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            let raw: String = match msg.get_payload() {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "unreadable relay payload");
                    continue;
                }
            };
            match decode_envelope(channel, &raw) {
                Ok(delivery) => {
                    let reached = self.hub.deliver(delivery).await;
                    tracing::trace!(channel = %channel, reached, "relayed");
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "undecodable relay payload");
                }
            }
        }
        Ok(())
    }
}
