use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, QoS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {topic} timed out after {timeout:?}")]
    Timeout { topic: String, timeout: Duration },
    #[error("mqtt client error: {0}")]
    Client(#[from] ClientError),
}

/// An inbound publish handed from the event loop to a node task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outbound half of the message bus.
#[allow(async_fn_in_trait)]
pub trait BusPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    timeout: Duration,
}

impl MqttBus {
    pub fn new(client: AsyncClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl BusPublisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let publish = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload);

        match tokio::time::timeout(self.timeout, publish).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BusError::Timeout {
                topic: topic.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}
