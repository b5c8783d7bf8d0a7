use stove_common::{command_payload, parse_switch_action, PayloadError, PowerState, RelayConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, BusPublisher};

/// Stateless wall-switch to outlet relays. No reconciliation: each `on`/`off`
/// action is forwarded to every outlet of the matching group.
pub struct RelayNode<B> {
    groups: Vec<RelayConfig>,
    bus: B,
}

impl<B: BusPublisher> RelayNode<B> {
    pub fn new(groups: Vec<RelayConfig>, bus: B) -> Self {
        Self { groups, bus }
    }

    pub async fn run(self, mut events: mpsc::Receiver<BusMessage>) {
        while let Some(event) = events.recv().await {
            self.handle(&event.topic, &event.payload).await;
        }
        debug!("relay node stopped");
    }

    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Option<PowerState> {
        let state = match parse_switch_action(payload) {
            Ok(state) => state,
            Err(PayloadError::UnknownAction(action)) => {
                debug!("ignoring switch action {action} on {topic}");
                return None;
            }
            Err(err) => {
                warn!("bad switch payload on {topic}: {err}");
                return None;
            }
        };

        for group in self
            .groups
            .iter()
            .filter(|group| group.switch_topics.iter().any(|t| t == topic))
        {
            for outlet in &group.outlet_topics {
                info!("switch {topic} -> {outlet} {}", state.as_str());
                if let Err(err) = self.bus.publish(outlet, command_payload(state)).await {
                    warn!("error publishing relay command to {outlet}: {err}");
                }
            }
        }

        Some(state)
    }
}
