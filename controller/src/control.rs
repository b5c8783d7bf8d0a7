use chrono::{DateTime, Utc};
use stove_common::{command_payload, ControllerStatus, DesiredState, PowerState, StoveEngine};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::BusPublisher;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    Temperature(f64),
    ApplianceStatus(PowerState),
    DesiredState(DesiredState),
}

/// Single consumer of every input that touches the stove engine, so each
/// mutate-evaluate-command sequence runs to completion before the next one.
pub struct ControlLoop<B> {
    engine: StoveEngine,
    bus: B,
    command_topic: String,
    status_tx: watch::Sender<ControllerStatus>,
    last_remote_sync: Option<DateTime<Utc>>,
}

impl<B: BusPublisher> ControlLoop<B> {
    pub fn new(
        engine: StoveEngine,
        bus: B,
        command_topic: String,
    ) -> (Self, watch::Receiver<ControllerStatus>) {
        let (status_tx, status_rx) = watch::channel(engine.status(None));
        let control = Self {
            engine,
            bus,
            command_topic,
            status_tx,
            last_remote_sync: None,
        };
        (control, status_rx)
    }

    pub fn engine(&self) -> &StoveEngine {
        &self.engine
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<ControlEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("control loop stopped: all event senders dropped");
    }

    /// Apply one input and publish whatever command the engine decides on.
    pub async fn handle(&mut self, event: ControlEvent) -> Option<PowerState> {
        let command = match event {
            ControlEvent::Temperature(temp) => {
                info!("received temperature: {temp:.2}°C");
                self.engine.update_temperature(temp)
            }
            ControlEvent::ApplianceStatus(state) => {
                info!("stove status updated: {}", state.as_str());
                self.engine.update_appliance_state(state)
            }
            ControlEvent::DesiredState(desired) => {
                info!(
                    "desired state from server: {:.2}°C, master switch {}",
                    desired.setpoint,
                    if desired.enabled { "on" } else { "off" }
                );
                self.last_remote_sync = Some(Utc::now());
                self.engine.apply_desired_state(desired)
            }
        };

        match command {
            Some(state) => self.publish_command(state).await,
            None => debug!("no command issued, phase {}", self.engine.phase().as_str()),
        }

        self.status_tx.send_replace(
            self.engine
                .status(self.last_remote_sync.map(|at| at.timestamp())),
        );
        command
    }

    // Publish failures keep the optimistic state; the next status report or
    // resync corrects it.
    async fn publish_command(&self, state: PowerState) {
        info!("turning pellet stove {}", state.as_str());
        if let Err(err) = self
            .bus
            .publish(&self.command_topic, command_payload(state))
            .await
        {
            warn!("error publishing control command: {err}");
        }
    }
}
