use std::{collections::HashSet, time::Duration};

use anyhow::{bail, Context};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use stove_common::{
    get_topic, parse_status, parse_temperature, set_topic, ControllerConfig, PayloadError,
    StoveEngine, POWER_ON_BEHAVIOR_QUERY,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    bus::{BusMessage, MqttBus},
    control::{ControlEvent, ControlLoop},
    relay::RelayNode,
    remote::{HttpStateFetcher, Resynchronizer},
    settings,
    timer_light::{SolarDaylight, TimerLightNode},
    web,
};

// Transport guard only, well above any device report.
const MAX_MQTT_PAYLOAD_BYTES: usize = 64 * 1024;
const EVENT_QUEUE_DEPTH: usize = 64;
const MQTT_REQUEST_CAPACITY: usize = 64;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = settings::load().await?;

    let mut mqtt_options =
        MqttOptions::new(config.client_id.clone(), config.mqtt.host.clone(), config.mqtt.port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    mqtt_options.set_clean_session(true);
    if let Some(user) = &config.mqtt.user {
        mqtt_options.set_credentials(user.clone(), config.mqtt.pass.clone().unwrap_or_default());
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, MQTT_REQUEST_CAPACITY);
    wait_for_connection(
        &mut eventloop,
        Duration::from_millis(config.mqtt.connect_timeout_ms),
    )
    .await
    .with_context(|| {
        format!(
            "cannot reach mqtt broker at {}:{}",
            config.mqtt.host, config.mqtt.port
        )
    })?;
    info!(
        "connected to mqtt broker {}:{} as {}",
        config.mqtt.host, config.mqtt.port, config.client_id
    );

    let bus = MqttBus::new(
        mqtt.clone(),
        Duration::from_millis(config.mqtt.publish_timeout_ms),
    );

    let (control_tx, control_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let (control, status_rx) = ControlLoop::new(
        StoveEngine::new(&config.control),
        bus.clone(),
        set_topic(&config.topics.stove),
    );
    info!(
        "control loop starting: default setpoint {:.2}°C, margin {:.2}°C",
        control.engine().setpoint(),
        control.engine().margin()
    );
    tokio::spawn(control.run(control_rx));

    let fetcher =
        HttpStateFetcher::new(&config.remote).context("failed to build remote state client")?;
    let resync = Resynchronizer::new(
        fetcher,
        Duration::from_millis(config.remote.resync_interval_ms),
        Duration::from_millis(config.remote.timeout_ms),
        status_rx.clone(),
        control_tx.clone(),
    );
    tokio::spawn(resync.run());

    let relay_tx = if config.relays.is_empty() {
        None
    } else {
        let (relay_tx, relay_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        tokio::spawn(RelayNode::new(config.relays.clone(), bus.clone()).run(relay_rx));
        Some(relay_tx)
    };

    let timer_light_tx = if config.timer_lights.is_empty() {
        None
    } else {
        let (light_tx, light_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let node = TimerLightNode::new(
            config.timer_lights.clone(),
            bus,
            SolarDaylight::new(config.location),
        );
        tokio::spawn(node.run(light_rx));
        Some(light_tx)
    };

    let subscriptions = Subscriptions::from_config(&config);
    let dispatcher = Dispatcher::new(&config, control_tx, relay_tx, timer_light_tx);
    spawn_mqtt_loop(mqtt.clone(), eventloop, subscriptions.clone(), dispatcher);
    subscriptions.subscribe(&mqtt).await?;

    if let Some(port) = config.http_port {
        tokio::spawn(async move {
            if let Err(err) = web::serve(status_rx, port).await {
                warn!("status server stopped: {err:#}");
            }
        });
    }

    shutdown_signal().await;
    info!("shutting down pellet stove controller");
    if let Err(err) = mqtt.disconnect().await {
        warn!("mqtt disconnect failed: {err}");
    }
    Ok(())
}

async fn wait_for_connection(eventloop: &mut EventLoop, timeout: Duration) -> anyhow::Result<()> {
    let connect = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(err) => return Err(anyhow::Error::new(err)),
            }
        }
    };

    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result,
        Err(_) => bail!("no connack within {timeout:?}"),
    }
}

/// Topics to (re-)subscribe and the power-on-behavior poke sent on every connect.
#[derive(Debug, Clone)]
struct Subscriptions {
    topics: Vec<String>,
    poke_topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectRequest<'a> {
    Subscribe(&'a str),
    Publish { topic: &'a str, payload: &'a str },
}

impl Subscriptions {
    fn from_config(config: &ControllerConfig) -> Self {
        let mut topics = vec![config.topics.temperature.clone(), config.topics.stove.clone()];
        let extra = config
            .relays
            .iter()
            .flat_map(|relay| &relay.switch_topics)
            .chain(config.timer_lights.iter().flat_map(|light| &light.sensor_topics));
        for topic in extra {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }

        Self {
            topics,
            poke_topic: get_topic(&config.topics.stove),
        }
    }

    /// Everything sent to the broker after a (re)connect, in order.
    fn requests(&self) -> Vec<ConnectRequest<'_>> {
        self.topics
            .iter()
            .map(|topic| ConnectRequest::Subscribe(topic.as_str()))
            .chain(std::iter::once(ConnectRequest::Publish {
                topic: self.poke_topic.as_str(),
                payload: POWER_ON_BEHAVIOR_QUERY,
            }))
            .collect()
    }

    async fn subscribe(&self, mqtt: &AsyncClient) -> anyhow::Result<()> {
        for request in self.requests() {
            match request {
                ConnectRequest::Subscribe(topic) => {
                    mqtt.subscribe(topic, QoS::AtMostOnce)
                        .await
                        .with_context(|| format!("failed to subscribe to {topic}"))?;
                    info!("subscribed to {topic}");
                }
                ConnectRequest::Publish { topic, payload } => {
                    mqtt.publish(topic, QoS::AtMostOnce, false, payload)
                        .await
                        .context("failed to request stove state")?;
                }
            }
        }
        Ok(())
    }

    // Runs on the event loop task, so it must not wait on the request queue.
    fn resubscribe(&self, mqtt: &AsyncClient) {
        for request in self.requests() {
            let result = match request {
                ConnectRequest::Subscribe(topic) => mqtt.try_subscribe(topic, QoS::AtMostOnce),
                ConnectRequest::Publish { topic, payload } => {
                    mqtt.try_publish(topic, QoS::AtMostOnce, false, payload)
                }
            };
            if let Err(err) = result {
                warn!("mqtt request after reconnect failed: {err}");
            }
        }
    }
}

/// Routes inbound publishes to the control loop or a node task.
struct Dispatcher {
    temperature_topic: String,
    stove_topic: String,
    switch_topics: HashSet<String>,
    occupancy_topics: HashSet<String>,
    control: mpsc::Sender<ControlEvent>,
    relay: Option<mpsc::Sender<BusMessage>>,
    timer_light: Option<mpsc::Sender<BusMessage>>,
}

impl Dispatcher {
    fn new(
        config: &ControllerConfig,
        control: mpsc::Sender<ControlEvent>,
        relay: Option<mpsc::Sender<BusMessage>>,
        timer_light: Option<mpsc::Sender<BusMessage>>,
    ) -> Self {
        Self {
            temperature_topic: config.topics.temperature.clone(),
            stove_topic: config.topics.stove.clone(),
            switch_topics: config
                .relays
                .iter()
                .flat_map(|relay| relay.switch_topics.iter().cloned())
                .collect(),
            occupancy_topics: config
                .timer_lights
                .iter()
                .flat_map(|light| light.sensor_topics.iter().cloned())
                .collect(),
            control,
            relay,
            timer_light,
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
            warn!(
                "dropping oversized MQTT payload on topic {} ({} bytes)",
                topic,
                payload.len()
            );
            return;
        }

        let is_switch = self.switch_topics.contains(topic);
        let is_occupancy = self.occupancy_topics.contains(topic);
        if is_switch {
            forward(self.relay.as_ref(), "relay node", topic, payload).await;
        }
        if is_occupancy {
            forward(self.timer_light.as_ref(), "timer light node", topic, payload).await;
        }
        if is_switch || is_occupancy {
            return;
        }

        let Some(event) = self.control_event(topic, payload) else {
            return;
        };
        if self.control.send(event).await.is_err() {
            warn!("control loop is gone, dropping event from {topic}");
        }
    }

    fn control_event(&self, topic: &str, payload: &[u8]) -> Option<ControlEvent> {
        if topic == self.temperature_topic {
            return match parse_temperature(payload) {
                Ok(temp) => Some(ControlEvent::Temperature(temp)),
                Err(err) => {
                    warn!("error unmarshalling temperature payload: {err}");
                    None
                }
            };
        }

        if topic == self.stove_topic {
            return match parse_status(payload) {
                Ok(state) => Some(ControlEvent::ApplianceStatus(state)),
                Err(PayloadError::UnknownStatus(value)) => {
                    warn!("received unknown stove status: {value}");
                    None
                }
                Err(err) => {
                    warn!("error unmarshalling stove status payload: {err}");
                    None
                }
            };
        }

        debug!("unhandled topic {topic}");
        None
    }
}

async fn forward(
    node: Option<&mpsc::Sender<BusMessage>>,
    name: &str,
    topic: &str,
    payload: &[u8],
) {
    let Some(node) = node else {
        return;
    };
    let message = BusMessage {
        topic: topic.to_string(),
        payload: payload.to_vec(),
    };
    if node.send(message).await.is_err() {
        warn!("{name} is gone, dropping message from {topic}");
    }
}

fn spawn_mqtt_loop(
    mqtt: AsyncClient,
    mut eventloop: EventLoop,
    subscriptions: Subscriptions,
    dispatcher: Dispatcher,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    dispatcher.dispatch(&message.topic, &message.payload).await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt reconnected, re-subscribing");
                    subscriptions.resubscribe(&mqtt);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use stove_common::{PowerState, RelayConfig, TimerLightConfig};

    use super::*;

    const PATIO_SENSOR: &str = "zigbee2mqtt/patio-sensor";

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.relays.push(RelayConfig {
            switch_topics: vec!["zigbee2mqtt/living-room-switch".to_string()],
            outlet_topics: vec!["zigbee2mqtt/living-room-outlet/set".to_string()],
        });
        config.timer_lights.push(TimerLightConfig {
            sensor_topics: vec![PATIO_SENSOR.to_string()],
            light_topics: vec!["zigbee2mqtt/patio-outlet/set".to_string()],
            off_delay_secs: 300,
        });
        config
    }

    struct Routed {
        control: mpsc::Receiver<ControlEvent>,
        relay: mpsc::Receiver<BusMessage>,
        timer_light: mpsc::Receiver<BusMessage>,
    }

    fn dispatcher() -> (Dispatcher, Routed) {
        let (control_tx, control) = mpsc::channel(8);
        let (relay_tx, relay) = mpsc::channel(8);
        let (light_tx, timer_light) = mpsc::channel(8);
        (
            Dispatcher::new(&config(), control_tx, Some(relay_tx), Some(light_tx)),
            Routed {
                control,
                relay,
                timer_light,
            },
        )
    }

    #[test]
    fn subscriptions_cover_sensor_stove_switches_and_occupancy() {
        let subscriptions = Subscriptions::from_config(&config());
        assert_eq!(
            subscriptions.topics,
            vec![
                "zigbee2mqtt/living-room-temp".to_string(),
                "zigbee2mqtt/pellet-stove".to_string(),
                "zigbee2mqtt/living-room-switch".to_string(),
                PATIO_SENSOR.to_string(),
            ]
        );
        assert_eq!(subscriptions.poke_topic, "zigbee2mqtt/pellet-stove/get");
    }

    #[test]
    fn every_connect_subscribes_then_requests_stove_state() {
        let subscriptions = Subscriptions::from_config(&config());

        assert_eq!(
            subscriptions.requests(),
            vec![
                ConnectRequest::Subscribe("zigbee2mqtt/living-room-temp"),
                ConnectRequest::Subscribe("zigbee2mqtt/pellet-stove"),
                ConnectRequest::Subscribe("zigbee2mqtt/living-room-switch"),
                ConnectRequest::Subscribe(PATIO_SENSOR),
                ConnectRequest::Publish {
                    topic: "zigbee2mqtt/pellet-stove/get",
                    payload: r#"{"power_on_behavior": ""}"#,
                },
            ]
        );
        // Repeated reconnects send the same requests.
        assert_eq!(subscriptions.requests(), subscriptions.requests());
    }

    #[tokio::test]
    async fn routes_temperature_and_status_to_control_loop() {
        let (dispatcher, mut routed) = dispatcher();

        dispatcher
            .dispatch(
                "zigbee2mqtt/living-room-temp",
                br#"{"temperature":19.5,"humidity":40}"#,
            )
            .await;
        dispatcher
            .dispatch("zigbee2mqtt/pellet-stove", br#"{"state":"OFF"}"#)
            .await;

        assert_eq!(
            routed.control.try_recv().unwrap(),
            ControlEvent::Temperature(19.5)
        );
        assert_eq!(
            routed.control.try_recv().unwrap(),
            ControlEvent::ApplianceStatus(PowerState::Off)
        );
    }

    #[tokio::test]
    async fn drops_malformed_and_unknown_payloads() {
        let (dispatcher, mut routed) = dispatcher();

        dispatcher
            .dispatch("zigbee2mqtt/living-room-temp", b"not json")
            .await;
        dispatcher
            .dispatch("zigbee2mqtt/pellet-stove", br#"{"state":"on"}"#)
            .await;
        dispatcher
            .dispatch("zigbee2mqtt/pellet-stove", br#"{"power_on_behavior":"off"}"#)
            .await;
        dispatcher
            .dispatch("zigbee2mqtt/unrelated", br#"{"state":"ON"}"#)
            .await;

        assert!(routed.control.try_recv().is_err());
    }

    #[tokio::test]
    async fn large_device_reports_are_still_processed() {
        let (dispatcher, mut routed) = dispatcher();
        let notes = "fixed pairing issues; ".repeat(40);
        let payload = format!(
            r#"{{"state":"OFF","update":{{"state":"available","release_notes":"{notes}"}}}}"#
        );
        assert!(payload.len() > 512);

        dispatcher
            .dispatch("zigbee2mqtt/pellet-stove", payload.as_bytes())
            .await;

        assert_eq!(
            routed.control.try_recv().unwrap(),
            ControlEvent::ApplianceStatus(PowerState::Off)
        );
    }

    #[tokio::test]
    async fn drops_payloads_beyond_transport_limit() {
        let (dispatcher, mut routed) = dispatcher();
        let padding = "x".repeat(MAX_MQTT_PAYLOAD_BYTES);
        let payload = format!(r#"{{"temperature":19.5,"pad":"{padding}"}}"#);

        dispatcher
            .dispatch("zigbee2mqtt/living-room-temp", payload.as_bytes())
            .await;

        assert!(routed.control.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwards_switch_messages_to_relay() {
        let (dispatcher, mut routed) = dispatcher();

        dispatcher
            .dispatch("zigbee2mqtt/living-room-switch", br#"{"action":"on"}"#)
            .await;

        assert_eq!(
            routed.relay.try_recv().unwrap(),
            BusMessage {
                topic: "zigbee2mqtt/living-room-switch".to_string(),
                payload: br#"{"action":"on"}"#.to_vec(),
            }
        );
        assert!(routed.control.try_recv().is_err());
        assert!(routed.timer_light.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwards_occupancy_to_timer_light() {
        let (dispatcher, mut routed) = dispatcher();

        dispatcher
            .dispatch(PATIO_SENSOR, br#"{"occupancy":true}"#)
            .await;

        assert_eq!(
            routed.timer_light.try_recv().unwrap(),
            BusMessage {
                topic: PATIO_SENSOR.to_string(),
                payload: br#"{"occupancy":true}"#.to_vec(),
            }
        );
        assert!(routed.relay.try_recv().is_err());
        assert!(routed.control.try_recv().is_err());
    }
}
