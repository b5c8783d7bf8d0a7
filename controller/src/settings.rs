//! Controller configuration: optional JSON file, then environment overrides.

use std::{
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context};
use stove_common::ControllerConfig;

pub const CONFIG_PATH_ENV: &str = "STOVE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./stove.json";

pub async fn load() -> anyhow::Result<ControllerConfig> {
    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_file(&path).await?;
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    config
        .validate()
        .context("invalid controller configuration")?;
    Ok(config)
}

async fn load_file(path: &Path) -> anyhow::Result<ControllerConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ControllerConfig::default()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file {}", path.display()))
        }
    }
}

/// Overlay environment variables on top of `config`. Empty values count as unset.
pub fn apply_env(
    config: &mut ControllerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = var("MQTT_HOST") {
        let (host, port) = parse_broker_address(&value);
        config.mqtt.host = host;
        if let Some(port) = port {
            config.mqtt.port = port;
        }
    }
    if let Some(value) = var("MQTT_PORT") {
        config.mqtt.port = parse_var("MQTT_PORT", &value)?;
    }
    if let Some(value) = var("MQTT_USER") {
        config.mqtt.user = Some(value);
    }
    if let Some(value) = var("MQTT_PASS") {
        config.mqtt.pass = Some(value);
    }

    if let Some(value) = var("CLIENT_ID") {
        config.client_id = value;
    }
    if let Some(value) = var("TEMPERATURE_TOPIC") {
        config.topics.temperature = value;
    }
    if let Some(value) = var("PELLET_STOVE_RELAY_TOPIC") {
        config.topics.stove = value;
    }
    if let Some(value) = var("TARGET_TEMPERATURE") {
        config.control.default_setpoint = parse_var("TARGET_TEMPERATURE", &value)?;
    }
    if let Some(value) = var("HYSTERESIS") {
        config.control.margin = parse_var("HYSTERESIS", &value)?;
    }

    if let Some(value) = var("REMOTE_URL") {
        config.remote.url = value;
    }
    if let Some(value) = var("REMOTE_USER") {
        config.remote.username = Some(value);
    }
    if let Some(value) = var("REMOTE_PASS") {
        config.remote.password = Some(value);
    }
    if let Some(value) = var("REMOTE_TOKEN") {
        config.remote.bearer_token = Some(value);
    }
    if let Some(value) = var("RESYNC_INTERVAL_SECS") {
        let secs: u64 = parse_var("RESYNC_INTERVAL_SECS", &value)?;
        config.remote.resync_interval_ms = secs.saturating_mul(1_000);
    }

    if let Some(value) = var("CONTROLLER_HTTP_PORT") {
        config.http_port = Some(parse_var("CONTROLLER_HTTP_PORT", &value)?);
    }

    Ok(())
}

/// Accepts `tcp://host:port`, `mqtt://host:port`, `host:port` or a bare host.
pub fn parse_broker_address(value: &str) -> (String, Option<u16>) {
    let value = value.trim();
    let address = ["tcp://", "mqtt://"]
        .iter()
        .find_map(|scheme| value.strip_prefix(scheme))
        .unwrap_or(value);

    match address.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) if !host.is_empty() => (host.to_string(), Some(port)),
            _ => (address.to_string(), None),
        },
        None => (address.to_string(), None),
    }
}

fn parse_var<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| anyhow!("invalid {key} value {value:?}: {err}"))
}
