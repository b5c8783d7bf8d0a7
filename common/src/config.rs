use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    topics::{DEFAULT_CLIENT_ID, DEFAULT_STOVE_TOPIC, DEFAULT_TEMPERATURE_TOPIC},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: None,
            pass: None,
            keep_alive_secs: 60,
            connect_timeout_ms: 30_000,
            publish_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub temperature: String,
    /// Base zigbee2mqtt topic of the stove relay; status arrives here, commands go to `/set`.
    pub stove: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE_TOPIC.to_string(),
            stove: DEFAULT_STOVE_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub default_setpoint: f64,
    pub margin: f64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            default_setpoint: 21.0,
            margin: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
    pub timeout_ms: u64,
    pub resync_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/api/device".to_string(),
            username: None,
            password: None,
            bearer_token: None,
            timeout_ms: 10_000,
            resync_interval_ms: 15_000,
        }
    }
}

/// One wall switch driving one or more outlets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    pub switch_topics: Vec<String>,
    pub outlet_topics: Vec<String>,
}

/// Occupancy sensors switching lights on after dark, off again after a quiet period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerLightConfig {
    pub sensor_topics: Vec<String>,
    pub light_topics: Vec<String>,
    #[serde(default = "default_off_delay_secs")]
    pub off_delay_secs: u64,
}

fn default_off_delay_secs() -> u64 {
    300
}

/// Site position used for sunrise/sunset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 56.97399,
            longitude: 21.95721,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub client_id: String,
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub control: ControlSettings,
    pub remote: RemoteConfig,
    pub relays: Vec<RelayConfig>,
    pub timer_lights: Vec<TimerLightConfig>,
    pub location: LocationConfig,
    pub http_port: Option<u16>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            mqtt: MqttConfig::default(),
            topics: TopicConfig::default(),
            control: ControlSettings::default(),
            remote: RemoteConfig::default(),
            relays: Vec::new(),
            timer_lights: Vec::new(),
            location: LocationConfig::default(),
            http_port: None,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_empty("client_id", &self.client_id)?;
        non_empty("mqtt.host", &self.mqtt.host)?;
        non_empty("topics.temperature", &self.topics.temperature)?;
        non_empty("topics.stove", &self.topics.stove)?;
        non_empty("remote.url", &self.remote.url)?;

        finite("control.default_setpoint", self.control.default_setpoint)?;
        finite("control.margin", self.control.margin)?;
        if self.control.margin < 0.0 {
            return Err(ConfigError::NegativeMargin(self.control.margin));
        }

        non_zero("mqtt.connect_timeout_ms", self.mqtt.connect_timeout_ms)?;
        non_zero("mqtt.publish_timeout_ms", self.mqtt.publish_timeout_ms)?;
        non_zero("remote.timeout_ms", self.remote.timeout_ms)?;
        non_zero("remote.resync_interval_ms", self.remote.resync_interval_ms)?;

        for relay in &self.relays {
            if relay.switch_topics.is_empty() || relay.switch_topics.iter().any(|t| t.is_empty()) {
                return Err(ConfigError::Empty {
                    field: "relays.switch_topics",
                });
            }
            if relay.outlet_topics.is_empty() || relay.outlet_topics.iter().any(|t| t.is_empty()) {
                return Err(ConfigError::Empty {
                    field: "relays.outlet_topics",
                });
            }
        }

        for light in &self.timer_lights {
            if light.sensor_topics.is_empty() || light.sensor_topics.iter().any(|t| t.is_empty()) {
                return Err(ConfigError::Empty {
                    field: "timer_lights.sensor_topics",
                });
            }
            if light.light_topics.is_empty() || light.light_topics.iter().any(|t| t.is_empty()) {
                return Err(ConfigError::Empty {
                    field: "timer_lights.light_topics",
                });
            }
            non_zero("timer_lights.off_delay_secs", light.off_delay_secs)?;
        }

        finite("location.latitude", self.location.latitude)?;
        finite("location.longitude", self.location.longitude)?;

        Ok(())
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Empty { field })
    } else {
        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.control.default_setpoint, 21.0);
        assert_eq!(config.control.margin, 0.5);
        assert_eq!(config.remote.resync_interval_ms, 15_000);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{
                "control": { "margin": 1.0 },
                "relays": [
                    {
                        "switch_topics": ["zigbee2mqtt/living-room-switch"],
                        "outlet_topics": ["zigbee2mqtt/living-room-outlet/set"]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.control.margin, 1.0);
        assert_eq!(config.control.default_setpoint, 21.0);
        assert_eq!(config.topics.stove, DEFAULT_STOVE_TOPIC);
        assert_eq!(config.relays.len(), 1);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_negative_margin() {
        let mut config = ControllerConfig::default();
        config.control.margin = -0.1;
        assert_eq!(config.validate(), Err(ConfigError::NegativeMargin(-0.1)));
    }

    #[test]
    fn zero_margin_is_allowed() {
        let mut config = ControllerConfig::default();
        config.control.margin = 0.0;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_non_finite_setpoint() {
        let mut config = ControllerConfig::default();
        config.control.default_setpoint = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotFinite {
                field: "control.default_setpoint",
                ..
            })
        ));
    }

    #[test]
    fn rejects_empty_topics_and_zero_interval() {
        let mut config = ControllerConfig::default();
        config.topics.temperature = " ".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::Empty {
                field: "topics.temperature"
            })
        );

        let mut config = ControllerConfig::default();
        config.remote.resync_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "remote.resync_interval_ms"
            })
        );
    }

    #[test]
    fn timer_light_groups_default_to_five_minute_delay() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{
                "timer_lights": [
                    {
                        "sensor_topics": ["zigbee2mqtt/patio-sensor"],
                        "light_topics": ["zigbee2mqtt/patio-outlet/set"]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.timer_lights[0].off_delay_secs, 300);
        assert_eq!(config.location, LocationConfig::default());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_timer_light_without_sensors_or_delay() {
        let mut config = ControllerConfig::default();
        config.timer_lights.push(TimerLightConfig {
            sensor_topics: Vec::new(),
            light_topics: vec!["zigbee2mqtt/patio-outlet/set".to_string()],
            off_delay_secs: 300,
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::Empty {
                field: "timer_lights.sensor_topics"
            })
        );

        config.timer_lights[0].sensor_topics = vec!["zigbee2mqtt/patio-sensor".to_string()];
        config.timer_lights[0].off_delay_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "timer_lights.off_delay_secs"
            })
        );
    }

    #[test]
    fn rejects_relay_without_outlets() {
        let mut config = ControllerConfig::default();
        config.relays.push(RelayConfig {
            switch_topics: vec!["zigbee2mqtt/dirty-room-switch".to_string()],
            outlet_topics: Vec::new(),
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::Empty {
                field: "relays.outlet_topics"
            })
        );
    }
}
