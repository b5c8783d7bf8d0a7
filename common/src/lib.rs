pub mod config;
pub mod error;
pub mod payload;
pub mod stove;
pub mod topics;
pub mod types;

pub use config::{
    ControlSettings, ControllerConfig, LocationConfig, MqttConfig, RelayConfig, RemoteConfig,
    TimerLightConfig, TopicConfig,
};
pub use error::{ConfigError, PayloadError};
pub use payload::{
    command_payload, parse_occupancy, parse_status, parse_switch_action, parse_temperature,
};
pub use stove::StoveEngine;
pub use topics::*;
pub use types::{ControllerPhase, ControllerStatus, DesiredState, ObservedReport, PowerState};
