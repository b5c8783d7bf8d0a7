use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn from_on(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn command_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Controller phase, derived from the learned facts rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerPhase {
    AwaitingTemperature,
    AwaitingApplianceState,
    Disabled,
    Idle,
    CommandingOn,
    CommandingOff,
}

impl ControllerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingTemperature => "AWAITING_TEMPERATURE",
            Self::AwaitingApplianceState => "AWAITING_APPLIANCE_STATE",
            Self::Disabled => "DISABLED",
            Self::Idle => "IDLE",
            Self::CommandingOn => "COMMANDING_ON",
            Self::CommandingOff => "COMMANDING_OFF",
        }
    }
}

/// Operator-desired state as reported by the remote configuration service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(rename = "desired_temperature")]
    pub setpoint: f64,
    #[serde(rename = "on")]
    pub enabled: bool,
}

/// What the controller currently believes, sent along with every remote fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObservedReport {
    pub temperature: f64,
    pub stove_on: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    #[serde(rename = "applianceOn")]
    pub appliance_on: Option<bool>,
    pub setpoint: f64,
    pub margin: f64,
    #[serde(rename = "masterEnabled")]
    pub master_enabled: bool,
    pub phase: &'static str,
    #[serde(rename = "lastCommand")]
    pub last_command: Option<&'static str>,
    #[serde(rename = "commandsIssued")]
    pub commands_issued: u64,
    #[serde(rename = "lastRemoteSyncEpoch")]
    pub last_remote_sync_epoch: Option<i64>,
}

impl ControllerStatus {
    pub fn observed_report(&self) -> ObservedReport {
        ObservedReport {
            temperature: self.current_temp.unwrap_or(0.0),
            stove_on: self.appliance_on.unwrap_or(false),
        }
    }
}
