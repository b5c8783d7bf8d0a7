//! JSON codecs for the zigbee2mqtt payloads the controller consumes and emits.

use serde::Deserialize;

use crate::{error::PayloadError, types::PowerState};

#[derive(Debug, Deserialize)]
struct TemperatureMessage {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct StatusMessage {
    state: String,
}

#[derive(Debug, Deserialize)]
struct OccupancyMessage {
    occupancy: bool,
}

#[derive(Debug, Deserialize)]
struct SwitchMessage {
    action: String,
}

/// Parse `{"temperature": <number>, ...}`; other sensor fields are ignored.
pub fn parse_temperature(payload: &[u8]) -> Result<f64, PayloadError> {
    let message: TemperatureMessage = serde_json::from_slice(payload)?;
    if !message.temperature.is_finite() {
        return Err(PayloadError::NonFiniteTemperature(message.temperature));
    }
    Ok(message.temperature)
}

/// Parse the device status report. Only the exact values `ON` and `OFF` are accepted.
pub fn parse_status(payload: &[u8]) -> Result<PowerState, PayloadError> {
    let message: StatusMessage = serde_json::from_slice(payload)?;
    match message.state.as_str() {
        "ON" => Ok(PowerState::On),
        "OFF" => Ok(PowerState::Off),
        _ => Err(PayloadError::UnknownStatus(message.state)),
    }
}

pub fn parse_switch_action(payload: &[u8]) -> Result<PowerState, PayloadError> {
    let message: SwitchMessage = serde_json::from_slice(payload)?;
    match message.action.as_str() {
        "on" => Ok(PowerState::On),
        "off" => Ok(PowerState::Off),
        _ => Err(PayloadError::UnknownAction(message.action)),
    }
}

/// Motion sensor report; `occupancy` must be present and boolean.
pub fn parse_occupancy(payload: &[u8]) -> Result<bool, PayloadError> {
    let message: OccupancyMessage = serde_json::from_slice(payload)?;
    Ok(message.occupancy)
}

/// `{"state":"on"}` / `{"state":"off"}` as understood by zigbee2mqtt `/set` topics.
pub fn command_payload(state: PowerState) -> Vec<u8> {
    serde_json::json!({ "state": state.command_str() })
        .to_string()
        .into_bytes()
}
