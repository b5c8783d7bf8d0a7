pub const DEFAULT_CLIENT_ID: &str = "PelletStoveController";
pub const DEFAULT_TEMPERATURE_TOPIC: &str = "zigbee2mqtt/living-room-temp";
pub const DEFAULT_STOVE_TOPIC: &str = "zigbee2mqtt/pellet-stove";

pub const POWER_ON_BEHAVIOR_QUERY: &str = r#"{"power_on_behavior": ""}"#;

/// Command topic for a zigbee2mqtt device, e.g. `zigbee2mqtt/pellet-stove/set`.
pub fn set_topic(device_topic: &str) -> String {
    format!("{device_topic}/set")
}

pub fn get_topic(device_topic: &str) -> String {
    format!("{device_topic}/get")
}
