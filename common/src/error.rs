use thiserror::Error;

/// Why an inbound bus payload was rejected.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid json payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("temperature {0} is not a finite number")]
    NonFiniteTemperature(f64),
    #[error("unknown stove status: {0}")]
    UnknownStatus(String),
    #[error("unknown switch action: {0}")]
    UnknownAction(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("hysteresis margin must be >= 0, got {0}")]
    NegativeMargin(f64),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
