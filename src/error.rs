use phf::phf_map;
use serde_yaml::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure codes the firmware forwards from its I2C drivers, plus its own
/// argument check. Codes 1-5 are the Wire transmission results.
static DEVICE_ERROR_CODES: phf::Map<i64, (&'static str, &'static str)> = phf_map! {
    1i64 => ("DataTooLong", "Transmit data exceeded the I2C buffer."),
    2i64 => ("AddressNack", "No acknowledge on the device address; the routed bus segment may be powered down."),
    3i64 => ("DataNack", "No acknowledge on a data byte."),
    4i64 => ("BusError", "Unspecified I2C bus error."),
    5i64 => ("BusTimeout", "I2C bus arbitration or clock-stretch timeout."),
    10i64 => ("InvalidArgument", "A parameter was outside the permitted range for the command."),
};

#[derive(Error, Debug)]
pub enum TesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No complete reply block arrived before the deadline. Never retried
    /// here; re-issue the exchange if a retry is wanted.
    #[error("No complete reply block within {0:?}")]
    Timeout(Duration),

    /// The reply block was received but did not parse as YAML.
    #[error("Reply failed to parse ({reason}); raw text: {raw:?}")]
    Decode { reason: String, raw: String },

    /// The reply parsed, but its top level is not a mapping.
    #[error("Reply is not a mapping; raw text: {raw:?}")]
    InvalidResponse { raw: String },

    /// The device reported an application-level failure. The `result`
    /// payload of the reply is attached unmodified.
    #[error("Device reported an error: {summary}")]
    Device { summary: String, payload: Value },

    #[error("Channel {index} out of range (1..={count})")]
    OutOfRange { index: usize, count: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Value list length {values} does not match {channels} channels")]
    ShapeMismatch { channels: usize, values: usize },

    #[error("Connection not established")]
    NotConnected,

    #[error("Config error: {0}")]
    Config(String),
}

impl TesError {
    /// Build a [`TesError::Device`] from the `result` payload of an error
    /// reply, folding in the description of any known firmware error code.
    pub(crate) fn device(payload: Value) -> Self {
        let summary = match payload.get("code").and_then(Value::as_i64) {
            Some(code) => match DEVICE_ERROR_CODES.get(&code) {
                Some((name, description)) => format!("code {code} ({name}): {description}"),
                None => format!("undefined error code {code}"),
            },
            None => payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no detail provided")
                .to_owned(),
        };
        TesError::Device { summary, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_device_code_is_described() {
        let payload: Value = serde_yaml::from_str("code: 2\nmessage: nack").unwrap();
        match TesError::device(payload) {
            TesError::Device { summary, payload } => {
                assert!(summary.contains("AddressNack"), "summary was {summary:?}");
                assert_eq!(payload.get("code").and_then(Value::as_i64), Some(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_code_and_bare_message_still_summarized() {
        let payload: Value = serde_yaml::from_str("code: 99").unwrap();
        match TesError::device(payload) {
            TesError::Device { summary, .. } => assert!(summary.contains("99")),
            other => panic!("unexpected error: {other:?}"),
        }
        let payload: Value = serde_yaml::from_str("message: overtemp").unwrap();
        match TesError::device(payload) {
            TesError::Device { summary, .. } => assert_eq!(summary, "overtemp"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
