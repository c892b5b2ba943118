//! Decoding of the device's framed YAML reply blocks.

use serde_yaml::Value;

/// Marker line that opens every reply block.
pub const BLOCK_START: &str = "---";

/// A decoded reply block, or the raw text when it would not parse.
#[derive(Debug, Clone)]
pub enum Envelope {
    Parsed(Value),
    /// The block was not valid YAML. The raw text is preserved so callers
    /// can tell an unparsable reply apart from a device-reported error.
    Unparsed { raw: String, reason: String },
}

/// Parse one raw reply block. Never fails outright; an unparsable block is
/// carried verbatim inside [`Envelope::Unparsed`].
pub fn decode_block(raw: &str) -> Envelope {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value) => Envelope::Parsed(value),
        Err(err) => Envelope::Unparsed {
            raw: raw.to_owned(),
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_block_parses_to_a_mapping() {
        let block = "---\nstatus: ok\nresult:\n  current_mA: 1.0\n";
        match decode_block(block) {
            Envelope::Parsed(value) => {
                assert_eq!(value.get("status").and_then(Value::as_str), Some("ok"));
                let result = value.get("result").expect("result present");
                assert_eq!(result.get("current_mA").and_then(Value::as_f64), Some(1.0));
            }
            Envelope::Unparsed { reason, .. } => panic!("block failed to parse: {reason}"),
        }
    }

    #[test]
    fn garbage_block_is_preserved() {
        let block = "---\nstatus: [1, 2\n";
        match decode_block(block) {
            Envelope::Unparsed { raw, reason } => {
                assert_eq!(raw, block);
                assert!(!reason.is_empty());
            }
            Envelope::Parsed(value) => panic!("unexpected parse: {value:?}"),
        }
    }
}
