//! Construction of the device's command lines, together with the numeric
//! bounds each argument must satisfy before anything is sent.

use crate::error::TesError;
use serde::Deserialize;
use std::fmt::Display;

/// Which amplifier rail a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Gate,
    Drain,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Gate => "GATE",
            Target::Drain => "DRAIN",
        }
    }
}

/// Word order for rail-addressed amplifier commands.
///
/// Firmware revisions disagree on whether the rail name follows the verb
/// (`LNA 1 ENABLE GATE`) or precedes it (`LNA 1 GATE ENABLE`). Match this
/// to the grammar of the firmware actually flashed on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WordOrder {
    #[default]
    VerbFirst,
    TargetFirst,
}

/// Inclusive range an operation argument must stay within.
#[derive(Debug, Clone, Copy)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Display + Copy> Bounds<T> {
    /// Pass `value` through, or fail before any command text is built.
    pub fn check(&self, what: &str, value: T) -> Result<T, TesError> {
        if value < self.min || value > self.max {
            return Err(TesError::InvalidArgument(format!(
                "{what} {value} outside {}..={}",
                self.min, self.max
            )));
        }
        Ok(value)
    }
}

/// Bias current set point, in milliamps.
pub const TES_CURRENT_MA: Bounds<f64> = Bounds { min: 0.0, max: 20.0 };
/// Raw bias DAC word.
pub const TES_DAC_BITS: Bounds<u32> = Bounds {
    min: 0,
    max: 0xF_FFFF,
};

/// Builds command lines for one instrument kind.
///
/// The bias and amplifier grammars differ only in their mnemonic and in
/// whether an operation names a rail, so a single builder parameterized by
/// both covers the two.
#[derive(Debug, Clone)]
pub struct CommandSet {
    mnemonic: &'static str,
    word_order: WordOrder,
}

impl CommandSet {
    pub const fn new(mnemonic: &'static str, word_order: WordOrder) -> Self {
        CommandSet {
            mnemonic,
            word_order,
        }
    }

    /// Command set for the bias channels.
    pub const fn tes() -> Self {
        Self::new("TES", WordOrder::VerbFirst)
    }

    /// Command set for the amplifier channels.
    pub const fn lna(word_order: WordOrder) -> Self {
        Self::new("LNA", word_order)
    }

    pub fn set_word_order(&mut self, word_order: WordOrder) {
        self.word_order = word_order;
    }

    /// A pure action, e.g. `TES 3 ENABLE` or `LNA 2 GET GATE`.
    pub fn action(&self, channel: usize, verb: &str, target: Option<Target>) -> String {
        match (target, self.word_order) {
            (None, _) => format!("{} {} {}", self.mnemonic, channel, verb),
            (Some(t), WordOrder::VerbFirst) => {
                format!("{} {} {} {}", self.mnemonic, channel, verb, t.as_str())
            }
            (Some(t), WordOrder::TargetFirst) => {
                format!("{} {} {} {}", self.mnemonic, channel, t.as_str(), verb)
            }
        }
    }

    /// An action carrying a value, e.g. `TES 3 SET 1.500`.
    pub fn with_value(
        &self,
        channel: usize,
        verb: &str,
        target: Option<Target>,
        value: impl Display,
    ) -> String {
        format!("{} {}", self.action(channel, verb, target), value)
    }
}

/// Set the shared DAC word. The DAC has no channel dimension.
pub fn dac_set(value: u16) -> String {
    format!("DAC SET {value}")
}

/// Query the shared DAC word.
pub fn dac_get() -> String {
    "DAC GET".to_owned()
}
