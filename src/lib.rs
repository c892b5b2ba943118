//! Host-side client for a multi-channel TES bias / LNA rail controller
//! reachable over a serial link.
//!
//! Commands are single text lines; replies are YAML blocks opened by `---`
//! and closed by a blank line. Channel arguments accept a single index, a
//! list of indices, or nothing at all to address every channel, with value
//! arguments fanned out to match.

pub mod channel;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod reply;

pub use channel::{ChannelHandle, ChannelRegistry};
pub use client::{Client, Reply};
pub use command::{Target, WordOrder};
pub use config::Config;
pub use dispatch::{Fanout, Selector};
pub use error::TesError;

use command::{CommandSet, TES_CURRENT_MA, TES_DAC_BITS};
use connection::Connection;
use std::time::Duration;

/// Main struct for interacting with a bias/amplifier controller.
///
/// Owns the exchange client and one channel registry per instrument kind.
/// All channel-addressed methods take `impl Into<Selector<usize>>`, so a
/// bare index, a `Vec` of indices, or [`Selector::all()`] work alike; the
/// reply shape mirrors the argument ([`Fanout::One`] for a bare index).
pub struct DeviceController {
    client: Client,
    tes: ChannelRegistry,
    lna: ChannelRegistry,
    tes_commands: CommandSet,
    lna_commands: CommandSet,
}

impl DeviceController {
    /// Build a controller over an already-constructed link.
    pub fn new(connection: Box<dyn Connection>, config: &Config) -> Self {
        let client = Client::with_timeout(connection, config.timeout_duration());
        let tes = ChannelRegistry::new(&client, config.num_tes);
        let lna = ChannelRegistry::new(&client, config.num_lna);
        DeviceController {
            client,
            tes,
            lna,
            tes_commands: CommandSet::tes(),
            lna_commands: CommandSet::lna(config.lna_word_order),
        }
    }

    /// Open a serial link with default sizing.
    #[cfg(feature = "serial")]
    pub fn connect_serial(port_name: &str, baud_rate: u32) -> Result<Self, TesError> {
        let config = Config {
            port: port_name.to_owned(),
            baud: baud_rate,
            ..Config::default()
        };
        let connection = connection::SerialConnection::new(&config.port, config.baud);
        let controller = Self::new(Box::new(connection), &config);
        controller.client.open()?;
        Ok(controller)
    }

    /// Connect to a controller behind a serial-to-ethernet bridge.
    #[cfg(feature = "socket")]
    pub fn connect_socket(address: &str) -> Result<Self, TesError> {
        let config = Config {
            port: address.to_owned(),
            ..Config::default()
        };
        let connection = connection::SocketConnection::new(address);
        let controller = Self::new(Box::new(connection), &config);
        controller.client.open()?;
        Ok(controller)
    }

    /// Load settings from a YAML file and open the serial link.
    #[cfg(feature = "serial")]
    pub fn from_config(path: impl AsRef<std::path::Path>) -> Result<Self, TesError> {
        let config = Config::load(path)?;
        let connection = connection::SerialConnection::new(&config.port, config.baud);
        let controller = Self::new(Box::new(connection), &config);
        controller.client.open()?;
        Ok(controller)
    }

    /// Set the reply deadline for subsequent exchanges.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), TesError> {
        self.client.set_timeout(timeout)
    }

    /// Release the link. Idempotent.
    pub fn close(&self) {
        self.client.close()
    }

    pub fn tes_channel_count(&self) -> usize {
        self.tes.count()
    }

    pub fn lna_channel_count(&self) -> usize {
        self.lna.count()
    }

    /// Direct handle for one bias channel.
    pub fn tes_channel(&self, index: usize) -> Result<&ChannelHandle, TesError> {
        self.tes.for_channel(index)
    }

    /// Direct handle for one amplifier channel.
    pub fn lna_channel(&self, index: usize) -> Result<&ChannelHandle, TesError> {
        self.lna.for_channel(index)
    }

    /// Switch the amplifier command grammar at runtime.
    pub fn set_lna_word_order(&mut self, word_order: WordOrder) {
        self.lna_commands.set_word_order(word_order);
    }

    // ---- shared DAC --------------------------------------------------

    /// Set the shared DAC word.
    pub fn dac_set(&self, value: u16) -> Result<Reply, TesError> {
        self.client.exchange(&command::dac_set(value))
    }

    /// Get the shared DAC word.
    pub fn dac_get(&self) -> Result<Reply, TesError> {
        self.client.exchange(&command::dac_get())
    }

    // ---- bias channels -----------------------------------------------

    fn tes_action(
        &self,
        channels: impl Into<Selector<usize>>,
        verb: &str,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes
            .dispatch_action(channels.into(), |ch| self.tes_commands.action(ch, verb, None))
    }

    /// Enable the bias output of the channel(s).
    pub fn tes_enable(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "ENABLE")
    }

    /// Disable the bias output of the channel(s).
    pub fn tes_disable(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "DISABLE")
    }

    /// Read every monitored quantity of the channel(s).
    pub fn tes_get_all(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "GET")
    }

    /// Read the raw bias DAC word of the channel(s).
    pub fn tes_get_bits(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "BIT")
    }

    /// Read the shunt voltage of the channel(s).
    pub fn tes_get_shunt(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "SHUNT")
    }

    /// Read the bus voltage of the channel(s).
    pub fn tes_get_bus(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "BUS")
    }

    /// Read the output current of the channel(s).
    pub fn tes_get_current(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "CURRENT")
    }

    /// Read the dissipated power of the channel(s).
    pub fn tes_get_power(
        &self,
        channels: impl Into<Selector<usize>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes_action(channels, "POWER")
    }

    /// Set the bias current of the channel(s), in milliamps (0 to 20.0).
    pub fn tes_set_current(
        &self,
        channels: impl Into<Selector<usize>>,
        milliamps: impl Into<Selector<f64>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes.dispatch(channels.into(), milliamps.into(), |ch, ma| {
            let ma = TES_CURRENT_MA.check("current_mA", *ma)?;
            Ok(self
                .tes_commands
                .with_value(ch, "SET", None, format!("{ma:.3}")))
        })
    }

    /// Step the bias current of the channel(s) up by `delta` DAC counts.
    pub fn tes_increment_current(
        &self,
        channels: impl Into<Selector<usize>>,
        delta: impl Into<Selector<i64>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes.dispatch(channels.into(), delta.into(), |ch, delta| {
            Ok(self.tes_commands.with_value(ch, "INC", None, delta))
        })
    }

    /// Step the bias current of the channel(s) down by `delta` DAC counts.
    pub fn tes_decrement_current(
        &self,
        channels: impl Into<Selector<usize>>,
        delta: impl Into<Selector<i64>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes.dispatch(channels.into(), delta.into(), |ch, delta| {
            Ok(self.tes_commands.with_value(ch, "DEC", None, delta))
        })
    }

    /// Write the bias DAC word of the channel(s) directly (0 to 0xFFFFF).
    pub fn tes_set_bits(
        &self,
        channels: impl Into<Selector<usize>>,
        bits: impl Into<Selector<u32>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.tes.dispatch(channels.into(), bits.into(), |ch, bits| {
            let bits = TES_DAC_BITS.check("bits", *bits)?;
            Ok(self.tes_commands.with_value(ch, "SETINT", None, bits))
        })
    }

    // ---- amplifier channels ------------------------------------------

    fn lna_action(
        &self,
        channels: impl Into<Selector<usize>>,
        verb: &str,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna.dispatch_action(channels.into(), |ch| {
            self.lna_commands.action(ch, verb, Some(target))
        })
    }

    /// Enable the given rail on the channel(s).
    pub fn lna_enable(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "ENABLE", target)
    }

    /// Disable the given rail on the channel(s).
    pub fn lna_disable(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "DISABLE", target)
    }

    /// Read every monitored quantity of the given rail.
    pub fn lna_get_all(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "GET", target)
    }

    /// Read the shunt voltage of the given rail.
    pub fn lna_get_shunt(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "SHUNT", target)
    }

    /// Read the bus voltage of the given rail.
    pub fn lna_get_bus(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "BUS", target)
    }

    /// Read the current of the given rail.
    pub fn lna_get_current(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "CURRENT", target)
    }

    /// Read the dissipated power of the given rail.
    pub fn lna_get_power(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna_action(channels, "POWER", target)
    }

    /// Write the rail DAC word of the channel(s).
    pub fn lna_set_dac(
        &self,
        channels: impl Into<Selector<usize>>,
        target: Target,
        values: impl Into<Selector<u16>>,
    ) -> Result<Fanout<Reply>, TesError> {
        self.lna.dispatch(channels.into(), values.into(), |ch, value| {
            Ok(self
                .lna_commands
                .with_value(ch, "SET", Some(target), value))
        })
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.client.close();
    }
}
