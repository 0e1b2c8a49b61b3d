//! Audio host client boundary.
//!
//! A host owns the realtime thread. The session registers one output port per source
//! channel, activates the host with a [`RealtimeCallback`], then connects each port to a
//! destination. Two backends ship with the crate:
//! - [`cpal_host::CpalHost`]: a CPAL output device
//! - [`offline::OfflineHost`]: a plain thread driving fixed-size periods and capturing output

pub mod cpal_host;
pub mod offline;

use crate::error::PlayerError;
use crate::realtime::RealtimeCallback;

/// Invoked (at most once, from a host thread) when the host goes away underneath the session.
pub type ShutdownHook = Box<dyn Fn() + Send + 'static>;

/// Capability set the session needs from an audio host.
pub trait AudioHost {
    /// Client name; prefix of every registered port.
    fn name(&self) -> &str;

    /// Rate the host runs its periods at.
    fn sample_rate(&self) -> u32;

    /// Register `channels` output ports named `<client>:out_<n>` and return their names.
    fn register_output_ports(&mut self, channels: usize) -> Result<Vec<String>, PlayerError>;

    /// Hand the callback to the host's realtime thread and start processing periods.
    fn activate(
        &mut self,
        callback: RealtimeCallback,
        on_shutdown: ShutdownHook,
    ) -> Result<(), PlayerError>;

    /// Route a registered port to `destination`. Only valid after activation.
    fn connect(&mut self, port: &str, destination: &str) -> Result<(), PlayerError>;

    /// Stop processing periods and release the callback.
    fn deactivate(&mut self) -> Result<(), PlayerError>;
}

impl<H: AudioHost + ?Sized> AudioHost for Box<H> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn register_output_ports(&mut self, channels: usize) -> Result<Vec<String>, PlayerError> {
        (**self).register_output_ports(channels)
    }

    fn activate(
        &mut self,
        callback: RealtimeCallback,
        on_shutdown: ShutdownHook,
    ) -> Result<(), PlayerError> {
        (**self).activate(callback, on_shutdown)
    }

    fn connect(&mut self, port: &str, destination: &str) -> Result<(), PlayerError> {
        (**self).connect(port, destination)
    }

    fn deactivate(&mut self) -> Result<(), PlayerError> {
        (**self).deactivate()
    }
}

/// Port name for 1-based channel `n`.
pub fn port_name(client: &str, n: usize) -> String {
    format!("{client}:out_{n}")
}

/// Expand a connect pattern for 1-based channel `n` by replacing every `%d`.
pub fn format_destination(pattern: &str, n: usize) -> String {
    pattern.replace("%d", &n.to_string())
}

/// A destination split into client and port part, e.g. `system` and `playback_1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Destination<'a> {
    pub client: &'a str,
    pub port: &'a str,
}

impl<'a> Destination<'a> {
    pub fn parse(destination: &'a str) -> Option<Self> {
        let (client, port) = destination.split_once(':')?;
        if client.is_empty() || port.is_empty() {
            return None;
        }
        Some(Self { client, port })
    }

    /// 1-based channel number of a port named `<prefix><n>`.
    pub fn channel(&self, prefix: &str) -> Option<usize> {
        self.port
            .strip_prefix(prefix)?
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
    }
}

/// Index of a registered port by full name.
pub(crate) fn port_index(ports: &[String], port: &str) -> Option<usize> {
    ports.iter().position(|p| p == port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_destination_substitutes_channel() {
        assert_eq!(format_destination("system:playback_%d", 2), "system:playback_2");
        assert_eq!(format_destination("fixed:port", 3), "fixed:port");
    }

    #[test]
    fn port_names_are_one_based() {
        assert_eq!(port_name("diskplay", 1), "diskplay:out_1");
    }

    #[test]
    fn destination_parses_client_and_channel() {
        let dest = Destination::parse("system:playback_12").unwrap();
        assert_eq!(dest.client, "system");
        assert_eq!(dest.channel("playback_"), Some(12));
        assert_eq!(dest.channel("capture_"), None);
    }

    #[test]
    fn destination_rejects_malformed_names() {
        assert!(Destination::parse("nocolon").is_none());
        assert!(Destination::parse(":playback_1").is_none());
        assert!(Destination::parse("system:").is_none());
        let zero = Destination::parse("system:playback_0").unwrap();
        assert_eq!(zero.channel("playback_"), None);
    }

    #[test]
    fn port_index_finds_registered_port() {
        let ports = vec![port_name("c", 1), port_name("c", 2)];
        assert_eq!(port_index(&ports, "c:out_2"), Some(1));
        assert_eq!(port_index(&ports, "c:out_3"), None);
    }
}
