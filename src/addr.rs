// socketcand/src/addr.rs
//
// Implements the address of a bus behind a socketcand bridge.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! socketcand bus address type.

use std::{
    fmt, io,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};
use thiserror::Error;

/// The TCP port socketcand listens on by default.
pub const DEFAULT_PORT: u16 = 29536;

/// The URL scheme used by socketcand beacons.
pub const URL_SCHEME: &str = "can://";

/// Error parsing a bus address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    /// No host name before the port or channel
    #[error("Missing host")]
    MissingHost,
    /// No channel after the address
    #[error("Missing channel")]
    MissingChannel,
    /// The port is not a number
    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

/// Address of a CAN bus behind a socketcand bridge.
///
/// This is the network address of the bridge together with the name of one
/// of the interfaces it exports, like "can0". It can be parsed from, and
/// printed as, a URL of the form `can://host:port/channel`. The scheme and
/// the port can be left out when parsing; the port then defaults to
/// [`DEFAULT_PORT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusAddr {
    /// Host name or IP address of the bridge
    pub host: String,
    /// TCP port of the bridge
    pub port: u16,
    /// Name of the CAN interface on the bridge
    pub channel: String,
}

impl BusAddr {
    /// Creates a new bus address.
    pub fn new(host: impl Into<String>, port: u16, channel: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            channel: channel.into(),
        }
    }

    /// Creates an address for a bridge on the default port.
    pub fn with_default_port(host: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PORT, channel)
    }

    /// Resolves the host and port into socket addresses.
    pub fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        Ok((self.host.as_str(), self.port).to_socket_addrs()?.collect())
    }
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            // IPv6 literal
            write!(f, "{}[{}]:{}/{}", URL_SCHEME, self.host, self.port, self.channel)
        } else {
            write!(f, "{}{}:{}/{}", URL_SCHEME, self.host, self.port, self.channel)
        }
    }
}

impl FromStr for BusAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix(URL_SCHEME).unwrap_or(s);

        let (authority, channel) = s.split_once('/').ok_or(AddrParseError::MissingChannel)?;
        let channel = channel.trim_end_matches('/');
        if channel.is_empty() {
            return Err(AddrParseError::MissingChannel);
        }

        let (host, port) = split_host_port(authority)?;
        if host.is_empty() {
            return Err(AddrParseError::MissingHost);
        }

        Ok(Self::new(host, port, channel))
    }
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals.
pub(crate) fn split_host_port(s: &str) -> Result<(&str, u16), AddrParseError> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| AddrParseError::InvalidPort(p.to_string()))
    };

    if let Some(rest) = s.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or(AddrParseError::MissingHost)?;
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, parse_port(port)?)),
            None => Ok((host, DEFAULT_PORT)),
        };
    }

    match s.rsplit_once(':') {
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((s, DEFAULT_PORT)),
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        let addr: BusAddr = "can://192.168.0.16:29536/can0".parse().unwrap();
        assert_eq!(addr, BusAddr::new("192.168.0.16", 29536, "can0"));

        let addr: BusAddr = "bridge.local:1234/vcan1".parse().unwrap();
        assert_eq!(addr, BusAddr::new("bridge.local", 1234, "vcan1"));
    }

    #[test]
    fn test_default_port() {
        let addr: BusAddr = "localhost/can0".parse().unwrap();
        assert_eq!(addr.port, DEFAULT_PORT);
        assert_eq!(addr, BusAddr::with_default_port("localhost", "can0"));
    }

    #[test]
    fn test_ipv6() {
        let addr: BusAddr = "can://[::1]:29536/can0".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.to_string(), "can://[::1]:29536/can0");
    }

    #[test]
    fn test_display() {
        let addr = BusAddr::new("10.0.0.2", 29536, "can1");
        assert_eq!(addr.to_string(), "can://10.0.0.2:29536/can1");
        assert_eq!(addr.to_string().parse::<BusAddr>().unwrap(), addr);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "can://host:29536".parse::<BusAddr>(),
            Err(AddrParseError::MissingChannel)
        );
        assert_eq!(
            "host:29536/".parse::<BusAddr>(),
            Err(AddrParseError::MissingChannel)
        );
        assert_eq!(
            ":29536/can0".parse::<BusAddr>(),
            Err(AddrParseError::MissingHost)
        );
        assert!(matches!(
            "host:port/can0".parse::<BusAddr>(),
            Err(AddrParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_socket_addrs() {
        let addr = BusAddr::new("127.0.0.1", 4000, "can0");
        let addrs = addr.socket_addrs().unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:4000".parse::<SocketAddr>().unwrap()]);
    }
}
