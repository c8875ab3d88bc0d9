// socketcand/src/beacon.rs
//
// Implements the socketcand service discovery beacon.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Service discovery beacon.
//!
//! A socketcand bridge periodically broadcasts a small XML document on UDP
//! port 42000 to announce itself and the buses it exports:
//!
//! ```text
//! <CANBeacon name="bench" type="SocketCAN" description="socketcand">
//!   <URL>can://192.168.0.16:29536</URL>
//!   <Bus name="can0"/>
//!   <Bus name="can1"/>
//! </CANBeacon>
//! ```

use crate::addr::{split_host_port, BusAddr, URL_SCHEME};
use log::{debug, warn};
use std::{
    fmt, io,
    net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    str::FromStr,
    time::{Duration, Instant},
};
use thiserror::Error;

/// Port used for broadcasting service discovery datagrams.
pub const BEACON_PORT: u16 = 42000;

/// Largest beacon datagram we expect to receive.
const MAX_BEACON_LEN: usize = 2048;

/// Error parsing a beacon.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconParseError {
    /// The text has no `CANBeacon` element
    #[error("Not a CAN beacon")]
    NotABeacon,
    /// A required attribute or element is missing
    #[error("Missing {0}")]
    Missing(&'static str),
    /// The URL is not `can://host:port`
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The device type is not one of the known kinds
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),
}

/// The kind of device announcing itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// A Linux host exporting SocketCAN interfaces
    SocketCan,
    /// An embedded device
    Embedded,
    /// A CAN adapter
    Adapter,
}

impl DeviceType {
    /// The name of the type, as used in the beacon.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SocketCan => "SocketCAN",
            Self::Embedded => "embedded",
            Self::Adapter => "adapter",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = BeaconParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SocketCAN" => Ok(Self::SocketCan),
            "embedded" => Ok(Self::Embedded),
            "adapter" => Ok(Self::Adapter),
            _ => Err(BeaconParseError::UnknownDeviceType(s.to_string())),
        }
    }
}

/// A service discovery announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Name of the bridge, usually its host name
    pub name: String,
    /// The kind of device
    pub device_type: DeviceType,
    /// Free text description
    pub description: Option<String>,
    /// Address clients should connect to
    pub host: String,
    /// TCP port clients should connect to
    pub port: u16,
    /// Names of the exported buses
    pub buses: Vec<String>,
}

impl Beacon {
    /// The address of each advertised bus.
    pub fn bus_addrs(&self) -> Vec<BusAddr> {
        self.buses
            .iter()
            .map(|bus| BusAddr::new(self.host.clone(), self.port, bus.clone()))
            .collect()
    }

    /// Sends the beacon as a single datagram.
    pub fn send_to<A: ToSocketAddrs>(&self, sock: &UdpSocket, target: A) -> io::Result<()> {
        sock.send_to(self.to_string().as_bytes(), target)?;
        Ok(())
    }
}

/// Escapes text for use in an XML attribute.
fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parses the `key="value"` attributes from the inside of a tag.
fn attributes(s: &str) -> Vec<(&str, String)> {
    let mut attrs = Vec::new();
    let mut rest = s;

    while let Some((key, after)) = rest.split_once('=') {
        let after = after.trim_start();
        let Some(after) = after.strip_prefix('"') else {
            break;
        };
        let Some((val, after)) = after.split_once('"') else {
            break;
        };
        let key = key.split_whitespace().last().unwrap_or_default();
        attrs.push((key, unescape(val)));
        rest = after;
    }
    attrs
}

fn attribute<'a>(attrs: &'a [(&str, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            r#"<CANBeacon name="{}" type="{}""#,
            escape(&self.name),
            self.device_type
        )?;
        if let Some(description) = &self.description {
            write!(f, r#" description="{}""#, escape(description))?;
        }
        f.write_str(">")?;

        if self.host.contains(':') {
            write!(f, "<URL>{}[{}]:{}</URL>", URL_SCHEME, self.host, self.port)?;
        } else {
            write!(f, "<URL>{}{}:{}</URL>", URL_SCHEME, self.host, self.port)?;
        }

        for bus in &self.buses {
            write!(f, r#"<Bus name="{}"/>"#, escape(bus))?;
        }
        f.write_str("</CANBeacon>")
    }
}

impl FromStr for Beacon {
    type Err = BeaconParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let start = s.find("<CANBeacon").ok_or(BeaconParseError::NotABeacon)?;
        let s = &s[start + "<CANBeacon".len()..];
        let (head, body) = s.split_once('>').ok_or(BeaconParseError::NotABeacon)?;

        let attrs = attributes(head);
        let name = attribute(&attrs, "name")
            .ok_or(BeaconParseError::Missing("name"))?
            .to_string();
        let device_type = attribute(&attrs, "type")
            .ok_or(BeaconParseError::Missing("type"))?
            .parse()?;
        let description = attribute(&attrs, "description").map(String::from);

        let url = body
            .split_once("<URL>")
            .and_then(|(_, s)| s.split_once("</URL>"))
            .map(|(url, _)| url.trim())
            .ok_or(BeaconParseError::Missing("URL"))?;
        let authority = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| BeaconParseError::InvalidUrl(url.to_string()))?
            .trim_end_matches('/');
        let (host, port) = split_host_port(authority)
            .map_err(|_| BeaconParseError::InvalidUrl(url.to_string()))?;
        if host.is_empty() {
            return Err(BeaconParseError::InvalidUrl(url.to_string()));
        }

        let buses = body
            .split("<Bus")
            .skip(1)
            .filter_map(|tag| {
                let tag = tag.split_once('>').map_or(tag, |(tag, _)| tag);
                let tag = tag.trim_end_matches('/');
                attribute(&attributes(tag), "name").map(String::from)
            })
            .collect();

        Ok(Self {
            name,
            device_type,
            description,
            host: host.to_string(),
            port,
            buses,
        })
    }
}

/// Waits for a beacon on an already bound socket.
///
/// Datagrams that are not valid beacons are skipped. Returns `None` if no
/// beacon arrives within `timeout`.
pub fn detect_beacon_on(sock: &UdpSocket, timeout: Duration) -> io::Result<Option<Beacon>> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_BEACON_LEN];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        sock.set_read_timeout(Some(remaining))?;

        let (n, from) = match sock.recv_from(&mut buf) {
            Ok(v) => v,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };

        let text = String::from_utf8_lossy(&buf[..n]);
        match text.parse::<Beacon>() {
            Ok(beacon) => {
                debug!("Beacon from {}: {}", from, beacon.name);
                return Ok(Some(beacon));
            }
            Err(err) => warn!("Ignoring datagram from {}: {}", from, err),
        }
    }
}

/// Listens on the beacon port for the first bridge to announce itself.
pub fn detect_beacon(timeout: Duration) -> io::Result<Option<Beacon>> {
    let sock = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, BEACON_PORT)))?;
    detect_beacon_on(&sock, timeout)
}

/////////////////////////////////////////////////////////////////////////////
