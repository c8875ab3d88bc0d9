// socketcand/src/message.rs
//
// A CAN frame together with the metadata the bridge attaches to it.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Timestamped CAN messages.
//!
//! A [`Message`] wraps any frame with the receive timestamp reported by the
//! bridge, the channel it arrived on, and its direction. Its `Display`
//! implementation renders one line per message in the usual bus-monitor
//! layout:
//!
//! ```text
//! Timestamp: 1680613437.452532    ID: 00c0ffee    X Rx     F          DL:  4    00 01 02 03                 Channel: can0
//! ```

use crate::{frame::Frame, CanAnyFrame};
use embedded_can::Frame as EmbeddedFrame;
use itertools::Itertools;
use std::{fmt, time::Duration};

/// Width the rendered payload is padded to, so columns line up for
/// classic frames.
const DATA_FIELD_WIDTH: usize = 24;

/// A CAN frame with its receive metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The frame itself
    pub frame: CanAnyFrame,
    /// Time since the UNIX epoch at which the bridge saw the frame
    pub timestamp: Option<Duration>,
    /// The bridge channel, like "can0"
    pub channel: Option<String>,
    /// Whether this message was received (as opposed to sent)
    pub is_rx: bool,
}

impl Message {
    /// Creates an outgoing message with no timestamp or channel.
    pub fn new(frame: impl Into<CanAnyFrame>) -> Self {
        Self {
            frame: frame.into(),
            timestamp: None,
            channel: None,
            is_rx: false,
        }
    }

    /// Creates a received message.
    pub fn received(frame: impl Into<CanAnyFrame>, timestamp: Duration, channel: &str) -> Self {
        Self {
            frame: frame.into(),
            timestamp: Some(timestamp),
            channel: Some(channel.to_string()),
            is_rx: true,
        }
    }

    /// The numeric arbitration ID, without flags.
    pub fn arbitration_id(&self) -> u32 {
        self.frame.raw_id()
    }

    /// Whether the ID is a 29-bit extended ID.
    pub fn is_extended_id(&self) -> bool {
        self.frame.is_extended()
    }

    /// Whether the frame uses CAN FD framing.
    pub fn is_fd(&self) -> bool {
        self.frame.is_fd()
    }

    /// Whether the frame is a remote transmission request.
    pub fn is_remote_frame(&self) -> bool {
        self.frame.is_remote_frame()
    }

    /// Whether the frame reports a bus error.
    pub fn is_error_frame(&self) -> bool {
        self.frame.is_error_frame()
    }

    /// The FD bit rate switch flag. Always false for classic frames.
    pub fn bitrate_switch(&self) -> bool {
        matches!(self.frame, CanAnyFrame::Fd(frame) if frame.is_brs())
    }

    /// The FD error state indicator. Always false for classic frames.
    pub fn error_state_indicator(&self) -> bool {
        matches!(self.frame, CanAnyFrame::Fd(frame) if frame.is_esi())
    }

    /// The payload.
    pub fn data(&self) -> &[u8] {
        self.frame.data()
    }

    /// The payload length in bytes; the requested length for remote frames.
    pub fn dlc(&self) -> usize {
        match self.frame {
            CanAnyFrame::Remote(frame) => frame.dlc(),
            _ => self.frame.len(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::with_capacity(7);

        let ts = self.timestamp.unwrap_or_default().as_secs_f64();
        fields.push(format!("Timestamp: {:>15.6}", ts));

        let id = if self.is_extended_id() {
            format!("{:08x}", self.arbitration_id())
        } else {
            format!("{:04x}", self.arbitration_id())
        };
        fields.push(format!("ID: {:>8}", id));

        let flags = [
            if self.is_extended_id() { "X" } else { "S" },
            if self.is_rx { "Rx" } else { "Tx" },
            if self.is_error_frame() { "E" } else { " " },
            if self.is_remote_frame() { "R" } else { " " },
            if self.is_fd() { "F" } else { " " },
            if self.bitrate_switch() { "BS" } else { "  " },
            if self.error_state_indicator() { "EI" } else { "  " },
        ];
        fields.push(flags.join(" "));

        fields.push(format!("DL: {:2}", self.dlc()));

        let data = self.data();
        let hex = data.iter().map(|b| format!("{:02x}", b)).join(" ");
        fields.push(format!("{:<width$}", hex, width = DATA_FIELD_WIDTH));

        if !data.is_empty() && data.iter().all(u8::is_ascii_alphanumeric) {
            fields.push(format!("'{}'", String::from_utf8_lossy(data)));
        }

        if let Some(channel) = &self.channel {
            fields.push(format!("Channel: {}", channel));
        }

        write!(f, "{}", fields.join("    ").trim())
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::CanDataFrame, id::FdFlags, CanFdFrame, CanRemoteFrame};
    use embedded_can::{ExtendedId, StandardId};

    #[test]
    fn test_send_example_message() {
        let id = ExtendedId::new(0xC0FFEE).unwrap();
        let frame = CanFdFrame::new(id, &[0, 1, 2, 3]).unwrap();
        let msg = Message::new(frame);

        assert_eq!(msg.arbitration_id(), 0xC0FFEE);
        assert!(msg.is_extended_id());
        assert!(msg.is_fd());
        assert!(!msg.is_rx);
        assert_eq!(msg.data(), &[0, 1, 2, 3]);
        assert_eq!(msg.dlc(), 4);

        let line = msg.to_string();
        assert!(line.starts_with("Timestamp:        0.000000    ID: 00c0ffee    X Tx     F"));
        assert!(line.contains("DL:  4    00 01 02 03"));
        assert!(!line.contains("Channel"));
        assert!(!line.ends_with(' '));
    }

    #[test]
    fn test_received_message() {
        let id = StandardId::new(0x123).unwrap();
        let frame = CanDataFrame::new(id, &[0xDE, 0xAD]).unwrap();
        let ts = Duration::new(1680613437, 452_532_000);
        let msg = Message::received(frame, ts, "can0");

        assert_eq!(
            msg.to_string(),
            "Timestamp: 1680613437.452532    ID:     0123    S Rx                DL:  2    \
             de ad                       Channel: can0"
        );
    }

    #[test]
    fn test_fd_flags_rendered() {
        let id = StandardId::new(0x1).unwrap();
        let frame = CanFdFrame::with_flags(id, &[1], FdFlags::BRS | FdFlags::ESI).unwrap();
        let msg = Message::new(frame);
        assert!(msg.bitrate_switch());
        assert!(msg.error_state_indicator());
        assert!(msg.to_string().contains("S Tx     F BS EI"));
    }

    #[test]
    fn test_remote_and_text() {
        let id = StandardId::new(0x10).unwrap();
        let msg = Message::new(CanRemoteFrame::new_remote(id, 3).unwrap());
        assert_eq!(msg.dlc(), 3);
        assert!(msg.to_string().contains("S Tx   R"));

        let msg = Message::new(CanDataFrame::new(id, b"OK").unwrap());
        assert!(msg.to_string().ends_with("'OK'"));
    }
}
