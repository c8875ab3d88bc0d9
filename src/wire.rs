// socketcand/src/wire.rs
//
// Implements the socketcand ASCII wire protocol.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! socketcand wire protocol.
//!
//! Everything exchanged with the daemon is a short ASCII message enclosed
//! in angle brackets, with the fields separated by spaces:
//!
//! ```text
//! < hi >
//! < open can0 >
//! < ok >
//! < rawmode >
//! < ok >
//! < frame 123 1680613437.452532 11223344 >
//! < send 00C0FFEE 4 00 01 02 03 >
//! ```
//!
//! Messages sent by the client are represented as a [`Command`], those
//! sent by the daemon as a [`Response`]. Both parse from (`FromStr`) and
//! print to (`Display`) their wire representation.
//!
//! TCP carries no message boundaries, so a [`Decoder`] collects the bytes
//! from the stream and hands out one complete message at a time.

use crate::{
    frame::Frame,
    id::{id_from_wire, id_to_wire, FdFlags, CANFD_MAX_DLEN},
    CanDataFrame, CanErrorFrame, CanFdFrame, CanFrame, CanRemoteFrame, ConstructionError, Message,
};
use embedded_can::{Frame as EmbeddedFrame, Id};
use hex::FromHex;
use itertools::Itertools;
use std::{fmt, str::FromStr, str::SplitWhitespace, time::Duration};
use thiserror::Error;

/// Largest message the decoder will buffer before giving up on it.
///
/// The longest legitimate message is an FD send with 64 data bytes, which
/// stays well below this.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Wire protocol parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The message is not enclosed in `<` and `>`
    #[error("Message is not enclosed in angle brackets")]
    NotDelimited,
    /// The message ended before all required fields
    #[error("Unexpected end of message")]
    UnexpectedEnd,
    /// The message contains more fields than expected
    #[error("Unexpected field: {0}")]
    TrailingField(String),
    /// The first word does not name a known message
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    /// The CAN ID is malformed or out of range
    #[error("Invalid CAN ID: {0}")]
    InvalidId(String),
    /// A numeric field could not be parsed
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    /// A payload byte could not be parsed, or there were too many
    #[error("Invalid frame data")]
    InvalidData,
    /// The data length field disagrees with the payload
    #[error("Data length {dlc} does not match {len} payload bytes")]
    DlcMismatch {
        /// The length announced in the message
        dlc: usize,
        /// The number of payload bytes present
        len: usize,
    },
    /// The timestamp is not `seconds.fraction`
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// The bytes are not valid UTF-8
    #[error("Message is not valid UTF-8")]
    NotUtf8,
    /// No closing bracket within `MAX_MESSAGE_LEN` bytes
    #[error("Message exceeds {} bytes", MAX_MESSAGE_LEN)]
    TooLong,
    /// The fields don't describe a valid frame
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

/////////////////////////////////////////////////////////////////////////////
// Field parsing

/// Strips the angle brackets, returning the inner text.
fn body(s: &str) -> Result<&str, ParseError> {
    s.trim()
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or(ParseError::NotDelimited)
}

/// Cursor over the space separated fields of a message.
struct Fields<'a> {
    iter: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(body: &'a str) -> Self {
        Self {
            iter: body.split_whitespace(),
        }
    }

    fn next(&mut self) -> Result<&'a str, ParseError> {
        self.iter.next().ok_or(ParseError::UnexpectedEnd)
    }

    fn id(&mut self) -> Result<Id, ParseError> {
        let s = self.next()?;
        id_from_wire(s).ok_or_else(|| ParseError::InvalidId(s.to_string()))
    }

    fn number<T: FromStr>(&mut self) -> Result<T, ParseError> {
        let s = self.next()?;
        s.parse().map_err(|_| ParseError::InvalidNumber(s.to_string()))
    }

    /// FD flags, as a single hex byte.
    fn fd_flags(&mut self) -> Result<FdFlags, ParseError> {
        let s = self.next()?;
        u8::from_str_radix(s, 16)
            .map(FdFlags::from_bits_truncate)
            .map_err(|_| ParseError::InvalidNumber(s.to_string()))
    }

    /// An interval given as separate seconds and microseconds fields.
    fn interval(&mut self) -> Result<Duration, ParseError> {
        let secs = self.number::<u64>()?;
        let usecs = self.number::<u64>()?;
        Ok(Duration::from_secs(secs) + Duration::from_micros(usecs))
    }

    fn timestamp(&mut self) -> Result<Duration, ParseError> {
        let s = self.next()?;
        parse_timestamp(s).ok_or_else(|| ParseError::InvalidTimestamp(s.to_string()))
    }

    /// All remaining fields, each a single hex byte.
    fn bytes(&mut self) -> Result<Vec<u8>, ParseError> {
        let data = self
            .iter
            .by_ref()
            .map(|b| u8::from_str_radix(b, 16).map_err(|_| ParseError::InvalidData))
            .collect::<Result<Vec<u8>, _>>()?;

        if data.len() > CANFD_MAX_DLEN {
            return Err(ParseError::InvalidData);
        }
        Ok(data)
    }

    /// An optional field of contiguous hex digits, two per byte.
    fn hex_blob(&mut self) -> Result<Vec<u8>, ParseError> {
        match self.iter.next() {
            Some(s) => Vec::from_hex(s).map_err(|_| ParseError::InvalidData),
            None => Ok(Vec::new()),
        }
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.iter.next() {
            Some(s) => Err(ParseError::TrailingField(s.to_string())),
            None => Ok(()),
        }
    }
}

/// Parses a `seconds.fraction` timestamp.
///
/// socketcand prints six fractional digits, but any count up to nine is
/// accepted.
fn parse_timestamp(s: &str) -> Option<Duration> {
    let (secs, frac) = s.split_once('.')?;
    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = secs.parse::<u64>().ok()?;
    let nanos = frac.parse::<u32>().ok()? * 10u32.pow(9 - frac.len() as u32);
    Some(Duration::new(secs, nanos))
}

/// Wire form of a timestamp: seconds and six microsecond digits.
fn fmt_timestamp(ts: &Duration) -> String {
    format!("{}.{:06}", ts.as_secs(), ts.subsec_micros())
}

/// Builds a classic frame from an ID, data length and payload.
///
/// A non-zero length with no payload describes a remote frame.
fn classic_frame(id: Id, dlc: usize, data: &[u8]) -> Result<CanFrame, ParseError> {
    if data.is_empty() && dlc > 0 {
        CanRemoteFrame::new_remote(id, dlc)
            .map(CanFrame::Remote)
            .ok_or(ConstructionError::TooMuchData.into())
    } else if dlc == data.len() {
        CanDataFrame::new(id, data)
            .map(CanFrame::Data)
            .ok_or(ConstructionError::TooMuchData.into())
    } else {
        Err(ParseError::DlcMismatch {
            dlc,
            len: data.len(),
        })
    }
}

/// Appends the `id dlc data...` fields of a classic frame.
fn push_classic(fields: &mut Vec<String>, frame: &CanFrame) {
    fields.push(id_to_wire(&frame.id()));
    fields.push(frame.dlc().to_string());
    fields.extend(frame.data().iter().map(|b| format!("{:02X}", b)));
}

fn push_interval(fields: &mut Vec<String>, interval: &Duration) {
    fields.push(interval.as_secs().to_string());
    fields.push(interval.subsec_micros().to_string());
}

/// Writes the fields as a complete, bracketed message.
fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[String]) -> fmt::Result {
    write!(f, "< {} >", fields.iter().join(" "))
}

/////////////////////////////////////////////////////////////////////////////
// Command

/// A message sent from the client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Opens a bus by interface name. Switches to broadcast manager mode.
    Open(String),
    /// Adds a cyclic transmission job.
    Add {
        /// Time between transmissions
        interval: Duration,
        /// The frame to transmit
        frame: CanFrame,
    },
    /// Replaces the frame of an existing cyclic job.
    Update {
        /// The new frame; its ID selects the job
        frame: CanFrame,
    },
    /// Removes a cyclic job.
    Delete {
        /// The ID of the job
        id: Id,
    },
    /// Transmits a single classic frame.
    Send(CanFrame),
    /// Transmits a single FD frame.
    FdSend(CanFdFrame),
    /// Installs a content filter on an ID.
    Filter {
        /// Minimum time between updates
        interval: Duration,
        /// The CAN ID to watch
        id: Id,
        /// Number of mask bytes
        dlc: u8,
        /// Mask over the payload; changes in set bits are reported
        data: Vec<u8>,
    },
    /// Subscribes to frames with an ID.
    Subscribe {
        /// Minimum time between updates
        interval: Duration,
        /// The CAN ID
        id: Id,
    },
    /// Cancels a subscription.
    Unsubscribe {
        /// The CAN ID
        id: Id,
    },
    /// Asks the daemon to echo back. Used as a keep-alive.
    Echo,
    /// Switches to raw mode, where every bus frame is forwarded.
    RawMode,
    /// Switches back to broadcast manager mode.
    BroadcastMode,
    /// Switches to control mode.
    ControlMode,
    /// Switches to ISO-TP mode.
    IsoTpMode,
    /// Sets the interval of bus statistics reports in control mode.
    Statistics {
        /// Report interval. Zero disables the reports.
        interval: Duration,
    },
}

impl Command {
    /// Parses a command from its wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        s.parse()
    }

    /// The first word of the message, which names the command.
    pub fn name(&self) -> &'static str {
        use Command::*;
        match self {
            Open(_) => "open",
            Add { .. } => "add",
            Update { .. } => "update",
            Delete { .. } => "delete",
            Send(_) => "send",
            FdSend(_) => "fdsend",
            Filter { .. } => "filter",
            Subscribe { .. } => "subscribe",
            Unsubscribe { .. } => "unsubscribe",
            Echo => "echo",
            RawMode => "rawmode",
            BroadcastMode => "bcmode",
            ControlMode => "controlmode",
            IsoTpMode => "isotpmode",
            Statistics { .. } => "statistics",
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(body(s)?);

        let cmd = match fields.next()? {
            "open" => Command::Open(fields.next()?.to_string()),
            "add" => {
                let interval = fields.interval()?;
                let id = fields.id()?;
                let dlc = fields.number::<usize>()?;
                let frame = classic_frame(id, dlc, &fields.bytes()?)?;
                Command::Add { interval, frame }
            }
            "update" => {
                let id = fields.id()?;
                let dlc = fields.number::<usize>()?;
                let frame = classic_frame(id, dlc, &fields.bytes()?)?;
                Command::Update { frame }
            }
            "delete" => Command::Delete { id: fields.id()? },
            "send" => {
                let id = fields.id()?;
                let dlc = fields.number::<usize>()?;
                Command::Send(classic_frame(id, dlc, &fields.bytes()?)?)
            }
            "fdsend" => {
                let id = fields.id()?;
                let flags = fields.fd_flags()?;
                let len = fields.number::<usize>()?;
                let data = fields.bytes()?;
                if len != data.len() {
                    return Err(ParseError::DlcMismatch {
                        dlc: len,
                        len: data.len(),
                    });
                }
                let frame = CanFdFrame::with_flags(id, &data, flags)
                    .ok_or(ConstructionError::TooMuchData)?;
                Command::FdSend(frame)
            }
            "filter" => {
                let interval = fields.interval()?;
                let id = fields.id()?;
                let dlc = fields.number::<u8>()?;
                let data = fields.bytes()?;
                if data.len() != dlc as usize {
                    return Err(ParseError::DlcMismatch {
                        dlc: dlc as usize,
                        len: data.len(),
                    });
                }
                Command::Filter {
                    interval,
                    id,
                    dlc,
                    data,
                }
            }
            "subscribe" => {
                let interval = fields.interval()?;
                let id = fields.id()?;
                Command::Subscribe { interval, id }
            }
            "unsubscribe" => Command::Unsubscribe { id: fields.id()? },
            "echo" => Command::Echo,
            "rawmode" => Command::RawMode,
            "bcmode" => Command::BroadcastMode,
            "controlmode" => Command::ControlMode,
            "isotpmode" => Command::IsoTpMode,
            "statistics" => Command::Statistics {
                interval: Duration::from_millis(fields.number::<u64>()?),
            },
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };

        fields.finish()?;
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Command::*;

        let mut fields = vec![self.name().to_string()];

        match self {
            Open(channel) => fields.push(channel.clone()),
            Add { interval, frame } => {
                push_interval(&mut fields, interval);
                push_classic(&mut fields, frame);
            }
            Update { frame } | Send(frame) => push_classic(&mut fields, frame),
            Delete { id } | Unsubscribe { id } => fields.push(id_to_wire(id)),
            FdSend(frame) => {
                fields.push(id_to_wire(&frame.id()));
                fields.push(format!("{:X}", frame.flags().bits()));
                fields.push(frame.len().to_string());
                fields.extend(frame.data().iter().map(|b| format!("{:02X}", b)));
            }
            Filter {
                interval,
                id,
                dlc,
                data,
            } => {
                push_interval(&mut fields, interval);
                fields.push(id_to_wire(id));
                fields.push(dlc.to_string());
                fields.extend(data.iter().map(|b| format!("{:02X}", b)));
            }
            Subscribe { interval, id } => {
                push_interval(&mut fields, interval);
                fields.push(id_to_wire(id));
            }
            Statistics { interval } => fields.push(interval.as_millis().to_string()),
            Echo | RawMode | BroadcastMode | ControlMode | IsoTpMode => {}
        }

        write_fields(f, &fields)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Response

/// A message sent from the daemon to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Greeting, sent as soon as a client connects.
    Hi,
    /// Acknowledges a command.
    Ok,
    /// Answer to an echo command.
    Echo,
    /// A textual error report.
    Error(String),
    /// A classic frame received from the bus.
    Frame {
        /// The frame
        frame: CanDataFrame,
        /// Receive time, since the UNIX epoch
        timestamp: Duration,
    },
    /// An FD frame received from the bus.
    FdFrame {
        /// The frame
        frame: CanFdFrame,
        /// Receive time, since the UNIX epoch
        timestamp: Duration,
    },
    /// A bus error, reported by its error class.
    ErrorFrame {
        /// The error frame, with the class bits in its ID word
        frame: CanErrorFrame,
        /// Receive time, since the UNIX epoch
        timestamp: Duration,
    },
}

impl Response {
    /// Parses a response from its wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        s.parse()
    }

    /// Converts a frame report into a received message on `channel`.
    ///
    /// Returns `None` for everything that doesn't carry a frame.
    pub fn into_message(self, channel: &str) -> Option<Message> {
        match self {
            Self::Frame { frame, timestamp } => Some(Message::received(frame, timestamp, channel)),
            Self::FdFrame { frame, timestamp } => {
                Some(Message::received(frame, timestamp, channel))
            }
            Self::ErrorFrame { frame, timestamp } => {
                Some(Message::received(frame, timestamp, channel))
            }
            Self::Hi | Self::Ok | Self::Echo | Self::Error(_) => None,
        }
    }

    /// Creates the report for a message read from the bus.
    ///
    /// The message timestamp is used if present; otherwise `now`.
    /// Remote frames are reported as empty data frames, which is all the
    /// protocol can express.
    pub fn from_message(msg: &Message, now: Duration) -> Self {
        use crate::CanAnyFrame::*;
        let timestamp = msg.timestamp.unwrap_or(now);
        match msg.frame {
            Normal(frame) => Response::Frame { frame, timestamp },
            Remote(frame) => Response::Frame {
                frame: CanDataFrame::init(frame.id_word(), &[]).unwrap_or_default(),
                timestamp,
            },
            Fd(frame) => Response::FdFrame { frame, timestamp },
            Error(frame) => Response::ErrorFrame { frame, timestamp },
        }
    }
}

impl FromStr for Response {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = body(s)?;
        let mut fields = Fields::new(body);

        let resp = match fields.next()? {
            "hi" => Response::Hi,
            "ok" => Response::Ok,
            "echo" => Response::Echo,
            "error" => {
                let words = body.split_whitespace().skip(1).collect::<Vec<_>>();
                return Ok(match words.as_slice() {
                    [class, ts] if parse_timestamp(ts).is_some() => {
                        let class = u32::from_str_radix(class, 16)
                            .map_err(|_| ParseError::InvalidNumber(class.to_string()))?;
                        Response::ErrorFrame {
                            frame: CanErrorFrame::new_error(class, &[])?,
                            timestamp: parse_timestamp(ts).unwrap_or_default(),
                        }
                    }
                    _ => Response::Error(words.join(" ")),
                });
            }
            "frame" => {
                let id = fields.id()?;
                let timestamp = fields.timestamp()?;
                let data = fields.hex_blob()?;
                let frame = CanDataFrame::new(id, &data).ok_or(ConstructionError::TooMuchData)?;
                Response::Frame { frame, timestamp }
            }
            "fdframe" => {
                let id = fields.id()?;
                let timestamp = fields.timestamp()?;
                let flags = fields.fd_flags()?;
                let data = fields.hex_blob()?;
                let frame = CanFdFrame::with_flags(id, &data, flags)
                    .ok_or(ConstructionError::TooMuchData)?;
                Response::FdFrame { frame, timestamp }
            }
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };

        fields.finish()?;
        Ok(resp)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hi => f.write_str("< hi >"),
            Self::Ok => f.write_str("< ok >"),
            Self::Echo => f.write_str("< echo >"),
            Self::Error(text) => write!(f, "< error {} >", text),
            Self::Frame { frame, timestamp } => {
                let mut fields = vec![
                    "frame".to_string(),
                    id_to_wire(&frame.id()),
                    fmt_timestamp(timestamp),
                ];
                if !frame.data().is_empty() {
                    fields.push(hex::encode_upper(frame.data()));
                }
                write_fields(f, &fields)
            }
            Self::FdFrame { frame, timestamp } => {
                let mut fields = vec![
                    "fdframe".to_string(),
                    id_to_wire(&frame.id()),
                    fmt_timestamp(timestamp),
                    format!("{:X}", frame.flags().bits()),
                ];
                if !frame.data().is_empty() {
                    fields.push(hex::encode_upper(frame.data()));
                }
                write_fields(f, &fields)
            }
            Self::ErrorFrame { frame, timestamp } => write!(
                f,
                "< error {:X} {} >",
                frame.error_bits(),
                fmt_timestamp(timestamp)
            ),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Decoder

/// Splits a TCP byte stream into protocol messages.
///
/// Bytes are pushed in as they arrive; complete messages come out in
/// order. Anything outside of a `< ... >` pair is discarded.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Takes the next complete message out of the buffer, if there is one.
    pub fn next_message(&mut self) -> Option<Result<String, ParseError>> {
        match self.buf.iter().position(|&b| b == b'<') {
            Some(start) => {
                self.buf.drain(..start);
            }
            None => {
                self.buf.clear();
                return None;
            }
        }

        match self.buf.iter().position(|&b| b == b'>') {
            Some(end) if end >= MAX_MESSAGE_LEN => {
                self.buf.drain(..=end);
                Some(Err(ParseError::TooLong))
            }
            Some(end) => {
                let raw: Vec<u8> = self.buf.drain(..=end).collect();
                Some(String::from_utf8(raw).map_err(|_| ParseError::NotUtf8))
            }
            None if self.buf.len() > MAX_MESSAGE_LEN => {
                self.buf.clear();
                Some(Err(ParseError::TooLong))
            }
            None => None,
        }
    }

    /// Takes the next complete message and parses it.
    pub fn decode<T>(&mut self) -> Option<Result<T, ParseError>>
    where
        T: FromStr<Err = ParseError>,
    {
        self.next_message().map(|msg| msg.and_then(|s| s.parse()))
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CanAnyFrame;
    use embedded_can::{ExtendedId, StandardId};

    fn std_id(id: u16) -> Id {
        Id::Standard(StandardId::new(id).unwrap())
    }

    fn ext_id(id: u32) -> Id {
        Id::Extended(ExtendedId::new(id).unwrap())
    }

    fn data_frame(id: Id, data: &[u8]) -> CanFrame {
        CanFrame::Data(CanDataFrame::new(id, data).unwrap())
    }

    #[test]
    fn parse_open() {
        let cmd = Command::parse("< open vcan5 >").unwrap();
        assert_eq!(cmd, Command::Open("vcan5".into()));
    }

    #[test]
    fn parse_add() {
        let cmd = Command::parse("< add 1 0 123 8 11 22 33 44 55 66 77 88 >").unwrap();
        assert_eq!(
            cmd,
            Command::Add {
                interval: Duration::from_secs(1),
                frame: data_frame(
                    std_id(0x123),
                    &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
                ),
            }
        );

        let cmd = Command::parse("< add 0 250000 123 2 1 2 >").unwrap();
        assert!(matches!(cmd, Command::Add { interval, .. } if interval == Duration::from_millis(250)));
    }

    #[test]
    fn parse_update() {
        let cmd = Command::parse("< update 123 3 11 22 33 >").unwrap();
        assert_eq!(
            cmd,
            Command::Update {
                frame: data_frame(std_id(0x123), &[0x11, 0x22, 0x33]),
            }
        );
    }

    #[test]
    fn parse_delete() {
        let cmd = Command::parse("< delete 123 >").unwrap();
        assert_eq!(cmd, Command::Delete { id: std_id(0x123) });
    }

    #[test]
    fn parse_send_no_data() {
        let cmd = Command::parse("< send 123 0 >").unwrap();
        assert_eq!(cmd, Command::Send(data_frame(std_id(0x123), &[])));
    }

    #[test]
    fn parse_send_with_data() {
        let cmd = Command::parse("< send 1AAAAAAA 2 1 f1 >").unwrap();
        assert_eq!(cmd, Command::Send(data_frame(ext_id(0x1AAAAAAA), &[0x01, 0xF1])));
    }

    #[test]
    fn parse_send_remote() {
        let cmd = Command::parse("< send 123 4 >").unwrap();
        match cmd {
            Command::Send(CanFrame::Remote(frame)) => assert_eq!(frame.dlc(), 4),
            _ => panic!("expected a remote frame, got {:?}", cmd),
        }
    }

    #[test]
    fn parse_send_errors() {
        assert!(matches!(
            Command::parse("< send 1234 0 >"),
            Err(ParseError::InvalidId(_))
        ));
        assert!(matches!(
            Command::parse("< send 123 2 1 >"),
            Err(ParseError::DlcMismatch { dlc: 2, len: 1 })
        ));
        assert!(matches!(
            Command::parse("< send 123 9 1 2 3 4 5 6 7 8 9 >"),
            Err(ParseError::Construction(ConstructionError::TooMuchData))
        ));
        assert!(matches!(
            Command::parse("< send 123 1 zz >"),
            Err(ParseError::InvalidData)
        ));
        assert!(matches!(
            Command::parse("< send 123 >"),
            Err(ParseError::UnexpectedEnd)
        ));
        assert!(matches!(
            Command::parse("send 123 0"),
            Err(ParseError::NotDelimited)
        ));
    }

    #[test]
    fn parse_fdsend() {
        let cmd = Command::parse("< fdsend 00C0FFEE 1 4 00 01 02 03 >").unwrap();
        match cmd {
            Command::FdSend(frame) => {
                assert_eq!(frame.id(), ext_id(0xC0FFEE));
                assert!(frame.is_brs());
                assert_eq!(frame.data(), &[0, 1, 2, 3]);
            }
            _ => panic!("expected fdsend, got {:?}", cmd),
        }

        let data = (0..64).map(|b| format!("{:02X}", b)).join(" ");
        let cmd = Command::parse(&format!("< fdsend 123 0 64 {} >", data)).unwrap();
        assert!(matches!(cmd, Command::FdSend(frame) if frame.len() == 64));

        let data = (0..65).map(|b| format!("{:02X}", b)).join(" ");
        assert!(Command::parse(&format!("< fdsend 123 0 65 {} >", data)).is_err());
    }

    #[test]
    fn parse_filter() {
        let cmd = Command::parse("< filter 0 0 123 1 FF >").unwrap();
        assert_eq!(
            cmd,
            Command::Filter {
                interval: Duration::ZERO,
                id: std_id(0x123),
                dlc: 1,
                data: vec![0xFF],
            }
        );
    }

    #[test]
    fn parse_subscriptions() {
        let cmd = Command::parse("< subscribe 0 100000 00000123 >").unwrap();
        assert_eq!(
            cmd,
            Command::Subscribe {
                interval: Duration::from_millis(100),
                id: ext_id(0x123),
            }
        );
        let cmd = Command::parse("< unsubscribe 123 >").unwrap();
        assert_eq!(cmd, Command::Unsubscribe { id: std_id(0x123) });
    }

    #[test]
    fn parse_modes() {
        assert_eq!(Command::parse("< echo >").unwrap(), Command::Echo);
        assert_eq!(Command::parse("< rawmode >").unwrap(), Command::RawMode);
        assert_eq!(Command::parse("< bcmode >").unwrap(), Command::BroadcastMode);
        assert_eq!(Command::parse("< controlmode >").unwrap(), Command::ControlMode);
        assert_eq!(Command::parse("< isotpmode >").unwrap(), Command::IsoTpMode);
        assert!(matches!(
            Command::parse("< rawmode now >"),
            Err(ParseError::TrailingField(_))
        ));
        assert!(matches!(
            Command::parse("< dance >"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn parse_statistics() {
        let cmd = Command::parse("< statistics 1000 >").unwrap();
        assert_eq!(
            cmd,
            Command::Statistics {
                interval: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn format_commands() {
        let frame = CanFdFrame::new(ext_id(0xC0FFEE), &[0, 1, 2, 3]).unwrap();
        assert_eq!(
            Command::FdSend(frame).to_string(),
            "< fdsend 00C0FFEE 0 4 00 01 02 03 >"
        );

        let cmd = Command::Send(data_frame(std_id(0x12), &[0xAB]));
        assert_eq!(cmd.to_string(), "< send 012 1 AB >");

        let cmd = Command::Send(data_frame(std_id(0x12), &[]));
        assert_eq!(cmd.to_string(), "< send 012 0 >");

        let cmd = Command::Add {
            interval: Duration::from_micros(1_500_000),
            frame: data_frame(std_id(0x123), &[1, 2]),
        };
        assert_eq!(cmd.to_string(), "< add 1 500000 123 2 01 02 >");

        assert_eq!(Command::Open("can0".into()).to_string(), "< open can0 >");
        assert_eq!(Command::BroadcastMode.to_string(), "< bcmode >");
        assert_eq!(
            Command::Statistics {
                interval: Duration::from_millis(250)
            }
            .to_string(),
            "< statistics 250 >"
        );
    }

    #[test]
    fn commands_reparse() {
        let cmds = [
            Command::Open("vcan0".into()),
            Command::Delete { id: ext_id(0x1234) },
            Command::Send(CanFrame::Remote(
                CanRemoteFrame::new_remote(std_id(0x7FF), 8).unwrap(),
            )),
            Command::Filter {
                interval: Duration::from_millis(10),
                id: std_id(0x100),
                dlc: 2,
                data: vec![0xFF, 0x00],
            },
        ];
        for cmd in cmds {
            assert_eq!(Command::parse(&cmd.to_string()).unwrap(), cmd);
        }
    }

    #[test]
    fn parse_responses() {
        assert_eq!(Response::parse("< hi >").unwrap(), Response::Hi);
        assert_eq!(Response::parse("< ok >").unwrap(), Response::Ok);
        assert_eq!(Response::parse("< echo >").unwrap(), Response::Echo);
        assert_eq!(
            Response::parse("< error could not open bus >").unwrap(),
            Response::Error("could not open bus".into())
        );
    }

    #[test]
    fn parse_frame_response() {
        let resp = Response::parse("< frame 123 1680613437.452532 0011223344 >").unwrap();
        match resp {
            Response::Frame { frame, timestamp } => {
                assert_eq!(frame.id(), std_id(0x123));
                assert_eq!(frame.data(), &[0x00, 0x11, 0x22, 0x33, 0x44]);
                assert_eq!(timestamp, Duration::new(1680613437, 452_532_000));
            }
            _ => panic!("expected a frame, got {:?}", resp),
        }

        // socketcand leaves two spaces when there is no data
        let resp = Response::parse("< frame 00C0FFEE 23.000001  >").unwrap();
        match resp {
            Response::Frame { frame, timestamp } => {
                assert_eq!(frame.id(), ext_id(0xC0FFEE));
                assert!(frame.data().is_empty());
                assert_eq!(timestamp, Duration::new(23, 1_000));
            }
            _ => panic!("expected a frame, got {:?}", resp),
        }

        assert!(matches!(
            Response::parse("< frame 123 1.5 001122334455667788 >"),
            Err(ParseError::Construction(ConstructionError::TooMuchData))
        ));
        assert!(matches!(
            Response::parse("< frame 123 now 00 >"),
            Err(ParseError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            Response::parse("< frame 123 1.0 0 >"),
            Err(ParseError::InvalidData)
        ));
    }

    #[test]
    fn parse_fdframe_response() {
        let resp = Response::parse("< fdframe 00C0FFEE 1.000000 3 00010203 >").unwrap();
        match resp {
            Response::FdFrame { frame, .. } => {
                assert_eq!(frame.id(), ext_id(0xC0FFEE));
                assert!(frame.is_brs());
                assert!(frame.is_esi());
                assert_eq!(frame.data(), &[0, 1, 2, 3]);
            }
            _ => panic!("expected an FD frame, got {:?}", resp),
        }
    }

    #[test]
    fn parse_error_frame_response() {
        let resp = Response::parse("< error 40 12.000500 >").unwrap();
        match resp {
            Response::ErrorFrame { frame, timestamp } => {
                assert_eq!(frame.error_bits(), 0x40);
                assert!(matches!(frame.into_error(), crate::CanError::BusOff));
                assert_eq!(timestamp, Duration::new(12, 500_000));
            }
            _ => panic!("expected an error frame, got {:?}", resp),
        }
    }

    #[test]
    fn format_responses() {
        let frame = CanDataFrame::new(std_id(0x123), &[0xDE, 0xAD]).unwrap();
        let resp = Response::Frame {
            frame,
            timestamp: Duration::new(5, 42_000),
        };
        assert_eq!(resp.to_string(), "< frame 123 5.000042 DEAD >");
        assert_eq!(Response::parse(&resp.to_string()).unwrap(), resp);

        let frame = CanDataFrame::new(std_id(0x123), &[]).unwrap();
        let resp = Response::Frame {
            frame,
            timestamp: Duration::new(5, 0),
        };
        assert_eq!(resp.to_string(), "< frame 123 5.000000 >");

        let frame = CanFdFrame::with_flags(ext_id(0xC0FFEE), &[0, 1, 2, 3], FdFlags::BRS).unwrap();
        let resp = Response::FdFrame {
            frame,
            timestamp: Duration::new(1, 0),
        };
        assert_eq!(resp.to_string(), "< fdframe 00C0FFEE 1.000000 1 00010203 >");
        assert_eq!(Response::parse(&resp.to_string()).unwrap(), resp);

        let resp = Response::ErrorFrame {
            frame: CanErrorFrame::new_error(0x20, &[]).unwrap(),
            timestamp: Duration::new(3, 0),
        };
        assert_eq!(resp.to_string(), "< error 20 3.000000 >");
        assert_eq!(Response::parse(&resp.to_string()).unwrap(), resp);
    }

    #[test]
    fn response_into_message() {
        let resp = Response::parse("< frame 123 10.000000 01 >").unwrap();
        let msg = resp.into_message("can0").unwrap();
        assert!(msg.is_rx);
        assert_eq!(msg.channel.as_deref(), Some("can0"));
        assert_eq!(msg.timestamp, Some(Duration::from_secs(10)));
        assert!(matches!(msg.frame, CanAnyFrame::Normal(_)));

        assert!(Response::Ok.into_message("can0").is_none());
    }

    #[test]
    fn response_from_message() {
        let frame = CanFdFrame::new(ext_id(0xC0FFEE), &[0, 1, 2, 3]).unwrap();
        let msg = Message::new(frame);
        let resp = Response::from_message(&msg, Duration::from_secs(7));
        assert_eq!(resp.to_string(), "< fdframe 00C0FFEE 7.000000 0 00010203 >");
    }

    #[test]
    fn decoder_split_reads() {
        let mut dec = Decoder::new();

        dec.extend(b"< h");
        assert!(dec.next_message().is_none());

        dec.extend(b"i >< ok ><");
        assert_eq!(dec.next_message().unwrap().unwrap(), "< hi >");
        assert_eq!(dec.decode::<Response>().unwrap().unwrap(), Response::Ok);
        assert!(dec.next_message().is_none());
        assert_eq!(dec.pending(), 1);

        dec.extend(b" frame 123 1.000000 AA >");
        let resp = dec.decode::<Response>().unwrap().unwrap();
        assert!(matches!(resp, Response::Frame { .. }));
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn decoder_discards_garbage() {
        let mut dec = Decoder::new();
        dec.extend(b"\r\nnoise< echo >\n");
        assert_eq!(dec.next_message().unwrap().unwrap(), "< echo >");
        assert!(dec.next_message().is_none());
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn decoder_too_long() {
        let mut dec = Decoder::new();
        dec.extend(b"< frame ");
        dec.extend(&[b'A'; MAX_MESSAGE_LEN]);
        assert_eq!(dec.next_message(), Some(Err(ParseError::TooLong)));
        assert_eq!(dec.pending(), 0);

        dec.extend(b"< ok >");
        assert_eq!(dec.decode::<Response>().unwrap().unwrap(), Response::Ok);
    }

    #[test]
    fn decoder_too_long_complete() {
        let mut dec = Decoder::new();
        let mut long = b"< error ".to_vec();
        long.extend_from_slice(&[b'a'; 600]);
        long.extend_from_slice(b" >< echo >");
        dec.extend(&long);

        assert_eq!(dec.next_message(), Some(Err(ParseError::TooLong)));
        assert_eq!(dec.next_message().unwrap().unwrap(), "< echo >");

        // a message right at the limit still gets through
        let mut dec = Decoder::new();
        let mut max = b"< error ".to_vec();
        max.resize(MAX_MESSAGE_LEN - 2, b'b');
        max.extend_from_slice(b" >");
        assert_eq!(max.len(), MAX_MESSAGE_LEN);
        dec.extend(&max);
        assert_eq!(dec.next_message().unwrap().unwrap().len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn parse_fd_flags_out_of_range() {
        assert_eq!(
            Command::parse("< fdsend 00C0FFEE 100 4 00 01 02 03 >"),
            Err(ParseError::InvalidNumber("100".into()))
        );
        assert_eq!(
            Response::parse("< fdframe 00C0FFEE 1.000000 1FF 00010203 >"),
            Err(ParseError::InvalidNumber("1FF".into()))
        );
    }
}
