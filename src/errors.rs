// socketcand/src/errors.rs
//
// Implements errors for the Rust socketcand library.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Library and CAN bus errors.
//!
//! Bus errors reach a socketcand client as error messages carrying the
//! error class of the kernel error frame, e.g. `< error 20 1680613437.452532 >`.
//! The class bits are decoded into a [`CanError`]:
//!
//! ```text
//! Transmit Timeout   (0x001)
//! Lost Arbitration   (0x002) => data[0]
//! Controller Problem (0x004) => data[1]
//! Protocol Violation (0x008) => data[2..3]
//! Transceiver Status (0x010)
//! No Ack             (0x020)
//! Bus Off            (0x040)
//! Bus Error          (0x080)
//! Restarted          (0x100)
//! ```
//!
//! The bridge does not forward the detail bytes, so those fields read
//! as zero.

use crate::{addr::AddrParseError, wire::ParseError, CanErrorFrame, Frame};
use std::io;
use thiserror::Error;

// ===== Error =====

/// The main library error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on the TCP connection
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Malformed message from the peer
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A frame could not be created
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    /// Malformed bus address
    #[error(transparent)]
    Addr(#[from] AddrParseError),
    /// The peer did not follow the connection handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),
    /// The peer reported an error
    #[error("Bridge error: {0}")]
    Remote(String),
    /// The peer closed the connection
    #[error("Connection closed by peer")]
    Closed,
}

/// A result that can derive from any of the library errors.
pub type Result<T> = std::result::Result<T, Error>;

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        embedded_can::ErrorKind::Other
    }
}

// ===== ConstructionError =====

/// Error that occurs when creating CAN packets
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// Trying to create a specific frame type from an incompatible type
    #[error("Incompatible frame type")]
    WrongFrameType,
    /// CAN ID was outside the range of valid IDs
    #[error("CAN ID too large")]
    IDTooLarge,
    /// Larger payload reported than can be held in the frame.
    #[error("Payload is too large")]
    TooMuchData,
}

// ===== CanErrorDecodingFailure =====

/// Error decoding a CanError from an error frame.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CanErrorDecodingFailure {
    /// The supplied frame did not have the error bit set.
    #[error("CAN frame is not an error")]
    NotAnError,
    /// The error type is not known and cannot be decoded.
    #[error("unknown error type: {0:#X}")]
    UnknownErrorType(u32),
    /// The error type indicated a need for additional information as `data`,
    /// but the `data` field was not long enough.
    #[error("not enough data")]
    NotEnoughData(u8),
}

/// Retrieves a specific byte of frame data.
#[inline]
fn get_data(frame: &impl Frame, idx: u8) -> std::result::Result<u8, CanErrorDecodingFailure> {
    frame
        .data()
        .get(idx as usize)
        .copied()
        .ok_or(CanErrorDecodingFailure::NotEnoughData(idx))
}

// ===== CanError ====

/// The CAN bus error derived from an error frame.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CanError {
    /// TX timeout (by netdevice driver)
    #[error("transmission timeout")]
    TransmitTimeout,
    /// Arbitration was lost.
    /// Contains the bit number after which arbitration was lost or 0 if unspecified.
    #[error("arbitration lost after {0} bits")]
    LostArbitration(u8),
    /// Controller problem, with the raw status byte
    #[error("controller problem: {0:#04X}")]
    ControllerProblem(u8),
    /// Protocol violation, with the raw type and location bytes
    #[error("protocol violation at {location:#04X}: {vtype:#04X}")]
    ProtocolViolation {
        /// The type of protocol violation
        vtype: u8,
        /// The location (field or bit) of the violation
        location: u8,
    },
    /// Transceiver Error.
    #[error("transceiver error")]
    TransceiverError,
    /// No ACK received for current CAN frame.
    #[error("no ack")]
    NoAck,
    /// Bus off (due to too many detected errors)
    #[error("bus off")]
    BusOff,
    /// Bus error (due to too many detected errors)
    #[error("bus error")]
    BusError,
    /// The bus has been restarted
    #[error("restarted")]
    Restarted,
    /// Unknown, possibly invalid, error
    #[error("unknown error ({0:#X})")]
    Unknown(u32),
}

impl CanError {
    /// Constructs a CAN error from an error frame.
    pub fn from_frame(frame: &CanErrorFrame) -> std::result::Result<Self, CanErrorDecodingFailure> {
        if !frame.is_error_frame() {
            return Err(CanErrorDecodingFailure::NotAnError);
        }

        match frame.error_bits() {
            0x0000_0001 => Ok(CanError::TransmitTimeout),
            0x0000_0002 => Ok(CanError::LostArbitration(get_data(frame, 0)?)),
            0x0000_0004 => Ok(CanError::ControllerProblem(get_data(frame, 1)?)),
            0x0000_0008 => Ok(CanError::ProtocolViolation {
                vtype: get_data(frame, 2)?,
                location: get_data(frame, 3)?,
            }),
            0x0000_0010 => Ok(CanError::TransceiverError),
            0x0000_0020 => Ok(CanError::NoAck),
            0x0000_0040 => Ok(CanError::BusOff),
            0x0000_0080 => Ok(CanError::BusError),
            0x0000_0100 => Ok(CanError::Restarted),
            e => Err(CanErrorDecodingFailure::UnknownErrorType(e)),
        }
    }

    /// The error class bits, as found in the ID word of an error frame.
    pub fn class_bits(&self) -> u32 {
        use CanError::*;
        match *self {
            TransmitTimeout => 0x0001,
            LostArbitration(_) => 0x0002,
            ControllerProblem(_) => 0x0004,
            ProtocolViolation { .. } => 0x0008,
            TransceiverError => 0x0010,
            NoAck => 0x0020,
            BusOff => 0x0040,
            BusError => 0x0080,
            Restarted => 0x0100,
            Unknown(e) => e,
        }
    }
}

impl From<CanErrorFrame> for CanError {
    /// Decodes the frame, falling back to `Unknown` with the raw class
    /// bits when they don't name a single known error.
    fn from(frame: CanErrorFrame) -> Self {
        CanError::from_frame(&frame).unwrap_or(CanError::Unknown(frame.error_bits()))
    }
}

impl embedded_can::Error for CanError {
    fn kind(&self) -> embedded_can::ErrorKind {
        match *self {
            CanError::NoAck => embedded_can::ErrorKind::Acknowledge,
            _ => embedded_can::ErrorKind::Other,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_class() {
        let frame = CanErrorFrame::new_error(0x0040, &[]).unwrap();
        assert_eq!(CanError::from_frame(&frame), Ok(CanError::BusOff));

        let frame = CanErrorFrame::new_error(0x0002, &[]).unwrap();
        assert_eq!(CanError::from(frame), CanError::LostArbitration(0));

        let frame = CanErrorFrame::new_error(0x0008, &[0, 0, 0x04, 0x03]).unwrap();
        assert_eq!(
            CanError::from(frame),
            CanError::ProtocolViolation {
                vtype: 0x04,
                location: 0x03
            }
        );
    }

    #[test]
    fn test_unknown_class() {
        // Two classes at once don't decode to a single error
        let frame = CanErrorFrame::new_error(0x0060, &[]).unwrap();
        assert_eq!(
            CanError::from_frame(&frame),
            Err(CanErrorDecodingFailure::UnknownErrorType(0x0060))
        );
        assert_eq!(CanError::from(frame), CanError::Unknown(0x0060));
    }

    #[test]
    fn test_class_bits_round_trip() {
        for err in [
            CanError::TransmitTimeout,
            CanError::TransceiverError,
            CanError::NoAck,
            CanError::BusOff,
            CanError::BusError,
            CanError::Restarted,
        ] {
            let frame = CanErrorFrame::from(err);
            assert_eq!(CanError::from(frame), err);
        }
    }

    #[test]
    fn test_error_display() {
        let err = Error::Handshake("expected < hi >".into());
        assert_eq!(err.to_string(), "Handshake failed: expected < hi >");

        let err = Error::from(ConstructionError::TooMuchData);
        assert_eq!(err.to_string(), "Payload is too large");
    }
}
