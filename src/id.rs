// socketcand/src/id.rs
//
// Implements CANbus Identifiers.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Implementation of CANbus standard and extended identifiers.
//!
//! The socketcand daemon transmits identifiers as bare hexadecimal words.
//! The number of digits carries the frame format: three digits for a
//! standard 11-bit ID and eight digits for an extended 29-bit ID.

use crate::ConstructionError;
use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};

/// Composite ID word, as used by SocketCAN on the far side of the bridge.
#[allow(non_camel_case_types)]
pub type canid_t = u32;

/// Indicates a 29-bit extended ID in the composite ID word
pub const CAN_EFF_FLAG: canid_t = 0x8000_0000;
/// Indicates a remote request in the composite ID word
pub const CAN_RTR_FLAG: canid_t = 0x4000_0000;
/// Indicates an error frame in the composite ID word
pub const CAN_ERR_FLAG: canid_t = 0x2000_0000;

/// Valid bits of a standard frame ID
pub const CAN_SFF_MASK: canid_t = 0x0000_07FF;
/// Valid bits of an extended frame ID
pub const CAN_EFF_MASK: canid_t = 0x1FFF_FFFF;
/// Valid bits of the error class in an error frame
pub const CAN_ERR_MASK: canid_t = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN 2.0 frame
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum payload of a CAN FD frame
pub const CANFD_MAX_DLEN: usize = 64;

/// FD flag: bit rate switch
pub const CANFD_BRS: u8 = 0x01;
/// FD flag: error state indicator
pub const CANFD_ESI: u8 = 0x02;

/// Number of hex digits socketcand uses for a standard ID
pub const WIRE_SFF_DIGITS: usize = 3;
/// Number of hex digits socketcand uses for an extended ID
pub const WIRE_EFF_DIGITS: usize = 8;

bitflags! {
    /// Bit flags in the composite ID word.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct IdFlags: canid_t {
        /// Indicates frame uses a 29-bit extended ID
        const EFF = CAN_EFF_FLAG;
        /// Indicates a remote request frame.
        const RTR = CAN_RTR_FLAG;
        /// Indicates an error frame.
        const ERR = CAN_ERR_FLAG;
    }

    /// Bit flags for the Flexible Data (FD) frames.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
    pub struct FdFlags: u8 {
        /// Bit rate switch (second bit rate for payload data)
        const BRS = CANFD_BRS;
        /// Error state indicator of the transmitting node
        const ESI = CANFD_ESI;
    }
}

/// Gets the canid_t value from an Id
/// If it's an extended ID, the CAN_EFF_FLAG bit is also set.
pub fn id_to_canid_t(id: impl Into<Id>) -> canid_t {
    use Id::*;
    match id.into() {
        Standard(id) => id.as_raw() as canid_t,
        Extended(id) => id.as_raw() | CAN_EFF_FLAG,
    }
}

/// Determines if the ID is a standard, 11-bit, ID.
#[inline]
pub fn id_is_standard(id: &Id) -> bool {
    matches!(id, Id::Standard(_))
}

/// Determines if the ID is an extended, 29-bit, ID.
#[inline]
pub fn id_is_extended(id: &Id) -> bool {
    matches!(id, Id::Extended(_))
}

/// Gets the raw numeric value of an ID, without any flags.
#[inline]
pub fn id_raw(id: &Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an Extened ID. If you require an Extended ID <= 0x7FF,
/// create it explicitly.
pub fn id_from_raw(id: u32) -> Option<Id> {
    let id = match id {
        n if n <= CAN_SFF_MASK => StandardId::new(n as u16)?.into(),
        n => ExtendedId::new(n)?.into(),
    };
    Some(id)
}

/// Formats an ID the way socketcand puts it on the wire.
///
/// Standard IDs are written with three upper-case hex digits, extended IDs
/// with eight.
pub fn id_to_wire(id: &Id) -> String {
    match id {
        Id::Standard(id) => format!("{:03X}", id.as_raw()),
        Id::Extended(id) => format!("{:08X}", id.as_raw()),
    }
}

/// Parses an ID from its socketcand wire representation.
///
/// Eight digits select an extended ID. One to three digits select a
/// standard ID. Any other length is rejected, as are values out of range
/// for the selected format.
pub fn id_from_wire(s: &str) -> Option<Id> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let raw = u32::from_str_radix(s, 16).ok()?;
    match s.len() {
        WIRE_EFF_DIGITS => ExtendedId::new(raw).map(Id::from),
        1..=WIRE_SFF_DIGITS => StandardId::new(u16::try_from(raw).ok()?).map(Id::from),
        _ => None,
    }
}

/////////////////////////////////////////////////////////////////////////////
/// A CAN identifier that can be standard or extended.
///
/// This is similar to and generally interchangeable with
/// [embedded_can::Id](https://docs.rs/embedded-can/latest/embedded_can/enum.Id.html)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CanId {
    /// Standard 11-bit Identifier (`0..=0x7FF`).
    Standard(StandardId),
    /// Extended 29-bit Identifier (`0..=0x1FFF_FFFF`).
    Extended(ExtendedId),
}

impl CanId {
    /// Creates a standard, 11-bit, ID
    pub fn standard(id: u16) -> Option<Self> {
        let id = StandardId::new(id)?;
        Some(Self::Standard(id))
    }

    /// Creates an extended, 29-bit, ID
    pub fn extended(id: u32) -> Option<Self> {
        let id = ExtendedId::new(id)?;
        Some(Self::Extended(id))
    }

    /// Gets the embedded_can::Id representation of the value.
    pub fn as_id(&self) -> Id {
        use CanId::*;
        match self {
            Standard(id) => Id::Standard(*id),
            Extended(id) => Id::Extended(*id),
        }
    }

    /// Gets the raw numeric value of the ID
    pub fn as_raw(&self) -> u32 {
        id_raw(&self.as_id())
    }

    /// Determines if the ID is a standard, 11-bit, ID.
    #[inline]
    pub fn is_standard(&self) -> bool {
        matches!(self, CanId::Standard(_))
    }

    /// Determines if the ID is an extended, 29-bit, ID.
    #[inline]
    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

/// Implement `Ord` according to the CAN arbitration rules
///
/// This defers to the `Ord` implementation in the embedded_can crate.
impl Ord for CanId {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.as_id().cmp(&other.as_id())
    }
}

impl PartialOrd for CanId {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<StandardId> for CanId {
    #[inline]
    fn from(id: StandardId) -> Self {
        Self::Standard(id)
    }
}

impl From<ExtendedId> for CanId {
    #[inline]
    fn from(id: ExtendedId) -> Self {
        Self::Extended(id)
    }
}

impl From<Id> for CanId {
    fn from(id: Id) -> Self {
        use Id::*;
        match id {
            Standard(id) => Self::Standard(id),
            Extended(id) => Self::Extended(id),
        }
    }
}

impl From<CanId> for Id {
    #[inline]
    fn from(id: CanId) -> Self {
        id.as_id()
    }
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an Extened ID.
impl TryFrom<u32> for CanId {
    type Error = ConstructionError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        id_from_raw(id)
            .map(CanId::from)
            .ok_or(ConstructionError::IDTooLarge)
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    // A standard ID
    const ID: u32 = 0x100;

    #[test]
    fn test_id_conv() {
        let sid = StandardId::MAX;
        let id = CanId::from(sid);

        assert!(id.is_standard());
        assert_eq!(id.as_raw(), sid.as_raw() as u32);

        let eid = ExtendedId::MAX;
        let id = CanId::from(eid);

        assert!(id.is_extended());
        assert_eq!(id.as_raw(), eid.as_raw());

        let id = CanId::from(Id::from(eid));
        assert_eq!(Id::from(id), Id::Extended(eid));
    }

    #[test]
    fn test_id_raw() {
        let id = CanId::try_from(ID).unwrap();
        assert!(matches!(id, CanId::Standard(_)));
        assert_eq!(id.as_raw(), ID);

        let id = CanId::try_from(0xC0FFEE).unwrap();
        assert!(id.is_extended());

        assert_eq!(
            CanId::try_from(0x2000_0000),
            Err(ConstructionError::IDTooLarge)
        );
    }

    #[test]
    fn test_canid_word() {
        let id = ExtendedId::new(0xC0FFEE).unwrap();
        assert_eq!(id_to_canid_t(id), 0xC0FFEE | CAN_EFF_FLAG);

        let id = StandardId::new(0x123).unwrap();
        assert_eq!(id_to_canid_t(id), 0x123);
    }

    #[test]
    fn test_wire_format() {
        let id = Id::Standard(StandardId::new(0x12).unwrap());
        assert_eq!(id_to_wire(&id), "012");

        let id = Id::Extended(ExtendedId::new(0xC0FFEE).unwrap());
        assert_eq!(id_to_wire(&id), "00C0FFEE");

        // Extended IDs keep their format even in the standard range
        let id = Id::Extended(ExtendedId::new(0x12).unwrap());
        assert_eq!(id_to_wire(&id), "00000012");
    }

    #[test]
    fn test_wire_parse() {
        assert_eq!(
            id_from_wire("123"),
            Some(Id::Standard(StandardId::new(0x123).unwrap()))
        );
        assert_eq!(
            id_from_wire("1AAAAAAA"),
            Some(Id::Extended(ExtendedId::new(0x1AAAAAAA).unwrap()))
        );
        assert_eq!(
            id_from_wire("00c0ffee"),
            Some(Id::Extended(ExtendedId::new(0xC0FFEE).unwrap()))
        );

        // Wrong digit count
        assert_eq!(id_from_wire("1234"), None);
        assert_eq!(id_from_wire(""), None);
        // Out of range for the format
        assert_eq!(id_from_wire("FFF"), None);
        assert_eq!(id_from_wire("FFFFFFFF"), None);
        // Not hex
        assert_eq!(id_from_wire("12G"), None);
        assert_eq!(id_from_wire("+12"), None);
    }
}
