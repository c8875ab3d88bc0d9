// socketcand/src/frame.rs
//
// Implements frames for CANbus 2.0 and FD as carried by socketcand.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus frames.
//!
//! The frames mirror the layout SocketCAN uses on the far side of the
//! bridge: a composite 32-bit ID word carrying the EFF/RTR/ERR flags, a
//! length, and a fixed-size data buffer.
//!
//! The classic frame represents three possibilities:
//! - `CanDataFrame` - A standard CAN frame that can contain up to 8 bytes
//!   of data.
//! - `CanRemoteFrame` - A CAN Remote frame which is meant to request a
//!   transmission by another node on the bus. It contain no data.
//! - `CanErrorFrame` - This is an incoming (only) frame that contains
//!   information about a problem on the bus or in the driver, as reported
//!   by the bridge.
//!
//! The `CanFdFrame` carries up to 64 bytes of data.

use crate::{
    id::{
        canid_t, id_from_wire, id_to_canid_t, FdFlags, IdFlags, CANFD_BRS, CANFD_ESI, CANFD_MAX_DLEN,
        CAN_EFF_MASK, CAN_ERR_FLAG, CAN_ERR_MASK, CAN_MAX_DLEN, CAN_RTR_FLAG, CAN_SFF_MASK,
    },
    wire::ParseError,
    CanError, ConstructionError,
};
use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use hex::FromHex;
use itertools::Itertools;
use std::{fmt, str::FromStr};

/// Valid CAN FD payload lengths above the classic maximum.
const FD_EXT_DLENS: [usize; 7] = [12, 16, 20, 24, 32, 48, 64];

// ===== Frame trait =====

/// Shared trait for CAN frames
#[allow(clippy::len_without_is_empty)]
pub trait Frame: EmbeddedFrame {
    /// Creates a frame using a raw, integer CAN ID.
    ///
    /// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
    /// it is created as an Extened ID. If you require an Etended ID <= 0x7FF,
    /// use `new()`.
    fn from_raw_id(id: u32, data: &[u8]) -> Option<Self> {
        Self::new(crate::id::id_from_raw(id)?, data)
    }

    /// Get the composite ID word, with EFF/RTR/ERR flags
    fn id_word(&self) -> canid_t;

    /// Return the actual raw CAN ID (without EFF/RTR/ERR flags)
    fn raw_id(&self) -> canid_t {
        let mask = if self.is_extended() {
            CAN_EFF_MASK
        } else {
            CAN_SFF_MASK
        };
        self.id_word() & mask
    }

    /// Returns the EFF/RTR/ERR flags from the ID word
    fn id_flags(&self) -> IdFlags {
        IdFlags::from_bits_truncate(self.id_word())
    }

    /// Return the CAN ID as the embedded HAL Id type.
    fn hal_id(&self) -> Id {
        hal_id_from_word(self.id_word())
    }

    /// Get the data length
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Check if frame is an error message
    fn is_error_frame(&self) -> bool {
        self.id_flags().contains(IdFlags::ERR)
    }

    /// Sets the CAN ID for the frame
    fn set_id(&mut self, id: impl Into<Id>);

    /// Sets the data payload of the frame.
    fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError>;
}

/// Extracts the HAL ID from a composite ID word.
///
/// The masks keep the raw value in range, so the fallbacks are never hit.
fn hal_id_from_word(word: canid_t) -> Id {
    if IdFlags::from_bits_truncate(word).contains(IdFlags::EFF) {
        ExtendedId::new(word & CAN_EFF_MASK)
            .unwrap_or(ExtendedId::ZERO)
            .into()
    } else {
        StandardId::new((word & CAN_SFF_MASK) as u16)
            .unwrap_or(StandardId::ZERO)
            .into()
    }
}

/// Writes the payload as space separated hex bytes.
fn fmt_data(f: &mut fmt::Formatter, data: &[u8]) -> fmt::Result {
    let mut parts = data.iter().map(|v| format!("{:02X}", v));
    write!(f, "{}", parts.join(" "))
}

// ===== CanAnyFrame =====

/// Any frame type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanAnyFrame {
    /// A classic CAN 2.0 frame, with up to 8-bytes of data
    Normal(CanDataFrame),
    /// A CAN Remote Frame
    Remote(CanRemoteFrame),
    /// An error frame
    Error(CanErrorFrame),
    /// A flexible data rate frame, with up to 64-bytes of data
    Fd(CanFdFrame),
}

impl CanAnyFrame {
    /// Whether this is a flexible data rate frame.
    pub fn is_fd(&self) -> bool {
        matches!(self, CanAnyFrame::Fd(_))
    }
}

impl EmbeddedFrame for CanAnyFrame {
    /// Creates a data frame, picking the FD format when the payload does
    /// not fit in a classic frame.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() <= CAN_MAX_DLEN {
            CanDataFrame::new(id, data).map(CanAnyFrame::Normal)
        } else {
            CanFdFrame::new(id, data).map(CanAnyFrame::Fd)
        }
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        CanRemoteFrame::new_remote(id, dlc).map(CanAnyFrame::Remote)
    }

    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    fn is_remote_frame(&self) -> bool {
        matches!(self, CanAnyFrame::Remote(_))
    }

    fn id(&self) -> Id {
        self.hal_id()
    }

    fn dlc(&self) -> usize {
        use CanAnyFrame::*;
        match self {
            Normal(frame) => frame.dlc(),
            Remote(frame) => frame.dlc(),
            Error(frame) => frame.dlc(),
            Fd(frame) => frame.dlc(),
        }
    }

    fn data(&self) -> &[u8] {
        use CanAnyFrame::*;
        match self {
            Normal(frame) => frame.data(),
            Remote(frame) => frame.data(),
            Error(frame) => frame.data(),
            Fd(frame) => frame.data(),
        }
    }
}

impl Frame for CanAnyFrame {
    fn id_word(&self) -> canid_t {
        use CanAnyFrame::*;
        match self {
            Normal(frame) => frame.id_word(),
            Remote(frame) => frame.id_word(),
            Error(frame) => frame.id_word(),
            Fd(frame) => frame.id_word(),
        }
    }

    fn set_id(&mut self, id: impl Into<Id>) {
        use CanAnyFrame::*;
        match self {
            Normal(frame) => frame.set_id(id),
            Remote(frame) => frame.set_id(id),
            Error(frame) => frame.set_id(id),
            Fd(frame) => frame.set_id(id),
        }
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError> {
        use CanAnyFrame::*;
        match self {
            Normal(frame) => frame.set_data(data),
            Remote(frame) => frame.set_data(data),
            Error(frame) => frame.set_data(data),
            Fd(frame) => frame.set_data(data),
        }
    }
}

impl fmt::UpperHex for CanAnyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(frame) => fmt::UpperHex::fmt(frame, f),
            Self::Remote(frame) => fmt::UpperHex::fmt(frame, f),
            Self::Error(frame) => fmt::UpperHex::fmt(frame, f),
            Self::Fd(frame) => fmt::UpperHex::fmt(frame, f),
        }
    }
}

impl From<CanFrame> for CanAnyFrame {
    fn from(frame: CanFrame) -> Self {
        use CanFrame::*;
        match frame {
            Data(frame) => Self::Normal(frame),
            Remote(frame) => Self::Remote(frame),
            Error(frame) => Self::Error(frame),
        }
    }
}

impl From<CanDataFrame> for CanAnyFrame {
    fn from(frame: CanDataFrame) -> Self {
        Self::Normal(frame)
    }
}

impl From<CanRemoteFrame> for CanAnyFrame {
    fn from(frame: CanRemoteFrame) -> Self {
        Self::Remote(frame)
    }
}

impl From<CanErrorFrame> for CanAnyFrame {
    fn from(frame: CanErrorFrame) -> Self {
        Self::Error(frame)
    }
}

impl From<CanFdFrame> for CanAnyFrame {
    fn from(frame: CanFdFrame) -> Self {
        Self::Fd(frame)
    }
}

// ===== CanFrame =====

/// The classic CAN 2.0 frame with up to 8-bytes of data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanFrame {
    /// A data frame
    Data(CanDataFrame),
    /// A remote frame
    Remote(CanRemoteFrame),
    /// An error frame
    Error(CanErrorFrame),
}

impl EmbeddedFrame for CanFrame {
    /// Create a new CAN 2.0 data frame
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        CanDataFrame::new(id, data).map(CanFrame::Data)
    }

    /// Create a new remote transmission request frame.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        CanRemoteFrame::new_remote(id, dlc).map(CanFrame::Remote)
    }

    /// Check if frame uses 29-bit extended ID format.
    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    /// Check if frame is a remote transmission request.
    fn is_remote_frame(&self) -> bool {
        matches!(self, CanFrame::Remote(_))
    }

    /// Return the frame identifier.
    fn id(&self) -> Id {
        self.hal_id()
    }

    /// Data length
    fn dlc(&self) -> usize {
        use CanFrame::*;
        match self {
            Data(frame) => frame.dlc(),
            Remote(frame) => frame.dlc(),
            Error(frame) => frame.dlc(),
        }
    }

    /// A slice into the actual data. Slice will always be <= 8 bytes in length
    fn data(&self) -> &[u8] {
        use CanFrame::*;
        match self {
            Data(frame) => frame.data(),
            Remote(frame) => frame.data(),
            Error(frame) => frame.data(),
        }
    }
}

impl Frame for CanFrame {
    fn id_word(&self) -> canid_t {
        use CanFrame::*;
        match self {
            Data(frame) => frame.id_word(),
            Remote(frame) => frame.id_word(),
            Error(frame) => frame.id_word(),
        }
    }

    fn set_id(&mut self, id: impl Into<Id>) {
        use CanFrame::*;
        match self {
            Data(frame) => frame.set_id(id),
            Remote(frame) => frame.set_id(id),
            Error(frame) => frame.set_id(id),
        }
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError> {
        use CanFrame::*;
        match self {
            Data(frame) => frame.set_data(data),
            Remote(frame) => frame.set_data(data),
            Error(frame) => frame.set_data(data),
        }
    }
}

impl Default for CanFrame {
    /// The default frame is a default data frame - all fields and data set
    /// to zero, and all flags off.
    fn default() -> Self {
        CanFrame::Data(CanDataFrame::default())
    }
}

impl fmt::UpperHex for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use CanFrame::*;
        match self {
            Data(frame) => fmt::UpperHex::fmt(&frame, f),
            Remote(frame) => fmt::UpperHex::fmt(&frame, f),
            Error(frame) => fmt::UpperHex::fmt(&frame, f),
        }
    }
}

impl From<CanDataFrame> for CanFrame {
    fn from(frame: CanDataFrame) -> Self {
        Self::Data(frame)
    }
}

impl From<CanRemoteFrame> for CanFrame {
    fn from(frame: CanRemoteFrame) -> Self {
        Self::Remote(frame)
    }
}

impl From<CanErrorFrame> for CanFrame {
    fn from(frame: CanErrorFrame) -> Self {
        Self::Error(frame)
    }
}

impl TryFrom<CanAnyFrame> for CanFrame {
    type Error = ConstructionError;

    /// Narrows any frame to a classic one.
    ///
    /// FD frames convert if they carry 8 or fewer data bytes.
    fn try_from(frame: CanAnyFrame) -> Result<Self, ConstructionError> {
        use CanAnyFrame::*;
        match frame {
            Normal(frame) => Ok(CanFrame::Data(frame)),
            Remote(frame) => Ok(CanFrame::Remote(frame)),
            Error(frame) => Ok(CanFrame::Error(frame)),
            Fd(frame) => CanDataFrame::try_from(frame).map(CanFrame::Data),
        }
    }
}

// ===== CanDataFrame =====

/// The classic CAN 2.0 frame with up to 8-bytes of data.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanDataFrame {
    can_id: canid_t,
    len: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanDataFrame {
    /// Initializes a CAN data frame from raw parts.
    pub(crate) fn init(can_id: canid_t, data: &[u8]) -> Result<Self, ConstructionError> {
        match data.len() {
            n if n <= CAN_MAX_DLEN => {
                let mut frame = Self::default();
                frame.can_id = can_id & !(CAN_RTR_FLAG | CAN_ERR_FLAG);
                frame.len = n as u8;
                frame.data[..n].copy_from_slice(data);
                Ok(frame)
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }
}

impl EmbeddedFrame for CanDataFrame {
    /// Create a new CAN 2.0 data frame
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::init(id_to_canid_t(id), data).ok()
    }

    /// Data frames can't be remote frames.
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.hal_id()
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    /// A slice into the actual data. Slice will always be <= 8 bytes in length
    fn data(&self) -> &[u8] {
        &self.data[..(self.len as usize)]
    }
}

impl Frame for CanDataFrame {
    fn id_word(&self) -> canid_t {
        self.can_id
    }

    fn set_id(&mut self, id: impl Into<Id>) {
        self.can_id = id_to_canid_t(id);
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError> {
        match data.len() {
            n if n <= CAN_MAX_DLEN => {
                self.len = n as u8;
                self.data[..n].copy_from_slice(data);
                Ok(())
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }
}

impl Default for CanDataFrame {
    fn default() -> Self {
        Self {
            can_id: 0,
            len: 0,
            data: [0; CAN_MAX_DLEN],
        }
    }
}

impl fmt::Debug for CanDataFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanDataFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanDataFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:X}#", self.raw_id())?;
        fmt_data(f, self.data())
    }
}

impl TryFrom<CanFdFrame> for CanDataFrame {
    type Error = ConstructionError;

    fn try_from(frame: CanFdFrame) -> Result<Self, Self::Error> {
        if frame.len() > CAN_MAX_DLEN {
            return Err(ConstructionError::TooMuchData);
        }
        CanDataFrame::init(frame.id_word(), frame.data())
    }
}

// ===== CanRemoteFrame =====

/// The classic CAN 2.0 remote request frame.
///
/// This is is meant to request a transmission by another node on the bus.
/// It contain no data.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanRemoteFrame {
    can_id: canid_t,
    dlc: u8,
}

impl CanRemoteFrame {
    /// Sets the data length code for the frame
    pub fn set_dlc(&mut self, dlc: usize) -> Result<(), ConstructionError> {
        if dlc <= CAN_MAX_DLEN {
            self.dlc = dlc as u8;
            Ok(())
        } else {
            Err(ConstructionError::TooMuchData)
        }
    }
}

impl EmbeddedFrame for CanRemoteFrame {
    /// Create a new CAN 2.0 remote frame
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::new_remote(id, data.len())
    }

    /// Create a new remote transmission request frame.
    ///
    /// This will set the RTR flag in the CAN ID word.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc <= CAN_MAX_DLEN {
            Some(Self {
                can_id: id_to_canid_t(id) | CAN_RTR_FLAG,
                dlc: dlc as u8,
            })
        } else {
            None
        }
    }

    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    fn is_remote_frame(&self) -> bool {
        true
    }

    fn id(&self) -> Id {
        self.hal_id()
    }

    /// Data length code
    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    /// Remote frames carry no payload.
    fn data(&self) -> &[u8] {
        &[]
    }
}

impl Frame for CanRemoteFrame {
    fn id_word(&self) -> canid_t {
        self.can_id
    }

    /// Sets the CAN ID for the frame.
    ///
    /// This will set the RTR flag in the CAN ID word.
    fn set_id(&mut self, id: impl Into<Id>) {
        self.can_id = id_to_canid_t(id) | CAN_RTR_FLAG;
    }

    /// For the Remote frame, this just updates the DLC to the length of the
    /// data slice.
    fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError> {
        self.set_dlc(data.len())
    }
}

impl Default for CanRemoteFrame {
    fn default() -> Self {
        Self {
            can_id: CAN_RTR_FLAG,
            dlc: 0,
        }
    }
}

impl fmt::Debug for CanRemoteFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanRemoteFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanRemoteFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:X}#R{}", self.raw_id(), self.dlc)
    }
}

// ===== CanErrorFrame =====

/// An error frame, as forwarded by the bridge.
///
/// socketcand reports bus errors with the error class only. The class bits
/// live in the ID word; the data bytes are kept zero-padded to a full
/// frame of 8 bytes so that decoders can index them safely.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanErrorFrame {
    can_id: canid_t,
    data: [u8; CAN_MAX_DLEN],
}

impl CanErrorFrame {
    /// Creates a CAN error frame from raw parts.
    ///
    /// - The error flag is forced on
    /// - The other, non-error, flags are forced off
    /// - The frame data is always padded with zero's to 8 bytes
    pub fn new_error(can_id: canid_t, data: &[u8]) -> Result<Self, ConstructionError> {
        match data.len() {
            n if n <= CAN_MAX_DLEN => {
                let mut frame = Self {
                    can_id: (can_id & CAN_ERR_MASK) | CAN_ERR_FLAG,
                    data: [0; CAN_MAX_DLEN],
                };
                frame.data[..n].copy_from_slice(data);
                Ok(frame)
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }

    /// Return the error bits from the ID word of the error frame.
    pub fn error_bits(&self) -> u32 {
        self.can_id & CAN_ERR_MASK
    }

    /// Converts this error frame into a `CanError`
    pub fn into_error(self) -> CanError {
        CanError::from(self)
    }
}

impl EmbeddedFrame for CanErrorFrame {
    /// Create an error frame.
    ///
    /// Applications would not normally create error frames; this mainly
    /// serves bridges and tests.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::new_error(id_to_canid_t(id), data).ok()
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn is_data_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.hal_id()
    }

    fn dlc(&self) -> usize {
        CAN_MAX_DLEN
    }

    /// An error frame can always acess the full 8-byte data payload.
    fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Frame for CanErrorFrame {
    fn id_word(&self) -> canid_t {
        self.can_id
    }

    /// The error class is the ID; it can't be replaced.
    fn set_id(&mut self, _id: impl Into<Id>) {}

    fn set_data(&mut self, _data: &[u8]) -> Result<(), ConstructionError> {
        Err(ConstructionError::WrongFrameType)
    }
}

impl fmt::Debug for CanErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanErrorFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:X}#", self.can_id)?;
        fmt_data(f, self.data())
    }
}

impl From<CanError> for CanErrorFrame {
    fn from(err: CanError) -> Self {
        Self {
            can_id: err.class_bits() | CAN_ERR_FLAG,
            data: [0; CAN_MAX_DLEN],
        }
    }
}

// ===== CanFdFrame =====

/// The CAN flexible data rate frame with up to 64-bytes of data.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFdFrame {
    can_id: canid_t,
    len: u8,
    flags: u8,
    data: [u8; CANFD_MAX_DLEN],
}

impl CanFdFrame {
    /// Create a new FD frame with FD flags
    pub fn with_flags(id: impl Into<Id>, data: &[u8], flags: FdFlags) -> Option<Self> {
        Self::init(id_to_canid_t(id), data, flags).ok()
    }

    /// Initialize a FD frame from the raw components.
    pub(crate) fn init(
        can_id: canid_t,
        data: &[u8],
        fd_flags: FdFlags,
    ) -> Result<Self, ConstructionError> {
        let mut frame = Self {
            can_id: can_id & !(CAN_RTR_FLAG | CAN_ERR_FLAG),
            len: 0,
            flags: fd_flags.bits(),
            data: [0; CANFD_MAX_DLEN],
        };
        frame.set_data(data)?;
        Ok(frame)
    }

    /// Gets the flags for the FD frame.
    ///
    /// These are the bits from the separate FD frame flags, not the flags
    /// in the composite ID word.
    pub fn flags(&self) -> FdFlags {
        FdFlags::from_bits_truncate(self.flags)
    }

    /// Whether the frame uses a bit rate switch (second bit rate for
    /// payload data).
    pub fn is_brs(&self) -> bool {
        self.flags().contains(FdFlags::BRS)
    }

    /// Sets whether the frame uses a bit rate switch.
    pub fn set_brs(&mut self, on: bool) {
        if on {
            self.flags |= CANFD_BRS;
        } else {
            self.flags &= !CANFD_BRS;
        }
    }

    /// Gets the error state indicator of the transmitting node
    pub fn is_esi(&self) -> bool {
        self.flags().contains(FdFlags::ESI)
    }

    /// Sets the error state indicator of the transmitting node
    pub fn set_esi(&mut self, on: bool) {
        if on {
            self.flags |= CANFD_ESI;
        } else {
            self.flags &= !CANFD_ESI;
        }
    }

    /// Checks whether a given length is a valid CANFD data length.
    ///
    /// Valid values are `0`, `1`, `2`, `3`, `4`, `5`, `6`, `7`, `8`,
    /// `12`, `16`, `20`, `24`, `32`, `48` or `64`.
    pub fn is_valid_data_len(len: usize) -> bool {
        len <= CAN_MAX_DLEN || FD_EXT_DLENS.contains(&len)
    }

    /// Returns the next larger valid CANFD extended data length into which
    /// the given length fits, up to a maximum of CANFD_MAX_DLEN.
    fn next_valid_ext_dlen(len: usize) -> usize {
        FD_EXT_DLENS
            .iter()
            .copied()
            .find(|&n| n >= len)
            .unwrap_or(CANFD_MAX_DLEN)
    }
}

impl EmbeddedFrame for CanFdFrame {
    /// Create a new FD frame
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::init(id_to_canid_t(id), data, FdFlags::empty()).ok()
    }

    /// CAN FD frames don't support remote
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.hal_id()
    }

    /// Data length code
    fn dlc(&self) -> usize {
        match self.len {
            0..=8 => self.len as usize,
            12 => 0x09,
            16 => 0x0A,
            20 => 0x0B,
            24 => 0x0C,
            32 => 0x0D,
            48 => 0x0E,
            64 => 0x0F,
            // data is always padded to a valid length on construction
            _ => 0x00,
        }
    }

    fn data(&self) -> &[u8] {
        &self.data[..(self.len as usize)]
    }
}

impl Frame for CanFdFrame {
    fn id_word(&self) -> canid_t {
        self.can_id
    }

    fn set_id(&mut self, id: impl Into<Id>) {
        self.can_id = id_to_canid_t(id);
    }

    /// Sets the data payload of the frame.
    ///
    /// Payloads that are not a valid FD length are zero padded up to the
    /// next valid length.
    fn set_data(&mut self, data: &[u8]) -> Result<(), ConstructionError> {
        match data.len() {
            n if n <= CANFD_MAX_DLEN => {
                let new_len = if Self::is_valid_data_len(n) {
                    n
                } else {
                    Self::next_valid_ext_dlen(n)
                };
                self.data = [0; CANFD_MAX_DLEN];
                self.data[..n].copy_from_slice(data);
                self.len = new_len as u8;
                Ok(())
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }
}

impl Default for CanFdFrame {
    fn default() -> Self {
        Self {
            can_id: 0,
            len: 0,
            flags: 0,
            data: [0; CANFD_MAX_DLEN],
        }
    }
}

impl fmt::Debug for CanFdFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanFdFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanFdFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:X}##{:X} ", self.raw_id(), self.flags)?;
        fmt_data(f, self.data())
    }
}

impl From<CanDataFrame> for CanFdFrame {
    fn from(frame: CanDataFrame) -> Self {
        let mut fdframe = Self {
            can_id: frame.id_word(),
            len: frame.len,
            ..Self::default()
        };
        fdframe.data[..frame.len()].copy_from_slice(frame.data());
        fdframe
    }
}

// ===== Compact text form =====

impl FromStr for CanAnyFrame {
    type Err = ParseError;

    /// Parses a frame in the compact candump form.
    ///
    /// ```text
    /// CAN 2.0: "<canid>#[data]"
    /// Remote:  "<canid>#R[len]"
    /// CAN FD:  "<canid>##<flags>[data]"
    /// ```
    ///
    /// The ID follows the wire rules: eight digits for an extended ID, up
    /// to three for a standard one. Data bytes may be separated by dots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id_str, data) = s
            .trim()
            .split_once('#')
            .ok_or(ParseError::UnexpectedEnd)?;
        let id = id_from_wire(id_str).ok_or_else(|| ParseError::InvalidId(id_str.to_string()))?;

        let hex_data = |s: &str| Vec::from_hex(s.replace('.', "")).map_err(|_| ParseError::InvalidData);

        if let Some(fd) = data.strip_prefix('#') {
            let flags = fd
                .get(..1)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .map(FdFlags::from_bits_truncate)
                .ok_or(ParseError::InvalidData)?;
            let data = hex_data(&fd[1..])?;
            CanFdFrame::with_flags(id, &data, flags)
                .map(CanAnyFrame::Fd)
                .ok_or(ConstructionError::TooMuchData.into())
        } else if let Some(rlen) = data.strip_prefix('R') {
            let rlen = match rlen {
                "" => 0,
                n => n
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidNumber(n.to_string()))?,
            };
            CanRemoteFrame::new_remote(id, rlen)
                .map(CanAnyFrame::Remote)
                .ok_or(ConstructionError::TooMuchData.into())
        } else {
            let data = hex_data(data)?;
            CanDataFrame::new(id, &data)
                .map(CanAnyFrame::Normal)
                .ok_or(ConstructionError::TooMuchData.into())
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::CAN_EFF_FLAG;

    const STD_ID: Id = Id::Standard(StandardId::MAX);
    const EXT_ID: Id = Id::Extended(ExtendedId::MAX);

    const EXT_LOW_ID: Id = Id::Extended(unsafe { ExtendedId::new_unchecked(0x7FF) });

    const DATA: &[u8] = &[0, 1, 2, 3];
    const DATA_LEN: usize = DATA.len();

    const EXT_DATA: &[u8] = &[0xAB; 32];
    const EXT_DATA_DLC: usize = 0x0D;

    const EXT_DATA_INVALID_DLEN: &[u8] =
        &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA];
    const EXT_DATA_PADDED: &[u8] = &[
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0x00, 0x00,
    ];
    const EXT_DATA_PADDED_DLC: usize = 0x09;

    const EMPTY_DATA: &[u8] = &[];

    #[test]
    fn test_defaults() {
        let frame = CanFrame::default();

        assert_eq!(0, frame.id_word());
        assert_eq!(0, frame.raw_id());
        assert!(frame.id_flags().is_empty());

        assert_eq!(0, frame.dlc());
        assert_eq!(0, frame.len());
        assert_eq!(EMPTY_DATA, frame.data());
    }

    #[test]
    fn test_data_frame() {
        let frame = CanDataFrame::new(STD_ID, DATA).unwrap();
        assert_eq!(STD_ID, frame.id());
        assert_eq!(0x7FF, frame.raw_id());
        assert!(frame.is_standard());
        assert!(frame.is_data_frame());
        assert!(!frame.is_error_frame());
        assert_eq!(DATA, frame.data());

        let frame = CanFrame::new(EXT_ID, DATA).unwrap();
        assert_eq!(EXT_ID, frame.id());
        assert!(frame.is_extended());
        assert_eq!(DATA, frame.data());

        let frame = CanFrame::from_raw_id(0xC0FFEE, DATA).unwrap();
        assert!(frame.is_extended());
        assert_eq!(0xC0FFEE | CAN_EFF_FLAG, frame.id_word());

        // Should keep Extended flag even if ID <= 0x7FF (standard range)
        let frame = CanFrame::new(EXT_LOW_ID, DATA).unwrap();
        assert_eq!(EXT_LOW_ID, frame.id());
        assert!(frame.is_extended());
    }

    #[test]
    fn test_classic_payload_limit() {
        assert!(CanDataFrame::new(STD_ID, &[0u8; 8]).is_some());
        assert!(CanDataFrame::new(STD_ID, &[0u8; 9]).is_none());

        let mut frame = CanDataFrame::new(STD_ID, DATA).unwrap();
        assert_eq!(
            frame.set_data(&[0u8; 9]),
            Err(ConstructionError::TooMuchData)
        );
        assert_eq!(DATA, frame.data());
    }

    #[test]
    fn test_remote_frame() {
        let frame = CanRemoteFrame::default();
        assert_eq!(CAN_RTR_FLAG, frame.id_word());
        assert!(frame.is_remote_frame());
        assert_eq!(0, frame.dlc());
        assert_eq!(EMPTY_DATA, frame.data());

        let frame = CanRemoteFrame::new_remote(STD_ID, DATA_LEN).unwrap();
        assert_eq!(STD_ID, frame.id());
        assert!(frame.is_remote_frame());
        assert!(frame.id_flags().contains(IdFlags::RTR));
        assert_eq!(DATA_LEN, frame.dlc());
        assert_eq!(EMPTY_DATA, frame.data());

        let frame = CanFrame::new_remote(STD_ID, DATA_LEN).unwrap();
        assert!(matches!(frame, CanFrame::Remote(_)));

        assert!(CanRemoteFrame::new_remote(STD_ID, CAN_MAX_DLEN + 1).is_none());
    }

    #[test]
    fn test_error_frame() {
        let frame = CanErrorFrame::new_error(0x0010, &[]).unwrap();
        assert!(!frame.is_data_frame());
        assert!(frame.is_error_frame());
        assert_eq!(frame.error_bits(), 0x0010);
        assert_eq!(frame.data().len(), CAN_MAX_DLEN);
        assert!(matches!(frame.into_error(), CanError::TransceiverError));

        let frame = CanErrorFrame::from(CanError::BusOff);
        assert!(frame.is_error_frame());
        assert!(matches!(frame.into_error(), CanError::BusOff));

        let mut frame = CanErrorFrame::from(CanError::NoAck);
        assert_eq!(
            frame.set_data(DATA),
            Err(ConstructionError::WrongFrameType)
        );
    }

    #[test]
    fn test_fd_frame() {
        let frame = CanFdFrame::new(EXT_ID, DATA).unwrap();
        assert_eq!(EXT_ID, frame.id());
        assert!(frame.is_extended());
        assert!(frame.is_data_frame());
        assert_eq!(DATA, frame.data());

        let mut frame = CanFdFrame::new(STD_ID, EXT_DATA).unwrap();
        assert_eq!(frame.dlc(), EXT_DATA_DLC);
        assert_eq!(frame.data(), EXT_DATA);
        frame.set_data(EXT_DATA_INVALID_DLEN).unwrap();
        assert_eq!(frame.data(), EXT_DATA_PADDED);
        assert_eq!(frame.dlc(), EXT_DATA_PADDED_DLC);

        let frame = CanFdFrame::new(STD_ID, EXT_DATA_INVALID_DLEN).unwrap();
        assert_eq!(frame.data(), EXT_DATA_PADDED);
    }

    #[test]
    fn test_fd_payload_limit() {
        assert!(CanFdFrame::new(STD_ID, &[0u8; 64]).is_some());
        assert!(CanFdFrame::new(STD_ID, &[0u8; 65]).is_none());
        assert!(CanAnyFrame::new(STD_ID, &[0u8; 65]).is_none());
    }

    #[test]
    fn test_fd_flags() {
        let mut frame = CanFdFrame::with_flags(STD_ID, DATA, FdFlags::BRS).unwrap();
        assert!(frame.is_brs());
        assert!(!frame.is_esi());

        frame.set_esi(true);
        frame.set_brs(false);
        assert_eq!(frame.flags(), FdFlags::ESI);
    }

    #[test]
    fn test_any_frame() {
        let frame = CanAnyFrame::new(STD_ID, DATA).unwrap();
        assert!(matches!(frame, CanAnyFrame::Normal(_)));
        assert!(!frame.is_fd());

        let frame = CanAnyFrame::new(STD_ID, &[0u8; 12]).unwrap();
        assert!(frame.is_fd());
        assert_eq!(frame.dlc(), 0x09);
    }

    #[test]
    fn test_frame_to_fd() {
        let frame = CanDataFrame::new(STD_ID, DATA).unwrap();

        let frame = CanFdFrame::from(frame);
        assert_eq!(STD_ID, frame.id());
        assert_eq!(DATA, frame.data());

        let frame = CanFrame::try_from(CanAnyFrame::Fd(frame)).unwrap();
        assert_eq!(DATA, frame.data());

        let fd = CanFdFrame::new(STD_ID, &[0u8; 12]).unwrap();
        assert!(CanFrame::try_from(CanAnyFrame::Fd(fd)).is_err());
    }

    #[test]
    fn test_upper_hex() {
        let frame = CanDataFrame::new(StandardId::new(0x123).unwrap(), &[0xAB, 0x01]).unwrap();
        assert_eq!(format!("{:X}", frame), "123#AB 01");

        let frame = CanFdFrame::with_flags(ExtendedId::new(0xC0FFEE).unwrap(), DATA, FdFlags::BRS)
            .unwrap();
        assert_eq!(format!("{:X}", frame), "C0FFEE##1 00 01 02 03");
    }

    #[test]
    fn test_parse_compact() {
        let frame: CanAnyFrame = "123#DEADBEEF".parse().unwrap();
        assert!(matches!(frame, CanAnyFrame::Normal(_)));
        assert_eq!(frame.raw_id(), 0x123);
        assert_eq!(frame.data(), &[0xDE, 0xAD, 0xBE, 0xEF]);

        let frame: CanAnyFrame = "00C0FFEE##1000102.03".parse().unwrap();
        match frame {
            CanAnyFrame::Fd(fd) => {
                assert!(fd.is_extended());
                assert!(fd.is_brs());
                assert_eq!(fd.data(), DATA);
            }
            _ => panic!("expected an FD frame, got {:?}", frame),
        }

        let frame: CanAnyFrame = "7FF#R4".parse().unwrap();
        assert!(frame.is_remote_frame());
        assert_eq!(frame.dlc(), 4);

        let frame: CanAnyFrame = "010#".parse().unwrap();
        assert!(frame.data().is_empty());

        assert!("123".parse::<CanAnyFrame>().is_err());
        assert!("1234#00".parse::<CanAnyFrame>().is_err());
        assert!("123#0".parse::<CanAnyFrame>().is_err());
        assert!("123#000102030405060708".parse::<CanAnyFrame>().is_err());
    }

    #[test]
    fn test_hal_id_from_word() {
        let word = 0xC0FFEE | CAN_EFF_FLAG | CAN_RTR_FLAG;
        assert_eq!(
            hal_id_from_word(word),
            Id::Extended(ExtendedId::new(0xC0FFEE).unwrap())
        );

        // stray bits above the standard range are masked off
        assert_eq!(hal_id_from_word(0x1FFF_F123), Id::Standard(StandardId::new(0x123).unwrap()));
        assert_eq!(hal_id_from_word(CAN_EFF_FLAG | CAN_EFF_MASK), EXT_ID);
        assert_eq!(hal_id_from_word(CAN_SFF_MASK), STD_ID);
    }
}
