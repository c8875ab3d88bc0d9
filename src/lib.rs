// socketcand/src/lib.rs
//
// The main lib file for the Rust socketcand library.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! socketcand support.
//!
//! [socketcand](https://github.com/linux-can/socketcand) is a daemon that
//! exports the SocketCAN interfaces of a Linux host over TCP/IP. Clients
//! anywhere on the network can then send and receive CAN frames through a
//! simple ASCII protocol. This crate speaks that protocol, on both sides
//! of the connection.
//!
//! # An introduction to CAN
//!
//! The CAN bus was originally designed to allow microcontrollers inside a
//! vehicle to communicate over a single shared bus. Messages called
//! *frames* are multicast to all devices on the bus.
//!
//! Every frame consists of an ID and a payload of up to 8 bytes, or up to
//! 64 bytes for the flexible data rate (FD) variant. If two devices attempt
//! to send a frame at the same time, the device with the higher ID will
//! notice the conflict, stop sending and reattempt to sent its frame in the
//! next time slot. This means that the lower the ID, the higher the
//! priority.
//!
//! # Usage
//!
//! Open a [`Bus`] on the bridge, then read and write frames on it:
//!
//! ```no_run
//! use embedded_can::{ExtendedId, Frame};
//! use socketcand::{Bus, CanFdFrame};
//!
//! let mut bus = Bus::open("192.168.0.16", 29536, "can0")?;
//!
//! let id = ExtendedId::new(0xC0FFEE).unwrap();
//! let frame = CanFdFrame::new(id, &[0, 1, 2, 3]).unwrap();
//! bus.write_frame(&frame)?;
//!
//! let msg = bus.read_message()?;
//! println!("{}", msg);
//!
//! bus.shutdown()?;
//! # Ok::<(), socketcand::Error>(())
//! ```
//!
//! Bridges announce themselves with a UDP [`beacon`], which can be used to
//! find one on the local network.
//!
//! # Crate Features
//!
//! ### Default
//!
//! None
//!
//! ### Non-default
//!
//! * **utils** -
//!   Whether to build the `scand` command-line utility. This brings in
//!   additional dependencies like [anyhow](https://docs.rs/anyhow/latest/anyhow/)
//!   and [clap](https://docs.rs/clap/latest/clap/)
//!
//! * **tokio** -
//!   Include support for async/await using [tokio](https://crates.io/crates/tokio).

#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]
// clippy::use_self,
// clippy::wildcard_imports,
// clippy::must_use_candidate

// Re-export the embedded_can crate so that applications can rely on
// finding the same version we use.
pub use embedded_can::{
    self, blocking::Can as BlockingCan, nb::Can as NonBlockingCan, ExtendedId,
    Frame as EmbeddedFrame, Id, StandardId,
};

pub mod errors;
pub use errors::{
    CanError, CanErrorDecodingFailure, ConstructionError, Error, Result,
};

pub mod addr;
pub use addr::{AddrParseError, BusAddr, DEFAULT_PORT};

pub mod id;
pub use id::CanId;

pub mod frame;
pub use frame::{
    CanAnyFrame, CanDataFrame, CanErrorFrame, CanFdFrame, CanFrame, CanRemoteFrame, Frame,
};

pub mod message;
pub use message::Message;

pub mod wire;
pub use wire::{Command, Decoder, ParseError, Response};

pub mod socket;
pub use socket::{Bus, BusConfig, ShouldRetry};

pub mod beacon;
pub use beacon::{detect_beacon, Beacon, DeviceType, BEACON_PORT};

pub mod server;
pub use server::{Action, Connection, Mode, Server, Session};

/// Optional tokio support
#[cfg(feature = "tokio")]
pub mod tokio;
