// socketcand/src/socket.rs
//
// Implements a blocking connection to a bus behind a socketcand bridge.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Blocking connection to a CAN bus behind a socketcand bridge.
//!
//! A [`Bus`] is created by opening it, which connects to the bridge and
//! runs the handshake:
//!
//! ```text
//! bridge: < hi >
//! client: < open can0 >
//! bridge: < ok >
//! client: < rawmode >
//! bridge: < ok >
//! ```
//!
//! After that, every frame on the bus is forwarded to the client, and the
//! client can transmit frames. The connection is released by calling
//! [`Bus::shutdown`], or by dropping the bus.

use crate::{
    addr::BusAddr,
    wire::{Command, Decoder, Response},
    CanAnyFrame, CanFrame, ConstructionError, Error, Message, Mode, Result,
};
use log::{debug, trace, warn};
use std::{
    collections::VecDeque,
    fmt, io,
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

/// Size of the buffer for a single read from the TCP stream.
const READ_BUF_LEN: usize = 4096;

/// Check an error return value for timeouts.
///
/// Due to the fact that timeouts are reported as errors, calling `read_frame`
/// on a bus with a timeout that does not receive a frame in time will
/// result in an error being returned. This trait adds a `should_retry` method
/// to `Error` and `Result` to check for this condition.
pub trait ShouldRetry {
    /// Check for timeout
    ///
    /// If `true`, the error is probably due to a timeout.
    fn should_retry(&self) -> bool;
}

impl ShouldRetry for io::Error {
    fn should_retry(&self) -> bool {
        matches!(
            self.kind(),
            // A read timeout is reported as WouldBlock on unix, TimedOut on
            // windows.
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
        )
    }
}

impl ShouldRetry for Error {
    fn should_retry(&self) -> bool {
        match self {
            Error::Io(err) => err.should_retry(),
            _ => false,
        }
    }
}

impl<T> ShouldRetry for io::Result<T> {
    fn should_retry(&self) -> bool {
        match *self {
            Err(ref e) => e.should_retry(),
            _ => false,
        }
    }
}

impl<T> ShouldRetry for Result<T> {
    fn should_retry(&self) -> bool {
        match *self {
            Err(ref e) => e.should_retry(),
            _ => false,
        }
    }
}

// ===== BusConfig =====

/// Options for opening a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// The bridge and channel
    pub addr: BusAddr,
    /// The mode to leave the connection in after opening the bus.
    /// Only `Raw` and `Broadcast` make sense for a frame connection.
    pub mode: Mode,
    /// Time limit for establishing the TCP connection
    pub connect_timeout: Option<Duration>,
    /// Time limit for a single read. Also bounds each handshake step.
    pub read_timeout: Option<Duration>,
    /// Time limit for a single write
    pub write_timeout: Option<Duration>,
    /// Whether to disable Nagle's algorithm
    pub nodelay: bool,
}

impl BusConfig {
    /// Creates a raw mode configuration for the address, with no timeouts.
    pub fn new(addr: BusAddr) -> Self {
        Self {
            addr,
            mode: Mode::Raw,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            nodelay: true,
        }
    }

    /// Sets the mode the connection is put in after opening.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    /// Sets the read timeout.
    pub fn read_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.read_timeout = timeout.into();
        self
    }

    /// Sets the write timeout.
    pub fn write_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.write_timeout = timeout.into();
        self
    }

    /// Sets whether small writes go out immediately.
    pub fn nodelay(mut self, on: bool) -> Self {
        self.nodelay = on;
        self
    }
}

impl From<BusAddr> for BusConfig {
    fn from(addr: BusAddr) -> Self {
        Self::new(addr)
    }
}

// ===== Private local helper functions =====

/// Connects to the first address of the bridge that accepts.
fn connect(config: &BusConfig) -> io::Result<TcpStream> {
    let mut last_err = None;

    for sa in config.addr.socket_addrs()? {
        debug!("Connecting to {}", sa);
        let res = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&sa, timeout),
            None => TcpStream::connect(sa),
        };
        match res {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!("Connect to {} failed: {}", sa, err);
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("No address found for '{}'", config.addr.host),
        )
    }))
}

/// The command that switches the connection into a mode.
pub(crate) fn mode_command(mode: Mode) -> Option<Command> {
    match mode {
        Mode::Raw => Some(Command::RawMode),
        Mode::Broadcast => Some(Command::BroadcastMode),
        Mode::Control => Some(Command::ControlMode),
        Mode::IsoTp => Some(Command::IsoTpMode),
        Mode::NoBus => None,
    }
}

// ===== Bus =====

/// A blocking connection to one CAN bus behind a socketcand bridge.
pub struct Bus {
    stream: TcpStream,
    channel: String,
    mode: Mode,
    decoder: Decoder,
    /// Frames that arrived while waiting for a reply to a command
    pending: VecDeque<Message>,
    /// Unsent tail of a partially written command
    outbox: Vec<u8>,
    /// The command the outbox tail belongs to
    in_flight: Option<String>,
    closed: bool,
}

impl Bus {
    /// Opens a bus on the bridge at `host:port`, in raw mode.
    pub fn open(host: &str, port: u16, channel: &str) -> Result<Self> {
        Self::open_addr(&BusAddr::new(host, port, channel))
    }

    /// Opens a bus by address, in raw mode.
    pub fn open_addr(addr: &BusAddr) -> Result<Self> {
        Self::open_config(&BusConfig::new(addr.clone()))
    }

    /// Opens a bus from a URL like `can://host:port/can0`.
    pub fn open_url(url: &str) -> Result<Self> {
        let addr: BusAddr = url.parse()?;
        Self::open_addr(&addr)
    }

    /// Opens a bus with the full set of options.
    pub fn open_config(config: &BusConfig) -> Result<Self> {
        let stream = connect(config)?;
        stream.set_nodelay(config.nodelay)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;

        let mut bus = Self {
            stream,
            channel: config.addr.channel.clone(),
            mode: Mode::NoBus,
            decoder: Decoder::new(),
            pending: VecDeque::new(),
            outbox: Vec::new(),
            in_flight: None,
            closed: false,
        };

        bus.handshake(config.mode).map_err(|err| match err {
            Error::Remote(text) => Error::Handshake(text),
            err => err,
        })?;
        Ok(bus)
    }

    fn handshake(&mut self, mode: Mode) -> Result<()> {
        match self.read_response()? {
            Response::Hi => debug!("Bridge said hi"),
            resp => return Err(Error::Handshake(format!("expected < hi >, got {}", resp))),
        }

        self.request(&Command::Open(self.channel.clone()))?;
        self.mode = Mode::Broadcast;
        debug!("Opened bus '{}'", self.channel);

        if mode != Mode::Broadcast {
            self.set_mode(mode)?;
        }
        Ok(())
    }

    /// The name of the bus on the bridge.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The current mode of the connection.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The address of the bridge.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// The local address of the connection.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Switches the connection to another mode.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let cmd = mode_command(mode).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "can't switch back to no-bus mode",
            ))
        })?;
        self.request(&cmd)?;
        debug!("Switched '{}' to {:?} mode", self.channel, mode);
        self.mode = mode;
        Ok(())
    }

    /// Determines if the connection is in nonblocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    /// Gets the read timeout on the connection, if any.
    pub fn read_timeout(&self) -> io::Result<Option<Duration>> {
        self.stream.read_timeout()
    }

    /// Sets the read timeout on the connection.
    ///
    /// For convenience, the result value can be checked using
    /// `ShouldRetry::should_retry` when a timeout is set.
    pub fn set_read_timeout<D>(&self, duration: D) -> io::Result<()>
    where
        D: Into<Option<Duration>>,
    {
        self.stream.set_read_timeout(duration.into())
    }

    /// Gets the write timeout on the connection, if any.
    pub fn write_timeout(&self) -> io::Result<Option<Duration>> {
        self.stream.write_timeout()
    }

    /// Sets the write timeout on the connection.
    pub fn set_write_timeout<D>(&self, duration: D) -> io::Result<()>
    where
        D: Into<Option<Duration>>,
    {
        self.stream.set_write_timeout(duration.into())
    }

    /// Gets the underlying TCP stream, for polling.
    pub fn as_tcp_stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Writes a command to the bridge.
    ///
    /// When a timeout or nonblocking mode interrupts the write, the part
    /// already on the wire can't be taken back. The rest is kept and goes
    /// out before anything else. Retrying the same command completes it
    /// rather than sending it twice; a different command is queued behind
    /// it.
    pub fn send_command(&mut self, cmd: &Command) -> Result<()> {
        let text = cmd.to_string();

        if !self.outbox.is_empty() {
            self.flush_outbox()?;
            if self.in_flight.take().as_deref() == Some(text.as_str()) {
                return Ok(());
            }
        }

        trace!("-> {}", text);
        self.outbox.extend_from_slice(text.as_bytes());
        match self.flush_outbox() {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.outbox.len() == text.len() {
                    // nothing went out
                    self.outbox.clear();
                } else {
                    self.in_flight = Some(text);
                }
                Err(err.into())
            }
        }
    }

    /// Writes out as much of the outgoing buffer as the stream takes.
    fn flush_outbox(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Sends a command and waits for the bridge to acknowledge it.
    fn request(&mut self, cmd: &Command) -> Result<()> {
        self.send_command(cmd)?;
        self.wait_for(Response::Ok)
    }

    /// Reads until `expected` arrives, queueing any frames on the way.
    fn wait_for(&mut self, expected: Response) -> Result<()> {
        loop {
            let resp = self.read_response()?;
            if resp == expected {
                return Ok(());
            }
            match resp {
                Response::Error(text) => return Err(Error::Remote(text)),
                Response::Hi | Response::Ok | Response::Echo => {
                    return Err(Error::Handshake(format!(
                        "expected {}, got {}",
                        expected, resp
                    )))
                }
                resp => {
                    if let Some(msg) = resp.into_message(&self.channel) {
                        self.pending.push_back(msg);
                    }
                }
            }
        }
    }

    /// Reads the next protocol message from the bridge.
    ///
    /// Messages that can't be parsed are logged and skipped.
    fn read_response(&mut self) -> Result<Response> {
        loop {
            while let Some(res) = self.decoder.next_message() {
                match res {
                    Ok(s) => {
                        trace!("<- {}", s);
                        match s.parse::<Response>() {
                            Ok(resp) => return Ok(resp),
                            Err(err) => warn!("Skipping message {:?}: {}", s, err),
                        }
                    }
                    Err(err) => warn!("Discarding input: {}", err),
                }
            }

            let mut buf = [0u8; READ_BUF_LEN];
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Blocking read of the next message from the bus.
    ///
    /// Acknowledgements and echo replies are skipped. An error report
    /// from the bridge is returned as `Error::Remote`.
    pub fn read_message(&mut self) -> Result<Message> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }

        loop {
            match self.read_response()? {
                Response::Error(text) => return Err(Error::Remote(text)),
                resp @ (Response::Hi | Response::Ok | Response::Echo) => {
                    trace!("Ignoring {}", resp)
                }
                resp => {
                    if let Some(msg) = resp.into_message(&self.channel) {
                        return Ok(msg);
                    }
                }
            }
        }
    }

    /// Blocking read of the next message, giving up after `timeout`.
    ///
    /// On expiry this returns an I/O error of kind `TimedOut`.
    pub fn read_message_timeout(&mut self, timeout: Duration) -> Result<Message> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }

        let prev = self.stream.read_timeout()?;
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let res = self.read_message();
        self.stream.set_read_timeout(prev)?;

        match res {
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                Err(io::Error::from(io::ErrorKind::TimedOut).into())
            }
            res => res,
        }
    }

    /// Blocking read of the next frame from the bus.
    pub fn read_frame(&mut self) -> Result<CanAnyFrame> {
        self.read_message().map(|msg| msg.frame)
    }

    /// Blocking read of the next frame, giving up after `timeout`.
    pub fn read_frame_timeout(&mut self, timeout: Duration) -> Result<CanAnyFrame> {
        self.read_message_timeout(timeout).map(|msg| msg.frame)
    }

    /// Writes a single frame to the bus.
    ///
    /// Classic frames go out with `< send >`, FD frames with `< fdsend >`.
    /// Error frames can't be transmitted.
    ///
    /// Note that this function can fail with a `WouldBlock` error or similar
    /// when a timeout is set or the connection is nonblocking.
    /// Use `write_frame_insist` if you need to be sure that the message got
    /// sent or failed.
    pub fn write_frame<F>(&mut self, frame: &F) -> Result<()>
    where
        F: Into<CanAnyFrame> + Clone,
    {
        let cmd = match frame.clone().into() {
            CanAnyFrame::Normal(frame) => Command::Send(CanFrame::Data(frame)),
            CanAnyFrame::Remote(frame) => Command::Send(CanFrame::Remote(frame)),
            CanAnyFrame::Fd(frame) => Command::FdSend(frame),
            CanAnyFrame::Error(_) => return Err(ConstructionError::WrongFrameType.into()),
        };
        self.send_command(&cmd)
    }

    /// Blocking write of a single frame, retrying until it gets sent
    /// successfully.
    pub fn write_frame_insist<F>(&mut self, frame: &F) -> Result<()>
    where
        F: Into<CanAnyFrame> + Clone,
    {
        loop {
            match self.write_frame(frame) {
                Ok(v) => return Ok(v),
                Err(e) if e.should_retry() => (),
                Err(e) => return Err(e),
            }
        }
    }

    /// Round trip of an echo request, to check the bridge is alive.
    ///
    /// Frames arriving in the meantime are kept for the next read.
    pub fn echo(&mut self) -> Result<()> {
        self.send_command(&Command::Echo)?;
        self.wait_for(Response::Echo)
    }

    /// Releases the connection.
    ///
    /// The bridge closes the bus for this client when the TCP connection
    /// ends. Consuming the bus guarantees this happens once; dropping a bus
    /// that was not shut down releases it the same way.
    pub fn shutdown(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing bus '{}'", self.channel);

        if let Err(err) = self.flush_outbox() {
            debug!("Dropping {} unsent bytes: {}", self.outbox.len(), err);
        }

        match self.stream.shutdown(Shutdown::Both) {
            // the bridge hung up first
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            res => Ok(res?),
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("Error closing bus '{}': {}", self.channel, err);
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Bus")
            .field("peer", &self.stream.peer_addr().ok())
            .field("channel", &self.channel)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Iterator for Bus {
    type Item = Result<Message>;

    /// Reads messages until the bridge closes the connection.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_message() {
            Err(Error::Closed) => None,
            res => Some(res),
        }
    }
}

impl embedded_can::blocking::Can for Bus {
    type Frame = CanAnyFrame;
    type Error = Error;

    /// Blocking call to receive the next frame from the bus.
    fn receive(&mut self) -> Result<Self::Frame> {
        self.read_frame()
    }

    /// Blocking transmit of a frame to the bus.
    fn transmit(&mut self, frame: &Self::Frame) -> Result<()> {
        self.write_frame_insist(frame)
    }
}

impl embedded_can::nb::Can for Bus {
    type Frame = CanAnyFrame;
    type Error = Error;

    /// Non-blocking call to receive the next frame from the bus.
    ///
    /// If no frame is available, this returns `WouldBlock`.
    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        match self.read_frame() {
            Ok(frame) => Ok(frame),
            Err(err) if err.should_retry() => Err(nb::Error::WouldBlock),
            Err(err) => Err(nb::Error::Other(err)),
        }
    }

    /// Non-blocking transmit of a frame to the bus.
    ///
    /// The bridge queues frames itself, so nothing is ever displaced.
    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        match self.write_frame(frame) {
            Ok(_) => Ok(None),
            Err(err) if err.should_retry() => Err(nb::Error::WouldBlock),
            Err(err) => Err(nb::Error::Other(err)),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(err.should_retry());

        let res: Result<()> = Err(io::Error::from(io::ErrorKind::TimedOut).into());
        assert!(res.should_retry());

        let res: Result<()> = Err(Error::Closed);
        assert!(!res.should_retry());

        let res: io::Result<()> = Err(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!res.should_retry());

        let res: io::Result<u8> = Ok(1);
        assert!(!res.should_retry());
    }

    #[test]
    fn test_config_builder() {
        let addr = BusAddr::with_default_port("localhost", "can0");
        let config = BusConfig::new(addr.clone())
            .mode(Mode::Broadcast)
            .read_timeout(Duration::from_millis(100))
            .connect_timeout(None)
            .nodelay(false);

        assert_eq!(config.addr, addr);
        assert_eq!(config.mode, Mode::Broadcast);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(100)));
        assert_eq!(config.connect_timeout, None);
        assert!(!config.nodelay);

        assert_eq!(BusConfig::from(addr).mode, Mode::Raw);
    }

    #[test]
    fn test_mode_command() {
        assert_eq!(mode_command(Mode::Raw), Some(Command::RawMode));
        assert_eq!(mode_command(Mode::Broadcast), Some(Command::BroadcastMode));
        assert_eq!(mode_command(Mode::NoBus), None);
    }
}
