// socketcand/src/tokio.rs
//
// Implements an async connection to a socketcand bridge using tokio.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Connective plumbing between the socketcand protocol and the tokio
//! asynchronous I/O system.
//!
//! The [`AsyncBus`] speaks the same protocol as the blocking
//! [`Bus`](crate::Bus), over a `tokio::net::TcpStream`.
//!
//! An example that prints every frame on the bus:
//!
//! ```no_run
//! use futures::stream::StreamExt;
//! use socketcand::{tokio::AsyncBus, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = AsyncBus::open("192.168.0.16", 29536, "can0").await?;
//!     let mut messages = Box::pin(bus.into_stream());
//!
//!     while let Some(Ok(msg)) = messages.next().await {
//!         println!("{}", msg);
//!     }
//!     Ok(())
//! }
//! ```

use crate::{
    addr::BusAddr,
    socket::{mode_command, BusConfig},
    wire::{Command, Decoder, Response},
    CanAnyFrame, CanFrame, ConstructionError, Error, Message, Mode, Result,
};
use futures::stream::{self, Stream};
use log::{debug, trace, warn};
use std::{collections::VecDeque, future::Future, io, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};

/// Size of the buffer for a single read from the TCP stream.
const READ_BUF_LEN: usize = 4096;

/// Runs a future with an optional time limit.
///
/// Expiry is reported as an I/O error of kind `TimedOut`.
async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => time::timeout(limit, fut)
            .await
            .map_err(|_| Error::from(io::Error::from(io::ErrorKind::TimedOut)))?,
        None => fut.await,
    }
}

/// An asynchronous connection to one CAN bus behind a socketcand bridge.
#[derive(Debug)]
pub struct AsyncBus {
    stream: TcpStream,
    channel: String,
    mode: Mode,
    decoder: Decoder,
    pending: VecDeque<Message>,
    /// Unsent tail of a command whose write was cancelled
    outbox: Vec<u8>,
    read_timeout: Option<Duration>,
}

impl AsyncBus {
    /// Opens a bus on the bridge at `host:port`, in raw mode.
    pub async fn open(host: &str, port: u16, channel: &str) -> Result<Self> {
        Self::open_addr(&BusAddr::new(host, port, channel)).await
    }

    /// Opens a bus by address, in raw mode.
    pub async fn open_addr(addr: &BusAddr) -> Result<Self> {
        Self::open_config(&BusConfig::new(addr.clone())).await
    }

    /// Opens a bus with the full set of options.
    ///
    /// The read timeout bounds each handshake step. After the handshake,
    /// reads wait as long as it takes, unless
    /// [`read_message_timeout`](Self::read_message_timeout) is used.
    pub async fn open_config(config: &BusConfig) -> Result<Self> {
        let addr = (config.addr.host.as_str(), config.addr.port);
        debug!("Connecting to {}", config.addr);
        let stream = with_timeout(config.connect_timeout, async {
            TcpStream::connect(addr).await.map_err(Error::from)
        })
        .await?;
        stream.set_nodelay(config.nodelay)?;

        let mut bus = Self {
            stream,
            channel: config.addr.channel.clone(),
            mode: Mode::NoBus,
            decoder: Decoder::new(),
            pending: VecDeque::new(),
            outbox: Vec::new(),
            read_timeout: config.read_timeout,
        };

        bus.handshake(config.mode).await.map_err(|err| match err {
            Error::Remote(text) => Error::Handshake(text),
            err => err,
        })?;
        Ok(bus)
    }

    async fn handshake(&mut self, mode: Mode) -> Result<()> {
        match with_timeout(self.read_timeout, self.read_response()).await? {
            Response::Hi => debug!("Bridge said hi"),
            resp => return Err(Error::Handshake(format!("expected < hi >, got {}", resp))),
        }

        self.request(&Command::Open(self.channel.clone())).await?;
        self.mode = Mode::Broadcast;
        debug!("Opened bus '{}'", self.channel);

        if mode != Mode::Broadcast {
            self.set_mode(mode).await?;
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

    /// Switches the connection to another mode.
    pub async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let cmd = mode_command(mode).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "can't switch back to no-bus mode",
            ))
        })?;
        self.request(&cmd).await?;
        debug!("Switched '{}' to {:?} mode", self.channel, mode);
        self.mode = mode;
        Ok(())
    }

    /// Writes a command to the bridge.
    ///
    /// If the future is dropped part way through, the rest of the command
    /// stays queued and goes out ahead of the next one.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<()> {
        trace!("-> {}", cmd);
        self.outbox.extend_from_slice(cmd.to_string().as_bytes());
        self.flush_outbox().await
    }

    async fn flush_outbox(&mut self) -> Result<()> {
        while !self.outbox.is_empty() {
            let n = self.stream.write(&self.outbox).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            self.outbox.drain(..n);
        }
        Ok(())
    }

    async fn request(&mut self, cmd: &Command) -> Result<()> {
        self.send_command(cmd).await?;
        let limit = self.read_timeout;
        with_timeout(limit, self.wait_for(Response::Ok)).await
    }

    async fn wait_for(&mut self, expected: Response) -> Result<()> {
        loop {
            let resp = self.read_response().await?;
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

    async fn read_response(&mut self) -> Result<Response> {
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
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Closed);
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Reads the next message from the bus.
    ///
    /// Acknowledgements and echo replies are skipped. An error report
    /// from the bridge is returned as `Error::Remote`.
    pub async fn read_message(&mut self) -> Result<Message> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }

        loop {
            match self.read_response().await? {
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

    /// Reads the next message, giving up after `timeout`.
    ///
    /// Partially received messages are kept for the next read.
    pub async fn read_message_timeout(&mut self, timeout: Duration) -> Result<Message> {
        with_timeout(Some(timeout), self.read_message()).await
    }

    /// Reads the next frame from the bus.
    pub async fn read_frame(&mut self) -> Result<CanAnyFrame> {
        self.read_message().await.map(|msg| msg.frame)
    }

    /// Writes a single frame to the bus.
    pub async fn write_frame<F>(&mut self, frame: F) -> Result<()>
    where
        F: Into<CanAnyFrame>,
    {
        let cmd = match frame.into() {
            CanAnyFrame::Normal(frame) => Command::Send(CanFrame::Data(frame)),
            CanAnyFrame::Remote(frame) => Command::Send(CanFrame::Remote(frame)),
            CanAnyFrame::Fd(frame) => Command::FdSend(frame),
            CanAnyFrame::Error(_) => return Err(ConstructionError::WrongFrameType.into()),
        };
        self.send_command(&cmd).await
    }

    /// Round trip of an echo request, to check the bridge is alive.
    pub async fn echo(&mut self) -> Result<()> {
        self.send_command(&Command::Echo).await?;
        let limit = self.read_timeout;
        with_timeout(limit, self.wait_for(Response::Echo)).await
    }

    /// Releases the connection.
    pub async fn shutdown(mut self) -> Result<()> {
        debug!("Closing bus '{}'", self.channel);
        self.flush_outbox().await?;
        match self.stream.shutdown().await {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            res => Ok(res?),
        }
    }

    /// Turns the bus into a stream of received messages.
    ///
    /// The stream ends when the bridge closes the connection.
    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> {
        stream::unfold(self, |mut bus| async move {
            match bus.read_message().await {
                Err(Error::Closed) => None,
                res => Some((res, bus)),
            }
        })
    }
}
