// socketcand/src/server.rs
//
// Implements the bridge side of a socketcand connection.
//
// This file is part of the Rust 'socketcand-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Bridge side of the protocol.
//!
//! A [`Session`] holds the per-client protocol state and decides what to
//! do with each [`Command`]. It doesn't touch any CAN hardware: frames the
//! client wants transmitted are handed back to the caller as an
//! [`Action`], and frames from the bus are passed in by the caller.
//!
//! A [`Connection`] runs a session over any byte stream, and a [`Server`]
//! accepts TCP connections for it.

use crate::{
    beacon::{Beacon, DeviceType},
    wire::{Command, Decoder, Response},
    CanAnyFrame, CanFrame, Error, Message, Result,
};
use log::{debug, trace, warn};
use std::{
    fmt, io,
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Size of the buffer for a single read from the client.
const READ_BUF_LEN: usize = 1024;

/// The protocol mode of a connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// No bus opened yet
    #[default]
    NoBus,
    /// Broadcast manager mode, entered by opening a bus
    Broadcast,
    /// Every bus frame is forwarded to the client
    Raw,
    /// Bus control and statistics
    Control,
    /// ISO-TP transfers
    IsoTp,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Mode::NoBus => "no bus",
            Mode::Broadcast => "broadcast manager",
            Mode::Raw => "raw",
            Mode::Control => "control",
            Mode::IsoTp => "ISO-TP",
        };
        f.write_str(name)
    }
}

/// What the caller should do after a command was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this reply to the client
    Reply(Response),
    /// Transmit a frame on a bus
    Transmit {
        /// The bus name
        channel: String,
        /// The frame
        frame: CanAnyFrame,
    },
    /// A valid broadcast manager or control command for the caller to
    /// carry out
    Forward(Command),
}

fn error_reply(text: impl Into<String>) -> Action {
    Action::Reply(Response::Error(text.into()))
}

// ===== Session =====

/// Protocol state of one client connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Whether the greeting has gone out
    greeted: bool,
    mode: Mode,
    channel: Option<String>,
    /// The buses clients may open. Empty allows any.
    channels: Vec<String>,
}

impl Session {
    /// Creates a session that may open any of `channels`.
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The open bus, if any.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// The greeting, the first time this is called.
    pub fn greeting(&mut self) -> Option<Response> {
        if self.greeted {
            None
        } else {
            self.greeted = true;
            Some(Response::Hi)
        }
    }

    /// Returns the session to its initial state, for a new client.
    pub fn reset(&mut self) {
        self.greeted = false;
        self.mode = Mode::NoBus;
        self.channel = None;
    }

    /// Applies a command from the client.
    pub fn handle(&mut self, cmd: Command) -> Action {
        use Command::*;

        let channel = match (&cmd, self.channel.clone()) {
            (Open(name), None) => {
                if !self.channels.is_empty() && !self.channels.contains(name) {
                    return error_reply(format!("could not open bus '{}'", name));
                }
                debug!("Client opened bus '{}'", name);
                self.channel = Some(name.clone());
                self.mode = Mode::Broadcast;
                return Action::Reply(Response::Ok);
            }
            (Open(_), Some(open)) => {
                return error_reply(format!("bus '{}' already open", open));
            }
            (Echo, _) => return Action::Reply(Response::Echo),
            (_, None) => return error_reply("no bus open"),
            (_, Some(channel)) => channel,
        };

        let mode = match cmd {
            RawMode => Some(Mode::Raw),
            BroadcastMode => Some(Mode::Broadcast),
            ControlMode => Some(Mode::Control),
            IsoTpMode => Some(Mode::IsoTp),
            _ => None,
        };
        if let Some(mode) = mode {
            debug!("Client switched to {} mode", mode);
            self.mode = mode;
            return Action::Reply(Response::Ok);
        }

        match (cmd, self.mode) {
            (Send(CanFrame::Error(_)), _) => error_reply("can't send error frames"),
            (Send(frame), Mode::Raw | Mode::Broadcast) => Action::Transmit {
                channel,
                frame: frame.into(),
            },
            (FdSend(frame), Mode::Raw | Mode::Broadcast) => Action::Transmit {
                channel,
                frame: frame.into(),
            },
            (
                cmd @ (Add { .. }
                | Update { .. }
                | Delete { .. }
                | Filter { .. }
                | Subscribe { .. }
                | Unsubscribe { .. }),
                Mode::Broadcast,
            ) => Action::Forward(cmd),
            (cmd @ Statistics { .. }, Mode::Control) => Action::Forward(cmd),
            (cmd, mode) => error_reply(format!("{} not available in {} mode", cmd.name(), mode)),
        }
    }

    /// The report of a bus frame for this client.
    ///
    /// Only raw mode clients receive every frame. `now` stamps messages
    /// that carry no timestamp of their own.
    pub fn frame_response(&self, msg: &Message, now: Duration) -> Option<Response> {
        if self.mode != Mode::Raw {
            return None;
        }
        if msg.channel.is_some() && msg.channel.as_deref() != self.channel() {
            return None;
        }
        Some(Response::from_message(msg, now))
    }
}

// ===== Connection =====

/// A session running over a byte stream.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    session: Session,
    decoder: Decoder,
}

impl<S: Read + Write> Connection<S> {
    /// Creates a connection. Nothing is sent until the first call that
    /// talks to the client.
    pub fn new(stream: S, session: Session) -> Self {
        Self {
            stream,
            session,
            decoder: Decoder::new(),
        }
    }

    /// The protocol state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Gets a reference to the stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Gets a mutable reference to the stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwraps the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Sends the greeting, if it hasn't gone out yet.
    pub fn greet(&mut self) -> Result<()> {
        if let Some(hi) = self.session.greeting() {
            self.write_response(&hi)?;
        }
        Ok(())
    }

    /// Writes a single message to the client.
    pub fn write_response(&mut self, resp: &Response) -> Result<()> {
        trace!("-> {}", resp);
        self.stream.write_all(resp.to_string().as_bytes())?;
        Ok(())
    }

    /// Reads commands until one needs the caller.
    ///
    /// Replies are written directly. Malformed commands are answered with
    /// an error message. Returns `Error::Closed` when the client hangs up.
    pub fn next_action(&mut self) -> Result<Action> {
        self.greet()?;

        loop {
            while let Some(res) = self.decoder.next_message() {
                let text = match res {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("Discarding input: {}", err);
                        continue;
                    }
                };
                trace!("<- {}", text);

                match text.parse::<Command>() {
                    Ok(cmd) => match self.session.handle(cmd) {
                        Action::Reply(resp) => self.write_response(&resp)?,
                        action => return Ok(action),
                    },
                    Err(err) => {
                        warn!("Bad command {:?}: {}", text, err);
                        self.write_response(&Response::Error(err.to_string()))?;
                    }
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

    /// Forwards a bus frame to the client, if its mode asks for it.
    ///
    /// Returns whether the frame was sent.
    pub fn send_message(&mut self, msg: &Message) -> Result<bool> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        match self.session.frame_response(msg, now) {
            Some(resp) => {
                self.write_response(&resp)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ===== Server =====

/// Accepts client connections.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    channels: Vec<String>,
}

impl Server {
    /// Listens on `addr`, offering the named buses.
    pub fn bind<A, I, S>(addr: A, channels: I) -> Result<Self>
    where
        A: ToSocketAddrs,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let listener = TcpListener::bind(addr)?;
        let channels = channels.into_iter().map(Into::into).collect();
        Ok(Self {
            listener,
            channels,
        })
    }

    /// The address the server listens on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The buses offered to clients.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Waits for a client and greets it.
    pub fn accept(&self) -> Result<Connection<TcpStream>> {
        let (stream, peer) = self.listener.accept()?;
        debug!("Client connected from {}", peer);
        stream.set_nodelay(true)?;

        let mut conn = Connection::new(stream, Session::new(self.channels.clone()));
        conn.greet()?;
        Ok(conn)
    }

    /// A beacon announcing this server.
    pub fn beacon(&self, name: &str, device_type: DeviceType) -> io::Result<Beacon> {
        let addr = self.local_addr()?;
        Ok(Beacon {
            name: name.to_string(),
            device_type,
            description: None,
            host: addr.ip().to_string(),
            port: addr.port(),
            buses: self.channels.clone(),
        })
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CanDataFrame, CanFdFrame};
    use embedded_can::{ExtendedId, Frame as EmbeddedFrame, StandardId};

    /// A stream with canned input that records the output.
    struct MockStream {
        input: io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(input: &str) -> Self {
            Self {
                input: io::Cursor::new(input.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }

        fn output(&self) -> &str {
            std::str::from_utf8(&self.output).unwrap()
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn cmd(s: &str) -> Command {
        Command::parse(s).unwrap()
    }

    #[test]
    fn test_greeting_once() {
        let mut session = Session::default();
        assert_eq!(session.greeting(), Some(Response::Hi));
        assert_eq!(session.greeting(), None);

        session.reset();
        assert_eq!(session.greeting(), Some(Response::Hi));
    }

    #[test]
    fn test_open_and_modes() {
        let mut session = Session::new(["can0"]);
        assert_eq!(session.mode(), Mode::NoBus);

        assert!(matches!(
            session.handle(cmd("< rawmode >")),
            Action::Reply(Response::Error(_))
        ));
        assert!(matches!(
            session.handle(cmd("< open can1 >")),
            Action::Reply(Response::Error(_))
        ));

        assert_eq!(
            session.handle(cmd("< open can0 >")),
            Action::Reply(Response::Ok)
        );
        assert_eq!(session.mode(), Mode::Broadcast);
        assert_eq!(session.channel(), Some("can0"));

        assert!(matches!(
            session.handle(cmd("< open can0 >")),
            Action::Reply(Response::Error(_))
        ));

        assert_eq!(
            session.handle(cmd("< rawmode >")),
            Action::Reply(Response::Ok)
        );
        assert_eq!(session.mode(), Mode::Raw);

        assert_eq!(
            session.handle(cmd("< controlmode >")),
            Action::Reply(Response::Ok)
        );
        assert_eq!(session.mode(), Mode::Control);
    }

    #[test]
    fn test_echo_any_mode() {
        let mut session = Session::default();
        assert_eq!(
            session.handle(Command::Echo),
            Action::Reply(Response::Echo)
        );
    }

    #[test]
    fn test_transmit() {
        let mut session = Session::default();
        session.handle(cmd("< open vcan0 >"));

        let action = session.handle(cmd("< send 123 2 01 02 >"));
        let frame = CanDataFrame::new(StandardId::new(0x123).unwrap(), &[1, 2]).unwrap();
        assert_eq!(
            action,
            Action::Transmit {
                channel: "vcan0".into(),
                frame: frame.into(),
            }
        );

        session.handle(Command::RawMode);
        let action = session.handle(cmd("< fdsend 00C0FFEE 0 4 00 01 02 03 >"));
        match action {
            Action::Transmit { frame, .. } => {
                assert!(frame.is_fd());
                assert!(frame.is_extended());
            }
            _ => panic!("expected a transmit, got {:?}", action),
        }

        session.handle(Command::ControlMode);
        assert!(matches!(
            session.handle(cmd("< send 123 0 >")),
            Action::Reply(Response::Error(_))
        ));
    }

    #[test]
    fn test_forward() {
        let mut session = Session::default();
        session.handle(cmd("< open can0 >"));

        let add = cmd("< add 1 0 123 1 FF >");
        assert_eq!(session.handle(add.clone()), Action::Forward(add));

        let stats = cmd("< statistics 1000 >");
        assert!(matches!(
            session.handle(stats.clone()),
            Action::Reply(Response::Error(_))
        ));

        session.handle(Command::ControlMode);
        assert_eq!(session.handle(stats.clone()), Action::Forward(stats));

        session.handle(Command::RawMode);
        assert!(matches!(
            session.handle(cmd("< subscribe 0 0 123 >")),
            Action::Reply(Response::Error(_))
        ));
    }

    #[test]
    fn test_frame_response_raw_only() {
        let mut session = Session::default();
        let frame = CanFdFrame::new(ExtendedId::new(0xC0FFEE).unwrap(), &[0, 1, 2, 3]).unwrap();
        let msg = Message::new(frame);
        let now = Duration::from_secs(1);

        assert_eq!(session.frame_response(&msg, now), None);
        session.handle(cmd("< open can0 >"));
        assert_eq!(session.frame_response(&msg, now), None);
        session.handle(Command::RawMode);

        let resp = session.frame_response(&msg, now).unwrap();
        assert_eq!(resp.to_string(), "< fdframe 00C0FFEE 1.000000 0 00010203 >");

        let other = Message::received(frame, now, "can1");
        assert_eq!(session.frame_response(&other, now), None);
    }

    #[test]
    fn test_connection_script() {
        let stream = MockStream::new(
            "< open can0 >< rawmode >< bogus >< echo >< send 00000123 1 AA >< delete 123 >",
        );
        let mut conn = Connection::new(stream, Session::new(["can0"]));

        let action = conn.next_action().unwrap();
        assert!(matches!(action, Action::Transmit { ref channel, .. } if channel == "can0"));

        // delete isn't valid in raw mode
        assert!(matches!(conn.next_action(), Err(Error::Closed)));

        let out = conn.get_ref().output();
        assert!(out.starts_with("< hi >< ok >< ok >< error Unknown command: bogus >< echo >"));
        assert!(out.ends_with("< error delete not available in raw mode >"));
    }

    #[test]
    fn test_connection_forwards_frames() {
        let mut conn = Connection::new(MockStream::new(""), Session::default());
        conn.session.handle(cmd("< open can0 >"));

        let frame = CanDataFrame::new(StandardId::new(0x10).unwrap(), &[0xAB]).unwrap();
        let msg = Message::received(frame, Duration::new(2, 0), "can0");
        assert!(!conn.send_message(&msg).unwrap());

        conn.session.handle(Command::RawMode);
        assert!(conn.send_message(&msg).unwrap());
        assert_eq!(conn.get_ref().output(), "< frame 010 2.000000 AB >");
    }

    #[test]
    fn test_server_beacon() {
        let server = Server::bind("127.0.0.1:0", ["can0", "can1"]).unwrap();
        let port = server.local_addr().unwrap().port();
        let beacon = server.beacon("bench", DeviceType::Embedded).unwrap();
        assert_eq!(beacon.host, "127.0.0.1");
        assert_eq!(beacon.port, port);
        assert_eq!(beacon.buses, server.channels());
    }
}
