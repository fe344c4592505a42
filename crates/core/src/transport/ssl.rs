//! TLS-wrapped TCP transport (the `SSL_EX` session variants), built as
//! a thin layer on top of [`super::tcp`]'s framing: the same
//! self-describing RTP wire frames travel inside the TLS record layer
//! instead of directly over the socket. Non-blocking record pumping
//! follows the standard `rustls` non-blocking pattern (read_tls →
//! process_new_packets → drain plaintext → write_tls).

use std::io::{Read, Write};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mio::{Interest, Token};
use parking_lot::Mutex;

use crate::error::NetError;
use crate::packet::RtpPacket;
use crate::reactor::{EventHandler, ReactorHandle};
use crate::session::wrapper::{SessionTransport, SessionWrapper};

use super::heartbeat::HeartbeatMonitor;
use super::FrameReassembler;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Either side of a TLS connection, unified so the rest of this module
/// doesn't need to care which one it's driving.
pub enum TlsSide {
    Client(rustls::ClientConnection),
    Server(rustls::ServerConnection),
}

impl TlsSide {
    fn is_handshaking(&self) -> bool {
        match self {
            TlsSide::Client(c) => c.is_handshaking(),
            TlsSide::Server(c) => c.is_handshaking(),
        }
    }
    fn wants_read(&self) -> bool {
        match self {
            TlsSide::Client(c) => c.wants_read(),
            TlsSide::Server(c) => c.wants_read(),
        }
    }
    fn wants_write(&self) -> bool {
        match self {
            TlsSide::Client(c) => c.wants_write(),
            TlsSide::Server(c) => c.wants_write(),
        }
    }
    fn read_tls(&mut self, rd: &mut dyn Read) -> std::io::Result<usize> {
        match self {
            TlsSide::Client(c) => c.read_tls(rd),
            TlsSide::Server(c) => c.read_tls(rd),
        }
    }
    fn write_tls(&mut self, wr: &mut dyn Write) -> std::io::Result<usize> {
        match self {
            TlsSide::Client(c) => c.write_tls(wr),
            TlsSide::Server(c) => c.write_tls(wr),
        }
    }
    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            TlsSide::Client(c) => c.process_new_packets(),
            TlsSide::Server(c) => c.process_new_packets(),
        }
    }
    fn read_plaintext(&mut self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 4096];
        loop {
            let n = match self {
                TlsSide::Client(c) => c.reader().read(&mut buf),
                TlsSide::Server(c) => c.reader().read(&mut buf),
            };
            match n {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(_) => break, // WouldBlock (no more plaintext ready) or EOF
            }
        }
    }
    fn write_plaintext(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            TlsSide::Client(c) => c.writer().write_all(data),
            TlsSide::Server(c) => c.writer().write_all(data),
        }
    }
}

pub struct SslTransport {
    stream: Mutex<mio::net::TcpStream>,
    tls: Mutex<TlsSide>,
    reassembler: Mutex<FrameReassembler>,
    session: Mutex<Weak<SessionWrapper>>,
    heartbeat: HeartbeatMonitor,
    reactor: ReactorHandle,
    token: Mutex<Option<Token>>,
}

impl SslTransport {
    pub fn new(stream: mio::net::TcpStream, tls: TlsSide, reactor: ReactorHandle) -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(stream),
            tls: Mutex::new(tls),
            reassembler: Mutex::new(FrameReassembler::new()),
            session: Mutex::new(Weak::new()),
            heartbeat: HeartbeatMonitor::new(DEFAULT_IDLE_TIMEOUT),
            reactor,
            token: Mutex::new(None),
        })
    }

    pub fn attach(self: &Arc<Self>, session: &Arc<SessionWrapper>) -> std::io::Result<()> {
        let weak_self: Weak<dyn EventHandler> = Arc::downgrade(self) as Weak<dyn EventHandler>;
        let token = {
            let mut stream = self.stream.lock();
            self.reactor
                .register(&mut *stream, Interest::READABLE | Interest::WRITABLE, weak_self)?
        };
        *self.token.lock() = Some(token);
        *self.session.lock() = Arc::downgrade(session);
        session.bind_transport(self.clone() as Arc<dyn SessionTransport>);
        Ok(())
    }

    fn close(&self, error: Option<NetError>) {
        if let Some(token) = self.token.lock().take() {
            let mut stream = self.stream.lock();
            self.reactor.deregister(&mut *stream, token).ok();
        }
        if let Some(session) = self.session.lock().upgrade() {
            session.on_close(error);
        }
    }

    /// Drive the TLS record layer: pull ciphertext off the socket,
    /// process it, surface any plaintext to the reassembler, flush any
    /// pending writes. Called on every readable/writable event.
    fn pump(&self) {
        let mut tls = self.tls.lock();
        let mut stream = self.stream.lock();
        let was_handshaking = tls.is_handshaking();

        if tls.wants_read() {
            match tls.read_tls(&mut *stream) {
                Ok(0) => {
                    drop(tls);
                    drop(stream);
                    self.close(None);
                    return;
                }
                Ok(_) => {
                    if let Err(e) = tls.process_new_packets() {
                        drop(tls);
                        drop(stream);
                        self.close(Some(NetError::SslFail {
                            ssl_code: 0,
                            detail: e.to_string(),
                        }));
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    drop(tls);
                    drop(stream);
                    self.close(Some(NetError::Io(e)));
                    return;
                }
            }
        }

        if tls.wants_write() {
            match tls.write_tls(&mut *stream) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    drop(tls);
                    drop(stream);
                    self.close(Some(NetError::Io(e)));
                    return;
                }
            }
        }

        let just_finished_handshake = was_handshaking && !tls.is_handshaking();

        let mut plaintext = Vec::new();
        tls.read_plaintext(&mut plaintext);
        drop(tls);
        drop(stream);

        if just_finished_handshake {
            if let Some(session) = self.session.lock().upgrade() {
                session.on_ok();
            }
        }

        if !plaintext.is_empty() {
            self.heartbeat.touch();
            let frames = {
                let mut reassembler = self.reassembler.lock();
                reassembler.feed(&plaintext);
                reassembler.drain_frames()
            };
            match frames {
                Ok(frames) => {
                    if let Some(session) = self.session.lock().upgrade() {
                        for frame in frames {
                            session.on_input(frame);
                        }
                    }
                }
                Err(e) => self.close(Some(e)),
            }
        }
    }

    pub fn is_dead(&self) -> bool {
        self.heartbeat.is_dead()
    }
}

impl EventHandler for SslTransport {
    fn on_readable(&self, _reactor: &ReactorHandle) {
        self.pump();
    }

    fn on_writable(&self, _reactor: &ReactorHandle) {
        self.pump();
        if let Some(session) = self.session.lock().upgrade() {
            session.drain();
        }
    }
}

impl SessionTransport for SslTransport {
    fn send_packet(&self, packet: &RtpPacket) -> bool {
        let wire = packet.to_wire();
        {
            let mut tls = self.tls.lock();
            if tls.write_plaintext(&wire).is_err() {
                return false;
            }
        }
        self.pump();
        true
    }
}
