//! Non-blocking TCP transport, driven entirely by the reactor. Frames
//! are self-describing RTP wire frames (spec §6); reads are reassembled
//! by [`FrameReassembler`], writes are best-effort non-blocking sends
//! with the bucket in [`crate::session::wrapper::SessionWrapper`]
//! absorbing backpressure.

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

const READ_CHUNK: usize = 16 * 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TcpTransport {
    stream: Mutex<mio::net::TcpStream>,
    reassembler: Mutex<FrameReassembler>,
    session: Mutex<Weak<SessionWrapper>>,
    heartbeat: HeartbeatMonitor,
    reactor: ReactorHandle,
    token: Mutex<Option<Token>>,
}

impl TcpTransport {
    pub fn new(stream: mio::net::TcpStream, reactor: ReactorHandle) -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(stream),
            reassembler: Mutex::new(FrameReassembler::new()),
            session: Mutex::new(Weak::new()),
            heartbeat: HeartbeatMonitor::new(DEFAULT_IDLE_TIMEOUT),
            reactor,
            token: Mutex::new(None),
        })
    }

    /// Register with the reactor and bind to `session` in both
    /// directions (session holds us as its `SessionTransport`, we hold
    /// it weakly to avoid a reference cycle).
    pub fn attach(self: &Arc<Self>, session: &Arc<SessionWrapper>) -> std::io::Result<()> {
        let weak_self: Weak<dyn EventHandler> = Arc::downgrade(self) as Weak<dyn EventHandler>;
        let token = {
            let mut stream = self.stream.lock();
            self.reactor
                .register(&mut *stream, Interest::READABLE | Interest::WRITABLE, weak_self)?
        };
        *self.token.lock() = Some(token);
        *self.session.lock() = Arc::downgrade(session);
        self.heartbeat.touch();
        session.bind_transport(self.clone() as Arc<dyn SessionTransport>);
        session.on_ok();
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

    pub fn is_dead(&self) -> bool {
        self.heartbeat.is_dead()
    }
}

impl EventHandler for TcpTransport {
    fn on_readable(&self, _reactor: &ReactorHandle) {
        self.heartbeat.touch();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let read = {
                let mut stream = self.stream.lock();
                stream.read(&mut buf)
            };

            match read {
                Ok(0) => {
                    self.close(None);
                    break;
                }
                Ok(n) => {
                    let frames = {
                        let mut reassembler = self.reassembler.lock();
                        reassembler.feed(&buf[..n]);
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
                        Err(e) => {
                            self.close(Some(e));
                            break;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.close(Some(NetError::Io(e)));
                    break;
                }
            }
        }
    }

    fn on_writable(&self, _reactor: &ReactorHandle) {
        self.heartbeat.touch();
        if let Some(session) = self.session.lock().upgrade() {
            session.drain();
        }
    }
}

impl SessionTransport for TcpTransport {
    fn send_packet(&self, packet: &RtpPacket) -> bool {
        let wire = packet.to_wire();
        let mut stream = self.stream.lock();
        match stream.write(&wire) {
            Ok(n) if n == wire.len() => {
                self.heartbeat.touch();
                true
            }
            // A short write on a non-blocking stream means the send
            // buffer filled mid-frame; we don't attempt partial-frame
            // buffering, so treat it as backpressure like a `WouldBlock`.
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => false,
        }
    }

    fn request_on_send(&self) {
        // Already registered for `Interest::WRITABLE`; the next
        // writable event drains the bucket via `on_writable`.
    }
}
