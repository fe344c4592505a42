//! Non-blocking UDP transport. Unlike TCP, a datagram already is one
//! complete RTP wire frame — no reassembly needed, but also no
//! delivery guarantee, which is exactly why [`crate::reorder`] exists
//! upstream of this in the session wrapper.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use mio::{Interest, Token};
use parking_lot::Mutex;

use crate::error::NetError;
use crate::packet::RtpPacket;
use crate::reactor::{EventHandler, ReactorHandle};
use crate::session::wrapper::{SessionTransport, SessionWrapper};

use super::heartbeat::HeartbeatMonitor;

const RECV_BUF_SIZE: usize = 2048;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UdpTransport {
    socket: Mutex<mio::net::UdpSocket>,
    session: Mutex<Weak<SessionWrapper>>,
    /// The first peer a datagram arrives from becomes `remote` for the
    /// lifetime of the session (RTP sessions are point-to-point even
    /// over a connectionless socket).
    remote: Mutex<Option<SocketAddr>>,
    heartbeat: HeartbeatMonitor,
    reactor: ReactorHandle,
    token: Mutex<Option<Token>>,
}

impl UdpTransport {
    pub fn new(socket: mio::net::UdpSocket, reactor: ReactorHandle) -> Arc<Self> {
        Arc::new(Self {
            socket: Mutex::new(socket),
            session: Mutex::new(Weak::new()),
            remote: Mutex::new(None),
            heartbeat: HeartbeatMonitor::new(DEFAULT_IDLE_TIMEOUT),
            reactor,
            token: Mutex::new(None),
        })
    }

    /// Pre-bind to a known peer (the `UdpClient` variant, which already
    /// knows where it's sending).
    pub fn set_remote(&self, addr: SocketAddr) {
        *self.remote.lock() = Some(addr);
    }

    pub fn attach(self: &Arc<Self>, session: &Arc<SessionWrapper>) -> std::io::Result<()> {
        let weak_self: Weak<dyn EventHandler> = Arc::downgrade(self) as Weak<dyn EventHandler>;
        let token = {
            let mut socket = self.socket.lock();
            self.reactor.register(&mut *socket, Interest::READABLE, weak_self)?
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
            let mut socket = self.socket.lock();
            self.reactor.deregister(&mut *socket, token).ok();
        }
        if let Some(session) = self.session.lock().upgrade() {
            session.on_close(error);
        }
    }

    pub fn is_dead(&self) -> bool {
        self.heartbeat.is_dead()
    }
}

impl EventHandler for UdpTransport {
    fn on_readable(&self, _reactor: &ReactorHandle) {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            let recvd = {
                let socket = self.socket.lock();
                socket.recv_from(&mut buf)
            };

            match recvd {
                Ok((n, peer)) => {
                    self.heartbeat.touch();
                    if self.remote.lock().is_none() {
                        *self.remote.lock() = Some(peer);
                    }
                    if *self.remote.lock() != Some(peer) {
                        continue; // datagram from an unexpected peer, ignore
                    }
                    match RtpPacket::from_wire(&buf[..n]) {
                        Ok(packet) => {
                            if let Some(session) = self.session.lock().upgrade() {
                                session.on_input(packet);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "dropped malformed UDP frame");
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
}

impl SessionTransport for UdpTransport {
    fn send_packet(&self, packet: &RtpPacket) -> bool {
        let Some(remote) = *self.remote.lock() else {
            return false;
        };
        let wire = packet.to_wire();
        let socket = self.socket.lock();
        match socket.send_to(&wire, remote) {
            Ok(n) if n == wire.len() => {
                self.heartbeat.touch();
                true
            }
            _ => false,
        }
    }
}
