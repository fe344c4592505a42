//! Multicast UDP transport: join-on-create for the plain `Mcast`
//! variant, dynamic add/remove of additional receive groups for
//! `McastEx`. Grounded on `CRtpSessionMcastEx::AddMcastReceiver`/
//! `RemoveMcastReceiver` in `rtp_session_mcast_ex.h` — the original
//! joins one fixed group at `Init` and lets `_Ex` sessions join or
//! leave further groups without tearing the session down. Sends
//! default to the session's primary group but can be retargeted to a
//! specific unicast peer, mirroring how the original's `SendPacket`
//! accepts an explicit destination.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
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

pub struct McastTransport {
    socket: Mutex<mio::net::UdpSocket>,
    session: Mutex<Weak<SessionWrapper>>,
    local_iface: Ipv4Addr,
    /// Where a packet goes when no explicit destination has been set;
    /// starts out as the group the session was created with.
    send_target: Mutex<SocketAddr>,
    /// Every group currently joined for receive, the primary group
    /// included. `McastEx` sessions grow and shrink this at runtime.
    joined: Mutex<HashSet<Ipv4Addr>>,
    heartbeat: HeartbeatMonitor,
    reactor: ReactorHandle,
    token: Mutex<Option<Token>>,
}

impl McastTransport {
    /// Binds `socket` and joins `group` on `local_iface`, matching
    /// `CRtpSessionMcastEx::Init`'s `mcastIp`/`localIp` pair.
    pub fn new(
        socket: mio::net::UdpSocket,
        reactor: ReactorHandle,
        group: SocketAddrV4,
        local_iface: Ipv4Addr,
    ) -> std::io::Result<Arc<Self>> {
        socket.join_multicast_v4(group.ip(), &local_iface)?;
        let mut joined = HashSet::new();
        joined.insert(*group.ip());
        Ok(Arc::new(Self {
            socket: Mutex::new(socket),
            session: Mutex::new(Weak::new()),
            local_iface,
            send_target: Mutex::new(SocketAddr::V4(group)),
            joined: Mutex::new(joined),
            heartbeat: HeartbeatMonitor::new(DEFAULT_IDLE_TIMEOUT),
            reactor,
            token: Mutex::new(None),
        }))
    }

    /// Retarget sends at a specific peer instead of the primary group
    /// (the "unicast-aware send" half of `MCAST_EX`).
    pub fn set_send_target(&self, addr: SocketAddr) {
        *self.send_target.lock() = addr;
    }

    /// `MCAST_EX`: join another receive group without disturbing the
    /// primary group or any in-flight sends.
    pub fn add_receiver(&self, group: Ipv4Addr) -> std::io::Result<()> {
        let mut joined = self.joined.lock();
        if joined.contains(&group) {
            return Ok(());
        }
        self.socket.lock().join_multicast_v4(&group, &self.local_iface)?;
        joined.insert(group);
        Ok(())
    }

    /// `MCAST_EX`: stop receiving from a previously-added group.
    pub fn remove_receiver(&self, group: Ipv4Addr) -> std::io::Result<()> {
        let mut joined = self.joined.lock();
        if !joined.remove(&group) {
            return Ok(());
        }
        self.socket.lock().leave_multicast_v4(&group, &self.local_iface)?;
        Ok(())
    }

    pub fn joined_groups(&self) -> Vec<Ipv4Addr> {
        self.joined.lock().iter().copied().collect()
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

impl EventHandler for McastTransport {
    fn on_readable(&self, _reactor: &ReactorHandle) {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            let recvd = {
                let socket = self.socket.lock();
                socket.recv_from(&mut buf)
            };

            match recvd {
                Ok((n, _peer)) => {
                    // Multicast is many-to-many by nature; unlike
                    // point-to-point UDP there's no single expected
                    // sender to filter against.
                    self.heartbeat.touch();
                    match RtpPacket::from_wire(&buf[..n]) {
                        Ok(packet) => {
                            if let Some(session) = self.session.lock().upgrade() {
                                session.on_input(packet);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "dropped malformed multicast frame");
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

impl SessionTransport for McastTransport {
    fn send_packet(&self, packet: &RtpPacket) -> bool {
        let target = *self.send_target.lock();
        let wire = packet.to_wire();
        let socket = self.socket.lock();
        match socket.send_to(&wire, target) {
            Ok(n) if n == wire.len() => {
                self.heartbeat.touch();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_iface() -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 0, 1)
    }

    fn bind_mcast_socket() -> mio::net::UdpSocket {
        mio::net::UdpSocket::bind("0.0.0.0:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn new_joins_the_primary_group() {
        let socket = bind_mcast_socket();
        let reactor = crate::reactor::ReactorPool::spawn(1).unwrap();
        let transport = McastTransport::new(
            socket,
            reactor.handle_for(0).clone(),
            SocketAddrV4::new(Ipv4Addr::new(239, 1, 2, 3), 0),
            local_iface(),
        )
        .unwrap();
        assert_eq!(transport.joined_groups(), vec![Ipv4Addr::new(239, 1, 2, 3)]);
        reactor.shutdown();
    }

    #[test]
    fn add_and_remove_receiver_tracks_membership() {
        let socket = bind_mcast_socket();
        let reactor = crate::reactor::ReactorPool::spawn(1).unwrap();
        let transport = McastTransport::new(
            socket,
            reactor.handle_for(0).clone(),
            SocketAddrV4::new(Ipv4Addr::new(239, 1, 2, 3), 0),
            local_iface(),
        )
        .unwrap();

        let extra = Ipv4Addr::new(239, 5, 6, 7);
        transport.add_receiver(extra).unwrap();
        let mut groups = transport.joined_groups();
        groups.sort();
        assert_eq!(groups, vec![Ipv4Addr::new(239, 1, 2, 3), extra]);

        transport.remove_receiver(extra).unwrap();
        assert_eq!(transport.joined_groups(), vec![Ipv4Addr::new(239, 1, 2, 3)]);
        reactor.shutdown();
    }

    #[test]
    fn set_send_target_overrides_the_primary_group() {
        let socket = bind_mcast_socket();
        let reactor = crate::reactor::ReactorPool::spawn(1).unwrap();
        let transport = McastTransport::new(
            socket,
            reactor.handle_for(0).clone(),
            SocketAddrV4::new(Ipv4Addr::new(239, 1, 2, 3), 0),
            local_iface(),
        )
        .unwrap();
        let unicast_peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        transport.set_send_target(unicast_peer);
        assert_eq!(*transport.send_target.lock(), unicast_peer);
        reactor.shutdown();
    }
}
