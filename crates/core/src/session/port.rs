//! Even/odd RTP port-pair allocation, grounded on
//! `CRtpSessionTcpserver::Init`'s port-selection loop: an even local
//! port is reserved for the RTP socket itself, and its odd successor is
//! held by a throwaway ("dummy") bound socket so nothing else can steal
//! it before the caller binds its own RTCP/companion channel there.

use std::net::{SocketAddr, TcpListener, UdpSocket};

use crate::error::{NetError, Result};

pub const MAX_TRY_TIMES: u32 = 100;

/// An even local port plus a bound dummy socket holding its odd
/// successor. Drop this to release the reservation once the caller has
/// bound its own socket to `port + 1`.
pub struct PortPairReservation {
    pub port: u16,
    dummy: Option<UdpSocket>,
}

impl PortPairReservation {
    pub fn odd_port(&self) -> u16 {
        self.port + 1
    }
}

/// Try up to [`MAX_TRY_TIMES`] candidate ports from the OS's ephemeral
/// range until an even one is free (and, if even, its odd successor is
/// also free long enough to reserve). If `requested_port` is non-zero,
/// only that exact port is tried once.
pub fn alloc_port_pair(bind_ip: &str, requested_port: u16) -> Result<PortPairReservation> {
    let attempts = if requested_port > 0 { 1 } else { MAX_TRY_TIMES };

    for _ in 0..attempts {
        let candidate = if requested_port > 0 {
            requested_port
        } else {
            0 // ask the OS for an ephemeral port, then check its parity
        };

        let probe = bind_udp(bind_ip, candidate)?;
        let local_port = probe.local_addr().map_err(NetError::Io)?.port();

        if local_port % 2 != 0 {
            // odd candidate: no companion to reserve, accept as-is only
            // when the caller asked for this exact port.
            if requested_port > 0 {
                return Ok(PortPairReservation {
                    port: local_port,
                    dummy: None,
                });
            }
            continue;
        }

        match bind_udp(bind_ip, local_port + 1) {
            Ok(dummy) => {
                return Ok(PortPairReservation {
                    port: local_port,
                    dummy: Some(dummy),
                });
            }
            Err(_) => continue, // odd companion taken; retry a fresh pair
        }
    }

    Err(NetError::PortExhausted(attempts))
}

fn bind_udp(ip: &str, port: u16) -> Result<UdpSocket> {
    let addr: SocketAddr = format!("{ip}:{port}")
        .parse()
        .map_err(|_| NetError::HsProtocol(format!("bad bind address {ip}:{port}")))?;
    UdpSocket::bind(addr).map_err(NetError::Io)
}

/// Same reservation scheme for a TCP acceptor's listening port.
pub fn alloc_tcp_port_pair(bind_ip: &str, requested_port: u16) -> Result<(TcpListener, PortPairReservation)> {
    let attempts = if requested_port > 0 { 1 } else { MAX_TRY_TIMES };

    for _ in 0..attempts {
        let candidate = requested_port;
        let addr: SocketAddr = format!("{bind_ip}:{candidate}")
            .parse()
            .map_err(|_| NetError::HsProtocol(format!("bad bind address {bind_ip}:{candidate}")))?;

        let listener = match TcpListener::bind(addr) {
            Ok(l) => l,
            Err(_) => continue,
        };
        let local_port = listener.local_addr().map_err(NetError::Io)?.port();

        if local_port % 2 != 0 {
            if requested_port > 0 {
                return Ok((
                    listener,
                    PortPairReservation {
                        port: local_port,
                        dummy: None,
                    },
                ));
            }
            drop(listener);
            continue;
        }

        match bind_udp(bind_ip, local_port + 1) {
            Ok(dummy) => {
                return Ok((
                    listener,
                    PortPairReservation {
                        port: local_port,
                        dummy: Some(dummy),
                    },
                ));
            }
            Err(_) => continue,
        }
    }

    Err(NetError::PortExhausted(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_even_port_with_reserved_odd_companion() {
        let reservation = alloc_port_pair("127.0.0.1", 0).unwrap();
        assert_eq!(reservation.port % 2, 0);
        assert_eq!(reservation.odd_port(), reservation.port + 1);
        // the odd companion must be genuinely held: binding it again fails
        assert!(bind_udp("127.0.0.1", reservation.odd_port()).is_err());
    }

    #[test]
    fn requested_port_is_honored_when_free() {
        let probe = bind_udp("127.0.0.1", 0).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        // not guaranteed even, but the explicit-port path should still
        // succeed against whatever the OS handed us.
        let reservation = alloc_port_pair("127.0.0.1", port);
        assert!(reservation.is_ok());
    }
}
