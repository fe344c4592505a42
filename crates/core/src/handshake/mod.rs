//! Acceptor/connector handshake: the 4-step nonce exchange every
//! connection-oriented transport runs immediately after `connect()`/
//! `accept()`, before any session traffic flows. Grounded on
//! `pro_connector.h`'s flow chart:
//!
//! ```text
//! 1) client -----> connect()                          -----> server
//! 2) client <----- accept()                           <----- server
//! 3) client <----- nonce                              <----- server
//! 4) client -----> serviceId + serviceOpt + r + (r+1) -----> server
//! ```
//!
//! The nonce is an 8-byte random value `r`; echoing back `r` and `r+1`
//! (as big-endian u64, wrapping) proves the peer actually read what the
//! acceptor sent rather than replaying a captured handshake from a
//! different TCP connection. `serviceId`/`serviceOpt` let one listening
//! port multiplex several session kinds (plain TCP_EX vs SSL_EX vs the
//! message-server C2S port), mirroring `RTP_ST_*`/`service` in the
//! original. The nonce width matches `PRO_UINT64 nonce` in
//! `rtp_session_tcpserver.cpp`.
//!
//! For the `_EX` session variants, [`info::exchange_as_acceptor`]/
//! [`info::exchange_as_connector`] run immediately afterwards, over the
//! same stream, to swap `RTP_SESSION_INFO`.

pub mod acceptor;
pub mod connector;
pub mod info;

use std::time::Duration;

/// Default handshake watchdog, matching the session connect timeout
/// used elsewhere in the stack (spec §4.2).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const NONCE_LEN: usize = 8;

/// Service identifiers multiplexed on a single acceptor port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceId {
    /// Plain RTP session traffic (TCP_EX).
    Rtp = 0,
    /// TLS-wrapped RTP session traffic (SSL_EX).
    RtpOverSsl = 1,
    /// Messaging-fabric client connecting to the C2S relay.
    Message = 2,
}

impl ServiceId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ServiceId::Rtp),
            1 => Some(ServiceId::RtpOverSsl),
            2 => Some(ServiceId::Message),
            _ => None,
        }
    }
}

/// Outcome of a completed handshake, handed to the transport layer so
/// it can construct the right session variant.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeResult {
    pub service_id: ServiceId,
    pub service_opt: u8,
}

fn next_nonce() -> u64 {
    use rand::Rng;
    rand::rng().random::<u64>()
}
