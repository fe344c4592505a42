use std::io::{Read, Write};

use super::{next_nonce, HandshakeResult, ServiceId, NONCE_LEN};
use crate::error::{NetError, Result};

const REPLY_LEN: usize = 1 + 1 + NONCE_LEN + NONCE_LEN;

/// Server side of the 4-step handshake (steps 3-4). The caller is
/// responsible for having just `accept()`-ed `stream` and for arming
/// whatever read timeout it wants enforced (`set_read_timeout` on a
/// `TcpStream`, or the reactor's own handshake watchdog timer).
pub fn accept_handshake<S: Read + Write>(stream: &mut S) -> Result<HandshakeResult> {
    let nonce = next_nonce();
    stream.write_all(&nonce.to_be_bytes()).map_err(NetError::Io)?;

    let mut reply = [0u8; REPLY_LEN];
    stream.read_exact(&mut reply).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::WouldBlock => NetError::HsTimeout,
        _ => NetError::Io(e),
    })?;

    let service_id = reply[0];
    let service_opt = reply[1];
    let echoed_r = u64::from_be_bytes(reply[2..2 + NONCE_LEN].try_into().unwrap());
    let echoed_r_plus_1 = u64::from_be_bytes(reply[2 + NONCE_LEN..].try_into().unwrap());

    if echoed_r != nonce {
        return Err(NetError::HsProtocol("nonce echo mismatch".into()));
    }
    if echoed_r_plus_1 != nonce.wrapping_add(1) {
        return Err(NetError::HsProtocol("nonce+1 echo mismatch".into()));
    }

    let service_id = ServiceId::from_u8(service_id)
        .ok_or_else(|| NetError::HsProtocol(format!("unknown serviceId {service_id}")))?;

    Ok(HandshakeResult {
        service_id,
        service_opt,
    })
}
