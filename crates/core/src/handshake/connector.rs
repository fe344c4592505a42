use std::io::{Read, Write};

use super::{HandshakeResult, ServiceId, NONCE_LEN};
use crate::error::{NetError, Result};

/// Client side of the 4-step handshake (steps 3-4): read the
/// acceptor's nonce and echo `serviceId + serviceOpt + r + (r+1)` back.
pub fn connect_handshake<S: Read + Write>(
    stream: &mut S,
    service_id: ServiceId,
    service_opt: u8,
) -> Result<HandshakeResult> {
    let mut nonce_buf = [0u8; NONCE_LEN];
    stream.read_exact(&mut nonce_buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::WouldBlock => NetError::HsTimeout,
        _ => NetError::Io(e),
    })?;
    let r = u64::from_be_bytes(nonce_buf);

    stream
        .write_all(&[service_id as u8, service_opt])
        .map_err(NetError::Io)?;
    stream.write_all(&r.to_be_bytes()).map_err(NetError::Io)?;
    stream
        .write_all(&r.wrapping_add(1).to_be_bytes())
        .map_err(NetError::Io)?;

    Ok(HandshakeResult {
        service_id,
        service_opt,
    })
}
