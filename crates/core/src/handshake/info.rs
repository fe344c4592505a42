//! The `RTP_SESSION_INFO` swap that follows the 4-step handshake for
//! the `_EX` session variants (spec §4.4, §6): immediately after the
//! `serviceId/serviceOpt/r/(r+1)` exchange, both sides trade protocol
//! version and application fields, and only then does `OnOkSession`
//! fire. Runs on the same blocking stream as the 4-step handshake,
//! before the socket is handed to the reactor.

use std::io::{Read, Write};

use crate::error::{NetError, Result};
use crate::session::SessionInfo;

const PASSWORD_HASH_LEN: usize = 32;
const USER_DATA_LEN: usize = 64;

pub const SESSION_INFO_WIRE_LEN: usize = 4 + 4 + 4 + 4 + PASSWORD_HASH_LEN + USER_DATA_LEN;

struct PeerInfo {
    local_version: u32,
    remote_version: u32,
    out_src_mm_id: u32,
}

fn write_wire<W: Write>(w: &mut W, info: &SessionInfo) -> Result<()> {
    w.write_all(&info.local_version.to_be_bytes()).map_err(NetError::Io)?;
    w.write_all(&info.remote_version.to_be_bytes()).map_err(NetError::Io)?;
    w.write_all(&info.in_src_mm_id.to_be_bytes()).map_err(NetError::Io)?;
    w.write_all(&info.out_src_mm_id.to_be_bytes()).map_err(NetError::Io)?;
    w.write_all(&info.password_hash).map_err(NetError::Io)?;
    w.write_all(&info.user_data).map_err(NetError::Io)?;
    Ok(())
}

fn read_wire<R: Read>(r: &mut R) -> Result<PeerInfo> {
    let mut buf = [0u8; SESSION_INFO_WIRE_LEN];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::WouldBlock => NetError::HsTimeout,
        _ => NetError::Io(e),
    })?;
    let local_version = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let remote_version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    // buf[8..12] is the peer's inSrcMmId, not needed by the caller.
    let out_src_mm_id = u32::from_be_bytes(buf[12..16].try_into().unwrap());
    Ok(PeerInfo {
        local_version,
        remote_version,
        out_src_mm_id,
    })
}

/// Acceptor side: read the connector's info, then echo our own back
/// with `remoteVersion` filled in from what we just learned. Updates
/// `local` in place so the caller can hand the settled `SessionInfo`
/// straight to `SessionWrapper::new`.
pub fn exchange_as_acceptor<S: Read + Write>(stream: &mut S, local: &mut SessionInfo) -> Result<()> {
    let peer = read_wire(stream)?;
    local.remote_version = peer.local_version;
    local.in_src_mm_id = peer.out_src_mm_id;
    write_wire(stream, local)?;
    Ok(())
}

/// Connector side: send our info first, then read the acceptor's echo.
pub fn exchange_as_connector<S: Read + Write>(stream: &mut S, local: &mut SessionInfo) -> Result<()> {
    write_wire(stream, local)?;
    let peer = read_wire(stream)?;
    local.remote_version = peer.remote_version;
    local.in_src_mm_id = peer.out_src_mm_id;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MmType;
    use crate::session::SessionType;
    use std::sync::mpsc::channel;
    use std::thread;

    struct ChannelStream {
        tx: std::sync::mpsc::Sender<Vec<u8>>,
        rx: std::sync::mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }
    impl Read for ChannelStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            while self.pending.len() < buf.len() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending.extend(chunk),
                    Err(_) => break,
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }
    impl Write for ChannelStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.tx.send(buf.to_vec()).ok();
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn connector_learns_the_acceptors_version_and_vice_versa() {
        let (to_server, from_client) = channel::<Vec<u8>>();
        let (to_client, from_server) = channel::<Vec<u8>>();

        let server_thread = thread::spawn(move || {
            let mut s = ChannelStream {
                tx: to_client,
                rx: from_client,
                pending: Vec::new(),
            };
            let mut local = SessionInfo::new(SessionType::TcpServerEx, 1 as MmType, 1);
            local.local_version = 7;
            exchange_as_acceptor(&mut s, &mut local).unwrap();
            local
        });

        let mut c = ChannelStream {
            tx: to_server,
            rx: from_server,
            pending: Vec::new(),
        };
        let mut client_local = SessionInfo::new(SessionType::TcpClientEx, 1 as MmType, 1);
        client_local.local_version = 3;
        exchange_as_connector(&mut c, &mut client_local).unwrap();

        let server_local = server_thread.join().unwrap();
        assert_eq!(client_local.remote_version, 7);
        assert_eq!(server_local.remote_version, 3);
    }
}
