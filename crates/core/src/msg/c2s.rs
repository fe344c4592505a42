//! C2S relay (spec §4.10): one uplink session to a message broker, a
//! local accept-side service for downstream clients, and the
//! `(localSession, uplinkSubId)` table connecting the two. Grounded on
//! the same `rtp_msg_server.cpp` C2S protocol the broker side
//! implements, applied here from the other end of the wire.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::ConfigStream;
use crate::error::NetError;
use crate::packet::{RtpHeaderFields, RtpPacket};
use crate::session::wrapper::{SessionObserver, SessionWrapper};

use super::header::MsgHeader;
use super::link_ctx::SessionId;
use super::user::{RtpUser, ROOT_ID_C2S, SERVER_CID};

const TAG_MSG_NAME: &str = "msg_name";
const MSG_CLIENT_LOGIN: &str = "client_login";
const MSG_CLIENT_LOGIN_OK: &str = "client_login_ok";
const MSG_CLIENT_LOGIN_ERROR: &str = "client_login_error";
const MSG_CLIENT_LOGOUT: &str = "client_logout";
const TAG_CLIENT_INDEX: &str = "client_index";
const TAG_CLIENT_ID: &str = "client_id";
const TAG_CLIENT_PUBLIC_IP: &str = "client_public_ip";
const TAG_CLIENT_HASH_STRING: &str = "client_hash_string";
const TAG_CLIENT_NONCE: &str = "client_nonce";

/// Application hooks for events a [`C2sRelay`] can't resolve locally
/// (the uplink dropping, an inbound client message not addressed by
/// sub-user lookup).
pub trait C2sRelayObserver: Send + Sync {
    fn on_client_login_ok(&self, client_id: RtpUser) {
        let _ = client_id;
    }
    fn on_client_login_error(&self, client_index: u32) {
        let _ = client_index;
    }
    fn on_uplink_closed(&self, dropped: &[RtpUser], error: Option<&NetError>) {
        let _ = (dropped, error);
    }
}

struct ClientEntry {
    local: Arc<SessionWrapper>,
    sub_user: Option<RtpUser>,
}

/// Owns the uplink session and the downstream client table. Each local
/// client is identified by its [`SessionId`] until its `client_login`
/// round trip completes, at which point it gains a `sub_user` identity.
pub struct C2sRelay {
    uplink: Arc<SessionWrapper>,
    c2s_user: RtpUser,
    clients: Mutex<HashMap<SessionId, ClientEntry>>,
    by_sub_user: Mutex<HashMap<RtpUser, SessionId>>,
    next_local_id: Mutex<u64>,
    observer: Weak<dyn C2sRelayObserver>,
}

impl C2sRelay {
    pub fn new(uplink: Arc<SessionWrapper>, c2s_user: RtpUser, observer: Weak<dyn C2sRelayObserver>) -> Arc<Self> {
        Arc::new(Self {
            uplink,
            c2s_user,
            clients: Mutex::new(HashMap::new()),
            by_sub_user: Mutex::new(HashMap::new()),
            next_local_id: Mutex::new(1),
            observer,
        })
    }

    pub fn register_local_client(&self, local: Arc<SessionWrapper>) -> SessionId {
        let mut next = self.next_local_id.lock();
        let id = SessionId(*next);
        *next += 1;
        self.clients.lock().insert(id, ClientEntry { local, sub_user: None });
        id
    }

    pub fn unregister_local_client(&self, id: SessionId) {
        if let Some(entry) = self.clients.lock().remove(&id) {
            if let Some(sub_user) = entry.sub_user {
                self.by_sub_user.lock().remove(&sub_user);
            }
        }
    }

    /// Upstream: a local client's `client_login`/`client_logout`/data
    /// packet, forwarded to the broker with `srcUser` rewritten to the
    /// relay's own identity until login completes, then to the logged-in
    /// sub-user afterward.
    pub fn forward_upstream(&self, local_id: SessionId, body: &[u8]) {
        let sub_user = self
            .clients
            .lock()
            .get(&local_id)
            .and_then(|c| c.sub_user)
            .unwrap_or(self.c2s_user);

        let header = MsgHeader::to_one(0, sub_user, ROOT_ID_C2S);
        send(&self.uplink, &header, body);
    }

    /// Downstream: the broker's reply. Either a `client_login_ok` /
    /// `client_login_error` addressed to our own `c2s_user` (binds the
    /// local client that's still pending), or data addressed to an
    /// already-bound sub-user (forwarded to its local session).
    pub fn on_uplink_packet(&self, payload: &[u8]) {
        let Ok((header, body)) = MsgHeader::decode(payload) else {
            return;
        };
        let Some(&dst_user) = header.dst_users.first() else {
            return;
        };

        if dst_user == self.c2s_user {
            self.handle_login_reply(body);
            return;
        }

        let local_id = { self.by_sub_user.lock().get(&dst_user).copied() };
        let Some(local_id) = local_id else {
            return;
        };
        let Some(local) = self.clients.lock().get(&local_id).map(|c| c.local.clone()) else {
            return;
        };
        send_raw(&local, header.src_user, body);
    }

    fn handle_login_reply(&self, body: &[u8]) {
        let Ok(stream) = ConfigStream::parse(body) else {
            return;
        };
        let msg_name = stream.get(TAG_MSG_NAME).to_string();
        let client_index = stream.get_int(TAG_CLIENT_INDEX) as u32;

        if msg_name.eq_ignore_ascii_case(MSG_CLIENT_LOGIN_OK) {
            let Ok(client_id) = RtpUser::from_id_string(stream.get(TAG_CLIENT_ID)) else {
                return;
            };
            // client_index doubles as the pending local session id in
            // this relay's own login request (see request_login).
            let local_id = SessionId(client_index as u64);
            if let Some(entry) = self.clients.lock().get_mut(&local_id) {
                entry.sub_user = Some(client_id);
                self.by_sub_user.lock().insert(client_id, local_id);
            }
            if let Some(observer) = self.observer.upgrade() {
                observer.on_client_login_ok(client_id);
            }
        } else if msg_name.eq_ignore_ascii_case(MSG_CLIENT_LOGIN_ERROR) {
            if let Some(observer) = self.observer.upgrade() {
                observer.on_client_login_error(client_index);
            }
        }
    }

    /// Echo a `client_login` upstream on behalf of `local_id`, requesting
    /// `wanted_id` (pass `classId=0` to request server-assigned id).
    pub fn request_login(&self, local_id: SessionId, wanted_id: RtpUser, public_ip: &str, hash_hex: &str, nonce: u64) {
        let mut stream = ConfigStream::new();
        stream.add(TAG_MSG_NAME, MSG_CLIENT_LOGIN);
        stream.add(TAG_CLIENT_INDEX, &local_id.0.to_string());
        stream.add(TAG_CLIENT_ID, &wanted_id.to_id_string());
        stream.add(TAG_CLIENT_PUBLIC_IP, public_ip);
        stream.add(TAG_CLIENT_HASH_STRING, hash_hex);
        stream.add(TAG_CLIENT_NONCE, &nonce.to_string());

        let header = MsgHeader::to_one(0, self.c2s_user, ROOT_ID_C2S);
        send(&self.uplink, &header, stream.to_string_form().as_bytes());
    }

    pub fn request_logout(&self, sub_user: RtpUser) {
        let mut stream = ConfigStream::new();
        stream.add(TAG_MSG_NAME, MSG_CLIENT_LOGOUT);
        stream.add(TAG_CLIENT_ID, &sub_user.to_id_string());

        let header = MsgHeader::to_one(0, self.c2s_user, ROOT_ID_C2S);
        send(&self.uplink, &header, stream.to_string_form().as_bytes());
    }

    /// On uplink close, every locally logged-in client is dropped with
    /// the same error (spec §4.10).
    pub fn on_uplink_closed(&self, error: Option<NetError>) {
        let dropped: Vec<RtpUser> = self
            .clients
            .lock()
            .values()
            .filter_map(|c| c.sub_user)
            .collect();
        self.clients.lock().clear();
        self.by_sub_user.lock().clear();

        if let Some(observer) = self.observer.upgrade() {
            observer.on_uplink_closed(&dropped, error.as_ref());
        }
    }
}

fn send(session: &Arc<SessionWrapper>, header: &MsgHeader, body: &[u8]) {
    send_raw(session, header.src_user, body);
}

fn send_raw(session: &Arc<SessionWrapper>, src_user: RtpUser, body: &[u8]) {
    let header = MsgHeader::to_one(0, src_user, ROOT_ID_C2S);
    let payload = header.encode(body);
    let info = session.info();
    let packet = RtpPacket::new(
        info.mm_type,
        info.mm_id,
        RtpHeaderFields {
            marker: false,
            payload_type: 0,
            sequence: 0,
            timestamp: 0,
            ssrc: 0,
        },
        payload,
    );
    session.send_packet(packet, false);
}

/// Drives a [`C2sRelay`]'s uplink session lifecycle.
pub struct C2sUplinkObserver {
    pub relay: Arc<C2sRelay>,
}

impl SessionObserver for C2sUplinkObserver {
    fn on_ok(&self, _session: &SessionWrapper) {}

    fn on_close(&self, _session: &SessionWrapper, error: Option<NetError>) {
        self.relay.on_uplink_closed(error);
    }

    fn on_packet(&self, _session: &SessionWrapper, packet: RtpPacket) {
        self.relay.on_uplink_packet(packet.payload());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionInfo, SessionType};
    use crate::session::wrapper::SessionTransport;

    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }
    impl SessionTransport for RecordingTransport {
        fn send_packet(&self, packet: &RtpPacket) -> bool {
            self.sent.lock().push(packet.payload().to_vec());
            true
        }
    }

    fn new_session() -> (Arc<SessionWrapper>, Arc<RecordingTransport>) {
        let session = SessionWrapper::new(SessionInfo::new(
            SessionType::TcpClientEx,
            crate::packet::MMT_MSG,
            1,
        ));
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()) });
        session.bind_transport(transport.clone());
        (session, transport)
    }

    struct NoopObserver;
    impl C2sRelayObserver for NoopObserver {}

    #[test]
    fn login_ok_binds_local_client_to_sub_user() {
        let (uplink, uplink_t) = new_session();
        let c2s_user = RtpUser::new(SERVER_CID, 9, 1);
        let observer: Arc<dyn C2sRelayObserver> = Arc::new(NoopObserver);
        let relay = C2sRelay::new(uplink, c2s_user, Arc::downgrade(&observer));

        let (local, _local_t) = new_session();
        let local_id = relay.register_local_client(local);
        relay.request_login(local_id, RtpUser::new(2, 0, 0), "1.2.3.4", &"0".repeat(64), 0);
        assert_eq!(uplink_t.sent.lock().len(), 1);

        let sub_user = RtpUser::new(2, 500, 1);
        let mut ok = ConfigStream::new();
        ok.add(TAG_MSG_NAME, MSG_CLIENT_LOGIN_OK);
        ok.add(TAG_CLIENT_INDEX, &local_id.0.to_string());
        ok.add(TAG_CLIENT_ID, &sub_user.to_id_string());
        let reply = MsgHeader::to_one(0, c2s_user, c2s_user).encode(ok.to_string_form().as_bytes());
        relay.on_uplink_packet(&reply);

        assert_eq!(relay.by_sub_user.lock().get(&sub_user).copied(), Some(local_id));
    }

    #[test]
    fn uplink_close_drops_every_logged_in_client() {
        let (uplink, _) = new_session();
        let c2s_user = RtpUser::new(SERVER_CID, 9, 1);
        let observer = Arc::new(Mutex::new(Vec::<RtpUser>::new()));
        struct CaptureObserver(Arc<Mutex<Vec<RtpUser>>>);
        impl C2sRelayObserver for CaptureObserver {
            fn on_uplink_closed(&self, dropped: &[RtpUser], _error: Option<&NetError>) {
                self.0.lock().extend_from_slice(dropped);
            }
        }
        let capture: Arc<dyn C2sRelayObserver> = Arc::new(CaptureObserver(observer.clone()));
        let relay = C2sRelay::new(uplink, c2s_user, Arc::downgrade(&capture));

        let (local, _) = new_session();
        let local_id = relay.register_local_client(local);
        let sub_user = RtpUser::new(2, 500, 1);
        relay.clients.lock().get_mut(&local_id).unwrap().sub_user = Some(sub_user);
        relay.by_sub_user.lock().insert(sub_user, local_id);

        relay.on_uplink_closed(None);

        assert_eq!(observer.lock().clone(), vec![sub_user]);
        assert!(relay.clients.lock().is_empty());
    }
}
