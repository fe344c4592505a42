//! End-to-end messaging fabric test: a [`C2sRelay`] logs a local client
//! in through a real [`MessageServer`] broker over an in-process
//! loopback transport, rather than the hand-built reply payloads the
//! unit tests in `msg::server`/`msg::c2s` use. Exercises the full
//! `client_login` round trip across both sides of the wire.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use rtpnet::msg::{
    C2sRelay, C2sRelayObserver, C2sUplinkObserver, CheckUserResult, MessageServer,
    MessageServerObserver, MessageServerSessionObserver, RtpUser, SERVER_CID,
};
use rtpnet::packet::{MmType, RtpPacket, MMT_MSG};
use rtpnet::session::wrapper::{SessionTransport, SessionWrapper};
use rtpnet::session::{SessionInfo, SessionType};

/// Forwards whatever a session sends straight into its peer's
/// `on_input`, standing in for a real socket between two in-process
/// `SessionWrapper`s.
struct Loopback {
    peer: Mutex<Weak<SessionWrapper>>,
}

impl Loopback {
    fn new() -> Arc<Self> {
        Arc::new(Self { peer: Mutex::new(Weak::new()) })
    }
}

impl SessionTransport for Loopback {
    fn send_packet(&self, packet: &RtpPacket) -> bool {
        let Some(peer) = self.peer.lock().upgrade() else {
            return false;
        };
        peer.on_input(packet.clone());
        true
    }
}

fn session(session_type: SessionType) -> Arc<SessionWrapper> {
    SessionWrapper::new(SessionInfo::new(session_type, MMT_MSG as MmType, 1))
}

struct AllowObserver;
impl MessageServerObserver for AllowObserver {
    fn on_check_user(
        &self,
        sub_user: &RtpUser,
        _public_ip: &str,
        _c2s_user: &RtpUser,
        _hash: &[u8; 32],
        _nonce: u64,
    ) -> Option<CheckUserResult> {
        Some(CheckUserResult {
            user_id: sub_user.user_id,
            inst_id: 1,
            app_data: 7,
        })
    }
}

struct CaptureRelayObserver {
    logged_in: Mutex<Vec<RtpUser>>,
}
impl C2sRelayObserver for CaptureRelayObserver {
    fn on_client_login_ok(&self, client_id: RtpUser) {
        self.logged_in.lock().push(client_id);
    }
}

#[test]
fn relay_login_round_trips_through_a_real_broker() {
    let server_observer: Arc<dyn MessageServerObserver> = Arc::new(AllowObserver);
    let server = MessageServer::new(MMT_MSG as MmType, Arc::downgrade(&server_observer));

    let server_session = session(SessionType::TcpServerEx);
    let uplink_session = session(SessionType::TcpClientEx);

    let to_client = Loopback::new();
    let to_server = Loopback::new();
    server_session.bind_transport(to_client.clone());
    uplink_session.bind_transport(to_server.clone());
    *to_client.peer.lock() = Arc::downgrade(&uplink_session);
    *to_server.peer.lock() = Arc::downgrade(&server_session);

    let session_observer = Arc::new(MessageServerSessionObserver {
        server: server.clone(),
        session_id: Mutex::new(None),
    });
    server_session.set_observer(Arc::downgrade(&session_observer) as Weak<_>);
    let c2s_user = RtpUser::new(SERVER_CID, 9, 1);
    let session_id = server.add_session(server_session.clone(), c2s_user, true);
    *session_observer.session_id.lock() = Some(session_id);

    let relay_observer = Arc::new(CaptureRelayObserver {
        logged_in: Mutex::new(Vec::new()),
    });
    let relay = C2sRelay::new(
        uplink_session.clone(),
        c2s_user,
        Arc::downgrade(&relay_observer) as Weak<_>,
    );
    let uplink_observer = Arc::new(C2sUplinkObserver { relay: relay.clone() });
    uplink_session.set_observer(Arc::downgrade(&uplink_observer) as Weak<_>);

    let local = session(SessionType::TcpServerEx);
    let local_id = relay.register_local_client(local);
    relay.request_login(local_id, RtpUser::new(2, 0, 0), "127.0.0.1", &"0".repeat(64), 0);

    let mut logged_in = None;
    for _ in 0..50 {
        let got = relay_observer.logged_in.lock().first().copied();
        if got.is_some() {
            logged_in = got;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let client_id = logged_in.expect("client_login_ok never arrived from the broker");
    assert_eq!(client_id.class_id, 2);
    assert_eq!(client_id.inst_id, 1);

    let (_, base, sub) = server.user_count();
    assert_eq!(base, 1);
    assert_eq!(sub, 1);
}
