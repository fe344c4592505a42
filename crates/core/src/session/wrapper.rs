//! `SessionWrapper`: the send/receive façade every session variant
//! shares, combining a flow-control bucket, the reorder buffer, and the
//! state machine. Grounded on `CRtpSessionWrapper`'s `SendPacket` /
//! `SendPacketUnlock` / `OnRecvSession` / `OnOkSession` /
//! `OnCloseSession` methods in `rtp_session_wrapper.cpp`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bucket::{create_bucket, FlowctrlInfo, RtpBucket};
use crate::error::NetError;
use crate::packet::RtpPacket;
use crate::reorder::{
    ReorderBuffer, AUDIO_REORDER_PACKET_COUNT, DEFAULT_REORDER_PACKET_COUNT,
    VIDEO_REORDER_PACKET_COUNT,
};

use super::{SessionInfo, SessionState};

/// What a session variant's transport must provide to be driven by a
/// [`SessionWrapper`].
pub trait SessionTransport: Send + Sync {
    /// Best-effort non-blocking send. `false` means the socket's send
    /// buffer is currently full — the caller keeps the packet in the
    /// bucket and retries on the next writable event.
    fn send_packet(&self, packet: &RtpPacket) -> bool;

    /// Ask the transport to re-arm a writable-edge notification (so the
    /// bucket gets another chance to drain even with nothing new
    /// pushed).
    fn request_on_send(&self) {}
}

/// Observer callbacks a session's owner (a media relay, or the
/// messaging fabric) implements to react to session lifecycle events.
pub trait SessionObserver: Send + Sync {
    fn on_ok(&self, session: &SessionWrapper);
    fn on_close(&self, session: &SessionWrapper, error: Option<NetError>);
    fn on_packet(&self, session: &SessionWrapper, packet: RtpPacket);
}

pub struct SessionWrapper {
    info: SessionInfo,
    state: Mutex<SessionState>,
    bucket: Mutex<Box<dyn RtpBucket>>,
    reorder: Mutex<ReorderBuffer>,
    transport: Mutex<Option<Arc<dyn SessionTransport>>>,
    observer: Mutex<Option<Weak<dyn SessionObserver>>>,
    enable_input: AtomicBool,
    enable_output: AtomicBool,
    /// Tracks the bucket's accept/reject edge so a 1→0 transition can
    /// ask the transport to request a writable notification, matching
    /// `m_pushToBucketRet1`/`m_pushToBucketRet2` in the original.
    last_push_accepted: AtomicBool,
}

impl SessionWrapper {
    pub fn new(info: SessionInfo) -> Arc<Self> {
        let reorder_count = if crate::packet::is_audio(info.mm_type) {
            AUDIO_REORDER_PACKET_COUNT
        } else if crate::packet::is_video(info.mm_type) {
            VIDEO_REORDER_PACKET_COUNT
        } else {
            DEFAULT_REORDER_PACKET_COUNT
        };

        Arc::new(Self {
            info,
            state: Mutex::new(SessionState::New),
            bucket: Mutex::new(create_bucket(info.mm_type, info.session_type.to_bucket_kind())),
            reorder: Mutex::new(ReorderBuffer::new(reorder_count)),
            transport: Mutex::new(None),
            observer: Mutex::new(None),
            enable_input: AtomicBool::new(true),
            enable_output: AtomicBool::new(true),
            last_push_accepted: AtomicBool::new(true),
        })
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn bind_transport(&self, transport: Arc<dyn SessionTransport>) {
        *self.transport.lock() = Some(transport);
        *self.state.lock() = if self.info.session_type.is_connection_oriented() {
            SessionState::Connecting
        } else {
            SessionState::Ok
        };
    }

    pub fn set_observer(&self, observer: Weak<dyn SessionObserver>) {
        *self.observer.lock() = Some(observer);
    }

    pub fn enable_input(&self, enable: bool) {
        self.enable_input.store(enable, Ordering::Release);
    }

    pub fn enable_output(&self, enable: bool) {
        self.enable_output.store(enable, Ordering::Release);
        if enable {
            self.drain();
        }
    }

    pub fn flowctrl_info(&self) -> FlowctrlInfo {
        self.bucket.lock().flowctrl_info()
    }

    /// Queue a packet for sending. `handshaking` bypasses the
    /// `enable_output` gate, for the handful of control packets a
    /// session needs to emit before it's fully `Ok`.
    pub fn send_packet(&self, packet: RtpPacket, handshaking: bool) -> bool {
        if !handshaking && !self.enable_output.load(Ordering::Acquire) {
            return false;
        }
        if self.transport.lock().is_none() {
            return false;
        }

        let mut bucket = self.bucket.lock();
        let accepted = bucket.push_back_add_ref(packet);

        let was_accepted = self.last_push_accepted.swap(accepted, Ordering::AcqRel);
        if was_accepted && !accepted {
            if let Some(t) = self.transport.lock().clone() {
                t.request_on_send();
            }
        }

        self.drain_locked(&mut bucket);
        accepted
    }

    /// Keep popping sendable packets off the bucket until the transport
    /// reports backpressure. Call from the transport's writable-edge
    /// reactor callback.
    pub fn drain(&self) {
        let mut bucket = self.bucket.lock();
        self.drain_locked(&mut bucket);
    }

    fn drain_locked(&self, bucket: &mut Box<dyn RtpBucket>) {
        let Some(transport) = self.transport.lock().clone() else {
            return;
        };
        loop {
            let Some(front) = bucket.get_front() else {
                break;
            };
            if transport.send_packet(&front) {
                bucket.pop_front_release(&front);
            } else {
                break;
            }
        }
    }

    /// Feed one packet decoded off the wire. Applies the reorder buffer
    /// when the session type/media combination calls for it, then
    /// delivers in order to the observer.
    pub fn on_input(&self, packet: RtpPacket) {
        if !self.enable_input.load(Ordering::Acquire) {
            return;
        }

        let deliverable = if self.info.session_type.needs_reorder(self.info.mm_type) {
            let mut reorder = self.reorder.lock();
            reorder.push_back(packet);
            let mut out = Vec::new();
            while let Some(p) = reorder.pop_front() {
                out.push(p);
            }
            out
        } else {
            vec![packet]
        };

        if deliverable.is_empty() {
            return;
        }
        let Some(observer) = self.observer.lock().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        for p in deliverable {
            observer.on_packet(self, p);
        }
    }

    pub fn on_ok(self: &Arc<Self>) {
        *self.state.lock() = SessionState::Ok;
        if let Some(observer) = self.observer.lock().as_ref().and_then(Weak::upgrade) {
            observer.on_ok(self);
        }
    }

    pub fn on_close(self: &Arc<Self>, error: Option<NetError>) {
        *self.state.lock() = SessionState::Closed;
        self.bucket.lock().reset();
        self.reorder.lock().reset();
        if let Some(observer) = self.observer.lock().as_ref().and_then(Weak::upgrade) {
            observer.on_close(self, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{MmType, RtpHeaderFields};
    use crate::session::SessionType;
    use std::sync::atomic::AtomicUsize;

    fn pkt(seq: u16) -> RtpPacket {
        RtpPacket::new(
            1 as MmType,
            1,
            RtpHeaderFields {
                marker: false,
                payload_type: 8,
                sequence: seq,
                timestamp: 0,
                ssrc: 1,
            },
            vec![0u8; 10],
        )
    }

    struct AcceptingTransport {
        sent: Mutex<Vec<u16>>,
    }
    impl SessionTransport for AcceptingTransport {
        fn send_packet(&self, packet: &RtpPacket) -> bool {
            self.sent.lock().push(packet.sequence());
            true
        }
    }

    struct RecordingObserver {
        received: Mutex<Vec<u16>>,
        ok_calls: AtomicUsize,
    }
    impl SessionObserver for RecordingObserver {
        fn on_ok(&self, _session: &SessionWrapper) {
            self.ok_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn on_close(&self, _session: &SessionWrapper, _error: Option<NetError>) {}
        fn on_packet(&self, _session: &SessionWrapper, packet: RtpPacket) {
            self.received.lock().push(packet.sequence());
        }
    }

    fn info(session_type: SessionType) -> SessionInfo {
        SessionInfo::new(session_type, 1, 1)
    }

    #[test]
    fn send_drains_immediately_when_transport_accepts() {
        let session = SessionWrapper::new(info(SessionType::TcpClientEx));
        let transport = Arc::new(AcceptingTransport {
            sent: Mutex::new(Vec::new()),
        });
        session.bind_transport(transport.clone());

        assert!(session.send_packet(pkt(1), false));
        assert_eq!(transport.sent.lock().clone(), vec![1]);
    }

    #[test]
    fn output_disabled_rejects_non_handshaking_sends() {
        let session = SessionWrapper::new(info(SessionType::TcpClientEx));
        let transport = Arc::new(AcceptingTransport {
            sent: Mutex::new(Vec::new()),
        });
        session.bind_transport(transport);
        session.enable_output(false);

        assert!(!session.send_packet(pkt(1), false));
        assert!(session.send_packet(pkt(2), true)); // handshaking bypasses the gate
    }

    #[test]
    fn on_ok_notifies_observer() {
        let session = SessionWrapper::new(info(SessionType::UdpClient));
        let observer = Arc::new(RecordingObserver {
            received: Mutex::new(Vec::new()),
            ok_calls: AtomicUsize::new(0),
        });
        session.set_observer(Arc::downgrade(&(observer.clone() as Arc<dyn SessionObserver>)));
        session.on_ok();
        assert_eq!(observer.ok_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn udp_audio_session_reorders_before_delivery() {
        let session = SessionWrapper::new(info(SessionType::UdpClient));
        let observer = Arc::new(RecordingObserver {
            received: Mutex::new(Vec::new()),
            ok_calls: AtomicUsize::new(0),
        });
        session.set_observer(Arc::downgrade(&(observer.clone() as Arc<dyn SessionObserver>)));

        session.on_input(pkt(1));
        session.on_input(pkt(3));
        session.on_input(pkt(2));

        assert_eq!(observer.received.lock().clone(), vec![1, 2, 3]);
    }

    #[test]
    fn tcp_session_bypasses_reorder() {
        let session = SessionWrapper::new(info(SessionType::TcpClientEx));
        let observer = Arc::new(RecordingObserver {
            received: Mutex::new(Vec::new()),
            ok_calls: AtomicUsize::new(0),
        });
        session.set_observer(Arc::downgrade(&(observer.clone() as Arc<dyn SessionObserver>)));

        session.on_input(pkt(2));
        session.on_input(pkt(1));

        // delivered exactly in arrival order, no reordering applied
        assert_eq!(observer.received.lock().clone(), vec![2, 1]);
    }
}
