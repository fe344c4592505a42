//! Command-line message-broker / C2S-relay daemon. Listens for incoming
//! TCP connections, runs the accept-side handshake, and wires each
//! accepted session into a [`MessageServer`].
//!
//! Grounded on the original's `rtp_msg_server` sample daemon: a single
//! listening socket multiplexing `RTP_ST_*` service ids, a reactor pool
//! driving all I/O, and an observer that authenticates logins against a
//! static allow-list loaded from a config file.

use std::io::Read;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use clap::Parser;
use parking_lot::Mutex;

use rtpnet::config::ConfigStream;
use rtpnet::handshake::acceptor::accept_handshake;
use rtpnet::handshake::ServiceId;
use rtpnet::msg::{CheckUserResult, MessageServer, MessageServerObserver, MessageServerSessionObserver, RtpUser, IdAllocator, SERVER_CID};
use rtpnet::packet::MMT_MSG;
use rtpnet::reactor::ReactorPool;
use rtpnet::session::wrapper::SessionWrapper;
use rtpnet::session::{SessionInfo, SessionType};
use rtpnet::transport::tcp::TcpTransport;

#[derive(Parser)]
#[command(
    name = "rtpnet-server",
    about = "Identity-addressed message broker and C2S relay"
)]
struct Args {
    /// Bind address (host:port) for the C2S/message listening socket.
    #[arg(long, short, default_value = "0.0.0.0:9200")]
    bind: String,

    /// Number of reactor shard threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Optional allow-list config file (`"client_id""<classId-userId-instId>"`
    /// lines). When absent, every login is accepted and auto-assigned an id.
    #[arg(long)]
    allow_list: Option<String>,
}

/// Authenticates logins either against a static allow-list (when
/// `--allow-list` names specific ids) or permissively (auto-assigning a
/// fresh id to anyone who asks for `userId=0`).
struct DaemonObserver {
    allow_list: Option<Vec<RtpUser>>,
}

impl MessageServerObserver for DaemonObserver {
    fn on_check_user(
        &self,
        sub_user: &RtpUser,
        public_ip: &str,
        c2s_user: &RtpUser,
        _hash: &[u8; 32],
        _nonce: u64,
    ) -> Option<CheckUserResult> {
        if let Some(allow_list) = &self.allow_list {
            if !allow_list.contains(sub_user) {
                tracing::warn!(user = %sub_user.to_id_string(), %public_ip, "login rejected: not on allow-list");
                return None;
            }
        }
        tracing::info!(user = %sub_user.to_id_string(), c2s = %c2s_user.to_id_string(), %public_ip, "login accepted");
        Some(CheckUserResult {
            user_id: sub_user.user_id,
            inst_id: sub_user.inst_id.max(1),
            app_data: 0,
        })
    }

    fn on_ok_user(&self, sub_user: &RtpUser, _public_ip: &str, c2s_user: &RtpUser, _app_data: i64) {
        tracing::info!(user = %sub_user.to_id_string(), c2s = %c2s_user.to_id_string(), "user online");
    }

    fn on_close_user(&self, user: &RtpUser, error_code: i32) {
        tracing::info!(user = %user.to_id_string(), error_code, "user offline");
    }

    fn on_recv_msg(&self, body: &[u8], charset: u32, src_user: &RtpUser) {
        tracing::debug!(
            from = %src_user.to_id_string(),
            charset,
            len = body.len(),
            "root-addressed message"
        );
    }
}

fn load_allow_list(path: &str) -> std::io::Result<Vec<RtpUser>> {
    let mut buf = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut buf)?;
    let stream = ConfigStream::parse(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(stream
        .get_all("client_id")
        .iter()
        .filter_map(|s| RtpUser::from_id_string(s).ok())
        .collect())
}

/// Assigns each freshly accepted C2S link a base identity before any
/// `client_login` traffic arrives — kept separate from the
/// [`MessageServer`]'s own sub-user allocator per-instance by design.
static MM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let allow_list = match &args.allow_list {
        Some(path) => match load_allow_list(path) {
            Ok(list) => {
                tracing::info!(path, count = list.len(), "loaded allow-list");
                Some(list)
            }
            Err(e) => {
                eprintln!("failed to load allow-list {path}: {e}");
                return;
            }
        },
        None => None,
    };

    let reactor = match ReactorPool::spawn(args.threads) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("failed to start reactor pool: {e}");
            return;
        }
    };

    let observer: Arc<dyn MessageServerObserver> = Arc::new(DaemonObserver { allow_list });
    let server = MessageServer::new(MMT_MSG, Arc::downgrade(&observer));
    let base_ids = IdAllocator::new();
    // `SessionWrapper` only holds its observer weakly, so the daemon keeps
    // one strong reference per live link here for as long as the process runs.
    let session_observers: Mutex<Vec<Arc<MessageServerSessionObserver>>> = Mutex::new(Vec::new());

    let listener = match TcpListener::bind(&args.bind) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", args.bind);
            return;
        }
    };
    tracing::info!(bind = %args.bind, threads = args.threads, "message broker listening");

    for incoming in listener.incoming() {
        let mut stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let peer = stream.peer_addr().ok();
        let handshake = match accept_handshake(&mut stream) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(error = %e, ?peer, "handshake failed");
                continue;
            }
        };
        if handshake.service_id != ServiceId::Message {
            tracing::debug!(?peer, "non-message service id on the C2S port, closing");
            continue;
        }

        let shard_key = MM_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut info =
            SessionInfo::new(SessionType::TcpServerEx, MMT_MSG, shard_key as u32).with_remote_addr(peer);
        if let Err(e) = rtpnet::handshake::info::exchange_as_acceptor(&mut stream, &mut info) {
            tracing::debug!(error = %e, ?peer, "session info exchange failed");
            continue;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            tracing::warn!(error = %e, "failed to set non-blocking");
            continue;
        }
        let mio_stream = mio::net::TcpStream::from_std(stream);
        let reactor_handle = reactor.handle_for(shard_key).clone();

        let session = SessionWrapper::new(info);

        let transport = TcpTransport::new(mio_stream, reactor_handle);
        if let Err(e) = transport.attach(&session) {
            tracing::warn!(error = %e, "failed to attach transport");
            continue;
        }

        let base_user = RtpUser::new(SERVER_CID, base_ids.next_client_id(), 1);
        let session_observer = Arc::new(MessageServerSessionObserver {
            server: server.clone(),
            session_id: Mutex::new(None),
        });
        session.set_observer(Arc::downgrade(&session_observer) as Weak<_>);

        let session_id = server.add_session(session, base_user, true);
        *session_observer.session_id.lock() = Some(session_id);
        session_observers.lock().push(session_observer);

        tracing::info!(?peer, base = %base_user.to_id_string(), "c2s link established");
    }
}
