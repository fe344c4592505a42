//! Messaging fabric (spec §4.9/§4.10): the broker (`server`) that
//! routes identity-addressed packets between sessions, and the C2S
//! relay (`c2s`) that fronts it for downstream clients speaking through
//! a single uplink. Grounded on `CRtpMsgServer` in
//! `original_source/rtp_msg_server.cpp`.

pub mod c2s;
pub mod header;
pub mod link_ctx;
pub mod server;
pub mod task_queue;
pub mod user;

pub use c2s::{C2sRelay, C2sRelayObserver, C2sUplinkObserver};
pub use header::MsgHeader;
pub use link_ctx::{LinkCtx, SessionId};
pub use server::{CheckUserResult, MessageServer, MessageServerObserver, MessageServerSessionObserver};
pub use user::{RtpUser, IdAllocator, NODE_IID_MIN, NODE_UID_MAX, NODE_UID_MAXX, NODE_UID_MIN, ROOT_ID, ROOT_ID_C2S, SERVER_CID};
