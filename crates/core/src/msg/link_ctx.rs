//! Per-session routing context, the Rust shape of `RTP_MSG_LINK_CTX`:
//! the base (authenticated) user of a link, the sub-users a C2S relay
//! has logged in behind it, and whether the link is C2S-marked.

use std::collections::HashSet;
use std::sync::Arc;

use crate::session::wrapper::SessionWrapper;

use super::user::RtpUser;

/// Opaque per-accepted-session identity. The original keys its maps by
/// raw `IRtpSession*`; a monotonic counter plays the same role here
/// without relying on pointer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

pub struct LinkCtx {
    pub session_id: SessionId,
    pub session: Arc<SessionWrapper>,
    pub base_user: RtpUser,
    pub sub_users: HashSet<RtpUser>,
    /// Set once a `TcpClientEx` session identifies itself as a C2S
    /// relay's uplink rather than a direct broker client.
    pub is_c2s: bool,
}

impl LinkCtx {
    pub fn new(session_id: SessionId, session: Arc<SessionWrapper>, base_user: RtpUser, is_c2s: bool) -> Self {
        Self {
            session_id,
            session,
            base_user,
            sub_users: HashSet::new(),
            is_c2s,
        }
    }

    /// Every identity this link currently answers to (its base user
    /// plus any sub-users added through `client_login`).
    pub fn owns(&self, user: &RtpUser) -> bool {
        *user == self.base_user || self.sub_users.contains(user)
    }
}
