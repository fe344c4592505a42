//! `RtpUser` identity (classId/userId/instId) and the wrap-around id
//! allocators, ported from `RTP_MSG_USER`/`MakeServerId_i`/`MakeClientId_i`
//! in `rtp_msg_server.cpp`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{NetError, Result};

/// Server-class `classId`; every broker/relay endpoint is `1`.
pub const SERVER_CID: u8 = 1;

pub const NODE_UID_MIN: u64 = 1;
/// Upper bound an application-chosen `userId` must respect.
pub const NODE_UID_MAX: u64 = 0xEF_FF_FF_FF_FF;
/// Upper bound a server-assigned `userId` (including the wrap-around
/// counters) must respect — wider than `NODE_UID_MAX` to leave the
/// `0xF0.. ..0xFF` range for auto-assigned ids.
pub const NODE_UID_MAXX: u64 = 0xFF_FF_FF_FF_FF;
pub const NODE_IID_MIN: u16 = 1;

const AUTO_ID_START: u64 = 0xF0_00_00_00_00;

/// `classId-userId-instId` identity, carried on the wire as 8 bytes
/// (`classId:u8, userId:u40 be, instId:u16 be`) and in text form as
/// `"1-1-65535"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RtpUser {
    pub class_id: u8,
    pub user_id: u64,
    pub inst_id: u16,
}

impl RtpUser {
    pub fn new(class_id: u8, user_id: u64, inst_id: u16) -> Self {
        Self {
            class_id,
            user_id,
            inst_id,
        }
    }

    /// Root is always `classId=1, userId=1`; `instId` distinguishes the
    /// observer-addressed root (`0`) from the C2S port (`65535`).
    pub fn is_root(&self) -> bool {
        self.class_id == SERVER_CID && self.user_id == 1
    }

    pub fn with_inst_id(self, inst_id: u16) -> Self {
        Self { inst_id, ..self }
    }

    /// `classId-userId-instId` text form (`RtpMsgUser2String`).
    pub fn to_id_string(&self) -> String {
        format!("{}-{}-{}", self.class_id, self.user_id, self.inst_id)
    }

    /// Parse `classId-userId-instId` (`RtpMsgString2User`). `instId` may
    /// be omitted, defaulting to `0`.
    pub fn from_id_string(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '-');
        let class_id: u8 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| NetError::BadFrame(format!("bad user id string: {s}")))?;
        let user_id: u64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| NetError::BadFrame(format!("bad user id string: {s}")))?;
        let inst_id: u16 = match parts.next() {
            Some(p) => p
                .parse()
                .map_err(|_| NetError::BadFrame(format!("bad user id string: {s}")))?,
            None => 0,
        };
        Ok(RtpUser::new(class_id, user_id, inst_id))
    }
}

pub const ROOT_ID: RtpUser = RtpUser {
    class_id: SERVER_CID,
    user_id: 1,
    inst_id: 0,
};

pub const ROOT_ID_C2S: RtpUser = RtpUser {
    class_id: SERVER_CID,
    user_id: 1,
    inst_id: 65535,
};

/// Wrap-around counters handing out `userId`s in `[0xF000000000,
/// 0xFFFFFFFFFF]` when a caller logs in with `userId=0`. Kept as an
/// explicit per-server object rather than the original's process-wide
/// statics, so multiple [`crate::msg::server::MessageServer`]s in one
/// process don't share identity space.
#[derive(Debug)]
pub struct IdAllocator {
    next_server_id: AtomicU64,
    next_client_id: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_server_id: AtomicU64::new(AUTO_ID_START),
            next_client_id: AtomicU64::new(AUTO_ID_START),
        }
    }

    pub fn next_server_id(&self) -> u64 {
        Self::next(&self.next_server_id)
    }

    pub fn next_client_id(&self) -> u64 {
        Self::next(&self.next_client_id)
    }

    fn next(counter: &AtomicU64) -> u64 {
        loop {
            let current = counter.load(Ordering::Acquire);
            let next = if current >= NODE_UID_MAXX {
                AUTO_ID_START
            } else {
                current + 1
            };
            if counter
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return current;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_string_round_trips() {
        let u = RtpUser::new(2, 100, 1);
        assert_eq!(RtpUser::from_id_string(&u.to_id_string()).unwrap(), u);
    }

    #[test]
    fn root_c2s_text_form() {
        assert_eq!(ROOT_ID_C2S.to_id_string(), "1-1-65535");
        assert!(ROOT_ID_C2S.is_root());
        assert!(ROOT_ID.is_root());
    }

    #[test]
    fn allocator_wraps_around() {
        let alloc = IdAllocator::new();
        let first = alloc.next_client_id();
        assert_eq!(first, AUTO_ID_START);
        alloc.next_client_id.store(NODE_UID_MAXX, Ordering::Release);
        let last = alloc.next_client_id();
        let wrapped = alloc.next_client_id();
        assert_eq!(last, NODE_UID_MAXX);
        assert_eq!(wrapped, AUTO_ID_START);
    }

    #[test]
    fn server_and_client_counters_are_independent() {
        let alloc = IdAllocator::new();
        assert_eq!(alloc.next_server_id(), AUTO_ID_START);
        assert_eq!(alloc.next_client_id(), AUTO_ID_START);
        assert_eq!(alloc.next_server_id(), AUTO_ID_START + 1);
    }
}
