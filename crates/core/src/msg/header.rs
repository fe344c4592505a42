//! Wire format for a broker-routed message: `RTP_MSG_HEADER` followed by
//! the `dstUsers` array and the body, all carried inside one
//! [`crate::packet::RtpPacket`] payload (spec §6).

use crate::error::{NetError, Result};

use super::user::RtpUser;

/// One `RtpUser` on the wire: `classId:u8, userId:u40 be, instId:u16 be`.
const USER_WIRE_LEN: usize = 1 + 5 + 2;
/// `charset:u32 be, srcUser, dstUserCount:u8`.
const FIXED_HEADER_LEN: usize = 4 + USER_WIRE_LEN + 1;

fn encode_user(out: &mut Vec<u8>, user: &RtpUser) {
    out.push(user.class_id);
    out.extend_from_slice(&user.user_id.to_be_bytes()[3..]); // low 40 bits
    out.extend_from_slice(&user.inst_id.to_be_bytes());
}

fn decode_user(buf: &[u8]) -> RtpUser {
    let class_id = buf[0];
    let mut id_bytes = [0u8; 8];
    id_bytes[3..].copy_from_slice(&buf[1..6]);
    let user_id = u64::from_be_bytes(id_bytes);
    let inst_id = u16::from_be_bytes([buf[6], buf[7]]);
    RtpUser::new(class_id, user_id, inst_id)
}

/// A decoded/encodable message header plus the destinations it
/// addresses. The body is kept out of this struct (a borrowed slice on
/// decode, an owned `Vec` supplied by the caller on encode) so routing
/// doesn't need to copy payload bytes more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    pub charset: u32,
    pub src_user: RtpUser,
    pub dst_users: Vec<RtpUser>,
}

impl MsgHeader {
    pub fn new(charset: u32, src_user: RtpUser, dst_users: Vec<RtpUser>) -> Self {
        Self {
            charset,
            src_user,
            dst_users,
        }
    }

    /// Single-destination convenience constructor.
    pub fn to_one(charset: u32, src_user: RtpUser, dst_user: RtpUser) -> Self {
        Self::new(charset, src_user, vec![dst_user])
    }

    pub fn encode(&self, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            FIXED_HEADER_LEN + self.dst_users.len() * USER_WIRE_LEN + body.len(),
        );
        out.extend_from_slice(&self.charset.to_be_bytes());
        encode_user(&mut out, &self.src_user);
        out.push(self.dst_users.len().min(u8::MAX as usize) as u8);
        for u in &self.dst_users {
            encode_user(&mut out, u);
        }
        out.extend_from_slice(body);
        out
    }

    /// Decode a header off the front of `buf`, returning the header and
    /// the remaining body slice.
    pub fn decode(buf: &[u8]) -> Result<(MsgHeader, &[u8])> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(NetError::BadFrame("message shorter than header".into()));
        }

        let charset = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let src_user = decode_user(&buf[4..4 + USER_WIRE_LEN]);
        let dst_user_count = buf[4 + USER_WIRE_LEN] as usize;

        let dst_start = FIXED_HEADER_LEN;
        let dst_end = dst_start + dst_user_count * USER_WIRE_LEN;
        if buf.len() < dst_end {
            return Err(NetError::BadFrame("message truncated in dstUsers array".into()));
        }

        let mut dst_users = Vec::with_capacity(dst_user_count);
        for i in 0..dst_user_count {
            let start = dst_start + i * USER_WIRE_LEN;
            dst_users.push(decode_user(&buf[start..start + USER_WIRE_LEN]));
        }

        Ok((
            MsgHeader {
                charset,
                src_user,
                dst_users,
            },
            &buf[dst_end..],
        ))
    }
}
