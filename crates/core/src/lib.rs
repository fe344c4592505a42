//! # rtpnet — reactor-driven RTP session layer and messaging fabric
//!
//! A Rust library for carrying RTP media and identity-addressed
//! messages over TCP, UDP, multicast, and TLS, with a broker that
//! routes between many sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  msg        — broker routing, C2S relay   │
//! ├──────────────────────────────────────────┤
//! │  session    — state machine, SessionWrapper│
//! │  bucket     — flow-control send queues    │
//! │  reorder    — UDP reassembly window       │
//! ├──────────────────────────────────────────┤
//! │  handshake  — 4-step accept/connect       │
//! │  transport  — TCP / UDP / TLS non-blocking│
//! │  reactor    — mio poll loop, timers       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Crate layout
//!
//! - [`reactor`] — Sharded `mio`-based event loop, timers, cross-thread wakeup.
//! - [`handshake`] — The 4-step connect/accept exchange preceding connection-oriented sessions.
//! - [`transport`] — Non-blocking TCP, UDP, and TLS-wrapped TCP transports.
//! - [`bucket`] — Flow-control send queues (`BaseBucket`, `AudioBucket`, `VideoBucket`).
//! - [`reorder`] — Small fixed-size reordering window for UDP-sourced media.
//! - [`session`] — Session lifecycle state machine and the `SessionWrapper` façade.
//! - [`msg`] — Identity-addressed message routing and the C2S relay.
//! - [`packet`] — `RtpPacket`, wire framing, media-type classification.
//! - [`config`] — Line-oriented `"name""value"` configuration format.
//! - [`error`] — [`error::NetError`] and [`error::Result`].

pub mod bucket;
pub mod config;
pub mod error;
pub mod handshake;
pub mod msg;
pub mod packet;
pub mod reactor;
pub mod reorder;
pub mod session;
pub mod transport;

pub use error::{NetError, Result};
pub use packet::RtpPacket;
