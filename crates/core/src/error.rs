//! Error types for the reactor/session/messaging stack.

use std::fmt;

/// Errors the core distinguishes (spec §7).
///
/// User-visible failures always arrive via observer callbacks, never as a
/// synchronous panic or exception out of a send/recv path — these variants
/// are what gets carried to `OnCloseSession`/`OnHandshakeError`/etc.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Underlying I/O or socket error. Non-fatal `EINTR`/`EAGAIN` are
    /// recovered locally and never surface as this variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake did not complete within the configured deadline.
    #[error("handshake timed out")]
    HsTimeout,

    /// The 4-step connect exchange was malformed, or `r+1` didn't match.
    #[error("handshake protocol violation: {0}")]
    HsProtocol(String),

    /// TLS handshake or I/O failed; carries the underlying TLS error code.
    #[error("TLS failure (code {ssl_code}): {detail}")]
    SslFail { ssl_code: i32, detail: String },

    /// Heartbeat silence exceeded `2 * period` with no data for `timeout`.
    #[error("peer considered dead (heartbeat silence)")]
    PeerDead,

    /// TCP length-prefix or RTP header parse failure.
    #[error("malformed frame: {0}")]
    BadFrame(String),

    /// The functor-command task queue is above `MAX_PENDING_COUNT`.
    #[error("task queue backpressure")]
    Backpressure,

    /// The application's `OnCheckUser` rejected the connecting user.
    #[error("authentication rejected")]
    AuthFail,

    /// Method called before init, or after fini/close.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Even/odd RTP port-pair allocation exhausted its retry budget
    /// (spec §4.5: up to 100 collisions).
    #[error("port allocation exhausted after {0} attempts")]
    PortExhausted(u32),

    /// Failed to parse a config-stream line (spec §6).
    #[error("config parse error: {kind}")]
    ConfigParse { kind: ConfigParseErrorKind },
}

/// Specific kind of config-line parse failure.
#[derive(Debug)]
pub enum ConfigParseErrorKind {
    /// A non-comment, non-blank line wasn't `"name""value"`.
    InvalidLine,
    /// A quoted field was never closed.
    UnterminatedQuote,
}

impl fmt::Display for ConfigParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLine => write!(f, "invalid line"),
            Self::UnterminatedQuote => write!(f, "unterminated quote"),
        }
    }
}

/// Convenience alias for `Result<T, NetError>`.
pub type Result<T> = std::result::Result<T, NetError>;
