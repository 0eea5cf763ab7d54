use std::net::SocketAddr;

use thiserror::Error;

/// Error taxonomy surfaced at the transport boundary.
///
/// Protocol and socket failures never reach here directly; they are
/// converted into a `reset` on the owning [`crate::connection::Connection`]
/// and, where relevant, into one of these variants delivered to the
/// request that was affected.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("listen failed on {host}:{port}")]
    ListenFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("protocol read failed (remote={remote}, local={local}): {reason}")]
    ReadFailed {
        remote: String,
        local: String,
        reason: String,
    },

    #[error("no handler defined")]
    NoHandler,

    #[error("invalid-handler: a handler is already registered for this channel")]
    InvalidHandlerForRegistration,

    #[error("refusing to connect to self ({addr})")]
    SelfPeer { addr: SocketAddr },

    #[error("refusing ephemeral peer address 0.0.0.0:0")]
    EphemeralPeer,

    #[error("channel already closed")]
    AlreadyClosed,

    #[error("connection is closing, no new operations accepted")]
    Closing,

    #[error("timed out")]
    TimedOut,

    #[error("shutdown from quit")]
    Shutdown,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    #[error("exhausted the outbound call id space before finding a free one")]
    TooManyOutstanding,
}

pub type Result<T> = std::result::Result<T, Error>;
