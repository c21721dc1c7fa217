use thiserror::Error;

/// Errors produced by the bus protocol layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("peer not connected: {0}")]
    PeerGone(u64),

    #[error("reply channel dropped")]
    ReplyDropped,

    #[error("subscriber error: {0}")]
    Subscriber(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Codec(e.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;
