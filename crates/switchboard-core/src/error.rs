/// Failures crossing the channel boundary
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Authentication or handshake failed; `connect()` is not retried internally
    #[error("connection failed: {0}")]
    Connection(String),

    /// No connected channel owns the destination
    #[error("no channel for destination: {0}")]
    NoChannel(String),

    /// The platform rejected or never received an outbound message
    #[error("delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
