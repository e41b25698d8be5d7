#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },

    #[error("Invalid UTF-8 in message text: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Framed log message type tag that is not one of the supported kinds.
    #[error("Unknown log message kind {0:#04x}")]
    UnknownMessageKind(u8),

    #[error("Sync message magic does not match")]
    InvalidSyncMagic,

    /// MAVLink message id this crate does not consume.
    #[error("Unknown message id {0}")]
    UnknownMessageId(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
