//! ULog streaming over MAVLink.
//!
//! A remote logger streams its log as LOGGING_DATA, or LOGGING_DATA_ACKED when the
//! delivery should be acknowledged. The chunks are reassembled into framed ULog messages
//! that are decoded and delivered to subscribers.
//!
//! Reference: <https://mavlink.io/en/services/ulog.html>
mod control;
mod engine;
mod message;
mod stream;
mod subscriptions;

pub use control::{
    CommandLong, CommandResult, CommandSender, LoggingControl, LoggingResult,
    MAV_CMD_LOGGING_START, MAV_CMD_LOGGING_STOP,
};
pub use engine::{LogChunk, LogStreamEngine, StreamObserver, TracingStreamObserver};
pub use message::{
    AddLoggedMessage, DataMessage, DropoutMessage, FlagBitsMessage, FormatMessage,
    InfoMessage, InfoMultipleMessage, LogLevel, LogMessage, LoggingMessage, MessageHeader,
    MessageKind, ParameterMessage, RemoveLoggedMessage, SyncMessage,
};
pub use stream::{
    Ingested, LogByteStream, RawFrame, StreamConfig, StreamDiagnostic, StreamState,
    FILE_HEADER_LEN,
};
pub use subscriptions::{ChunkHandler, Handler, Subscriptions};
