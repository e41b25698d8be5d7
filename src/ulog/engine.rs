use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace, warn};

use super::message::{LogMessage, MessageKind};
use super::stream::{LogByteStream, RawFrame, StreamConfig, StreamDiagnostic};
use super::subscriptions::Subscriptions;
use crate::transport::{Identity, LoggingAck, LoggingData};

/// A single chunk of the log stream as received from `sender`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub sender: Identity,
    pub sequence: u16,
    pub first_message_offset: u8,
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub data: Vec<u8>,
}

impl LogChunk {
    #[must_use]
    pub fn from_logging_data(sender: Identity, msg: &LoggingData) -> Self {
        Self {
            sender,
            sequence: msg.sequence,
            first_message_offset: msg.first_message_offset,
            data: msg.data.clone(),
        }
    }
}

/// Receives stream framing diagnostics.
pub trait StreamObserver: Send + Sync {
    fn on_diagnostic(&self, chunk: &LogChunk, diagnostic: &StreamDiagnostic);
}

/// Default observer that logs diagnostics with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStreamObserver;

impl StreamObserver for TracingStreamObserver {
    fn on_diagnostic(&self, chunk: &LogChunk, diagnostic: &StreamDiagnostic) {
        let sequence = chunk.sequence;
        match diagnostic {
            StreamDiagnostic::FileHeaderStripped { len } => {
                trace!(sequence, len, "stripped log file header");
            }
            StreamDiagnostic::DuplicateChunk { .. } => {
                debug!(sequence, "ignoring duplicate log chunk");
            }
            StreamDiagnostic::MissingChunks { expected, actual } => {
                warn!(expected, actual, "missing log chunks");
            }
            StreamDiagnostic::InvalidOffset { offset, len } => {
                warn!(sequence, offset, len, "first message offset past end of chunk");
            }
            StreamDiagnostic::Misaligned { discarded } => {
                warn!(sequence, discarded, "log stream misaligned, dropping partial message");
            }
            StreamDiagnostic::OrphanContinuation { discarded } => {
                debug!(sequence, discarded, "continuation data with no message in progress");
            }
            StreamDiagnostic::InvalidHeader { msg_type, msg_size } => {
                warn!(sequence, msg_type, msg_size, "invalid log message header");
            }
            StreamDiagnostic::Discarded { len } => {
                trace!(sequence, len, "discarded log stream bytes");
            }
            StreamDiagnostic::Resynchronized { discarded } => {
                debug!(sequence, discarded, "log stream resynchronized");
            }
        }
    }
}

/// Reassembles and decodes the ULog stream from a single remote logger.
///
/// ```
/// use mavstream::transport::Identity;
/// use mavstream::ulog::{InfoMessage, LogChunk, LogMessage, LogStreamEngine, StreamConfig};
///
/// let engine = LogStreamEngine::new(StreamConfig::builder().file_header_len(0).build());
/// engine.subscriptions().on_info(|msg| println!("{} = {:?}", msg.key, msg.value));
///
/// let data = LogMessage::from(InfoMessage {
///     key: "char[3] ver".to_string(),
///     value: b"1.0".to_vec(),
/// })
/// .encode();
/// let chunk = LogChunk {
///     sender: Identity::new(1, 1),
///     sequence: 0,
///     first_message_offset: 0,
///     data,
/// };
/// let ack = engine.ingest_chunk(&chunk, true);
/// assert_eq!(ack.map(|a| a.sequence), Some(0));
/// ```
pub struct LogStreamEngine {
    config: StreamConfig,
    stream: Mutex<LogByteStream>,
    subscriptions: Arc<Subscriptions>,
    observer: Box<dyn StreamObserver>,
    last_chunk: Mutex<Option<LogChunk>>,
}

impl std::fmt::Debug for LogStreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamEngine")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl Default for LogStreamEngine {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl LogStreamEngine {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            stream: Mutex::new(LogByteStream::new(config.file_header_len)),
            config,
            subscriptions: Arc::default(),
            observer: Box::new(TracingStreamObserver),
            last_chunk: Mutex::default(),
        }
    }

    /// Replace the default [TracingStreamObserver].
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.subscriptions
    }

    /// The most recently received chunk, if any.
    #[must_use]
    pub fn last_chunk(&self) -> Option<LogChunk> {
        self.last_chunk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop any partial message and start over as if no data had been received.
    pub fn reset(&self) {
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) =
            LogByteStream::new(self.config.file_header_len);
        *self.last_chunk.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Ingest a chunk, dispatching every message it completes to subscribers.
    ///
    /// For `reliable` chunks, i.e., LOGGING_DATA_ACKED, returns the acknowledgement to send
    /// to the chunk's sender. Every reliable chunk is acknowledged, including duplicates
    /// and chunks that did not decode.
    pub fn ingest_chunk(&self, chunk: &LogChunk, reliable: bool) -> Option<LoggingAck> {
        self.subscriptions.dispatch_chunk(chunk);
        *self.last_chunk.lock().unwrap_or_else(PoisonError::into_inner) = Some(chunk.clone());

        let ingested = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ingest(&chunk.data, chunk.first_message_offset, Some(chunk.sequence));

        for diagnostic in &ingested.diagnostics {
            self.observer.on_diagnostic(chunk, diagnostic);
        }
        for frame in ingested.frames {
            if let Some(msg) = self.decode(chunk.sequence, &frame) {
                self.subscriptions.dispatch(&msg);
            }
        }

        reliable.then_some(LoggingAck {
            sequence: chunk.sequence,
            target: chunk.sender,
        })
    }

    fn decode(&self, sequence: u16, frame: &RawFrame) -> Option<LogMessage> {
        let Some(kind) = MessageKind::from_tag(frame.kind) else {
            debug!(
                sequence,
                kind = frame.kind,
                size = frame.payload.len(),
                "skipping unsupported log message"
            );
            return None;
        };
        if self.config.legacy_kinds
            && matches!(kind, MessageKind::RemoveLogged | MessageKind::Sync)
        {
            debug!(sequence, ?kind, "skipping log message in legacy mode");
            return None;
        }
        match LogMessage::decode(kind, &frame.payload) {
            Ok(msg) => Some(msg),
            Err(err) => {
                debug!(sequence, ?kind, %err, "failed to decode log message");
                None
            }
        }
    }
}
