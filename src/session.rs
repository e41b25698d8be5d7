//! Wiring of the engines for a single connection.
use std::sync::Arc;

use tracing::trace;

use crate::clock::Clock;
use crate::timesync::{Timesync, TimesyncConfig};
use crate::transport::{Identity, Inbound, MessageSink, Outbound};
use crate::ulog::{LogChunk, LogStreamEngine, StreamConfig};

/// Routes inbound messages of a single connection to the engines and sends their
/// replies.
///
/// ```
/// use std::sync::Arc;
/// use crossbeam::channel::unbounded;
/// use mavstream::clock::SystemClock;
/// use mavstream::transport::{ChannelSink, Identity, Inbound, LoggingAck, Outbound};
/// use mavstream::Session;
///
/// let (tx, rx) = unbounded();
/// let session = Session::builder(Arc::new(SystemClock::default()), Arc::new(ChannelSink::new(tx)))
///     .build();
///
/// // LOGGING_DATA_ACKED, sequence 3, no message start
/// let payload = [3, 0, 255, 0, 0, 255];
/// let msg = Inbound::decode(267, &payload).unwrap();
/// session.handle(Identity::new(1, 1), &msg);
///
/// assert_eq!(
///     rx.try_recv().unwrap(),
///     Outbound::LoggingAck(LoggingAck { sequence: 3, target: Identity::new(1, 1) })
/// );
/// ```
pub struct Session {
    timesync: Timesync,
    logs: LogStreamEngine,
    sink: Arc<dyn MessageSink>,
}

pub struct SessionBuilder {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn MessageSink>,
    timesync: TimesyncConfig,
    stream: StreamConfig,
}

impl SessionBuilder {
    #[must_use]
    pub fn with_timesync_config(mut self, config: TimesyncConfig) -> Self {
        self.timesync = config;
        self
    }

    #[must_use]
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream = config;
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        Session {
            timesync: Timesync::new(self.timesync, self.clock, self.sink.clone()),
            logs: LogStreamEngine::new(self.stream),
            sink: self.sink,
        }
    }
}

impl Session {
    #[must_use]
    pub fn builder(clock: Arc<dyn Clock>, sink: Arc<dyn MessageSink>) -> SessionBuilder {
        SessionBuilder {
            clock,
            sink,
            timesync: TimesyncConfig::default(),
            stream: StreamConfig::default(),
        }
    }

    /// Assemble a session from already configured engines. `sink` receives log acks.
    #[must_use]
    pub fn new(timesync: Timesync, logs: LogStreamEngine, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            timesync,
            logs,
            sink,
        }
    }

    #[must_use]
    pub fn timesync(&self) -> &Timesync {
        &self.timesync
    }

    #[must_use]
    pub fn logs(&self) -> &LogStreamEngine {
        &self.logs
    }

    /// Periodic work; call regularly, e.g., every 100ms.
    pub fn do_work(&self) {
        self.timesync.do_work();
    }

    /// Handle a message received from `sender`.
    pub fn handle(&self, sender: Identity, msg: &Inbound) {
        trace!(msg_id = msg.msg_id(), ?sender, "handling message");
        match msg {
            Inbound::SystemTime(msg) => self.timesync.on_system_time(msg),
            Inbound::Timesync(msg) => self.timesync.on_timesync(msg),
            Inbound::LoggingData(msg) => {
                self.logs
                    .ingest_chunk(&LogChunk::from_logging_data(sender, msg), false);
            }
            Inbound::LoggingDataAcked(msg) => {
                let chunk = LogChunk::from_logging_data(sender, msg);
                if let Some(ack) = self.logs.ingest_chunk(&chunk, true) {
                    self.sink.send(Outbound::LoggingAck(ack));
                }
            }
        }
    }
}
