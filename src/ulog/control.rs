//! Starting, stopping and throttling the remote log stream.
use std::fmt::Display;
use std::sync::Arc;

use tracing::debug;

use crate::transport::{Identity, LoggingData, MsgId};

pub const MAV_CMD_LOGGING_START: u16 = 2510;
pub const MAV_CMD_LOGGING_STOP: u16 = 2511;

/// COMMAND_LONG to be sent by a [CommandSender].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLong {
    pub target: Identity,
    pub command: u16,
    pub params: [f32; 7],
}

impl CommandLong {
    /// Command with all parameters set to 0.
    #[must_use]
    pub fn new(target: Identity, command: u16) -> Self {
        Self {
            target,
            command,
            params: [0.0; 7],
        }
    }
}

/// Outcome of a command, as reported by the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    NoSystem,
    ConnectionError,
    Busy,
    CommandDenied,
    Unsupported,
    Timeout,
    InProgress,
    Failed,
}

/// Command transport with request/response semantics, e.g. COMMAND_LONG/COMMAND_ACK
/// including retries.
pub trait CommandSender: Send + Sync {
    fn send_command(&self, command: CommandLong) -> CommandResult;

    /// Request `msg_id` be streamed at `rate_hz`.
    fn set_message_rate(&self, msg_id: MsgId, rate_hz: f64) -> CommandResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingResult {
    Success,
    NoSystem,
    ConnectionError,
    Busy,
    CommandDenied,
    Timeout,
    Unknown,
}

impl From<CommandResult> for LoggingResult {
    fn from(result: CommandResult) -> Self {
        match result {
            CommandResult::Success => LoggingResult::Success,
            CommandResult::NoSystem => LoggingResult::NoSystem,
            CommandResult::ConnectionError => LoggingResult::ConnectionError,
            CommandResult::Busy => LoggingResult::Busy,
            CommandResult::CommandDenied => LoggingResult::CommandDenied,
            CommandResult::Timeout => LoggingResult::Timeout,
            _ => LoggingResult::Unknown,
        }
    }
}

impl Display for LoggingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LoggingResult::Success => "Success",
            LoggingResult::NoSystem => "No system connected",
            LoggingResult::ConnectionError => "Connection error",
            LoggingResult::Busy => "System busy",
            LoggingResult::CommandDenied => "Command denied",
            LoggingResult::Timeout => "Timeout",
            LoggingResult::Unknown => "Unknown",
        })
    }
}

/// Controls the log stream of the autopilot at `target`.
#[derive(Clone)]
pub struct LoggingControl {
    target: Identity,
    commands: Arc<dyn CommandSender>,
}

impl LoggingControl {
    #[must_use]
    pub fn new(target: Identity, commands: Arc<dyn CommandSender>) -> Self {
        Self { target, commands }
    }

    #[must_use]
    pub fn target(&self) -> Identity {
        self.target
    }

    pub fn start_logging(&self) -> LoggingResult {
        self.command(MAV_CMD_LOGGING_START)
    }

    pub fn stop_logging(&self) -> LoggingResult {
        self.command(MAV_CMD_LOGGING_STOP)
    }

    /// Set the rate of unacknowledged log data.
    pub fn set_rate_logging(&self, rate_hz: f64) -> LoggingResult {
        self.rate(LoggingData::ID, rate_hz)
    }

    /// Set the rate of acknowledged log data.
    pub fn set_rate_logging_acked(&self, rate_hz: f64) -> LoggingResult {
        self.rate(LoggingData::ACKED_ID, rate_hz)
    }

    fn command(&self, command: u16) -> LoggingResult {
        let result = self
            .commands
            .send_command(CommandLong::new(self.target, command));
        debug!(command, ?result, "logging command finished");
        result.into()
    }

    fn rate(&self, msg_id: MsgId, rate_hz: f64) -> LoggingResult {
        let result = self.commands.set_message_rate(msg_id, rate_hz);
        debug!(msg_id, rate_hz, ?result, "logging rate request finished");
        result.into()
    }
}

impl std::fmt::Debug for LoggingControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingControl")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
