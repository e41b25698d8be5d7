//! MAVLink transport messages consumed and produced by this crate.
//!
//! Only the handful of messages the engines need are modeled here. Payloads are the
//! MAVLink wire payloads, i.e., little-endian with fields ordered by size, after the
//! transport layer has already validated framing and CRC. MAVLink 2 strips trailing zero
//! bytes from payloads so every decoder zero-extends its input to the full length.
//!
//! Reference: [MAVLink common message set](https://mavlink.io/en/messages/common.html)
use crossbeam::channel::Sender;
use tracing::debug;

use crate::prelude::*;

pub type MsgId = u32;

/// System and component id pair identifying a MAVLink node.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub system_id: u8,
    pub component_id: u8,
}

impl Identity {
    #[must_use]
    pub const fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
        }
    }
}

/// Copy `payload` into a zero-filled array of the full wire length.
fn zero_extended<const N: usize>(payload: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let n = payload.len().min(N);
    buf[..n].copy_from_slice(&payload[..n]);
    buf
}

/// SYSTEM_TIME, the wall-clock broadcast.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTimeMessage {
    /// Unix time in microseconds.
    pub time_unix_usec: u64,
    /// Time since boot in milliseconds.
    pub time_boot_ms: u32,
}

impl SystemTimeMessage {
    pub const ID: MsgId = 2;
    pub const LEN: usize = 12;
    /// Wall-clock values below this (2009-02-13T23:31:30Z) mean the sender has no valid
    /// clock yet.
    pub const MIN_VALID_UNIX_USEC: u64 = 1_234_567_890 * 1_000_000;

    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        let buf: [u8; Self::LEN] = zero_extended(payload);
        Self {
            time_unix_usec: u64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            time_boot_ms: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.time_unix_usec.to_le_bytes());
        buf.extend_from_slice(&self.time_boot_ms.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.time_unix_usec >= Self::MIN_VALID_UNIX_USEC
    }

    /// The broadcast wall-clock time as an [hifitime::Epoch].
    #[cfg(feature = "timecode")]
    #[must_use]
    pub fn epoch(&self) -> hifitime::Epoch {
        hifitime::Epoch::from_unix_milliseconds(self.time_unix_usec as f64 / 1_000.0)
    }
}

/// TIMESYNC, the round-trip probe.
///
/// `tc1` is the remote echo timestamp; 0 asks the receiver to reply. `ts1` is the
/// originator's send timestamp and is echoed back unchanged in the reply.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimesyncMessage {
    pub tc1: i64,
    pub ts1: i64,
}

impl TimesyncMessage {
    pub const ID: MsgId = 111;
    pub const LEN: usize = 16;

    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        let buf: [u8; Self::LEN] = zero_extended(payload);
        let (tc1, ts1) = buf.split_at(8);
        Self {
            tc1: i64::from_le_bytes(tc1.try_into().unwrap_or_default()),
            ts1: i64::from_le_bytes(ts1.try_into().unwrap_or_default()),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.tc1.to_le_bytes());
        buf.extend_from_slice(&self.ts1.to_le_bytes());
        buf
    }

    /// True when the sender asks us to reply.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.tc1 == 0
    }
}

/// LOGGING_DATA and LOGGING_DATA_ACKED; both share the same wire layout.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingData {
    pub sequence: u16,
    pub target: Identity,
    /// Offset of the first message start in `data`, or [LoggingData::NO_MESSAGE_START].
    pub first_message_offset: u8,
    /// Exactly `length` bytes of log stream data.
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub data: Vec<u8>,
}

impl LoggingData {
    pub const ID: MsgId = 266;
    pub const ACKED_ID: MsgId = 267;
    /// Capacity of the data field.
    pub const DATA_LEN: usize = 249;
    pub const LEN: usize = 6 + Self::DATA_LEN;
    /// `first_message_offset` value for a chunk that is pure continuation data.
    pub const NO_MESSAGE_START: u8 = 255;

    /// Decode a wire payload. A declared length larger than the data field is clamped
    /// to the field capacity.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        let buf: [u8; Self::LEN] = zero_extended(payload);
        let length = (buf[4] as usize).min(Self::DATA_LEN);
        Self {
            sequence: u16::from_le_bytes([buf[0], buf[1]]),
            target: Identity::new(buf[2], buf[3]),
            first_message_offset: buf[5],
            data: buf[6..6 + length].to_vec(),
        }
    }

    /// Encode to a full length wire payload.
    ///
    /// # Panics
    /// If `data` is longer than [LoggingData::DATA_LEN].
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        assert!(self.data.len() <= Self::DATA_LEN, "logging data too long");
        let mut buf = vec![0u8; Self::LEN];
        buf[..2].copy_from_slice(&self.sequence.to_le_bytes());
        buf[2] = self.target.system_id;
        buf[3] = self.target.component_id;
        buf[4] = self.data.len() as u8;
        buf[5] = self.first_message_offset;
        buf[6..6 + self.data.len()].copy_from_slice(&self.data);
        buf
    }
}

/// LOGGING_ACK, sent for every LOGGING_DATA_ACKED received.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingAck {
    pub sequence: u16,
    pub target: Identity,
}

impl LoggingAck {
    pub const ID: MsgId = 268;
    pub const LEN: usize = 4;

    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        let buf: [u8; Self::LEN] = zero_extended(payload);
        Self {
            sequence: u16::from_le_bytes([buf[0], buf[1]]),
            target: Identity::new(buf[2], buf[3]),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.target.system_id);
        buf.push(self.target.component_id);
        buf
    }
}

/// Messages consumed by the engines.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    SystemTime(SystemTimeMessage),
    Timesync(TimesyncMessage),
    LoggingData(LoggingData),
    LoggingDataAcked(LoggingData),
}

impl Inbound {
    /// Decode a MAVLink payload for `msg_id`.
    ///
    /// # Errors
    /// [Error::UnknownMessageId] if `msg_id` is not a message this crate consumes.
    pub fn decode(msg_id: MsgId, payload: &[u8]) -> Result<Self> {
        Ok(match msg_id {
            SystemTimeMessage::ID => Inbound::SystemTime(SystemTimeMessage::decode(payload)),
            TimesyncMessage::ID => Inbound::Timesync(TimesyncMessage::decode(payload)),
            LoggingData::ID => Inbound::LoggingData(LoggingData::decode(payload)),
            LoggingData::ACKED_ID => Inbound::LoggingDataAcked(LoggingData::decode(payload)),
            other => return Err(Error::UnknownMessageId(other)),
        })
    }

    #[must_use]
    pub fn msg_id(&self) -> MsgId {
        match self {
            Inbound::SystemTime(_) => SystemTimeMessage::ID,
            Inbound::Timesync(_) => TimesyncMessage::ID,
            Inbound::LoggingData(_) => LoggingData::ID,
            Inbound::LoggingDataAcked(_) => LoggingData::ACKED_ID,
        }
    }
}

/// Messages produced by the engines.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    SystemTime(SystemTimeMessage),
    Timesync(TimesyncMessage),
    LoggingAck(LoggingAck),
}

impl Outbound {
    #[must_use]
    pub fn msg_id(&self) -> MsgId {
        match self {
            Outbound::SystemTime(_) => SystemTimeMessage::ID,
            Outbound::Timesync(_) => TimesyncMessage::ID,
            Outbound::LoggingAck(_) => LoggingAck::ID,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Outbound::SystemTime(msg) => msg.encode(),
            Outbound::Timesync(msg) => msg.encode(),
            Outbound::LoggingAck(msg) => msg.encode(),
        }
    }
}

/// Destination for outbound messages. Sending is fire-and-forget; a sink must not block.
pub trait MessageSink: Send + Sync {
    fn send(&self, msg: Outbound);
}

/// [MessageSink] forwarding into a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Outbound>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: Sender<Outbound>) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelSink {
    fn send(&self, msg: Outbound) {
        let msg_id = msg.msg_id();
        if self.tx.try_send(msg).is_err() {
            debug!(msg_id, "outbound channel closed or full, dropping message");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam::channel::unbounded;

    #[cfg(feature = "timecode")]
    #[test]
    fn system_time_epoch() {
        let msg = SystemTimeMessage {
            time_unix_usec: 1_700_000_000_000_000,
            time_boot_ms: 0,
        };
        assert!((msg.epoch().to_unix_seconds() - 1_700_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn decode_system_time() {
        let mut payload = 1_700_000_000_000_000u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&42u32.to_le_bytes());

        let msg = SystemTimeMessage::decode(&payload);

        assert_eq!(msg.time_unix_usec, 1_700_000_000_000_000);
        assert_eq!(msg.time_boot_ms, 42);
        assert!(msg.is_valid());
    }

    #[test]
    fn system_time_validity_threshold() {
        let msg = SystemTimeMessage {
            time_unix_usec: SystemTimeMessage::MIN_VALID_UNIX_USEC - 1,
            time_boot_ms: 0,
        };
        assert!(!msg.is_valid());
    }

    #[test]
    fn decode_truncated_timesync() {
        // MAVLink 2 drops trailing zeros; a request with ts1 small enough loses bytes
        let payload = [0, 0, 0, 0, 0, 0, 0, 0, 0x10, 0x27];

        let msg = TimesyncMessage::decode(&payload);

        assert_eq!(msg.tc1, 0);
        assert_eq!(msg.ts1, 10_000);
        assert!(msg.is_request());
    }

    #[test]
    fn decode_logging_data() {
        let mut payload = vec![
            0x07, 0x00, // sequence 7
            0xff, 0xbe, // target
            0x03, // length
            0x01, // first message offset
            0xaa, 0xbb, 0xcc, 0xdd, // one byte past length
        ];
        payload.resize(LoggingData::LEN, 0);

        let msg = LoggingData::decode(&payload);

        assert_eq!(msg.sequence, 7);
        assert_eq!(msg.target, Identity::new(255, 190));
        assert_eq!(msg.first_message_offset, 1);
        assert_eq!(msg.data, vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn decode_logging_data_clamps_length() {
        let mut payload = vec![0, 0, 1, 1, 0xff, 0];
        payload.resize(LoggingData::LEN, 0x55);

        let msg = LoggingData::decode(&payload);

        assert_eq!(msg.data.len(), LoggingData::DATA_LEN);
    }

    #[test]
    fn logging_ack_layout() {
        let ack = LoggingAck {
            sequence: 0x0102,
            target: Identity::new(1, 2),
        };
        assert_eq!(ack.encode(), vec![0x02, 0x01, 1, 2]);
        assert_eq!(LoggingAck::decode(&ack.encode()), ack);
    }

    #[test]
    fn inbound_rejects_unknown_id() {
        let zult = Inbound::decode(0, &[]);
        assert!(matches!(zult, Err(Error::UnknownMessageId(0))));
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, rx) = unbounded();
        let sink = ChannelSink::new(tx);

        sink.send(Outbound::Timesync(TimesyncMessage { tc1: 0, ts1: 5 }));

        let got = rx.try_recv().unwrap();
        assert_eq!(got.msg_id(), TimesyncMessage::ID);
    }

    #[test]
    fn channel_sink_tolerates_closed_channel() {
        let (tx, rx) = unbounded();
        drop(rx);
        ChannelSink::new(tx).send(Outbound::Timesync(TimesyncMessage { tc1: 0, ts1: 5 }));
    }
}
