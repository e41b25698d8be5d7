//! Framed ULog messages carried in the log stream.
//!
//! Every message is a 3 byte header, `msg_size` (LE u16) and a single character type
//! tag, followed by exactly `msg_size` payload bytes.
//!
//! Reference: [ULog file format](https://docs.px4.io/main/en/dev_log/ulog_file_format.html)
use derive_more::From;

use crate::prelude::*;

/// ULog message type tags handled by this crate.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    FlagBits = b'B',
    Format = b'F',
    Info = b'I',
    InfoMultiple = b'M',
    Parameter = b'P',
    AddLogged = b'A',
    RemoveLogged = b'R',
    Data = b'D',
    Logging = b'L',
    Dropout = b'O',
    Sync = b'S',
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::FlagBits,
        MessageKind::Format,
        MessageKind::Info,
        MessageKind::InfoMultiple,
        MessageKind::Parameter,
        MessageKind::AddLogged,
        MessageKind::RemoveLogged,
        MessageKind::Data,
        MessageKind::Logging,
        MessageKind::Dropout,
        MessageKind::Sync,
    ];

    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        Self::from_tag(tag).ok_or(Error::UnknownMessageKind(tag))
    }
}

/// Header preceding every framed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Payload size, not including the header.
    pub msg_size: u16,
    pub msg_type: u8,
}

impl MessageHeader {
    pub const LEN: usize = 3;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        Some(MessageHeader {
            msg_size: u16::from_le_bytes([dat[0], dat[1]]),
            msg_type: dat[2],
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let [lo, hi] = self.msg_size.to_le_bytes();
        [lo, hi, self.msg_type]
    }

    /// Sanity check of the type tag. ULog tags are always ASCII uppercase letters, so
    /// anything else means the stream is not aligned on a header.
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        self.msg_type.is_ascii_uppercase()
    }
}

/// Flag bitset message. Definitions section.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlagBitsMessage {
    pub compat_flags: [u8; 8],
    pub incompat_flags: [u8; 8],
    /// File offsets of appended data, all zero if there is none.
    pub appended_offsets: [u64; 3],
}

/// Format definition for a single, possibly nested, type: `name:field0;field1;`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatMessage {
    pub format: String,
}

impl FormatMessage {
    /// The type name, if the definition is well formed.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.format.split_once(':').map(|(name, _)| name)
    }

    /// Field definitions, e.g. `uint64_t timestamp`.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.format
            .split_once(':')
            .map_or("", |(_, fields)| fields)
            .split(';')
            .filter(|f| !f.is_empty())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    pub key: String,
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub value: Vec<u8>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMultipleMessage {
    /// Set when this continues the value of a previous message with the same key.
    pub is_continued: bool,
    pub key: String,
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub value: Vec<u8>,
}

/// Parameter value, in the definitions section or a runtime change in the data section.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMessage {
    pub key: String,
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub value: Vec<u8>,
}

/// Subscription of a logged message, assigning the `msg_id` used by [DataMessage].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLoggedMessage {
    pub multi_id: u8,
    pub msg_id: u16,
    pub message_name: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveLoggedMessage {
    pub msg_id: u16,
}

/// A logged message, encoded according to its format definition.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub msg_id: u16,
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    pub data: Vec<u8>,
}

/// Log level of a [LoggingMessage]. Levels are the ASCII digits '0' to '7'.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Undefined,
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'0' => LogLevel::Emergency,
            b'1' => LogLevel::Alert,
            b'2' => LogLevel::Critical,
            b'3' => LogLevel::Error,
            b'4' => LogLevel::Warning,
            b'5' => LogLevel::Notice,
            b'6' => LogLevel::Info,
            b'7' => LogLevel::Debug,
            _ => LogLevel::Undefined,
        }
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            LogLevel::Undefined => 0,
            LogLevel::Emergency => b'0',
            LogLevel::Alert => b'1',
            LogLevel::Critical => b'2',
            LogLevel::Error => b'3',
            LogLevel::Warning => b'4',
            LogLevel::Notice => b'5',
            LogLevel::Info => b'6',
            LogLevel::Debug => b'7',
        }
    }
}

/// Text log message.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingMessage {
    pub log_level: LogLevel,
    /// Timestamp in microseconds.
    pub timestamp: u64,
    pub message: String,
}

/// Data lost by the logger, e.g., because its buffer was full.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropoutMessage {
    /// Duration in milliseconds.
    pub duration: u16,
}

/// Synchronization marker used to find message boundaries in a damaged file.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncMessage;

impl SyncMessage {
    pub const MAGIC: [u8; 8] = [0x2f, 0x73, 0x13, 0x20, 0x25, 0x0c, 0xbb, 0x12];
}

/// A decoded log stream message.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum LogMessage {
    FlagBits(FlagBitsMessage),
    Format(FormatMessage),
    Info(InfoMessage),
    InfoMultiple(InfoMultipleMessage),
    Parameter(ParameterMessage),
    AddLogged(AddLoggedMessage),
    RemoveLogged(RemoveLoggedMessage),
    Data(DataMessage),
    Logging(LoggingMessage),
    Dropout(DropoutMessage),
    Sync(SyncMessage),
}

fn need(dat: &[u8], minimum: usize) -> Result<()> {
    if dat.len() < minimum {
        return Err(Error::NotEnoughData {
            actual: dat.len(),
            minimum,
        });
    }
    Ok(())
}

fn text(dat: &[u8]) -> Result<String> {
    Ok(String::from_utf8(dat.to_vec())?)
}

fn le_u16(dat: &[u8]) -> u16 {
    u16::from_le_bytes([dat[0], dat[1]])
}

fn le_u64(dat: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&dat[..8]);
    u64::from_le_bytes(buf)
}

/// Split a 1 byte length prefixed key from `dat`, returning the key and the remainder.
fn key_value(dat: &[u8]) -> Result<(String, &[u8])> {
    need(dat, 1)?;
    let key_len = dat[0] as usize;
    need(dat, 1 + key_len)?;
    let (key, value) = dat[1..].split_at(key_len);
    Ok((text(key)?, value))
}

fn push_key(buf: &mut Vec<u8>, key: &str) {
    let len = u8::try_from(key.len()).expect("key longer than 255 bytes");
    buf.push(len);
    buf.extend_from_slice(key.as_bytes());
}

impl LogMessage {
    /// Decode the payload of a message of type `kind`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if the payload is shorter than the fixed part of the message,
    /// [Error::InvalidUtf8] for malformed text fields, or [Error::InvalidSyncMagic].
    pub fn decode(kind: MessageKind, dat: &[u8]) -> Result<Self> {
        Ok(match kind {
            MessageKind::FlagBits => {
                need(dat, 40)?;
                let mut msg = FlagBitsMessage::default();
                msg.compat_flags.copy_from_slice(&dat[..8]);
                msg.incompat_flags.copy_from_slice(&dat[8..16]);
                for (i, offset) in msg.appended_offsets.iter_mut().enumerate() {
                    *offset = le_u64(&dat[16 + i * 8..]);
                }
                msg.into()
            }
            MessageKind::Format => FormatMessage { format: text(dat)? }.into(),
            MessageKind::Info => {
                let (key, value) = key_value(dat)?;
                InfoMessage {
                    key,
                    value: value.to_vec(),
                }
                .into()
            }
            MessageKind::InfoMultiple => {
                need(dat, 1)?;
                let (key, value) = key_value(&dat[1..])?;
                InfoMultipleMessage {
                    is_continued: dat[0] != 0,
                    key,
                    value: value.to_vec(),
                }
                .into()
            }
            MessageKind::Parameter => {
                let (key, value) = key_value(dat)?;
                ParameterMessage {
                    key,
                    value: value.to_vec(),
                }
                .into()
            }
            MessageKind::AddLogged => {
                need(dat, 3)?;
                AddLoggedMessage {
                    multi_id: dat[0],
                    msg_id: le_u16(&dat[1..]),
                    message_name: text(&dat[3..])?,
                }
                .into()
            }
            MessageKind::RemoveLogged => {
                need(dat, 2)?;
                RemoveLoggedMessage {
                    msg_id: le_u16(dat),
                }
                .into()
            }
            MessageKind::Data => {
                need(dat, 2)?;
                DataMessage {
                    msg_id: le_u16(dat),
                    data: dat[2..].to_vec(),
                }
                .into()
            }
            MessageKind::Logging => {
                need(dat, 9)?;
                LoggingMessage {
                    log_level: LogLevel::from_byte(dat[0]),
                    timestamp: le_u64(&dat[1..]),
                    message: text(&dat[9..])?,
                }
                .into()
            }
            MessageKind::Dropout => {
                need(dat, 2)?;
                DropoutMessage {
                    duration: le_u16(dat),
                }
                .into()
            }
            MessageKind::Sync => {
                need(dat, SyncMessage::MAGIC.len())?;
                if dat[..SyncMessage::MAGIC.len()] != SyncMessage::MAGIC {
                    return Err(Error::InvalidSyncMagic);
                }
                SyncMessage.into()
            }
        })
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            LogMessage::FlagBits(_) => MessageKind::FlagBits,
            LogMessage::Format(_) => MessageKind::Format,
            LogMessage::Info(_) => MessageKind::Info,
            LogMessage::InfoMultiple(_) => MessageKind::InfoMultiple,
            LogMessage::Parameter(_) => MessageKind::Parameter,
            LogMessage::AddLogged(_) => MessageKind::AddLogged,
            LogMessage::RemoveLogged(_) => MessageKind::RemoveLogged,
            LogMessage::Data(_) => MessageKind::Data,
            LogMessage::Logging(_) => MessageKind::Logging,
            LogMessage::Dropout(_) => MessageKind::Dropout,
            LogMessage::Sync(_) => MessageKind::Sync,
        }
    }

    /// Encode the message payload, without the header.
    ///
    /// # Panics
    /// If a key is longer than 255 bytes.
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            LogMessage::FlagBits(msg) => {
                buf.extend_from_slice(&msg.compat_flags);
                buf.extend_from_slice(&msg.incompat_flags);
                for offset in msg.appended_offsets {
                    buf.extend_from_slice(&offset.to_le_bytes());
                }
            }
            LogMessage::Format(msg) => buf.extend_from_slice(msg.format.as_bytes()),
            LogMessage::Info(InfoMessage { key, value })
            | LogMessage::Parameter(ParameterMessage { key, value }) => {
                push_key(&mut buf, key);
                buf.extend_from_slice(value);
            }
            LogMessage::InfoMultiple(msg) => {
                buf.push(u8::from(msg.is_continued));
                push_key(&mut buf, &msg.key);
                buf.extend_from_slice(&msg.value);
            }
            LogMessage::AddLogged(msg) => {
                buf.push(msg.multi_id);
                buf.extend_from_slice(&msg.msg_id.to_le_bytes());
                buf.extend_from_slice(msg.message_name.as_bytes());
            }
            LogMessage::RemoveLogged(msg) => buf.extend_from_slice(&msg.msg_id.to_le_bytes()),
            LogMessage::Data(msg) => {
                buf.extend_from_slice(&msg.msg_id.to_le_bytes());
                buf.extend_from_slice(&msg.data);
            }
            LogMessage::Logging(msg) => {
                buf.push(msg.log_level.to_byte());
                buf.extend_from_slice(&msg.timestamp.to_le_bytes());
                buf.extend_from_slice(msg.message.as_bytes());
            }
            LogMessage::Dropout(msg) => buf.extend_from_slice(&msg.duration.to_le_bytes()),
            LogMessage::Sync(_) => buf.extend_from_slice(&SyncMessage::MAGIC),
        }
        buf
    }

    /// Encode the complete framed message, header included.
    ///
    /// # Panics
    /// If the payload is larger than `u16::MAX` bytes or a key is longer than 255 bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let header = MessageHeader {
            msg_size: u16::try_from(payload.len()).expect("payload too large for a ULog message"),
            msg_type: self.kind().tag(),
        };
        let mut buf = Vec::with_capacity(MessageHeader::LEN + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&payload);
        buf
    }
}
