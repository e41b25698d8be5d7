//! Reassembly of framed ULog messages from log stream chunks.
//!
//! Chunks carry a hint with the offset of the first message start in the chunk. Bytes
//! before that offset can only complete the message already in progress; new messages
//! are only started at or after it. When the two disagree the stream is misaligned and
//! everything up to the next known message start is discarded.
use typed_builder::TypedBuilder;

use super::message::MessageHeader;
use crate::transport::LoggingData;

/// ULog file header: magic, version and the logging start timestamp.
pub const FILE_HEADER_LEN: usize = 16;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, TypedBuilder)]
pub struct StreamConfig {
    /// Number of leading stream bytes to strip before the first message.
    #[builder(default = FILE_HEADER_LEN)]
    pub file_header_len: usize,
    /// Skip message kinds a legacy decoder did not handle (RemoveLogged, Sync).
    #[builder(default = false)]
    pub legacy_kinds: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingHeader,
    AwaitingBody(MessageHeader),
    /// Not aligned on a message; waiting for the next chunk with a message start.
    Resync,
}

/// A complete message still in its wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDiagnostic {
    FileHeaderStripped { len: usize },
    DuplicateChunk { sequence: u16 },
    MissingChunks { expected: u16, actual: u16 },
    /// The first message offset points past the end of the chunk.
    InvalidOffset { offset: u8, len: usize },
    /// The in-progress message did not end at the next message start.
    Misaligned { discarded: usize },
    /// Continuation bytes with no message in progress.
    OrphanContinuation { discarded: usize },
    InvalidHeader { msg_type: u8, msg_size: u16 },
    /// Bytes dropped while waiting for a message start.
    Discarded { len: usize },
    Resynchronized { discarded: usize },
}

/// Result of ingesting a single chunk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub frames: Vec<RawFrame>,
    pub diagnostics: Vec<StreamDiagnostic>,
}

enum Step {
    Header,
    Frame,
    Stalled,
}

/// Byte stream state for a single log stream. Pure; does no locking, decoding or I/O.
#[derive(Debug, Clone)]
pub struct LogByteStream {
    state: StreamState,
    buffer: Vec<u8>,
    header_remaining: usize,
    last_sequence: Option<u16>,
}

impl Default for LogByteStream {
    fn default() -> Self {
        Self::new(FILE_HEADER_LEN)
    }
}

impl LogByteStream {
    #[must_use]
    pub fn new(file_header_len: usize) -> Self {
        Self {
            state: StreamState::AwaitingHeader,
            buffer: Vec::new(),
            header_remaining: file_header_len,
            last_sequence: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Number of bytes buffered for the message in progress.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Ingest the data of a single chunk.
    ///
    /// `first_message_offset` is the chunk's offset of the first message start, or
    /// [LoggingData::NO_MESSAGE_START] if all bytes continue the message in progress.
    /// `sequence`, if provided, is used to detect duplicate and missing chunks.
    pub fn ingest(
        &mut self,
        data: &[u8],
        first_message_offset: u8,
        sequence: Option<u16>,
    ) -> Ingested {
        let mut out = Ingested::default();

        if let Some(sequence) = sequence {
            if let Some(last) = self.last_sequence {
                if sequence == last {
                    out.diagnostics
                        .push(StreamDiagnostic::DuplicateChunk { sequence });
                    return out;
                }
                let expected = last.wrapping_add(1);
                if sequence != expected {
                    out.diagnostics.push(StreamDiagnostic::MissingChunks {
                        expected,
                        actual: sequence,
                    });
                    self.resync(&mut out);
                }
            }
            self.last_sequence = Some(sequence);
        }

        let mut offset = match first_message_offset {
            LoggingData::NO_MESSAGE_START => None,
            o if o as usize > data.len() => {
                out.diagnostics.push(StreamDiagnostic::InvalidOffset {
                    offset: o,
                    len: data.len(),
                });
                self.resync(&mut out);
                return out;
            }
            o => Some(o as usize),
        };

        let mut data = data;
        if self.header_remaining > 0 {
            let len = self.header_remaining.min(data.len());
            data = &data[len..];
            self.header_remaining -= len;
            if len > 0 {
                out.diagnostics
                    .push(StreamDiagnostic::FileHeaderStripped { len });
            }
            if self.header_remaining > 0 {
                return out;
            }
            // messages start right after the file header
            offset = Some(offset.map_or(0, |o| o.saturating_sub(len)));
        }

        let (continuation, start) = match offset {
            Some(o) => (&data[..o], Some(&data[o..])),
            None => (data, None),
        };

        if self.state == StreamState::Resync {
            let discarded = continuation.len();
            if start.is_none() {
                out.diagnostics
                    .push(StreamDiagnostic::Discarded { len: discarded });
                return out;
            }
            out.diagnostics
                .push(StreamDiagnostic::Resynchronized { discarded });
        } else {
            self.complete_in_progress(continuation, &mut out);
        }

        if let Some(start) = start {
            self.realign(&mut out);
            self.buffer.extend_from_slice(start);
            self.drive(&mut out);
        }

        out
    }

    fn resync(&mut self, out: &mut Ingested) {
        if !self.buffer.is_empty() {
            out.diagnostics.push(StreamDiagnostic::Discarded {
                len: self.buffer.len(),
            });
        }
        self.buffer.clear();
        self.state = StreamState::Resync;
        // the file header is only at the start of the stream; from here on offsets are
        // message starts
        self.header_remaining = 0;
    }

    fn in_progress(&self) -> bool {
        matches!(self.state, StreamState::AwaitingBody(_)) || !self.buffer.is_empty()
    }

    /// Feed continuation bytes, completing at most the message already in progress.
    fn complete_in_progress(&mut self, dat: &[u8], out: &mut Ingested) {
        if dat.is_empty() {
            return;
        }
        if !self.in_progress() {
            out.diagnostics
                .push(StreamDiagnostic::OrphanContinuation {
                    discarded: dat.len(),
                });
            self.state = StreamState::Resync;
            return;
        }

        self.buffer.extend_from_slice(dat);
        let completed = loop {
            match self.step(out) {
                Step::Header => continue,
                Step::Frame => break true,
                Step::Stalled => break false,
            }
        };
        if completed && !self.buffer.is_empty() {
            out.diagnostics.push(StreamDiagnostic::Misaligned {
                discarded: self.buffer.len(),
            });
            self.buffer.clear();
            self.state = StreamState::Resync;
        }
    }

    /// Called at a known message start. Anything still in progress cannot be completed.
    fn realign(&mut self, out: &mut Ingested) {
        if self.state != StreamState::Resync && self.in_progress() {
            let header_len = match self.state {
                StreamState::AwaitingBody(_) => MessageHeader::LEN,
                _ => 0,
            };
            out.diagnostics.push(StreamDiagnostic::Misaligned {
                discarded: self.buffer.len() + header_len,
            });
        }
        self.buffer.clear();
        self.state = StreamState::AwaitingHeader;
    }

    fn drive(&mut self, out: &mut Ingested) {
        while !matches!(self.step(out), Step::Stalled) {}
    }

    fn step(&mut self, out: &mut Ingested) -> Step {
        match self.state {
            StreamState::AwaitingHeader => {
                let Some(header) = MessageHeader::decode(&self.buffer) else {
                    return Step::Stalled;
                };
                if !header.is_plausible() {
                    out.diagnostics.push(StreamDiagnostic::InvalidHeader {
                        msg_type: header.msg_type,
                        msg_size: header.msg_size,
                    });
                    self.resync(out);
                    return Step::Stalled;
                }
                self.buffer.drain(..MessageHeader::LEN);
                self.state = StreamState::AwaitingBody(header);
                Step::Header
            }
            StreamState::AwaitingBody(header) => {
                let size = header.msg_size as usize;
                if self.buffer.len() < size {
                    return Step::Stalled;
                }
                let payload: Vec<u8> = self.buffer.drain(..size).collect();
                out.frames.push(RawFrame {
                    kind: header.msg_type,
                    payload,
                });
                self.state = StreamState::AwaitingHeader;
                Step::Frame
            }
            StreamState::Resync => Step::Stalled,
        }
    }
}
