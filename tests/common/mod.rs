#![allow(dead_code)]
use std::sync::{Arc, Mutex};

use mavstream::transport::{Identity, LoggingData};
use mavstream::ulog::{
    DataMessage, DropoutMessage, InfoMessage, LogChunk, LogLevel, LogMessage, LoggingMessage,
    LogStreamEngine, MessageKind, ParameterMessage, FILE_HEADER_LEN,
};
use rand::Rng;

pub const VEHICLE: Identity = Identity::new(1, 1);
pub const GCS: Identity = Identity::new(255, 190);

/// ULog file magic "ULog" 0x01 0x12 0x35, version 1, 0 timestamp.
pub fn file_header() -> Vec<u8> {
    let header = hex::decode("554c6f67011235010000000000000000").unwrap();
    assert_eq!(header.len(), FILE_HEADER_LEN);
    header
}

pub fn sample_messages() -> Vec<LogMessage> {
    let mut messages: Vec<LogMessage> = vec![
        InfoMessage {
            key: "char[8] sys_name".to_string(),
            value: b"PX4_SITL".to_vec(),
        }
        .into(),
        ParameterMessage {
            key: "int32_t SYS_AUTOSTART".to_string(),
            value: 4001i32.to_le_bytes().to_vec(),
        }
        .into(),
    ];
    for i in 0..40u16 {
        messages.push(
            DataMessage {
                msg_id: i % 3,
                data: (0..(i * 7) % 180).map(|b| b as u8).collect(),
            }
            .into(),
        );
        if i % 5 == 0 {
            messages.push(
                LoggingMessage {
                    log_level: LogLevel::Info,
                    timestamp: u64::from(i) * 1_000,
                    message: format!("message number {i}"),
                }
                .into(),
            );
        }
        if i % 11 == 0 {
            messages.push(DropoutMessage { duration: i }.into());
        }
    }
    messages
}

/// A log stream, file header included, and the offset at which each message starts.
pub fn ulog_stream(messages: &[LogMessage]) -> (Vec<u8>, Vec<usize>) {
    let mut stream = file_header();
    let mut starts = Vec::with_capacity(messages.len());
    for msg in messages {
        starts.push(stream.len());
        stream.extend(msg.encode());
    }
    (stream, starts)
}

/// Split `stream` into chunks ending at `cuts` (and at the end of the stream), with
/// sequences starting at 0.
pub fn chunk_at(stream: &[u8], starts: &[usize], cuts: &[usize]) -> Vec<LoggingData> {
    let mut bounds: Vec<usize> = cuts.to_vec();
    bounds.push(stream.len());
    let mut chunks = Vec::new();
    let mut begin = 0;
    for (sequence, end) in bounds.into_iter().enumerate() {
        assert!(end > begin && end - begin <= LoggingData::DATA_LEN);
        let first_message_offset = starts
            .iter()
            .find(|&&s| s >= begin && s < end)
            .map_or(LoggingData::NO_MESSAGE_START, |&s| (s - begin) as u8);
        chunks.push(LoggingData {
            sequence: sequence as u16,
            target: GCS,
            first_message_offset,
            data: stream[begin..end].to_vec(),
        });
        begin = end;
    }
    chunks
}

pub fn chunk_every(stream: &[u8], starts: &[usize], size: usize) -> Vec<LoggingData> {
    let cuts: Vec<usize> = (size..stream.len()).step_by(size).collect();
    chunk_at(stream, starts, &cuts)
}

pub fn chunk_randomly<R: Rng>(rng: &mut R, stream: &[u8], starts: &[usize]) -> Vec<LoggingData> {
    let mut cuts = Vec::new();
    let mut pos = 0;
    loop {
        pos += rng.gen_range(1..=LoggingData::DATA_LEN);
        if pos >= stream.len() {
            break;
        }
        cuts.push(pos);
    }
    chunk_at(stream, starts, &cuts)
}

pub fn log_chunk(data: &LoggingData) -> LogChunk {
    LogChunk::from_logging_data(VEHICLE, data)
}

/// Collect every decoded message, in order.
pub fn collect_all(engine: &LogStreamEngine) -> Arc<Mutex<Vec<LogMessage>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in MessageKind::ALL {
        let sink = seen.clone();
        engine
            .subscriptions()
            .subscribe(kind, move |msg| sink.lock().unwrap().push(msg.clone()));
    }
    seen
}
