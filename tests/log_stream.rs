mod common;

use std::sync::Arc;

use common::*;
use crossbeam::channel::unbounded;
use mavstream::clock::ManualClock;
use mavstream::transport::{ChannelSink, Inbound, LoggingAck, LoggingData, Outbound};
use mavstream::ulog::{
    LogLevel, LogMessage, LogStreamEngine, LoggingMessage, MessageKind, StreamConfig,
};
use mavstream::Session;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn ingest_all(engine: &LogStreamEngine, chunks: &[LoggingData]) -> Vec<LogMessage> {
    let seen = collect_all(engine);
    for chunk in chunks {
        engine.ingest_chunk(&log_chunk(chunk), false);
    }
    let seen = seen.lock().unwrap().clone();
    seen
}

#[test]
fn test_message_split_in_three_chunks() {
    let msg: LogMessage = LoggingMessage {
        log_level: LogLevel::Warning,
        timestamp: 123_456_789,
        message: "Preflight Fail: Accel Sensor 0 missing".to_string(),
    }
    .into();
    let (stream, starts) = ulog_stream(&[msg.clone()]);

    let whole = ingest_all(&LogStreamEngine::default(), &chunk_at(&stream, &starts, &[]));
    assert_eq!(whole, vec![msg.clone()]);

    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..200 {
        let a = rng.gen_range(1..stream.len() - 1);
        let b = rng.gen_range(a + 1..stream.len());
        let chunks = chunk_at(&stream, &starts, &[a, b]);

        let zult = ingest_all(&LogStreamEngine::default(), &chunks);

        assert_eq!(zult, whole, "split at {a} and {b}");
    }
}

#[test]
fn test_random_chunking_decodes_everything() {
    let messages = sample_messages();
    let (stream, starts) = ulog_stream(&messages);
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..20 {
        let chunks = chunk_randomly(&mut rng, &stream, &starts);
        let zult = ingest_all(&LogStreamEngine::default(), &chunks);
        assert_eq!(zult, messages);
    }
}

#[test]
fn test_continuation_chunk_never_starts_message() {
    let engine = LogStreamEngine::new(StreamConfig::builder().file_header_len(0).build());
    let seen = collect_all(&engine);
    let msg: LogMessage = mavstream::ulog::DropoutMessage { duration: 100 }.into();

    // a complete message, but flagged as continuation of nothing
    let chunk = LoggingData {
        sequence: 0,
        target: GCS,
        first_message_offset: LoggingData::NO_MESSAGE_START,
        data: msg.encode(),
    };
    engine.ingest_chunk(&log_chunk(&chunk), false);
    assert!(seen.lock().unwrap().is_empty());

    let chunk = LoggingData {
        sequence: 1,
        first_message_offset: 0,
        ..chunk
    };
    engine.ingest_chunk(&log_chunk(&chunk), false);
    assert_eq!(*seen.lock().unwrap(), vec![msg]);
}

#[test]
fn test_reliable_chunk_acked_once() {
    let (tx, rx) = unbounded();
    let session = Session::builder(
        Arc::new(ManualClock::default()),
        Arc::new(ChannelSink::new(tx)),
    )
    .build();

    let chunk = LoggingData {
        sequence: 7,
        target: GCS,
        first_message_offset: LoggingData::NO_MESSAGE_START,
        data: vec![0; 20],
    };
    session.handle(VEHICLE, &Inbound::LoggingDataAcked(chunk.clone()));

    let acks: Vec<Outbound> = rx.try_iter().collect();
    assert_eq!(
        acks,
        vec![Outbound::LoggingAck(LoggingAck {
            sequence: 7,
            target: VEHICLE,
        })]
    );

    session.handle(
        VEHICLE,
        &Inbound::LoggingData(LoggingData {
            sequence: 8,
            ..chunk
        }),
    );
    assert!(rx.is_empty());
}

#[test]
fn test_duplicate_chunks_acked_not_redecoded() {
    let messages = sample_messages();
    let (stream, starts) = ulog_stream(&messages);
    let chunks = chunk_every(&stream, &starts, 100);
    let engine = LogStreamEngine::default();
    let seen = collect_all(&engine);

    let mut acks = 0;
    for chunk in &chunks {
        for _ in 0..2 {
            if engine.ingest_chunk(&log_chunk(chunk), true).is_some() {
                acks += 1;
            }
        }
    }

    assert_eq!(acks, chunks.len() * 2);
    assert_eq!(*seen.lock().unwrap(), messages);
}

#[test]
fn test_corrupted_header_recovers_at_next_boundary() {
    const CHUNK: usize = 64;
    let messages = sample_messages();
    let (mut stream, starts) = ulog_stream(&messages);

    // a message with its whole header inside a single chunk
    let m = (10..messages.len())
        .find(|&i| starts[i] % CHUNK < CHUNK - 3)
        .unwrap();
    stream[starts[m] + 2] = b'?';
    let k = starts[m] / CHUNK;
    let j = starts.iter().position(|&s| s >= (k + 1) * CHUNK).unwrap();

    let chunks = chunk_every(&stream, &starts, CHUNK);
    let zult = ingest_all(&LogStreamEngine::default(), &chunks);

    let mut expected = messages[..m].to_vec();
    expected.extend_from_slice(&messages[j..]);
    assert_eq!(zult, expected);
}

#[test]
fn test_lost_chunk_recovers_at_next_boundary() {
    const CHUNK: usize = 80;
    let messages = sample_messages();
    let (stream, starts) = ulog_stream(&messages);
    let mut chunks = chunk_every(&stream, &starts, CHUNK);
    let k = chunks.len() / 2;
    chunks.remove(k);

    let zult = ingest_all(&LogStreamEngine::default(), &chunks);

    let complete_before: Vec<LogMessage> = messages
        .iter()
        .zip(&starts)
        .filter(|(msg, start)| **start + msg.encode().len() <= k * CHUNK)
        .map(|(msg, _)| msg.clone())
        .collect();
    let j = starts.iter().position(|&s| s >= (k + 1) * CHUNK).unwrap();
    let mut expected = complete_before;
    expected.extend_from_slice(&messages[j..]);
    assert_eq!(zult, expected);
}

#[test]
fn test_decodes_info_and_dropout_examples() {
    let engine = LogStreamEngine::new(StreamConfig::builder().file_header_len(0).build());
    let seen = collect_all(&engine);
    // 'I' key "abc" value "xy", then 'O' 100ms
    let data = hex::decode("06004903616263787902004f6400").unwrap();

    engine.ingest_chunk(
        &log_chunk(&LoggingData {
            sequence: 0,
            target: GCS,
            first_message_offset: 0,
            data,
        }),
        false,
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    match &seen[0] {
        LogMessage::Info(info) => {
            assert_eq!(info.key, "abc");
            assert_eq!(info.value, b"xy");
        }
        other => panic!("expected info, got {other:?}"),
    }
    assert_eq!(seen[1].kind(), MessageKind::Dropout);
    assert!(matches!(&seen[1], LogMessage::Dropout(d) if d.duration == 100));
}
