//! Unit tests for the frame codec: CRC golden vectors, request framing,
//! response parsing, SOF resynchronization and corruption detection.

mod common;

use proptest::prelude::*;

use m6e_rs::constants::*;
use m6e_rs::reader::frame::{crc16, encode_response, parse_response, MsgBuf};
use m6e_rs::{MockTransport, ReaderError, SerialReader};

/// The version probe is the best-known frame on this wire.
#[test]
fn test_version_request_bytes() {
    let frame = MsgBuf::new(OPCODE_VERSION).finish();
    assert_eq!(frame, vec![0xFF, 0x00, 0x03, 0x1D, 0x0C]);
}

#[test]
fn test_crc_golden_vector() {
    assert_eq!(crc16(&[0x00, 0x03]), 0x1D0C);
}

#[test]
fn test_request_layout() {
    let mut msg = MsgBuf::new(OPCODE_SET_REGION);
    msg.put_u8(0x01).unwrap();
    let frame = msg.finish();

    assert_eq!(frame[0], 0xFF);
    assert_eq!(frame[1], 1); // payload length
    assert_eq!(frame[2], OPCODE_SET_REGION);
    assert_eq!(frame[3], 0x01);
    let crc = crc16(&frame[1..4]);
    assert_eq!(&frame[4..], crc.to_be_bytes());
}

#[test]
fn test_response_parse() {
    let raw = encode_response(OPCODE_GET_TEMPERATURE, 0, &[0x1E]);
    let response = parse_response(&raw).unwrap();
    assert_eq!(response.opcode, OPCODE_GET_TEMPERATURE);
    assert_eq!(response.status, 0);
    assert_eq!(response.payload, vec![0x1E]);
}

#[test]
fn test_status_word_is_carried() {
    let raw = encode_response(OPCODE_READ_TAG_ID_MULTIPLE, 0x0400, &[]);
    let response = parse_response(&raw).unwrap();
    assert_eq!(response.status, 0x0400);
}

proptest! {
    /// Any payload survives the encode/parse round trip.
    #[test]
    fn prop_response_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..=253)) {
        let raw = encode_response(0x22, 0, &payload);
        let parsed = parse_response(&raw).unwrap();
        prop_assert_eq!(parsed.payload, payload);
    }

    /// Any single-bit error after the SOF byte is caught as a CRC or parse
    /// failure.
    #[test]
    fn prop_single_bit_error_detected(
        payload in proptest::collection::vec(any::<u8>(), 0..=64),
        bit in 0usize..256,
    ) {
        let mut raw = encode_response(0x22, 0, &payload);
        let nbits = (raw.len() - 1) * 8;
        let bit = 8 + (bit % nbits); // skip the SOF byte
        raw[bit / 8] ^= 1 << (bit % 8);
        let result = parse_response(&raw);
        let is_crc_or_parse_err = matches!(result, Err(ReaderError::Crc { .. }) | Err(ReaderError::Parse(_)));
        prop_assert!(is_crc_or_parse_err);
    }
}

// ---------------------------------------------------------------------------
// Receive-path behavior through the mock transport
// ---------------------------------------------------------------------------

async fn quiet_reader() -> (SerialReader<MockTransport>, MockTransport) {
    common::connected_reader().await
}

#[tokio::test(start_paused = true)]
async fn test_resync_tolerates_up_to_five_junk_bytes() {
    for junk_len in 1..=5usize {
        let (mut reader, mock) = quiet_reader().await;
        mock.stub_reply(OPCODE_GET_TEMPERATURE, 0, &[0x1E]);
        mock.queue_rx_data(&vec![0x5A; junk_len]);

        let temp = reader.cmd_get_temperature().await.unwrap();
        assert_eq!(temp, 0x1E, "junk prefix of {junk_len} bytes");
    }
}

#[tokio::test(start_paused = true)]
async fn test_resync_gives_up_past_five_junk_bytes() {
    for junk_len in [6usize, 7, 12] {
        let (mut reader, mock) = quiet_reader().await;
        mock.stub_reply(OPCODE_GET_TEMPERATURE, 0, &[0x1E]);
        mock.queue_rx_data(&vec![0x5A; junk_len]);

        let result = reader.cmd_get_temperature().await;
        assert!(
            matches!(result, Err(ReaderError::Timeout)),
            "junk prefix of {junk_len} bytes"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_reply_is_a_crc_error() {
    let (mut reader, mock) = quiet_reader().await;
    let mut frame = encode_response(OPCODE_GET_TEMPERATURE, 0, &[0x1E]);
    frame[5] ^= 0x01;
    mock.queue_rx_data(&frame);

    let result = reader.cmd_get_temperature().await;
    assert!(matches!(result, Err(ReaderError::Crc { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_opcode_reports_device_reset() {
    let (mut reader, mock) = quiet_reader().await;
    // A boot-time message shows up instead of the expected reply.
    mock.queue_rx_data(&encode_response(OPCODE_BOOT_FIRMWARE, 0, &[]));

    let result = reader.cmd_get_temperature().await;
    assert!(matches!(result, Err(ReaderError::DeviceReset)));
}

#[tokio::test(start_paused = true)]
async fn test_nonzero_status_surfaces_as_reader_code() {
    let (mut reader, mock) = quiet_reader().await;
    mock.stub_reply(OPCODE_GET_TEMPERATURE, 0x0105, &[]);

    let result = reader.cmd_get_temperature().await;
    match result {
        Err(ReaderError::Reader(code)) => assert_eq!(code.0, 0x0105),
        other => panic!("expected reader status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_send_bytes_error_propagates() {
    let (mut reader, mock) = quiet_reader().await;
    mock.set_next_error("broken pipe");

    let result = reader.cmd_get_temperature().await;
    assert!(matches!(result, Err(ReaderError::Serial(_))));
}
