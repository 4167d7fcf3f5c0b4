//! Shared test fixtures: a mock module wired up with the replies the connect
//! sequence needs, plus tag-record builders for pagination replies.

#![allow(dead_code)]

use m6e_rs::constants::*;
use m6e_rs::{MockTransport, SerialReader, TagProtocol};

/// Protocol support mask advertised by the fixture module:
/// ISO 18000-6B, Gen2, IPX64 and IPX256.
pub const PROTOCOL_MASK: u32 = 0xD4;

/// Version reply payload: bootloader, hardware (M6e), build date, firmware
/// version, protocol mask.
pub fn version_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0x01, 0x0B, 0x01, 0x0E]); // bootloader
    payload.extend_from_slice(&[MODEL_M6E, 0x00, 0x00, 0x10]); // hardware
    payload.extend_from_slice(&[0x20, 0x10, 0x06, 0x12]); // firmware date
    payload.extend_from_slice(&[0x01, 0x03, 0x01, 0x83]); // firmware version
    payload.extend_from_slice(&PROTOCOL_MASK.to_be_bytes());
    payload
}

/// Registers every reply the connect/boot sequence consults: version, the
/// running-program query, power mode, baud change, reader configuration and
/// antenna detection (port 1 connected, port 2 present but bare).
pub fn stub_connect_sequence(mock: &MockTransport) {
    mock.stub_reply(OPCODE_VERSION, 0, &version_payload());
    mock.stub_reply(OPCODE_GET_CURRENT_PROGRAM, 0, &[0x02]);
    mock.stub_reply(OPCODE_GET_POWER_MODE, 0, &[0x00]);
    mock.stub_reply(OPCODE_SET_BAUD_RATE, 0, &[]);
    mock.stub_reply(OPCODE_SET_READER_OPTIONAL_PARAMS, 0, &[]);
    mock.stub_reply(OPCODE_GET_ANTENNA_PORT, 0, &[0x05, 0x01, 0x01, 0x02, 0x00]);
}

/// Replies consumed by inventory rounds: clear-buffer, antenna search list
/// and protocol selection.
pub fn stub_search_sequence(mock: &MockTransport) {
    mock.stub_reply(OPCODE_CLEAR_TAG_ID_BUFFER, 0, &[]);
    mock.stub_reply(OPCODE_SET_ANTENNA_PORT, 0, &[]);
    mock.stub_reply(OPCODE_SET_TAG_PROTOCOL, 0, &[]);
}

/// A connected reader over a fully stubbed mock.
pub async fn connected_reader() -> (SerialReader<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    stub_connect_sequence(&mock);
    stub_search_sequence(&mock);

    let mut reader = SerialReader::new(mock.clone());
    reader.connect().await.expect("connect against stubbed module");
    mock.clear_tx();
    (reader, mock)
}

/// Read-tag-multiple reply payload carrying a 4-byte tag count
/// (the large-tag-population form).
pub fn tag_count_payload(count: u32) -> Vec<u8> {
    let mut payload = vec![0x00, 0x03, 0x00];
    payload.extend_from_slice(&count.to_be_bytes());
    payload
}

/// One fully populated tag record as it appears inside a get-tag-buffer
/// reply (all metadata fields present).
pub fn tag_record(protocol: TagProtocol, epc: &[u8], antenna_byte: u8, read_count: u8) -> Vec<u8> {
    let mut record = Vec::new();
    record.push(read_count);
    record.push(0xD5); // RSSI
    record.push(antenna_byte);
    record.extend_from_slice(&[0x0D, 0xC9, 0x14]); // frequency (902.420 MHz)
    record.extend_from_slice(&[0x00, 0x00, 0x00, 0x64]); // 100 us into the search
    record.extend_from_slice(&[0x00, 0x00]); // phase
    record.push(protocol.as_u8());
    record.extend_from_slice(&[0x00, 0x00]); // embedded-op data, none
    record.push(0x0F); // GPIO snapshot

    let gen2 = protocol == TagProtocol::Gen2;
    let epc_block_bytes = epc.len() + 2 + if gen2 { 2 } else { 0 };
    record.extend_from_slice(&((epc_block_bytes * 8) as u16).to_be_bytes());
    if gen2 {
        record.extend_from_slice(&[0x30, 0x00]); // PC word
    }
    record.extend_from_slice(epc);
    record.extend_from_slice(&[0x12, 0x34]); // tag CRC
    record
}

/// A get-tag-buffer reply payload holding the given records.
pub fn tag_buffer_payload(records: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0x01FFu16.to_be_bytes()); // metadata flags echo
    payload.push(0x00); // read options
    payload.push(records.len() as u8);
    for record in records {
        payload.extend_from_slice(record);
    }
    payload
}
