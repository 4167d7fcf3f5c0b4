//! Read-plan execution and result pagination: simple inventory, the
//! multi-protocol fast path, weighted multi-plans and embedded operations.

mod common;

use std::time::Duration;

use m6e_rs::constants::*;
use m6e_rs::tag::gen2::Gen2Bank;
use m6e_rs::{
    MockTransport, MultiReadPlan, ReadPlan, ReaderError, SerialReader, SimpleReadPlan, TagOp,
    TagProtocol,
};

async fn reader_with_read_delay() -> (SerialReader<MockTransport>, MockTransport) {
    let (reader, mock) = common::connected_reader().await;
    // Each transport receive consumes virtual line time, so a timed read
    // performs a bounded number of inventory rounds.
    mock.set_read_delay(Duration::from_millis(20));
    (reader, mock)
}

#[tokio::test(start_paused = true)]
async fn test_simple_inventory_returns_single_tag() {
    let (mut reader, mock) = reader_with_read_delay().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(1),
    );
    let record = common::tag_record(TagProtocol::Gen2, &[0xDE, 0xAD, 0xBE, 0xEF], 0x11, 3);
    mock.stub_reply(
        OPCODE_GET_TAG_ID_BUFFER,
        0,
        &common::tag_buffer_payload(&[record]),
    );

    reader
        .set_read_plan(ReadPlan::Simple(SimpleReadPlan::new(
            vec![1],
            TagProtocol::Gen2,
            1,
        )))
        .await
        .unwrap();

    let count = reader.read(10).await.unwrap();
    assert_eq!(count, 1);

    assert!(reader.has_more_tags().await.unwrap());
    let tag = reader.get_next_tag().await.unwrap();
    assert_eq!(tag.tag.epc_hex(), "DEADBEEF");
    assert_eq!(tag.tag.protocol, TagProtocol::Gen2);
    assert_eq!(tag.antenna, 1); // (tx=1, rx=1) maps back to antenna 1
    assert!(tag.read_count >= 1);

    assert!(!reader.has_more_tags().await.unwrap());
    assert!(matches!(
        reader.get_next_tag().await,
        Err(ReaderError::NoTags)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_inventory_clears_module_buffer_first() {
    let (mut reader, mock) = reader_with_read_delay().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(0),
    );

    reader.read(10).await.unwrap();
    assert_eq!(mock.sent_opcodes()[0], OPCODE_CLEAR_TAG_ID_BUFFER);
}

/// Switching protocols during a read reasserts the extended-EPC bit before
/// the inventory command goes out.
#[tokio::test(start_paused = true)]
async fn test_protocol_change_reasserts_extended_epc() {
    let (mut reader, mock) = reader_with_read_delay().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(0),
    );

    reader.read(10).await.unwrap();

    let opcodes = mock.sent_opcodes();
    let set_protocol = opcodes
        .iter()
        .position(|&op| op == OPCODE_SET_TAG_PROTOCOL)
        .expect("protocol command");
    let inventory = opcodes
        .iter()
        .position(|&op| op == OPCODE_READ_TAG_ID_MULTIPLE)
        .expect("inventory command");
    let config = mock
        .sent_frames()
        .iter()
        .position(|f| {
            f[2] == OPCODE_SET_READER_OPTIONAL_PARAMS
                && f[4] == CONFIGURATION_EXTENDED_EPC
                && f[5] == 1
        })
        .expect("extended-EPC write");
    assert!(set_protocol < config && config < inventory);
}

/// NoTagsFound from the module is benign inside the inventory loop.
#[tokio::test(start_paused = true)]
async fn test_empty_field_reads_as_zero_tags() {
    let (mut reader, mock) = reader_with_read_delay().await;
    mock.stub_reply(OPCODE_READ_TAG_ID_MULTIPLE, 0x0400, &[]);

    let count = reader.read(10).await.unwrap();
    assert_eq!(count, 0);
    assert!(!reader.has_more_tags().await.unwrap());
}

/// A zero-total-weight multi-plan over simple children collapses into one
/// multi-protocol search command.
#[tokio::test(start_paused = true)]
async fn test_multi_protocol_fast_path() {
    let (mut reader, mock) = reader_with_read_delay().await;
    // Reply: echoed option/metadata preamble, then a 4-byte tag count.
    mock.stub_reply(
        OPCODE_MULTI_PROTOCOL_TAG_OP,
        0,
        &[0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02],
    );
    let records = [
        common::tag_record(TagProtocol::Gen2, &[0xAA, 0xBB, 0xCC, 0xDD], 0x11, 1),
        common::tag_record(TagProtocol::Iso180006b, &[1, 2, 3, 4, 5, 6, 7, 8], 0x11, 1),
    ];
    mock.stub_reply(
        OPCODE_GET_TAG_ID_BUFFER,
        0,
        &common::tag_buffer_payload(&records[..1]),
    );

    let plan = MultiReadPlan::new(vec![
        ReadPlan::Simple(SimpleReadPlan::new(vec![], TagProtocol::Gen2, 0)),
        ReadPlan::Simple(SimpleReadPlan::new(vec![], TagProtocol::Iso180006b, 0)),
        ReadPlan::Simple(SimpleReadPlan::new(vec![], TagProtocol::Ipx64, 0)),
        ReadPlan::Simple(SimpleReadPlan::new(vec![], TagProtocol::Ipx256, 0)),
    ]);
    reader.set_read_plan(ReadPlan::Multi(plan)).await.unwrap();

    let count = reader.read(100).await.unwrap();
    assert_eq!(count, 2);

    // Exactly one search frame, carrying all four protocol sub-commands.
    let search_frames: Vec<_> = mock
        .sent_frames()
        .into_iter()
        .filter(|f| f[2] == OPCODE_MULTI_PROTOCOL_TAG_OP)
        .collect();
    assert_eq!(search_frames.len(), 1);
    let frame = &search_frames[0];
    for protocol in [
        TagProtocol::Gen2,
        TagProtocol::Iso180006b,
        TagProtocol::Ipx64,
        TagProtocol::Ipx256,
    ] {
        assert!(
            frame.contains(&protocol.as_u8()),
            "missing protocol {protocol:?}"
        );
    }

    // Records report their own protocol through the metadata.
    let first = reader.get_next_tag().await.unwrap();
    assert_eq!(first.tag.protocol, TagProtocol::Gen2);
}

/// Weighted children split the total timeout proportionally; uneven
/// division hands the remainder to the last child.
#[tokio::test(start_paused = true)]
async fn test_weighted_multi_plan_splits_timeout() {
    let (mut reader, mock) = reader_with_read_delay().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(0),
    );

    let plan = MultiReadPlan::new(vec![
        ReadPlan::Simple(SimpleReadPlan::new(vec![1], TagProtocol::Gen2, 2)),
        ReadPlan::Simple(SimpleReadPlan::new(vec![1], TagProtocol::Iso180006b, 1)),
    ]);
    reader.set_read_plan(ReadPlan::Multi(plan)).await.unwrap();

    reader.read(100).await.unwrap();

    // Sub-timeouts land in the inventory frames: 66 ms for weight 2, then
    // the 34 ms remainder for weight 1.
    let timeouts: Vec<u16> = mock
        .sent_frames()
        .into_iter()
        .filter(|f| f[2] == OPCODE_READ_TAG_ID_MULTIPLE)
        .map(|f| u16::from_be_bytes([f[6], f[7]]))
        .collect();
    assert!(!timeouts.is_empty());
    assert_eq!(timeouts[0], 66);
    assert_eq!(*timeouts.last().unwrap(), 34);
    assert_eq!(66 + 34, 100);
}

/// An embedded read-data rides inside a single inventory frame and the
/// reply's found-count becomes the result.
#[tokio::test(start_paused = true)]
async fn test_embedded_read_data() {
    let (mut reader, mock) = reader_with_read_delay().await;
    // Embedded-status reply: one tag found, one op succeeded, none failed.
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00],
    );

    let mut plan = SimpleReadPlan::new(vec![1], TagProtocol::Gen2, 1);
    plan.tag_op = Some(TagOp::Gen2ReadData {
        bank: Gen2Bank::User,
        word_address: 0,
        len: 2,
    });
    reader.set_read_plan(ReadPlan::Simple(plan)).await.unwrap();

    let count = reader.read(10).await.unwrap();
    assert_eq!(count, 1);

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_READ_TAG_ID_MULTIPLE)
        .expect("inventory frame");

    // Search flags carry the embedded-command bit.
    let search_flags = u16::from_be_bytes([frame[4], frame[5]]);
    assert_ne!(search_flags & 0x0004, 0);
    // One embedded sub-command, and it is a tag-data read.
    assert_eq!(frame[8], 1);
    assert_eq!(frame[10], OPCODE_READ_TAG_DATA);
    assert_eq!(frame[14], Gen2Bank::User.as_u8());
}

/// A plan naming an unknown antenna is rejected up front.
#[tokio::test(start_paused = true)]
async fn test_plan_with_unknown_antenna_is_rejected() {
    let (mut reader, _mock) = reader_with_read_delay().await;
    let result = reader
        .set_read_plan(ReadPlan::Simple(SimpleReadPlan::new(
            vec![9],
            TagProtocol::Gen2,
            1,
        )))
        .await;
    assert!(matches!(result, Err(ReaderError::Invalid(_))));
}

/// A plan with an embedded list operation is rejected up front.
#[tokio::test(start_paused = true)]
async fn test_plan_with_list_op_is_rejected() {
    let (mut reader, _mock) = reader_with_read_delay().await;
    let mut plan = SimpleReadPlan::new(vec![1], TagProtocol::Gen2, 1);
    plan.tag_op = Some(TagOp::List(Vec::new()));
    let result = reader.set_read_plan(ReadPlan::Simple(plan)).await;
    assert!(matches!(result, Err(ReaderError::Invalid(_))));
}

/// A weighted multi-plan whose children sum to zero weight but are not all
/// simple plans cannot run as a search and is rejected.
#[tokio::test(start_paused = true)]
async fn test_zero_weight_nested_multi_is_rejected() {
    let (mut reader, _mock) = reader_with_read_delay().await;
    let inner = MultiReadPlan {
        plans: vec![ReadPlan::Simple(SimpleReadPlan::new(
            vec![1],
            TagProtocol::Gen2,
            0,
        ))],
        weight: 0,
    };
    let outer = MultiReadPlan::new(vec![ReadPlan::Multi(inner)]);
    let result = reader.set_read_plan(ReadPlan::Multi(outer)).await;
    assert!(matches!(result, Err(ReaderError::Invalid(_))));
}

/// Buffered pagination fetches a fresh batch from the module each time the
/// local buffer drains.
#[tokio::test(start_paused = true)]
async fn test_pagination_refills_from_module() {
    let (mut reader, mock) = reader_with_read_delay().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(2),
    );
    let record = common::tag_record(TagProtocol::Gen2, &[0x01, 0x02, 0x03, 0x04], 0x11, 1);
    mock.stub_reply(
        OPCODE_GET_TAG_ID_BUFFER,
        0,
        &common::tag_buffer_payload(&[record]),
    );

    reader
        .set_read_plan(ReadPlan::Simple(SimpleReadPlan::new(
            vec![1],
            TagProtocol::Gen2,
            1,
        )))
        .await
        .unwrap();
    reader.read(10).await.unwrap();

    let mut drained = 0;
    while reader.has_more_tags().await.unwrap() {
        reader.get_next_tag().await.unwrap();
        drained += 1;
    }
    assert_eq!(drained, 2);

    let buffer_fetches = mock
        .sent_opcodes()
        .iter()
        .filter(|&&op| op == OPCODE_GET_TAG_ID_BUFFER)
        .count();
    assert_eq!(buffer_fetches, 2);
}
