//! Tag operation encoding: singulation byte assembly, write-mode dispatch,
//! block permalock and the ISO 18000-6B operations.

mod common;

use m6e_rs::constants::*;
use m6e_rs::tag::gen2::{Gen2Bank, Gen2WriteMode};
use m6e_rs::tag::iso180006b::SelectOp;
use m6e_rs::{Param, ParamValue, ReaderError, TagFilter};

#[tokio::test(start_paused = true)]
async fn test_password_only_singulation() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_READ_TAG_DATA, 0, &[0x00, 0xAB, 0xCD]);

    reader
        .cmd_gen2_read_tag_data(1000, 3, 0, 1, 0x1122_3344, None)
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_READ_TAG_DATA)
        .unwrap();
    // Option byte says "use password", and the password follows the fixed
    // read-data fields.
    assert_eq!(frame[5], 0x05);
    assert_eq!(&frame[12..16], &[0x11, 0x22, 0x33, 0x44]);
}

#[tokio::test(start_paused = true)]
async fn test_epc_prefix_singulation() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_READ_TAG_DATA, 0, &[0x00, 0xAB, 0xCD]);

    let filter = TagFilter::epc(&[0xAA, 0xBB, 0xCC]);
    reader
        .cmd_gen2_read_tag_data(1000, 3, 0, 1, 0, Some(&filter))
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_READ_TAG_DATA)
        .unwrap();
    assert_eq!(frame[5], 0x01); // select on EPC
    // Password, then bit length, then the EPC bytes.
    assert_eq!(&frame[12..16], &[0, 0, 0, 0]);
    assert_eq!(frame[16], 24);
    assert_eq!(&frame[17..20], &[0xAA, 0xBB, 0xCC]);
}

#[tokio::test(start_paused = true)]
async fn test_gen2_select_on_epc_bank_uses_addressed_option() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_READ_TAG_DATA, 0, &[0x00, 0xAB, 0xCD]);

    let filter = TagFilter::Gen2Select {
        bank: Gen2Bank::Epc,
        bit_pointer: 32,
        mask_bit_length: 16,
        mask: vec![0xAA, 0xBB],
        invert: true,
    };
    reader
        .cmd_gen2_read_tag_data(1000, 3, 0, 1, 0, Some(&filter))
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_READ_TAG_DATA)
        .unwrap();
    // Addressed-EPC select plus the invert bit.
    assert_eq!(frame[5], 0x04 | 0x08);
    // Password, bit pointer, mask length, mask bytes.
    assert_eq!(&frame[16..20], &[0, 0, 0, 32]);
    assert_eq!(frame[20], 16);
    assert_eq!(&frame[21..23], &[0xAA, 0xBB]);
}

#[tokio::test(start_paused = true)]
async fn test_gen2_select_long_mask_sets_extended_length() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_READ_TAG_DATA, 0, &[0x00, 0xAB, 0xCD]);

    let filter = TagFilter::Gen2Select {
        bank: Gen2Bank::User,
        bit_pointer: 0,
        mask_bit_length: 264,
        mask: vec![0x55; 33],
        invert: false,
    };
    reader
        .cmd_gen2_read_tag_data(1000, 3, 0, 1, 0, Some(&filter))
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_READ_TAG_DATA)
        .unwrap();
    // Bank 3 passes through; extended-length bit set; two length bytes.
    assert_eq!(frame[5], 0x03 | 0x20);
    assert_eq!(frame[20], 0x01); // 264 >> 8
    assert_eq!(frame[21], 0x08); // 264 & 0xFF
}

#[tokio::test(start_paused = true)]
async fn test_word_only_write() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_WRITE_TAG_DATA, 0, &[]);

    reader
        .write_tag_mem_bytes(None, 3, 4, &[0x11, 0x22])
        .await
        .unwrap();

    let opcodes = mock.sent_opcodes();
    assert!(opcodes.contains(&OPCODE_WRITE_TAG_DATA));
    assert!(!opcodes.contains(&OPCODE_WRITE_TAG_SPECIFIC));
}

#[tokio::test(start_paused = true)]
async fn test_block_only_write() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_WRITE_TAG_SPECIFIC, 0, &[]);

    reader
        .param_set(
            Param::Gen2WriteMode,
            ParamValue::Gen2WriteMode(Gen2WriteMode::BlockOnly),
        )
        .await
        .unwrap();
    reader
        .write_tag_mem_bytes(None, 3, 4, &[0x11, 0x22])
        .await
        .unwrap();

    let opcodes = mock.sent_opcodes();
    assert!(opcodes.contains(&OPCODE_WRITE_TAG_SPECIFIC));
    assert!(!opcodes.contains(&OPCODE_WRITE_TAG_DATA));
}

/// BlockFallback issues exactly one word-write after a failed block-write.
#[tokio::test(start_paused = true)]
async fn test_block_fallback_issues_single_word_write() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_WRITE_TAG_SPECIFIC, 0x0423, &[]);
    mock.stub_reply(OPCODE_WRITE_TAG_DATA, 0, &[]);

    reader
        .param_set(
            Param::Gen2WriteMode,
            ParamValue::Gen2WriteMode(Gen2WriteMode::BlockFallback),
        )
        .await
        .unwrap();
    reader
        .write_tag_mem_bytes(None, 3, 4, &[0x11, 0x22, 0x33, 0x44])
        .await
        .unwrap();

    let opcodes = mock.sent_opcodes();
    let block_writes = opcodes
        .iter()
        .filter(|&&op| op == OPCODE_WRITE_TAG_SPECIFIC)
        .count();
    let word_writes = opcodes
        .iter()
        .filter(|&&op| op == OPCODE_WRITE_TAG_DATA)
        .count();
    assert_eq!(block_writes, 1);
    assert_eq!(word_writes, 1);

    // The fallback repeats the same bank, address and data.
    let block = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_WRITE_TAG_SPECIFIC)
        .unwrap();
    let word = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_WRITE_TAG_DATA)
        .unwrap();
    assert!(block.windows(4).any(|w| w == [0x11, 0x22, 0x33, 0x44]));
    assert!(word.windows(4).any(|w| w == [0x11, 0x22, 0x33, 0x44]));
}

#[tokio::test(start_paused = true)]
async fn test_misaligned_gen2_write_is_rejected() {
    let (mut reader, _mock) = common::connected_reader().await;

    let odd_address = reader.write_tag_mem_bytes(None, 3, 1, &[0x11, 0x22]).await;
    assert!(matches!(odd_address, Err(ReaderError::Invalid(_))));

    let odd_length = reader.write_tag_mem_bytes(None, 3, 0, &[0x11]).await;
    assert!(matches!(odd_length, Err(ReaderError::Invalid(_))));
}

/// Reading the permalock bitmap copies the reply words through unchanged.
#[tokio::test(start_paused = true)]
async fn test_block_permalock_read_returns_bitmap() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(
        OPCODE_ERASE_BLOCK_TAG_SPECIFIC,
        0,
        &[0x41, 0x00, 0x80, 0x01, 0x00, 0x02],
    );

    let bitmap = reader
        .block_permalock(None, 0, 3, 0, 2, &[])
        .await
        .unwrap();
    assert_eq!(bitmap, vec![0x8001, 0x0002]);

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_ERASE_BLOCK_TAG_SPECIFIC)
        .unwrap();
    // Chip type, option, permalock sub-option, then read-lock 0.
    assert_eq!(frame[5], 0x00);
    assert_eq!(frame[6], 0x40);
    assert_eq!(frame[7], 0x01);
    assert_eq!(frame[9], 0x00);
}

#[tokio::test(start_paused = true)]
async fn test_block_permalock_write_sends_mask_words() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_ERASE_BLOCK_TAG_SPECIFIC, 0, &[]);

    reader
        .block_permalock(None, 1, 3, 0, 2, &[0xFFFF, 0x0001])
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_ERASE_BLOCK_TAG_SPECIFIC)
        .unwrap();
    assert!(frame.windows(4).any(|w| w == [0xFF, 0xFF, 0x00, 0x01]));
}

#[tokio::test(start_paused = true)]
async fn test_iso_write_uses_byte_mask_for_short_ids() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_WRITE_TAG_DATA, 0, &[]);

    let filter = TagFilter::epc(&[0x01, 0x02, 0x03, 0x04]);
    reader
        .cmd_iso180006b_write_tag_data(1000, 0x12, &[0x55], Some(&filter))
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_WRITE_TAG_DATA)
        .unwrap();
    // Group-select write against a 4-byte prefix: equals-op, address 0,
    // mask 0xF0, id padded to 8 bytes.
    assert_eq!(frame[5], ISO180006B_WRITE_OPTION_GROUP_SELECT);
    assert_eq!(frame[6], ISO180006B_COMMAND_WRITE4BYTE_MULTIPLE);
    assert_eq!(frame[9], SelectOp::Equals.as_u8());
    assert_eq!(frame[11], 0xF0);
    assert_eq!(&frame[12..20], &[1, 2, 3, 4, 0, 0, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_iso_read_requires_full_identifier() {
    let (mut reader, _mock) = common::connected_reader().await;

    let filter = TagFilter::epc(&[0x01, 0x02]);
    let result = reader
        .cmd_iso180006b_read_tag_data(1000, 0, 4, Some(&filter))
        .await;
    assert!(matches!(result, Err(ReaderError::Invalid(_))));
}

#[tokio::test(start_paused = true)]
async fn test_iso_lock_frame_layout() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_LOCK_TAG, 0, &[]);

    let filter = TagFilter::epc(&[1, 2, 3, 4, 5, 6, 7, 8]);
    reader
        .cmd_iso180006b_lock_tag(1000, 0x07, Some(&filter))
        .await
        .unwrap();

    let frame = mock
        .sent_frames()
        .into_iter()
        .find(|f| f[2] == OPCODE_LOCK_TAG)
        .unwrap();
    assert_eq!(frame[5], ISO180006B_LOCK_OPTION_TYPE_FOLLOWS);
    assert_eq!(frame[6], ISO180006B_LOCK_TYPE_QUERYLOCK_THEN_LOCK);
    assert_eq!(frame[7], 0x07);
    assert_eq!(&frame[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

/// A failed standalone tag op still restores the saved Gen2 Q.
#[tokio::test(start_paused = true)]
async fn test_failed_tag_op_restores_gen2_q() {
    let (mut reader, mock) = common::connected_reader().await;
    // The configured Q is dynamic; the op pins it to static 0.
    mock.stub_reply(OPCODE_GET_PROTOCOL_PARAM, 0, &[0x05, 0x12, 0x00]);
    mock.stub_reply(OPCODE_SET_PROTOCOL_PARAM, 0, &[]);
    mock.stub_reply(OPCODE_READ_TAG_ID_MULTIPLE, 0x0105, &[]);

    let op = m6e_rs::TagOp::Gen2ReadData {
        bank: Gen2Bank::User,
        word_address: 0,
        len: 2,
    };
    let result = reader.execute_tag_op(&op).await;
    match result {
        Err(ReaderError::Reader(code)) => assert_eq!(code.0, 0x0105),
        other => panic!("expected reader status, got {other:?}"),
    }

    let q_writes: Vec<_> = mock
        .sent_frames()
        .into_iter()
        .filter(|f| f[2] == OPCODE_SET_PROTOCOL_PARAM)
        .collect();
    assert_eq!(q_writes.len(), 2);
    assert_eq!(&q_writes[0][3..7], &[0x05, 0x12, 0x01, 0x00]); // static 0
    assert_eq!(&q_writes[1][3..6], &[0x05, 0x12, 0x00]); // dynamic restored
}

/// Gen2 EPC writes reject a filter: the module cannot singulate first.
#[tokio::test(start_paused = true)]
async fn test_write_tag_epc_rejects_filter() {
    let (mut reader, _mock) = common::connected_reader().await;

    let filter = TagFilter::epc(&[0xAA]);
    let result = reader
        .write_tag(Some(&filter), &m6e_rs::TagData::new(vec![0x11, 0x22]))
        .await;
    assert!(matches!(result, Err(ReaderError::Unsupported)));
}
