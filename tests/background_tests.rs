//! Background reader behavior: listener dispatch, stop semantics and
//! exception fan-out.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use m6e_rs::constants::*;
use m6e_rs::{Param, ParamValue, Reader, ReadPlan, SimpleReadPlan, TagProtocol};

async fn background_fixture() -> (Reader<m6e_rs::MockTransport>, m6e_rs::MockTransport) {
    let (mut serial, mock) = common::connected_reader().await;
    mock.set_read_delay(Duration::from_millis(20));
    serial
        .set_read_plan(ReadPlan::Simple(SimpleReadPlan::new(
            vec![1],
            TagProtocol::Gen2,
            1,
        )))
        .await
        .unwrap();
    serial
        .param_set(Param::ReadAsyncOnTime, ParamValue::U32(50))
        .await
        .unwrap();
    serial
        .param_set(Param::ReadAsyncOffTime, ParamValue::U32(100))
        .await
        .unwrap();
    (Reader::new(serial), mock)
}

#[tokio::test(start_paused = true)]
async fn test_background_reads_dispatch_to_listeners() {
    let (mut reader, mock) = background_fixture().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(1),
    );
    let record = common::tag_record(TagProtocol::Gen2, &[0xCA, 0xFE], 0x11, 1);
    mock.stub_reply(
        OPCODE_GET_TAG_ID_BUFFER,
        0,
        &common::tag_buffer_payload(&[record]),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    reader
        .add_read_listener(move |tag| {
            sink.lock().unwrap().push(tag.tag.epc_hex());
        })
        .unwrap();

    reader.start_reading().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    reader.stop_reading().await;

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|epc| epc == "CAFE"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_reading_halts_the_cycle() {
    let (mut reader, mock) = background_fixture().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(0),
    );

    reader.start_reading().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    reader.stop_reading().await;

    let frames_at_stop = mock.sent_frames().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.sent_frames().len(), frames_at_stop);
}

/// A failing read disables the loop and notifies exception listeners.
#[tokio::test(start_paused = true)]
async fn test_read_failure_fans_out_to_exception_listeners() {
    let (serial, mock) = common::connected_reader().await;
    mock.set_read_delay(Duration::from_millis(20));
    // Every read cycle dies at the inventory command.
    mock.stub_reply(OPCODE_READ_TAG_ID_MULTIPLE, 0x0105, &[]);
    let mut reader = Reader::new(serial);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    reader
        .add_read_exception_listener(move |error| {
            sink.lock().unwrap().push(error.to_string());
        })
        .unwrap();

    reader.start_reading().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    reader.stop_reading().await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1); // auto-disabled after the first failure
    assert!(errors[0].contains("0x0105"));
}

#[tokio::test(start_paused = true)]
async fn test_listener_registration_and_removal() {
    let (reader, _mock) = background_fixture().await;

    let id = reader.add_read_listener(|_| {}).unwrap();
    reader.remove_read_listener(id).unwrap();
    assert!(reader.remove_read_listener(id).is_err());

    let id = reader.add_read_exception_listener(|_| {}).unwrap();
    reader.remove_read_exception_listener(id).unwrap();
    assert!(reader.remove_read_exception_listener(id).is_err());
}

/// Restarting after a stop picks the cycle back up.
#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let (mut reader, mock) = background_fixture().await;
    mock.stub_reply(
        OPCODE_READ_TAG_ID_MULTIPLE,
        0,
        &common::tag_count_payload(0),
    );

    reader.start_reading().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    reader.stop_reading().await;

    let frames_at_stop = mock.sent_frames().len();
    reader.start_reading().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    reader.stop_reading().await;

    assert!(mock.sent_frames().len() > frames_at_stop);
}
