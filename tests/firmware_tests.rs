//! Firmware loading: header validation, the bootloader baud dance, sector
//! erase and paged writes.

mod common;

use std::io::{Seek, SeekFrom, Write};

use m6e_rs::constants::*;
use m6e_rs::ReaderError;

fn image_bytes(payload_len: u32) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(&FIRMWARE_MAGIC);
    image.extend_from_slice(&payload_len.to_be_bytes());
    image.extend((0..payload_len).map(|i| i as u8));
    image
}

#[tokio::test(start_paused = true)]
async fn test_firmware_load_sequence() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_BOOT_BOOTLOADER, 0, &[]);
    mock.stub_reply(OPCODE_ERASE_FLASH, 0, &[]);
    mock.stub_reply(OPCODE_WRITE_FLASH_SECTOR, 0, &[]);
    mock.stub_reply(OPCODE_BOOT_FIRMWARE, 0, &[]);

    // 512-byte image delivered through a real file handle.
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&image_bytes(0x200)).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    reader.firmware_load(&mut file).await.unwrap();

    // After the connect-time rate, the line drops to the bootloader rate,
    // then returns to the capped application rate.
    assert_eq!(mock.baud_history(), vec![115_200, 9600, 115_200]);

    let frames = mock.sent_frames();

    let erase = frames
        .iter()
        .find(|f| f[2] == OPCODE_ERASE_FLASH)
        .expect("erase command");
    assert_eq!(&erase[3..7], &FLASH_ERASE_PASSWORD.to_be_bytes());
    assert_eq!(erase[7], FLASH_APP_SECTOR);

    // 512 bytes = two full pages and one 32-byte remainder.
    let writes: Vec<_> = frames
        .iter()
        .filter(|f| f[2] == OPCODE_WRITE_FLASH_SECTOR)
        .collect();
    assert_eq!(writes.len(), 3);
    for (frame, (address, data_len)) in writes.iter().zip([(0u32, 240), (240, 240), (480, 32)]) {
        assert_eq!(&frame[3..7], &FLASH_WRITE_PASSWORD.to_be_bytes());
        assert_eq!(&frame[7..11], &address.to_be_bytes());
        assert_eq!(frame[11], FLASH_APP_SECTOR);
        assert_eq!(frame[1] as usize, 9 + data_len);
    }

    // The loader reboots the module afterwards.
    let bootloader_at = frames
        .iter()
        .position(|f| f[2] == OPCODE_BOOT_BOOTLOADER)
        .unwrap();
    let program_check_at = frames
        .iter()
        .rposition(|f| f[2] == OPCODE_GET_CURRENT_PROGRAM)
        .unwrap();
    assert!(bootloader_at < program_check_at);
}

/// "Invalid opcode" from the bootloader request means the module is already
/// in the bootloader; the load continues.
#[tokio::test(start_paused = true)]
async fn test_already_in_bootloader_is_tolerated() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_BOOT_BOOTLOADER, 0x0101, &[]);
    mock.stub_reply(OPCODE_ERASE_FLASH, 0, &[]);
    mock.stub_reply(OPCODE_WRITE_FLASH_SECTOR, 0, &[]);
    mock.stub_reply(OPCODE_BOOT_FIRMWARE, 0, &[]);

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&image_bytes(16)).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    reader.firmware_load(&mut file).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bad_magic_is_rejected_before_any_command() {
    let (mut reader, mock) = common::connected_reader().await;

    let mut image = image_bytes(16);
    image[0] ^= 0xFF;
    let mut cursor = std::io::Cursor::new(image);

    let result = reader.firmware_load(&mut cursor).await;
    assert!(matches!(result, Err(ReaderError::FirmwareFormat)));
    assert!(mock.sent_frames().is_empty());
}

/// An image that under-delivers its declared length fails cleanly.
#[tokio::test(start_paused = true)]
async fn test_truncated_image_is_a_format_error() {
    let (mut reader, mock) = common::connected_reader().await;
    mock.stub_reply(OPCODE_BOOT_BOOTLOADER, 0, &[]);
    mock.stub_reply(OPCODE_ERASE_FLASH, 0, &[]);
    mock.stub_reply(OPCODE_WRITE_FLASH_SECTOR, 0, &[]);

    let mut image = image_bytes(0x200);
    image.truncate(16 + 100);
    let mut cursor = std::io::Cursor::new(image);

    let result = reader.firmware_load(&mut cursor).await;
    assert!(matches!(result, Err(ReaderError::FirmwareFormat)));
}
