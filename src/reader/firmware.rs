//! # Firmware Loader
//!
//! Streams a new application image into the module: verify the image
//! header, drop to the bootloader at its fixed 9600 baud, erase the
//! application sector and write the image page by page, then boot back into
//! the application.

use std::io::Read;
use std::time::Duration;

use log::info;

use crate::constants::*;
use crate::error::{ReaderError, Result};
use crate::reader::serial::SerialReader;
use crate::reader::transport::SerialTransport;

impl<T: SerialTransport> SerialReader<T> {
    /// Loads a firmware image from `image` and reboots into it.
    ///
    /// The source must deliver a 16-byte header (12-byte magic plus 32-bit
    /// image length) followed by exactly that many bytes; anything short is
    /// a [`ReaderError::FirmwareFormat`].
    pub async fn firmware_load<R: Read>(&mut self, image: &mut R) -> Result<()> {
        let mut header = [0u8; 16];
        image
            .read_exact(&mut header)
            .map_err(|_| ReaderError::FirmwareFormat)?;
        if header[..12] != FIRMWARE_MAGIC {
            return Err(ReaderError::FirmwareFormat);
        }
        let len = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);

        // Drop to 9600 so the rate is known after the bootloader takes over.
        self.cmd_set_baud_rate(9600).await?;
        self.transport.set_baud_rate(9600).await?;

        match self.cmd_boot_bootloader().await {
            Ok(()) => {}
            // Invalid opcode means "already in bootloader".
            Err(e) if e.is_invalid_opcode() => {}
            Err(e) => return Err(e),
        }

        // Give the bootloader time to come up.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let rate = self.baud_rate.min(BOOTLOADER_MAX_BAUD);
        self.cmd_set_baud_rate(rate).await?;
        self.transport.set_baud_rate(rate).await?;

        self.cmd_erase_flash(FLASH_APP_SECTOR, FLASH_ERASE_PASSWORD)
            .await?;
        info!("erased application sector, writing {len} bytes");

        let mut address = 0u32;
        let mut remaining = len as usize;
        let mut page = [0u8; FLASH_PAGE_SIZE];
        while remaining > 0 {
            let page_len = remaining.min(FLASH_PAGE_SIZE);
            image
                .read_exact(&mut page[..page_len])
                .map_err(|_| ReaderError::FirmwareFormat)?;
            self.cmd_write_flash_sector(
                FLASH_APP_SECTOR,
                address,
                FLASH_WRITE_PASSWORD,
                &page[..page_len],
            )
            .await?;
            address += page_len as u32;
            remaining -= page_len;
        }

        self.boot(rate).await
    }
}
