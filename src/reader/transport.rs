//! # Serial Transport
//!
//! The byte-level link to the module. The driver talks to a
//! [`SerialTransport`] trait object so the command engine can run against a
//! real serial port or a mock; the real implementation wraps
//! `tokio_serial::SerialStream`.

use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialPortBuilderExt};

use crate::error::{ReaderError, Result};
use crate::util::hex::format_hex_compact;

/// Byte transport between the host and the module.
///
/// `receive_bytes` must return exactly `want` bytes or fail with
/// [`ReaderError::Timeout`]; partial data is never surfaced to the caller.
#[async_trait]
pub trait SerialTransport: Send {
    /// Opens the underlying device. Idempotent after success.
    async fn open(&mut self) -> Result<()>;

    /// Releases the OS handle. Always succeeds locally.
    async fn shutdown(&mut self) -> Result<()>;

    /// Discards any buffered input.
    async fn flush(&mut self) -> Result<()>;

    /// Changes the host-side line rate.
    async fn set_baud_rate(&mut self, rate: u32) -> Result<()>;

    /// Current host-side line rate.
    fn baud_rate(&self) -> u32;

    async fn send_bytes(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    async fn receive_bytes(&mut self, want: usize, timeout: Duration) -> Result<Vec<u8>>;
}

/// A real serial port, addressed either by a raw device path or by the
/// `tmr:///dev/ttyUSB0` URI form the sample tools use.
pub struct NativeTransport {
    port_name: String,
    baud_rate: u32,
    stream: Option<tokio_serial::SerialStream>,
}

impl NativeTransport {
    /// Creates a transport for `uri`, accepting `tmr://...` URIs and plain
    /// device paths. The port is opened by [`SerialTransport::open`].
    pub fn new(uri: &str, baud_rate: u32) -> NativeTransport {
        let port_name = match uri.strip_prefix("tmr://") {
            Some(rest) => rest.to_string(),
            None => uri.to_string(),
        };
        NativeTransport {
            port_name,
            baud_rate,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut tokio_serial::SerialStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ReaderError::Serial("port not open".to_string()))
    }
}

#[async_trait]
impl SerialTransport for NativeTransport {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()
            .map_err(|e| ReaderError::Serial(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        // Dropping the stream closes the OS handle.
        self.stream = None;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream()?
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| ReaderError::Serial(e.to_string()))
    }

    async fn set_baud_rate(&mut self, rate: u32) -> Result<()> {
        self.baud_rate = rate;
        if let Some(stream) = self.stream.as_mut() {
            stream
                .set_baud_rate(rate)
                .map_err(|e| ReaderError::Serial(e.to_string()))?;
        }
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    async fn send_bytes(&mut self, data: &[u8], deadline: Duration) -> Result<()> {
        trace!("tx {}", format_hex_compact(data));
        let stream = self.stream()?;
        timeout(deadline, stream.write_all(data))
            .await
            .map_err(|_| ReaderError::Timeout)?
            .map_err(|e| ReaderError::Serial(e.to_string()))?;
        timeout(deadline, stream.flush())
            .await
            .map_err(|_| ReaderError::Timeout)?
            .map_err(|e| ReaderError::Serial(e.to_string()))
    }

    async fn receive_bytes(&mut self, want: usize, deadline: Duration) -> Result<Vec<u8>> {
        let stream = self.stream()?;
        let mut buf = vec![0u8; want];
        timeout(deadline, stream.read_exact(&mut buf))
            .await
            .map_err(|_| ReaderError::Timeout)?
            .map_err(|e| ReaderError::Serial(e.to_string()))?;
        trace!("rx {}", format_hex_compact(&buf));
        Ok(buf)
    }
}
