//! Mock serial transport for testing
//!
//! This module provides a mock transport that simulates a connected module
//! without requiring actual hardware. Tests queue canned response frames —
//! either in strict order or keyed by request opcode — and inspect the
//! request frames the driver emitted.
//!
//! Replies can be restricted to a specific baud rate, which is how the
//! baud-negotiation paths are exercised: a stub registered at 115200 baud
//! stays silent while the driver probes at 9600.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::constants::SOF;
use crate::error::{ReaderError, Result};
use crate::reader::frame::encode_response;
use crate::reader::transport::SerialTransport;

#[derive(Debug)]
struct Stub {
    opcode: u8,
    baud: Option<u32>,
    frame: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockInner {
    /// Every byte string passed to `send_bytes`, in order.
    tx_log: Vec<Vec<u8>>,
    /// Bytes waiting to be read.
    rx: VecDeque<u8>,
    /// Replies consumed first-in-first-out, one per well-formed request.
    ordered: VecDeque<(Option<u32>, Vec<u8>)>,
    /// Reusable replies matched by request opcode (and optionally baud).
    stubs: Vec<Stub>,
    baud: u32,
    baud_history: Vec<u32>,
    open: bool,
    flush_count: u32,
    read_delay: Option<Duration>,
    next_error: Option<String>,
}

/// Mock transport with shared interior state, cloneable so a test can keep a
/// handle while the reader owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Queues raw bytes ahead of any generated replies; used to exercise
    /// resynchronization against line noise.
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.inner.lock().unwrap().rx.extend(data);
    }

    /// Queues a response frame for the next well-formed request.
    pub fn queue_reply(&self, opcode: u8, status: u16, payload: &[u8]) {
        let frame = encode_response(opcode, status, payload);
        self.inner.lock().unwrap().ordered.push_back((None, frame));
    }

    /// Queues a response frame that is only delivered while the line is at
    /// `baud`; until then the device stays silent, like a mis-tuned UART.
    pub fn queue_reply_at(&self, baud: u32, opcode: u8, status: u16, payload: &[u8]) {
        let frame = encode_response(opcode, status, payload);
        self.inner
            .lock()
            .unwrap()
            .ordered
            .push_back((Some(baud), frame));
    }

    /// Registers a reusable reply for every request with `opcode`.
    pub fn stub_reply(&self, opcode: u8, status: u16, payload: &[u8]) {
        self.inner.lock().unwrap().stubs.push(Stub {
            opcode,
            baud: None,
            frame: encode_response(opcode, status, payload),
        });
    }

    /// Registers a reusable reply served only while the line is at `baud`.
    pub fn stub_reply_at(&self, baud: u32, opcode: u8, status: u16, payload: &[u8]) {
        self.inner.lock().unwrap().stubs.push(Stub {
            opcode,
            baud: Some(baud),
            frame: encode_response(opcode, status, payload),
        });
    }

    /// Simulates line/processing delay before each receive completes.
    pub fn set_read_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().read_delay = Some(delay);
    }

    /// Fails the next send or receive with a serial error.
    pub fn set_next_error(&self, message: &str) {
        self.inner.lock().unwrap().next_error = Some(message.to_string());
    }

    /// All well-formed request frames sent so far (wakeup preamble chunks and
    /// other non-frame writes are skipped).
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .tx_log
            .iter()
            .filter(|d| is_request_frame(d))
            .cloned()
            .collect()
    }

    /// Opcodes of the sent frames, in order.
    pub fn sent_opcodes(&self) -> Vec<u8> {
        self.sent_frames().iter().map(|f| f[2]).collect()
    }

    /// Baud rates the host set, in order.
    pub fn baud_history(&self) -> Vec<u32> {
        self.inner.lock().unwrap().baud_history.clone()
    }

    pub fn flush_count(&self) -> u32 {
        self.inner.lock().unwrap().flush_count
    }

    pub fn clear_tx(&self) {
        self.inner.lock().unwrap().tx_log.clear();
    }
}

fn is_request_frame(data: &[u8]) -> bool {
    data.len() >= 5 && data[0] == SOF && data.len() == data[1] as usize + 5
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        self.inner.lock().unwrap().open = true;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.lock().unwrap().open = false;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.inner.lock().unwrap().flush_count += 1;
        Ok(())
    }

    async fn set_baud_rate(&mut self, rate: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.baud = rate;
        inner.baud_history.push(rate);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.inner.lock().unwrap().baud
    }

    async fn send_bytes(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(msg) = inner.next_error.take() {
            return Err(ReaderError::Serial(msg));
        }
        inner.tx_log.push(data.to_vec());

        if is_request_frame(data) {
            let baud = inner.baud;
            // Ordered replies take priority over opcode stubs. While the
            // queue front is pinned to a different rate the device is
            // mis-tuned and answers nothing at all.
            let pinned_elsewhere =
                matches!(inner.ordered.front(), Some((Some(b), _)) if *b != baud);
            let frame = if pinned_elsewhere {
                None
            } else if let Some((_, frame)) = inner.ordered.pop_front() {
                Some(frame)
            } else {
                let opcode = data[2];
                inner
                    .stubs
                    .iter()
                    .find(|s| s.opcode == opcode && s.baud.map_or(true, |b| b == baud))
                    .map(|s| s.frame.clone())
            };
            if let Some(frame) = frame {
                inner.rx.extend(frame);
            }
        }
        Ok(())
    }

    async fn receive_bytes(&mut self, want: usize, deadline: Duration) -> Result<Vec<u8>> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(msg) = inner.next_error.take() {
                return Err(ReaderError::Serial(msg));
            }
            inner.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.rx.len() >= want {
                return Ok(inner.rx.drain(..want).collect());
            }
        }

        // Nothing (or not enough) queued: behave like a quiet line.
        tokio::time::sleep(deadline).await;
        Err(ReaderError::Timeout)
    }
}
