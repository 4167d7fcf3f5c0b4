//! # Background Reader
//!
//! Continuous-read support: a single worker per reader cycles through
//! read/notify/sleep while enabled, fanning each tag record out to the
//! registered listeners. The worker and the foreground share the reader
//! through one async mutex, so synchronous calls and the background cycle
//! can never interleave on the transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use tokio::sync::watch;

use crate::error::{ReaderError, Result};
use crate::reader::params::{Param, ParamValue};
use crate::reader::serial::SerialReader;
use crate::reader::transport::SerialTransport;
use crate::tag::metadata::TagReadData;

/// Handle for removing a previously added listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type ReadListener = Box<dyn Fn(&TagReadData) + Send>;
type ExceptionListener = Box<dyn Fn(&ReaderError) + Send>;

#[derive(Default)]
struct Listeners {
    read: Mutex<Vec<(u64, ReadListener)>>,
    exception: Mutex<Vec<(u64, ExceptionListener)>>,
    next_id: AtomicU64,
}

impl Listeners {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn dispatch_read(&self, read: &TagReadData) {
        let listeners = self.read.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(read);
        }
    }

    fn dispatch_exception(&self, error: &ReaderError) {
        let listeners = self.exception.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(error);
        }
    }
}

/// A reader with background-read support layered over [`SerialReader`].
///
/// Foreground operations lock the shared reader for their full duration;
/// while the background worker is mid-cycle they wait, and vice versa.
pub struct Reader<T: SerialTransport + 'static> {
    inner: Arc<tokio::sync::Mutex<SerialReader<T>>>,
    listeners: Arc<Listeners>,
    enabled: Arc<watch::Sender<bool>>,
    running: watch::Receiver<bool>,
    running_tx: Option<watch::Sender<bool>>,
    worker_spawned: bool,
}

impl<T: SerialTransport + 'static> Reader<T> {
    /// Wraps a serial reader for shared foreground/background use.
    pub fn new(reader: SerialReader<T>) -> Reader<T> {
        let (enabled, _) = watch::channel(false);
        let (running_tx, running) = watch::channel(false);
        Reader {
            inner: Arc::new(tokio::sync::Mutex::new(reader)),
            listeners: Arc::new(Listeners::default()),
            enabled: Arc::new(enabled),
            running,
            running_tx: Some(running_tx),
            worker_spawned: false,
        }
    }

    /// Locks the underlying reader for a foreground operation.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SerialReader<T>> {
        self.inner.lock().await
    }

    /// Starts background reading, spawning the worker on first use.
    pub fn start_reading(&mut self) -> Result<()> {
        if !self.worker_spawned {
            let handle =
                tokio::runtime::Handle::try_current().map_err(|_| ReaderError::NoThreads)?;
            let running_tx = self.running_tx.take().ok_or(ReaderError::NoThreads)?;
            handle.spawn(background_reads(
                Arc::clone(&self.inner),
                Arc::clone(&self.listeners),
                Arc::clone(&self.enabled),
                running_tx,
            ));
            self.worker_spawned = true;
        }
        self.enabled.send_replace(true);
        Ok(())
    }

    /// Stops background reading and waits for the worker to go idle. Takes
    /// effect at the end of the current read cycle.
    pub async fn stop_reading(&mut self) {
        if !self.worker_spawned {
            return;
        }
        self.enabled.send_replace(false);
        let mut running = self.running.clone();
        let _ = running.wait_for(|r| !*r).await;
    }

    /// Registers a tag-read listener. Fails with `TryAgain` while a dispatch
    /// is walking the listener list.
    pub fn add_read_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&TagReadData) + Send + 'static,
    {
        let mut listeners = self
            .listeners
            .read
            .try_lock()
            .map_err(|_| ReaderError::TryAgain)?;
        let id = self.listeners.next_id();
        listeners.push((id, Box::new(listener)));
        Ok(ListenerId(id))
    }

    pub fn remove_read_listener(&self, id: ListenerId) -> Result<()> {
        let mut listeners = self
            .listeners
            .read
            .try_lock()
            .map_err(|_| ReaderError::TryAgain)?;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        if listeners.len() == before {
            return Err(ReaderError::Invalid("unknown listener"));
        }
        Ok(())
    }

    /// Registers a listener for background read failures.
    pub fn add_read_exception_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&ReaderError) + Send + 'static,
    {
        let mut listeners = self
            .listeners
            .exception
            .try_lock()
            .map_err(|_| ReaderError::TryAgain)?;
        let id = self.listeners.next_id();
        listeners.push((id, Box::new(listener)));
        Ok(ListenerId(id))
    }

    pub fn remove_read_exception_listener(&self, id: ListenerId) -> Result<()> {
        let mut listeners = self
            .listeners
            .exception
            .try_lock()
            .map_err(|_| ReaderError::TryAgain)?;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        if listeners.len() == before {
            return Err(ReaderError::Invalid("unknown listener"));
        }
        Ok(())
    }
}

/// A background failure stops the loop; the user restarts it when possible.
fn notify_exception(
    listeners: &Listeners,
    enabled: &watch::Sender<bool>,
    error: &ReaderError,
) {
    enabled.send_replace(false);
    warn!("background read failed: {error}");
    listeners.dispatch_exception(error);
}

async fn background_reads<T: SerialTransport>(
    inner: Arc<tokio::sync::Mutex<SerialReader<T>>>,
    listeners: Arc<Listeners>,
    enabled: Arc<watch::Sender<bool>>,
    running: watch::Sender<bool>,
) {
    let mut enabled_rx = enabled.subscribe();

    loop {
        // Wait for reads to be enabled.
        running.send_replace(false);
        if enabled_rx.wait_for(|e| *e).await.is_err() {
            return;
        }
        running.send_replace(true);

        // One round of reading and notifying.
        let (off_time, cycle_end) = {
            let mut reader = inner.lock().await;

            let on_time = match reader.param_get(Param::ReadAsyncOnTime).await {
                Ok(ParamValue::U32(ms)) => ms,
                _ => 250,
            };
            let off_time = match reader.param_get(Param::ReadAsyncOffTime).await {
                Ok(ParamValue::U32(ms)) => ms,
                _ => 0,
            };

            if let Err(error) = reader.read(on_time).await {
                drop(reader);
                notify_exception(&listeners, &enabled, &error);
                continue;
            }
            let cycle_end = tokio::time::Instant::now();

            loop {
                match reader.has_more_tags().await {
                    Ok(true) => match reader.get_next_tag().await {
                        Ok(record) => listeners.dispatch_read(&record),
                        Err(error) => {
                            notify_exception(&listeners, &enabled, &error);
                            break;
                        }
                    },
                    _ => break,
                }
            }

            (off_time, cycle_end)
        };

        // Pace the duty cycle; a cycle that overran its off time restarts
        // immediately.
        let elapsed = cycle_end.elapsed();
        let off = Duration::from_millis(u64::from(off_time));
        if off > elapsed {
            tokio::time::sleep(off - elapsed).await;
        }
    }
}
