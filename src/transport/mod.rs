//! Device transports.
//!
//! A [`Transport`] owns zero or one open link to a single device and exposes
//! blocking, timeout-bounded byte I/O. Every non-empty read and write is
//! reported to the transport's [`ListenerSet`] before the call returns.
//!
//! # Lifecycle
//!
//! ```text
//!   Closed ──open()──▶ Open ──close()──▶ Closed
//! ```
//!
//! - `open` on an open transport fails with [`OpenError::AlreadyOpen`].
//! - `close` is idempotent and makes an in-flight blocking read return
//!   within the read timeout at worst (immediately for links that support
//!   `shutdown`).
//! - `read`/`write` on a closed transport return [`TransportError::NotOpen`].
//!
//! # Threading
//!
//! Reads go through one link handle and writes through a second one, so a
//! reader thread blocked in `read` never holds up a write from a control
//! thread. Exchanges started with [`Transport::write_then_read`] are
//! serialized against each other.

pub mod async_io;
pub mod link;
pub mod listener;
pub mod simulated;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::address::ChannelAddress;
use crate::error::{OpenError, TransportError};

pub use async_io::AsyncTransport;
pub use link::{Connector, HardwareConnector, Link};
pub use listener::{Direction, ListenerSet, TransportListener};
pub use simulated::{SimulatedConnector, SimulatedDevice};

/// Shared-ownership handle to a transport.
pub type SharedTransport = Arc<Transport>;

struct OpenLinks {
    writer: Box<dyn Link>,
    control: Box<dyn Link>,
}

/// Byte counters for a transport.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes received since construction
    pub bytes_read: u64,
    /// Bytes sent since construction
    pub bytes_written: u64,
    /// Reads that returned because the timeout elapsed
    pub read_timeouts: u64,
}

/// One logical channel to one device.
pub struct Transport {
    label: String,
    address: Mutex<ChannelAddress>,
    connector: Arc<dyn Connector>,
    links: Mutex<Option<OpenLinks>>,
    reader: Mutex<Option<Box<dyn Link>>>,
    exchange: Mutex<()>,
    open: AtomicBool,
    listeners: ListenerSet,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    read_timeouts: AtomicU64,
}

impl Transport {
    /// Creates a closed transport for `address`.
    pub fn new(address: ChannelAddress, connector: Arc<dyn Connector>) -> Self {
        Self {
            label: address.to_string(),
            address: Mutex::new(address),
            connector,
            links: Mutex::new(None),
            reader: Mutex::new(None),
            exchange: Mutex::new(()),
            open: AtomicBool::new(false),
            listeners: ListenerSet::new(),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            read_timeouts: AtomicU64::new(0),
        }
    }

    /// Sets the label used in logs and listener callbacks.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label used in logs (device class or address).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The address this transport opens.
    pub fn address(&self) -> ChannelAddress {
        self.address.lock().clone()
    }

    /// Kind of connector behind this transport ("hardware", "simulated").
    pub fn connector_kind(&self) -> &'static str {
        self.connector.kind()
    }

    /// Opens the link to the configured address.
    pub fn open(&self) -> Result<(), OpenError> {
        let mut links = self.links.lock();
        self.open_locked(&mut links)
    }

    /// Replaces the address and opens it.
    ///
    /// Fails with [`OpenError::AlreadyOpen`] without touching the address if
    /// the transport is open.
    pub fn open_with(&self, address: ChannelAddress) -> Result<(), OpenError> {
        let mut links = self.links.lock();
        if links.is_some() {
            return Err(OpenError::AlreadyOpen);
        }
        *self.address.lock() = address;
        self.open_locked(&mut links)
    }

    fn open_locked(&self, links: &mut Option<OpenLinks>) -> Result<(), OpenError> {
        if links.is_some() {
            return Err(OpenError::AlreadyOpen);
        }

        let address = self.address();
        address.validate().map_err(OpenError::InvalidParameter)?;

        let writer = self.connector.connect(&address)?;
        let clone_err = |source: io::Error| OpenError::Unreachable {
            target: address.to_string(),
            source,
        };
        let reader = writer.try_clone_link().map_err(clone_err)?;
        let control = writer.try_clone_link().map_err(clone_err)?;

        *self.reader.lock() = Some(reader);
        *links = Some(OpenLinks { writer, control });
        self.open.store(true, Ordering::SeqCst);

        info!(
            transport = %self.label,
            address = %address,
            connector = self.connector.kind(),
            "Transport opened"
        );
        Ok(())
    }

    /// Returns true while the link is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Closes the link. Calling it on a closed transport does nothing.
    ///
    /// Blocks until an in-flight read has returned, which is bounded by the
    /// read timeout.
    pub fn close(&self) {
        let Some(mut links) = self.links.lock().take() else {
            return;
        };
        self.open.store(false, Ordering::SeqCst);

        if let Err(err) = links.control.shutdown() {
            debug!(transport = %self.label, error = %err, "Link shutdown reported an error");
        }
        drop(links);
        self.reader.lock().take();

        info!(transport = %self.label, "Transport closed");
    }

    /// Blocking read into `buf`, bounded by the address timeout.
    ///
    /// Returns `Ok(0)` on timeout. On a non-empty read every listener is
    /// notified before this returns.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = {
            let mut guard = self.reader.lock();
            let link = guard.as_mut().ok_or(TransportError::NotOpen)?;
            match link.read(buf) {
                Ok(n) => n,
                Err(err) if is_timeout(&err) => {
                    self.read_timeouts.fetch_add(1, Ordering::Relaxed);
                    0
                }
                Err(_) if !self.is_open() => return Err(TransportError::NotOpen),
                Err(err) => return Err(TransportError::Io(err)),
            }
        };

        if n > 0 {
            self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            trace!(transport = %self.label, bytes = %hex(&buf[..n]), "rx");
            self.listeners.notify_read(self, &buf[..n]);
        }
        Ok(n)
    }

    /// Reads until `is_complete` accepts the accumulated bytes, `buf` is
    /// full, or a read times out. Returns the number of bytes accumulated.
    pub fn read_until<F>(&self, buf: &mut [u8], is_complete: F) -> Result<usize, TransportError>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if is_complete(&buf[..filled]) {
                break;
            }
        }
        Ok(filled)
    }

    /// Blocking write of all of `bytes`.
    ///
    /// On a non-empty write every listener is notified before this returns.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        {
            let mut guard = self.links.lock();
            let links = guard.as_mut().ok_or(TransportError::NotOpen)?;
            links.writer.write_all(bytes)?;
            links.writer.flush()?;
        }

        if !bytes.is_empty() {
            self.bytes_written
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            trace!(transport = %self.label, bytes = %hex(bytes), "tx");
            self.listeners.notify_write(self, bytes);
        }
        Ok(bytes.len())
    }

    /// Request/response exchange: one write followed by one read.
    ///
    /// Produces exactly the notifications of the two operations. Concurrent
    /// exchanges on the same transport do not interleave.
    pub fn write_then_read(&self, out: &[u8], buf: &mut [u8]) -> Result<usize, TransportError> {
        let _exchange = self.exchange.lock();
        self.write(out)?;
        self.read(buf)
    }

    /// Like [`write_then_read`](Self::write_then_read) but keeps reading
    /// until `is_complete` accepts the reply.
    pub fn write_then_read_until<F>(
        &self,
        out: &[u8],
        buf: &mut [u8],
        is_complete: F,
    ) -> Result<usize, TransportError>
    where
        F: Fn(&[u8]) -> bool,
    {
        let _exchange = self.exchange.lock();
        self.write(out)?;
        self.read_until(buf, is_complete)
    }

    /// Discards inbound bytes until a read times out or `budget` elapses.
    ///
    /// Useful before a request on a bus where other traffic may be queued.
    /// Discarded bytes are still reported to listeners.
    pub fn drain(&self, budget: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + budget;
        let mut discard = [0u8; 256];
        let mut total = 0;
        while Instant::now() < deadline {
            match self.read(&mut discard)? {
                0 => break,
                n => total += n,
            }
        }
        if total > 0 {
            debug!(transport = %self.label, discarded = total, "Drained stale bytes");
        }
        Ok(total)
    }

    /// Registers a listener. Returns false if it was already registered.
    pub fn add_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.listeners.add(listener)
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn TransportListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// The listener set of this transport.
    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    /// Traffic counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .field("connector", &self.connector.kind())
            .field("listeners", &self.listeners)
            .finish()
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
