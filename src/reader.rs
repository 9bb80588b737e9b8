//! Dedicated reader thread per open transport.
//!
//! The loop performs blocking reads back to back. Listener notification
//! (and therefore decoding and aggregation) happens inside
//! [`Transport::read`] on this thread. The loop ends when:
//!
//! - [`ReaderHandle::stop`] is called (observed within one read timeout)
//! - the transport is closed
//! - the link reports an I/O error, which is logged
//!
//! [`Transport::read`]: crate::transport::Transport::read

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::SharedTransport;

/// Why a reader loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// Stop was requested.
    Stopped,
    /// The transport was closed underneath the loop.
    Closed,
    /// The link failed; carries the error text.
    Failed(String),
    /// The reader thread panicked.
    Panicked,
}

/// Summary returned when a reader loop is joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Why the loop ended
    pub exit: ReaderExit,
    /// Bytes read by the loop
    pub bytes_read: u64,
}

/// Spawns reader threads.
pub struct ReaderLoop;

impl ReaderLoop {
    /// Starts a reader thread for `transport` reading up to `buffer_len`
    /// bytes per call.
    pub fn spawn(transport: SharedTransport, buffer_len: usize) -> io::Result<ReaderHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let bytes_read = Arc::new(AtomicU64::new(0));
        let name = format!("reader-{}", transport.label());

        let thread = {
            let stop = stop.clone();
            let bytes_read = bytes_read.clone();
            thread::Builder::new()
                .name(name)
                .spawn(move || run(&transport, buffer_len.max(1), &stop, &bytes_read))?
        };

        Ok(ReaderHandle {
            stop,
            bytes_read,
            thread: Some(thread),
        })
    }
}

fn run(transport: &SharedTransport, buffer_len: usize, stop: &AtomicBool, bytes_read: &AtomicU64) -> ReaderExit {
    let mut buf = vec![0u8; buffer_len];
    info!(transport = transport.label(), "Reader loop started");

    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break ReaderExit::Stopped;
        }
        match transport.read(&mut buf) {
            Ok(n) => {
                bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(TransportError::NotOpen) => break ReaderExit::Closed,
            Err(err) => {
                warn!(transport = transport.label(), error = %err, "Reader loop stopped on I/O error");
                break ReaderExit::Failed(err.to_string());
            }
        }
    };

    debug!(transport = transport.label(), ?exit, "Reader loop finished");
    exit
}

/// Handle to a running reader thread.
///
/// Dropping the handle requests a stop and joins the thread.
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
    thread: Option<JoinHandle<ReaderExit>>,
}

impl ReaderHandle {
    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns true once the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Requests a stop and waits for the thread, bounded by the read timeout.
    pub fn stop(mut self) -> ReaderSummary {
        self.shutdown()
    }

    fn shutdown(&mut self) -> ReaderSummary {
        self.stop.store(true, Ordering::SeqCst);
        let exit = match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(ReaderExit::Panicked),
            None => ReaderExit::Stopped,
        };
        ReaderSummary {
            exit,
            bytes_read: self.bytes_read(),
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}
