//! Async facade over a blocking [`Transport`].
//!
//! Transport I/O is blocking by contract (a read waits up to the address
//! timeout). Calling it directly from an async task would stall the tokio
//! worker, so every operation here runs on `spawn_blocking`.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ultrasonic_daq::transport::{AsyncTransport, SharedTransport};
//! # async fn demo(transport: SharedTransport) -> Result<(), Box<dyn std::error::Error>> {
//! let device = AsyncTransport::new(transport);
//! let reply = device.write_then_read(vec![0x01, 0x03, 0x00, 0x00], 64).await?;
//! println!("{} bytes", reply.len());
//! # Ok(())
//! # }
//! ```

use std::io;

use tokio::task::JoinError;

use super::SharedTransport;
use crate::error::{OpenError, TransportError};

/// Runs transport operations on tokio's blocking thread pool.
#[derive(Debug, Clone)]
pub struct AsyncTransport {
    inner: SharedTransport,
}

impl AsyncTransport {
    /// Wraps a shared transport.
    pub fn new(inner: SharedTransport) -> Self {
        Self { inner }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &SharedTransport {
        &self.inner
    }

    /// Opens the transport.
    pub async fn open(&self) -> Result<(), OpenError> {
        let transport = self.inner.clone();
        tokio::task::spawn_blocking(move || transport.open())
            .await
            .map_err(|err| OpenError::Unreachable {
                target: self.inner.label().to_string(),
                source: join_to_io(err),
            })?
    }

    /// Closes the transport, waiting for any in-flight read to return.
    pub async fn close(&self) {
        let transport = self.inner.clone();
        // A panic while closing is already logged by the runtime.
        let _ = tokio::task::spawn_blocking(move || transport.close()).await;
    }

    /// Reads up to `max_len` bytes. An empty vector means the read timed out.
    pub async fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let transport = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; max_len];
            let n = transport.read(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(|err| TransportError::Io(join_to_io(err)))?
    }

    /// Writes all of `bytes`.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<usize, TransportError> {
        let transport = self.inner.clone();
        tokio::task::spawn_blocking(move || transport.write(&bytes))
            .await
            .map_err(|err| TransportError::Io(join_to_io(err)))?
    }

    /// One request/response exchange. Returns the reply bytes.
    pub async fn write_then_read(
        &self,
        request: Vec<u8>,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let transport = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; max_len];
            let n = transport.write_then_read(&request, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(|err| TransportError::Io(join_to_io(err)))?
    }
}

fn join_to_io(err: JoinError) -> io::Error {
    io::Error::other(format!("blocking transport task failed: {err}"))
}
