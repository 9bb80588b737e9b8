//! Telemetry feed: raw inbound bytes to aggregator samples.
//!
//! A [`TelemetryListener`] is registered on a transport. On every inbound
//! byte event it runs its [`FrameDecoder`] and pushes each decoded value
//! into a [`SamplingAggregator`]. This runs on the reader thread, so the
//! aggregator sees a single producer.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ultrasonic_daq::sampling::{AggregatorConfig, SamplingAggregator};
//! # use ultrasonic_daq::telemetry::{RegisterDecoder, TelemetryListener};
//! # use ultrasonic_daq::transport::{SharedTransport, TransportListener};
//! # fn wire(transport: SharedTransport) -> ultrasonic_daq::AppResult<()> {
//! let amplitude = Arc::new(SamplingAggregator::with_system_clock(
//!     "amplitude",
//!     AggregatorConfig::default(),
//! )?);
//! let listener: Arc<dyn TransportListener> = Arc::new(TelemetryListener::new(
//!     "amplitude",
//!     RegisterDecoder::new(0x01, 0x04),
//!     amplitude.clone(),
//! ));
//! transport.add_listener(&listener);
//! // Keep `listener` alive for as long as samples should flow.
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::protocol::{frame, ByteOrder};
use crate::sampling::SamplingAggregator;
use crate::transport::{Direction, Transport, TransportListener};

/// One decoded measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Measured value
    pub value: f64,
    /// Position in the decoded stream, starting at 0
    pub arrival_index: u64,
}

/// Turns raw inbound bytes into scalar values.
///
/// Byte events do not align with frame boundaries; implementations buffer
/// partial frames between calls.
pub trait FrameDecoder: Send {
    /// Consumes `bytes` and returns every value completed by them.
    fn decode(&mut self, bytes: &[u8]) -> Vec<f64>;
}

impl<F> FrameDecoder for F
where
    F: FnMut(&[u8]) -> Vec<f64> + Send,
{
    fn decode(&mut self, bytes: &[u8]) -> Vec<f64> {
        self(bytes)
    }
}

/// Decoder for register-read responses:
/// `address | function_code | byte_count | data[byte_count] | crc(2)`.
///
/// Extracts one 16-bit big-endian register per valid frame and scales it.
/// Bytes that do not start a valid frame are skipped one at a time until
/// the stream resynchronizes.
#[derive(Debug, Clone)]
pub struct RegisterDecoder {
    address: u8,
    function_code: u8,
    register: usize,
    scale: f64,
    signed: bool,
    order: ByteOrder,
    buffer: Vec<u8>,
}

impl RegisterDecoder {
    /// Decoder for register 0, unscaled, unsigned, CRC low byte first.
    pub fn new(address: u8, function_code: u8) -> Self {
        Self {
            address,
            function_code,
            register: 0,
            scale: 1.0,
            signed: false,
            order: ByteOrder::default(),
            buffer: Vec::new(),
        }
    }

    /// Selects which register of the response carries the value.
    pub fn with_register(mut self, register: usize) -> Self {
        self.register = register;
        self
    }

    /// Multiplies each raw register value by `scale`.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Interprets registers as two's-complement.
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Sets the checksum byte order.
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Bytes held while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn value_of(&self, data: &[u8]) -> Option<f64> {
        let chunk = data.chunks_exact(2).nth(self.register)?;
        let raw = u16::from_be_bytes([chunk[0], chunk[1]]);
        let value = if self.signed {
            f64::from(raw as i16)
        } else {
            f64::from(raw)
        };
        Some(value * self.scale)
    }
}

impl FrameDecoder for RegisterDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Vec<f64> {
        self.buffer.extend_from_slice(bytes);
        let mut values = Vec::new();

        while self.buffer.len() >= 3 {
            if self.buffer[0] != self.address || self.buffer[1] != self.function_code {
                self.buffer.remove(0);
                continue;
            }

            let total = 3 + usize::from(self.buffer[2]) + 2;
            if self.buffer.len() < total {
                break;
            }

            if !frame::is_sealed(&self.buffer[..total], self.order) {
                trace!("Skipping byte before unsealed frame candidate");
                self.buffer.remove(0);
                continue;
            }

            let frame: Vec<u8> = self.buffer.drain(..total).collect();
            if let Some(value) = self.value_of(&frame[3..total - 2]) {
                values.push(value);
            }
        }

        values
    }
}

/// Listener that decodes inbound traffic into an aggregator.
pub struct TelemetryListener<D> {
    name: String,
    decoder: Mutex<D>,
    aggregator: Arc<SamplingAggregator>,
    next_index: AtomicU64,
    last: Mutex<Option<Sample>>,
}

impl<D: FrameDecoder> TelemetryListener<D> {
    /// Feeds values decoded by `decoder` into `aggregator`.
    pub fn new(name: impl Into<String>, decoder: D, aggregator: Arc<SamplingAggregator>) -> Self {
        Self {
            name: name.into(),
            decoder: Mutex::new(decoder),
            aggregator,
            next_index: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    /// Number of samples pushed so far.
    pub fn samples_seen(&self) -> u64 {
        self.next_index.load(Ordering::Relaxed)
    }

    /// The most recent sample.
    pub fn last_sample(&self) -> Option<Sample> {
        *self.last.lock()
    }

    /// Aggregator receiving the samples.
    pub fn aggregator(&self) -> &Arc<SamplingAggregator> {
        &self.aggregator
    }
}

impl<D: FrameDecoder> TransportListener for TelemetryListener<D> {
    fn on_bytes(&self, direction: Direction, _source: &Transport, bytes: &[u8]) -> anyhow::Result<()> {
        if direction != Direction::Inbound {
            return Ok(());
        }

        let values = self.decoder.lock().decode(bytes);
        for value in values {
            let sample = Sample {
                value,
                arrival_index: self.next_index.fetch_add(1, Ordering::Relaxed),
            };
            self.aggregator.push_sample(sample.value);
            *self.last.lock() = Some(sample);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
