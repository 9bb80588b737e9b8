//! # Ultrasonic DAQ Core Library
//!
//! Device transport and live telemetry sampling for ultrasonic fatigue test
//! rigs. The crate talks to the rig's instruments (ultrasonic generator
//! controller, static-load controller, air compressor) over serial or
//! network links, frames commands with a Modbus-style CRC-16, and turns the
//! measurement stream into downsampled, time-windowed series for display.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: CRC-16 computation and checksum-terminated frames.
//! - **`address`**: `ChannelAddress` (serial line settings or network
//!   endpoint) and its persisted record form.
//! - **`transport`**: the `Transport` channel lifecycle, listener fan-out,
//!   hardware and simulated connectors, and an async facade.
//! - **`registry`**: `DeviceRegistry`, one shared transport per device class.
//! - **`settings`**: settings collaborators that persist channel addresses.
//! - **`sampling`**: the windowed downsampling aggregator.
//! - **`telemetry`**: decoders and the listener that feeds aggregators.
//! - **`reader`**: the per-transport reader thread.
//! - **`config`**, **`logging`**, **`error`**: ambient configuration,
//!   structured logging and the error taxonomy.
//!
//! ## Data Flow
//!
//! ```text
//! DeviceRegistry ──get_or_create──▶ Transport ◀── ReaderLoop (thread)
//!                                      │ on every read/write
//!                                      ▼
//!                               TelemetryListener ──decode──▶ SamplingAggregator
//!                                                                   │
//!                                                      current_points() ▶ display
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod sampling;
pub mod settings;
pub mod telemetry;
pub mod transport;

pub use address::{ChannelAddress, ChannelRecord};
pub use error::{AppResult, DaqError, OpenError, TransportError};
pub use registry::{DeviceClass, DeviceRegistry, SettingsProvider};
pub use sampling::{Point, SamplingAggregator};
pub use transport::{SharedTransport, Transport, TransportListener};
