//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, together with the
//! narrower errors returned by the transport layer. Using the `thiserror`
//! crate, it provides a centralized and consistent way to report failures,
//! from configuration issues to device communication problems.
//!
//! ## Error Hierarchy
//!
//! - **`OpenError`**: returned by `Transport::open`. Covers a channel that is
//!   already open, an out-of-range parameter, an unreachable device and a
//!   link type that was not compiled in. Never retried internally.
//! - **`TransportError`**: returned by `read`/`write`. Either the transport
//!   is not open or the underlying link reported an I/O failure. A read
//!   timeout is *not* an error; it is a successful zero-length read.
//! - **`DaqError`**: application-level error. Wraps the two above plus
//!   configuration and settings persistence failures.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error
//! types, so the `?` operator works across module boundaries.

use std::io;

use thiserror::Error;

use crate::registry::DeviceClass;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Failure to bring a transport from `Closed` to `Open`.
#[derive(Error, Debug)]
pub enum OpenError {
    /// `open` was called on a transport that is already open.
    #[error("Channel is already open")]
    AlreadyOpen,

    /// A required address parameter is missing or out of range.
    #[error("Invalid channel parameter: {0}")]
    InvalidParameter(String),

    /// The OS refused or could not find the link (device absent, permission
    /// denied, host unreachable).
    #[error("Failed to open {target}: {source}")]
    Unreachable {
        /// Human-readable description of the address that failed.
        target: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The address needs a link type that was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Failure of a read or write on a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport was never opened or has been closed.
    #[error("Transport is not open")]
    NotOpen,

    /// The link reported an I/O failure other than a timeout.
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Primary error type for the crate.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Config`, `Configuration`, `MissingAddress`,
///    `UnreadableAddress`
///    - Occur during startup or when settings are edited
///    - Recovery: fix the configuration and retry
///
/// 2. **Device Errors** - `Open`, `Transport`
///    - Occur while talking to an instrument
///    - Recovery: caller decides whether to retry or close the channel
///
/// 3. **Persistence Errors** - `Io`, `SettingsSerialize`, `SettingsParse`
///    - Occur while reading or writing the settings file
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file could not be parsed or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds semantically invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed (settings file access).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Settings could not be rendered back to TOML.
    #[error("Failed to serialize settings: {0}")]
    SettingsSerialize(#[from] toml::ser::Error),

    /// Settings file exists but is not valid TOML.
    #[error("Failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    /// The settings collaborator holds no channel address for a device class.
    #[error("No channel address configured for {0}")]
    MissingAddress(DeviceClass),

    /// A channel record exists for a device class but cannot be used
    /// (unreadable file, malformed TOML, unknown link kind, bad port).
    #[error("Channel address for {class} is unreadable: {source}")]
    UnreadableAddress {
        class: DeviceClass,
        #[source]
        source: Box<DaqError>,
    },

    /// Opening a device channel failed.
    #[error("Failed to open {class} channel: {source}")]
    Open {
        /// Device class whose transport failed to open.
        class: DeviceClass,
        /// Underlying open failure.
        #[source]
        source: OpenError,
    },

    /// Reading from or writing to a device channel failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl TransportError {
    /// Returns true if the error means the channel is gone rather than a
    /// transient link hiccup.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::NotOpen => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
            ),
        }
    }
}
