//! Channel addresses.
//!
//! A [`ChannelAddress`] describes how to reach one device: either a serial
//! port with its line parameters or a network endpoint. Addresses are
//! persisted as a flat [`ChannelRecord`] of strings.
//!
//! # Silent defaults
//!
//! Every enum-valued serial parameter parses through a *total* function:
//! an unrecognized token falls back to a fixed default instead of failing.
//!
//! | Field          | Default |
//! |----------------|---------|
//! | `baud_rate`    | 9600    |
//! | `data_bits`    | 8       |
//! | `stop_bits`    | 1       |
//! | `parity`       | none    |
//! | `flow_control` | none    |
//!
//! This is a compatibility behavior with existing settings files and must
//! not be turned into an error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// Read timeout used when a record carries no usable `timeout_ms`.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Supported serial baud rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaudRate {
    /// 9600 baud
    #[default]
    B9600,
    /// 19200 baud
    B19200,
    /// 38400 baud
    B38400,
    /// 57600 baud
    B57600,
    /// 115200 baud
    B115200,
}

impl BaudRate {
    /// Parses a token, falling back to 9600 for anything unrecognized.
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "9600" => BaudRate::B9600,
            "19200" => BaudRate::B19200,
            "38400" => BaudRate::B38400,
            "57600" => BaudRate::B57600,
            "115200" => BaudRate::B115200,
            _ => BaudRate::default(),
        }
    }

    /// Bits per second.
    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

/// Serial character size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    #[default]
    Eight,
}

impl DataBits {
    /// Parses a token, falling back to 8 for anything unrecognized.
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "5" => DataBits::Five,
            "6" => DataBits::Six,
            "7" => DataBits::Seven,
            "8" => DataBits::Eight,
            _ => DataBits::default(),
        }
    }

    /// Number of bits.
    pub const fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Serial stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    /// 1 stop bit
    #[default]
    One,
    /// 1.5 stop bits
    OnePointFive,
    /// 2 stop bits
    Two,
}

impl StopBits {
    /// Parses a token, falling back to 1 for anything unrecognized.
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "1" => StopBits::One,
            "1.5" => StopBits::OnePointFive,
            "2" => StopBits::Two,
            _ => StopBits::default(),
        }
    }

    /// Canonical token.
    pub const fn as_token(self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        }
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
}

impl Parity {
    /// Parses a token, falling back to none for anything unrecognized.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "none" => Parity::None,
            "odd" => Parity::Odd,
            "even" => Parity::Even,
            "mark" => Parity::Mark,
            "space" => Parity::Space,
            _ => Parity::default(),
        }
    }

    /// Canonical token.
    pub const fn as_token(self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
            Parity::Mark => "mark",
            Parity::Space => "space",
        }
    }

    /// Single letter used in `8N1` style summaries.
    const fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

/// Serial flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowControl {
    /// No flow control
    #[default]
    None,
    /// RTS/CTS
    Hardware,
    /// XON/XOFF
    Software,
}

impl FlowControl {
    /// Parses a token, falling back to none for anything unrecognized.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "none" => FlowControl::None,
            "hardware" | "rts/cts" => FlowControl::Hardware,
            "software" | "xon/xoff" => FlowControl::Software,
            _ => FlowControl::default(),
        }
    }

    /// Canonical token.
    pub const fn as_token(self) -> &'static str {
        match self {
            FlowControl::None => "none",
            FlowControl::Hardware => "hardware",
            FlowControl::Software => "software",
        }
    }
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialSettings {
    /// Port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: BaudRate,
    /// Character size
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Parity
    pub parity: Parity,
    /// Flow control
    pub flow_control: FlowControl,
    /// Read timeout in milliseconds
    pub timeout_ms: u32,
}

impl SerialSettings {
    /// 8N1 settings at 9600 baud with the default timeout.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: BaudRate::default(),
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Sets the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Sets the read timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Network endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkEndpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

/// How to reach a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddress {
    /// Serial-addressed link
    Serial(SerialSettings),
    /// Network-addressed link
    Network(NetworkEndpoint),
}

impl ChannelAddress {
    /// Shorthand for a serial address with default line settings.
    pub fn serial(port_name: impl Into<String>) -> Self {
        ChannelAddress::Serial(SerialSettings::new(port_name))
    }

    /// Shorthand for a network address.
    pub fn network(host: impl Into<String>, port: u16) -> Self {
        ChannelAddress::Network(NetworkEndpoint {
            host: host.into(),
            port,
        })
    }

    /// Read timeout for blocking reads on this channel.
    ///
    /// Network records carry no timeout field and use the default.
    pub fn timeout(&self) -> Duration {
        match self {
            ChannelAddress::Serial(s) => Duration::from_millis(u64::from(s.timeout_ms)),
            ChannelAddress::Network(_) => Duration::from_millis(u64::from(DEFAULT_TIMEOUT_MS)),
        }
    }

    /// Checks the parameters a link needs before it can be opened.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ChannelAddress::Serial(s) => {
                if s.port_name.trim().is_empty() {
                    return Err("port_name is empty".into());
                }
                if s.timeout_ms == 0 {
                    return Err("timeout_ms must be greater than zero".into());
                }
            }
            ChannelAddress::Network(n) => {
                if n.host.trim().is_empty() {
                    return Err("host is empty".into());
                }
                if n.port == 0 {
                    return Err("port must be in 1..=65535".into());
                }
            }
        }
        Ok(())
    }

    /// Parses a persisted record.
    ///
    /// Enum fields never fail (see module docs). Missing identity fields
    /// (`port_name`, `host`), an unparseable network port or an unknown
    /// `kind` are configuration errors.
    pub fn from_record(record: &ChannelRecord) -> AppResult<Self> {
        let kind = record.kind.trim().to_ascii_lowercase();
        match kind.as_str() {
            "serial" => {
                let port_name = record
                    .port_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        DaqError::Configuration("serial channel has no port_name".into())
                    })?;
                let token = |field: &Option<String>| field.clone().unwrap_or_default();
                let timeout_ms = record
                    .timeout_ms
                    .as_deref()
                    .and_then(|t| t.trim().parse::<u32>().ok())
                    .filter(|t| *t > 0)
                    .unwrap_or(DEFAULT_TIMEOUT_MS);

                Ok(ChannelAddress::Serial(SerialSettings {
                    port_name: port_name.to_string(),
                    baud_rate: BaudRate::from_token(&token(&record.baud_rate)),
                    data_bits: DataBits::from_token(&token(&record.data_bits)),
                    stop_bits: StopBits::from_token(&token(&record.stop_bits)),
                    parity: Parity::from_token(&token(&record.parity)),
                    flow_control: FlowControl::from_token(&token(&record.flow_control)),
                    timeout_ms,
                }))
            }
            "network" | "tcp" => {
                let host = record
                    .host
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| DaqError::Configuration("network channel has no host".into()))?;
                let raw_port = record.port.as_deref().unwrap_or_default().trim();
                let port = raw_port.parse::<u16>().map_err(|_| {
                    DaqError::Configuration(format!("network port '{raw_port}' is not a valid port"))
                })?;
                Ok(ChannelAddress::network(host, port))
            }
            other => Err(DaqError::Configuration(format!(
                "unknown channel kind '{other}', expected 'serial' or 'network'"
            ))),
        }
    }

    /// Renders the address back to its persisted record.
    pub fn to_record(&self) -> ChannelRecord {
        match self {
            ChannelAddress::Serial(s) => ChannelRecord {
                kind: "serial".into(),
                port_name: Some(s.port_name.clone()),
                baud_rate: Some(s.baud_rate.bps().to_string()),
                data_bits: Some(s.data_bits.bits().to_string()),
                stop_bits: Some(s.stop_bits.as_token().into()),
                parity: Some(s.parity.as_token().into()),
                flow_control: Some(s.flow_control.as_token().into()),
                timeout_ms: Some(s.timeout_ms.to_string()),
                ..ChannelRecord::default()
            },
            ChannelAddress::Network(n) => ChannelRecord {
                kind: "network".into(),
                host: Some(n.host.clone()),
                port: Some(n.port.to_string()),
                ..ChannelRecord::default()
            },
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddress::Serial(s) => write!(
                f,
                "{} @ {} {}{}{}",
                s.port_name,
                s.baud_rate.bps(),
                s.data_bits.bits(),
                s.parity.letter(),
                s.stop_bits.as_token()
            ),
            ChannelAddress::Network(n) => write!(f, "{}:{}", n.host, n.port),
        }
    }
}

/// Persisted, string-valued form of a [`ChannelAddress`].
///
/// This is the shape stored under `[devices.<class>]` in the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// "serial" or "network"
    pub kind: String,
    /// Serial port path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    /// Baud rate token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<String>,
    /// Data bits token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<String>,
    /// Stop bits token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<String>,
    /// Parity token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<String>,
    /// Flow control token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_control: Option<String>,
    /// Read timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<String>,
    /// Network host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Network port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}
