//! OS-level links and the connectors that open them.
//!
//! A [`Link`] is one open byte channel. A [`Connector`] turns a
//! [`ChannelAddress`] into a link. Two connector variants exist:
//!
//! - [`HardwareConnector`]: real serial ports (`serialport` crate, behind the
//!   `serial` feature) and TCP sockets.
//! - [`SimulatedConnector`](super::simulated::SimulatedConnector): in-memory
//!   devices for tests and for running without the vendor controller.
//!
//! The variant is chosen when the device registry is constructed, so the
//! rest of the crate only ever sees `Arc<dyn Connector>`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::address::{ChannelAddress, NetworkEndpoint};
use crate::error::OpenError;

/// An open, bidirectional byte channel.
///
/// Reads block for at most the address timeout and report a timeout as
/// `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
pub trait Link: Read + Write + Send {
    /// Opens a second handle to the same channel.
    ///
    /// The transport reads through one handle and writes through another so
    /// a blocked read never holds up a write.
    fn try_clone_link(&self) -> io::Result<Box<dyn Link>>;

    /// Forces any blocked read on a sibling handle to return.
    ///
    /// Links that cannot interrupt a read rely on the read timeout instead.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens links for channel addresses.
pub trait Connector: Send + Sync {
    /// Opens a link for `address`.
    fn connect(&self, address: &ChannelAddress) -> Result<Box<dyn Link>, OpenError>;

    /// Short name used in logs ("hardware", "simulated").
    fn kind(&self) -> &'static str;
}

/// Connector for physical instruments.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareConnector;

impl HardwareConnector {
    /// Creates the connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for HardwareConnector {
    fn connect(&self, address: &ChannelAddress) -> Result<Box<dyn Link>, OpenError> {
        match address {
            ChannelAddress::Serial(_) => open_serial(address),
            ChannelAddress::Network(endpoint) => {
                let link = TcpLink::connect(endpoint, address.timeout()).map_err(|source| {
                    OpenError::Unreachable {
                        target: address.to_string(),
                        source,
                    }
                })?;
                Ok(Box::new(link))
            }
        }
    }

    fn kind(&self) -> &'static str {
        "hardware"
    }
}

#[cfg(feature = "serial")]
fn open_serial(address: &ChannelAddress) -> Result<Box<dyn Link>, OpenError> {
    let ChannelAddress::Serial(settings) = address else {
        return Err(OpenError::InvalidParameter("not a serial address".into()));
    };

    let port = serialport::new(&settings.port_name, settings.baud_rate.bps())
        .data_bits(serial_impl::data_bits(settings.data_bits))
        .stop_bits(serial_impl::stop_bits(settings.stop_bits)?)
        .parity(serial_impl::parity(settings.parity)?)
        .flow_control(serial_impl::flow_control(settings.flow_control))
        .timeout(address.timeout())
        .open()
        .map_err(|err| OpenError::Unreachable {
            target: address.to_string(),
            source: err.into(),
        })?;

    debug!(port = %settings.port_name, baud = settings.baud_rate.bps(), "Serial port opened");
    Ok(Box::new(SerialLink { port }))
}

#[cfg(not(feature = "serial"))]
fn open_serial(_address: &ChannelAddress) -> Result<Box<dyn Link>, OpenError> {
    Err(OpenError::FeatureNotEnabled("serial".into()))
}

/// Serial port link.
#[cfg(feature = "serial")]
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

#[cfg(feature = "serial")]
impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

#[cfg(feature = "serial")]
impl Link for SerialLink {
    fn try_clone_link(&self) -> io::Result<Box<dyn Link>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialLink { port }))
    }
}

#[cfg(feature = "serial")]
mod serial_impl {
    use crate::address::{DataBits, FlowControl, Parity, StopBits};
    use crate::error::OpenError;

    pub(super) fn data_bits(bits: DataBits) -> serialport::DataBits {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }

    pub(super) fn stop_bits(bits: StopBits) -> Result<serialport::StopBits, OpenError> {
        match bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(OpenError::InvalidParameter(
                "1.5 stop bits are not supported by this serial driver".into(),
            )),
        }
    }

    pub(super) fn parity(parity: Parity) -> Result<serialport::Parity, OpenError> {
        match parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Mark | Parity::Space => Err(OpenError::InvalidParameter(format!(
                "{} parity is not supported by this serial driver",
                parity.as_token()
            ))),
        }
    }

    pub(super) fn flow_control(flow: FlowControl) -> serialport::FlowControl {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
            FlowControl::Software => serialport::FlowControl::Software,
        }
    }
}

/// TCP socket link.
///
/// A clean EOF from the peer is reported as `ErrorKind::UnexpectedEof`, so
/// a zero-length read on a transport always means a timeout.
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// Connects to `endpoint`, bounding the connect and every read and write
    /// by `timeout`.
    pub fn connect(endpoint: &NetworkEndpoint, timeout: Duration) -> io::Result<Self> {
        let mut last_err = io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", endpoint.host),
        );
        for addr in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "TCP link connected");
                    return Ok(Self { stream });
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf)? {
            0 if !buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            n => Ok(n),
        }
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Link for TcpLink {
    fn try_clone_link(&self) -> io::Result<Box<dyn Link>> {
        Ok(Box::new(TcpLink {
            stream: self.stream.try_clone()?,
        }))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}
