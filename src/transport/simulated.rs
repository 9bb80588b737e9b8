//! Simulated devices.
//!
//! Provides in-memory instruments for testing and for running without the
//! vendor controller attached.
//!
//! # Behavior
//!
//! - Every byte written to the link is recorded and, if a responder is set,
//!   passed to it. The responder's reply is queued for reading.
//! - Reads block on a condition variable for at most the address timeout
//!   and return a timeout error when nothing arrives.
//! - Unsolicited traffic (a streaming instrument) is injected with
//!   [`SimulatedDevice::inject`].
//! - `shutdown` wakes every blocked reader immediately.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::link::{Connector, Link};
use crate::address::ChannelAddress;
use crate::error::OpenError;
use crate::protocol::{frame, ByteOrder};

/// Builds the reply for one write. `None` means the device stays silent.
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct DeviceState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    connected: bool,
    connections: usize,
    responder: Option<Responder>,
}

struct DeviceShared {
    state: Mutex<DeviceState>,
    readable: Condvar,
}

/// Handle to an in-memory instrument.
///
/// Clones share the same device.
#[derive(Clone)]
pub struct SimulatedDevice {
    shared: Arc<DeviceShared>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Creates a silent device.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                state: Mutex::new(DeviceState::default()),
                readable: Condvar::new(),
            }),
        }
    }

    /// Creates a device that answers writes with `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let device = Self::new();
        device.set_responder(responder);
        device
    }

    /// Replaces the responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.shared.state.lock().responder = Some(Arc::new(responder));
    }

    /// Queues bytes as if the instrument had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock();
        state.inbound.extend(bytes.iter().copied());
        self.shared.readable.notify_all();
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().written.clone()
    }

    /// Clears the record of written bytes.
    pub fn clear_written(&self) {
        self.shared.state.lock().written.clear();
    }

    /// Number of bytes waiting to be read.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().inbound.len()
    }

    /// Returns true while a link to the device is open.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// Number of times a link to the device was opened.
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().connections
    }

    fn attach(&self, timeout: Duration) -> SimulatedLink {
        let mut state = self.shared.state.lock();
        state.connected = true;
        state.connections += 1;
        SimulatedLink {
            device: self.clone(),
            timeout,
        }
    }
}

/// Responder that echoes every checksum-valid frame and ignores the rest.
pub fn modbus_echo_responder(order: ByteOrder) -> impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync {
    move |bytes: &[u8]| frame::is_sealed(bytes, order).then(|| bytes.to_vec())
}

/// Link end held by a transport.
pub struct SimulatedLink {
    device: SimulatedDevice,
    timeout: Duration,
}

impl Read for SimulatedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let shared = &self.device.shared;
        let deadline = Instant::now() + self.timeout;
        let mut state = shared.state.lock();
        loop {
            if !state.connected {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "simulated link shut down",
                ));
            }
            if !state.inbound.is_empty() {
                let n = buf.len().min(state.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if shared.readable.wait_until(&mut state, deadline).timed_out() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
        }
    }
}

impl Write for SimulatedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let shared = &self.device.shared;
        let responder = {
            let mut state = shared.state.lock();
            if !state.connected {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "simulated link shut down",
                ));
            }
            state.written.extend_from_slice(buf);
            state.responder.clone()
        };

        // Run the responder unlocked so it may call back into the device.
        if let Some(reply) = responder.and_then(|r| r(buf)) {
            self.device.inject(&reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for SimulatedLink {
    fn try_clone_link(&self) -> io::Result<Box<dyn Link>> {
        Ok(Box::new(SimulatedLink {
            device: self.device.clone(),
            timeout: self.timeout,
        }))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        let shared = &self.device.shared;
        shared.state.lock().connected = false;
        shared.readable.notify_all();
        Ok(())
    }
}

/// Connector backed by in-memory devices.
///
/// Serial addresses map to devices by port name, network addresses by
/// `host:port`. Unknown addresses get a fresh silent device unless strict
/// mode is on.
#[derive(Default)]
pub struct SimulatedConnector {
    devices: Mutex<HashMap<String, SimulatedDevice>>,
    strict: bool,
}

impl SimulatedConnector {
    /// Connector that creates a silent device for any address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that refuses addresses without an attached device.
    pub fn strict() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            strict: true,
        }
    }

    /// Attaches `device` at `address` and returns it.
    pub fn attach(&self, address: &ChannelAddress, device: SimulatedDevice) -> SimulatedDevice {
        self.devices.lock().insert(key(address), device.clone());
        device
    }

    /// Device attached at `address`, if any.
    pub fn device(&self, address: &ChannelAddress) -> Option<SimulatedDevice> {
        self.devices.lock().get(&key(address)).cloned()
    }
}

impl Connector for SimulatedConnector {
    fn connect(&self, address: &ChannelAddress) -> Result<Box<dyn Link>, OpenError> {
        let mut devices = self.devices.lock();
        let device = match devices.get(&key(address)) {
            Some(device) => device.clone(),
            None if self.strict => {
                return Err(OpenError::Unreachable {
                    target: address.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no simulated device attached"),
                })
            }
            None => devices
                .entry(key(address))
                .or_insert_with(SimulatedDevice::new)
                .clone(),
        };
        Ok(Box::new(device.attach(address.timeout())))
    }

    fn kind(&self) -> &'static str {
        "simulated"
    }
}

fn key(address: &ChannelAddress) -> String {
    match address {
        ChannelAddress::Serial(s) => s.port_name.clone(),
        ChannelAddress::Network(n) => format!("{}:{}", n.host, n.port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_times_out() {
        let device = SimulatedDevice::new();
        let mut link = device.attach(Duration::from_millis(20));
        let mut buf = [0u8; 4];
        let start = Instant::now();
        let err = link.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_responder_reply_is_readable() {
        let device = SimulatedDevice::with_responder(|req| Some(req.iter().rev().copied().collect()));
        let mut link = device.attach(Duration::from_millis(100));
        link.write_all(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 8];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[3, 2, 1]);
        assert_eq!(device.written(), vec![1, 2, 3]);
    }

    #[test]
    fn test_shutdown_wakes_reader() {
        let device = SimulatedDevice::new();
        let mut reader = device.attach(Duration::from_secs(10));
        let mut closer = reader.try_clone_link().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });
        std::thread::sleep(Duration::from_millis(20));
        closer.shutdown().unwrap();

        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_echo_responder_checks_frames() {
        let echo = modbus_echo_responder(ByteOrder::LowFirst);
        let good = frame::seal(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01], ByteOrder::LowFirst);
        assert_eq!(echo(&good), Some(good.clone()));
        assert_eq!(echo(&[0x01, 0x03, 0x00]), None);
    }

    #[test]
    fn test_strict_connector_refuses_unknown() {
        let connector = SimulatedConnector::strict();
        let address = ChannelAddress::serial("COM7");
        assert!(matches!(
            connector.connect(&address),
            Err(OpenError::Unreachable { .. })
        ));

        connector.attach(&address, SimulatedDevice::new());
        assert!(connector.connect(&address).is_ok());
        assert!(connector.device(&address).unwrap().is_connected());
    }
}
