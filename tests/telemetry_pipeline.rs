//! Telemetry pipeline integration tests
//!
//! Wires a simulated instrument, the reader thread, a TelemetryListener and
//! a SamplingAggregator together, and drives request/response traffic
//! through the async facade.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ultrasonic_daq::address::{ChannelAddress, SerialSettings};
use ultrasonic_daq::protocol::{checksum, frame, ByteOrder, Checksum, Frame};
use ultrasonic_daq::reader::{ReaderExit, ReaderLoop};
use ultrasonic_daq::sampling::{AggregatorConfig, ManualClock, SamplingAggregator, WindowDuration};
use ultrasonic_daq::settings::MemorySettings;
use ultrasonic_daq::telemetry::{RegisterDecoder, TelemetryListener};
use ultrasonic_daq::transport::simulated::modbus_echo_responder;
use ultrasonic_daq::transport::{
    AsyncTransport, SimulatedConnector, SimulatedDevice, Transport, TransportListener,
};
use ultrasonic_daq::{DeviceClass, DeviceRegistry};

fn register_response(value: u16) -> Vec<u8> {
    let [hi, lo] = value.to_be_bytes();
    frame::seal(&[0x01, 0x04, 0x02, hi, lo], ByteOrder::LowFirst)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// =============================================================================
// Checksum reference vectors
// =============================================================================

#[test]
fn test_checksum_reference_vectors() {
    assert_eq!(checksum::compute(&[]), 0xFFFF);
    assert_eq!(checksum::compute(b"123456789"), 0x4B37);
    assert_eq!(checksum::compute(&[0x01, 0x04, 0x00, 0x01, 0x00, 0x01]), 0x0A60);

    let sealed = frame::seal(&[0x01, 0x04, 0x00, 0x01, 0x00, 0x01], ByteOrder::LowFirst);
    assert_eq!(&sealed[6..], &[0x60, 0x0A]);
    assert!(checksum::verify(&sealed[..6], 0x0A60));
    assert!(!checksum::verify(&sealed[..6], 0x600A));
}

#[test]
fn test_frame_decode_rejects_corruption() {
    let mut bytes = Frame::new(0x01, 0x04, vec![0x02, 0x01, 0xF4]).encode(ByteOrder::HighFirst);
    assert!(Frame::decode(&bytes, ByteOrder::HighFirst).is_ok());
    assert!(Frame::decode(&bytes, ByteOrder::LowFirst).is_err());

    bytes[3] ^= 0xFF;
    assert!(Frame::decode(&bytes, ByteOrder::HighFirst).is_err());
    assert!(!frame::is_sealed(&bytes, ByteOrder::HighFirst));
    assert_eq!(Checksum::of(&[0x01, 0x04, 0x02, 0x01, 0xF4]).value(), 0x27B9);
}

// =============================================================================
// Reader thread to aggregator
// =============================================================================

#[test]
fn test_reader_feeds_aggregator() {
    let address = ChannelAddress::Serial(SerialSettings::new("TELEMETRY").with_timeout_ms(20));
    let connector = SimulatedConnector::new();
    let device = connector.attach(&address, SimulatedDevice::new());
    let transport = Arc::new(Transport::new(address, Arc::new(connector)).with_label("amplitude"));
    transport.open().unwrap();

    let aggregator = Arc::new(
        SamplingAggregator::new(
            "amplitude",
            AggregatorConfig {
                samples_per_point: 5,
                points_per_minute: 0.6,
                duration: WindowDuration::Five,
                y_wrap: None,
            },
            Arc::new(ManualClock::new(0.5)),
        )
        .unwrap(),
    );
    let telemetry = Arc::new(TelemetryListener::new(
        "amplitude",
        RegisterDecoder::new(0x01, 0x04).with_scale(0.1),
        aggregator.clone(),
    ));
    let listener: Arc<dyn TransportListener> = telemetry.clone();
    transport.add_listener(&listener);

    let reader = ReaderLoop::spawn(transport.clone(), 7).unwrap();

    // Split frames across writes so events straddle frame boundaries.
    let mut stream = Vec::new();
    for raw in [100u16, 100, 100, 100, 100, 200, 200, 200, 200, 200] {
        stream.extend(register_response(raw));
    }
    for chunk in stream.chunks(5) {
        device.inject(chunk);
    }

    assert!(wait_until(|| telemetry.samples_seen() == 10));
    let summary = reader.stop();
    assert_eq!(summary.exit, ReaderExit::Stopped);
    assert_eq!(summary.bytes_read, stream.len() as u64);

    let ys: Vec<f64> = aggregator.current_points().iter().map(|p| p.y).collect();
    assert_eq!(ys.len(), 2);
    assert!((ys[0] - 10.0).abs() < 1e-9);
    assert!((ys[1] - 20.0).abs() < 1e-9);
    assert_eq!(transport.stats().bytes_read, stream.len() as u64);
}

#[test]
fn test_dropped_listener_stops_feeding() {
    let address = ChannelAddress::Serial(SerialSettings::new("DROPPED").with_timeout_ms(20));
    let connector = SimulatedConnector::new();
    let device = connector.attach(&address, SimulatedDevice::new());
    let transport = Arc::new(Transport::new(address, Arc::new(connector)));
    transport.open().unwrap();

    let aggregator = Arc::new(
        SamplingAggregator::new(
            "stress",
            AggregatorConfig {
                samples_per_point: 1,
                ..AggregatorConfig::default()
            },
            Arc::new(ManualClock::new(0.0)),
        )
        .unwrap(),
    );
    let listener: Arc<dyn TransportListener> = Arc::new(TelemetryListener::new(
        "stress",
        RegisterDecoder::new(0x01, 0x04),
        aggregator.clone(),
    ));
    transport.add_listener(&listener);
    drop(listener);

    device.inject(&register_response(42));
    let mut buf = [0u8; 32];
    assert_eq!(transport.read(&mut buf).unwrap(), 7);
    assert!(aggregator.current_points().is_empty());
}

// =============================================================================
// Async request/response
// =============================================================================

#[tokio::test]
async fn test_async_exchange_through_registry() {
    let settings = MemorySettings::new();
    settings.insert(
        DeviceClass::StaticLoadSerial,
        ChannelAddress::Serial(SerialSettings::new("COM4").with_timeout_ms(100)),
    );
    let registry = DeviceRegistry::simulated(Arc::new(settings));
    if let Some(simulator) = registry.simulator() {
        simulator.attach(
            &ChannelAddress::Serial(SerialSettings::new("COM4").with_timeout_ms(100)),
            SimulatedDevice::with_responder(modbus_echo_responder(ByteOrder::LowFirst)),
        );
    }

    let transport = registry.get_or_create(DeviceClass::StaticLoadSerial).unwrap();
    let device = AsyncTransport::new(transport);

    let request = Frame::new(0x01, 0x06, vec![0x00, 0x10, 0x01, 0xF4]).encode(ByteOrder::LowFirst);
    let reply = device.write_then_read(request.clone(), 64).await.unwrap();
    assert_eq!(reply, request);

    // Garbage is not echoed; the read times out empty.
    let reply = device.write_then_read(vec![0xDE, 0xAD], 64).await.unwrap();
    assert!(reply.is_empty());

    device.close().await;
    assert!(!device.inner().is_open());
}

#[tokio::test]
async fn test_concurrent_async_exchanges_do_not_interleave() {
    let address = ChannelAddress::Serial(SerialSettings::new("SHARED").with_timeout_ms(200));
    let connector = SimulatedConnector::new();
    connector.attach(
        &address,
        SimulatedDevice::with_responder(modbus_echo_responder(ByteOrder::LowFirst)),
    );
    let transport = Arc::new(Transport::new(address, Arc::new(connector)));
    let device = AsyncTransport::new(transport);
    device.open().await.unwrap();

    let mut tasks = Vec::new();
    for unit in 1..=8u8 {
        let device = device.clone();
        tasks.push(tokio::spawn(async move {
            let request = Frame::new(unit, 0x03, vec![0x00, unit]).encode(ByteOrder::LowFirst);
            let reply = device.write_then_read(request.clone(), 64).await.unwrap();
            (request, reply)
        }));
    }

    for task in tasks {
        let (request, reply) = task.await.unwrap();
        assert_eq!(reply, request);
    }
}
