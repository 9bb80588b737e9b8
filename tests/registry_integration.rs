//! Integration tests for DeviceRegistry
//!
//! Covers the shared-transport guarantees per device class, failure
//! handling, concurrent construction and address persistence through a
//! TOML settings file.

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;
use ultrasonic_daq::address::{BaudRate, ChannelAddress, SerialSettings};
use ultrasonic_daq::config::{AppConfig, BackendConfig, BackendMode};
use ultrasonic_daq::settings::{MemorySettings, TomlSettings};
use ultrasonic_daq::transport::{SimulatedConnector, SimulatedDevice};
use ultrasonic_daq::{DaqError, DeviceClass, DeviceRegistry, OpenError, SettingsProvider};

fn memory_settings() -> Arc<MemorySettings> {
    let settings = MemorySettings::new();
    settings.insert(DeviceClass::Ultrasound, ChannelAddress::serial("COM3"));
    settings.insert(DeviceClass::StaticLoadSerial, ChannelAddress::serial("COM4"));
    settings.insert(
        DeviceClass::StaticLoadNetwork,
        ChannelAddress::network("192.168.0.20", 502),
    );
    Arc::new(settings)
}

// =============================================================================
// Sharing
// =============================================================================

#[test]
fn test_same_class_shares_one_transport() {
    let registry = DeviceRegistry::simulated(memory_settings());

    let first = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    let second = registry.get_or_create(DeviceClass::Ultrasound).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_open());
    assert_eq!(registry.active_classes(), vec![DeviceClass::Ultrasound]);
}

#[test]
fn test_distinct_classes_get_distinct_transports() {
    let registry = DeviceRegistry::simulated(memory_settings());

    let ultrasound = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    let serial = registry.get_or_create(DeviceClass::StaticLoadSerial).unwrap();
    let network = registry.get_or_create(DeviceClass::StaticLoadNetwork).unwrap();

    assert!(!Arc::ptr_eq(&ultrasound, &serial));
    assert!(!Arc::ptr_eq(&serial, &network));
    assert_eq!(network.address().to_string(), "192.168.0.20:502");
    assert_eq!(ultrasound.label(), "ultrasound");
}

#[test]
fn test_close_evicts_only_that_class() {
    let registry = DeviceRegistry::simulated(memory_settings());
    let ultrasound = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    let serial = registry.get_or_create(DeviceClass::StaticLoadSerial).unwrap();

    registry.close(DeviceClass::Ultrasound);

    assert!(!ultrasound.is_open());
    assert!(serial.is_open());
    assert!(registry.get(DeviceClass::Ultrasound).is_none());

    let reopened = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    assert!(!Arc::ptr_eq(&ultrasound, &reopened));
    assert!(reopened.is_open());
}

#[test]
fn test_drop_closes_everything() {
    let registry = DeviceRegistry::simulated(memory_settings());
    let ultrasound = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    let network = registry.get_or_create(DeviceClass::StaticLoadNetwork).unwrap();

    drop(registry);

    assert!(!ultrasound.is_open());
    assert!(!network.is_open());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_missing_address() {
    let registry = DeviceRegistry::simulated(memory_settings());
    let err = registry.get_or_create(DeviceClass::AirCompressor).unwrap_err();
    assert!(matches!(err, DaqError::MissingAddress(DeviceClass::AirCompressor)));
}

#[test]
fn test_unreadable_record_is_not_reported_as_missing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ultrasonic.toml");
    std::fs::write(
        &path,
        "[devices.ultrasound]\nkind = \"serial\"\nport_name = \"COM3\"\n\n[devices.static_load_network]\nkind = \"network\"\nhost = \"10.0.0.7\"\nport = \"not-a-port\"\n",
    )
    .unwrap();
    let registry = DeviceRegistry::simulated(Arc::new(TomlSettings::new(&path)));

    let err = registry.get_or_create(DeviceClass::StaticLoadNetwork).unwrap_err();
    assert!(matches!(
        err,
        DaqError::UnreadableAddress { class: DeviceClass::StaticLoadNetwork, .. }
    ));
    assert!(registry.get(DeviceClass::StaticLoadNetwork).is_none());

    // Absent records are still MissingAddress; valid ones still open.
    assert!(matches!(
        registry.get_or_create(DeviceClass::AirCompressor).unwrap_err(),
        DaqError::MissingAddress(DeviceClass::AirCompressor)
    ));
    assert!(registry.get_or_create(DeviceClass::Ultrasound).unwrap().is_open());
}

#[test]
fn test_corrupt_settings_file_surfaces_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ultrasonic.toml");
    std::fs::write(&path, "[devices.ultrasound\nkind = ").unwrap();
    let registry = DeviceRegistry::simulated(Arc::new(TomlSettings::new(&path)));

    match registry.get_or_create(DeviceClass::Ultrasound) {
        Err(DaqError::UnreadableAddress { class, source }) => {
            assert_eq!(class, DeviceClass::Ultrasound);
            assert!(matches!(*source, DaqError::SettingsParse(_)));
        }
        other => panic!("expected UnreadableAddress, got {other:?}"),
    }
}

#[test]
fn test_failed_open_is_not_cached() {
    let connector = Arc::new(SimulatedConnector::strict());
    let registry = DeviceRegistry::new(memory_settings(), connector.clone());

    let err = registry.get_or_create(DeviceClass::Ultrasound).unwrap_err();
    assert!(matches!(
        err,
        DaqError::Open {
            class: DeviceClass::Ultrasound,
            source: OpenError::Unreachable { .. }
        }
    ));
    assert!(registry.get(DeviceClass::Ultrasound).is_none());

    // Plug the instrument in and retry.
    let device = connector.attach(&ChannelAddress::serial("COM3"), SimulatedDevice::new());
    let transport = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    assert!(transport.is_open());
    assert_eq!(device.connection_count(), 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_first_use_constructs_once() {
    let connector = Arc::new(SimulatedConnector::new());
    let device = connector.attach(&ChannelAddress::serial("COM3"), SimulatedDevice::new());
    let registry = Arc::new(DeviceRegistry::new(memory_settings(), connector));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.get_or_create(DeviceClass::Ultrasound).unwrap()
            })
        })
        .collect();

    let transports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for transport in &transports[1..] {
        assert!(Arc::ptr_eq(&transports[0], transport));
    }
    assert_eq!(device.connection_count(), 1);
}

// =============================================================================
// Backend selection and persistence
// =============================================================================

#[test]
fn test_backend_overrides_pick_connector_per_class() {
    let mut backend = BackendConfig::default();
    backend.mode = BackendMode::Hardware;
    backend
        .overrides
        .insert("ultrasound".to_string(), BackendMode::Simulated);

    let registry = DeviceRegistry::from_config(memory_settings(), &backend).unwrap();
    assert_eq!(registry.connector_kind(DeviceClass::Ultrasound), "simulated");
    assert_eq!(registry.connector_kind(DeviceClass::AirCompressor), "hardware");
    assert!(registry.simulator().is_some());
}

#[test]
fn test_update_address_persists_and_evicts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ultrasonic.toml");
    std::fs::write(
        &path,
        r#"
[application]
name = "rig-a"

[devices.ultrasound]
kind = "serial"
port_name = "COM3"
"#,
    )
    .unwrap();

    let settings = Arc::new(TomlSettings::new(&path));
    let registry = DeviceRegistry::simulated(settings.clone());
    let before = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    assert_eq!(before.address(), ChannelAddress::serial("COM3"));

    let moved = ChannelAddress::Serial(SerialSettings::new("COM7").with_baud_rate(BaudRate::B115200));
    registry
        .update_address(DeviceClass::Ultrasound, &moved)
        .unwrap();

    assert!(!before.is_open());
    assert_eq!(settings.load_channel_address(DeviceClass::Ultrasound), Some(moved.clone()));
    let after = registry.get_or_create(DeviceClass::Ultrasound).unwrap();
    assert_eq!(after.address(), moved);

    // The rest of the file survives the rewrite and still loads as config.
    let config = AppConfig::load_from(&path).unwrap();
    assert_eq!(config.application.name, "rig-a");
    assert!(config.devices.contains_key("ultrasound"));
}

#[test]
fn test_update_address_rejects_invalid() {
    let registry = DeviceRegistry::simulated(memory_settings());
    let invalid = ChannelAddress::network("", 502);
    assert!(matches!(
        registry.update_address(DeviceClass::StaticLoadNetwork, &invalid),
        Err(DaqError::Configuration(_))
    ));
}
