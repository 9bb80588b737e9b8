//! Device registry.
//!
//! Maps each [`DeviceClass`] to at most one live, shared [`Transport`]. The
//! registry is an explicitly constructed value owned by the application's
//! composition root; there is no process-wide instance.
//!
//! # Construction policy
//!
//! - The first `get_or_create(class)` resolves the class's address through
//!   the [`SettingsProvider`], builds a transport with the connector chosen
//!   for that class, opens it and caches it.
//! - Later calls return the cached handle (same `Arc`).
//! - A failed open is surfaced and *not* cached; the next call retries from
//!   scratch.
//!
//! # Concurrency
//!
//! Every class has its own slot mutex. Construction for one class never
//! waits on another, and two concurrent calls for the same class construct
//! exactly one transport.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::ChannelAddress;
use crate::config::{BackendConfig, BackendMode};
use crate::error::{AppResult, DaqError};
use crate::transport::{Connector, HardwareConnector, SharedTransport, SimulatedConnector, Transport};

/// Physical instrument categories used as registry keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Ultrasonic generator controller
    Ultrasound,
    /// Static-load controller on a serial link
    StaticLoadSerial,
    /// Static-load controller on a network link
    StaticLoadNetwork,
    /// Air compressor
    AirCompressor,
}

impl DeviceClass {
    /// Every device class, in declaration order.
    pub const ALL: [DeviceClass; 4] = [
        DeviceClass::Ultrasound,
        DeviceClass::StaticLoadSerial,
        DeviceClass::StaticLoadNetwork,
        DeviceClass::AirCompressor,
    ];

    /// Key used in settings files and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Ultrasound => "ultrasound",
            DeviceClass::StaticLoadSerial => "static_load_serial",
            DeviceClass::StaticLoadNetwork => "static_load_network",
            DeviceClass::AirCompressor => "air_compressor",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        DeviceClass::ALL
            .into_iter()
            .find(|class| class.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown device class '{s}', expected one of: {}",
                    DeviceClass::ALL.map(DeviceClass::as_str).join(", ")
                )
            })
    }
}

/// Source of persisted channel addresses.
///
/// Implemented by [`TomlSettings`](crate::settings::TomlSettings) and
/// [`MemorySettings`](crate::settings::MemorySettings).
pub trait SettingsProvider: Send + Sync {
    /// Address configured for `class`, if any.
    fn load_channel_address(&self, class: DeviceClass) -> Option<ChannelAddress>;

    /// Like [`load_channel_address`](Self::load_channel_address), but tells
    /// an absent record (`Ok(None)`) apart from one that exists and cannot
    /// be used (`Err`). Providers that cannot fail keep the default.
    fn try_load_channel_address(&self, class: DeviceClass) -> AppResult<Option<ChannelAddress>> {
        Ok(self.load_channel_address(class))
    }

    /// Persists the address for `class`.
    fn save_channel_address(&self, class: DeviceClass, address: &ChannelAddress) -> AppResult<()>;
}

/// Per-class cache of shared transports.
pub struct DeviceRegistry {
    settings: Arc<dyn SettingsProvider>,
    connectors: HashMap<DeviceClass, Arc<dyn Connector>>,
    simulator: Option<Arc<SimulatedConnector>>,
    slots: HashMap<DeviceClass, Mutex<Option<SharedTransport>>>,
}

impl DeviceRegistry {
    /// Creates a registry that opens every class through `connector`.
    pub fn new(settings: Arc<dyn SettingsProvider>, connector: Arc<dyn Connector>) -> Self {
        let connectors = DeviceClass::ALL
            .into_iter()
            .map(|class| (class, connector.clone()))
            .collect();
        Self::with_connectors(settings, connectors, None)
    }

    /// Creates a registry that talks to physical instruments only.
    pub fn hardware(settings: Arc<dyn SettingsProvider>) -> Self {
        Self::new(settings, Arc::new(HardwareConnector::new()))
    }

    /// Creates a registry backed entirely by simulated devices.
    pub fn simulated(settings: Arc<dyn SettingsProvider>) -> Self {
        let simulator = Arc::new(SimulatedConnector::new());
        let connectors = DeviceClass::ALL
            .into_iter()
            .map(|class| (class, simulator.clone() as Arc<dyn Connector>))
            .collect();
        Self::with_connectors(settings, connectors, Some(simulator))
    }

    /// Creates a registry choosing the connector per class from `backend`.
    pub fn from_config(settings: Arc<dyn SettingsProvider>, backend: &BackendConfig) -> AppResult<Self> {
        let hardware: Arc<dyn Connector> = Arc::new(HardwareConnector::new());
        let simulator = Arc::new(SimulatedConnector::new());
        let mut uses_simulator = false;

        let mut connectors = HashMap::new();
        for class in DeviceClass::ALL {
            let mode = backend.mode_for(class)?;
            let connector = match mode {
                BackendMode::Hardware => hardware.clone(),
                BackendMode::Simulated => {
                    uses_simulator = true;
                    simulator.clone() as Arc<dyn Connector>
                }
            };
            debug!(%class, ?mode, "Selected connector");
            connectors.insert(class, connector);
        }

        Ok(Self::with_connectors(
            settings,
            connectors,
            uses_simulator.then_some(simulator),
        ))
    }

    fn with_connectors(
        settings: Arc<dyn SettingsProvider>,
        connectors: HashMap<DeviceClass, Arc<dyn Connector>>,
        simulator: Option<Arc<SimulatedConnector>>,
    ) -> Self {
        let slots = DeviceClass::ALL
            .into_iter()
            .map(|class| (class, Mutex::new(None)))
            .collect();
        Self {
            settings,
            connectors,
            simulator,
            slots,
        }
    }

    /// The simulated connector, if any class uses one.
    ///
    /// Attach [`SimulatedDevice`](crate::transport::SimulatedDevice)s here
    /// before the first `get_or_create` of a simulated class.
    pub fn simulator(&self) -> Option<&Arc<SimulatedConnector>> {
        self.simulator.as_ref()
    }

    /// The settings collaborator.
    pub fn settings(&self) -> &Arc<dyn SettingsProvider> {
        &self.settings
    }

    /// Kind of connector used for `class`.
    pub fn connector_kind(&self, class: DeviceClass) -> &'static str {
        self.connector(class).kind()
    }

    /// Returns the shared, open transport for `class`, building it on first
    /// use.
    ///
    /// # Errors
    ///
    /// - [`DaqError::MissingAddress`] if no address is configured
    /// - [`DaqError::UnreadableAddress`] if a record exists but cannot be read
    /// - [`DaqError::Open`] if the transport fails to open; nothing is cached
    pub fn get_or_create(&self, class: DeviceClass) -> AppResult<SharedTransport> {
        let mut slot = self.slot(class).lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let address = self
            .settings
            .try_load_channel_address(class)
            .map_err(|err| DaqError::UnreadableAddress {
                class,
                source: Box::new(err),
            })?
            .ok_or(DaqError::MissingAddress(class))?;

        let transport = Arc::new(Transport::new(address, self.connector(class)).with_label(class.as_str()));
        transport
            .open()
            .map_err(|source| DaqError::Open { class, source })?;

        info!(%class, address = %transport.address(), "Registered transport");
        *slot = Some(transport.clone());
        Ok(transport)
    }

    /// The cached transport for `class`, without constructing one.
    pub fn get(&self, class: DeviceClass) -> Option<SharedTransport> {
        self.slot(class).lock().clone()
    }

    /// Classes that currently have a cached transport.
    pub fn active_classes(&self) -> Vec<DeviceClass> {
        DeviceClass::ALL
            .into_iter()
            .filter(|class| self.slot(*class).lock().is_some())
            .collect()
    }

    /// Closes and evicts the transport for `class`. Other classes are not
    /// touched. Does nothing if no transport is cached.
    ///
    /// Outstanding handles stay valid but refer to a closed transport.
    pub fn close(&self, class: DeviceClass) {
        let evicted = self.slot(class).lock().take();
        if let Some(transport) = evicted {
            transport.close();
            info!(%class, "Evicted transport");
        }
    }

    /// Closes every cached transport.
    pub fn close_all(&self) {
        for class in DeviceClass::ALL {
            self.close(class);
        }
    }

    /// Persists a new address for `class` and evicts the cached transport so
    /// the next `get_or_create` opens the new address.
    pub fn update_address(&self, class: DeviceClass, address: &ChannelAddress) -> AppResult<()> {
        address.validate().map_err(DaqError::Configuration)?;
        self.settings.save_channel_address(class, address)?;
        if self.get(class).is_some() {
            warn!(%class, %address, "Address changed; closing cached transport");
            self.close(class);
        }
        Ok(())
    }

    fn slot(&self, class: DeviceClass) -> &Mutex<Option<SharedTransport>> {
        // Slots are created for every class at construction.
        &self.slots[&class]
    }

    fn connector(&self, class: DeviceClass) -> Arc<dyn Connector> {
        self.connectors[&class].clone()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("active", &self.active_classes())
            .field("simulated", &self.simulator.is_some())
            .finish()
    }
}
