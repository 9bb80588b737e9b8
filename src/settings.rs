//! Settings collaborators for the device registry.
//!
//! - [`TomlSettings`]: channel records under `[devices.<class>]` in a TOML
//!   file (normally the application config file). Saving rewrites only the
//!   `devices` table; every other table is preserved.
//! - [`MemorySettings`]: in-memory map for tests and simulations.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::address::{ChannelAddress, ChannelRecord};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::registry::{DeviceClass, SettingsProvider};

const DEVICES_TABLE: &str = "devices";

/// File-backed settings provider.
#[derive(Debug)]
pub struct TomlSettings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlSettings {
    /// Settings stored in the TOML file at `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> AppResult<toml::Table> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.parse::<toml::Table>()?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn read_record(&self, class: DeviceClass) -> AppResult<Option<ChannelRecord>> {
        let document = self.read_document()?;
        let Some(entry) = document
            .get(DEVICES_TABLE)
            .and_then(|devices| devices.get(class.as_str()))
        else {
            return Ok(None);
        };
        Ok(Some(ChannelRecord::deserialize(entry.clone())?))
    }
}

impl SettingsProvider for TomlSettings {
    fn load_channel_address(&self, class: DeviceClass) -> Option<ChannelAddress> {
        self.try_load_channel_address(class).unwrap_or_else(|err| {
            warn!(%class, path = %self.path.display(), error = %err, "Unreadable channel record");
            None
        })
    }

    fn try_load_channel_address(&self, class: DeviceClass) -> AppResult<Option<ChannelAddress>> {
        self.read_record(class)?
            .map(|record| ChannelAddress::from_record(&record))
            .transpose()
    }

    fn save_channel_address(&self, class: DeviceClass, address: &ChannelAddress) -> AppResult<()> {
        let _guard = self.write_lock.lock();
        let mut document = self.read_document()?;

        let devices = document
            .entry(DEVICES_TABLE)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if !devices.is_table() {
            *devices = toml::Value::Table(toml::Table::new());
        }
        if let toml::Value::Table(devices) = devices {
            devices.insert(
                class.as_str().to_string(),
                toml::Value::try_from(address.to_record())?,
            );
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, toml::to_string_pretty(&document)?)?;
        fs::rename(&staging, &self.path)?;

        debug!(%class, %address, path = %self.path.display(), "Saved channel address");
        Ok(())
    }
}

/// In-memory settings provider.
#[derive(Debug, Default)]
pub struct MemorySettings {
    addresses: RwLock<HashMap<DeviceClass, ChannelAddress>>,
}

impl MemorySettings {
    /// Empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider seeded from the `[devices]` table of a loaded config.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let settings = Self::new();
        for (class, address) in config.device_addresses()? {
            settings.insert(class, address);
        }
        Ok(settings)
    }

    /// Sets the address for `class`.
    pub fn insert(&self, class: DeviceClass, address: ChannelAddress) {
        self.addresses.write().insert(class, address);
    }
}

impl SettingsProvider for MemorySettings {
    fn load_channel_address(&self, class: DeviceClass) -> Option<ChannelAddress> {
        self.addresses.read().get(&class).cloned()
    }

    fn save_channel_address(&self, class: DeviceClass, address: &ChannelAddress) -> AppResult<()> {
        self.insert(class, address.clone());
        Ok(())
    }
}
