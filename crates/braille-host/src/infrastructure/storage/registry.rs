//! Device registry implementations.
//!
//! [`TomlDeviceRegistry`] keeps the remembered device list and the user
//! settings in a TOML file and rewrites it on every change:
//!
//! ```toml
//! feature_enabled = true
//! auto_connect = true
//!
//! [[remembered]]
//! name = "Focus 40 Blue"
//! address = "00:11:22:33:44:55"
//! ```
//!
//! Changes are announced to the foreground as
//! [`LifecycleEvent::SettingChanged`] when a notifier is attached, the same
//! way a platform settings store would report them.
//!
//! [`MemoryRegistry`] has the same semantics without a file or notifier.

use std::path::{Path, PathBuf};

use braille_core::domain::device::normalize_address;
use braille_core::protocol::registry::promote;
use braille_core::{DeviceRegistry, RememberedDevice, SettingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::connectioneer::LifecycleEvent;
use crate::application::foreground::Foreground;
use crate::infrastructure::storage::config::{AppConfig, ConfigError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error accessing registry at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default = "default_true")]
    feature_enabled: bool,
    #[serde(default = "default_true")]
    auto_connect: bool,
    #[serde(default)]
    remembered: Vec<RememberedDevice>,
}

fn default_true() -> bool {
    true
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            feature_enabled: true,
            auto_connect: true,
            remembered: Vec::new(),
        }
    }
}

impl RegistryState {
    fn add(&mut self, device: RememberedDevice) {
        let device = RememberedDevice::new(device.name, &device.address);
        promote(&mut self.remembered, device);
    }

    /// Returns `true` if an entry was removed.
    fn delete(&mut self, address: &str) -> bool {
        let address = normalize_address(address);
        let before = self.remembered.len();
        self.remembered.retain(|d| d.address != address);
        self.remembered.len() != before
    }
}

// ── TomlDeviceRegistry ────────────────────────────────────────────────────────

pub struct TomlDeviceRegistry {
    path: PathBuf,
    state: RwLock<RegistryState>,
    notifier: Option<Foreground>,
}

impl TomlDeviceRegistry {
    /// Loads the registry at `path`; a missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] for read failures other than "not
    /// found" and [`RegistryError::Parse`] for malformed TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(source) => return Err(RegistryError::Io { path, source }),
        };
        debug!("registry loaded from {}", path.display());
        Ok(Self {
            path,
            state: RwLock::new(state),
            notifier: None,
        })
    }

    /// Opens the registry file named by `config`.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open); also fails if the file location cannot be
    /// resolved.
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        Self::open(config.registry_path()?)
    }

    /// Posts a [`LifecycleEvent::SettingChanged`] to `foreground` after
    /// every change.
    pub fn with_notifier(mut self, foreground: Foreground) -> Self {
        self.notifier = Some(foreground);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Returns the error from writing the file; the in-memory value is
    /// updated regardless.
    pub fn set_feature_enabled(&self, enabled: bool) -> Result<(), RegistryError> {
        self.update(SettingKey::FeatureEnabled, |s| {
            let changed = s.feature_enabled != enabled;
            s.feature_enabled = enabled;
            changed
        })
    }

    /// # Errors
    ///
    /// See [`set_feature_enabled`](Self::set_feature_enabled).
    pub fn set_auto_connect(&self, enabled: bool) -> Result<(), RegistryError> {
        self.update(SettingKey::AutoConnect, |s| {
            let changed = s.auto_connect != enabled;
            s.auto_connect = enabled;
            changed
        })
    }

    /// Applies `change` under the write lock, then persists and notifies if
    /// it reported a change.
    fn update(
        &self,
        key: SettingKey,
        change: impl FnOnce(&mut RegistryState) -> bool,
    ) -> Result<(), RegistryError> {
        let snapshot = {
            let mut state = self.state.write();
            if !change(&mut state) {
                return Ok(());
            }
            state.clone()
        };
        let saved = self.save(&snapshot);
        if let Some(foreground) = &self.notifier {
            foreground.post(LifecycleEvent::SettingChanged(key));
        }
        saved
    }

    fn save(&self, state: &RegistryState) -> Result<(), RegistryError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| RegistryError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(state)?;
        std::fs::write(&self.path, content).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn update_logged(&self, change: impl FnOnce(&mut RegistryState) -> bool) {
        if let Err(e) = self.update(SettingKey::RememberedDevices, change) {
            warn!("could not persist device registry: {}", e);
        }
    }
}

impl DeviceRegistry for TomlDeviceRegistry {
    fn remembered(&self) -> Vec<RememberedDevice> {
        self.state.read().remembered.clone()
    }

    fn add_remembered(&self, device: RememberedDevice) {
        self.update_logged(|s| {
            let before = s.remembered.clone();
            s.add(device);
            s.remembered != before
        });
    }

    fn delete_remembered(&self, address: &str) {
        self.update_logged(|s| s.delete(address));
    }

    fn is_auto_connect_enabled(&self) -> bool {
        self.state.read().auto_connect
    }

    fn is_feature_enabled_by_user(&self) -> bool {
        self.state.read().feature_enabled
    }
}

// ── MemoryRegistry ────────────────────────────────────────────────────────────

/// Registry that lives only in memory.  Feature and auto-connect start on.
#[derive(Default)]
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feature_enabled(&self, enabled: bool) {
        self.state.write().feature_enabled = enabled;
    }

    pub fn set_auto_connect(&self, enabled: bool) {
        self.state.write().auto_connect = enabled;
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn remembered(&self) -> Vec<RememberedDevice> {
        self.state.read().remembered.clone()
    }

    fn add_remembered(&self, device: RememberedDevice) {
        self.state.write().add(device);
    }

    fn delete_remembered(&self, address: &str) {
        self.state.write().delete(address);
    }

    fn is_auto_connect_enabled(&self) -> bool {
        self.state.read().auto_connect
    }

    fn is_feature_enabled_by_user(&self) -> bool {
        self.state.read().feature_enabled
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
