//! Persistent device registry contract.
//!
//! The registry owns the durable list of remembered `(name, address)` pairs,
//! most-recently-used first, and the user settings the coordinator consults.
//! It is safe for concurrent reads; writes are only issued from the
//! foreground context.
//!
//! Implementations notify the foreground of changes keyed by [`SettingKey`]
//! through whatever channel the host wires up.

use std::fmt;

use crate::domain::device::{normalize_address, RememberedDevice};

/// Name of a registry setting whose change the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// The user's master switch for braille display support.
    FeatureEnabled,
    /// Whether remembered devices are connected automatically.
    AutoConnect,
    /// The remembered device list itself.
    RememberedDevices,
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingKey::FeatureEnabled => f.write_str("feature_enabled"),
            SettingKey::AutoConnect => f.write_str("auto_connect"),
            SettingKey::RememberedDevices => f.write_str("remembered_devices"),
        }
    }
}

/// Durable store of remembered devices and user settings.
pub trait DeviceRegistry: Send + Sync {
    /// Returns remembered devices, most-recently-used first.
    fn remembered(&self) -> Vec<RememberedDevice>;

    /// Inserts `device` at the front, removing any entry with the same address.
    fn add_remembered(&self, device: RememberedDevice);

    /// Removes the entry with `address`, if present.
    fn delete_remembered(&self, address: &str);

    fn is_auto_connect_enabled(&self) -> bool;

    fn is_feature_enabled_by_user(&self) -> bool;

    /// Returns `true` if `address` is in the remembered list.
    fn is_remembered(&self, address: &str) -> bool {
        let address = normalize_address(address);
        self.remembered().iter().any(|d| d.address == address)
    }
}

/// Applies the insert-or-promote rule to an ordered list.
///
/// Shared by registry implementations so they agree on ordering.
pub fn promote(list: &mut Vec<RememberedDevice>, device: RememberedDevice) {
    list.retain(|d| d.address != device.address);
    list.insert(0, device);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Registry {}

        impl DeviceRegistry for Registry {
            fn remembered(&self) -> Vec<RememberedDevice>;
            fn add_remembered(&self, device: RememberedDevice);
            fn delete_remembered(&self, address: &str);
            fn is_auto_connect_enabled(&self) -> bool;
            fn is_feature_enabled_by_user(&self) -> bool;
        }
    }

    #[test]
    fn test_promote_inserts_new_device_first() {
        // Arrange
        let mut list = vec![RememberedDevice::new(Some("Old".into()), "11:11")];

        // Act
        promote(&mut list, RememberedDevice::new(Some("New".into()), "22:22"));

        // Assert
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].address, "22:22");
    }

    #[test]
    fn test_promote_moves_existing_address_to_front_with_new_name() {
        let mut list = vec![
            RememberedDevice::new(Some("A".into()), "11:11"),
            RememberedDevice::new(Some("B".into()), "22:22"),
        ];

        promote(&mut list, RememberedDevice::new(Some("B renamed".into()), "22:22"));

        assert_eq!(list.len(), 2, "dedup by address must not grow the list");
        assert_eq!(list[0].name.as_deref(), Some("B renamed"));
        assert_eq!(list[1].address, "11:11");
    }

    #[test]
    fn test_is_remembered_default_normalises_the_address() {
        let mut registry = MockRegistry::new();
        registry
            .expect_remembered()
            .returning(|| vec![RememberedDevice::new(None, "AA:BB")]);

        assert!(registry.is_remembered("aa:bb"));
        assert!(!registry.is_remembered("aa:bc"));
    }
}
