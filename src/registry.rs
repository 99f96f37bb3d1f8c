//! Device registry: owns every virtual device and the device-number range.
//!
//! The registry is an explicitly constructed value with no global state;
//! tests build as many independent registries as they like. The device map
//! sits behind a `RwLock` held only for attach/detach/enumerate; per-device
//! I/O takes the device's own lock and never the registry's.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::VirtualDevice;
use crate::error::{Error, Result};
use crate::handle::{AccessHandle, OpenMode};

/// Opaque key distinguishing one virtual device from another within a
/// registry. The numeric value is `base + index` within the reserved range.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contiguous block of device numbers reserved for one registry.
struct NumberRange {
    base: u32,
    in_use: Vec<bool>,
}

/// Owns the set of virtual devices and maps external identifiers to them.
///
/// Invariant: every id present was successfully created by the lifecycle
/// coordinator and has not been destroyed.
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    devices: HashMap<DeviceId, Arc<VirtualDevice>>,
    range: Option<NumberRange>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                devices: HashMap::new(),
                range: None,
            }),
        }
    }

    /// Reserve a contiguous device-number range. A registry holds at most
    /// one range at a time; bring-up releases it again when it unwinds.
    pub fn reserve_range(&self, base: u32, count: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.range.is_some() {
            return Err(Error::Allocation(
                "device-number range already reserved".into(),
            ));
        }
        if count == 0 {
            return Err(Error::Allocation(
                "cannot reserve an empty device-number range".into(),
            ));
        }
        inner.range = Some(NumberRange {
            base,
            in_use: vec![false; count as usize],
        });
        debug!("reserved device numbers {}..{}", base, base + count);
        Ok(())
    }

    /// Release the reserved range. Idempotent; expected to run only after
    /// all devices are gone.
    pub fn release_range(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.range.take().is_some() && !inner.devices.is_empty() {
            warn!(
                "released device-number range with {} devices still registered",
                inner.devices.len()
            );
        }
    }

    /// Allocate the lowest free number in the reserved range. Exhaustion is
    /// an `Allocation` failure, fatal only to the operation that hit it.
    pub fn allocate_number(&self) -> Result<DeviceId> {
        let mut inner = self.inner.write().unwrap();
        let range = inner
            .range
            .as_mut()
            .ok_or_else(|| Error::Allocation("no device-number range reserved".into()))?;

        match range.in_use.iter().position(|used| !used) {
            Some(slot) => {
                range.in_use[slot] = true;
                Ok(DeviceId(range.base + slot as u32))
            }
            None => Err(Error::Allocation(format!(
                "device-number range exhausted ({} numbers)",
                range.in_use.len()
            ))),
        }
    }

    /// Return a number to the range. Tolerates ids outside the range.
    pub fn release_number(&self, id: DeviceId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(range) = inner.range.as_mut() {
            let slot = id.0.wrapping_sub(range.base) as usize;
            if let Some(used) = range.in_use.get_mut(slot) {
                *used = false;
            }
        }
    }

    /// Index of `id` within the reserved range (0-based), used to derive the
    /// external device name.
    pub fn index_of(&self, id: DeviceId) -> u32 {
        let inner = self.inner.read().unwrap();
        match &inner.range {
            Some(range) => id.0.saturating_sub(range.base),
            None => id.0,
        }
    }

    /// Insert a freshly activated device. The id must have come from
    /// `allocate_number`.
    pub(crate) fn insert(&self, device: Arc<VirtualDevice>) {
        let mut inner = self.inner.write().unwrap();
        let prev = inner.devices.insert(device.id(), device);
        debug_assert!(prev.is_none(), "device id inserted twice");
    }

    /// Remove a device from the map. New opens fail from this point on even
    /// while the device itself is still being torn down.
    pub(crate) fn remove(&self, id: DeviceId) -> Option<Arc<VirtualDevice>> {
        self.inner.write().unwrap().devices.remove(&id)
    }

    /// Resolve an identifier to its device.
    pub fn get(&self, id: DeviceId) -> Result<Arc<VirtualDevice>> {
        self.inner
            .read()
            .unwrap()
            .devices
            .get(&id)
            .cloned()
            .ok_or(Error::NoSuchDevice(id))
    }

    /// Number of active devices.
    pub fn total_active(&self) -> usize {
        self.inner.read().unwrap().devices.len()
    }

    /// All devices, ordered by id.
    pub(crate) fn snapshot(&self) -> Vec<Arc<VirtualDevice>> {
        let inner = self.inner.read().unwrap();
        let mut devices: Vec<_> = inner.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.id());
        devices
    }

    /// Open a device by identifier: resolve the id, enforce the permission
    /// truth table exactly once, and hand back a handle with cursor 0. No
    /// buffer access happens at open time.
    pub fn open(&self, id: DeviceId, mode: OpenMode) -> Result<AccessHandle> {
        let device = self.get(id)?;
        // A device mid-detach reads as gone.
        device.lock_active().map(drop)?;

        if !device.permission().allows(mode) {
            warn!(
                "open failed: device={} permission={} requested={}",
                id,
                device.permission(),
                mode
            );
            return Err(Error::PermissionDenied {
                permission: device.permission(),
                requested: mode,
            });
        }

        debug!("open ok: device={} mode={}", id, mode);
        Ok(AccessHandle::new(device, mode))
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Permission;

    fn registry_with_device(permission: Permission) -> (DeviceRegistry, DeviceId) {
        let registry = DeviceRegistry::new();
        registry.reserve_range(0, 4).unwrap();
        let id = registry.allocate_number().unwrap();
        let device = Arc::new(VirtualDevice::new(id, "SN-TEST", permission, 64).unwrap());
        device.activate();
        registry.insert(device);
        (registry, id)
    }

    #[test]
    fn open_enforces_permission_at_open_time() {
        let (registry, id) = registry_with_device(Permission::ReadOnly);
        assert!(registry.open(id, OpenMode::Read).is_ok());
        assert!(matches!(
            registry.open(id, OpenMode::Write),
            Err(Error::PermissionDenied { .. })
        ));
        assert!(matches!(
            registry.open(id, OpenMode::ReadWrite),
            Err(Error::PermissionDenied { .. })
        ));

        let (registry, id) = registry_with_device(Permission::WriteOnly);
        assert!(registry.open(id, OpenMode::Write).is_ok());
        assert!(matches!(
            registry.open(id, OpenMode::Read),
            Err(Error::PermissionDenied { .. })
        ));

        let (registry, id) = registry_with_device(Permission::ReadWrite);
        assert!(registry.open(id, OpenMode::Read).is_ok());
        assert!(registry.open(id, OpenMode::Write).is_ok());
        assert!(registry.open(id, OpenMode::ReadWrite).is_ok());
    }

    #[test]
    fn open_unknown_id_is_no_such_device() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.open(DeviceId(42), OpenMode::Read),
            Err(Error::NoSuchDevice(DeviceId(42)))
        ));
    }

    #[test]
    fn number_allocation_is_lowest_free_and_reusable() {
        let registry = DeviceRegistry::new();
        registry.reserve_range(240, 2).unwrap();

        let a = registry.allocate_number().unwrap();
        let b = registry.allocate_number().unwrap();
        assert_eq!((a, b), (DeviceId(240), DeviceId(241)));
        assert!(matches!(
            registry.allocate_number(),
            Err(Error::Allocation(_))
        ));

        registry.release_number(a);
        assert_eq!(registry.allocate_number().unwrap(), DeviceId(240));
    }

    #[test]
    fn range_can_only_be_reserved_once() {
        let registry = DeviceRegistry::new();
        registry.reserve_range(0, 4).unwrap();
        assert!(matches!(
            registry.reserve_range(8, 4),
            Err(Error::Allocation(_))
        ));

        registry.release_range();
        registry.reserve_range(8, 4).unwrap();
    }

    #[test]
    fn allocation_without_a_range_fails() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.allocate_number(),
            Err(Error::Allocation(_))
        ));
    }

    #[test]
    fn index_of_subtracts_the_base() {
        let registry = DeviceRegistry::new();
        registry.reserve_range(240, 4).unwrap();
        assert_eq!(registry.index_of(DeviceId(242)), 2);
    }
}
