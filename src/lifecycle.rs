//! Lifecycle coordinator: atomic batch bring-up and dynamic attach/detach.
//!
//! Bring-up is all-or-nothing: every resource acquired before a failure is
//! released again in strict reverse order. An explicit rollback stack keeps
//! the unwind of an early failure to "pop and release everything acquired
//! so far". Detach destroys the device synchronously under its own lock;
//! nothing waits on a deferred release callback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::board::DeviceConfig;
use crate::device::{DeviceState, Permission, VirtualDevice};
use crate::error::{Error, Result};
use crate::handle::{AccessHandle, OpenMode};
use crate::publish::{external_name, DevicePublisher};
use crate::registry::{DeviceId, DeviceRegistry};

/// One row of [`LifecycleCoordinator::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub serial: String,
    pub capacity: usize,
    pub permission: Permission,
    pub state: DeviceState,
}

/// Undo actions recorded while a multi-step operation acquires resources,
/// replayed in reverse when a later step fails.
enum UndoStep {
    ReleaseRange,
    ReleaseNumber(DeviceId),
    Remove(DeviceId),
    Unpublish(DeviceId),
}

/// Performs atomic multi-device bring-up, idempotent tear-down, and dynamic
/// attach/detach of single devices.
pub struct LifecycleCoordinator {
    registry: Arc<DeviceRegistry>,
    publisher: Arc<dyn DevicePublisher>,
    /// Device models this coordinator probes; empty accepts any model.
    supported_models: Vec<String>,
}

impl LifecycleCoordinator {
    pub fn new(registry: Arc<DeviceRegistry>, publisher: Arc<dyn DevicePublisher>) -> Self {
        Self {
            registry,
            publisher,
            supported_models: Vec::new(),
        }
    }

    /// Restrict attach/bring-up to configs carrying one of these models.
    pub fn with_supported_models(mut self, models: impl IntoIterator<Item = String>) -> Self {
        self.supported_models = models.into_iter().collect();
        self
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Reserve the device-number range for dynamic attach without creating
    /// any devices. `initialize_all` reserves its own range instead.
    pub fn reserve_numbers(&self, base: u32, span: u32) -> Result<()> {
        self.registry.reserve_range(base, span)
    }

    /// Static bring-up: materialize the whole batch or nothing.
    ///
    /// The number range is reserved once for the batch; each config then
    /// allocates a buffer, constructs an active device, and publishes it.
    /// Any failure unwinds everything acquired so far, range included, and
    /// surfaces as the first encountered cause. A retry afterwards starts
    /// from a clean slate.
    pub fn initialize_all(&self, base: u32, configs: &[DeviceConfig]) -> Result<()> {
        if configs.is_empty() {
            return Err(Error::Config(
                "bring-up requires at least one device config".into(),
            ));
        }

        info!("bring-up: {} devices at base {}", configs.len(), base);

        let mut undo: Vec<UndoStep> = Vec::new();
        if let Err(e) = self.bring_up(base, configs, &mut undo) {
            warn!("bring-up failed, unwinding {} steps: {}", undo.len(), e);
            self.unwind(undo);
            return Err(e);
        }

        info!(
            "bring-up complete: {} devices active",
            self.registry.total_active()
        );
        Ok(())
    }

    fn bring_up(
        &self,
        base: u32,
        configs: &[DeviceConfig],
        undo: &mut Vec<UndoStep>,
    ) -> Result<()> {
        self.registry.reserve_range(base, configs.len() as u32)?;
        undo.push(UndoStep::ReleaseRange);

        for config in configs {
            self.create_one(config, undo)?;
        }
        Ok(())
    }

    /// One probe step. Pushes an undo entry after each acquired resource so
    /// a later failure releases them in reverse.
    fn create_one(&self, config: &DeviceConfig, undo: &mut Vec<UndoStep>) -> Result<DeviceId> {
        self.check_model(config)?;

        let id = self.registry.allocate_number()?;
        undo.push(UndoStep::ReleaseNumber(id));

        let device = Arc::new(VirtualDevice::new(
            id,
            &config.serial,
            config.permission,
            config.capacity,
        )?);
        device.activate();
        self.registry.insert(Arc::clone(&device));
        undo.push(UndoStep::Remove(id));

        let name = external_name(self.registry.index_of(id));
        self.publisher.publish(id, &name)?;
        undo.push(UndoStep::Unpublish(id));

        info!(
            "probed device {}: name={} serial={} capacity={} perm={}",
            id, name, config.serial, config.capacity, config.permission
        );
        Ok(id)
    }

    fn check_model(&self, config: &DeviceConfig) -> Result<()> {
        if self.supported_models.is_empty() {
            return Ok(());
        }
        match &config.model {
            Some(m) if self.supported_models.contains(m) => Ok(()),
            Some(m) => Err(Error::Config(format!(
                "no driver match for device model '{}'",
                m
            ))),
            None => Err(Error::Config(
                "device config has no model to match against".into(),
            )),
        }
    }

    /// Dynamic attach: one device appearing at runtime. The number range
    /// must already be reserved via [`reserve_numbers`](Self::reserve_numbers).
    ///
    /// If publication fails after the device was created, the partial device
    /// is destroyed before the error is returned; no active device is left
    /// behind without a discoverable name.
    pub fn attach(&self, config: &DeviceConfig) -> Result<DeviceId> {
        let mut undo = Vec::new();
        match self.create_one(config, &mut undo) {
            Ok(id) => {
                info!("attached device {}", id);
                Ok(id)
            }
            Err(e) => {
                warn!("attach failed, unwinding {} steps: {}", undo.len(), e);
                self.unwind(undo);
                Err(e)
            }
        }
    }

    /// Dynamic detach: destroys the device synchronously.
    ///
    /// The device leaves the registry map first, so new opens already fail,
    /// then its own lock is taken to tear down the buffer, so reads and
    /// writes admitted earlier finish before the memory goes away. Unknown
    /// or already-detached ids fail with `NoSuchDevice`.
    pub fn detach(&self, id: DeviceId) -> Result<()> {
        let device = self.registry.remove(id).ok_or(Error::NoSuchDevice(id))?;
        device.destroy();
        self.publisher.unpublish(id);
        self.registry.release_number(id);
        info!("detached device {}", id);
        Ok(())
    }

    /// Tear down every device and release the number range, in reverse id
    /// order. Idempotent: a second call is a no-op.
    pub fn teardown_all(&self) {
        for device in self.registry.snapshot().iter().rev() {
            let id = device.id();
            if self.registry.remove(id).is_some() {
                device.destroy();
                self.publisher.unpublish(id);
                self.registry.release_number(id);
            }
        }
        self.registry.release_range();
        info!("teardown complete");
    }

    /// Open a device by identifier.
    pub fn open(&self, id: DeviceId, mode: OpenMode) -> Result<AccessHandle> {
        self.registry.open(id, mode)
    }

    /// Administrative enumeration: one row per active device, ordered by id.
    pub fn list(&self) -> Vec<DeviceInfo> {
        self.registry
            .snapshot()
            .iter()
            .map(|d| DeviceInfo {
                id: d.id(),
                name: self
                    .publisher
                    .name_of(d.id())
                    .unwrap_or_else(|| external_name(self.registry.index_of(d.id()))),
                serial: d.serial().to_string(),
                capacity: d.capacity(),
                permission: d.permission(),
                state: d.state(),
            })
            .collect()
    }

    fn unwind(&self, undo: Vec<UndoStep>) {
        for step in undo.into_iter().rev() {
            match step {
                UndoStep::Unpublish(id) => self.publisher.unpublish(id),
                UndoStep::Remove(id) => {
                    if let Some(device) = self.registry.remove(id) {
                        device.destroy();
                    }
                }
                UndoStep::ReleaseNumber(id) => self.registry.release_number(id),
                UndoStep::ReleaseRange => self.registry.release_range(),
            }
        }
    }
}
