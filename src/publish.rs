//! Naming/publication collaborator: makes a device externally addressable.
//!
//! The publisher is the node-creation service: given a device number,
//! create (and later remove) an externally visible name. The
//! publish call is fallible and participates in the bring-up rollback
//! contract; unpublish must tolerate ids that were never published.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::DeviceId;

/// External name for the device at `index` within the reserved range.
pub fn external_name(index: u32) -> String {
    format!("bufdev-{}", index)
}

/// Naming service a lifecycle coordinator publishes devices through.
pub trait DevicePublisher: Send + Sync {
    /// Create an externally addressable name for the device.
    fn publish(&self, id: DeviceId, name: &str) -> Result<()>;

    /// Remove the device's name. Must tolerate unknown ids.
    fn unpublish(&self, id: DeviceId);

    /// Name the device is currently published under, if any.
    fn name_of(&self, id: DeviceId) -> Option<String>;
}

/// In-memory publisher: a plain name table standing in for whatever naming
/// transport hosts the subsystem.
#[derive(Default)]
pub struct MemoryPublisher {
    names: Mutex<HashMap<DeviceId, String>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently published names.
    pub fn published(&self) -> usize {
        self.names.lock().unwrap().len()
    }
}

impl DevicePublisher for MemoryPublisher {
    fn publish(&self, id: DeviceId, name: &str) -> Result<()> {
        let mut names = self.names.lock().unwrap();
        if names.contains_key(&id) {
            return Err(Error::Publication(format!(
                "device {} already published",
                id
            )));
        }
        if names.values().any(|n| n == name) {
            return Err(Error::Publication(format!(
                "name '{}' already exists",
                name
            )));
        }
        names.insert(id, name.to_string());
        debug!("published device {} as '{}'", id, name);
        Ok(())
    }

    fn unpublish(&self, id: DeviceId) {
        if let Some(name) = self.names.lock().unwrap().remove(&id) {
            debug!("unpublished device {} ('{}')", id, name);
        }
    }

    fn name_of(&self, id: DeviceId) -> Option<String> {
        self.names.lock().unwrap().get(&id).cloned()
    }
}
