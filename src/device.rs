//! Virtual device state: permission, lifecycle state, and the owned buffer.
//!
//! A [`VirtualDevice`] is the unit of discovery: an identity, a declared
//! access permission, and a fixed-capacity zero-initialized byte buffer it
//! exclusively owns. The buffer sits behind a per-device mutex held for the
//! duration of a single read/write/seek call; the registry map has its own
//! lock and is never held across device I/O.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::OpenMode;
use crate::registry::DeviceId;

/// Declared access mode a device was configured with, checked once at open
/// time and never re-evaluated per read/write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "wo")]
    WriteOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl Permission {
    /// Permission truth table: `ro` admits read-only opens, `wo` write-only
    /// opens, `rw` any combination.
    pub fn allows(self, requested: OpenMode) -> bool {
        match self {
            Permission::ReadOnly => requested == OpenMode::Read,
            Permission::WriteOnly => requested == OpenMode::Write,
            Permission::ReadWrite => true,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a device.
///
/// `Uninitialized -> Active` happens only inside a successful create step;
/// `Active -> Destroyed` only through a registry-driven destroy. No further
/// operations are legal against a destroyed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Uninitialized,
    Active,
    Destroyed,
}

/// Fixed-capacity, zero-initialized byte storage owned by exactly one device.
/// Capacity never changes after creation.
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    /// Allocate a zero-filled buffer of exactly `capacity` bytes.
    pub fn zeroed(capacity: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|e| Error::Allocation(format!("buffer of {} bytes: {}", capacity, e)))?;
        bytes.resize(capacity, 0);
        Ok(Self { bytes })
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Copy out of the buffer starting at `offset`, clamped to capacity.
    /// Returns the number of bytes copied; 0 at or past the end.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> usize {
        let end = self.bytes.len();
        if offset >= end {
            return 0;
        }
        let n = dst.len().min(end - offset);
        dst[..n].copy_from_slice(&self.bytes[offset..offset + n]);
        n
    }

    /// Copy into the buffer starting at `offset`, clamped to capacity.
    /// Returns the number of bytes copied; 0 when there is no room.
    pub fn copy_in(&mut self, offset: usize, src: &[u8]) -> usize {
        let end = self.bytes.len();
        if offset >= end {
            return 0;
        }
        let n = src.len().min(end - offset);
        self.bytes[offset..offset + n].copy_from_slice(&src[..n]);
        n
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }
}

/// A virtual device: identity, permission, and the buffer it owns.
///
/// Devices are owned by the registry; handles only borrow them. The mutable
/// part (state + buffer) lives behind one mutex so a detach in flight cannot
/// race an admitted read or write.
pub struct VirtualDevice {
    id: DeviceId,
    serial: String,
    permission: Permission,
    capacity: usize,
    body: Mutex<DeviceBody>,
}

pub(crate) struct DeviceBody {
    pub(crate) state: DeviceState,
    pub(crate) buffer: Buffer,
}

impl VirtualDevice {
    /// Build a device in `Uninitialized` state with its buffer allocated.
    pub(crate) fn new(
        id: DeviceId,
        serial: &str,
        permission: Permission,
        capacity: usize,
    ) -> Result<Self> {
        let buffer = Buffer::zeroed(capacity)?;
        Ok(Self {
            id,
            serial: serial.to_string(),
            permission,
            capacity,
            body: Mutex::new(DeviceBody {
                state: DeviceState::Uninitialized,
                buffer,
            }),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Opaque identity label; never used for logic.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> DeviceState {
        self.body.lock().unwrap().state
    }

    /// Transition `Uninitialized -> Active` as the final step of a
    /// successful create.
    pub(crate) fn activate(&self) {
        let mut body = self.body.lock().unwrap();
        debug_assert_eq!(body.state, DeviceState::Uninitialized);
        body.state = DeviceState::Active;
    }

    /// Mark the device destroyed and release its buffer. Takes the device
    /// lock first, so read/write calls already admitted finish before the
    /// buffer goes away.
    pub(crate) fn destroy(&self) {
        let mut body = self.body.lock().unwrap();
        body.state = DeviceState::Destroyed;
        body.buffer = Buffer::default();
        debug!("device {} destroyed, buffer released", self.id);
    }

    /// Lock the device body, failing when the device is no longer active.
    /// Handles that outlive a detach observe `NoSuchDevice` here.
    pub(crate) fn lock_active(&self) -> Result<MutexGuard<'_, DeviceBody>> {
        let body = self.body.lock().unwrap();
        if body.state != DeviceState::Active {
            return Err(Error::NoSuchDevice(self.id));
        }
        Ok(body)
    }
}
