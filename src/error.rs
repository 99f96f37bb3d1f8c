//! Error types for bufdev

use thiserror::Error;

use crate::device::Permission;
use crate::handle::OpenMode;
use crate::registry::DeviceId;

/// Result type alias using bufdev Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bufdev operations
#[derive(Error, Debug)]
pub enum Error {
    /// Open mode not admitted by the device's declared permission
    #[error("permission denied: device allows {permission}, open requested {requested}")]
    PermissionDenied {
        permission: Permission,
        requested: OpenMode,
    },

    /// Identifier does not resolve to an active device
    #[error("no such device: {0}")]
    NoSuchDevice(DeviceId),

    /// Seek target outside `0..=capacity`
    #[error("seek out of range: position {position}, capacity {capacity}")]
    OutOfRange { position: i64, capacity: usize },

    /// Write with no room left, or an empty source
    #[error("no space left on device")]
    OutOfSpace,

    /// Copy across the caller boundary failed
    #[error("copy fault: {0}")]
    CopyFault(String),

    /// Buffer or device-number allocation failed
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// Naming/discovery registration failed
    #[error("publication failure: {0}")]
    Publication(String),

    /// Board or device configuration rejected
    #[error("configuration error: {0}")]
    Config(String),
}
