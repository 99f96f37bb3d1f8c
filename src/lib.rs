//! bufdev: host-managed virtual device subsystem
//!
//! A registry of independent, fixed-capacity, byte-addressable in-memory
//! devices, each guarded by a declared access permission and exposed through
//! file-like handles (open/read/write/seek/close), with a dynamic
//! attach/detach lifecycle for devices that appear and disappear at runtime.
//!
//! # Key pieces
//!
//! - **Permission enforcement**: checked exactly once, at open time
//! - **Cursor-bounded I/O**: reads clamp at end-of-buffer; a write with no
//!   room left fails instead of silently writing nothing
//! - **Transactional lifecycle**: batch bring-up is all-or-nothing, and a
//!   failed step releases everything acquired so far in reverse order
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bufdev::board::BoardSpec;
//! use bufdev::lifecycle::LifecycleCoordinator;
//! use bufdev::publish::MemoryPublisher;
//! use bufdev::registry::DeviceRegistry;
//! use bufdev::{OpenMode, Whence};
//!
//! fn main() -> bufdev::Result<()> {
//!     let registry = Arc::new(DeviceRegistry::new());
//!     let coordinator =
//!         LifecycleCoordinator::new(Arc::clone(&registry), Arc::new(MemoryPublisher::new()));
//!
//!     let board = BoardSpec::default();
//!     coordinator.initialize_all(board.base, &board.devices)?;
//!
//!     let first = coordinator.list()[0].id;
//!     let mut handle = coordinator.open(first, OpenMode::ReadWrite)?;
//!     handle.write(b"hello")?;
//!     handle.seek(0, Whence::Start)?;
//!
//!     let mut out = [0u8; 5];
//!     handle.read(&mut out)?;
//!     assert_eq!(&out, b"hello");
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod device;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod publish;
pub mod registry;

// Re-exports for convenience
pub use error::{Error, Result};
pub use handle::{AccessHandle, OpenMode, Whence};
pub use registry::{DeviceId, DeviceRegistry};

// Prelude for common imports
pub mod prelude {
    pub use crate::board::{BoardSpec, DeviceConfig};
    pub use crate::device::{DeviceState, Permission};
    pub use crate::error::{Error, Result};
    pub use crate::handle::{AccessHandle, OpenMode, Whence};
    pub use crate::lifecycle::{DeviceInfo, LifecycleCoordinator};
    pub use crate::publish::{DevicePublisher, MemoryPublisher};
    pub use crate::registry::{DeviceId, DeviceRegistry};
}
