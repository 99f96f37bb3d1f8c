//! Board definitions: which devices exist and how they are configured.
//!
//! The discovery collaborator delivers [`DeviceConfig`] values; a
//! [`BoardSpec`] is the static-table flavor of that, loadable from JSON or
//! YAML. The coordinator never originates configuration, it only consumes
//! what a board (or a dynamic discovery source) supplies.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::Permission;
use crate::error::{Error, Result};

/// Base of the default device-number range.
pub const DEFAULT_BASE: u32 = 240;

/// Configuration for one device, delivered by the discovery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Buffer capacity in bytes.
    pub capacity: usize,
    /// Declared access permission, immutable after creation.
    pub permission: Permission,
    /// Opaque identity label.
    pub serial: String,
    /// Bus-level model name, matched against the coordinator's supported
    /// models when it declares any.
    #[serde(default)]
    pub model: Option<String>,
}

/// A static device table plus the number-range base to bring it up at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSpec {
    #[serde(default = "default_base")]
    pub base: u32,
    pub devices: Vec<DeviceConfig>,
}

fn default_base() -> u32 {
    DEFAULT_BASE
}

impl Default for BoardSpec {
    /// The built-in four-device board: two read-write devices, one
    /// read-only, one write-only.
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            devices: vec![
                DeviceConfig {
                    capacity: 512,
                    permission: Permission::ReadWrite,
                    serial: "BD-1111".into(),
                    model: Some("A1X".into()),
                },
                DeviceConfig {
                    capacity: 1024,
                    permission: Permission::ReadWrite,
                    serial: "BD-2222".into(),
                    model: Some("B1X".into()),
                },
                DeviceConfig {
                    capacity: 128,
                    permission: Permission::ReadOnly,
                    serial: "BD-3333".into(),
                    model: Some("C1X".into()),
                },
                DeviceConfig {
                    capacity: 32,
                    permission: Permission::WriteOnly,
                    serial: "BD-4444".into(),
                    model: Some("D1X".into()),
                },
            ],
        }
    }
}

/// Load a board file, picking the format from the extension.
pub fn load_board(path: &Path) -> Result<BoardSpec> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let board: BoardSpec = if is_yaml {
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid YAML board {}: {}", path.display(), e)))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid JSON board {}: {}", path.display(), e)))?
    };

    validate_board(&board)?;
    Ok(board)
}

pub fn validate_board(board: &BoardSpec) -> Result<()> {
    if board.devices.is_empty() {
        return Err(Error::Config("board has no devices".into()));
    }

    for (i, dev) in board.devices.iter().enumerate() {
        if dev.capacity == 0 {
            return Err(Error::Config(format!("device {}: capacity cannot be 0", i)));
        }
        if dev.serial.trim().is_empty() {
            return Err(Error::Config(format!("device {}: serial cannot be empty", i)));
        }
    }

    let mut serials: Vec<&str> = board.devices.iter().map(|d| d.serial.as_str()).collect();
    serials.sort_unstable();
    serials.dedup();
    if serials.len() != board.devices.len() {
        return Err(Error::Config("duplicate serial numbers on board".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_board_is_valid() {
        let board = BoardSpec::default();
        validate_board(&board).unwrap();
        assert_eq!(board.devices.len(), 4);
        assert_eq!(board.base, DEFAULT_BASE);
    }

    #[test]
    fn load_yaml_board() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "base: 16\ndevices:\n  - capacity: 256\n    permission: rw\n    serial: SN-1\n  - capacity: 64\n    permission: ro\n    serial: SN-2\n    model: A1X\n"
        )
        .unwrap();

        let board = load_board(file.path()).unwrap();
        assert_eq!(board.base, 16);
        assert_eq!(board.devices.len(), 2);
        assert_eq!(board.devices[0].permission, Permission::ReadWrite);
        assert_eq!(board.devices[1].model.as_deref(), Some("A1X"));
    }

    #[test]
    fn load_json_board_with_default_base() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"devices": [{{"capacity": 32, "permission": "wo", "serial": "SN-9"}}]}}"#
        )
        .unwrap();

        let board = load_board(file.path()).unwrap();
        assert_eq!(board.base, DEFAULT_BASE);
        assert_eq!(board.devices[0].permission, Permission::WriteOnly);
        assert_eq!(board.devices[0].model, None);
    }

    #[test]
    fn validation_rejects_bad_boards() {
        let empty = BoardSpec {
            base: 0,
            devices: vec![],
        };
        assert!(matches!(validate_board(&empty), Err(Error::Config(_))));

        let mut board = BoardSpec::default();
        board.devices[0].capacity = 0;
        assert!(matches!(validate_board(&board), Err(Error::Config(_))));

        let mut board = BoardSpec::default();
        board.devices[1].serial = board.devices[0].serial.clone();
        assert!(matches!(validate_board(&board), Err(Error::Config(_))));
    }

    #[test]
    fn load_rejects_malformed_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(load_board(file.path()), Err(Error::Config(_))));
    }
}
