//! Linux sysfs one-wire bus (`/sys/bus/w1/devices`).
//!
//! Reads are plain file reads of `<root>/<id>/w1_slave`; the kernel driver
//! performs the conversion, so a missing or unplugged probe fails fast with
//! an I/O error instead of blocking the caller.

use std::fs;
use std::path::{Path, PathBuf};

use ato_traits::{BoxError, SensorBus};

use crate::error::{HwError, Result};

/// Family code prefix of DS18B20 probes.
pub const DS18B20_FAMILY: &str = "28-";

/// Default sysfs mount point for one-wire devices.
pub const DEFAULT_W1_ROOT: &str = "/sys/bus/w1/devices";

#[derive(Debug, Clone)]
pub struct SysfsW1Bus {
    root: PathBuf,
}

impl Default for SysfsW1Bus {
    fn default() -> Self {
        Self::new(DEFAULT_W1_ROOT)
    }
}

impl SysfsW1Bus {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// DS18B20 device ids under the bus root, unsorted.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(HwError::BusMissing(self.root.display().to_string()));
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(DS18B20_FAMILY) {
                ids.push(name);
            }
        }
        tracing::debug!(count = ids.len(), root = %self.root.display(), "one-wire scan");
        Ok(ids)
    }

    pub fn read_slave(&self, device_id: &str) -> Result<String> {
        let path = self.root.join(device_id).join("w1_slave");
        if !path.exists() {
            return Err(HwError::DeviceNotPresent(device_id.to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }
}

impl SensorBus for SysfsW1Bus {
    fn discover(&mut self) -> std::result::Result<Vec<String>, BoxError> {
        Ok(self.list_devices()?)
    }

    fn read_raw(&mut self, device_id: &str) -> std::result::Result<String, BoxError> {
        Ok(self.read_slave(device_id)?)
    }
}
