//! Hardware adapters for the top-off controller.
//!
//! - Simulated sump (float switch + relay sharing one water model) and a
//!   simulated one-wire bus, used by default and in tests.
//! - Sysfs one-wire bus (`w1`), always available on Linux hosts.
//! - rppal GPIO float switch and relay behind the `hardware` feature.

pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;
pub mod w1;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ato_traits::{BoxError, FloatSwitch, PumpRelay, SensorBus};

/// Water model shared by the simulated float switch and relay.
#[derive(Debug, Clone)]
pub struct SumpModel {
    pub level_mm: f64,
    /// Float switch threshold; below it the switch reports low.
    pub float_mark_mm: f64,
    /// Level lost per float-switch poll.
    pub evaporation_mm: f64,
    /// Level gained per float-switch poll while the pump runs.
    pub fill_mm: f64,
    pub pump_on: bool,
    /// Number of relay writes observed.
    pub relay_writes: u64,
}

impl Default for SumpModel {
    fn default() -> Self {
        Self {
            level_mm: 100.0,
            float_mark_mm: 99.0,
            evaporation_mm: 0.05,
            fill_mm: 0.5,
            pump_on: false,
            relay_writes: 0,
        }
    }
}

/// Handle to a simulated sump; clone it to build the switch and relay halves.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSump {
    model: Arc<Mutex<SumpModel>>,
}

impl SimulatedSump {
    pub fn new(model: SumpModel) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }

    pub fn float_switch(&self) -> SimulatedFloatSwitch {
        SimulatedFloatSwitch { sump: self.clone() }
    }

    pub fn relay(&self) -> SimulatedRelay {
        SimulatedRelay { sump: self.clone() }
    }

    /// Copy of the current model state.
    pub fn snapshot(&self) -> SumpModel {
        self.model.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn set_level_mm(&self, level_mm: f64) {
        if let Ok(mut m) = self.model.lock() {
            m.level_mm = level_mm;
        }
    }
}

pub struct SimulatedFloatSwitch {
    sump: SimulatedSump,
}

impl FloatSwitch for SimulatedFloatSwitch {
    fn is_low(&mut self) -> Result<bool, BoxError> {
        let mut m = self
            .sump
            .model
            .lock()
            .map_err(|_| error::HwError::Gpio("simulated sump poisoned".into()))?;
        m.level_mm -= m.evaporation_mm;
        if m.pump_on {
            m.level_mm += m.fill_mm;
        }
        Ok(m.level_mm < m.float_mark_mm)
    }
}

pub struct SimulatedRelay {
    sump: SimulatedSump,
}

impl PumpRelay for SimulatedRelay {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError> {
        let mut m = self
            .sump
            .model
            .lock()
            .map_err(|_| error::HwError::Gpio("simulated sump poisoned".into()))?;
        // Active-low relay: HIGH releases it.
        m.pump_on = !high;
        m.relay_writes += 1;
        tracing::trace!(pump_on = m.pump_on, "simulated relay write");
        Ok(())
    }
}

/// Simulated one-wire bus producing `w1_slave` text for fixed probes.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensorBus {
    probes: BTreeMap<String, Option<f64>>,
}

impl SimulatedSensorBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Three probes at plausible reef temperatures.
    pub fn reef_defaults() -> Self {
        let mut bus = Self::new();
        bus.set_probe("28-00000a1b2c3d", Some(25.5));
        bus.set_probe("28-00000a1b2c3e", Some(25.8));
        bus.set_probe("28-00000a1b2c3f", Some(22.1));
        bus
    }

    /// Set a probe temperature; `None` makes reads fail as if unplugged.
    pub fn set_probe(&mut self, id: &str, celsius: Option<f64>) {
        self.probes.insert(id.to_string(), celsius);
    }
}

/// Render a reading the way the kernel `w1_therm` driver does.
pub fn format_w1_slave(celsius: f64) -> String {
    let milli = (celsius * 1000.0).round() as i64;
    format!(
        "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t={milli}\n"
    )
}

impl SensorBus for SimulatedSensorBus {
    fn discover(&mut self) -> Result<Vec<String>, BoxError> {
        Ok(self.probes.keys().cloned().collect())
    }

    fn read_raw(&mut self, device_id: &str) -> Result<String, BoxError> {
        match self.probes.get(device_id) {
            Some(Some(c)) => Ok(format_w1_slave(*c)),
            Some(None) | None => Err(Box::new(error::HwError::DeviceNotPresent(
                device_id.to_string(),
            ))),
        }
    }
}
