//! Seams between the top-off controller and the outside world.
//!
//! Every trait returns `Box<dyn Error + Send + Sync>` on failure so adapters
//! can surface whatever error type they own; `ato_core` maps these into its
//! typed error enum at the boundary.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Float switch mounted in the sump.
pub trait FloatSwitch {
    /// `true` when the water line has dropped below the switch.
    fn is_low(&mut self) -> Result<bool, BoxError>;
}

/// Relay that powers the top-off pump.
///
/// Takes the raw logical pin level. Relay boards used for top-off are
/// active-low: HIGH releases the relay (pump off), LOW energizes it.
pub trait PumpRelay {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError>;
}

/// One-wire temperature probes (DS18B20 class).
pub trait SensorBus {
    /// Device identifiers currently present on the bus.
    fn discover(&mut self) -> Result<Vec<String>, BoxError>;
    /// Raw `w1_slave` text for a device.
    fn read_raw(&mut self, device_id: &str) -> Result<String, BoxError>;
}

/// Outbound side of the telemetry bus.
pub trait TelemetrySink {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BoxError>;
}

impl<T: FloatSwitch + ?Sized> FloatSwitch for Box<T> {
    fn is_low(&mut self) -> Result<bool, BoxError> {
        (**self).is_low()
    }
}

impl<T: PumpRelay + ?Sized> PumpRelay for Box<T> {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError> {
        (**self).set_level(high)
    }
}

impl<T: SensorBus + ?Sized> SensorBus for Box<T> {
    fn discover(&mut self) -> Result<Vec<String>, BoxError> {
        (**self).discover()
    }
    fn read_raw(&mut self, device_id: &str) -> Result<String, BoxError> {
        (**self).read_raw(device_id)
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BoxError> {
        (**self).publish(topic, payload)
    }
}
