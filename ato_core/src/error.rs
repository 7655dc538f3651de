use thiserror::Error;

use crate::temperature::SensorRole;

/// Why the pump was taken out of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DisableReason {
    /// Operator command over the telemetry bus or CLI.
    Command,
    /// Too many stuck fills inside the rolling window.
    RepeatedStuck,
    /// Daily activation ceiling reached (runaway or false-low float switch).
    DailyCeiling,
    /// The float switch could not be read while the pump was running.
    FloatSwitchFault,
    /// The relay rejected a write.
    RelayFault,
}

#[derive(Debug, Error, Clone)]
pub enum AtoError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("invalid calibration input: {0}")]
    InvalidCalibrationInput(String),
    #[error("pump stuck: filling for {elapsed_ms} ms (limit {limit_ms} ms)")]
    StuckPump { elapsed_ms: u64, limit_ms: u64 },
    #[error("telemetry unreachable: {0}")]
    TelemetryUnreachable(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
}

impl AtoError {
    pub(crate) fn sensor(role: SensorRole, detail: impl std::fmt::Display) -> Self {
        Self::SensorUnavailable(format!("{}: {detail}", role.key()))
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing float switch")]
    MissingFloatSwitch,
    #[error("missing pump relay")]
    MissingRelay,
    #[error("missing sensor bus")]
    MissingSensorBus,
    #[error("missing telemetry sink")]
    MissingTelemetry,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
