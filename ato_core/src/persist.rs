//! Persisted controller state (JSON, replaced atomically).
//!
//! Restoring a snapshot carries the learned rate and confidence forward;
//! a restart never falls back to seed calibration while a state file exists.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::calibration::CalibrationState;
use crate::error::AtoError;
use crate::pump::PumpLatch;
use crate::seasonal::ActivationRecord;
use crate::temperature::{SensorReading, SensorRole};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub role: SensorRole,
    pub device_id: Option<String>,
    pub offset_c: f64,
    pub history: Vec<SensorReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub calibration: CalibrationState,
    pub sensors: Vec<SensorState>,
    pub activations: Vec<ActivationRecord>,
    #[serde(default)]
    pub pump: PumpLatch,
}

impl PersistedState {
    /// State of a controller that has never run: seed calibration, no history.
    pub fn fresh(seed_liters_per_activation: f64, now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION,
            saved_at: now,
            calibration: CalibrationState::seeded(seed_liters_per_activation),
            sensors: Vec::new(),
            activations: Vec::new(),
            pump: PumpLatch::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AtoError> {
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| AtoError::State(format!("serialize state: {e}")))?;
        write_atomic(path, &body)
            .map_err(|e| AtoError::Io(format!("write {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), bytes = body.len(), "state saved");
        Ok(())
    }

    /// `Ok(None)` when no state file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, AtoError> {
        let body = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AtoError::Io(format!("read {}: {e}", path.display()))),
        };
        let state: Self = serde_json::from_slice(&body)
            .map_err(|e| AtoError::State(format!("parse {}: {e}", path.display())))?;
        if state.version != STATE_VERSION {
            return Err(AtoError::State(format!(
                "state file version {} (expected {STATE_VERSION})",
                state.version
            )));
        }
        Ok(Some(state))
    }

    pub fn sensor(&self, role: SensorRole) -> Option<&SensorState> {
        self.sensors.iter().find(|s| s.role == role)
    }
}
