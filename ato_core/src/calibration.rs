//! Dosage calibration: learns liters-per-activation from refill events.
//!
//! Each refill yields one sample `volume / activations`. Samples are blended
//! into the running estimate with a learning rate that shrinks as confidence
//! grows, so early refills move the estimate a lot and later ones refine it.
//! A sample far from the current estimate halves confidence instead of
//! raising it, which lets the estimate re-learn after a pump or plumbing
//! change.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CalibrationCfg;
use crate::error::AtoError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefillRecord {
    pub timestamp: DateTime<Utc>,
    pub volume: f64,
    pub activations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub activations_since_refill: u64,
    pub last_refill_amount: Option<f64>,
    pub refill_history: VecDeque<RefillRecord>,
    pub calibrated_liters_per_activation: f64,
    pub confidence: f64,
    pub last_calibration_date: Option<DateTime<Utc>>,
}

impl CalibrationState {
    /// Fresh state carrying the configured seed estimate and zero confidence.
    pub fn seeded(liters_per_activation: f64) -> Self {
        Self {
            activations_since_refill: 0,
            last_refill_amount: None,
            refill_history: VecDeque::new(),
            calibrated_liters_per_activation: liters_per_activation,
            confidence: 0.0,
            last_calibration_date: None,
        }
    }

    fn check(&self) -> Result<(), AtoError> {
        let rate = self.calibrated_liters_per_activation;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(AtoError::State(format!(
                "calibrated liters per activation must be > 0 (got {rate})"
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AtoError::State(format!(
                "calibration confidence must be in [0, 1] (got {})",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// What one accepted refill did to the estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefillOutcome {
    pub sample: f64,
    pub previous_estimate: f64,
    pub estimate: f64,
    pub confidence: f64,
    /// The sample disagreed strongly and confidence was halved.
    pub disagreement: bool,
}

#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    cfg: CalibrationCfg,
    state: CalibrationState,
}

impl CalibrationEngine {
    pub fn new(cfg: CalibrationCfg) -> Self {
        let state = CalibrationState::seeded(cfg.seed_liters_per_activation);
        Self { cfg, state }
    }

    /// Rebuild from persisted state. Invalid state is rejected rather than
    /// silently replaced by the seed.
    pub fn restore(cfg: CalibrationCfg, state: CalibrationState) -> Result<Self, AtoError> {
        state.check()?;
        Ok(Self { cfg, state })
    }

    /// Swap in persisted state, keeping the current one if it is invalid.
    pub fn replace_state(&mut self, state: CalibrationState) -> Result<(), AtoError> {
        state.check()?;
        self.state = state;
        Ok(())
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn liters_per_activation(&self) -> f64 {
        self.state.calibrated_liters_per_activation
    }

    pub fn confidence(&self) -> f64 {
        self.state.confidence
    }

    pub fn activations_since_refill(&self) -> u64 {
        self.state.activations_since_refill
    }

    /// Estimates made before any refill are advisory only.
    pub fn is_advisory(&self) -> bool {
        self.state.confidence <= 0.0
    }

    pub fn record_activation(&mut self) {
        self.state.activations_since_refill = self.state.activations_since_refill.saturating_add(1);
    }

    /// Fold in a refill of `volume` liters that followed `activations` fills.
    pub fn record_refill(
        &mut self,
        volume: f64,
        activations: u64,
        now: DateTime<Utc>,
    ) -> Result<RefillOutcome, AtoError> {
        if activations == 0 {
            tracing::warn!(volume, "refill with zero activations ignored");
            return Err(AtoError::InvalidCalibrationInput(
                "refill recorded with zero activations".into(),
            ));
        }
        if !volume.is_finite() || volume <= 0.0 {
            tracing::warn!(volume, activations, "refill volume rejected");
            return Err(AtoError::InvalidCalibrationInput(format!(
                "refill volume must be a positive number of liters (got {volume})"
            )));
        }

        let sample = volume / activations as f64;
        let previous = self.state.calibrated_liters_per_activation;
        let mut confidence = self.state.confidence;

        let disagreement =
            confidence > 0.0 && (sample - previous).abs() / previous > self.cfg.disagreement_ratio;
        if disagreement {
            confidence /= 2.0;
        }
        let alpha = (1.0 - confidence).max(self.cfg.min_learning_rate).min(1.0);
        let estimate = (1.0 - alpha) * previous + alpha * sample;
        if !disagreement {
            confidence = (confidence + self.cfg.confidence_step).min(1.0);
        }

        self.state.calibrated_liters_per_activation = estimate;
        self.state.confidence = confidence;
        self.state.last_refill_amount = Some(volume);
        self.state.last_calibration_date = Some(now);
        self.state.activations_since_refill = 0;
        self.state.refill_history.push_back(RefillRecord {
            timestamp: now,
            volume,
            activations,
        });
        while self.state.refill_history.len() > self.cfg.max_refill_history.max(1) {
            self.state.refill_history.pop_front();
        }

        tracing::info!(
            volume,
            activations,
            sample,
            estimate,
            confidence,
            disagreement,
            "calibration updated"
        );
        Ok(RefillOutcome {
            sample,
            previous_estimate: previous,
            estimate,
            confidence,
            disagreement,
        })
    }

    /// Operator refill confirmation: uses the activations counted since the
    /// previous refill.
    pub fn confirm_refill(&mut self, volume: f64, now: DateTime<Utc>) -> Result<RefillOutcome, AtoError> {
        self.record_refill(volume, self.state.activations_since_refill, now)
    }

    /// Liters left after `activations` fills from a full `capacity`, floored at 0.
    pub fn estimate_reservoir_level(&self, capacity: f64, activations: u64) -> f64 {
        (capacity - activations as f64 * self.state.calibrated_liters_per_activation).max(0.0)
    }

    /// Reservoir estimate from the configured capacity and own counter.
    pub fn reservoir_level(&self) -> f64 {
        self.estimate_reservoir_level(self.cfg.reservoir_capacity_l, self.state.activations_since_refill)
    }
}
