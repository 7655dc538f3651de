//! Topic layout, inbound command parsing, and best-effort publishing.
//!
//! Publishing never fails the caller: a sink error is logged, counted, and
//! dropped so a dead broker cannot stall the control tick.

use serde::Serialize;

use ato_traits::TelemetrySink;

use crate::error::AtoError;
use crate::season::Season;
use crate::temperature::SensorRole;

/// Topic names under a fixed prefix.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn temp(&self, role: SensorRole) -> String {
        format!("{}/temp/{}", self.prefix, role.key())
    }
    pub fn temp_calibration(&self, role: SensorRole) -> String {
        format!("{}/temp/{}_calibration", self.prefix, role.key())
    }
    pub fn temp_stats(&self, role: SensorRole) -> String {
        format!("{}/temp/{}/stats", self.prefix, role.key())
    }
    pub fn differential(&self) -> String {
        format!("{}/temp/differential", self.prefix)
    }
    pub fn pump_state(&self) -> String {
        format!("{}/pump/state", self.prefix)
    }
    pub fn reservoir_level(&self) -> String {
        format!("{}/reservoir/level", self.prefix)
    }
    pub fn confidence(&self) -> String {
        format!("{}/calibration/confidence", self.prefix)
    }
    pub fn liters_per_activation(&self) -> String {
        format!("{}/calibration/liters_per_activation", self.prefix)
    }
    pub fn seasonal(&self, season: Season) -> String {
        format!("{}/seasonal/{}", self.prefix, season.key())
    }
    pub fn alert(&self) -> String {
        format!("{}/alert", self.prefix)
    }
}

/// Operator command received from the bus or the CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ManualTrigger,
    Disable,
    Enable,
    SetOffset { role: SensorRole, offset: f64 },
    Refill { liters: f64 },
}

fn parse_number(what: &str, payload: &str) -> Result<f64, AtoError> {
    let v: f64 = payload
        .trim()
        .parse()
        .map_err(|_| AtoError::InvalidCalibrationInput(format!("{what} payload {payload:?} is not a number")))?;
    if !v.is_finite() {
        return Err(AtoError::InvalidCalibrationInput(format!("{what} must be finite")));
    }
    Ok(v)
}

impl Command {
    /// Parse a message on `{prefix}/cmd/...`. Topics outside the command
    /// namespace yield `Ok(None)`.
    pub fn parse(prefix: &str, topic: &str, payload: &str) -> Result<Option<Self>, AtoError> {
        let Some(rest) = topic
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix("/cmd/"))
        else {
            return Ok(None);
        };
        let cmd = match rest {
            "pump" => Command::ManualTrigger,
            "disable" => Command::Disable,
            "enable" => Command::Enable,
            "refill" => Command::Refill {
                liters: parse_number("refill", payload)?,
            },
            other => {
                let role = other
                    .strip_prefix("temp/")
                    .and_then(|r| r.strip_suffix("_offset"))
                    .and_then(SensorRole::from_key)
                    .ok_or_else(|| AtoError::State(format!("unknown command topic {topic}")))?;
                Command::SetOffset {
                    role,
                    offset: parse_number("offset", payload)?,
                }
            }
        };
        Ok(Some(cmd))
    }
}

/// Wraps a sink; failures are logged and swallowed.
pub struct Publisher<T: TelemetrySink> {
    sink: T,
    topics: Topics,
    failures: u64,
}

impl<T: TelemetrySink> Publisher<T> {
    pub fn new(sink: T, topics: Topics) -> Self {
        Self {
            sink,
            topics,
            failures: 0,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publishes that failed since construction.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn publish(&mut self, topic: &str, payload: &str) -> bool {
        match self.sink.publish(topic, payload) {
            Ok(()) => true,
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                let err = AtoError::TelemetryUnreachable(e.to_string());
                tracing::warn!(topic, error = %err, failures = self.failures, "publish dropped");
                false
            }
        }
    }

    pub fn publish_number(&mut self, topic: &str, value: f64) -> bool {
        self.publish(topic, &value.to_string())
    }

    pub fn publish_json<S: Serialize>(&mut self, topic: &str, value: &S) -> bool {
        match serde_json::to_string(value) {
            Ok(body) => self.publish(topic, &body),
            Err(e) => {
                tracing::warn!(topic, error = %e, "telemetry payload not serializable");
                false
            }
        }
    }
}
