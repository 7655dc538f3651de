//! Test and helper doubles for the hardware and telemetry seams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ato_traits::{BoxError, FloatSwitch, PumpRelay, TelemetrySink};

fn poisoned() -> BoxError {
    Box::new(std::io::Error::other("mock state poisoned"))
}

/// Collects every published message. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryTelemetry {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.messages.lock() {
            m.clear();
        }
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BoxError> {
        self.messages
            .lock()
            .map_err(|_| poisoned())?
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn publish(&mut self, _topic: &str, _payload: &str) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Broker that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreachableTelemetry;

impl TelemetrySink for UnreachableTelemetry {
    fn publish(&mut self, _topic: &str, _payload: &str) -> Result<(), BoxError> {
        Err(Box::new(std::io::Error::other("connection refused")))
    }
}

/// Float switch fed from a script. When the script runs out the last
/// level repeats. `None` entries produce a read error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFloat {
    script: Arc<Mutex<VecDeque<Option<bool>>>>,
    last: Arc<Mutex<bool>>,
}

impl ScriptedFloat {
    pub fn new(levels: impl IntoIterator<Item = Option<bool>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(levels.into_iter().collect())),
            last: Arc::new(Mutex::new(false)),
        }
    }

    /// Append more samples from another handle.
    pub fn push(&self, level: Option<bool>) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(level);
        }
    }
}

impl FloatSwitch for ScriptedFloat {
    fn is_low(&mut self) -> Result<bool, BoxError> {
        let next = self.script.lock().map_err(|_| poisoned())?.pop_front();
        let mut last = self.last.lock().map_err(|_| poisoned())?;
        match next {
            Some(Some(low)) => {
                *last = low;
                Ok(low)
            }
            Some(None) => Err(Box::new(std::io::Error::other("float switch read failed"))),
            None => Ok(*last),
        }
    }
}

/// Relay that records every level written and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct SpyRelay {
    levels: Arc<Mutex<Vec<bool>>>,
    fail: Arc<Mutex<bool>>,
}

impl SpyRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Pump is on when the last write was LOW (active-low relay).
    pub fn pump_on(&self) -> bool {
        self.levels().last().is_some_and(|high| !high)
    }

    pub fn set_failing(&self, fail: bool) {
        if let Ok(mut f) = self.fail.lock() {
            *f = fail;
        }
    }
}

impl PumpRelay for SpyRelay {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError> {
        if *self.fail.lock().map_err(|_| poisoned())? {
            return Err(Box::new(std::io::Error::other("relay driver fault")));
        }
        self.levels.lock().map_err(|_| poisoned())?.push(high);
        Ok(())
    }
}
