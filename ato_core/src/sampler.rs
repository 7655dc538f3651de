//! Background temperature sampling.
//!
//! One-wire conversions take most of a second per probe. The sampler owns
//! the bus on its own thread, reads every assigned probe once per interval,
//! and hands the batch over a bounded channel so the control tick never
//! waits on the bus.
//!
//! Each `TemperatureSampler` spawns exactly one thread, which is shut down
//! and joined when the sampler is dropped.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ato_traits::SensorBus;
use ato_traits::clock::Clock;

use crate::error::AtoError;
use crate::hw_error::map_hw_error;
use crate::temperature::{SensorRole, parse_w1_slave};
use crate::util::millis;

/// Sleep slice while waiting out an interval; bounds shutdown latency.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// One pass over every assigned probe.
pub type ProbeBatch = Vec<(SensorRole, Result<f64, AtoError>)>;

pub struct TemperatureSampler {
    rx: xch::Receiver<ProbeBatch>,
    last_ok: Arc<AtomicU64>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl TemperatureSampler {
    pub fn spawn<B, C>(mut bus: B, probes: Vec<(SensorRole, String)>, interval: Duration, clock: C) -> Self
    where
        B: SensorBus + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            'outer: loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("temperature sampler received shutdown signal");
                    break;
                }

                let batch: ProbeBatch = probes
                    .iter()
                    .map(|(role, id)| {
                        let r = bus
                            .read_raw(id)
                            .map_err(|e| map_hw_error(&*e))
                            .and_then(|text| parse_w1_slave(&text));
                        (*role, r)
                    })
                    .collect();
                if batch.iter().any(|(_, r)| r.is_ok()) {
                    last_ok_clone.store(clock.ms_since(epoch), Ordering::Relaxed);
                }
                match tx.try_send(batch) {
                    Ok(()) => {}
                    // Consumer has not taken the previous batch; skip this one.
                    Err(xch::TrySendError::Full(_)) => {
                        tracing::trace!("temperature batch dropped; consumer busy");
                    }
                    Err(xch::TrySendError::Disconnected(_)) => {
                        tracing::debug!("temperature sampler consumer disconnected, exiting thread");
                        break;
                    }
                }

                let mut waited = Duration::ZERO;
                while waited < interval {
                    if shutdown_clone.load(Ordering::Relaxed) {
                        break 'outer;
                    }
                    let slice = SLEEP_SLICE.min(interval - waited);
                    clock.sleep(slice);
                    waited += slice;
                }
            }
            tracing::trace!("temperature sampler exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Most recent batch not yet consumed, if any.
    pub fn latest(&self) -> Option<ProbeBatch> {
        self.rx.try_iter().last()
    }

    /// Milliseconds since the last batch with at least one good reading
    /// (or since spawn, before the first one).
    pub fn stalled_for(&self, now: Instant) -> u64 {
        let now_ms = millis(now.saturating_duration_since(self.epoch));
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }
}

impl Drop for TemperatureSampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("temperature sampler joined"),
                Err(e) => tracing::warn!(?e, "temperature sampler panicked during shutdown"),
            }
        }
    }
}

impl core::fmt::Debug for TemperatureSampler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TemperatureSampler")
            .field("running", &self.join_handle.is_some())
            .finish_non_exhaustive()
    }
}
