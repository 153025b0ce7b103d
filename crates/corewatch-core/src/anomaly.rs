//! "Core killer" detection: one core saturated while the rest idle.

/// Busiest-core usage that must be exceeded.
pub const MAX_CORE_THRESHOLD: f64 = 80.0;
/// Rolling imbalance that must be exceeded.
pub const IMBALANCE_THRESHOLD: f64 = 50.0;

/// True only on the tick where the condition first holds for an unlatched session.
pub fn evaluate(max_core_usage: f64, imbalance: f64, already_latched: bool) -> bool {
    !already_latched && max_core_usage > MAX_CORE_THRESHOLD && imbalance > IMBALANCE_THRESHOLD
}

/// Latched detector. Once fired it stays fired until [`AnomalyDetector::reset`].
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    latched: bool,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per latch period.
    pub fn observe(&mut self, max_core_usage: f64, imbalance: f64) -> bool {
        let fired = evaluate(max_core_usage, imbalance, self.latched);
        if fired {
            self.latched = true;
            log::warn!(
                "core killer detected: busiest core {max_core_usage:.1}%, imbalance {imbalance:.1}%"
            );
        }
        fired
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn reset(&mut self) {
        self.latched = false;
    }
}
