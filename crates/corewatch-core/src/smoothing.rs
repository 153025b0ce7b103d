//! Exponential approach with snap.
//!
//! Displayed values creep toward their target by `alpha` of the remaining
//! gap each tick. A gap wider than `snap_threshold` is closed at once so a
//! real step change (reconnect, game launch) does not crawl across the screen.

/// Default fraction of the gap closed per tick.
pub const DEFAULT_ALPHA: f64 = 0.2;
/// Default gap (in metric units) above which the value snaps to target.
pub const DEFAULT_SNAP_THRESHOLD: f64 = 20.0;

/// Smoothing parameters. The caller owns and threads the current value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoother {
    pub alpha: f64,
    pub snap_threshold: f64,
}

impl Default for Smoother {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            snap_threshold: DEFAULT_SNAP_THRESHOLD,
        }
    }
}

impl Smoother {
    pub fn apply(&self, current: f64, target: f64) -> f64 {
        smooth(current, target, self.alpha, self.snap_threshold)
    }
}

/// Move `current` toward `target`.
pub fn smooth(current: f64, target: f64, alpha: f64, snap_threshold: f64) -> f64 {
    if (target - current).abs() > snap_threshold {
        return target;
    }
    current + alpha * (target - current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_gap_moves_strictly_between() {
        let s = Smoother::default();
        for (current, target) in [(50.0, 60.0), (60.0, 50.0), (0.0, 20.0), (33.3, 13.3)] {
            let next = s.apply(current, target);
            let (lo, hi) = if current < target {
                (current, target)
            } else {
                (target, current)
            };
            assert!(next > lo && next < hi, "{current} -> {target} gave {next}");
        }
    }

    #[test]
    fn test_small_gap_uses_alpha() {
        let next = Smoother::default().apply(50.0, 60.0);
        assert!((next - 52.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_gap_snaps() {
        let s = Smoother::default();
        assert_eq!(s.apply(0.0, 20.5), 20.5);
        assert_eq!(s.apply(90.0, 10.0), 10.0);
    }

    #[test]
    fn test_equal_values_are_fixed_point() {
        assert_eq!(Smoother::default().apply(42.0, 42.0), 42.0);
    }

    #[test]
    fn test_converges_without_reaching() {
        let s = Smoother::default();
        let mut v = 0.0;
        for _ in 0..50 {
            v = s.apply(v, 15.0);
            assert!(v < 15.0);
        }
        assert!(15.0 - v < 1e-3);
    }

    #[test]
    fn test_custom_parameters() {
        assert_eq!(smooth(0.0, 10.0, 0.5, 5.0), 10.0);
        assert_eq!(smooth(0.0, 4.0, 0.5, 5.0), 2.0);
    }
}
