//! Gain automation timeline.
//!
//! A [`GainHandle`] is a scheduled parameter: callers pin values at
//! future instants and ramp linearly between them, and the engine (or a
//! test) evaluates the curve at any time. Crossfades are two handles
//! ramping in opposite directions over the same window.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct GainPoint {
    time: f64,
    value: f32,
    /// A ramp point interpolates linearly from the previous point;
    /// a set point jumps at its instant.
    ramp: bool,
}

/// A scheduled gain parameter.
pub struct GainHandle {
    initial: f32,
    points: Mutex<Vec<GainPoint>>,
}

impl GainHandle {
    /// Create a handle holding `initial` until the first scheduled point.
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            points: Mutex::new(Vec::new()),
        }
    }

    /// Pin the gain to `value` at `time`.
    pub fn set_value_at(&self, time: f64, value: f32) {
        self.insert(GainPoint {
            time,
            value,
            ramp: false,
        });
    }

    /// Ramp linearly from the previous point to `value`, arriving at `time`.
    pub fn linear_ramp_to(&self, time: f64, value: f32) {
        self.insert(GainPoint {
            time,
            value,
            ramp: true,
        });
    }

    fn insert(&self, point: GainPoint) {
        let mut points = self.points.lock();
        // keep sorted by time; equal times keep insertion order
        let idx = points.partition_point(|p| p.time <= point.time);
        points.insert(idx, point);
    }

    /// Evaluate the automation curve at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let points = self.points.lock();
        let mut prev_time = f64::NEG_INFINITY;
        let mut prev_value = self.initial;

        for point in points.iter() {
            if point.time <= time {
                prev_time = point.time;
                prev_value = point.value;
                continue;
            }
            if point.ramp && prev_time.is_finite() && point.time > prev_time {
                let frac = ((time - prev_time) / (point.time - prev_time)) as f32;
                return prev_value + (point.value - prev_value) * frac;
            }
            // next point is a jump (or an unanchored ramp): hold
            return prev_value;
        }

        prev_value
    }

    /// Drop automation points strictly before `time`, keeping the most
    /// recent one as the new anchor. Bounds timeline growth on an engine
    /// that loops forever.
    pub fn compact_before(&self, time: f64) {
        let mut points = self.points.lock();
        let keep_from = points.partition_point(|p| p.time < time).saturating_sub(1);
        points.drain(..keep_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_holds_initial_until_first_point() {
        let gain = GainHandle::new(0.5);
        assert_eq!(gain.value_at(10.0), 0.5);
        gain.set_value_at(20.0, 1.0);
        assert_eq!(gain.value_at(19.9), 0.5);
        assert_eq!(gain.value_at(20.0), 1.0);
    }

    #[test]
    fn test_linear_ramp() {
        let gain = GainHandle::new(0.0);
        gain.set_value_at(1.0, 0.0);
        gain.linear_ramp_to(2.0, 1.0);

        assert_relative_eq!(gain.value_at(1.0), 0.0);
        assert_relative_eq!(gain.value_at(1.25), 0.25);
        assert_relative_eq!(gain.value_at(1.5), 0.5);
        assert_relative_eq!(gain.value_at(2.0), 1.0);
        assert_relative_eq!(gain.value_at(5.0), 1.0);
    }

    #[test]
    fn test_crossfade_pair_sums_to_one() {
        let incoming = GainHandle::new(0.0);
        let outgoing = GainHandle::new(0.0);

        incoming.set_value_at(1.0, 0.0);
        incoming.linear_ramp_to(1.1, 1.0);
        outgoing.set_value_at(1.0, 1.0);
        outgoing.linear_ramp_to(1.1, 0.0);

        let mut t = 1.0;
        while t <= 1.1 {
            let sum = incoming.value_at(t) + outgoing.value_at(t);
            assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
            t += 0.01;
        }
    }

    #[test]
    fn test_instant_snap() {
        let gain = GainHandle::new(0.0);
        gain.set_value_at(3.0, 1.0);
        assert_eq!(gain.value_at(2.999), 0.0);
        assert_eq!(gain.value_at(3.0), 1.0);
    }

    #[test]
    fn test_compact_keeps_anchor() {
        let gain = GainHandle::new(0.0);
        gain.set_value_at(1.0, 0.25);
        gain.set_value_at(2.0, 0.5);
        gain.set_value_at(3.0, 0.75);
        gain.compact_before(2.5);
        assert_relative_eq!(gain.value_at(2.5), 0.5);
        assert_relative_eq!(gain.value_at(3.5), 0.75);
    }
}
