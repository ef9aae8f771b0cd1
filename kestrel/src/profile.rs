//! Resource profiles: piecewise descriptions of a resource over the plan.

use hifitime::Duration;
use serde::{Deserialize, Serialize};

/// Linear dynamics for a real-valued resource. The value at an offset `t`
/// into a segment is `initial + rate * t`, with `rate` per second.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealDynamics {
    pub initial: f64,
    pub rate: f64,
}

impl RealDynamics {
    pub fn constant(value: f64) -> Self {
        RealDynamics {
            initial: value,
            rate: 0.0,
        }
    }

    pub fn linear(initial: f64, rate: f64) -> Self {
        RealDynamics { initial, rate }
    }

    pub fn value_at(&self, elapsed: Duration) -> f64 {
        self.initial + self.rate * elapsed.to_seconds()
    }
}

/// One piece of a profile, valid from `start` until the next segment begins
/// (or the end of the simulation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSegment<D> {
    pub start: Duration,
    pub dynamics: D,
}

/// A resource's full history over a simulation, as non-redundant segments in
/// increasing start order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile<D> {
    pub segments: Vec<ProfileSegment<D>>,
}

impl<D: PartialEq> Profile<D> {
    pub fn new() -> Self {
        Profile {
            segments: Vec::new(),
        }
    }

    /// Appends a segment unless it repeats the current dynamics. A new value
    /// at the current segment's own start replaces it in place.
    pub fn extend(&mut self, start: Duration, dynamics: D) {
        if let Some(last) = self.segments.last_mut() {
            if last.dynamics == dynamics {
                return;
            }
            if last.start == start {
                last.dynamics = dynamics;
                return;
            }
        }
        self.segments.push(ProfileSegment { start, dynamics });
    }

    /// The dynamics in force at `at`, if the profile has begun by then.
    pub fn at(&self, at: Duration) -> Option<&D> {
        self.segments
            .iter()
            .rev()
            .find(|segment| segment.start <= at)
            .map(|segment| &segment.dynamics)
    }
}

impl<D: PartialEq> Default for Profile<D> {
    fn default() -> Self {
        Profile::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hifitime::TimeUnits;

    #[test]
    fn redundant_segments_collapse() {
        let mut profile = Profile::new();
        profile.extend(0.seconds(), RealDynamics::constant(1.0));
        profile.extend(5.seconds(), RealDynamics::constant(1.0));
        profile.extend(10.seconds(), RealDynamics::constant(2.0));
        assert_eq!(2, profile.segments.len());
        assert_eq!(Some(&RealDynamics::constant(1.0)), profile.at(7.seconds()));
        assert_eq!(Some(&RealDynamics::constant(2.0)), profile.at(10.seconds()));
    }

    #[test]
    fn linear_dynamics_evaluate() {
        let ramp = RealDynamics::linear(2.0, 0.5);
        assert_eq!(2.0, ramp.value_at(Duration::ZERO));
        assert_eq!(4.0, ramp.value_at(4.seconds()));
    }
}
