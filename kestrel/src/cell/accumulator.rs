//! A numeric cell that accumulates additive deltas.

use crate::cell::CellType;
use crate::effect::SumEffectTrait;

/// Holds an `f64` total. Effects are deltas; concurrent deltas sum, so any
/// interleaving of deposits and withdrawals at one instant lands on the same
/// total.
pub struct AccumulatorCell {
    pub initial: f64,
}

impl AccumulatorCell {
    pub fn new(initial: f64) -> Self {
        AccumulatorCell { initial }
    }
}

impl CellType for AccumulatorCell {
    type State = f64;
    type Trait = SumEffectTrait;

    fn effect_trait(&self) -> SumEffectTrait {
        SumEffectTrait
    }

    fn initial(&self) -> f64 {
        self.initial
    }

    fn apply(&self, state: &mut f64, effect: &f64) {
        *state += effect;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate() {
        let cell = AccumulatorCell::new(4.0);
        let mut state = cell.initial();
        cell.apply(&mut state, &-1.0);
        cell.apply(&mut state, &-0.5);
        assert_eq!(2.5, state);
    }
}
