//! A last-write-wins register that surfaces concurrent write conflicts.

use crate::cell::CellType;
use crate::effect::{RegisterEffect, RegisterEffectTrait};
use ordered_float::OrderedFloat;

/// A register over floats. Conflict sets need a total order, which `f64`
/// lacks, so values are wrapped in [OrderedFloat].
pub type RealRegisterCell = RegisterCell<OrderedFloat<f64>>;

/// Register state: the current value plus a conflict flag.
///
/// `conflicted` means the most recent contested instant had multiple distinct
/// writers and the value shown is the last uncontested one. A later write from
/// a single task clears the flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterState<T> {
    pub value: T,
    pub conflicted: bool,
}

pub struct RegisterCell<T> {
    pub initial: T,
}

impl<T> RegisterCell<T> {
    pub fn new(initial: T) -> Self {
        RegisterCell { initial }
    }
}

impl<T: Clone + Ord + Send + Sync + 'static> CellType for RegisterCell<T> {
    type State = RegisterState<T>;
    type Trait = RegisterEffectTrait<T>;

    fn effect_trait(&self) -> RegisterEffectTrait<T> {
        RegisterEffectTrait::default()
    }

    fn initial(&self) -> RegisterState<T> {
        RegisterState {
            value: self.initial.clone(),
            conflicted: false,
        }
    }

    fn apply(&self, state: &mut RegisterState<T>, effect: &RegisterEffect<T>) {
        match effect.writes.len() {
            0 => {}
            1 => {
                // The set is non-empty here, so first() always yields.
                if let Some(value) = effect.writes.first() {
                    state.value = value.clone();
                }
                state.conflicted = false;
            }
            _ => state.conflicted = true,
        }
    }
}
