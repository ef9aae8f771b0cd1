//! Cells: the units of simulation state.
//!
//! A cell pairs an initial state with an [EffectTrait](crate::effect::EffectTrait)
//! and a rule for applying combined effects to that state. Cells never hold
//! mutable state during a simulation; the kernel folds a cell's state on demand
//! from the effect history, so any point in any branch of the timeline can be
//! queried without snapshots.

use crate::effect::EffectTrait;
use serde::{Deserialize, Serialize};

pub mod accumulator;
pub mod register;

pub use accumulator::AccumulatorCell;
pub use register::{RealRegisterCell, RegisterCell, RegisterState};

/// Identifies one cell within a mission model. Allocated by the model builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub(crate) usize);

impl CellId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The effect type a cell's algebra operates on.
pub type EffectOf<C> = <<C as CellType>::Trait as EffectTrait>::Effect;

/// Defines one kind of simulation state: its initial value, its effect
/// algebra, and how a combined effect transforms the state.
pub trait CellType: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;
    type Trait: EffectTrait;

    fn effect_trait(&self) -> Self::Trait;

    fn initial(&self) -> Self::State;

    /// Applies one combined effect. The kernel has already folded concurrent
    /// effects with the algebra before calling this.
    fn apply(&self, state: &mut Self::State, effect: &EffectOf<Self>);
}

/// A typed reference to a registered cell. Cheap to copy and safe to stash in
/// model structs; the phantom keeps reads and emits statically typed.
pub struct CellHandle<C: CellType> {
    pub(crate) id: CellId,
    _marker: std::marker::PhantomData<fn() -> C>,
}

impl<C: CellType> CellHandle<C> {
    pub(crate) fn new(id: CellId) -> Self {
        CellHandle {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }
}

impl<C: CellType> Copy for CellHandle<C> {}

impl<C: CellType> Clone for CellHandle<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: CellType> std::fmt::Debug for CellHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CellHandle({})", self.id.0)
    }
}
