//! The effect algebra: how concurrent and sequential effects fold together.
//!
//! Every cell is parameterized by an [EffectTrait], which decides what happens
//! when two effects come from one control path in order (`sequentially`) and
//! what happens when they come from independent tasks at the same virtual
//! instant (`concurrently`). All of the kernel's determinism rests on the
//! algebra's laws:
//!
//! - `sequentially` is associative, with `empty` as identity;
//! - `concurrently` is associative **and commutative**, with `empty` as identity.
//!
//! A non-commutative `concurrently` is not a type error - it is a silent
//! nondeterminism bug, only catchable by the law tests at the bottom of this
//! module. Run them against any trait you write.

use std::collections::BTreeSet;
use std::marker::PhantomData;

pub trait EffectTrait: Send + Sync + 'static {
    type Effect: Clone + Send + Sync + 'static;

    /// The do-nothing effect; identity for both combinators.
    fn empty(&self) -> Self::Effect;

    /// Combines two effects from the same control path, `first` before `second`.
    fn sequentially(&self, first: &Self::Effect, second: &Self::Effect) -> Self::Effect;

    /// Combines two effects from independent tasks at the same instant.
    /// Must be commutative: the scheduler gives no ordering guarantee here.
    fn concurrently(&self, left: &Self::Effect, right: &Self::Effect) -> Self::Effect;
}

/// Additive effects over `f64`. Both combinators are plain addition, which is
/// commutative, so concurrent deposits and withdrawals just sum.
pub struct SumEffectTrait;

impl EffectTrait for SumEffectTrait {
    type Effect = f64;

    fn empty(&self) -> f64 {
        0.0
    }

    fn sequentially(&self, first: &f64, second: &f64) -> f64 {
        first + second
    }

    fn concurrently(&self, left: &f64, right: &f64) -> f64 {
        left + right
    }
}

/// The effect of zero or more writes to a last-write register.
///
/// `writes` is the set of candidate final values. An empty set is the identity
/// effect; a singleton is an uncontested write; anything larger is a conflict,
/// which the register surfaces as observable state rather than resolving by
/// fiat. The set is scoped to one combined effect: a later uncontested write
/// replaces it entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterEffect<T: Ord> {
    pub writes: BTreeSet<T>,
}

impl<T: Ord> RegisterEffect<T> {
    pub fn set(value: T) -> Self {
        RegisterEffect {
            writes: BTreeSet::from([value]),
        }
    }

    pub fn none() -> Self {
        RegisterEffect {
            writes: BTreeSet::new(),
        }
    }
}

/// Algebra for [RegisterEffect]: later writes win outright, concurrent writes
/// union into a conflict set. `BTreeSet` union is associative and commutative,
/// so the laws hold for any `Ord` payload.
pub struct RegisterEffectTrait<T>(PhantomData<fn() -> T>);

impl<T> Default for RegisterEffectTrait<T> {
    fn default() -> Self {
        RegisterEffectTrait(PhantomData)
    }
}

impl<T: Clone + Ord + Send + Sync + 'static> EffectTrait for RegisterEffectTrait<T> {
    type Effect = RegisterEffect<T>;

    fn empty(&self) -> RegisterEffect<T> {
        RegisterEffect::none()
    }

    fn sequentially(&self, first: &RegisterEffect<T>, second: &RegisterEffect<T>) -> RegisterEffect<T> {
        if second.writes.is_empty() {
            first.clone()
        } else {
            second.clone()
        }
    }

    fn concurrently(&self, left: &RegisterEffect<T>, right: &RegisterEffect<T>) -> RegisterEffect<T> {
        RegisterEffect {
            writes: left.writes.union(&right.writes).cloned().collect(),
        }
    }
}
