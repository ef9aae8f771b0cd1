//! The branching history of everything that happened in a simulation.
//!
//! Events are never applied to mutable state. They are appended to an
//! append-only tree of nodes held in a slab arena, and cell state is folded
//! on demand from the lineage of whatever [History] handle you hold. This is
//! what lets concurrent tasks at one instant each work on a private branch
//! (a "frame") with no visibility into each other, and what lets the kernel
//! replay a task against the exact history it saw the first time.
//!
//! Node kinds:
//! - `Start` is the root, one per timeline.
//! - `Emit` records one event after its parent.
//! - `Fork` opens a private frame for one task step.
//! - `Join` folds two branches' effects back together with the cell's
//!   commutative `concurrently` combinator, relative to a shared base.

use crate::activity::ActivityId;
use crate::cell::{CellHandle, CellId, CellType, EffectOf};
use crate::effect::EffectTrait;
use crate::error::SimulationError;
use hifitime::Duration;
use slab::Slab;
use smallvec::SmallVec;
use std::any::Any;
use std::sync::Arc;

/// A handle to one node in a [Timeline]. Copy, compare, stash freely; it is
/// only meaningful against the timeline that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct History(usize);

/// One recorded occurrence.
#[derive(Clone)]
pub enum Event {
    /// An effect emitted on a cell. The payload is type-erased; it is checked
    /// against the cell's effect type when folded.
    Effect {
        cell: CellId,
        effect: Arc<dyn Any + Send + Sync>,
    },
    /// Marker: an activity began executing here.
    ActivityStart { id: ActivityId, type_name: Arc<str> },
    /// Marker: an activity finished (or failed) here.
    ActivityEnd { id: ActivityId },
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Effect { cell, .. } => write!(f, "Effect({cell:?})"),
            Event::ActivityStart { id, type_name } => {
                write!(f, "ActivityStart({id:?}, {type_name})")
            }
            Event::ActivityEnd { id } => write!(f, "ActivityEnd({id:?})"),
        }
    }
}

impl Event {
    fn is_marker(&self) -> bool {
        matches!(self, Event::ActivityStart { .. } | Event::ActivityEnd { .. })
    }
}

enum NodeKind {
    Start,
    Emit { parent: History, event: Event },
    Fork { parent: History },
    Join { base: History, left: History, right: History },
}

struct Node {
    kind: NodeKind,
    time: Duration,
    children: SmallVec<History, 2>,
}

pub struct Timeline {
    nodes: Slab<Node>,
    origin: History,
}

impl Timeline {
    pub fn new() -> Self {
        let mut nodes = Slab::new();
        let origin = History(nodes.insert(Node {
            kind: NodeKind::Start,
            time: Duration::ZERO,
            children: SmallVec::new(),
        }));
        Timeline { nodes, origin }
    }

    pub fn origin(&self) -> History {
        self.origin
    }

    /// The virtual time at which this node was recorded, as an offset from
    /// the simulation start.
    pub fn time(&self, at: History) -> Duration {
        self.nodes[at.0].time
    }

    fn push(&mut self, parent_links: &[History], kind: NodeKind, time: Duration) -> History {
        let node = History(self.nodes.insert(Node {
            kind,
            time,
            children: SmallVec::new(),
        }));
        for parent in parent_links {
            self.nodes[parent.0].children.push(node);
        }
        node
    }

    /// Appends an event after `parent`.
    pub fn emit(&mut self, parent: History, event: Event, time: Duration) -> History {
        self.push(&[parent], NodeKind::Emit { parent, event }, time)
    }

    /// Opens a private branch off `base` for one task step.
    pub fn fork(&mut self, base: History, time: Duration) -> History {
        self.push(&[base], NodeKind::Fork { parent: base }, time)
    }

    /// Folds two branches back together. Both `left` and `right` must descend
    /// from `base` within the same instant; their effects relative to `base`
    /// are combined with each cell's `concurrently` when folded.
    pub fn join(&mut self, base: History, left: History, right: History, time: Duration) -> History {
        self.push(&[left, right], NodeKind::Join { base, left, right }, time)
    }

    /// The first `Emit` child of `at`, if any. Replay walks recorded emit
    /// chains through this instead of appending duplicates.
    pub fn next_emit(&self, at: History) -> Option<History> {
        self.nodes[at.0]
            .children
            .iter()
            .copied()
            .find(|child| matches!(self.nodes[child.0].kind, NodeKind::Emit { .. }))
    }

    /// The event recorded at `at`, if `at` is an `Emit` node.
    pub fn event(&self, at: History) -> Option<&Event> {
        match &self.nodes[at.0].kind {
            NodeKind::Emit { event, .. } => Some(event),
            _ => None,
        }
    }

    /// Folds the state of one cell as seen from `at`.
    ///
    /// Walks the primary lineage (`Emit`/`Fork` parents, `Join` bases) back to
    /// `Start`, then applies effects forward. Effects inside a `Join` are
    /// folded relative to the join's base with `concurrently` before being
    /// applied, so every branch ordering lands on the same state.
    pub fn state_at<C: CellType>(
        &self,
        cell: &C,
        handle: CellHandle<C>,
        at: History,
    ) -> Result<C::State, SimulationError> {
        let mut lineage = Vec::new();
        let mut cursor = at;
        loop {
            lineage.push(cursor);
            match &self.nodes[cursor.0].kind {
                NodeKind::Start => break,
                NodeKind::Emit { parent, .. } | NodeKind::Fork { parent } => cursor = *parent,
                NodeKind::Join { base, .. } => cursor = *base,
            }
        }

        let effect_trait = cell.effect_trait();
        let mut state = cell.initial();
        for node in lineage.into_iter().rev() {
            match &self.nodes[node.0].kind {
                NodeKind::Start | NodeKind::Fork { .. } => {}
                NodeKind::Emit { event, .. } => {
                    if let Some(effect) = Self::matching_effect::<C>(event, handle)? {
                        cell.apply(&mut state, effect);
                    }
                }
                NodeKind::Join { base, left, right } => {
                    let combined = effect_trait.concurrently(
                        &self.delta(cell, handle, *left, *base)?,
                        &self.delta(cell, handle, *right, *base)?,
                    );
                    cell.apply(&mut state, &combined);
                }
            }
        }
        Ok(state)
    }

    /// The combined effect on one cell along the path from `base` to `tip`.
    /// Recursion depth is bounded by the length of one instant's branches.
    fn delta<C: CellType>(
        &self,
        cell: &C,
        handle: CellHandle<C>,
        tip: History,
        base: History,
    ) -> Result<EffectOf<C>, SimulationError> {
        let effect_trait = cell.effect_trait();
        if tip == base {
            return Ok(effect_trait.empty());
        }
        match &self.nodes[tip.0].kind {
            NodeKind::Start => Ok(effect_trait.empty()),
            NodeKind::Fork { parent } => self.delta(cell, handle, *parent, base),
            NodeKind::Emit { parent, event } => {
                let prefix = self.delta(cell, handle, *parent, base)?;
                match Self::matching_effect::<C>(event, handle)? {
                    Some(effect) => Ok(effect_trait.sequentially(&prefix, effect)),
                    None => Ok(prefix),
                }
            }
            NodeKind::Join {
                base: inner,
                left,
                right,
            } => {
                let prefix = self.delta(cell, handle, *inner, base)?;
                let combined = effect_trait.concurrently(
                    &self.delta(cell, handle, *left, *inner)?,
                    &self.delta(cell, handle, *right, *inner)?,
                );
                Ok(effect_trait.sequentially(&prefix, &combined))
            }
        }
    }

    fn matching_effect<C: CellType>(
        event: &Event,
        handle: CellHandle<C>,
    ) -> Result<Option<&EffectOf<C>>, SimulationError> {
        match event {
            Event::Effect { cell, effect } if *cell == handle.id() => effect
                .downcast_ref::<EffectOf<C>>()
                .map(Some)
                .ok_or(SimulationError::EffectTypeMismatch { cell: handle.id() }),
            _ => Ok(None),
        }
    }

    /// All activity markers reachable from `at`, in time order. Markers at the
    /// same instant keep their causal order within each branch.
    ///
    /// Driven by an explicit worklist rather than recursion; a long run's
    /// lineage is one unbroken chain of emits, far deeper than the stack.
    pub fn activity_events_up_to(&self, at: History) -> Vec<(Duration, Event)> {
        enum Step {
            /// Walk a chain of nodes down to its base (or `stop_at`).
            Walk {
                tip: History,
                stop_at: Option<History>,
            },
            /// Replay a marker found while walking.
            Marker(History),
        }

        let mut out = Vec::new();
        let mut worklist = vec![Step::Walk {
            tip: at,
            stop_at: None,
        }];
        while let Some(step) = worklist.pop() {
            match step {
                Step::Marker(node) => {
                    if let NodeKind::Emit { event, .. } = &self.nodes[node.0].kind {
                        out.push((self.nodes[node.0].time, event.clone()));
                    }
                }
                Step::Walk { mut tip, stop_at } => loop {
                    if Some(tip) == stop_at {
                        break;
                    }
                    match &self.nodes[tip.0].kind {
                        NodeKind::Start => break,
                        NodeKind::Emit { parent, event } => {
                            // Pushed tip-first; popping yields ancestor-first,
                            // after the chain's base below has been handled.
                            if event.is_marker() {
                                worklist.push(Step::Marker(tip));
                            }
                            tip = *parent;
                        }
                        NodeKind::Fork { parent } => tip = *parent,
                        NodeKind::Join { base, left, right } => {
                            worklist.push(Step::Walk {
                                tip: *right,
                                stop_at: Some(*base),
                            });
                            worklist.push(Step::Walk {
                                tip: *left,
                                stop_at: Some(*base),
                            });
                            worklist.push(Step::Walk {
                                tip: *base,
                                stop_at,
                            });
                            break;
                        }
                    }
                },
            }
        }
        out.sort_by_key(|(time, _)| *time);
        out
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Timeline::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{AccumulatorCell, RegisterCell};
    use crate::effect::RegisterEffect;
    use hifitime::TimeUnits;

    fn sum_effect(cell: CellId, delta: f64) -> Event {
        Event::Effect {
            cell,
            effect: Arc::new(delta),
        }
    }

    #[test]
    fn sequential_emits_fold_in_order() {
        let cell = AccumulatorCell::new(10.0);
        let handle = CellHandle::<AccumulatorCell>::new(CellId(0));
        let mut timeline = Timeline::new();

        let a = timeline.emit(timeline.origin(), sum_effect(CellId(0), -1.0), 1.seconds());
        let b = timeline.emit(a, sum_effect(CellId(0), -2.0), 2.seconds());

        assert_eq!(10.0, timeline.state_at(&cell, handle, timeline.origin()).unwrap());
        assert_eq!(9.0, timeline.state_at(&cell, handle, a).unwrap());
        assert_eq!(7.0, timeline.state_at(&cell, handle, b).unwrap());

        assert_eq!(Duration::ZERO, timeline.time(timeline.origin()));
        assert_eq!(2.seconds(), timeline.time(b));
        assert_eq!(Some(a), timeline.next_emit(timeline.origin()));
    }

    #[test]
    fn branches_are_isolated_until_joined() {
        let cell = AccumulatorCell::new(0.0);
        let handle = CellHandle::<AccumulatorCell>::new(CellId(0));
        let mut timeline = Timeline::new();
        let base = timeline.origin();

        let f1 = timeline.fork(base, 1.seconds());
        let f2 = timeline.fork(base, 1.seconds());
        let t1 = timeline.emit(f1, sum_effect(CellId(0), 3.0), 1.seconds());
        let t2 = timeline.emit(f2, sum_effect(CellId(0), 4.0), 1.seconds());

        // Neither branch sees the other.
        assert_eq!(3.0, timeline.state_at(&cell, handle, t1).unwrap());
        assert_eq!(4.0, timeline.state_at(&cell, handle, t2).unwrap());

        let joined = {
            let step = timeline.join(base, base, t1, 1.seconds());
            timeline.join(base, step, t2, 1.seconds())
        };
        assert_eq!(7.0, timeline.state_at(&cell, handle, joined).unwrap());
    }

    #[test]
    fn join_order_does_not_matter_for_registers() {
        let cell = RegisterCell::new(0);
        let handle = CellHandle::<RegisterCell<i32>>::new(CellId(0));

        let fold = |first: i32, second: i32| {
            let mut timeline = Timeline::new();
            let base = timeline.origin();
            let f1 = timeline.fork(base, 1.seconds());
            let f2 = timeline.fork(base, 1.seconds());
            let t1 = timeline.emit(
                f1,
                Event::Effect {
                    cell: CellId(0),
                    effect: Arc::new(RegisterEffect::set(first)),
                },
                1.seconds(),
            );
            let t2 = timeline.emit(
                f2,
                Event::Effect {
                    cell: CellId(0),
                    effect: Arc::new(RegisterEffect::set(second)),
                },
                1.seconds(),
            );
            let step = timeline.join(base, base, t1, 1.seconds());
            let joined = timeline.join(base, step, t2, 1.seconds());
            timeline.state_at(&cell, handle, joined).unwrap()
        };

        let forward = fold(5, 6);
        let backward = fold(6, 5);
        assert_eq!(forward, backward);
        assert!(forward.conflicted);
        assert_eq!(0, forward.value);
    }

    #[test]
    fn mismatched_effect_type_is_an_error() {
        let cell = AccumulatorCell::new(0.0);
        let handle = CellHandle::<AccumulatorCell>::new(CellId(0));
        let mut timeline = Timeline::new();

        let bad = timeline.emit(
            timeline.origin(),
            Event::Effect {
                cell: CellId(0),
                effect: Arc::new("not a number".to_string()),
            },
            1.seconds(),
        );
        assert!(matches!(
            timeline.state_at(&cell, handle, bad),
            Err(SimulationError::EffectTypeMismatch { .. })
        ));
    }

    #[test]
    fn markers_come_back_in_time_order() {
        let mut timeline = Timeline::new();
        let start = timeline.emit(
            timeline.origin(),
            Event::ActivityStart {
                id: ActivityId(0),
                type_name: Arc::from("Observe"),
            },
            1.seconds(),
        );
        let end = timeline.emit(start, Event::ActivityEnd { id: ActivityId(0) }, 3.seconds());

        let markers = timeline.activity_events_up_to(end);
        assert_eq!(2, markers.len());
        assert_eq!(1.seconds(), markers[0].0);
        assert_eq!(3.seconds(), markers[1].0);
    }

    #[test]
    fn markers_in_joined_branches_keep_causal_order() {
        let mut timeline = Timeline::new();
        let base = timeline.emit(
            timeline.origin(),
            Event::ActivityStart {
                id: ActivityId(0),
                type_name: Arc::from("Parent"),
            },
            1.seconds(),
        );

        let frame = timeline.fork(base, 1.seconds());
        let child_start = timeline.emit(
            frame,
            Event::ActivityStart {
                id: ActivityId(1),
                type_name: Arc::from("Child"),
            },
            1.seconds(),
        );
        let child_end =
            timeline.emit(child_start, Event::ActivityEnd { id: ActivityId(1) }, 1.seconds());

        let joined = timeline.join(base, base, child_end, 1.seconds());
        let parent_end = timeline.emit(joined, Event::ActivityEnd { id: ActivityId(0) }, 1.seconds());

        // Same instant throughout; each id still starts before it ends.
        let markers = timeline.activity_events_up_to(parent_end);
        let order: Vec<_> = markers
            .iter()
            .map(|(_, event)| format!("{event:?}"))
            .collect();
        assert_eq!(
            vec![
                "ActivityStart(ActivityId(0), Parent)",
                "ActivityStart(ActivityId(1), Child)",
                "ActivityEnd(ActivityId(1))",
                "ActivityEnd(ActivityId(0))",
            ],
            order
        );
    }

    #[test]
    fn marker_collection_handles_deep_lineages() {
        let mut timeline = Timeline::new();
        let mut tip = timeline.origin();
        for i in 0..50_000u64 {
            let time = (i as f64).seconds();
            tip = timeline.emit(
                tip,
                Event::ActivityStart {
                    id: ActivityId(i),
                    type_name: Arc::from("Ping"),
                },
                time,
            );
            tip = timeline.emit(tip, Event::ActivityEnd { id: ActivityId(i) }, time);
        }

        let markers = timeline.activity_events_up_to(tip);
        assert_eq!(100_000, markers.len());
    }
}
