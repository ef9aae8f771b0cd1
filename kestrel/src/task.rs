//! Task execution by replay.
//!
//! Activity bodies are plain functions with no coroutine machinery behind
//! them. When a task needs to pause, the yield travels up through `?` as an
//! [Interrupt] returned from `run`. To resume, the kernel re-executes `run`
//! from the top while a breadcrumb trail steers every past interaction down
//! the exact path it took before: recorded emits are walked instead of
//! re-appended, past delays and awaits return immediately, and past spawns
//! hand back the child id without creating a second child. Reads during
//! replay hit the same history nodes as the original execution, so a
//! deterministic body reaches the live frontier in the same state it left.

use crate::activity::{Activity, ActivityId, IdAllocator};
use crate::cell::{CellHandle, CellType, EffectOf};
use crate::model::MissionModel;
use crate::timeline::{Event, History, Timeline};
use anyhow::anyhow;
use hifitime::Duration;
use std::sync::Arc;
use tracing::trace;

/// Why a task's `run` stopped before completing. Travels through `?`; an
/// activity body never observes one of these, it only produces them.
#[derive(Debug)]
pub enum Interrupt {
    /// Pause for a span of virtual time.
    Delay(Duration),
    /// Pause until another activity completes.
    Await(ActivityId),
    /// The task failed. The scheduler records the failure and completes the
    /// task; effects already emitted stay in the timeline.
    Fault(anyhow::Error),
}

impl From<anyhow::Error> for Interrupt {
    fn from(error: anyhow::Error) -> Self {
        Interrupt::Fault(error)
    }
}

pub type TaskResult<T = ()> = Result<T, Interrupt>;

/// What a single step of a task produced, as the scheduler sees it.
pub(crate) enum TaskStatus {
    Completed,
    Delayed(Duration),
    Awaiting(ActivityId),
    Failed(anyhow::Error),
}

/// One recorded interaction between a task and the kernel.
#[derive(Clone, Debug)]
pub(crate) enum Breadcrumb {
    /// The task resumed at this history node and time.
    Advance { history: History, time: Duration },
    /// The task spawned a child that got this id.
    Spawn(ActivityId),
    /// The task spawned a delayed child that got this id.
    SpawnAfter(ActivityId),
}

pub(crate) struct SpawnRequest {
    pub id: ActivityId,
    pub activity: Arc<dyn Activity>,
    pub delay: Duration,
    pub type_name: Arc<str>,
    /// The parent's history position when it spawned. A zero-delay child
    /// branches here, so it sees the parent's effects up to the spawn and
    /// nothing after; its own effects combine concurrently with the
    /// parent's continuation.
    pub at: History,
}

pub(crate) struct StepResult {
    pub status: TaskStatus,
    /// The tip of this step's frame, to be joined back into the trunk.
    pub frame_tip: History,
    pub spawns: Vec<SpawnRequest>,
}

/// A task that resumes by re-running its activity body against its breadcrumb
/// trail. The scheduler appends an `Advance` before every step.
pub(crate) struct ReplayingTask {
    pub id: ActivityId,
    pub activity: Arc<dyn Activity>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl ReplayingTask {
    pub(crate) fn new(id: ActivityId, activity: Arc<dyn Activity>) -> Self {
        ReplayingTask {
            id,
            activity,
            breadcrumbs: Vec::new(),
        }
    }

    pub(crate) fn step(
        &mut self,
        timeline: &mut Timeline,
        model: &MissionModel,
        ids: &mut IdAllocator,
    ) -> StepResult {
        trace!(task = ?self.id, crumbs = self.breadcrumbs.len(), "stepping task");
        let mut ctx = TaskContext::new(&mut self.breadcrumbs, timeline, model, ids);
        let outcome = self.activity.run(&mut ctx);
        let frame_tip = ctx.position;
        let spawns = std::mem::take(&mut ctx.spawns);
        let status = match outcome {
            Ok(()) => TaskStatus::Completed,
            Err(Interrupt::Delay(duration)) => TaskStatus::Delayed(duration),
            Err(Interrupt::Await(id)) => TaskStatus::Awaiting(id),
            Err(Interrupt::Fault(error)) => TaskStatus::Failed(error),
        };
        StepResult {
            status,
            frame_tip,
            spawns,
        }
    }
}

/// The interface an activity body uses to interact with the simulation.
/// Every method is replay-aware; bodies call them identically on first
/// execution and on every resume.
pub struct TaskContext<'a> {
    breadcrumbs: &'a mut Vec<Breadcrumb>,
    timeline: &'a mut Timeline,
    model: &'a MissionModel,
    ids: &'a mut IdAllocator,
    spawns: Vec<SpawnRequest>,
    children: Vec<ActivityId>,
    position: History,
    time: Duration,
    cursor: usize,
}

impl<'a> TaskContext<'a> {
    fn new(
        breadcrumbs: &'a mut Vec<Breadcrumb>,
        timeline: &'a mut Timeline,
        model: &'a MissionModel,
        ids: &'a mut IdAllocator,
    ) -> Self {
        // The scheduler always records the resume point before stepping.
        let (position, time) = match breadcrumbs.first() {
            Some(Breadcrumb::Advance { history, time }) => (*history, *time),
            _ => unreachable!("a task stepped without a recorded resume point"),
        };
        TaskContext {
            breadcrumbs,
            timeline,
            model,
            ids,
            spawns: Vec::new(),
            children: Vec::new(),
            position,
            time,
            cursor: 1,
        }
    }

    fn replaying(&self) -> bool {
        self.cursor < self.breadcrumbs.len()
    }

    /// Consumes the next breadcrumb, which past execution guarantees exists
    /// while replaying.
    fn consume(&mut self) -> Breadcrumb {
        let crumb = self.breadcrumbs[self.cursor].clone();
        self.cursor += 1;
        crumb
    }

    /// The current virtual time, as an offset from the simulation start.
    pub fn now(&self) -> Duration {
        self.time
    }

    /// Reads a cell's state as of everything this task has seen and emitted.
    /// Effects from other tasks at the current instant are not visible; they
    /// fold in when the instant's branches join.
    pub fn read<C: CellType>(&self, handle: CellHandle<C>) -> TaskResult<C::State> {
        let cell = self
            .model
            .cell_typed::<C>(handle)
            .map_err(|e| Interrupt::Fault(e.into()))?;
        self.timeline
            .state_at(cell, handle, self.position)
            .map_err(|e| Interrupt::Fault(e.into()))
    }

    /// Emits an effect on a cell, visible to this task's own later reads
    /// immediately and to other tasks once the instant joins.
    pub fn emit<C: CellType>(&mut self, handle: CellHandle<C>, effect: EffectOf<C>) -> TaskResult {
        if self.replaying() {
            let next = self.timeline.next_emit(self.position).ok_or_else(|| {
                Interrupt::Fault(anyhow!(
                    "replay diverged: an emit was recorded here on the first execution"
                ))
            })?;
            match self.timeline.event(next) {
                Some(Event::Effect { cell, .. }) if *cell == handle.id() => {}
                recorded => {
                    return Err(Interrupt::Fault(anyhow!(
                        "replay diverged: emit on {:?} does not match recorded {recorded:?}",
                        handle.id(),
                    )));
                }
            }
            self.position = next;
        } else {
            self.position = self.timeline.emit(
                self.position,
                Event::Effect {
                    cell: handle.id(),
                    effect: Arc::new(effect),
                },
                self.time,
            );
        }
        Ok(())
    }

    /// Pauses this task for `duration` of virtual time.
    pub fn delay(&mut self, duration: Duration) -> TaskResult {
        if self.replaying() {
            match self.consume() {
                Breadcrumb::Advance { history, time } => {
                    self.position = history;
                    self.time = time;
                    Ok(())
                }
                crumb => Err(replay_mismatch("delay", &crumb)),
            }
        } else {
            Err(Interrupt::Delay(duration))
        }
    }

    /// Pauses this task until the given activity completes. Returns
    /// immediately if it already has.
    pub fn wait_for_activity(&mut self, id: ActivityId) -> TaskResult {
        if self.replaying() {
            match self.consume() {
                Breadcrumb::Advance { history, time } => {
                    self.position = history;
                    self.time = time;
                    Ok(())
                }
                crumb => Err(replay_mismatch("wait", &crumb)),
            }
        } else {
            Err(Interrupt::Await(id))
        }
    }

    /// Waits for every child this task has spawned, in spawn order.
    pub fn wait_for_children(&mut self) -> TaskResult {
        for child in self.children.clone() {
            self.wait_for_activity(child)?;
        }
        Ok(())
    }

    /// Starts a child activity at the current instant. The child runs
    /// concurrently with the remainder of this task.
    pub fn spawn(&mut self, activity: Arc<dyn Activity>) -> TaskResult<ActivityId> {
        if self.replaying() {
            match self.consume() {
                Breadcrumb::Spawn(id) => {
                    self.children.push(id);
                    Ok(id)
                }
                crumb => Err(replay_mismatch("spawn", &crumb)),
            }
        } else {
            Ok(self.spawn_live(activity, Duration::ZERO))
        }
    }

    /// Starts a child activity `delay` after the current instant.
    pub fn spawn_after(
        &mut self,
        delay: Duration,
        activity: Arc<dyn Activity>,
    ) -> TaskResult<ActivityId> {
        if self.replaying() {
            match self.consume() {
                Breadcrumb::SpawnAfter(id) => {
                    self.children.push(id);
                    Ok(id)
                }
                crumb => Err(replay_mismatch("spawn_after", &crumb)),
            }
        } else {
            Ok(self.spawn_live(activity, delay))
        }
    }

    fn spawn_live(&mut self, activity: Arc<dyn Activity>, delay: Duration) -> ActivityId {
        let id = self.ids.allocate();
        let type_name: Arc<str> = Arc::from(activity.label());
        let crumb = if delay == Duration::ZERO {
            Breadcrumb::Spawn(id)
        } else {
            Breadcrumb::SpawnAfter(id)
        };
        self.breadcrumbs.push(crumb);
        // Keep the cursor at the frontier so the context stays live.
        self.cursor += 1;
        self.children.push(id);
        self.spawns.push(SpawnRequest {
            id,
            activity,
            delay,
            type_name,
            at: self.position,
        });
        id
    }
}

fn replay_mismatch(operation: &str, found: &Breadcrumb) -> Interrupt {
    Interrupt::Fault(anyhow!(
        "replay diverged at `{operation}`: recorded {found:?} instead; \
         activity bodies must be deterministic given the same reads"
    ))
}
