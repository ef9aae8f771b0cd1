//! The time-ordered task scheduler.
//!
//! Virtual time advances instant by instant. All tasks resuming at one
//! instant run in a batch: each gets a private frame forked off the trunk,
//! steps until it completes or yields, and the frames join back into the
//! trunk with each cell's commutative `concurrently` combinator. A zero-delay
//! spawn branches the parent's frame at the spawn point: the child sees the
//! parent's effects up to the spawn and nothing after, and the child's branch
//! joins there so its effects combine concurrently with the parent's
//! continuation. Tasks woken by a completion at the same instant run in a
//! following sub-batch, so they see the effects of the batch that woke them.
//!
//! Tie-breaking is FIFO: jobs carry a monotonically increasing sequence
//! number, and the queue orders by `(time, seq)`. Together with the
//! commutative join this makes the whole schedule order-independent at the
//! observable level and reproducible at the byte level.

use crate::activity::{ActivityId, IdAllocator};
use crate::error::SimulationError;
use crate::model::MissionModel;
use crate::sim::DirectiveId;
use crate::task::{ReplayingTask, SpawnRequest, StepResult, TaskStatus};
use crate::timeline::{Event, History, Timeline};
use crate::value::SerializedValue;
use ahash::{AHashMap, AHashSet};
use hifitime::Duration;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Everything the results need to know about one task.
pub(crate) struct TaskRecord {
    pub type_name: Arc<str>,
    pub directive: Option<DirectiveId>,
    pub arguments: BTreeMap<String, SerializedValue>,
    pub parent: Option<ActivityId>,
    pub children: Vec<ActivityId>,
    pub failure: Option<String>,
    pub computed_attributes: Option<SerializedValue>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Job {
    time: Duration,
    seq: u64,
    task: ActivityId,
}

pub(crate) struct TaskScheduler<'m> {
    model: &'m MissionModel,
    timeline: Timeline,
    queue: BinaryHeap<Reverse<Job>>,
    seq: u64,
    tasks: AHashMap<ActivityId, ReplayingTask>,
    /// Child id to the parents waiting on its completion.
    blocked: AHashMap<ActivityId, Vec<ActivityId>>,
    completed: AHashSet<ActivityId>,
    trunk: History,
    ids: IdAllocator,
    records: BTreeMap<ActivityId, TaskRecord>,
}

impl<'m> TaskScheduler<'m> {
    pub(crate) fn new(model: &'m MissionModel) -> Self {
        let timeline = Timeline::new();
        let trunk = timeline.origin();
        TaskScheduler {
            model,
            timeline,
            queue: BinaryHeap::new(),
            seq: 0,
            tasks: AHashMap::new(),
            blocked: AHashMap::new(),
            completed: AHashSet::new(),
            trunk,
            ids: IdAllocator::default(),
            records: BTreeMap::new(),
        }
    }

    pub(crate) fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub(crate) fn trunk(&self) -> History {
        self.trunk
    }

    pub(crate) fn records(&self) -> &BTreeMap<ActivityId, TaskRecord> {
        &self.records
    }

    /// Instantiates a directive and queues it to start at `offset`.
    pub(crate) fn schedule_directive(
        &mut self,
        directive: DirectiveId,
        type_name: &str,
        arguments: &BTreeMap<String, SerializedValue>,
        offset: Duration,
    ) -> Result<ActivityId, SimulationError> {
        let activity_type = self.model.activity_type(type_name)?;
        let activity = activity_type.instantiate(arguments)?;
        let id = self.ids.allocate();
        self.tasks.insert(id, ReplayingTask::new(id, activity));
        self.records.insert(
            id,
            TaskRecord {
                type_name: Arc::from(type_name),
                directive: Some(directive),
                arguments: arguments.clone(),
                parent: None,
                children: Vec::new(),
                failure: None,
                computed_attributes: None,
            },
        );
        self.enqueue(id, offset);
        Ok(id)
    }

    fn enqueue(&mut self, task: ActivityId, time: Duration) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(Job { time, seq, task }));
    }

    /// The next instant with work queued, if any.
    pub(crate) fn next_time(&self) -> Option<Duration> {
        self.queue.peek().map(|Reverse(job)| job.time)
    }

    /// Runs every task resuming at the next queued instant, including the
    /// sub-batches they trigger, and advances the trunk past it. Returns the
    /// instant processed, if there was one.
    pub(crate) fn run_instant(&mut self) -> Option<Duration> {
        let time = self.next_time()?;
        trace!(time = %time, "running instant");

        let mut batch = self.pop_batch(time);
        while !batch.is_empty() {
            let base = self.trunk;
            let mut tips = Vec::with_capacity(batch.len());
            for id in batch {
                if let Some(tip) = self.step_task(id, base, time) {
                    tips.push(tip);
                }
            }
            for tip in tips {
                self.trunk = self.timeline.join(base, self.trunk, tip, time);
            }
            batch = self.pop_batch(time);
        }
        Some(time)
    }

    fn pop_batch(&mut self, time: Duration) -> Vec<ActivityId> {
        let mut batch = Vec::new();
        while self.next_time() == Some(time) {
            if let Some(Reverse(job)) = self.queue.pop() {
                batch.push(job.task);
            }
        }
        batch
    }

    /// Steps one task inside its own frame and returns the frame tip to join.
    fn step_task(&mut self, id: ActivityId, base: History, time: Duration) -> Option<History> {
        let mut task = self.tasks.remove(&id)?;

        let mut frame = self.timeline.fork(base, time);
        if task.breadcrumbs.is_empty() {
            // First step: mark the start before the body runs.
            let type_name = self.records.get(&id)?.type_name.clone();
            frame = self
                .timeline
                .emit(frame, Event::ActivityStart { id, type_name }, time);
        }
        task.breadcrumbs.push(crate::task::Breadcrumb::Advance {
            history: frame,
            time,
        });

        let step = task.step(&mut self.timeline, self.model, &mut self.ids);
        Some(self.resolve_step(id, task, step, time))
    }

    /// Folds a step's same-instant children into its frame and routes its
    /// status. Each zero-delay child branches at its spawn point and joins
    /// there; a later spawn point nests deeper in the frame, so the fold runs
    /// innermost first.
    fn resolve_step(
        &mut self,
        id: ActivityId,
        task: ReplayingTask,
        step: StepResult,
        time: Duration,
    ) -> History {
        let mut tip = step.frame_tip;
        for spawn in step.spawns.into_iter().rev() {
            if spawn.delay == Duration::ZERO {
                let spawn_point = spawn.at;
                let child_tip = self.start_child(id, spawn, time);
                tip = self.timeline.join(spawn_point, tip, child_tip, time);
            } else {
                self.adopt_child(id, spawn, time);
            }
        }

        match step.status {
            TaskStatus::Completed => self.finish(id, &task, tip, time, None),
            TaskStatus::Failed(error) => {
                debug!(task = ?id, error = %error, "task failed");
                self.finish(id, &task, tip, time, Some(format!("{error:#}")))
            }
            TaskStatus::Delayed(duration) => {
                self.tasks.insert(id, task);
                self.enqueue(id, time + duration);
                tip
            }
            TaskStatus::Awaiting(child) => {
                self.tasks.insert(id, task);
                if self.completed.contains(&child) {
                    // Already done; resume in the next sub-batch.
                    self.enqueue(id, time);
                } else {
                    self.blocked.entry(child).or_default().push(id);
                }
                tip
            }
        }
    }

    /// Runs a zero-delay child's first step on a branch forked at its spawn
    /// point and returns the child's frame tip. Recursion depth is bounded by
    /// the depth of same-instant spawn nesting.
    fn start_child(&mut self, parent: ActivityId, spawn: SpawnRequest, time: Duration) -> History {
        let SpawnRequest {
            id,
            activity,
            type_name,
            at,
            ..
        } = spawn;
        self.record_child(parent, id, type_name.clone());
        let mut task = ReplayingTask::new(id, activity);

        let mut frame = self.timeline.fork(at, time);
        frame = self
            .timeline
            .emit(frame, Event::ActivityStart { id, type_name }, time);
        task.breadcrumbs.push(crate::task::Breadcrumb::Advance {
            history: frame,
            time,
        });

        let step = task.step(&mut self.timeline, self.model, &mut self.ids);
        self.resolve_step(id, task, step, time)
    }

    /// Queues a delayed child to take its first step at `time + delay`.
    fn adopt_child(&mut self, parent: ActivityId, spawn: SpawnRequest, time: Duration) {
        let SpawnRequest {
            id,
            activity,
            delay,
            type_name,
            ..
        } = spawn;
        self.record_child(parent, id, type_name);
        self.tasks.insert(id, ReplayingTask::new(id, activity));
        self.enqueue(id, time + delay);
    }

    fn record_child(&mut self, parent: ActivityId, id: ActivityId, type_name: Arc<str>) {
        self.records.insert(
            id,
            TaskRecord {
                type_name,
                directive: None,
                arguments: BTreeMap::new(),
                parent: Some(parent),
                children: Vec::new(),
                failure: None,
                computed_attributes: None,
            },
        );
        if let Some(record) = self.records.get_mut(&parent) {
            record.children.push(id);
        }
    }

    /// Marks a task done, successfully or not, and wakes anything waiting on
    /// it. Effects a failed task already emitted stay in the timeline.
    fn finish(
        &mut self,
        id: ActivityId,
        task: &ReplayingTask,
        frame_tip: History,
        time: Duration,
        failure: Option<String>,
    ) -> History {
        let tip = self
            .timeline
            .emit(frame_tip, Event::ActivityEnd { id }, time);
        if let Some(record) = self.records.get_mut(&id) {
            if failure.is_some() {
                record.failure = failure;
            } else {
                record.computed_attributes = Some(task.activity.computed_attributes());
            }
        }
        self.completed.insert(id);
        if let Some(waiters) = self.blocked.remove(&id) {
            for waiter in waiters {
                self.enqueue(waiter, time);
            }
        }
        tip
    }
}
