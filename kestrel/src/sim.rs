//! The top-level simulation driver: schedules in, results out.

use crate::activity::ActivityId;
use crate::activity_model::ActivityModel;
use crate::model::{CellSample, MissionModel};
use crate::profile::{Profile, RealDynamics};
use crate::scheduler::TaskScheduler;
use crate::value::SerializedValue;
use anyhow::Result;
use hifitime::{Duration, Epoch as Time};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Identifies one entry in a [Schedule]. Stable across edits: deleting or
/// moving other directives never renumbers the rest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DirectiveId(pub u64);

/// A request to run one activity: the type name plus serialized arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub type_name: String,
    pub arguments: BTreeMap<String, SerializedValue>,
}

impl Directive {
    pub fn new(type_name: impl Into<String>) -> Self {
        Directive {
            type_name: type_name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<SerializedValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: DirectiveId,
    pub offset: Duration,
    pub directive: Directive,
}

/// An immutable plan: directives at offsets from the plan start. Edits
/// produce new schedules, so a simulator can be re-run against variants of a
/// plan without the variants interfering.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
    next_id: u64,
}

impl Schedule {
    pub fn empty() -> Self {
        Schedule::default()
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Returns this schedule plus one more directive, and the new entry's id.
    pub fn plus(&self, offset: Duration, directive: Directive) -> (Schedule, DirectiveId) {
        let id = DirectiveId(self.next_id);
        let mut entries = self.entries.clone();
        entries.push(ScheduleEntry {
            id,
            offset,
            directive,
        });
        (
            Schedule {
                entries,
                next_id: self.next_id + 1,
            },
            id,
        )
    }

    /// Returns this schedule without the given directive. Removing an unknown
    /// id is a no-op.
    pub fn delete(&self, id: DirectiveId) -> Schedule {
        Schedule {
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.id != id)
                .cloned()
                .collect(),
            next_id: self.next_id,
        }
    }

    /// Returns this schedule with one directive moved to a new offset.
    pub fn set_start_time(&self, id: DirectiveId, offset: Duration) -> Schedule {
        Schedule {
            entries: self
                .entries
                .iter()
                .map(|entry| {
                    let mut entry = entry.clone();
                    if entry.id == id {
                        entry.offset = offset;
                    }
                    entry
                })
                .collect(),
            next_id: self.next_id,
        }
    }
}

/// One activity instance as reported in the results: directives and spawned
/// children alike.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulatedActivity {
    pub type_name: String,
    pub arguments: BTreeMap<String, SerializedValue>,
    pub start: Time,
    pub duration: Duration,
    pub parent: Option<ActivityId>,
    pub children: Vec<ActivityId>,
    pub directive_id: Option<DirectiveId>,
    pub computed_attributes: SerializedValue,
    /// Rendered failure chain if the activity faulted. Its effects up to the
    /// fault remain in the profiles.
    pub failure: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResults {
    pub start_time: Time,
    pub duration: Duration,
    pub real_profiles: BTreeMap<String, Profile<RealDynamics>>,
    pub discrete_profiles: BTreeMap<String, Profile<SerializedValue>>,
    pub simulated_activities: BTreeMap<ActivityId, SimulatedActivity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimulationOutcome {
    Completed(SimulationResults),
    /// The caller's cancellation hook fired. `elapsed` is the last instant
    /// that finished processing.
    Canceled { elapsed: Duration },
}

/// Runs schedules against one mission model. The simulator holds no mutable
/// state; every call to [Simulator::simulate] starts from the model's initial
/// conditions.
pub struct Simulator<'m> {
    model: &'m MissionModel,
    start: Time,
}

impl<'m> Simulator<'m> {
    pub fn new(model: &'m MissionModel, start: Time) -> Self {
        Simulator { model, start }
    }

    /// Simulates `schedule` from the plan start out to `horizon`.
    ///
    /// `cancelled` is polled between instants; a cooperative cancellation
    /// point, never a mid-instant abort, so a canceled run leaves no
    /// half-applied instant behind. Directives past the horizon are not
    /// started; tasks still pending at the horizon are reported as running
    /// through it.
    pub fn simulate(
        &self,
        schedule: &Schedule,
        horizon: Duration,
        cancelled: impl Fn() -> bool,
    ) -> Result<SimulationOutcome> {
        let mut scheduler = TaskScheduler::new(self.model);
        for entry in schedule.entries() {
            if entry.offset > horizon {
                continue;
            }
            scheduler.schedule_directive(
                entry.id,
                &entry.directive.type_name,
                &entry.directive.arguments,
                entry.offset,
            )?;
        }

        let mut real_profiles: BTreeMap<String, Profile<RealDynamics>> = BTreeMap::new();
        let mut discrete_profiles: BTreeMap<String, Profile<SerializedValue>> = BTreeMap::new();
        self.sample(&scheduler, Duration::ZERO, &mut real_profiles, &mut discrete_profiles)?;

        let mut elapsed = Duration::ZERO;
        loop {
            if cancelled() {
                info!(elapsed = %elapsed, "simulation canceled");
                return Ok(SimulationOutcome::Canceled { elapsed });
            }
            match scheduler.next_time() {
                Some(time) if time <= horizon => {}
                _ => break,
            }
            if let Some(time) = scheduler.run_instant() {
                self.sample(&scheduler, time, &mut real_profiles, &mut discrete_profiles)?;
                elapsed = time;
            }
        }

        let activity_model = ActivityModel::project(scheduler.timeline(), scheduler.trunk())
            .map_err(crate::error::SimulationError::from)?;

        let mut simulated_activities = BTreeMap::new();
        for (&id, record) in scheduler.records() {
            // No window means the directive never started within the horizon.
            let Some(window) = activity_model.instance_window(id, horizon) else {
                continue;
            };
            simulated_activities.insert(
                id,
                SimulatedActivity {
                    type_name: record.type_name.to_string(),
                    arguments: record.arguments.clone(),
                    start: self.start + window.start,
                    duration: window.duration(),
                    parent: record.parent,
                    children: record.children.clone(),
                    directive_id: record.directive,
                    computed_attributes: record
                        .computed_attributes
                        .clone()
                        .unwrap_or(SerializedValue::Null),
                    failure: record.failure.clone(),
                },
            );
        }

        Ok(SimulationOutcome::Completed(SimulationResults {
            start_time: self.start,
            duration: horizon,
            real_profiles,
            discrete_profiles,
            simulated_activities,
        }))
    }

    fn sample(
        &self,
        scheduler: &TaskScheduler<'_>,
        time: Duration,
        real_profiles: &mut BTreeMap<String, Profile<RealDynamics>>,
        discrete_profiles: &mut BTreeMap<String, Profile<SerializedValue>>,
    ) -> Result<()> {
        for (name, sample) in self
            .model
            .sample_all(scheduler.timeline(), scheduler.trunk())?
        {
            match sample {
                CellSample::Real(dynamics) => real_profiles
                    .entry(name.to_string())
                    .or_default()
                    .extend(time, dynamics),
                CellSample::Discrete(value) => discrete_profiles
                    .entry(name.to_string())
                    .or_default()
                    .extend(time, value),
            }
        }
        Ok(())
    }
}
