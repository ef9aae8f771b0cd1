//! Mission model assembly: cells, resources, and activity types.
//!
//! A [MissionModel] is built once, up front, through [MissionModelBuilder];
//! nothing is discovered by reflection at simulation time. Each cell is
//! registered together with the way it is reported as a resource, either as
//! linear real dynamics or as a discrete serialized value through an explicit
//! [ValueMapper].

use crate::activity::ActivityType;
use crate::cell::{CellHandle, CellId, CellType};
use crate::error::SimulationError;
use crate::profile::RealDynamics;
use crate::timeline::{History, Timeline};
use crate::value::{SerializedValue, ValueMapper};
use anyhow::{Result, bail};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A sampled resource value at one point in a timeline.
#[derive(Clone, Debug, PartialEq)]
pub enum CellSample {
    Real(RealDynamics),
    Discrete(SerializedValue),
}

/// Type-erased sampling for one registered cell.
trait CellSlot: Send + Sync {
    fn sample(&self, timeline: &Timeline, at: History) -> Result<CellSample, SimulationError>;
}

struct RealSlot<C: CellType> {
    cell: Arc<C>,
    handle: CellHandle<C>,
    project: Box<dyn Fn(&C::State) -> RealDynamics + Send + Sync>,
}

impl<C: CellType> CellSlot for RealSlot<C> {
    fn sample(&self, timeline: &Timeline, at: History) -> Result<CellSample, SimulationError> {
        let state = timeline.state_at(self.cell.as_ref(), self.handle, at)?;
        Ok(CellSample::Real((self.project)(&state)))
    }
}

struct DiscreteSlot<C: CellType, M: ValueMapper> {
    cell: Arc<C>,
    handle: CellHandle<C>,
    mapper: M,
    project: Box<dyn Fn(&C::State) -> M::Value + Send + Sync>,
}

impl<C: CellType, M: ValueMapper> CellSlot for DiscreteSlot<C, M> {
    fn sample(&self, timeline: &Timeline, at: History) -> Result<CellSample, SimulationError> {
        let state = timeline.state_at(self.cell.as_ref(), self.handle, at)?;
        Ok(CellSample::Discrete(
            self.mapper.serialize(&(self.project)(&state)),
        ))
    }
}

struct CellEntry {
    name: String,
    /// Holds an `Arc<C>`; downcast through [MissionModel::cell_typed].
    typed: Box<dyn Any + Send + Sync>,
    slot: Box<dyn CellSlot>,
}

/// An immutable description of everything a simulation can touch.
pub struct MissionModel {
    cells: Vec<CellEntry>,
    activity_types: BTreeMap<String, ActivityType>,
}

impl MissionModel {
    pub fn builder() -> MissionModelBuilder {
        MissionModelBuilder::default()
    }

    pub(crate) fn cell_typed<C: CellType>(
        &self,
        handle: CellHandle<C>,
    ) -> Result<&C, SimulationError> {
        let entry = self
            .cells
            .get(handle.id().index())
            .ok_or(SimulationError::UnknownCell(handle.id()))?;
        entry
            .typed
            .downcast_ref::<Arc<C>>()
            .map(Arc::as_ref)
            .ok_or(SimulationError::CellTypeMismatch { cell: handle.id() })
    }

    pub fn activity_type(&self, name: &str) -> Result<&ActivityType, SimulationError> {
        self.activity_types
            .get(name)
            .ok_or_else(|| SimulationError::UnknownActivityType(name.to_string()))
    }

    pub fn activity_types(&self) -> impl Iterator<Item = &ActivityType> {
        self.activity_types.values()
    }

    /// Samples every registered resource at one point in a timeline, in
    /// resource registration order.
    pub(crate) fn sample_all(
        &self,
        timeline: &Timeline,
        at: History,
    ) -> Result<Vec<(&str, CellSample)>, SimulationError> {
        self.cells
            .iter()
            .map(|entry| Ok((entry.name.as_str(), entry.slot.sample(timeline, at)?)))
            .collect()
    }
}

#[derive(Default)]
pub struct MissionModelBuilder {
    cells: Vec<CellEntry>,
    activity_types: BTreeMap<String, ActivityType>,
}

impl MissionModelBuilder {
    /// Registers a cell reported as a real resource with linear dynamics.
    pub fn real<C: CellType>(
        &mut self,
        name: impl Into<String>,
        cell: C,
        project: impl Fn(&C::State) -> RealDynamics + Send + Sync + 'static,
    ) -> Result<CellHandle<C>> {
        let name = name.into();
        self.check_resource_name(&name)?;
        let cell = Arc::new(cell);
        let handle = CellHandle::new(CellId(self.cells.len()));
        self.cells.push(CellEntry {
            name,
            typed: Box::new(cell.clone()),
            slot: Box::new(RealSlot {
                cell,
                handle,
                project: Box::new(project),
            }),
        });
        Ok(handle)
    }

    /// Registers a cell reported as a discrete resource through a mapper.
    pub fn discrete<C: CellType, M: ValueMapper + 'static>(
        &mut self,
        name: impl Into<String>,
        cell: C,
        mapper: M,
        project: impl Fn(&C::State) -> M::Value + Send + Sync + 'static,
    ) -> Result<CellHandle<C>> {
        let name = name.into();
        self.check_resource_name(&name)?;
        let cell = Arc::new(cell);
        let handle = CellHandle::new(CellId(self.cells.len()));
        self.cells.push(CellEntry {
            name,
            typed: Box::new(cell.clone()),
            slot: Box::new(DiscreteSlot {
                cell,
                handle,
                mapper,
                project: Box::new(project),
            }),
        });
        Ok(handle)
    }

    pub fn activity_type(&mut self, activity_type: ActivityType) -> Result<&mut Self> {
        if self.activity_types.contains_key(activity_type.name()) {
            bail!(
                "an activity type named `{}` is already registered",
                activity_type.name()
            );
        }
        self.activity_types
            .insert(activity_type.name().to_string(), activity_type);
        Ok(self)
    }

    pub fn build(self) -> MissionModel {
        MissionModel {
            cells: self.cells,
            activity_types: self.activity_types,
        }
    }

    fn check_resource_name(&self, name: &str) -> Result<()> {
        if self.cells.iter().any(|entry| entry.name == name) {
            bail!("a resource named `{name}` is already registered");
        }
        Ok(())
    }
}
