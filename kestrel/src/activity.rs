//! Activities: the modeller-facing unit of behavior.

use crate::error::SimulationError;
use crate::task::{TaskContext, TaskResult};
use crate::value::{SerializedValue, ValueSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifies one activity instance within a simulation, spanning both
/// scheduled directives and children spawned at runtime. Ids are allocated in
/// creation order, which is itself deterministic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub(crate) u64);

/// One behavior a mission model can perform.
///
/// `run` is re-executed from the top every time the task resumes, replaying
/// past interactions from breadcrumbs; it must therefore be deterministic
/// given the same reads. Yield points return [Interrupt](crate::task::Interrupt)
/// through the `?` operator rather than parking a coroutine.
pub trait Activity: Send + Sync {
    fn label(&self) -> &str;

    fn run(&self, ctx: &mut TaskContext<'_>) -> TaskResult;

    /// A value attached to the activity's results entry once it finishes.
    fn computed_attributes(&self) -> SerializedValue {
        SerializedValue::Null
    }
}

type Constructor =
    Arc<dyn Fn(&BTreeMap<String, SerializedValue>) -> Result<Arc<dyn Activity>, String> + Send + Sync>;

/// A registered activity type: its parameter schema plus a constructor from
/// serialized arguments.
pub struct ActivityType {
    name: String,
    parameters: BTreeMap<String, ValueSchema>,
    constructor: Constructor,
}

impl ActivityType {
    pub fn new(
        name: impl Into<String>,
        parameters: BTreeMap<String, ValueSchema>,
        constructor: impl Fn(&BTreeMap<String, SerializedValue>) -> Result<Arc<dyn Activity>, String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        ActivityType {
            name: name.into(),
            parameters,
            constructor: Arc::new(constructor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &BTreeMap<String, ValueSchema> {
        &self.parameters
    }

    pub fn instantiate(
        &self,
        arguments: &BTreeMap<String, SerializedValue>,
    ) -> Result<Arc<dyn Activity>, SimulationError> {
        (self.constructor)(arguments).map_err(|reason| SimulationError::InstantiationFailure {
            type_name: self.name.clone(),
            reason,
        })
    }
}

/// Hands out activity ids in order. Owned by the scheduler, threaded through
/// task steps so spawns get ids at the moment they happen.
#[derive(Default)]
pub(crate) struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub(crate) fn allocate(&mut self) -> ActivityId {
        let id = ActivityId(self.next);
        self.next += 1;
        id
    }
}
