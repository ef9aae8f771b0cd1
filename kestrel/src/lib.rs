//! `kestrel` is a deterministic discrete event simulation kernel for
//! spacecraft mission models. You describe your spacecraft as cells of state
//! with explicit effect algebras and activities that read, emit, delay, and
//! spawn; `kestrel` runs a schedule of activity directives against that model
//! and reports resource profiles and activity spans over the plan.
//!
//! The same schedule against the same model produces byte-identical results,
//! every time, on every machine. Three mechanisms carry that guarantee:
//!
//! - **A branching, append-only timeline.** Effects are never applied to
//!   mutable state; they are recorded, and cell state is folded on demand
//!   from whatever point of history you hold. Tasks running at the same
//!   virtual instant each work in a private branch, then the branches join
//!   through each cell's commutative `concurrently` combinator, so no
//!   interleaving of same-instant work is ever observable.
//! - **Replaying tasks.** Activity bodies are ordinary functions. Pauses
//!   travel up as returned [Interrupt] values, and a resumed task re-executes
//!   its body while a breadcrumb trail steers every past interaction down the
//!   recorded path. No coroutines, no threads, no global state.
//! - **Explicit everything.** Cells, resources, activity types, and value
//!   codecs are all registered up front on a [MissionModel]; nothing is
//!   discovered by reflection at simulation time.
//!
//! ```
//! use kestrel::*;
//! use hifitime::TimeUnits;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! struct Vent {
//!     amount: f64,
//!     tank: CellHandle<AccumulatorCell>,
//! }
//!
//! impl Activity for Vent {
//!     fn label(&self) -> &str {
//!         "Vent"
//!     }
//!
//!     fn run(&self, ctx: &mut TaskContext) -> TaskResult {
//!         ctx.emit(self.tank, -self.amount)?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let mut builder = MissionModel::builder();
//!     let tank = builder.real("tank_pressure", AccumulatorCell::new(100.0), |&level| {
//!         RealDynamics::constant(level)
//!     })?;
//!     builder.activity_type(ActivityType::new(
//!         "Vent",
//!         BTreeMap::from([("amount".to_string(), ValueSchema::Real)]),
//!         move |args| {
//!             let amount = args
//!                 .get("amount")
//!                 .and_then(SerializedValue::as_real)
//!                 .ok_or_else(|| "missing `amount`".to_string())?;
//!             Ok(Arc::new(Vent { amount, tank }) as Arc<dyn Activity>)
//!         },
//!     ))?;
//!     let model = builder.build();
//!
//!     let (schedule, _) = Schedule::empty().plus(
//!         30.seconds(),
//!         Directive::new("Vent").argument("amount", 10.0),
//!     );
//!     let simulator = Simulator::new(&model, Time::from_gregorian_utc_at_midnight(2026, 1, 1));
//!     let outcome = simulator.simulate(&schedule, 1.minutes(), || false)?;
//!
//!     let SimulationOutcome::Completed(results) = outcome else {
//!         unreachable!()
//!     };
//!     assert_eq!(2, results.real_profiles["tank_pressure"].segments.len());
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod activity_model;
pub mod cell;
pub mod effect;
pub mod error;
pub mod model;
pub mod profile;
mod scheduler;
pub mod sim;
pub mod task;
pub mod timeline;
pub mod value;

pub use activity::{Activity, ActivityId, ActivityType};
pub use activity_model::{ActivityModel, Window, collapse_overlapping};
pub use cell::{
    AccumulatorCell, CellHandle, CellId, CellType, RealRegisterCell, RegisterCell, RegisterState,
};
pub use effect::{EffectTrait, RegisterEffect, RegisterEffectTrait, SumEffectTrait};
pub use error::SimulationError;
pub use model::{CellSample, MissionModel, MissionModelBuilder};
pub use profile::{Profile, ProfileSegment, RealDynamics};
pub use sim::{
    Directive, DirectiveId, Schedule, ScheduleEntry, SimulatedActivity, SimulationOutcome,
    SimulationResults, Simulator,
};
pub use task::{Interrupt, TaskContext, TaskResult};
pub use value::{
    BooleanMapper, DurationMapper, IntMapper, RealMapper, SerializedValue, TextMapper,
    ValueMapper, ValueSchema,
};

pub use anyhow::{Context, Error, Result, anyhow, bail};
pub use hifitime::{Duration, Epoch as Time};
