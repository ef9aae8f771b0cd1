use crate::activity_model::ActivityModelError;
use crate::cell::CellId;
use thiserror::Error;

/// Structured failures the kernel itself can produce. Modeller code reports
/// failures through `anyhow` instead; these are the kernel's own invariants.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("no activity type named `{0}` is registered")]
    UnknownActivityType(String),

    #[error("could not instantiate activity of type `{type_name}`: {reason}")]
    InstantiationFailure { type_name: String, reason: String },

    #[error("no cell with id {0:?} is registered")]
    UnknownCell(CellId),

    #[error("an effect emitted on cell {cell:?} does not match the cell's effect type")]
    EffectTypeMismatch { cell: CellId },

    #[error("cell {cell:?} was accessed through a handle of the wrong cell type")]
    CellTypeMismatch { cell: CellId },

    #[error(transparent)]
    ActivityModel(#[from] ActivityModelError),
}
