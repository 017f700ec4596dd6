//! Value types for recipes and live runs.

mod recipe;
mod run;

pub use recipe::{SequenceDefinition, SequenceStep, WaitIntent};
pub use run::{OrderId, RunState, RunStatus, RunningSequence, StepProgress, StepStatus};
