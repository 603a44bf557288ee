//! The per-job processing pipeline and the primitives it is built from.

pub mod callback;
pub mod coordinator;
pub mod dates;
pub mod executor;
pub mod progress;

pub use callback::deliver_or_park;
pub use coordinator::{Collaborators, PipelineCoordinator};
pub use executor::{retry_stage, run_bounded};
pub use progress::{JobReporter, LedgerReporter, NoopReporter};
