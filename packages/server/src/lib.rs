//! Process tier for newsdesk: configuration, concrete collaborators, and
//! the wiring shared by the worker, scheduler, and jobs binaries.

pub mod config;
pub mod kernel;
pub mod telemetry;

pub use config::Config;
