//! Core trait abstractions.
//!
//! - [`ledger::JobLedger`] - durable job state, doubling as the job queue
//! - [`spool::RetrySpool`] - durable store of undelivered payloads
//! - [`stages`] - external collaborators the pipeline calls out to

pub mod ledger;
pub mod spool;
pub mod stages;
