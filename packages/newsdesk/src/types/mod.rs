//! Domain types.

pub mod article;
pub mod config;
pub mod job;
pub mod page;
pub mod result;
pub mod spool;
