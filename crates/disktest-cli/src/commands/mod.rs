//! CLI command implementations

pub mod config;
pub mod purge;
pub mod recover;
pub mod resume;
pub mod run;
pub mod status;
