// src/data/mod.rs

//! Data Readiness: validate market datasets before a job runs and repair
//! them under a lock shared by every job in the process.

pub mod acquire;
pub mod readiness;

pub use acquire::{DataAcquirer, EngineDownloader};
pub use readiness::{DataReadiness, DatasetRequest, ReadinessReport};
