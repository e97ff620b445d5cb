// src/config/mod.rs

//! Configuration loading and validation for stratrun.
//!
//! - `model.rs`: orchestrator settings (TOML) and the per-run [`RunConfig`].
//! - `loader.rs`: reading both from disk.
//! - `validate.rs`: semantic checks producing `StratrunError::Config`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_run_config, load_settings};
pub use model::{
    DataSection, EngineSection, MonitorSection, RawSettings, RunConfig, SchedulerSection,
    Settings, StorageSection,
};
pub use validate::{validate_run_config, validate_run_id};
