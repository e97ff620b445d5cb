// src/store/mod.rs

//! Run Metadata Store: one directory per run id holding
//! `run_metadata.json`, `results/`, `results/archives/` and `logs/`.

pub mod model;
pub mod run_store;

pub use model::{LogEntry, RunMetadata, StrategyRecord, StrategyUpdate};
pub use run_store::{METADATA_FILE, RunLayout, RunStore};
