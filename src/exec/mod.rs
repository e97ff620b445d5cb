// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`engine`] spawns the external engine and streams its output.
//! - [`artifact`] writes the per-job engine configuration.
//! - [`resolve`] finds and reads the structured export, [`parser`] scrapes
//!   the text report when there is none.
//! - [`executor`] runs one job end to end.
//! - [`backend`] provides the `JobRunner` trait the scheduler dispatches to,
//!   which tests can replace with a fake implementation.

pub mod artifact;
pub mod backend;
pub mod engine;
pub mod executor;
pub mod parser;
pub mod resolve;

pub use backend::JobRunner;
pub use engine::{CancelSignal, Engine, OutputLine, Stream};
pub use executor::{Executor, ExecutorOptions};
