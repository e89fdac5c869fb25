//! # COGZ Task Layer
//!
//! The pieces that sit between the engine in `cogz-core` and an experiment:
//!
//! - [`scripted::ScriptedTask`]: a choice-reaction environment that shows
//!   stimuli in the visual buffer and scores key presses.
//! - [`motor::MotorModule`]: manual and vocal modules that turn `+manual>` /
//!   `+vocal>` requests into timed task callbacks.
//! - [`model_file::ModelFile`]: a TOML description of a whole model.
//! - [`batch::run_batch`]: repeated runs with distinct seeds, analysed
//!   through [`cogz_core::task::Task::analyze`].

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod batch;
pub mod model_file;
pub mod motor;
pub mod scripted;

pub use batch::{BatchReport, run_batch};
pub use model_file::ModelFile;
pub use motor::MotorModule;
pub use scripted::ScriptedTask;
