//! # COGZ Core Library
//!
//! A cognitive-architecture simulation engine. Symbolic condition-action
//! rules ("productions") run against a discrete-event timeline to model
//! human task performance:
//!
//! - **Declarative memory**: chunks retrieved by activation (Anderson &
//!   Lebiere, 1998): base-level decay, spreading activation, partial
//!   matching and logistic noise.
//! - **Procedural memory**: productions matched against buffers, chosen by
//!   noisy utility, learned from reward.
//! - **Production compilation**: new productions synthesized from two
//!   adjacent firings (Taatgen & Anderson, 2002).
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────┐   pop    ┌────────────────────────────────────────┐
//!  │ EventQueue │────────▶ │ Model                                  │
//!  └────────────┘          │  task.update → modules (fixed order)   │
//!        ▲                 │  → declarative → imaginal → procedural │
//!        │ schedule        └──────────────┬─────────────────────────┘
//!        │                                │ read / write
//!        │                 ┌──────────────▼───────────┐
//!        └──────────────── │ Buffers (+ status chunks) │
//!                          └──────────────────────────┘
//! ```
//!
//! Everything runs on one thread; "threads" are goal-lineage tags.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod declarative;
pub mod error;
pub mod event;
pub mod model;
pub mod module;
pub mod procedural;
pub mod symbol;
pub mod task;
pub mod trace;

pub use config::CogzConfig;
pub use error::{CogzError, Diagnostic};
pub use model::{Model, ModelBuilder, ProductionDraft, RunOutcome, RunStats, StopHandle};
pub use symbol::{Interner, Symbol};
