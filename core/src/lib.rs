// flowline/src/lib.rs

//! Flowline: an async step pipeline engine.
//!
//! A pipeline is an ordered list of named steps. Each step may carry `before`,
//! `on` and `after` handlers operating on a shared [`ContextData`]. Handlers can
//! stop the pipeline early, steps can be optional or skipped by a predicate, and
//! a [`Registry`] dispatches a context to the pipeline registered for its type.
//!
//! The storefront service expresses session creation, order materialization and
//! callback reconciliation as pipelines so that every stage is logged in its own
//! span and can be reordered or extended without touching the others.

pub mod core;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use crate::core::context::Handler;
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, PipelineResult};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::pipeline::definition::Pipeline;

pub use crate::error::{FlowError, FlowResult};

pub use crate::registry::Registry;
