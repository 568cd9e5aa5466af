// flowline/src/core/context.rs

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use std::future::Future;
use std::pin::Pin;

/// A boxed step handler.
///
/// Handlers take a clone of the pipeline's `ContextData<TData>`, do their work and
/// resolve to a [`PipelineControl`]. Lock guards must not live across `.await`.
pub type Handler<TData, Err> = Box<
  dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = Result<PipelineControl, Err>> + Send>>
    + Send
    + Sync,
>;
