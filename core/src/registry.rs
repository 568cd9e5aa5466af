// flowline/src/registry.rs

//! A type-keyed pipeline registry: one pipeline per context type.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineResult;
use crate::error::FlowError;
use crate::pipeline::definition::Pipeline;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, Level};

/// Holds pipelines keyed by the `TypeId` of their root context, so callers only
/// need to build a context to run the right workflow.
pub struct Registry<E = FlowError>
where
  E: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pipelines: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
  _err: PhantomData<fn() -> E>,
}

impl<E> Registry<E>
where
  E: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      pipelines: RwLock::new(HashMap::new()),
      _err: PhantomData,
    }
  }

  /// Registers `pipeline`, replacing any pipeline previously registered for `TData`.
  pub fn register_pipeline<TData>(&self, pipeline: Pipeline<TData, E>)
  where
    TData: 'static + Send + Sync,
  {
    event!(Level::DEBUG, context_type = %std::any::type_name::<TData>(), "Registering pipeline.");
    self
      .pipelines
      .write()
      .insert(TypeId::of::<TData>(), Arc::new(pipeline));
  }

  pub fn is_registered<TData: 'static>(&self) -> bool {
    self.pipelines.read().contains_key(&TypeId::of::<TData>())
  }

  /// Runs the pipeline registered for `TData` against `ctx_data`.
  pub async fn run<TData>(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, E>
  where
    TData: 'static + Send + Sync,
  {
    let type_name = std::any::type_name::<TData>();
    let entry = self
      .pipelines
      .read()
      .get(&TypeId::of::<TData>())
      .cloned()
      .ok_or_else(|| {
        event!(Level::ERROR, context_type = %type_name, "No pipeline registered.");
        E::from(FlowError::PipelineNotRegistered {
          type_name: type_name.to_string(),
        })
      })?;

    let pipeline = entry.downcast::<Pipeline<TData, E>>().map_err(|_| {
      E::from(FlowError::TypeMismatch {
        type_name: type_name.to_string(),
      })
    })?;

    pipeline.run(ctx_data).await
  }
}

impl<E> Default for Registry<E>
where
  E: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}
