// flowline/src/pipeline/execution.rs

use crate::core::context::Handler;
use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::core::step::StepDef;
use crate::error::FlowError;
use crate::pipeline::definition::Pipeline;
use tracing::{event, info_span, Instrument, Level};

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Runs every step in order against `ctx_data`.
  ///
  /// The first handler error aborts the run and is returned as-is. A handler that
  /// returns [`PipelineControl::Stop`] ends the run with [`PipelineResult::Stopped`].
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(
      Level::DEBUG,
      context_type = %std::any::type_name::<TData>(),
      num_steps = self.steps.len(),
      "Pipeline execution starting."
    );

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let span = info_span!(
        "pipeline_step",
        step_name = step_def.name.as_str(),
        step_index = step_idx,
        optional = step_def.optional
      );
      match self.run_step(step_def, &ctx_data).instrument(span).await? {
        PipelineControl::Continue => {}
        PipelineControl::Stop => return Ok(PipelineResult::Stopped),
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed.");
    Ok(PipelineResult::Completed)
  }

  async fn run_step(&self, step_def: &StepDef<TData>, ctx_data: &ContextData<TData>) -> Result<PipelineControl, Err> {
    if let Some(skip_if) = &step_def.skip_if {
      if skip_if(ctx_data.clone()) {
        event!(Level::INFO, "Step skipped by its skip condition.");
        return Ok(PipelineControl::Continue);
      }
    }

    let name = step_def.name.as_str();
    let phases = [
      ("before", self.before.get(name)),
      ("on", self.on.get(name)),
      ("after", self.after.get(name)),
    ];

    if phases.iter().all(|(_, handlers)| handlers.map_or(true, |h| h.is_empty())) {
      if step_def.optional {
        event!(Level::DEBUG, "Optional step has no handlers, skipping.");
        return Ok(PipelineControl::Continue);
      }
      event!(Level::ERROR, "Non-optional step has no handlers.");
      return Err(Err::from(FlowError::HandlerMissing {
        step_name: step_def.name.clone(),
      }));
    }

    for (phase, handlers) in phases {
      let Some(handlers) = handlers else { continue };
      if Self::run_handlers(phase, handlers, ctx_data).await? == PipelineControl::Stop {
        event!(Level::INFO, phase, "Pipeline stopped by handler.");
        return Ok(PipelineControl::Stop);
      }
    }
    Ok(PipelineControl::Continue)
  }

  async fn run_handlers(
    phase: &'static str,
    handlers: &[Handler<TData, Err>],
    ctx_data: &ContextData<TData>,
  ) -> Result<PipelineControl, Err> {
    for handler_fn in handlers {
      match handler_fn(ctx_data.clone()).await {
        Ok(PipelineControl::Continue) => {}
        Ok(PipelineControl::Stop) => return Ok(PipelineControl::Stop),
        Err(e) => {
          event!(Level::WARN, phase, error = %e, "Handler failed.");
          return Err(e);
        }
      }
    }
    Ok(PipelineControl::Continue)
  }
}
