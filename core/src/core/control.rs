// flowline/src/core/control.rs

//! Flow-control signals returned by handlers and the outcome of a full run.

/// Returned by every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  /// Keep going with the remaining handlers and steps.
  Continue,
  /// Halt the pipeline now. Nothing after the current handler runs.
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  /// Every step ran (or was legitimately skipped).
  Completed,
  /// A handler returned [`PipelineControl::Stop`].
  Stopped,
}
