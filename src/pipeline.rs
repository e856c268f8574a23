// src/pipeline.rs - ordered step execution
//! Ordered execution of [`Step`]s.
//!
//! A pipeline stops at the first step that does not succeed. The cancellation
//! token is checked at every step boundary as well as inside each step, so a
//! stop request is noticed within one poll interval even when a step's own
//! condition never sleeps.

use crate::step::{Step, StepContext, StepOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    Failure { step: String, reason: String },
    Cancelled { step: String },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    prefix: String,
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            steps,
        }
    }

    /// Prefix for step announcements, e.g. `[12mm] `.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub async fn run(&self, ctx: &mut StepContext) -> PipelineOutcome {
        tracing::info!(pipeline = %self.name, steps = self.steps.len(), "Running pipeline");
        for step in &self.steps {
            if ctx.token.is_cancelled() {
                return self.cancelled(step.name());
            }
            if let Some(message) = step.announcement() {
                ctx.reporter.info(format!("{}{}", self.prefix, message));
            }
            tracing::info!(pipeline = %self.name, step = step.name(), "Running step");
            match step.attempt(ctx).await {
                Ok(StepOutcome::Success) => {}
                Ok(StepOutcome::Cancelled) => return self.cancelled(step.name()),
                Ok(StepOutcome::Failure) => {
                    return PipelineOutcome::Failure {
                        step: step.name().to_string(),
                        reason: format!(
                            "{} not satisfied within {}",
                            step.condition(),
                            step.attempts()
                        ),
                    };
                }
                Err(e) => {
                    tracing::error!(
                        pipeline = %self.name,
                        step = step.name(),
                        error = %e,
                        "Step raised a fault"
                    );
                    return PipelineOutcome::Failure {
                        step: step.name().to_string(),
                        reason: e.to_string(),
                    };
                }
            }
        }
        if ctx.token.is_cancelled() {
            let last = self.steps.last().map(|s| s.name()).unwrap_or(self.name.as_str());
            return self.cancelled(last);
        }
        tracing::info!(pipeline = %self.name, "Pipeline completed");
        PipelineOutcome::Success
    }

    fn cancelled(&self, step: &str) -> PipelineOutcome {
        tracing::info!(pipeline = %self.name, step, "Pipeline cancelled");
        PipelineOutcome::Cancelled { step: step.to_string() }
    }
}
