//! Ordered execution of named, fallible stages.

use std::fmt::Display;
use std::time::Instant;
use tracing::{debug, error};

/// Operation run by a stage.
pub type StageFn<'a, S, E> = Box<dyn FnOnce(S) -> Result<S, E> + 'a>;

/// A named step of a pipeline.
pub struct Stage<'a, S, E> {
    name: String,
    run: StageFn<'a, S, E>,
}

impl<S, E> Stage<'_, S, E> {
    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs stages strictly in order, threading state from one to the next.
///
/// The first failing stage ends the run and its error is returned as is.
/// Effects of earlier stages are not undone.
pub struct Pipeline<'a, S, E> {
    stages: Vec<Stage<'a, S, E>>,
}

impl<S, E> Default for Pipeline<'_, S, E> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<'a, S, E: Display> Pipeline<'a, S, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn stage<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(S) -> Result<S, E> + 'a,
    {
        self.stages.push(Stage {
            name: name.into(),
            run: Box::new(run),
        });
        self
    }

    /// Stage names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage against `initial`.
    pub fn run(self, initial: S) -> Result<S, E> {
        let mut state = initial;
        for stage in self.stages {
            let start = Instant::now();
            debug!(stage = %stage.name, "Running stage");

            state = match (stage.run)(state) {
                Ok(state) => state,
                Err(e) => {
                    error!(stage = %stage.name, error = %e, "Stage failed");
                    return Err(e);
                }
            };

            debug!(
                stage = %stage.name,
                duration_ms = start.elapsed().as_millis() as u64,
                "Finished stage"
            );
        }
        Ok(state)
    }
}
