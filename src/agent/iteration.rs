//! Iteration accounting for the agent loop.
//!
//! One [`IterationManager`] tracks a single multi-turn conversation:
//! iteration numbers form the contiguous sequence `1, 2, …, k`, at most one
//! iteration is active at a time, and nothing starts after termination.
//! `can_continue` folds the three budgets together (wall clock, iteration
//! count, cancellation), and termination reasons resolve with the fixed
//! precedence cancelled > timeout > max_iterations > natural_completion.

use std::time::{Duration, Instant};

use crate::cancel::CancellationHandle;
use crate::error::{Error, Result};

/// Why the agent loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTermination {
    Cancelled,
    Timeout,
    MaxIterations,
    NaturalCompletion,
}

impl std::fmt::Display for LoopTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopTermination::Cancelled => "cancelled",
            LoopTermination::Timeout => "timeout",
            LoopTermination::MaxIterations => "max_iterations",
            LoopTermination::NaturalCompletion => "natural_completion",
        };
        write!(f, "{s}")
    }
}

/// Result of completing one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationOutcome {
    pub iteration: u32,
    pub duration_ms: i64,
    pub can_continue: bool,
    /// Set when `can_continue` is false.
    pub termination_reason: Option<LoopTermination>,
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationMetrics {
    pub total_time_ms: u64,
    pub iterations: u32,
    pub current_iteration: Option<u32>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub mean_duration_ms: Option<f64>,
    pub terminated: bool,
    pub reason: Option<LoopTermination>,
}

/// Tracks iteration lifecycle and budgets for one conversation.
#[derive(Debug)]
pub struct IterationManager {
    max_iterations: u32,
    timeout: Duration,
    cancel: CancellationHandle,
    started: Instant,
    active: Option<(u32, Instant)>,
    completed: u32,
    durations_ms: Vec<i64>,
    terminated: Option<LoopTermination>,
}

impl IterationManager {
    pub fn new(max_iterations: u32, timeout: Duration, cancel: CancellationHandle) -> Self {
        Self {
            max_iterations,
            timeout,
            cancel,
            started: Instant::now(),
            active: None,
            completed: 0,
            durations_ms: Vec::new(),
            terminated: None,
        }
    }

    /// Begin the next iteration. Fails while another iteration is active or
    /// after termination.
    pub fn start_iteration(&mut self) -> Result<u32> {
        if let Some(reason) = self.terminated {
            return Err(Error::validation(format!(
                "cannot start an iteration: conversation already terminated ({reason})"
            )));
        }
        if let Some((number, _)) = self.active {
            return Err(Error::validation(format!(
                "cannot start an iteration while iteration {number} is active"
            )));
        }
        let number = self.completed + 1;
        self.active = Some((number, Instant::now()));
        Ok(number)
    }

    /// Complete the active iteration, measuring its duration.
    pub fn complete_iteration(&mut self) -> Result<IterationOutcome> {
        let elapsed = self
            .active
            .map(|(_, started)| started.elapsed().as_millis() as i64);
        match elapsed {
            Some(ms) => self.complete_iteration_with(ms),
            None => Err(Error::validation(
                "cannot complete an iteration: none is active",
            )),
        }
    }

    /// Complete the active iteration with an externally measured duration.
    /// Negative durations indicate clock skew; they are recorded as-is and
    /// flagged.
    pub fn complete_iteration_with(&mut self, duration_ms: i64) -> Result<IterationOutcome> {
        let Some((number, _)) = self.active.take() else {
            return Err(Error::validation(
                "cannot complete an iteration: none is active",
            ));
        };
        if duration_ms < 0 {
            log::warn!("iteration {number} reported negative duration {duration_ms}ms (clock skew)");
        }
        self.completed = number;
        self.durations_ms.push(duration_ms);

        let can_continue = self.can_continue();
        let termination_reason = if can_continue {
            None
        } else {
            let reason = self.determine_termination_reason();
            self.terminated = Some(reason);
            Some(reason)
        };
        Ok(IterationOutcome {
            iteration: number,
            duration_ms,
            can_continue,
            termination_reason,
        })
    }

    /// True iff no budget has been exhausted.
    pub fn can_continue(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.started.elapsed() < self.timeout
            && self.completed < self.max_iterations
            && self.terminated.is_none()
    }

    /// Resolve the termination reason by fixed precedence.
    pub fn determine_termination_reason(&self) -> LoopTermination {
        if self.cancel.is_cancelled() {
            LoopTermination::Cancelled
        } else if self.started.elapsed() >= self.timeout {
            LoopTermination::Timeout
        } else if self.completed >= self.max_iterations {
            LoopTermination::MaxIterations
        } else {
            LoopTermination::NaturalCompletion
        }
    }

    /// Record a terminal state decided outside the budget checks (e.g. the
    /// model finished naturally). Later terminations do not overwrite.
    pub fn terminate(&mut self, reason: LoopTermination) {
        self.active = None;
        if self.terminated.is_none() {
            self.terminated = Some(reason);
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }

    pub fn metrics(&self) -> IterationMetrics {
        let mean = if self.durations_ms.is_empty() {
            None
        } else {
            Some(self.durations_ms.iter().sum::<i64>() as f64 / self.durations_ms.len() as f64)
        };
        IterationMetrics {
            total_time_ms: self.started.elapsed().as_millis() as u64,
            iterations: self.completed,
            current_iteration: self.active.map(|(number, _)| number),
            min_duration_ms: self.durations_ms.iter().copied().min(),
            max_duration_ms: self.durations_ms.iter().copied().max(),
            mean_duration_ms: mean,
            terminated: self.terminated.is_some(),
            reason: self.terminated,
        }
    }
}
