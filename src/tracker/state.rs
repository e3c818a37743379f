//! Per-resource plan tracking state machine.
//!
//! ```text
//!   Init --first poll--> WaitingForPlan
//!   WaitingForPlan --pending seen--> Streaming
//!   WaitingForPlan --no plan x threshold--> NoPlan*
//!   Streaming --plan-completed/success|warning--> Succeeded*
//!   Streaming --plan-completed/error--> Failed*
//!   Streaming --no plan x retries--> TimedOut*
//!   any --retry budget exhausted--> TimedOut*
//! ```
//!
//! The machine is pure: it consumes snapshots and fetch failures and yields
//! the lines to emit. The poller owns the I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::models::{PlanAttempt, PlanInfo, StepLog, StepStatus, PLAN_COMPLETED_STEP};
use crate::format::helpers::elapsed;

/// How a tracked resource finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed { step_id: String, status: StepStatus },
    NoPlan,
    TimedOut { retries: u32 },
}

/// A newly observed plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLine {
    pub position: usize,
    pub step_id: String,
    pub status: StepStatus,
    pub info: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Step(StepLine),
    Finished(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    Init,
    WaitingForPlan {
        empty_polls: u32,
    },
    Streaming {
        cursor: usize,
        attempt_id: Option<String>,
    },
    Done(Outcome),
}

/// Tracking state of one resource.
#[derive(Debug, Clone)]
pub struct PlanTracker {
    state: TrackerState,
    max_retries: u32,
    no_plan_threshold: u32,
    failures: u32,
}

impl PlanTracker {
    pub fn new(max_retries: u32, no_plan_threshold: u32) -> Self {
        Self {
            state: TrackerState::Init,
            max_retries,
            no_plan_threshold: no_plan_threshold.max(1),
            failures: 0,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, TrackerState::Done(_))
    }

    /// Consume one successful poll.
    pub fn observe(&mut self, plans: &PlanInfo) -> Vec<Transition> {
        // A plan that disappears mid-stream is charged to the retry budget.
        let vanished = plans.pending.is_none() && plans.current.is_none();
        if vanished && matches!(self.state, TrackerState::Streaming { .. }) {
            return self.fetch_failed().into_iter().collect();
        }
        self.failures = 0;

        match &self.state {
            TrackerState::Done(_) => Vec::new(),
            TrackerState::Init | TrackerState::WaitingForPlan { .. } => {
                if let Some(pending) = &plans.pending {
                    return self.start_streaming(pending);
                }

                let empty_polls = match self.state {
                    TrackerState::WaitingForPlan { empty_polls } => empty_polls + 1,
                    _ => 1,
                };
                if empty_polls < self.no_plan_threshold {
                    self.state = TrackerState::WaitingForPlan { empty_polls };
                    return Vec::new();
                }

                // The change may have finished before the first poll.
                match &plans.current {
                    Some(current) => self.start_streaming(current),
                    None => self.finish(Outcome::NoPlan),
                }
            }
            TrackerState::Streaming { cursor, attempt_id } => {
                let Some(attempt) = plans.pending.as_ref().or(plans.current.as_ref()) else {
                    return Vec::new();
                };
                let cursor = if is_same_attempt(attempt_id.as_deref(), attempt) {
                    *cursor
                } else {
                    0
                };
                self.stream(attempt, cursor)
            }
        }
    }

    /// Consume one failed poll. Returns the terminal transition once the retry budget is spent.
    pub fn fetch_failed(&mut self) -> Option<Transition> {
        if self.is_done() {
            return None;
        }
        self.failures += 1;
        if self.failures >= self.max_retries {
            let outcome = Outcome::TimedOut {
                retries: self.failures,
            };
            self.state = TrackerState::Done(outcome.clone());
            return Some(Transition::Finished(outcome));
        }
        None
    }

    fn start_streaming(&mut self, attempt: &PlanAttempt) -> Vec<Transition> {
        self.state = TrackerState::Streaming {
            cursor: 0,
            attempt_id: attempt.plan_attempt_id.clone(),
        };
        self.stream(attempt, 0)
    }

    fn stream(&mut self, attempt: &PlanAttempt, mut cursor: usize) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let log = &attempt.plan_attempt_log;

        while let Some(step) = log.get(cursor) {
            // A running plan-completed step is re-read on the next poll.
            if step.is_plan_completed() && !step.status.is_terminal() {
                break;
            }

            transitions.push(Transition::Step(StepLine {
                position: cursor,
                step_id: step.step_id.clone(),
                status: step.status,
                info: step.last_info().map(String::from),
                elapsed: plan_elapsed(attempt, &log[..=cursor]),
            }));
            cursor += 1;

            if step.is_plan_completed() {
                let outcome = match step.status {
                    StepStatus::Error => Outcome::Failed {
                        step_id: failed_step_id(&log[..cursor]),
                        status: step.status,
                    },
                    _ => Outcome::Succeeded,
                };
                transitions.extend(self.finish(outcome));
                return transitions;
            }
        }

        self.state = TrackerState::Streaming {
            cursor,
            attempt_id: attempt.plan_attempt_id.clone(),
        };
        transitions
    }

    fn finish(&mut self, outcome: Outcome) -> Vec<Transition> {
        self.state = TrackerState::Done(outcome.clone());
        vec![Transition::Finished(outcome)]
    }
}

fn is_same_attempt(tracked: Option<&str>, attempt: &PlanAttempt) -> bool {
    match (tracked, attempt.plan_attempt_id.as_deref()) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Last step that errored before `plan-completed`, else `plan-completed` itself.
fn failed_step_id(steps: &[StepLog]) -> String {
    steps
        .iter()
        .rev()
        .filter(|s| !s.is_plan_completed())
        .find(|s| s.status == StepStatus::Error)
        .map(|s| s.step_id.clone())
        .unwrap_or_else(|| PLAN_COMPLETED_STEP.to_string())
}

/// Time from the attempt start to its end, or to the latest step timestamp seen so far.
fn plan_elapsed(attempt: &PlanAttempt, seen: &[StepLog]) -> Duration {
    let Some(start) = attempt
        .attempt_start_time
        .or_else(|| seen.first().and_then(|s| s.started))
    else {
        return Duration::ZERO;
    };
    let latest: Option<DateTime<Utc>> = seen
        .iter()
        .flat_map(|s| [s.started, s.completed])
        .flatten()
        .max();
    let end = match (attempt.attempt_end_time, latest) {
        (Some(end), _) if seen.last().map_or(false, |s| s.is_plan_completed()) => end,
        (_, Some(latest)) => latest,
        (Some(end), None) => end,
        (None, None) => start,
    };
    elapsed(start, end)
}
