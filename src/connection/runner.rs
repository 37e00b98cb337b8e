//! Drives a connection workflow from the event channel

use a2dp_switcher_core::{ConnectionWorkflow, Transition, WorkflowEvent, WorkflowState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Workflow reached a terminal state
    Finished(WorkflowState),
    /// Gave up waiting; the workflow was still in this state
    TimedOut(WorkflowState),
    /// Event source went away before the workflow finished
    ChannelClosed(WorkflowState),
}

impl RunOutcome {
    pub fn state(&self) -> WorkflowState {
        match self {
            RunOutcome::Finished(state)
            | RunOutcome::TimedOut(state)
            | RunOutcome::ChannelClosed(state) => *state,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Finished(WorkflowState::Success))
    }
}

/// Runner settings
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Upper bound on the whole run. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Wait the terminal state's dismiss delay before returning
    pub linger: bool,
}

pub struct WorkflowRunner {
    config: RunnerConfig,
}

impl WorkflowRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Deliver events in arrival order until the workflow finishes
    pub async fn run(
        &self,
        workflow: &mut ConnectionWorkflow,
        events: &mut mpsc::Receiver<WorkflowEvent>,
    ) -> RunOutcome {
        let outcome = match self.config.timeout {
            Some(limit) => match timeout(limit, drive(workflow, events)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        "[WORKFLOW] No result after {:?}, still {:?}",
                        limit,
                        workflow.state()
                    );
                    RunOutcome::TimedOut(workflow.state())
                }
            },
            None => drive(workflow, events).await,
        };

        if self.config.linger {
            if let Some(delay) = outcome.state().dismiss_delay() {
                sleep(delay).await;
            }
        }

        outcome
    }
}

async fn drive(
    workflow: &mut ConnectionWorkflow,
    events: &mut mpsc::Receiver<WorkflowEvent>,
) -> RunOutcome {
    if workflow.is_finished() {
        return RunOutcome::Finished(workflow.state());
    }

    if workflow.bind_rejected() {
        warn!("[WORKFLOW] Service bind was refused; waiting for it to become available");
    }

    info!("[WORKFLOW] {}", workflow.state());

    while let Some(event) = events.recv().await {
        debug!("[WORKFLOW] Event: {:?}", event);

        match workflow.handle_event(event) {
            Transition::Moved { to, .. } => info!("[WORKFLOW] {}", to),
            Transition::Finished(state) => {
                info!("[WORKFLOW] {}", state);
                return RunOutcome::Finished(state);
            }
            Transition::Unchanged(_) | Transition::Ignored => {}
        }
    }

    warn!("[WORKFLOW] Event channel closed in {:?}", workflow.state());
    RunOutcome::ChannelClosed(workflow.state())
}
