use chrono::{DateTime, Utc};
use tracing::debug;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::AssignmentEvent,
    states::AssignmentState,
};
use crate::models::Assignment;

/// Record of one applied transition
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    pub from: AssignmentState,
    pub to: AssignmentState,
    pub event: AssignmentEvent,
}

/// Drives an [`Assignment`] through its lifecycle.
///
/// The machine mutates the borrowed record in place; persisting it is the
/// caller's job, which keeps the transition rules usable from both stores.
pub struct AssignmentStateMachine<'a> {
    assignment: &'a mut Assignment,
}

impl<'a> AssignmentStateMachine<'a> {
    pub fn new(assignment: &'a mut Assignment) -> Self {
        Self { assignment }
    }

    pub fn current_state(&self) -> AssignmentState {
        self.assignment.status
    }

    /// Attempt to transition the assignment state
    pub fn transition(&mut self, event: AssignmentEvent) -> StateMachineResult<AppliedTransition> {
        let current_state = self.current_state();
        let target_state = determine_target_state(current_state, &event)?;

        self.check_guards(&event)?;

        if let AssignmentEvent::Complete { at } = &event {
            self.assignment.completed_at = Some(*at);
        }
        self.assignment.status = target_state;

        debug!(
            assignment_id = %self.assignment.id,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            "Assignment transition applied"
        );

        Ok(AppliedTransition {
            from: current_state,
            to: target_state,
            event,
        })
    }

    /// Marks the current assignment reassigned and builds its successor
    pub fn reassign(
        &mut self,
        to_developer: impl Into<String>,
        confidence_score: f64,
        reasoning: impl Into<String>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Assignment> {
        let to_developer = to_developer.into();
        self.transition(AssignmentEvent::Reassign {
            to_developer: to_developer.clone(),
        })?;
        Ok(Assignment::new(
            self.assignment.bug_id.clone(),
            to_developer,
            confidence_score,
            reasoning,
            now,
        ))
    }

    fn check_guards(&self, event: &AssignmentEvent) -> StateMachineResult<()> {
        match event {
            AssignmentEvent::Complete { at } if *at < self.assignment.assigned_at => {
                Err(StateMachineError::CompletionBeforeAssignment {
                    assigned_at: self.assignment.assigned_at,
                    completed_at: *at,
                })
            }
            AssignmentEvent::Reassign { to_developer }
                if *to_developer == self.assignment.developer_id =>
            {
                Err(StateMachineError::GuardFailed {
                    reason: format!(
                        "cannot reassign bug {} to its current developer {to_developer}",
                        self.assignment.bug_id
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Determine the target state based on current state and event
fn determine_target_state(
    current_state: AssignmentState,
    event: &AssignmentEvent,
) -> StateMachineResult<AssignmentState> {
    if current_state.is_terminal() {
        return Err(StateMachineError::AlreadyTerminal {
            state: current_state,
        });
    }

    let target = match (current_state, event) {
        (AssignmentState::Active, AssignmentEvent::Complete { .. }) => AssignmentState::Completed,
        (AssignmentState::Active, AssignmentEvent::Reassign { .. }) => AssignmentState::Reassigned,
        (AssignmentState::Active, AssignmentEvent::Cancel) => AssignmentState::Cancelled,
        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from,
                event: event.event_type(),
            })
        }
    };

    Ok(target)
}
