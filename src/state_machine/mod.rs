// Assignment lifecycle state machine
//
// active -> completed | reassigned | cancelled. Terminal states accept no events.

pub mod assignment_state_machine;
pub mod errors;
pub mod events;
pub mod states;

// Re-export main types for convenient access
pub use assignment_state_machine::{AppliedTransition, AssignmentStateMachine};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::AssignmentEvent;
pub use states::AssignmentState;
