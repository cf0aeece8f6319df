pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, RetrievalAugmentedFlow};
pub use states::{FlowContext, TransitionOutcome, WorkflowAction, WorkflowEvent, WorkflowState};
