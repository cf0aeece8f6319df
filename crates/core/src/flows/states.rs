use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Retrieving,
    Generating,
    Evaluating,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    ContextRetrieved,
    RetrievalFailed,
    DirectiveDetected,
    GuardrailPassed,
    GuardrailBlocked,
    EvaluationFinished,
}

/// Per-request counters the transition function needs to decide the next state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub evaluations_completed: u32,
    pub max_evaluations: u32,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self { evaluations_completed: 0, max_evaluations: 5 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowAction {
    Generate,
    Evaluate,
    RespondWithReply,
    SubstituteSafeMessage,
    RespondNoData,
    RespondCalculationUnavailable,
    AppendAudit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub event: WorkflowEvent,
    pub actions: Vec<WorkflowAction>,
}
