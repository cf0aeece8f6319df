use thiserror::Error;

use crate::flows::states::{
    FlowContext, TransitionOutcome, WorkflowAction, WorkflowEvent, WorkflowState,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> WorkflowState;
    fn transition(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Retrieve → Generate → (Evaluate → Generate)* → Done.
#[derive(Clone, Debug, Default)]
pub struct RetrievalAugmentedFlow;

impl FlowDefinition for RetrievalAugmentedFlow {
    fn initial_state(&self) -> WorkflowState {
        WorkflowState::Retrieving
    }

    fn transition(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_retrieval_augmented(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> WorkflowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<RetrievalAugmentedFlow> {
    fn default() -> Self {
        Self::new(RetrievalAugmentedFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WorkflowState, event: WorkflowEvent },
}

fn transition_retrieval_augmented(
    current: &WorkflowState,
    event: &WorkflowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use WorkflowAction::{
        AppendAudit, Evaluate, Generate, RespondCalculationUnavailable, RespondNoData,
        RespondWithReply, SubstituteSafeMessage,
    };
    use WorkflowEvent::{
        ContextRetrieved, DirectiveDetected, EvaluationFinished, GuardrailBlocked,
        GuardrailPassed, RetrievalFailed,
    };
    use WorkflowState::{Done, Evaluating, Generating, Retrieving};

    let (to, actions) = match (current, event) {
        (Retrieving, ContextRetrieved) => (Generating, vec![Generate]),
        (Retrieving, RetrievalFailed) => (Done, vec![RespondNoData]),
        (Generating, DirectiveDetected) => {
            if context.evaluations_completed >= context.max_evaluations {
                (Done, vec![RespondCalculationUnavailable, AppendAudit])
            } else {
                (Evaluating, vec![Evaluate])
            }
        }
        (Generating, GuardrailPassed) => (Done, vec![RespondWithReply, AppendAudit]),
        (Generating, GuardrailBlocked) => (Done, vec![SubstituteSafeMessage, AppendAudit]),
        (Evaluating, EvaluationFinished) => (Generating, vec![Generate]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
