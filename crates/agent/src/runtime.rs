use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use ledgerlens_core::audit::{AuditEntry, AuditLog};
use ledgerlens_core::domain::document::Document;
use ledgerlens_core::domain::role::Role;
use ledgerlens_core::errors::{ApplicationError, DomainError};
use ledgerlens_core::flows::{
    FlowContext, FlowEngine, RetrievalAugmentedFlow, WorkflowAction, WorkflowEvent, WorkflowState,
};
use ledgerlens_core::retrieval::{RetrievalResult, SecureRetriever};

use crate::conversation::ConversationState;
use crate::directive::{parse_reply, ModelReply};
use crate::guardrails::{GuardrailEngine, GuardrailOutcome};
use crate::llm::{LlmClient, LlmError};
use crate::sandbox::{render_for_model, SandboxedEvaluator};

pub const NO_DATA_MESSAGE: &str = "No data is available to answer this question right now.";
pub const CALCULATION_UNAVAILABLE_MESSAGE: &str =
    "I could not complete the calculation needed to answer this question.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub top_k: usize,
    pub max_evaluations: u32,
    pub llm_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { top_k: 3, max_evaluations: 5, llm_timeout: Duration::from_secs(30) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowOutcome {
    pub response: String,
    pub guardrail_triggered: bool,
    pub evaluations: u32,
    pub documents: Vec<Document>,
}

pub fn invalid_role_message(role_name: &str) -> String {
    format!("Invalid role: {role_name}. Use {}", Role::accepted_names())
}

/// Owns every collaborator of a question/answer exchange. Cheap to share
/// behind an `Arc`; all per-request state lives in [`ConversationState`].
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    retriever: SecureRetriever,
    guardrails: GuardrailEngine,
    evaluator: SandboxedEvaluator,
    audit: Arc<dyn AuditLog>,
    flow: FlowEngine<RetrievalAugmentedFlow>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: SecureRetriever,
        guardrails: GuardrailEngine,
        evaluator: SandboxedEvaluator,
        audit: Arc<dyn AuditLog>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            guardrails,
            evaluator,
            audit,
            flow: FlowEngine::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn retriever(&self) -> &SecureRetriever {
        &self.retriever
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Text-in/text-out entry point. Never fails: an unknown role or a
    /// collaborator outage is rendered as a user-facing message.
    pub async fn ask(&self, question: &str, role_name: &str) -> String {
        let role = match role_name.parse::<Role>() {
            Ok(role) => role,
            Err(_) => return invalid_role_message(role_name),
        };

        let correlation_id = Uuid::new_v4().to_string();
        match self.answer_with_correlation(question, role, &correlation_id).await {
            Ok(outcome) => outcome.response,
            Err(error) => error.into_interface(correlation_id).user_message().to_string(),
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        role: Role,
    ) -> Result<WorkflowOutcome, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.answer_with_correlation(question, role, &correlation_id).await
    }

    pub async fn answer_with_correlation(
        &self,
        question: &str,
        role: Role,
        correlation_id: &str,
    ) -> Result<WorkflowOutcome, ApplicationError> {
        let span = tracing::info_span!("workflow", correlation_id = %correlation_id, role = %role);
        self.run_workflow(question, role, correlation_id).instrument(span).await
    }

    /// Access-filtered context for display, without generation or audit.
    pub async fn retrieve_for_display(
        &self,
        question: &str,
        role: Role,
    ) -> Result<RetrievalResult, ApplicationError> {
        self.retriever
            .retrieve(question, role, self.settings.top_k)
            .await
            .map_err(|error| ApplicationError::Retrieval(error.to_string()))
    }

    async fn run_workflow(
        &self,
        question: &str,
        role: Role,
        correlation_id: &str,
    ) -> Result<WorkflowOutcome, ApplicationError> {
        let mut state = ConversationState::new(role, question);
        let mut current = self.flow.initial_state();

        let mut event = match self.retriever.retrieve(question, role, self.settings.top_k).await {
            Ok(context) => {
                state.attach_context(context);
                WorkflowEvent::ContextRetrieved
            }
            Err(retrieval_error) => {
                warn!(
                    event_name = "workflow.retrieval_failed",
                    correlation_id = %correlation_id,
                    error = %retrieval_error,
                    "retrieval failed, answering without data"
                );
                WorkflowEvent::RetrievalFailed
            }
        };

        let mut reply: Option<ModelReply> = None;
        let mut guard: Option<GuardrailOutcome> = None;
        let mut response = String::new();

        loop {
            let context = FlowContext {
                evaluations_completed: state.evaluations,
                max_evaluations: self.settings.max_evaluations,
            };
            let transition =
                self.flow.apply(&current, &event, &context).map_err(DomainError::from)?;
            current = transition.to;

            let mut next_event = None;
            for action in transition.actions {
                match action {
                    WorkflowAction::Generate => {
                        let generated = self.generate(&state).await?;
                        if generated.has_directive() {
                            next_event = Some(WorkflowEvent::DirectiveDetected);
                        } else {
                            let outcome =
                                self.guardrails.check(&state.context_text, &generated.text);
                            next_event = Some(if outcome.is_blocked() {
                                WorkflowEvent::GuardrailBlocked
                            } else {
                                WorkflowEvent::GuardrailPassed
                            });
                            guard = Some(outcome);
                        }
                        reply = Some(generated);
                    }
                    WorkflowAction::Evaluate => {
                        let Some(requested) = reply.take() else {
                            return Err(missing_step("evaluation requested without a model reply"));
                        };
                        let program = requested
                            .directive
                            .as_ref()
                            .map(|directive| directive.program.clone())
                            .unwrap_or_default();
                        let outcome = self.evaluator.evaluate_async(program).await;
                        info!(
                            event_name = "workflow.evaluated",
                            correlation_id = %correlation_id,
                            iteration = state.evaluations + 1,
                            succeeded = outcome.is_ok(),
                            "calculation evaluated"
                        );
                        state.record_evaluation(&requested.text, render_for_model(&outcome));
                        next_event = Some(WorkflowEvent::EvaluationFinished);
                    }
                    WorkflowAction::RespondWithReply => match guard.take() {
                        Some(GuardrailOutcome::Pass(text)) => response = text,
                        _ => return Err(missing_step("reply requested without a passing check")),
                    },
                    WorkflowAction::SubstituteSafeMessage => match guard.take() {
                        Some(GuardrailOutcome::Block { reason, safe_message }) => {
                            warn!(
                                event_name = "guardrail.blocked",
                                correlation_id = %correlation_id,
                                reason = reason.reason_code(),
                                "response replaced by safe message"
                            );
                            state.guardrail_triggered = true;
                            response = safe_message;
                        }
                        _ => return Err(missing_step("safe message requested without a block")),
                    },
                    WorkflowAction::RespondNoData => response = NO_DATA_MESSAGE.to_string(),
                    WorkflowAction::RespondCalculationUnavailable => {
                        warn!(
                            event_name = "workflow.evaluation_cap_reached",
                            correlation_id = %correlation_id,
                            evaluations = state.evaluations,
                            "calculation loop hit its iteration cap"
                        );
                        response = CALCULATION_UNAVAILABLE_MESSAGE.to_string();
                    }
                    WorkflowAction::AppendAudit => {
                        self.append_audit(&state, &response, correlation_id);
                    }
                }
            }

            if current == WorkflowState::Done {
                break;
            }
            event = next_event
                .ok_or_else(|| missing_step("workflow stalled without a follow-up event"))?;
        }

        info!(
            event_name = "workflow.completed",
            correlation_id = %correlation_id,
            guardrail_triggered = state.guardrail_triggered,
            evaluations = state.evaluations,
            documents = state.context.len(),
            "exchange completed"
        );

        Ok(WorkflowOutcome {
            response,
            guardrail_triggered: state.guardrail_triggered,
            evaluations: state.evaluations,
            documents: state.context.documents().cloned().collect(),
        })
    }

    async fn generate(&self, state: &ConversationState) -> Result<ModelReply, ApplicationError> {
        let instruction = state.system_instruction();
        let call = self.llm.generate(&instruction, &state.history);

        match tokio::time::timeout(self.settings.llm_timeout, call).await {
            Ok(Ok(text)) => Ok(parse_reply(text)),
            Ok(Err(llm_error)) => Err(ApplicationError::Generation(llm_error.to_string())),
            Err(_) => Err(ApplicationError::Generation(
                LlmError::Timeout(self.settings.llm_timeout.as_secs()).to_string(),
            )),
        }
    }

    fn append_audit(&self, state: &ConversationState, response: &str, correlation_id: &str) {
        let entry = AuditEntry::for_exchange(
            state.role,
            state.question.clone(),
            &state.context,
            response,
            state.guardrail_triggered,
        );
        if let Err(audit_error) = self.audit.append(&entry) {
            error!(
                event_name = "audit.persist_failed",
                correlation_id = %correlation_id,
                error = %audit_error,
                "failed to persist audit entry"
            );
        }
    }
}

fn missing_step(detail: &str) -> ApplicationError {
    ApplicationError::Domain(DomainError::IncompleteWorkflow(detail.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use ledgerlens_core::audit::{AuditEntry, AuditError, AuditLog, InMemoryAuditLog};
    use ledgerlens_core::domain::document::ScoredDocument;
    use ledgerlens_core::domain::role::Role;
    use ledgerlens_core::domain::sensitivity::SensitivityLabel;
    use ledgerlens_core::errors::{ApplicationError, InterfaceError};
    use ledgerlens_core::policy::AccessPolicy;
    use ledgerlens_core::retrieval::{DocumentIndex, RetrievalError, SecureRetriever};
    use ledgerlens_store::seeded_index;

    use super::{
        missing_step, AgentRuntime, RuntimeSettings, CALCULATION_UNAVAILABLE_MESSAGE,
        NO_DATA_MESSAGE,
    };
    use crate::guardrails::GuardrailEngine;
    use crate::llm::{ChatMessage, LlmClient, LlmError};
    use crate::providers::ExtractiveClient;
    use crate::sandbox::SandboxedEvaluator;

    /// Replays canned replies and records every instruction it receives.
    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), calls: Mutex::default() }
        }

        fn repeating(reply: &str, times: usize) -> Self {
            Self::new((0..times).map(|_| Ok(reply.to_string())).collect())
        }

        fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
        }

        fn last_history(&self) -> Vec<ChatMessage> {
            self.calls
                .lock()
                .ok()
                .and_then(|calls| calls.last().map(|(_, history)| history.clone()))
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(
            &self,
            system_instruction: &str,
            history: &[ChatMessage],
        ) -> Result<String, LlmError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((system_instruction.to_string(), history.to_vec()));
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or(Err(LlmError::EmptyResponse))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct PendingLlm;

    #[async_trait]
    impl LlmClient for PendingLlm {
        async fn generate(&self, _: &str, _: &[ChatMessage]) -> Result<String, LlmError> {
            std::future::pending().await
        }

        fn model_name(&self) -> &str {
            "pending"
        }
    }

    /// Counts searches over the seeded corpus.
    struct CountingIndex {
        inner: ledgerlens_store::InMemoryDocumentIndex,
        searches: AtomicUsize,
    }

    #[async_trait]
    impl DocumentIndex for CountingIndex {
        async fn search(
            &self,
            query: &str,
            k: usize,
        ) -> Result<Vec<ScoredDocument>, RetrievalError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search(query, k).await
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl DocumentIndex for BrokenIndex {
        async fn search(&self, _: &str, _: usize) -> Result<Vec<ScoredDocument>, RetrievalError> {
            Err(RetrievalError::Unavailable("vector store offline".to_string()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    struct FailingAuditLog;

    impl AuditLog for FailingAuditLog {
        fn append(&self, _: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Io(std::io::Error::other("disk full")))
        }
    }

    struct Harness {
        runtime: AgentRuntime,
        audit: InMemoryAuditLog,
        index: Arc<CountingIndex>,
    }

    fn harness_with(llm: Arc<dyn LlmClient>, settings: RuntimeSettings) -> Harness {
        let index =
            Arc::new(CountingIndex { inner: seeded_index(), searches: AtomicUsize::new(0) });
        let audit = InMemoryAuditLog::default();
        let runtime = AgentRuntime::new(
            llm,
            SecureRetriever::new(index.clone(), AccessPolicy::standard()),
            GuardrailEngine::standard().expect("guardrails"),
            SandboxedEvaluator::default(),
            Arc::new(audit.clone()),
            settings,
        );
        Harness { runtime, audit, index }
    }

    fn harness(llm: Arc<dyn LlmClient>) -> Harness {
        harness_with(llm, RuntimeSettings::default())
    }

    #[tokio::test]
    async fn unknown_role_has_no_side_effects() {
        let llm = Arc::new(ScriptedLlm::repeating("unused", 1));
        let harness = harness(llm.clone());

        let response = harness.runtime.ask("Test query", "hacker").await;

        assert_eq!(
            response,
            "Invalid role: hacker. Use 'analyst', 'product_manager', or 'executive'"
        );
        assert_eq!(llm.call_count(), 0);
        assert_eq!(harness.index.searches.load(Ordering::SeqCst), 0);
        assert!(harness.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn executive_answer_uses_insider_context_and_is_audited() {
        let harness = harness(Arc::new(ExtractiveClient::new(3)));

        let outcome = harness
            .runtime
            .answer("What is the status of Project Blackwell?", Role::Executive)
            .await
            .expect("answer");

        assert!(outcome.response.contains("TSMC"));
        assert!(!outcome.guardrail_triggered);
        let entries = harness.audit.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].sensitivities_touched.contains(&SensitivityLabel::Insider));
        assert_eq!(entries[0].response_length, outcome.response.chars().count());
    }

    #[tokio::test]
    async fn analyst_answer_never_reaches_insider_content() {
        let harness = harness(Arc::new(ExtractiveClient::new(3)));

        let response =
            harness.runtime.ask("What is the status of Project Blackwell?", "analyst").await;

        assert!(!response.contains("TSMC"));
        let entries = harness.audit.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0]
            .sensitivities_touched
            .iter()
            .all(|label| *label == SensitivityLabel::Public));
    }

    #[tokio::test]
    async fn calculation_result_is_fed_back_before_the_final_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("Let me compute.\n```python\nresult = 18.12 * 1.10\n```".to_string()),
            Ok("Q3 revenue grown by 10% would be about $19.93 billion.".to_string()),
        ]));
        let harness = harness(llm.clone());

        let outcome = harness
            .runtime
            .answer("What is Q3 revenue plus 10%?", Role::Analyst)
            .await
            .expect("answer");

        assert_eq!(outcome.response, "Q3 revenue grown by 10% would be about $19.93 billion.");
        assert_eq!(outcome.evaluations, 1);
        assert_eq!(llm.call_count(), 2);
        let history = llm.last_history();
        assert!(history
            .last()
            .is_some_and(|message| message.content.starts_with("Calculated Result: 19.932")));
        assert_eq!(harness.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn evaluation_loop_is_capped() {
        let directive = "```python\nresult = 1 + 1\n```";
        let llm = Arc::new(ScriptedLlm::repeating(directive, 10));
        let settings = RuntimeSettings { max_evaluations: 2, ..RuntimeSettings::default() };
        let harness = harness_with(llm.clone(), settings);

        let outcome =
            harness.runtime.answer("Compute forever", Role::Analyst).await.expect("answer");

        assert_eq!(outcome.response, CALCULATION_UNAVAILABLE_MESSAGE);
        assert_eq!(outcome.evaluations, 2);
        assert_eq!(llm.call_count(), 3);
        assert_eq!(harness.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn blocked_answer_is_substituted_and_audited_as_triggered() {
        let llm = Arc::new(ScriptedLlm::repeating("Reach the CFO at john@company.com.", 1));
        let harness = harness(llm);

        let outcome = harness
            .runtime
            .answer("Who should I contact?", Role::Executive)
            .await
            .expect("answer");

        assert_eq!(outcome.response, "[BLOCKED: email detected in response]");
        assert!(outcome.guardrail_triggered);
        let entries = harness.audit.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].guardrail_triggered);
        assert_eq!(entries[0].response_length, outcome.response.chars().count());
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_without_generation_or_audit() {
        let llm = Arc::new(ScriptedLlm::repeating("unused", 1));
        let audit = InMemoryAuditLog::default();
        let runtime = AgentRuntime::new(
            llm.clone(),
            SecureRetriever::new(Arc::new(BrokenIndex), AccessPolicy::standard()),
            GuardrailEngine::standard().expect("guardrails"),
            SandboxedEvaluator::default(),
            Arc::new(audit.clone()),
            RuntimeSettings::default(),
        );

        let outcome = runtime.answer("Q3 revenue?", Role::Analyst).await.expect("answer");

        assert_eq!(outcome.response, NO_DATA_MESSAGE);
        assert_eq!(llm.call_count(), 0);
        assert!(audit.entries().is_empty());
    }

    #[tokio::test]
    async fn model_failure_is_a_generation_error_and_ask_degrades() {
        let failing = || {
            Arc::new(ScriptedLlm::new(vec![Err(LlmError::Status {
                status: 503,
                body: "overloaded".to_string(),
            })]))
        };

        let harness = harness(failing());
        let error = harness
            .runtime
            .answer("Q3 revenue?", Role::Analyst)
            .await
            .expect_err("model failure surfaces");
        assert!(matches!(error, ApplicationError::Generation(_)));

        let harness = harness_with(failing(), RuntimeSettings::default());
        let response = harness.runtime.ask("Q3 revenue?", "analyst").await;
        assert_eq!(response, "The assistant is temporarily unavailable. Please retry shortly.");
        assert!(harness.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn audit_failure_does_not_abort_the_answer() {
        let runtime = AgentRuntime::new(
            Arc::new(ExtractiveClient::new(3)),
            SecureRetriever::new(Arc::new(seeded_index()), AccessPolicy::standard()),
            GuardrailEngine::standard().expect("guardrails"),
            SandboxedEvaluator::default(),
            Arc::new(FailingAuditLog),
            RuntimeSettings::default(),
        );

        let outcome = runtime.answer("What was Q3 revenue?", Role::Analyst).await.expect("answer");

        assert!(outcome.response.contains("$18.12"));
    }

    #[tokio::test]
    async fn slow_model_times_out_as_generation_error() {
        let settings = RuntimeSettings {
            llm_timeout: Duration::from_millis(20),
            ..RuntimeSettings::default()
        };
        let harness = harness_with(Arc::new(PendingLlm), settings);

        let error =
            harness.runtime.answer("Q3 revenue?", Role::Analyst).await.expect_err("timeout");

        assert!(matches!(
            error,
            ApplicationError::Generation(ref message) if message.contains("timed out")
        ));
        assert!(harness.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn dropped_request_writes_no_audit_entry() {
        let harness = harness(Arc::new(PendingLlm));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            harness.runtime.answer("Q3 revenue?", Role::Executive),
        )
        .await;

        assert!(cancelled.is_err(), "request should still be pending when dropped");
        assert!(harness.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn retrieve_for_display_respects_the_role() {
        let harness = harness(Arc::new(ExtractiveClient::default()));

        let result = harness
            .runtime
            .retrieve_for_display("blackwell delay legal", Role::ProductManager)
            .await
            .expect("retrieve");

        assert!(result.len() <= 3);
        assert!(!result.sensitivities().contains(&SensitivityLabel::Insider));
        assert!(harness.audit.entries().is_empty());
    }

    #[test]
    fn stalled_workflow_surfaces_as_internal_error() {
        let interface =
            missing_step("workflow stalled without a follow-up event").into_interface("req-9");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
