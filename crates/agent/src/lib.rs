//! Agent runtime for role-aware financial question answering.
//!
//! The runtime drives a bounded retrieve → generate → (evaluate → generate)*
//! loop over the core workflow state machine:
//! - `llm`/`providers` - the language model seam and its HTTP and offline backends
//! - `directive` - detects fenced calculation requests in model replies
//! - `sandbox` - a closed arithmetic interpreter for those requests
//! - `guardrails` - PII and unsupported-claim checks on every final answer
//! - `conversation` - per-request history and role-tuned system instructions
//! - `runtime` - `AgentRuntime`, which owns all collaborators explicitly
//!
//! The model never sees documents outside the caller's access grant: context
//! is assembled only from `SecureRetriever` output.

pub mod bootstrap;
pub mod conversation;
pub mod directive;
pub mod guardrails;
pub mod llm;
pub mod providers;
pub mod runtime;
pub mod sandbox;

pub use bootstrap::{build_runtime, BootstrapError};
pub use guardrails::{BlockReason, GuardrailEngine, GuardrailOutcome, PiiKind};
pub use llm::{ChatMessage, LlmClient, LlmError, MessageRole};
pub use runtime::{AgentRuntime, WorkflowOutcome};
pub use sandbox::{EvalError, SandboxLimits, SandboxedEvaluator, Value};
