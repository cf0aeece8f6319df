use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use ledgerlens_core::audit::AuditError;
use ledgerlens_core::config::{AppConfig, LlmProvider};
use ledgerlens_core::policy::AccessPolicy;
use ledgerlens_core::retrieval::{RetrievalSettings, SecureRetriever};
use ledgerlens_store::{seeded_index, JsonlAuditLog};

use crate::guardrails::{GuardrailEngine, GuardrailError, RegexPiiClassifier};
use crate::llm::{LlmClient, LlmError};
use crate::providers::{
    ChatCompletionsSettings, ExtractiveClient, OpenAiCompatibleClient, OPENAI_API_BASE_URL,
};
use crate::runtime::{AgentRuntime, RuntimeSettings};
use crate::sandbox::{SandboxLimits, SandboxedEvaluator};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("model client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("guardrail setup failed: {0}")]
    Guardrails(#[from] GuardrailError),
    #[error("audit log could not be opened: {0}")]
    AuditLog(#[from] AuditError),
    #[error("provider `{provider}` requires llm.base_url")]
    MissingBaseUrl { provider: &'static str },
}

/// Wires every runtime collaborator from a validated [`AppConfig`].
pub fn build_runtime(config: &AppConfig) -> Result<AgentRuntime, BootstrapError> {
    let llm = build_llm_client(config)?;

    let index = Arc::new(seeded_index());
    let retriever = SecureRetriever::with_settings(
        index,
        AccessPolicy::standard(),
        RetrievalSettings {
            oversample_factor: config.retrieval.oversample_factor,
            max_oversample_factor: config.retrieval.max_oversample_factor,
            widen_on_sparse: config.retrieval.widen_on_sparse,
        },
    );

    let guardrails = GuardrailEngine::new(
        Box::new(RegexPiiClassifier::standard()?),
        config.guardrails.hallucination_min_length,
    );
    let evaluator = SandboxedEvaluator::new(SandboxLimits {
        max_steps: config.sandbox.max_steps,
        timeout: Duration::from_millis(config.sandbox.timeout_ms),
        ..SandboxLimits::default()
    });
    let audit = JsonlAuditLog::open(&config.audit.path)?;

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = llm.model_name(),
        corpus_size = retriever.corpus_size(),
        audit_path = %audit.path().display(),
        "agent runtime assembled"
    );

    Ok(AgentRuntime::new(
        llm,
        retriever,
        guardrails,
        evaluator,
        Arc::new(audit),
        RuntimeSettings {
            top_k: config.retrieval.top_k,
            max_evaluations: config.workflow.max_evaluations,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
        },
    ))
}

fn build_llm_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>, BootstrapError> {
    let llm = &config.llm;
    let base_url = match llm.provider {
        LlmProvider::Extractive => {
            return Ok(Arc::new(ExtractiveClient::new(config.retrieval.top_k)));
        }
        LlmProvider::OpenAi => {
            llm.base_url.clone().unwrap_or_else(|| OPENAI_API_BASE_URL.to_string())
        }
        LlmProvider::Ollama => llm
            .base_url
            .clone()
            .ok_or(BootstrapError::MissingBaseUrl { provider: llm.provider.as_str() })?,
    };

    let client = OpenAiCompatibleClient::new(ChatCompletionsSettings {
        base_url,
        api_key: llm.api_key.clone(),
        model: llm.model.clone(),
        temperature: llm.temperature,
        max_tokens: llm.max_tokens,
        timeout_secs: llm.timeout_secs,
    })?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use ledgerlens_core::config::{AppConfig, LlmProvider};
    use ledgerlens_core::domain::role::Role;
    use secrecy::SecretString;

    use super::{build_runtime, BootstrapError};

    fn extractive_config(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Extractive;
        config.audit.path = dir.path().join("audit").join("audit_log.jsonl");
        config
    }

    #[tokio::test]
    async fn extractive_runtime_answers_and_writes_the_audit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = extractive_config(&dir);
        let runtime = build_runtime(&config).expect("runtime");

        let response = runtime.ask("What was Q3 revenue?", "analyst").await;

        assert!(response.contains("$18.12"));
        let written = std::fs::read_to_string(&config.audit.path).expect("audit file");
        assert_eq!(written.lines().count(), 1);
        assert_eq!(runtime.model_name(), "extractive");
        assert_eq!(runtime.settings().top_k, 3);
    }

    #[tokio::test]
    async fn configured_limits_flow_into_the_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = extractive_config(&dir);
        config.retrieval.top_k = 1;
        config.workflow.max_evaluations = 2;

        let runtime = build_runtime(&config).expect("runtime");
        let result = runtime
            .retrieve_for_display("Project Blackwell", Role::Executive)
            .await
            .expect("retrieve");

        assert_eq!(result.len(), 1);
        assert_eq!(runtime.settings().max_evaluations, 2);
    }

    #[test]
    fn openai_provider_builds_with_default_base_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = extractive_config(&dir);
        config.llm.provider = LlmProvider::OpenAi;
        config.llm.api_key = Some(SecretString::from("sk-test".to_string()));

        let runtime = build_runtime(&config).expect("runtime");

        assert_eq!(runtime.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn ollama_without_base_url_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = extractive_config(&dir);
        config.llm.provider = LlmProvider::Ollama;
        config.llm.base_url = None;

        let error = build_runtime(&config).err().expect("missing base url");

        assert!(matches!(error, BootstrapError::MissingBaseUrl { provider: "ollama" }));
    }

    #[test]
    fn unopenable_audit_path_fails_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = extractive_config(&dir);
        config.audit.path = dir.path().to_path_buf();

        let error = build_runtime(&config).err().expect("directory is not a file");

        assert!(matches!(error, BootstrapError::AuditLog(_)));
    }
}
