use std::sync::Arc;

use ledgerlens_agent::{build_runtime, AgentRuntime};
use ledgerlens_core::config::{AppConfig, ConfigError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("runtime assembly failed: {0}")]
    Runtime(#[from] ledgerlens_agent::BootstrapError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let runtime = build_runtime(&config)?;

    Ok(Application { config, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use ledgerlens_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?)
    }

    #[test]
    fn bootstrap_rejects_invalid_port_before_building_the_runtime() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                llm_provider: Some(LlmProvider::Extractive),
                server_port: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let error = result.err().expect("port 0 is invalid");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("server.port"));
    }

    #[test]
    fn bootstrap_assembles_an_offline_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                llm_provider: Some(LlmProvider::Extractive),
                audit_path: Some(dir.path().join("audit_log.jsonl")),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("bootstrap should succeed with the extractive provider");

        assert_eq!(app.runtime.model_name(), "extractive");
        assert_eq!(app.runtime.retriever().corpus_size(), 11);
    }
}
