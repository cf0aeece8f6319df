use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub guardrails: GuardrailConfig,
    pub workflow: WorkflowConfig,
    pub sandbox: SandboxConfig,
    pub audit: AuditConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub oversample_factor: usize,
    pub max_oversample_factor: usize,
    pub widen_on_sparse: bool,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub hallucination_min_length: usize,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub max_evaluations: u32,
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub timeout_ms: u64,
    pub max_steps: u64,
}

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
    Extractive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub audit_path: Option<PathBuf>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                temperature: 0.1,
                max_tokens: 512,
                timeout_secs: 30,
            },
            retrieval: RetrievalConfig {
                top_k: 3,
                oversample_factor: 3,
                max_oversample_factor: 12,
                widen_on_sparse: true,
            },
            guardrails: GuardrailConfig { hallucination_min_length: 100 },
            workflow: WorkflowConfig { max_evaluations: 5 },
            sandbox: SandboxConfig { timeout_ms: 250, max_steps: 10_000 },
            audit: AuditConfig { path: PathBuf::from("audit_log.jsonl") },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Extractive => "extractive",
        }
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "extractive" => Ok(Self::Extractive),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama|extractive)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("ledgerlens.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.apply_provider_fallbacks();
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(oversample_factor) = retrieval.oversample_factor {
                self.retrieval.oversample_factor = oversample_factor;
            }
            if let Some(max_oversample_factor) = retrieval.max_oversample_factor {
                self.retrieval.max_oversample_factor = max_oversample_factor;
            }
            if let Some(widen_on_sparse) = retrieval.widen_on_sparse {
                self.retrieval.widen_on_sparse = widen_on_sparse;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(min_length) = guardrails.hallucination_min_length {
                self.guardrails.hallucination_min_length = min_length;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(max_evaluations) = workflow.max_evaluations {
                self.workflow.max_evaluations = max_evaluations;
            }
        }

        if let Some(sandbox) = patch.sandbox {
            if let Some(timeout_ms) = sandbox.timeout_ms {
                self.sandbox.timeout_ms = timeout_ms;
            }
            if let Some(max_steps) = sandbox.max_steps {
                self.sandbox.max_steps = max_steps;
            }
        }

        if let Some(audit) = patch.audit {
            if let Some(path) = audit.path {
                self.audit.path = path;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEDGERLENS_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LEDGERLENS_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEDGERLENS_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEDGERLENS_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEDGERLENS_LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("LEDGERLENS_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("LEDGERLENS_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_value("LEDGERLENS_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("LEDGERLENS_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("LEDGERLENS_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEDGERLENS_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_value("LEDGERLENS_RETRIEVAL_TOP_K", &value)?;
        }
        if let Some(value) = read_env("LEDGERLENS_RETRIEVAL_OVERSAMPLE_FACTOR") {
            self.retrieval.oversample_factor =
                parse_value("LEDGERLENS_RETRIEVAL_OVERSAMPLE_FACTOR", &value)?;
        }
        if let Some(value) = read_env("LEDGERLENS_RETRIEVAL_MAX_OVERSAMPLE_FACTOR") {
            self.retrieval.max_oversample_factor =
                parse_value("LEDGERLENS_RETRIEVAL_MAX_OVERSAMPLE_FACTOR", &value)?;
        }
        if let Some(value) = read_env("LEDGERLENS_RETRIEVAL_WIDEN_ON_SPARSE") {
            self.retrieval.widen_on_sparse =
                parse_value("LEDGERLENS_RETRIEVAL_WIDEN_ON_SPARSE", &value)?;
        }

        if let Some(value) = read_env("LEDGERLENS_GUARDRAILS_HALLUCINATION_MIN_LENGTH") {
            self.guardrails.hallucination_min_length =
                parse_value("LEDGERLENS_GUARDRAILS_HALLUCINATION_MIN_LENGTH", &value)?;
        }

        if let Some(value) = read_env("LEDGERLENS_WORKFLOW_MAX_EVALUATIONS") {
            self.workflow.max_evaluations =
                parse_value("LEDGERLENS_WORKFLOW_MAX_EVALUATIONS", &value)?;
        }

        if let Some(value) = read_env("LEDGERLENS_SANDBOX_TIMEOUT_MS") {
            self.sandbox.timeout_ms = parse_value("LEDGERLENS_SANDBOX_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEDGERLENS_SANDBOX_MAX_STEPS") {
            self.sandbox.max_steps = parse_value("LEDGERLENS_SANDBOX_MAX_STEPS", &value)?;
        }

        if let Some(value) = read_env("LEDGERLENS_AUDIT_PATH") {
            self.audit.path = PathBuf::from(value);
        }

        if let Some(value) = read_env("LEDGERLENS_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEDGERLENS_SERVER_PORT") {
            self.server.port = parse_value("LEDGERLENS_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("LEDGERLENS_LOGGING_LEVEL").or_else(|| read_env("LEDGERLENS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEDGERLENS_LOGGING_FORMAT").or_else(|| read_env("LEDGERLENS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(audit_path) = overrides.audit_path {
            self.audit.path = audit_path;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    /// The conventional `OPENAI_API_KEY` fills in a missing key, and Ollama
    /// gets its local OpenAI-compatible endpoint when no base URL is set.
    fn apply_provider_fallbacks(&mut self) {
        match self.llm.provider {
            LlmProvider::OpenAi if self.llm.api_key.is_none() => {
                self.llm.api_key = read_env("OPENAI_API_KEY").map(secret_value);
            }
            LlmProvider::Ollama if self.llm.base_url.is_none() => {
                self.llm.base_url = Some("http://localhost:11434/v1".to_string());
            }
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_retrieval(&self.retrieval)?;
        validate_guardrails(&self.guardrails)?;
        validate_workflow(&self.workflow)?;
        validate_sandbox(&self.sandbox)?;
        validate_audit(&self.audit)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ledgerlens.toml"), PathBuf::from("config/ledgerlens.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set LEDGERLENS_LLM_API_KEY or OPENAI_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::Extractive => {}
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.top_k == 0 {
        return Err(ConfigError::Validation(
            "retrieval.top_k must be greater than zero".to_string(),
        ));
    }

    if retrieval.oversample_factor == 0 {
        return Err(ConfigError::Validation(
            "retrieval.oversample_factor must be greater than zero".to_string(),
        ));
    }

    if retrieval.max_oversample_factor < retrieval.oversample_factor {
        return Err(ConfigError::Validation(
            "retrieval.max_oversample_factor must be at least retrieval.oversample_factor"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.hallucination_min_length == 0 {
        return Err(ConfigError::Validation(
            "guardrails.hallucination_min_length must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.max_evaluations == 0 || workflow.max_evaluations > 20 {
        return Err(ConfigError::Validation(
            "workflow.max_evaluations must be in range 1..=20".to_string(),
        ));
    }
    Ok(())
}

fn validate_sandbox(sandbox: &SandboxConfig) -> Result<(), ConfigError> {
    if sandbox.timeout_ms == 0 || sandbox.timeout_ms > 10_000 {
        return Err(ConfigError::Validation(
            "sandbox.timeout_ms must be in range 1..=10000".to_string(),
        ));
    }

    if sandbox.max_steps == 0 {
        return Err(ConfigError::Validation(
            "sandbox.max_steps must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_audit(audit: &AuditConfig) -> Result<(), ConfigError> {
    if audit.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("audit.path must not be empty".to_string()));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    retrieval: Option<RetrievalPatch>,
    guardrails: Option<GuardrailPatch>,
    workflow: Option<WorkflowPatch>,
    sandbox: Option<SandboxPatch>,
    audit: Option<AuditPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    top_k: Option<usize>,
    oversample_factor: Option<usize>,
    max_oversample_factor: Option<usize>,
    widen_on_sparse: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    hallucination_min_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_evaluations: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxPatch {
    timeout_ms: Option<u64>,
    max_steps: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuditPatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LEDGERLENS_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("ledgerlens.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_LEDGERLENS_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "api key should be interpolated from the environment",
            )
        })();

        clear_vars(&["TEST_LEDGERLENS_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEDGERLENS_LLM_PROVIDER", "extractive");
        env::set_var("LEDGERLENS_RETRIEVAL_TOP_K", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("ledgerlens.toml");
            fs::write(
                &path,
                r#"
[retrieval]
top_k = 4
oversample_factor = 2

[audit]
path = "from-file.jsonl"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    audit_path: Some(PathBuf::from("from-override.jsonl")),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.retrieval.top_k == 5, "env top_k should win over the file")?;
            ensure(config.retrieval.oversample_factor == 2, "file value should win over default")?;
            ensure(
                config.audit.path == PathBuf::from("from-override.jsonl"),
                "override audit path should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.llm.provider == LlmProvider::Extractive, "provider comes from env")
        })();

        clear_vars(&["LEDGERLENS_LLM_PROVIDER", "LEDGERLENS_RETRIEVAL_TOP_K"]);
        result
    }

    #[test]
    fn openai_key_falls_back_to_conventional_variable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("OPENAI_API_KEY", "sk-conventional");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.llm.provider == LlmProvider::OpenAi, "openai is the default provider")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-conventional".to_string()),
                "OPENAI_API_KEY should fill a missing key",
            )
        })();

        clear_vars(&["OPENAI_API_KEY"]);
        result
    }

    #[test]
    fn validation_fails_fast_without_openai_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["OPENAI_API_KEY", "LEDGERLENS_LLM_API_KEY", "LEDGERLENS_LLM_PROVIDER"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".into()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.api_key")
        );
        ensure(has_message, "validation failure should mention llm.api_key")
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEDGERLENS_LLM_PROVIDER", "extractive");
        env::set_var("LEDGERLENS_WORKFLOW_MAX_EVALUATIONS", "many");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "LEDGERLENS_WORKFLOW_MAX_EVALUATIONS",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override failure".to_string()),
        };

        clear_vars(&["LEDGERLENS_LLM_PROVIDER", "LEDGERLENS_WORKFLOW_MAX_EVALUATIONS"]);
        result
    }

    #[test]
    fn ollama_gets_local_endpoint_and_logging_aliases_apply() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEDGERLENS_LLM_PROVIDER", "ollama");
        env::set_var("LEDGERLENS_LOG_LEVEL", "warn");
        env::set_var("LEDGERLENS_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.llm.base_url.as_deref() == Some("http://localhost:11434/v1"),
                "ollama should default to the local endpoint",
            )?;
            ensure(config.logging.level == "warn", "log level alias should apply")?;
            ensure(matches!(config.logging.format, LogFormat::Json), "log format alias applies")
        })();

        clear_vars(&["LEDGERLENS_LLM_PROVIDER", "LEDGERLENS_LOG_LEVEL", "LEDGERLENS_LOG_FORMAT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEDGERLENS_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["LEDGERLENS_LLM_API_KEY"]);
        result
    }
}
