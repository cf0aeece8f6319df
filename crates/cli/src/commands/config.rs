use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ledgerlens_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        field(
            "llm.provider",
            config.llm.provider.as_str().to_string(),
            &["LEDGERLENS_LLM_PROVIDER"],
        ),
        field("llm.model", config.llm.model.clone(), &["LEDGERLENS_LLM_MODEL"]),
        field(
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["LEDGERLENS_LLM_BASE_URL"],
        ),
        field(
            "llm.api_key",
            config
                .llm
                .api_key
                .as_ref()
                .map(|key| redact_token(key.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
            &["LEDGERLENS_LLM_API_KEY", "OPENAI_API_KEY"],
        ),
        field(
            "llm.temperature",
            config.llm.temperature.to_string(),
            &["LEDGERLENS_LLM_TEMPERATURE"],
        ),
        field(
            "llm.max_tokens",
            config.llm.max_tokens.to_string(),
            &["LEDGERLENS_LLM_MAX_TOKENS"],
        ),
        field(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["LEDGERLENS_LLM_TIMEOUT_SECS"],
        ),
        field(
            "retrieval.top_k",
            config.retrieval.top_k.to_string(),
            &["LEDGERLENS_RETRIEVAL_TOP_K"],
        ),
        field(
            "retrieval.oversample_factor",
            config.retrieval.oversample_factor.to_string(),
            &["LEDGERLENS_RETRIEVAL_OVERSAMPLE_FACTOR"],
        ),
        field(
            "retrieval.max_oversample_factor",
            config.retrieval.max_oversample_factor.to_string(),
            &["LEDGERLENS_RETRIEVAL_MAX_OVERSAMPLE_FACTOR"],
        ),
        field(
            "retrieval.widen_on_sparse",
            config.retrieval.widen_on_sparse.to_string(),
            &["LEDGERLENS_RETRIEVAL_WIDEN_ON_SPARSE"],
        ),
        field(
            "guardrails.hallucination_min_length",
            config.guardrails.hallucination_min_length.to_string(),
            &["LEDGERLENS_GUARDRAILS_HALLUCINATION_MIN_LENGTH"],
        ),
        field(
            "workflow.max_evaluations",
            config.workflow.max_evaluations.to_string(),
            &["LEDGERLENS_WORKFLOW_MAX_EVALUATIONS"],
        ),
        field(
            "sandbox.timeout_ms",
            config.sandbox.timeout_ms.to_string(),
            &["LEDGERLENS_SANDBOX_TIMEOUT_MS"],
        ),
        field(
            "sandbox.max_steps",
            config.sandbox.max_steps.to_string(),
            &["LEDGERLENS_SANDBOX_MAX_STEPS"],
        ),
        field("audit.path", config.audit.path.display().to_string(), &["LEDGERLENS_AUDIT_PATH"]),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["LEDGERLENS_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["LEDGERLENS_SERVER_PORT"]),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["LEDGERLENS_LOGGING_LEVEL", "LEDGERLENS_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            config.logging.format.as_str().to_string(),
            &["LEDGERLENS_LOGGING_FORMAT", "LEDGERLENS_LOG_FORMAT"],
        ),
    ]
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key, value, env_keys }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    ["ledgerlens.toml", "config/ledgerlens.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
