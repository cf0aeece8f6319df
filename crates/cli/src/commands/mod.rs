pub mod ask;
pub mod config;
pub mod demo;
pub mod doctor;
pub mod retrieve;

use ledgerlens_agent::{build_runtime, AgentRuntime};
use ledgerlens_core::config::{AppConfig, LoadOptions};
use ledgerlens_core::errors::InterfaceError;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_details(command, message, Option::<()>::None)
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: Option<impl Serialize>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details: details.and_then(|details| serde_json::to_value(details).ok()),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_interface_error(command: &str, error: &InterfaceError) -> Self {
        let (error_class, exit_code) = match error {
            InterfaceError::BadRequest { .. } => ("bad_request", 2),
            InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 5),
            InterfaceError::Internal { .. } => ("internal", 6),
        };
        let message =
            format!("{} (correlation_id: {})", error.user_message(), error.correlation_id());
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Config, async runtime and agent runtime shared by the commands that answer
/// or retrieve.
pub(crate) struct Session {
    pub config: AppConfig,
    pub runtime: AgentRuntime,
    pub executor: tokio::runtime::Runtime,
}

impl Session {
    pub(crate) fn open(command: &str, options: LoadOptions) -> Result<Self, CommandResult> {
        let config = AppConfig::load(options).map_err(|error| {
            CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            )
        })?;

        let executor = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
            |error| {
                CommandResult::failure(
                    command,
                    "runtime_init",
                    format!("failed to initialize async runtime: {error}"),
                    3,
                )
            },
        )?;

        let runtime = build_runtime(&config).map_err(|error| {
            CommandResult::failure(command, "bootstrap", error.to_string(), 4)
        })?;

        Ok(Self { config, runtime, executor })
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
