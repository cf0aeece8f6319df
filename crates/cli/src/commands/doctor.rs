use std::collections::BTreeSet;

use ledgerlens_agent::guardrails::RegexPiiClassifier;
use ledgerlens_core::config::{AppConfig, LlmProvider, LoadOptions};
use ledgerlens_core::retrieval::DocumentIndex;
use ledgerlens_store::{seeded_index, JsonlAuditLog};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const CONFIG_DEPENDENT_CHECKS: [&str; 3] =
    ["llm_provider_readiness", "audit_log_writable", "guardrail_patterns"];

pub fn run(options: LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_provider(&config));
            checks.push(check_audit_log(&config));
            checks.push(check_guardrail_patterns());
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(CONFIG_DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }
    checks.push(check_corpus());

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let details = match config.llm.provider {
        LlmProvider::Extractive => "offline extractive answering, no model endpoint".to_string(),
        LlmProvider::OpenAi => format!(
            "model `{}` via {} (api key present)",
            config.llm.model,
            config.llm.base_url.as_deref().unwrap_or("api.openai.com")
        ),
        LlmProvider::Ollama => format!(
            "model `{}` via {}",
            config.llm.model,
            config.llm.base_url.as_deref().unwrap_or("<unset>")
        ),
    };
    DoctorCheck { name: "llm_provider_readiness", status: CheckStatus::Pass, details }
}

fn check_audit_log(config: &AppConfig) -> DoctorCheck {
    match JsonlAuditLog::open(&config.audit.path) {
        Ok(log) => DoctorCheck {
            name: "audit_log_writable",
            status: CheckStatus::Pass,
            details: format!("appending to `{}`", log.path().display()),
        },
        Err(error) => DoctorCheck {
            name: "audit_log_writable",
            status: CheckStatus::Fail,
            details: format!("cannot open `{}`: {error}", config.audit.path.display()),
        },
    }
}

fn check_guardrail_patterns() -> DoctorCheck {
    match RegexPiiClassifier::standard() {
        Ok(_) => DoctorCheck {
            name: "guardrail_patterns",
            status: CheckStatus::Pass,
            details: "PII patterns compiled".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "guardrail_patterns",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_corpus() -> DoctorCheck {
    let index = seeded_index();
    if index.is_empty() {
        return DoctorCheck {
            name: "corpus_readiness",
            status: CheckStatus::Fail,
            details: "seeded corpus is empty".to_string(),
        };
    }

    let labels = index
        .documents()
        .map(|document| document.sensitivity.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(", ");
    DoctorCheck {
        name: "corpus_readiness",
        status: CheckStatus::Pass,
        details: format!("{} documents indexed (labels: {labels})", index.len()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
