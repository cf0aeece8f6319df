use ledgerlens_agent::runtime::invalid_role_message;
use ledgerlens_core::config::LoadOptions;
use ledgerlens_core::domain::role::Role;
use serde::Serialize;
use uuid::Uuid;

use crate::commands::{CommandResult, Session};

#[derive(Debug, Serialize)]
struct AskDetails {
    role: Role,
    correlation_id: String,
    guardrail_triggered: bool,
    evaluations: u32,
    sources: Vec<String>,
}

pub fn run(options: LoadOptions, role_name: &str, question: &str) -> CommandResult {
    let Ok(role) = role_name.parse::<Role>() else {
        return CommandResult::failure("ask", "invalid_role", invalid_role_message(role_name), 2);
    };

    let session = match Session::open("ask", options) {
        Ok(session) => session,
        Err(failure) => return failure,
    };

    let correlation_id = Uuid::new_v4().to_string();
    let outcome = session.executor.block_on(session.runtime.answer_with_correlation(
        question,
        role,
        &correlation_id,
    ));

    match outcome {
        Ok(outcome) => {
            let details = AskDetails {
                role,
                correlation_id,
                guardrail_triggered: outcome.guardrail_triggered,
                evaluations: outcome.evaluations,
                sources: outcome.documents.iter().map(|document| document.source.clone()).collect(),
            };
            CommandResult::success_with_details("ask", outcome.response, Some(details))
        }
        Err(error) => {
            CommandResult::from_interface_error("ask", &error.into_interface(correlation_id))
        }
    }
}
