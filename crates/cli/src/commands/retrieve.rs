use ledgerlens_agent::runtime::invalid_role_message;
use ledgerlens_core::config::LoadOptions;
use ledgerlens_core::domain::role::Role;
use ledgerlens_core::domain::sensitivity::SensitivityLabel;
use serde::Serialize;
use uuid::Uuid;

use crate::commands::{CommandResult, Session};

#[derive(Debug, Serialize)]
struct RetrievedDocument {
    source: String,
    sensitivity: SensitivityLabel,
    category: String,
    year: i32,
    score: f32,
    content: String,
}

pub fn run(options: LoadOptions, role_name: &str, question: &str) -> CommandResult {
    let Ok(role) = role_name.parse::<Role>() else {
        return CommandResult::failure(
            "retrieve",
            "invalid_role",
            invalid_role_message(role_name),
            2,
        );
    };

    let session = match Session::open("retrieve", options) {
        Ok(session) => session,
        Err(failure) => return failure,
    };

    match session.executor.block_on(session.runtime.retrieve_for_display(question, role)) {
        Ok(result) => {
            let documents = result
                .items
                .iter()
                .map(|item| RetrievedDocument {
                    source: item.document.source.clone(),
                    sensitivity: item.document.sensitivity,
                    category: item.document.category.clone(),
                    year: item.document.year,
                    score: item.score,
                    content: item.document.content.clone(),
                })
                .collect::<Vec<_>>();
            let message = format!(
                "{} document(s) visible to {role} (top_k = {})",
                documents.len(),
                session.config.retrieval.top_k
            );
            CommandResult::success_with_details("retrieve", message, Some(documents))
        }
        Err(error) => CommandResult::from_interface_error(
            "retrieve",
            &error.into_interface(Uuid::new_v4().to_string()),
        ),
    }
}
