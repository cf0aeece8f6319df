use ledgerlens_core::config::LoadOptions;
use ledgerlens_core::domain::role::Role;
use serde::Serialize;

use crate::commands::{CommandResult, Session};

struct DemoCase {
    description: &'static str,
    question: &'static str,
    roles: &'static [Role],
}

const DEMO_CASES: &[DemoCase] = &[
    DemoCase {
        description: "insider data access control",
        question: "What is the status of Project Blackwell?",
        roles: &[Role::Analyst, Role::ProductManager, Role::Executive],
    },
    DemoCase {
        description: "product data access control",
        question: "What's on the product roadmap for 2025?",
        roles: &[Role::Analyst, Role::ProductManager],
    },
    DemoCase {
        description: "public data access",
        question: "What was Q3 revenue?",
        roles: &[Role::Analyst],
    },
];

#[derive(Debug, Serialize)]
struct DemoExchange {
    description: &'static str,
    question: &'static str,
    role: Role,
    response: String,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    audit_path: String,
    exchanges: Vec<DemoExchange>,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let session = match Session::open("demo", options) {
        Ok(session) => session,
        Err(failure) => return failure,
    };

    let exchanges = session.executor.block_on(async {
        let mut exchanges = Vec::new();
        for case in DEMO_CASES {
            for role in case.roles {
                let response = session.runtime.ask(case.question, role.as_str()).await;
                exchanges.push(DemoExchange {
                    description: case.description,
                    question: case.question,
                    role: *role,
                    response,
                });
            }
        }
        exchanges
    });

    let report = DemoReport {
        audit_path: session.config.audit.path.display().to_string(),
        exchanges,
    };
    let message = format!(
        "demo complete: {} exchanges, audit log at {}",
        report.exchanges.len(),
        report.audit_path
    );
    CommandResult::success_with_details("demo", message, Some(report))
}
