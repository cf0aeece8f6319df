use ledgerlens_core::domain::role::Role;
use ledgerlens_core::retrieval::RetrievalResult;

use crate::llm::{ChatMessage, MessageRole};

pub const CALCULATED_RESULT_PREFIX: &str = "Calculated Result:";

const AFTER_CALCULATION_INSTRUCTION: &str =
    "You have the calculated data. Now answer the user's question concisely using the result.";

const RULES: &str = "RULES:
- Only use information from the provided context
- If context is empty or irrelevant, say \"I don't have access to that information.\"
- Never make up financial data
- If the user asks for a CALCULATION (growth, percentages, projections), write Python code to compute it.
  Wrap code in ```python blocks and assign the final value to a variable named 'result'.";

pub fn role_tone(role: Role) -> &'static str {
    match role {
        Role::Executive => {
            "Be extremely concise. Use bullet points. Focus on risks and strategic impact."
        }
        Role::ProductManager => {
            "Focus on product implications. Highlight timelines and feature impacts."
        }
        Role::Analyst => "Be detailed and thorough. Cite specific documents found.",
    }
}

/// Per-request working state. Never shared between requests.
#[derive(Clone, Debug)]
pub struct ConversationState {
    pub role: Role,
    pub question: String,
    pub history: Vec<ChatMessage>,
    pub context: RetrievalResult,
    pub context_text: String,
    pub guardrail_triggered: bool,
    pub evaluations: u32,
}

impl ConversationState {
    pub fn new(role: Role, question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            role,
            history: vec![ChatMessage::user(question.clone())],
            question,
            context: RetrievalResult::default(),
            context_text: String::new(),
            guardrail_triggered: false,
            evaluations: 0,
        }
    }

    pub fn attach_context(&mut self, context: RetrievalResult) {
        self.context_text = context.context_text();
        self.context = context;
    }

    /// Records a calculation turn: the model's request, then the evaluator's answer.
    pub fn record_evaluation(&mut self, model_reply: &str, rendered_outcome: String) {
        self.history.push(ChatMessage::assistant(model_reply));
        self.history.push(ChatMessage::user(rendered_outcome));
        self.evaluations += 1;
    }

    fn follows_calculation(&self) -> bool {
        self.history.last().is_some_and(|message| {
            message.role == MessageRole::User && message.content.contains(CALCULATED_RESULT_PREFIX)
        })
    }

    pub fn system_instruction(&self) -> String {
        let instruction = if self.follows_calculation() {
            AFTER_CALCULATION_INSTRUCTION.to_string()
        } else {
            format!(
                "You are a Financial Insights Assistant.\n\nUSER ROLE: {}\nINSTRUCTION: {}",
                self.role,
                role_tone(self.role)
            )
        };

        format!("{instruction}\n\nRETRIEVED CONTEXT:\n{}\n\n{RULES}\n", self.context_text)
    }
}
