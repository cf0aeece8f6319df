/// Fence labels that mark a calculation request in a model reply.
const DIRECTIVE_LABELS: &[&str] = &["python", "calc"];
const FENCE: &str = "```";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalculationDirective {
    pub program: String,
}

/// A model reply, parsed once. `directive` is the first labelled fence, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub directive: Option<CalculationDirective>,
}

impl ModelReply {
    pub fn has_directive(&self) -> bool {
        self.directive.is_some()
    }
}

pub fn parse_reply(text: impl Into<String>) -> ModelReply {
    let text = text.into();
    let directive = find_directive(&text);
    ModelReply { text, directive }
}

fn find_directive(text: &str) -> Option<CalculationDirective> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(FENCE) {
        let fence_start = search_from + offset;
        let after_fence = &text[fence_start + FENCE.len()..];
        // The label ends at the first whitespace; code may follow on the same line.
        let label_end = after_fence.find(char::is_whitespace).unwrap_or(after_fence.len());
        let (label, body) = after_fence.split_at(label_end);

        if DIRECTIVE_LABELS.iter().any(|candidate| label.eq_ignore_ascii_case(candidate)) {
            // An unterminated fence runs to the end of the reply.
            let program = body.split(FENCE).next().unwrap_or_default().trim();
            return Some(CalculationDirective { program: program.to_string() });
        }

        // Skip past this fence's closing marker so its body is not rescanned.
        let body_start = fence_start + FENCE.len();
        search_from = match text[body_start..].find(FENCE) {
            Some(close) => body_start + close + FENCE.len(),
            None => return None,
        };
    }
    None
}
