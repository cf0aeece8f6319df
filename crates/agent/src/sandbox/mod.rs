//! Restricted calculator for model-requested arithmetic.
//!
//! Programs are a handful of Python-style lines (`name = expr`, augmented
//! assignment, bare expressions, `import math`) over numbers and text. The
//! interpreter owns a private variable map and nothing else: there is no
//! attribute access beyond the `math` whitelist, no other imports and no way
//! to reach the filesystem, network or process.

mod interpreter;
mod parser;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use interpreter::{Budget, Interpreter};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "float",
            Self::Text(_) => "str",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("no value was assigned to `result`")]
    MissingResult,
    #[error("{0}")]
    Evaluation(String),
    #[error("calculation exceeded its time budget")]
    Timeout,
    #[error("calculation was cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_source_chars: usize,
    pub max_statements: usize,
    pub max_depth: usize,
    pub max_nodes: usize,
    pub max_text_chars: usize,
    pub max_steps: u64,
    pub timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_source_chars: 4096,
            max_statements: 64,
            max_depth: 48,
            max_nodes: 256,
            max_text_chars: 4096,
            max_steps: 10_000,
            timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SandboxedEvaluator {
    limits: SandboxLimits,
}

/// Sets the shared flag when the owning future is dropped mid-evaluation.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl SandboxedEvaluator {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn evaluate(&self, program: &str) -> Result<Value, EvalError> {
        self.evaluate_with_cancel(program, &AtomicBool::new(false))
    }

    pub fn evaluate_with_cancel(
        &self,
        program: &str,
        cancel: &AtomicBool,
    ) -> Result<Value, EvalError> {
        let lines = parser::parse_program(program, &self.limits)?;
        let budget = Budget::new(&self.limits, cancel);
        Interpreter::new(budget, self.limits.max_text_chars).run(&lines)
    }

    /// Runs on the blocking pool. Dropping the returned future cancels the
    /// evaluation at its next step.
    pub async fn evaluate_async(&self, program: String) -> Result<Value, EvalError> {
        self.run_on_pool(program, |evaluator, program, cancel| {
            evaluator.evaluate_with_cancel(program, cancel)
        })
        .await
    }

    async fn run_on_pool<F>(&self, program: String, run: F) -> Result<Value, EvalError>
    where
        F: FnOnce(&SandboxedEvaluator, &str, &AtomicBool) -> Result<Value, EvalError>
            + Send
            + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        let evaluator = self.clone();

        tokio::task::spawn_blocking(move || run(&evaluator, &program, &cancel))
            .await
            .map_err(|error| EvalError::Evaluation(format!("evaluator task failed: {error}")))?
    }
}

/// Text re-injected into the conversation after an evaluation.
pub fn render_for_model(outcome: &Result<Value, EvalError>) -> String {
    match outcome {
        Ok(value) => format!("Calculated Result: {value}"),
        Err(EvalError::MissingResult) => {
            "Error: Please assign your answer to a variable named 'result'.".to_string()
        }
        Err(error) => format!("Calculation Error: {error}"),
    }
}
