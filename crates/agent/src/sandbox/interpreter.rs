use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::parser::{BinOp, Builtin, Callable, Expr, Line, MathConst, MathFn, Stmt, UnaryOp};
use super::{EvalError, SandboxLimits, Value};

/// Execution budget shared by every node the interpreter visits.
pub struct Budget<'a> {
    steps_left: u64,
    deadline: Instant,
    cancel: &'a AtomicBool,
}

impl<'a> Budget<'a> {
    pub fn new(limits: &SandboxLimits, cancel: &'a AtomicBool) -> Self {
        Self { steps_left: limits.max_steps, deadline: Instant::now() + limits.timeout, cancel }
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(EvalError::Cancelled);
        }
        if self.steps_left == 0 || Instant::now() >= self.deadline {
            return Err(EvalError::Timeout);
        }
        self.steps_left -= 1;
        Ok(())
    }
}

pub struct Interpreter<'a> {
    variables: HashMap<String, Value>,
    math_imported: bool,
    budget: Budget<'a>,
    max_text_chars: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(budget: Budget<'a>, max_text_chars: usize) -> Self {
        Self { variables: HashMap::new(), math_imported: false, budget, max_text_chars }
    }

    /// Runs every statement and returns the value bound to `result`.
    pub fn run(mut self, program: &[Line]) -> Result<Value, EvalError> {
        for line in program {
            self.budget.tick()?;
            self.statement(&line.stmt).map_err(|error| match error {
                EvalError::Evaluation(detail) => {
                    EvalError::Evaluation(format!("line {}: {detail}", line.number))
                }
                other => other,
            })?;
        }
        self.variables.remove("result").ok_or(EvalError::MissingResult)
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), EvalError> {
        match stmt {
            Stmt::ImportMath => {
                self.math_imported = true;
                Ok(())
            }
            Stmt::Assign { target, op: None, value } => {
                let value = self.eval(value)?;
                self.variables.insert(target.clone(), value);
                Ok(())
            }
            Stmt::Assign { target, op: Some(op), value } => {
                let current = self.lookup(target)?;
                let rhs = self.eval(value)?;
                let updated = self.binary(*op, current, rhs)?;
                self.variables.insert(target.clone(), updated);
                Ok(())
            }
            Stmt::Expr(expr) => self.eval(expr).map(|_| ()),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::Evaluation(format!("name `{name}` is not defined")))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.budget.tick()?;
        match expr {
            Expr::Number(value) => Ok(Value::Number(*value)),
            Expr::Text(text) => Ok(Value::Text(text.clone())),
            Expr::Name(name) => self.lookup(name),
            Expr::MathConst(constant) => {
                self.require_math()?;
                Ok(Value::Number(match constant {
                    MathConst::Pi => std::f64::consts::PI,
                    MathConst::E => std::f64::consts::E,
                }))
            }
            Expr::Unary { op, operand } => {
                let value = number(self.eval(operand)?, "unary operator")?;
                Ok(Value::Number(match op {
                    UnaryOp::Plus => value,
                    UnaryOp::Neg => -value,
                }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                match function {
                    Callable::Builtin(builtin) => call_builtin(*builtin, values),
                    Callable::Math(function) => {
                        self.require_math()?;
                        call_math(*function, values)
                    }
                }
            }
        }
    }

    fn require_math(&self) -> Result<(), EvalError> {
        if self.math_imported {
            Ok(())
        } else {
            Err(EvalError::Evaluation("name `math` is not defined; add `import math`".to_string()))
        }
    }

    fn binary(&self, op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::Number(left), Value::Number(right)) => arithmetic(op, left, right),
            (Value::Text(left), Value::Text(right)) if op == BinOp::Add => {
                self.bounded_text(left + &right)
            }
            (Value::Text(text), Value::Number(count)) | (Value::Number(count), Value::Text(text))
                if op == BinOp::Mul =>
            {
                if count.fract() != 0.0 {
                    return Err(EvalError::Evaluation(
                        "can't multiply text by a non-integer".to_string(),
                    ));
                }
                let repeats = count.max(0.0) as usize;
                if text.chars().count().saturating_mul(repeats) > self.max_text_chars {
                    return Err(EvalError::Evaluation("text result is too long".to_string()));
                }
                Ok(Value::Text(text.repeat(repeats)))
            }
            (left, right) => Err(EvalError::Evaluation(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    fn bounded_text(&self, text: String) -> Result<Value, EvalError> {
        if text.chars().count() > self.max_text_chars {
            return Err(EvalError::Evaluation("text result is too long".to_string()));
        }
        Ok(Value::Text(text))
    }
}

fn number(value: Value, context: &str) -> Result<f64, EvalError> {
    match value {
        Value::Number(value) => Ok(value),
        Value::Text(_) => {
            Err(EvalError::Evaluation(format!("bad operand type for {context}: 'str'")))
        }
    }
}

fn finite(value: f64) -> Result<Value, EvalError> {
    if value.is_finite() {
        Ok(Value::Number(value))
    } else {
        Err(EvalError::Evaluation("result is not a finite number".to_string()))
    }
}

fn arithmetic(op: BinOp, left: f64, right: f64) -> Result<Value, EvalError> {
    let zero_divisor = || EvalError::Evaluation("division by zero".to_string());
    let value = match op {
        BinOp::Add => left + right,
        BinOp::Sub => left - right,
        BinOp::Mul => left * right,
        BinOp::Div => {
            if right == 0.0 {
                return Err(zero_divisor());
            }
            left / right
        }
        BinOp::FloorDiv => {
            if right == 0.0 {
                return Err(zero_divisor());
            }
            (left / right).floor()
        }
        BinOp::Mod => {
            if right == 0.0 {
                return Err(zero_divisor());
            }
            // Result takes the sign of the divisor.
            left - right * (left / right).floor()
        }
        BinOp::Pow => {
            if left == 0.0 && right < 0.0 {
                return Err(EvalError::Evaluation(
                    "zero cannot be raised to a negative power".to_string(),
                ));
            }
            left.powf(right)
        }
    };
    finite(value)
}

fn arity(name: &str, values: &[Value], expected: usize) -> Result<(), EvalError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Evaluation(format!(
            "{name}() takes {expected} argument(s) ({} given)",
            values.len()
        )))
    }
}

/// Rounds half to even, matching the usual financial convention.
fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

fn call_builtin(builtin: Builtin, values: Vec<Value>) -> Result<Value, EvalError> {
    match builtin {
        Builtin::Abs => {
            arity("abs", &values, 1)?;
            let [value] = take::<1>(values)?;
            finite(number(value, "abs()")?.abs())
        }
        Builtin::Round => match values.len() {
            1 => {
                let [value] = take::<1>(values)?;
                finite(round_half_even(number(value, "round()")?))
            }
            2 => {
                let [value, digits] = take::<2>(values)?;
                let value = number(value, "round()")?;
                let digits = number(digits, "round()")?;
                if digits.fract() != 0.0 {
                    return Err(EvalError::Evaluation(
                        "round() digits must be an integer".to_string(),
                    ));
                }
                let scale = 10f64.powi(digits.clamp(-308.0, 308.0) as i32);
                finite(round_half_even(value * scale) / scale)
            }
            given => Err(EvalError::Evaluation(format!(
                "round() takes 1 or 2 arguments ({given} given)"
            ))),
        },
        Builtin::Min | Builtin::Max => {
            let name = if builtin == Builtin::Min { "min" } else { "max" };
            if values.is_empty() {
                return Err(EvalError::Evaluation(format!("{name}() expects at least 1 argument")));
            }
            let mut best: Option<f64> = None;
            for value in values {
                let value = number(value, name)?;
                best = Some(match best {
                    None => value,
                    Some(current) if builtin == Builtin::Min => current.min(value),
                    Some(current) => current.max(value),
                });
            }
            best.map(Value::Number).ok_or_else(|| {
                EvalError::Evaluation(format!("{name}() expects at least 1 argument"))
            })
        }
        Builtin::Float => {
            arity("float", &values, 1)?;
            let [value] = take::<1>(values)?;
            match value {
                Value::Number(value) => finite(value),
                Value::Text(text) => text.trim().parse::<f64>().map(Value::Number).map_err(|_| {
                    EvalError::Evaluation(format!("could not convert text to float: '{text}'"))
                }),
            }
        }
        Builtin::Int => {
            arity("int", &values, 1)?;
            let [value] = take::<1>(values)?;
            match value {
                Value::Number(value) => finite(value.trunc()),
                Value::Text(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(|parsed| Value::Number(parsed as f64))
                    .map_err(|_| {
                        EvalError::Evaluation(format!("invalid literal for int(): '{text}'"))
                    }),
            }
        }
    }
}

fn call_math(function: MathFn, values: Vec<Value>) -> Result<Value, EvalError> {
    let domain_error = || EvalError::Evaluation("math domain error".to_string());
    let name = math_name(function);

    if function == MathFn::Log && values.len() == 2 {
        let [value, base] = take::<2>(values)?;
        let value = number(value, name)?;
        let base = number(base, name)?;
        if value <= 0.0 || base <= 0.0 || base == 1.0 {
            return Err(domain_error());
        }
        return finite(value.ln() / base.ln());
    }

    if function == MathFn::Pow {
        arity(name, &values, 2)?;
        let [base, exponent] = take::<2>(values)?;
        return arithmetic(BinOp::Pow, number(base, name)?, number(exponent, name)?);
    }

    arity(name, &values, 1)?;
    let [value] = take::<1>(values)?;
    let x = number(value, name)?;
    let result = match function {
        MathFn::Sqrt if x < 0.0 => return Err(domain_error()),
        MathFn::Sqrt => x.sqrt(),
        MathFn::Exp => x.exp(),
        MathFn::Log | MathFn::Log10 | MathFn::Log2 if x <= 0.0 => return Err(domain_error()),
        MathFn::Log => x.ln(),
        MathFn::Log10 => x.log10(),
        MathFn::Log2 => x.log2(),
        MathFn::Sin => x.sin(),
        MathFn::Cos => x.cos(),
        MathFn::Tan => x.tan(),
        MathFn::Floor => x.floor(),
        MathFn::Ceil => x.ceil(),
        MathFn::Fabs => x.abs(),
        MathFn::Pow => return Err(domain_error()),
    };
    finite(result)
}

fn math_name(function: MathFn) -> &'static str {
    match function {
        MathFn::Sqrt => "math.sqrt",
        MathFn::Pow => "math.pow",
        MathFn::Exp => "math.exp",
        MathFn::Log => "math.log",
        MathFn::Log10 => "math.log10",
        MathFn::Log2 => "math.log2",
        MathFn::Sin => "math.sin",
        MathFn::Cos => "math.cos",
        MathFn::Tan => "math.tan",
        MathFn::Floor => "math.floor",
        MathFn::Ceil => "math.ceil",
        MathFn::Fabs => "math.fabs",
    }
}

fn take<const N: usize>(values: Vec<Value>) -> Result<[Value; N], EvalError> {
    let given = values.len();
    values.try_into().map_err(|_| {
        EvalError::Evaluation(format!("expected {N} argument(s), {given} given"))
    })
}
