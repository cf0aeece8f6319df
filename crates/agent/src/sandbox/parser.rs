use super::{EvalError, SandboxLimits};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    Round,
    Min,
    Max,
    Float,
    Int,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MathFn {
    Sqrt,
    Pow,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Fabs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MathConst {
    Pi,
    E,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callable {
    Builtin(Builtin),
    Math(MathFn),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Name(String),
    MathConst(MathConst),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Call { function: Callable, args: Vec<Expr> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    ImportMath,
    Assign { target: String, op: Option<BinOp>, value: Expr },
    Expr(Expr),
}

/// A parsed statement with the source line it started on.
#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    pub number: usize,
    pub stmt: Stmt,
}

const RESERVED: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "exec", "finally", "for", "from", "global", "if", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Op(&'static str),
    Newline,
}

#[derive(Clone, Debug, PartialEq)]
struct Spanned {
    token: Token,
    line: usize,
}

/// Longest operators first so `//=` wins over `//` and `/`.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "+=", "-=", "*=", "/=", "%=", "+", "-", "*", "/", "%", "(", ")",
    ",", ".", "=",
];

fn syntax(line: usize, detail: impl std::fmt::Display) -> EvalError {
    EvalError::Evaluation(format!("invalid syntax on line {line}: {detail}"))
}

fn tokenize(source: &str, limits: &SandboxLimits) -> Result<Vec<Spanned>, EvalError> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut paren_depth = 0usize;
    let mut position = 0;

    while position < chars.len() {
        let ch = chars[position];
        match ch {
            '\n' => {
                if paren_depth == 0 {
                    tokens.push(Spanned { token: Token::Newline, line });
                }
                line += 1;
                position += 1;
            }
            '#' => {
                while position < chars.len() && chars[position] != '\n' {
                    position += 1;
                }
            }
            ch if ch.is_whitespace() => position += 1,
            '\'' | '"' => {
                let quote = ch;
                let mut text = String::new();
                position += 1;
                loop {
                    match chars.get(position) {
                        None | Some('\n') => return Err(syntax(line, "unterminated string")),
                        Some(&c) if c == quote => {
                            position += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(position + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('\\') => '\\',
                                Some('\'') => '\'',
                                Some('"') => '"',
                                _ => return Err(syntax(line, "unsupported escape sequence")),
                            };
                            text.push(escaped);
                            position += 2;
                        }
                        Some(&c) => {
                            text.push(c);
                            position += 1;
                        }
                    }
                    if text.chars().count() > limits.max_text_chars {
                        return Err(syntax(line, "string literal is too long"));
                    }
                }
                tokens.push(Spanned { token: Token::Text(text), line });
            }
            ch if ch.is_ascii_digit()
                || (ch == '.' && chars.get(position + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = position;
                while position < chars.len()
                    && (chars[position].is_ascii_digit() || matches!(chars[position], '_' | '.'))
                {
                    position += 1;
                }
                if position < chars.len() && matches!(chars[position], 'e' | 'E') {
                    position += 1;
                    if position < chars.len() && matches!(chars[position], '+' | '-') {
                        position += 1;
                    }
                    while position < chars.len() && chars[position].is_ascii_digit() {
                        position += 1;
                    }
                }
                let literal = chars[start..position].iter().collect::<String>();
                tokens.push(Spanned { token: Token::Number(parse_number(&literal, line)?), line });
            }
            ch if ch.is_alphabetic() || ch == '_' => {
                let start = position;
                while position < chars.len()
                    && (chars[position].is_alphanumeric() || chars[position] == '_')
                {
                    position += 1;
                }
                let ident = chars[start..position].iter().collect::<String>();
                if ident.starts_with("__") {
                    return Err(EvalError::Evaluation(format!(
                        "name `{ident}` is not permitted in calculations"
                    )));
                }
                tokens.push(Spanned { token: Token::Ident(ident), line });
            }
            _ => {
                let rest = chars[position..].iter().take(3).collect::<String>();
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    return Err(syntax(line, format!("unexpected character `{ch}`")));
                };
                match *op {
                    "(" => paren_depth += 1,
                    ")" => {
                        paren_depth = paren_depth
                            .checked_sub(1)
                            .ok_or_else(|| syntax(line, "unmatched `)`"))?;
                    }
                    _ => {}
                }
                position += op.len();
                tokens.push(Spanned { token: Token::Op(*op), line });
            }
        }
    }

    if paren_depth > 0 {
        return Err(syntax(line, "unclosed `(`"));
    }
    tokens.push(Spanned { token: Token::Newline, line });
    Ok(tokens)
}

fn parse_number(literal: &str, line: usize) -> Result<f64, EvalError> {
    if literal.ends_with('_') || literal.contains("__") || literal.contains("_.") {
        return Err(syntax(line, format!("invalid number `{literal}`")));
    }
    literal
        .replace('_', "")
        .parse::<f64>()
        .map_err(|_| syntax(line, format!("invalid number `{literal}`")))
}

pub fn parse_program(source: &str, limits: &SandboxLimits) -> Result<Vec<Line>, EvalError> {
    if source.chars().count() > limits.max_source_chars {
        return Err(EvalError::Evaluation(format!(
            "program exceeds {} characters",
            limits.max_source_chars
        )));
    }

    let tokens = tokenize(source, limits)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
        max_depth: limits.max_depth,
        nodes: 0,
        max_nodes: limits.max_nodes,
    };
    let mut lines = Vec::new();

    while !parser.at_end() {
        if parser.eat_newline() {
            continue;
        }
        let number = parser.line();
        parser.nodes = 0;
        let stmt = parser.statement()?;
        lines.push(Line { number, stmt });
        if lines.len() > limits.max_statements {
            return Err(EvalError::Evaluation(format!(
                "program exceeds {} statements",
                limits.max_statements
            )));
        }
        if !parser.eat_newline() {
            return Err(syntax(parser.line(), "expected end of statement"));
        }
    }

    Ok(lines)
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    depth: usize,
    max_depth: usize,
    /// Expression nodes built for the current statement. Bounds tree height
    /// for operator chains that never raise `depth`.
    nodes: usize,
    max_nodes: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|spanned| &spanned.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset).map(|spanned| &spanned.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|spanned| spanned.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|spanned| spanned.token.clone());
        self.position += 1;
        token
    }

    fn eat_newline(&mut self) -> bool {
        if matches!(self.peek(), Some(Token::Newline)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(found)) if *found == op) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), EvalError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(syntax(self.line(), format!("expected `{op}`")))
        }
    }

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        if let Some(Token::Ident(name)) = self.peek() {
            if name == "import" {
                return self.import();
            }
            if RESERVED.contains(&name.as_str()) {
                return Err(EvalError::Evaluation(format!(
                    "`{name}` is not permitted in calculations"
                )));
            }

            let assign_op = match self.peek_at(1) {
                Some(Token::Op("=")) => Some(None),
                Some(Token::Op("+=")) => Some(Some(BinOp::Add)),
                Some(Token::Op("-=")) => Some(Some(BinOp::Sub)),
                Some(Token::Op("*=")) => Some(Some(BinOp::Mul)),
                Some(Token::Op("/=")) => Some(Some(BinOp::Div)),
                Some(Token::Op("//=")) => Some(Some(BinOp::FloorDiv)),
                Some(Token::Op("%=")) => Some(Some(BinOp::Mod)),
                Some(Token::Op("**=")) => Some(Some(BinOp::Pow)),
                _ => None,
            };

            if let Some(op) = assign_op {
                let target = name.clone();
                if target == "math" {
                    return Err(EvalError::Evaluation(
                        "the `math` module cannot be reassigned".to_string(),
                    ));
                }
                self.position += 2;
                let value = self.expression()?;
                return Ok(Stmt::Assign { target, op, value });
            }
        }

        Ok(Stmt::Expr(self.expression()?))
    }

    fn import(&mut self) -> Result<Stmt, EvalError> {
        self.position += 1;
        match (self.advance(), self.peek()) {
            (Some(Token::Ident(module)), Some(Token::Newline)) if module == "math" => {
                Ok(Stmt::ImportMath)
            }
            (Some(Token::Ident(module)), _) => Err(EvalError::Evaluation(format!(
                "import of `{module}` is not permitted; only `import math` is allowed"
            ))),
            _ => Err(syntax(self.line(), "expected a module name after `import`")),
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EvalError::Evaluation(format!(
                "expression nesting exceeds depth {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn node(&mut self) -> Result<(), EvalError> {
        self.nodes += 1;
        if self.nodes > self.max_nodes {
            return Err(EvalError::Evaluation(format!(
                "expression exceeds {} operations",
                self.max_nodes
            )));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let expr = self.additive();
        self.leave();
        expr
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            self.node()?;
            let right = self.term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            self.node()?;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Plus
        } else {
            return self.power();
        };
        self.node()?;
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr::Unary { op, operand: Box::new(operand?) })
    }

    /// `**` binds tighter than a unary minus on its left and is right-associative.
    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.primary()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        self.node()?;
        self.enter()?;
        let exponent = self.unary();
        self.leave();
        Ok(Expr::Binary { op: BinOp::Pow, left: Box::new(base), right: Box::new(exponent?) })
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        self.node()?;
        let line = self.line();
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Text(text)) => Ok(Expr::Text(text)),
            Some(Token::Op("(")) => {
                let inner = self.expression()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "math" => self.math_member(),
            Some(Token::Ident(name)) => {
                if RESERVED.contains(&name.as_str()) || name == "import" {
                    return Err(EvalError::Evaluation(format!(
                        "`{name}` is not permitted in calculations"
                    )));
                }
                if self.eat_op("(") {
                    let function = builtin(&name).ok_or_else(|| {
                        EvalError::Evaluation(format!(
                            "function `{name}` is not permitted in calculations"
                        ))
                    })?;
                    let args = self.arguments()?;
                    return Ok(Expr::Call { function: Callable::Builtin(function), args });
                }
                if self.eat_op(".") {
                    return Err(EvalError::Evaluation(format!(
                        "attribute access on `{name}` is not permitted"
                    )));
                }
                Ok(Expr::Name(name))
            }
            Some(Token::Op(op)) => Err(syntax(line, format!("unexpected `{op}`"))),
            Some(Token::Newline) | None => Err(syntax(line, "unexpected end of statement")),
        }
    }

    fn math_member(&mut self) -> Result<Expr, EvalError> {
        self.expect_op(".")?;
        let line = self.line();
        let Some(Token::Ident(member)) = self.advance() else {
            return Err(syntax(line, "expected a name after `math.`"));
        };

        match member.as_str() {
            "pi" => return Ok(Expr::MathConst(MathConst::Pi)),
            "e" => return Ok(Expr::MathConst(MathConst::E)),
            _ => {}
        }

        let function = math_function(&member).ok_or_else(|| {
            EvalError::Evaluation(format!("`math.{member}` is not permitted in calculations"))
        })?;
        self.expect_op("(")?;
        let args = self.arguments()?;
        // `math` must be imported before use; the interpreter checks that.
        Ok(Expr::Call { function: Callable::Math(function), args })
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat_op(")") {
                return Ok(args);
            }
            self.expect_op(",")?;
            if self.eat_op(")") {
                return Ok(args);
            }
        }
    }
}

fn builtin(name: &str) -> Option<Builtin> {
    match name {
        "abs" => Some(Builtin::Abs),
        "round" => Some(Builtin::Round),
        "min" => Some(Builtin::Min),
        "max" => Some(Builtin::Max),
        "float" => Some(Builtin::Float),
        "int" => Some(Builtin::Int),
        _ => None,
    }
}

fn math_function(name: &str) -> Option<MathFn> {
    match name {
        "sqrt" => Some(MathFn::Sqrt),
        "pow" => Some(MathFn::Pow),
        "exp" => Some(MathFn::Exp),
        "log" => Some(MathFn::Log),
        "log10" => Some(MathFn::Log10),
        "log2" => Some(MathFn::Log2),
        "sin" => Some(MathFn::Sin),
        "cos" => Some(MathFn::Cos),
        "tan" => Some(MathFn::Tan),
        "floor" => Some(MathFn::Floor),
        "ceil" => Some(MathFn::Ceil),
        "fabs" => Some(MathFn::Fabs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_program, BinOp, Callable, Expr, MathFn, Stmt, UnaryOp};
    use crate::sandbox::{EvalError, SandboxLimits};

    fn parse(source: &str) -> Result<Vec<Stmt>, EvalError> {
        parse_program(source, &SandboxLimits::default())
            .map(|lines| lines.into_iter().map(|line| line.stmt).collect())
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let stmts = parse("-2 ** 2").expect("parse");
        let Stmt::Expr(Expr::Unary { op: UnaryOp::Neg, operand }) = &stmts[0] else {
            panic!("expected negation at the top, got {stmts:?}");
        };
        assert!(matches!(**operand, Expr::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn augmented_assignment_and_comments() {
        let stmts = parse("x = 1_000  # thousand\nx *= 1.5e3\n\n").expect("parse");
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[0],
            Stmt::Assign { target: "x".to_string(), op: None, value: Expr::Number(1000.0) }
        );
        assert!(matches!(&stmts[1], Stmt::Assign { op: Some(BinOp::Mul), .. }));
    }

    #[test]
    fn math_calls_parse_inside_parentheses_across_lines() {
        let stmts = parse("import math\nresult = math.pow(\n  2,\n  10\n)").expect("parse");
        assert_eq!(stmts[0], Stmt::ImportMath);
        let Stmt::Assign { value: Expr::Call { function, args }, .. } = &stmts[1] else {
            panic!("expected a call, got {stmts:?}");
        };
        assert_eq!(*function, Callable::Math(MathFn::Pow));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn rejects_other_imports_and_attribute_access() {
        let error = parse("import os").expect_err("os import rejected");
        assert!(error.to_string().contains("only `import math`"));

        assert!(parse("from math import sqrt").is_err());
        assert!(parse("x = (1).real").is_err());
        assert!(parse("result = name.attr").is_err());
        assert!(parse("result = math.system(1)").is_err());
        assert!(parse("result = __import__('os')").is_err());
        assert!(parse("result = open('x')").is_err());
        assert!(parse("result = lambda: 1").is_err());
    }

    #[test]
    fn enforces_structural_limits() {
        let limits = SandboxLimits { max_statements: 3, ..SandboxLimits::default() };
        assert!(parse_program("a = 1\nb = 2\nc = 3\nd = 4", &limits).is_err());

        let nested = format!("result = {}1{}", "(".repeat(60), ")".repeat(60));
        let error = parse(&nested).expect_err("too deep");
        assert!(error.to_string().contains("nesting"));

        let long = format!("result = {}", "1 + ".repeat(1200) + "1");
        assert!(parse(&long).is_err());
    }

    #[test]
    fn flat_operator_chains_count_against_the_node_limit() {
        let chain = format!("result = {}1", "1+".repeat(2000));
        let error = parse(&chain).expect_err("chain too long");
        assert!(matches!(&error, EvalError::Evaluation(detail) if detail.contains("operations")));

        let products = format!("result = {}2", "2*".repeat(2000));
        assert!(matches!(parse(&products), Err(EvalError::Evaluation(_))));

        let modest = format!("result = {}1", "1+".repeat(100));
        assert!(parse(&modest).is_ok(), "a hundred-term sum stays within the limit");

        let limits = SandboxLimits { max_nodes: 3, ..SandboxLimits::default() };
        assert!(parse_program("a = 1 + 1\nb = 2 * 2", &limits).is_ok(), "counted per statement");
        assert!(parse_program("a = 1 + 1 + 1", &limits).is_err());
    }

    #[test]
    fn reports_syntax_errors_with_line_numbers() {
        let error = parse("x = 1\ny = (2 +").expect_err("unclosed paren");
        assert!(error.to_string().contains("line 2"));
        assert!(parse("x = 1 2").is_err());
    }
}
