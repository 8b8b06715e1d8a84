//! Arithmetic evaluation for the model.
//!
//! A small recursive-descent evaluator over `f64`. Nothing is compiled or
//! executed beyond the grammar below, so arbitrary model input is safe.
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "//" | "%") unary)*
//! unary   := ("-" | "+") unary | power
//! power   := primary (("^" | "**") unary)?
//! primary := number | constant | function "(" expr ("," expr)* ")" | "(" expr ")"
//! ```
//!
//! Exponentiation is right-associative and binds tighter than unary minus,
//! so `-2^2` is `-4`.

use super::args::parse_args;
use super::core::{Tool, ToolArgs, ToolFuture};
use crate::error::ToolError;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

const MAX_EXPRESSION_LEN: usize = 500;
const MAX_EXPONENT: f64 = 1000.0;
const MAX_POW_BASE: f64 = 1e10;
const MAX_FACTORIAL: f64 = 170.0;

const FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "exp", "log", "ln",
    "log10", "log2", "sqrt", "abs", "round", "floor", "ceil", "degrees", "radians", "factorial",
];

#[derive(Deserialize, JsonSchema)]
struct CalculatorArgs {
    /// The mathematical expression to evaluate (e.g. '2 + 2', 'sin(0.5)', 'sqrt(16)').
    expression: String,
}

/// The `calculator` tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "calculator",
            format!(
                "Perform mathematical calculations and return the result. Supports + - * / // % ^ **, \
                 parentheses, the constants pi, e and tau, and the functions {}.",
                FUNCTIONS.join(", ")
            ),
            json_schema_for::<CalculatorArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: CalculatorArgs = parse_args(arguments)?;
            let result = evaluate(&args.expression)?;
            debug!("calculator: {} = {result}", args.expression);
            Ok(json!({
                "expression": args.expression,
                "result": number_value(result),
                "formatted_result": format_number(result),
            }))
        })
    }
}

/// Evaluate an expression.
pub fn evaluate(expression: &str) -> Result<f64, ToolError> {
    let expression = expression.trim();
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(ToolError::invalid(format!(
            "Expression is too long (max {MAX_EXPRESSION_LEN} characters)"
        )));
    }
    if expression.is_empty() {
        return Err(ToolError::invalid("Expression is empty"));
    }
    let tokens = tokenize(expression)?;
    let mut parser = Evaluator { tokens, pos: 0 };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(ToolError::execution(format!("Unexpected {token}")));
    }
    if !value.is_finite() {
        return Err(ToolError::execution("Result is not a finite number"));
    }
    Ok(value)
}

/// Integers print without a decimal point; very large or small magnitudes
/// use scientific notation; everything else keeps up to 10 significant digits.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{value:.0}");
    }
    let magnitude = value.abs();
    if magnitude > 1e6 || (magnitude < 1e-6 && magnitude > 0.0) {
        return format!("{value:.10e}");
    }
    let digits = 9 - magnitude.log10().floor().max(-1.0) as i32;
    let fixed = format!("{value:.*}", digits.clamp(0, 16) as usize);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ── Tokens ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Ident(s) => write!(f, "name '{s}'"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::DoubleSlash => write!(f, "'//'"),
            Token::Percent => write!(f, "'%'"),
            Token::Caret => write!(f, "'^'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Scientific notation: 1e3, 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ToolError::execution(format!("Invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(name.to_lowercase()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' | '\u{2212}' => Token::Minus,
                    '*' | '\u{d7}' => Token::Star,
                    '/' | '\u{f7}' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => {
                        return Err(ToolError::execution(format!(
                            "Unsupported character '{other}'"
                        )));
                    }
                };
                tokens.push(token);
                i += 1;
            }
        }
    }
    Ok(tokens)
}

// ── Evaluation ─────────────────────────────────────────────────────

struct Evaluator {
    tokens: Vec<Token>,
    pos: usize,
}

impl Evaluator {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ToolError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(ToolError::execution(format!("Expected {expected}, found {t}"))),
            None => Err(ToolError::execution(format!(
                "Expected {expected}, found end of expression"
            ))),
        }
    }

    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut value = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                value += self.term()?;
            } else if self.eat(&Token::Minus) {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, ToolError> {
        let mut value = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star | Token::Slash | Token::DoubleSlash | Token::Percent) => {
                    self.next()
                }
                _ => return Ok(value),
            };
            let rhs = self.unary()?;
            value = match op {
                Some(Token::Star) => value * rhs,
                Some(_) if rhs == 0.0 => {
                    return Err(ToolError::execution("Division by zero"));
                }
                Some(Token::Slash) => value / rhs,
                Some(Token::DoubleSlash) => (value / rhs).floor(),
                // Result takes the sign of the divisor.
                _ => value - rhs * (value / rhs).floor(),
            };
        }
    }

    fn unary(&mut self) -> Result<f64, ToolError> {
        if self.eat(&Token::Minus) {
            return Ok(-self.unary()?);
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, ToolError> {
        let base = self.primary()?;
        if !self.eat(&Token::Caret) {
            return Ok(base);
        }
        let exponent = self.unary()?;
        if exponent.abs() > MAX_EXPONENT {
            return Err(ToolError::execution(format!(
                "Exponent too large (max {MAX_EXPONENT})"
            )));
        }
        if base.abs() > MAX_POW_BASE {
            return Err(ToolError::execution("Base too large for exponentiation"));
        }
        if base == 0.0 && exponent < 0.0 {
            return Err(ToolError::execution("Division by zero"));
        }
        Ok(base.powf(exponent))
    }

    fn primary(&mut self) -> Result<f64, ToolError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = vec![self.expr()?];
                    while self.eat(&Token::Comma) {
                        args.push(self.expr()?);
                    }
                    self.expect(&Token::RParen)?;
                    call_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(t) => Err(ToolError::execution(format!("Unexpected {t}"))),
            None => Err(ToolError::execution("Unexpected end of expression")),
        }
    }
}

fn constant(name: &str) -> Result<f64, ToolError> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        _ => Err(ToolError::execution(format!("Name '{name}' is not defined"))),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, ToolError> {
    if !FUNCTIONS.contains(&name) {
        return Err(ToolError::execution(format!("Function '{name}' is not supported")));
    }
    let arity_ok = match name {
        "log" | "round" => (1..=2).contains(&args.len()),
        _ => args.len() == 1,
    };
    if !arity_ok {
        return Err(ToolError::execution(format!(
            "Wrong number of arguments for {name}: {}",
            args.len()
        )));
    }
    let x = args[0];
    let domain = |msg: &str| Err(ToolError::execution(msg.to_string()));
    match name {
        "sqrt" if x < 0.0 => domain("Cannot calculate square root of a negative number"),
        "log" | "ln" | "log10" | "log2" if x <= 0.0 => {
            domain("Cannot calculate logarithm of a non-positive number")
        }
        "asin" | "acos" if x.abs() > 1.0 => Err(ToolError::execution(format!(
            "{name} domain error: input must be between -1 and 1"
        ))),
        "factorial" if x < 0.0 || x.fract() != 0.0 => {
            domain("Factorial is only defined for non-negative integers")
        }
        "factorial" if x > MAX_FACTORIAL => Err(ToolError::execution(format!(
            "Factorial argument too large (max {MAX_FACTORIAL})"
        ))),
        "sin" => Ok(x.sin()),
        "cos" => Ok(x.cos()),
        "tan" => Ok(x.tan()),
        "asin" => Ok(x.asin()),
        "acos" => Ok(x.acos()),
        "atan" => Ok(x.atan()),
        "sinh" => Ok(x.sinh()),
        "cosh" => Ok(x.cosh()),
        "tanh" => Ok(x.tanh()),
        "exp" => Ok(x.exp()),
        "ln" => Ok(x.ln()),
        "log" => match args.get(1) {
            Some(&base) if base <= 0.0 || base == 1.0 => domain("Invalid logarithm base"),
            Some(&base) => Ok(x.log(base)),
            None => Ok(x.ln()),
        },
        "log10" => Ok(x.log10()),
        "log2" => Ok(x.log2()),
        "sqrt" => Ok(x.sqrt()),
        "abs" => Ok(x.abs()),
        "round" => match args.get(1) {
            Some(&digits) => {
                let factor = 10f64.powi(digits.clamp(-15.0, 15.0) as i32);
                Ok((x * factor).round() / factor)
            }
            None => Ok(x.round()),
        },
        "floor" => Ok(x.floor()),
        "ceil" => Ok(x.ceil()),
        "degrees" => Ok(x.to_degrees()),
        "radians" => Ok(x.to_radians()),
        "factorial" => Ok((1..=x as u64).fold(1.0, |acc, k| acc * k as f64)),
        _ => Err(ToolError::execution(format!("Function '{name}' is not supported"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::ManagedTool;

    fn eval(s: &str) -> f64 {
        evaluate(s).unwrap()
    }

    fn eval_err(s: &str) -> String {
        evaluate(s).unwrap_err().to_string()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("2+2"), 4.0);
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("2^3^2"), 512.0);
        assert_eq!(eval("2**10"), 1024.0);
        assert_eq!(eval("-2^2"), -4.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("7 // 2"), 3.0);
        assert_eq!(eval("-7 % 3"), 2.0);
        assert_eq!(eval("1.5e3"), 1500.0);
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(eval("sqrt(16)"), 4.0);
        assert_eq!(eval("factorial(5)"), 120.0);
        assert_eq!(eval("log(8, 2)"), 3.0);
        assert_eq!(eval("round(3.14159, 2)"), 3.14);
        assert!((eval("sin(pi/2)") - 1.0).abs() < 1e-12);
        assert!((eval("E") - std::f64::consts::E).abs() < 1e-12);
        assert_eq!(eval("abs(-3) + floor(2.7) + ceil(0.2)"), 6.0);
    }

    #[test]
    fn domain_errors() {
        assert_eq!(eval_err("1/0"), "Division by zero");
        assert_eq!(eval_err("5 % 0"), "Division by zero");
        assert!(eval_err("sqrt(-1)").contains("square root"));
        assert!(eval_err("log(0)").contains("logarithm"));
        assert!(eval_err("factorial(2.5)").contains("non-negative integers"));
        assert!(eval_err("factorial(171)").contains("too large"));
        assert!(eval_err("2^1001").starts_with("Exponent too large"));
        assert!(eval_err("acos(2)").contains("between -1 and 1"));
    }

    #[test]
    fn rejects_non_math() {
        assert!(eval_err("__import__(1)").contains("not supported"));
        assert!(eval_err("x + 1").contains("not defined"));
        assert!(eval_err("2 +").contains("end of expression"));
        assert!(eval_err("(1 + 2").contains("')'"));
        assert!(eval_err("1; 2").contains("Unsupported character"));
        assert!(eval_err(&"1+".repeat(300)).contains("too long"));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(3.14159), "3.14159");
        assert_eq!(format_number(1.5e7), "15000000");
        assert_eq!(format_number(1.5e-7), "1.5000000000e-7");
    }

    #[tokio::test]
    async fn tool_accepts_string_expression() {
        let tool = ManagedTool::new(CalculatorTool::new());
        let mut args = ToolArgs::new();
        args.insert("expression".into(), Value::String("2+2".into()));
        let result = tool.run(&args).await;
        let content = result.content().unwrap();
        assert_eq!(content["result"], json!(4));
        assert_eq!(content["formatted_result"], "4");
        assert_eq!(content["expression"], "2+2");
    }

    #[tokio::test]
    async fn tool_errors_become_error_results() {
        let tool = ManagedTool::new(CalculatorTool::new());
        let mut args = ToolArgs::new();
        args.insert("expression".into(), Value::String("1/0".into()));
        let result = tool.run(&args).await;
        assert!(!result.success());
        assert_eq!(result.error(), Some("Division by zero"));

        let missing = tool.run(&ToolArgs::new()).await;
        assert_eq!(missing.error(), Some("Missing required parameters: expression"));
    }
}
