//! Infix arithmetic evaluator backing the `calculator` tool.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::Tool;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression such as \"2+2\" or \"(3.5 * 4) / 2\"."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression to evaluate",
                }
            },
            "required": ["expression"],
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("calculator requires an \"expression\" string argument"))?;
        let value = evaluate(expression)?;
        Ok(format_number(value))
    }
}

/// Integers render without a trailing `.0` so tool output reads naturally.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Grammar:
///   expr    := term (('+' | '-') term)*
///   term    := factor (('*' | '/') factor)*
///   factor  := '-' factor | primary ('^' factor)?
///   primary := number | '(' expr ')'
fn evaluate(input: &str) -> Result<f64> {
    let mut parser = Parser {
        input,
        bytes: input.as_bytes(),
        position: 0,
    };
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.peek().is_some() {
        bail!("unexpected input at offset {}", parser.position);
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    position: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    fn bump(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(byte) if byte.is_ascii_whitespace()) {
            self.bump();
        }
    }

    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'+') => {
                    self.bump();
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.bump();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'*') => {
                    self.bump();
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.bump();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        bail!("division by zero");
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64> {
        self.skip_whitespace();
        if self.peek() == Some(b'-') {
            self.bump();
            return Ok(-self.factor()?);
        }
        let base = self.primary()?;
        self.skip_whitespace();
        if self.peek() == Some(b'^') {
            self.bump();
            let exponent = self.factor()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.bump();
                let value = self.expression()?;
                self.skip_whitespace();
                if self.peek() != Some(b')') {
                    bail!("expected closing parenthesis at offset {}", self.position);
                }
                self.bump();
                Ok(value)
            }
            Some(byte) if byte.is_ascii_digit() || byte == b'.' => self.number(),
            Some(byte) => bail!(
                "unexpected character {:?} at offset {}",
                byte as char,
                self.position
            ),
            None => bail!("unexpected end of expression"),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.position;
        while matches!(self.peek(), Some(byte) if byte.is_ascii_digit() || byte == b'.') {
            self.bump();
        }
        // ASCII token, so the slice boundaries are char boundaries.
        let literal = &self.input[start..self.position];
        literal
            .parse::<f64>()
            .map_err(|_| anyhow!("invalid number {literal:?}"))
    }
}
