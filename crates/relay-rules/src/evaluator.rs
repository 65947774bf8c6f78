//! Restricted arithmetic evaluator.
//!
//! Accepts digits, `.`, whitespace, parentheses and the operators
//! `+ - * / % ^`. Any other character is rejected before a value is produced.

use thiserror::Error;

const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),
    #[error("expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("malformed number '{0}'")]
    BadNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression nests too deeply")]
    TooDeep,
    #[error("result is not a finite number")]
    NonFinite,
}

pub fn is_allowed_char(ch: char) -> bool {
    ch.is_ascii_digit() || ch.is_whitespace() || "+-*/%^().".contains(ch)
}

/// Evaluates `expression` with the usual precedence; `^` is right-associative
/// and binds tighter than unary minus, so `-2^2` is `-4`.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    if let Some(bad) = expression.chars().find(|ch| !is_allowed_char(*ch)) {
        return Err(EvalError::UnexpectedChar(bad));
    }
    let mut parser = Parser {
        chars: expression.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(ch) = parser.peek() {
        return Err(EvalError::UnexpectedChar(ch));
    }
    finite(value)
}

/// Renders integers without a fractional part and everything else with at
/// most four decimals, trailing zeros trimmed.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        let rendered = format!("{value:.0}");
        return if rendered == "-0" {
            "0".to_string()
        } else {
            rendered
        };
    }
    let rendered = format!("{value:.4}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn finite(value: f64) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&mut self) -> Option<char> {
        while matches!(self.chars.get(self.pos), Some(ch) if ch.is_whitespace()) {
            self.pos += 1;
        }
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EvalError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(EvalError::DivisionByZero),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, EvalError> {
        self.enter()?;
        let value = match self.peek() {
            Some('-') => {
                self.pos += 1;
                -self.unary()?
            }
            Some('+') => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.primary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.unary()?;
            return finite(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.enter()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.bump() {
                    Some(')') => Ok(value),
                    Some(other) => Err(EvalError::UnexpectedChar(other)),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(ch) if ch.is_ascii_digit() || ch == '.' => self.number(),
            Some(other) => Err(EvalError::UnexpectedChar(other)),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let start = self.pos;
        while matches!(self.chars.get(self.pos), Some(ch) if ch.is_ascii_digit() || *ch == '.') {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| EvalError::BadNumber(literal))
    }
}
