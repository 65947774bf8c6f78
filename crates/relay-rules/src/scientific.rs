use std::sync::OnceLock;

use regex::Regex;

use crate::evaluator::is_allowed_char;

const MAX_FACTORIAL: f64 = 170.0;

fn call_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(sqrt|sin|cos|tan|log|ln|exp|abs|factorial)\s*\(\s*(-?\d+(?:\.\d+)?)\s*\)",
            )
            .ok()
        })
        .as_ref()
}

/// A single-argument named function call found in free text.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub argument: f64,
    pub literal: String,
}

fn function_call(captures: &regex::Captures<'_>) -> Option<FunctionCall> {
    let name = captures.get(1)?.as_str().to_ascii_lowercase();
    let raw_argument = captures.get(2)?.as_str();
    let argument = raw_argument.parse::<f64>().ok()?;
    Some(FunctionCall {
        literal: format!("{name}({raw_argument})"),
        name,
        argument,
    })
}

/// The run of arithmetic text around the first function call in a message.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    pub call: FunctionCall,
    pub value: f64,
    /// The run as written, with calls in their normalized form.
    pub literal: String,
    /// The run with every call replaced by its parenthesized value.
    pub substituted: String,
}

impl CallExpression {
    /// True when the run is nothing but the call itself.
    pub fn is_bare_call(&self) -> bool {
        self.literal == self.call.literal
    }
}

enum Piece {
    Char(char),
    Call(FunctionCall),
}

/// Finds the first function call and widens it to the surrounding run of
/// arithmetic characters, so `sqrt(16) + 1` is kept whole. Returns `None` when
/// a call inside the run is outside its function's domain.
pub fn find_call_expression(text: &str) -> Option<CallExpression> {
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for captures in call_pattern()?.captures_iter(text) {
        let whole = captures.get(0)?;
        pieces.extend(text[cursor..whole.start()].chars().map(Piece::Char));
        pieces.push(Piece::Call(function_call(&captures)?));
        cursor = whole.end();
    }
    pieces.extend(text[cursor..].chars().map(Piece::Char));

    let first = pieces.iter().position(|piece| matches!(piece, Piece::Call(_)))?;
    let in_run = |piece: &Piece| match piece {
        Piece::Char(ch) => is_allowed_char(*ch),
        Piece::Call(_) => true,
    };
    let start = pieces[..first]
        .iter()
        .rposition(|piece| !in_run(piece))
        .map_or(0, |index| index + 1);
    let end = pieces[first..]
        .iter()
        .position(|piece| !in_run(piece))
        .map_or(pieces.len(), |offset| first + offset);

    let mut literal = String::new();
    let mut substituted = String::new();
    for piece in &pieces[start..end] {
        match piece {
            Piece::Char(ch) => {
                literal.push(*ch);
                substituted.push(*ch);
            }
            Piece::Call(call) => {
                let value = apply_function(&call.name, call.argument)?;
                literal.push_str(&call.literal);
                substituted.push_str(&format!("({value})"));
            }
        }
    }
    let Piece::Call(call) = &pieces[first] else {
        return None;
    };
    Some(CallExpression {
        value: apply_function(&call.name, call.argument)?,
        call: call.clone(),
        literal: literal.trim().to_string(),
        substituted: substituted.trim().to_string(),
    })
}

/// Applies `name` to `x`. Returns `None` outside the function's domain.
pub fn apply_function(name: &str, x: f64) -> Option<f64> {
    let value = match name {
        "sqrt" if x >= 0.0 => x.sqrt(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => {
            if x.cos().abs() < 1e-12 {
                return None;
            }
            x.tan()
        }
        "log" if x > 0.0 => x.log10(),
        "ln" if x > 0.0 => x.ln(),
        "exp" => x.exp(),
        "abs" => x.abs(),
        "factorial" => factorial(x)?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn factorial(x: f64) -> Option<f64> {
    if x < 0.0 || x.fract() != 0.0 || x > MAX_FACTORIAL {
        return None;
    }
    let n = x as u32;
    Some((1..=n).fold(1.0_f64, |acc, k| acc * f64::from(k)))
}
