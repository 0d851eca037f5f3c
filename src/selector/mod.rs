//! Message selector expressions
//!
//! A selector is a boolean filter over a flat set of message properties,
//! written in the syntax used by message-queue selectors:
//!
//! ```text
//! CI_TYPE = 'complete' AND (CI_STATUS <> 'failed' OR retries > 3)
//! owner LIKE 'ci-%' AND priority BETWEEN 1 AND 5
//! CI_NAME IN ('build', 'deploy') AND topic IS NOT NULL
//! ```
//!
//! Evaluation uses three-valued logic: any comparison that touches a missing
//! property is *unknown*, and an unknown result never matches. Evaluation is
//! pure and never fails once the expression has parsed.
//!
//! ```rust
//! use ci_messaging::selector::Selector;
//! use std::collections::HashMap;
//!
//! let selector = Selector::parse("CI_TYPE = 'complete' AND CI_STATUS = 'passed'").unwrap();
//! let mut props = HashMap::new();
//! props.insert("CI_TYPE".to_string(), "complete".to_string());
//! props.insert("CI_STATUS".to_string(), "passed".to_string());
//! assert!(selector.matches(&props));
//! ```

mod lexer;
mod parser;
mod value;

use lexer::{tokenize, Token};
use parser::{ArithOp, CompareOp, Expr, Parser};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub use value::{Number, PropertySource, SelectorValue};

/// Selector parse errors; offsets are byte positions in the expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SelectorError {
    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },
    #[error("Unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("Invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("Expected {expected} at offset {offset}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("ESCAPE must be a single character (offset {offset})")]
    InvalidEscape { offset: usize },
    #[error("LIKE pattern ends with its escape character (offset {offset})")]
    DanglingEscape { offset: usize },
}

impl SelectorError {
    fn unexpected(token: &Token, expected: &str) -> Self {
        SelectorError::UnexpectedToken {
            expected: expected.to_string(),
            found: token.kind.describe(),
            offset: token.offset,
        }
    }
}

/// A parsed selector expression
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    expr: Option<Expr>,
}

impl Selector {
    /// Parse a selector. An empty or blank expression selects every message.
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let expr = if source.trim().is_empty() {
            None
        } else {
            Some(Parser::new(tokenize(source)?).parse()?)
        };
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// A selector that matches everything
    pub fn match_all() -> Self {
        Self {
            source: String::new(),
            expr: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match_all(&self) -> bool {
        self.expr.is_none()
    }

    /// Evaluate against a property set; unknown results do not match
    pub fn matches<P: PropertySource + ?Sized>(&self, properties: &P) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => truth(&eval(expr, properties)) == Some(true),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match_all() {
            write!(f, "<all messages>")
        } else {
            write!(f, "{}", self.source)
        }
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

/// Three-valued truth of an evaluated value
fn truth(value: &SelectorValue) -> Option<bool> {
    value.as_bool()
}

fn from_truth(t: Option<bool>) -> SelectorValue {
    t.map(SelectorValue::Bool).unwrap_or(SelectorValue::Null)
}

fn eval<P: PropertySource + ?Sized>(expr: &Expr, props: &P) -> SelectorValue {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Property(name) => props.property(name).unwrap_or(SelectorValue::Null),
        Expr::Not(inner) => from_truth(truth(&eval(inner, props)).map(|b| !b)),
        Expr::And(l, r) => {
            let left = truth(&eval(l, props));
            if left == Some(false) {
                return SelectorValue::Bool(false);
            }
            let right = truth(&eval(r, props));
            from_truth(match (left, right) {
                (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            })
        }
        Expr::Or(l, r) => {
            let left = truth(&eval(l, props));
            if left == Some(true) {
                return SelectorValue::Bool(true);
            }
            let right = truth(&eval(r, props));
            from_truth(match (left, right) {
                (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            })
        }
        Expr::Compare(op, l, r) => from_truth(compare(*op, &eval(l, props), &eval(r, props))),
        Expr::Arithmetic(op, l, r) => arithmetic(*op, &eval(l, props), &eval(r, props)),
        Expr::Negate(inner) => match eval(inner, props).as_number() {
            Some(Number::Int(i)) => i
                .checked_neg()
                .map(SelectorValue::Int)
                .unwrap_or(SelectorValue::Float(-(i as f64))),
            Some(Number::Float(f)) => SelectorValue::Float(-f),
            None => SelectorValue::Null,
        },
        Expr::Between {
            value,
            low,
            high,
            negated,
        } => {
            let v = eval(value, props);
            let lower = compare(CompareOp::Ge, &v, &eval(low, props));
            let upper = compare(CompareOp::Le, &v, &eval(high, props));
            let within = match (lower, upper) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            from_truth(negate_if(within, *negated))
        }
        Expr::In {
            value,
            list,
            negated,
        } => {
            let v = eval(value, props);
            if v.is_null() {
                return SelectorValue::Null;
            }
            let found = list
                .iter()
                .any(|item| compare(CompareOp::Eq, &v, item) == Some(true));
            from_truth(negate_if(Some(found), *negated))
        }
        Expr::Like {
            value,
            pattern,
            negated,
        } => {
            let text = match eval(value, props) {
                SelectorValue::Str(s) => s,
                _ => return SelectorValue::Null,
            };
            from_truth(negate_if(Some(pattern.is_match(&text)), *negated))
        }
        Expr::IsNull { value, negated } => {
            let is_null = eval(value, props).is_null();
            SelectorValue::Bool(is_null != *negated)
        }
    }
}

fn negate_if(value: Option<bool>, negated: bool) -> Option<bool> {
    value.map(|b| b != negated)
}

fn compare(op: CompareOp, left: &SelectorValue, right: &SelectorValue) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }

    let ordering = match (left, right) {
        (SelectorValue::Str(a), SelectorValue::Str(b)) => {
            // Text compares with text only by equality.
            return match op {
                CompareOp::Eq => Some(a == b),
                CompareOp::Ne => Some(a != b),
                _ => None,
            };
        }
        (SelectorValue::Bool(_), _) | (_, SelectorValue::Bool(_)) => {
            let (a, b) = (left.as_bool()?, right.as_bool()?);
            return match op {
                CompareOp::Eq => Some(a == b),
                CompareOp::Ne => Some(a != b),
                _ => None,
            };
        }
        _ => left.as_number()?.compare(right.as_number()?)?,
    };

    Some(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    })
}

fn arithmetic(op: ArithOp, left: &SelectorValue, right: &SelectorValue) -> SelectorValue {
    let (a, b) = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => return SelectorValue::Null,
    };

    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        let result = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Div => x.checked_div(y),
        };
        if let Some(r) = result {
            return SelectorValue::Int(r);
        }
        if op == ArithOp::Div && y == 0 {
            return SelectorValue::Null;
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
    };
    if result.is_finite() {
        Number::Float(result).into_value()
    } else {
        SelectorValue::Null
    }
}
