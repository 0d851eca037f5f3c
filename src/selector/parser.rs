//! Recursive-descent parser producing the selector AST
//!
//! Precedence, loosest first: `OR`, `AND`, `NOT`, predicates (comparison,
//! `BETWEEN`, `IN`, `LIKE`, `IS NULL`), additive, multiplicative, unary sign.

use super::lexer::{Token, TokenKind};
use super::value::SelectorValue;
use super::SelectorError;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(SelectorValue),
    Property(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arithmetic(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    In {
        value: Box<Expr>,
        list: Vec<SelectorValue>,
        negated: bool,
    },
    Like {
        value: Box<Expr>,
        pattern: LikePattern,
        negated: bool,
    },
    IsNull {
        value: Box<Expr>,
        negated: bool,
    },
}

/// A LIKE pattern compiled once into an anchored regex
///
/// `%` matches any run of characters and `_` exactly one.
#[derive(Debug, Clone)]
pub struct LikePattern {
    pub source: String,
    pub escape: Option<char>,
    regex: Regex,
}

impl LikePattern {
    pub fn compile(
        source: String,
        escape: Option<char>,
        offset: usize,
    ) -> Result<Self, SelectorError> {
        let mut re = String::from("(?s)^");
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            if Some(c) == escape {
                let next = chars
                    .next()
                    .ok_or(SelectorError::DanglingEscape { offset })?;
                re.push_str(&regex::escape(&next.to_string()));
            } else if c == '%' {
                re.push_str(".*");
            } else if c == '_' {
                re.push('.');
            } else {
                re.push_str(&regex::escape(&c.to_string()));
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|_| SelectorError::UnexpectedToken {
            expected: "a valid LIKE pattern".to_string(),
            found: format!("'{source}'"),
            offset,
        })?;
        Ok(Self {
            source,
            escape,
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for LikePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.escape == other.escape
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a complete expression; trailing tokens are an error
    pub fn parse(mut self) -> Result<Expr, SelectorError> {
        let expr = self.parse_or()?;
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            return Err(SelectorError::unexpected(&token, "end of expression"));
        }
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        // The token stream always ends with Eof and parsing never advances past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), SelectorError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(SelectorError::unexpected(self.peek(), what))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SelectorError> {
        if self.eat(&TokenKind::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, SelectorError> {
        let left = self.parse_additive()?;

        let compare = match self.peek().kind {
            TokenKind::Eq => Some(CompareOp::Eq),
            TokenKind::Ne => Some(CompareOp::Ne),
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Ge => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = compare {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }

        if self.eat(&TokenKind::Is) {
            let negated = self.eat(&TokenKind::Not);
            self.expect(&TokenKind::Null, "NULL")?;
            return Ok(Expr::IsNull {
                value: Box::new(left),
                negated,
            });
        }

        let negated = self.eat(&TokenKind::Not);
        match self.peek().kind {
            TokenKind::Between => {
                self.advance();
                let low = self.parse_additive()?;
                self.expect(&TokenKind::And, "AND")?;
                let high = self.parse_additive()?;
                Ok(Expr::Between {
                    value: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            TokenKind::In => {
                self.advance();
                self.expect(&TokenKind::LParen, "'('")?;
                let mut list = vec![self.parse_list_literal()?];
                while self.eat(&TokenKind::Comma) {
                    list.push(self.parse_list_literal()?);
                }
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(Expr::In {
                    value: Box::new(left),
                    list,
                    negated,
                })
            }
            TokenKind::Like => {
                self.advance();
                let pattern_offset = self.peek().offset;
                let pattern = self.parse_string_literal("LIKE pattern")?;
                let escape = if self.eat(&TokenKind::Escape) {
                    let offset = self.peek().offset;
                    let text = self.parse_string_literal("ESCAPE character")?;
                    let mut chars = text.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(c),
                        _ => return Err(SelectorError::InvalidEscape { offset }),
                    }
                } else {
                    None
                };
                Ok(Expr::Like {
                    value: Box::new(left),
                    pattern: LikePattern::compile(pattern, escape, pattern_offset)?,
                    negated,
                })
            }
            _ if negated => Err(SelectorError::unexpected(
                self.peek(),
                "BETWEEN, IN or LIKE after NOT",
            )),
            _ => Ok(left),
        }
    }

    fn parse_list_literal(&mut self) -> Result<SelectorValue, SelectorError> {
        let token = self.advance();
        match token.kind {
            TokenKind::StringLit(s) => Ok(SelectorValue::Str(s)),
            TokenKind::IntLit(i) => Ok(SelectorValue::Int(i)),
            TokenKind::FloatLit(f) => Ok(SelectorValue::Float(f)),
            _ => Err(SelectorError::unexpected(&token, "literal in IN list")),
        }
    }

    fn parse_string_literal(&mut self, what: &str) -> Result<String, SelectorError> {
        let token = self.advance();
        match token.kind {
            TokenKind::StringLit(s) => Ok(s),
            _ => Err(SelectorError::unexpected(&token, what)),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => ArithOp::Add,
                TokenKind::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => ArithOp::Mul,
                TokenKind::Slash => ArithOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arithmetic(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SelectorError> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        if self.eat(&TokenKind::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SelectorError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Identifier(name) => Ok(Expr::Property(name)),
            TokenKind::StringLit(s) => Ok(Expr::Literal(SelectorValue::Str(s))),
            TokenKind::IntLit(i) => Ok(Expr::Literal(SelectorValue::Int(i))),
            TokenKind::FloatLit(f) => Ok(Expr::Literal(SelectorValue::Float(f))),
            TokenKind::True => Ok(Expr::Literal(SelectorValue::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(SelectorValue::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(SelectorValue::Null)),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(SelectorError::unexpected(&token, "operand")),
        }
    }
}
