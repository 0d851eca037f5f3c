//! Tokenizer for selector expressions
//!
//! Keywords are case-insensitive, string literals use single quotes with `''`
//! as the embedded quote, and numeric literals are either integral or decimal
//! with an optional exponent.

use super::SelectorError;

/// A lexical token together with its byte offset in the source expression
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    StringLit(String),
    IntLit(i64),
    FloatLit(f64),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Between,
    In,
    Like,
    Escape,
    Is,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("identifier '{name}'"),
            TokenKind::StringLit(s) => format!("string '{s}'"),
            TokenKind::IntLit(i) => format!("number {i}"),
            TokenKind::FloatLit(f) => format!("number {f}"),
            TokenKind::Eof => "end of expression".to_string(),
            other => format!("{other:?}").to_uppercase(),
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SelectorError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let kind = match c {
            '(' => {
                pos += 1;
                TokenKind::LParen
            }
            ')' => {
                pos += 1;
                TokenKind::RParen
            }
            ',' => {
                pos += 1;
                TokenKind::Comma
            }
            '+' => {
                pos += 1;
                TokenKind::Plus
            }
            '-' => {
                pos += 1;
                TokenKind::Minus
            }
            '*' => {
                pos += 1;
                TokenKind::Star
            }
            '/' => {
                pos += 1;
                TokenKind::Slash
            }
            '=' => {
                pos += 1;
                TokenKind::Eq
            }
            '!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                TokenKind::Ne
            }
            '<' => match bytes.get(pos + 1) {
                Some(b'>') => {
                    pos += 2;
                    TokenKind::Ne
                }
                Some(b'=') => {
                    pos += 2;
                    TokenKind::Le
                }
                _ => {
                    pos += 1;
                    TokenKind::Lt
                }
            },
            '>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::Ge
                } else {
                    pos += 1;
                    TokenKind::Gt
                }
            }
            '\'' => {
                let (literal, next) = read_string(source, pos)?;
                pos = next;
                TokenKind::StringLit(literal)
            }
            c if c.is_ascii_digit() || (c == '.' && next_is_digit(bytes, pos)) => {
                let (kind, next) = read_number(source, pos)?;
                pos = next;
                kind
            }
            c if is_identifier_start(c) => {
                let mut end = pos + 1;
                while end < bytes.len() && is_identifier_part(bytes[end] as char) {
                    end += 1;
                }
                let word = &source[pos..end];
                pos = end;
                keyword_or_identifier(word)
            }
            _ => {
                // Non-ASCII identifiers are allowed; anything else is rejected.
                let ch = source[pos..].chars().next().unwrap_or('?');
                if ch.is_alphabetic() {
                    let mut end = pos + ch.len_utf8();
                    for next in source[end..].chars() {
                        if next.is_alphanumeric() || next == '_' || next == '$' || next == '.' {
                            end += next.len_utf8();
                        } else {
                            break;
                        }
                    }
                    let word = &source[pos..end];
                    pos = end;
                    TokenKind::Identifier(word.to_string())
                } else {
                    return Err(SelectorError::UnexpectedCharacter { ch, offset: pos });
                }
            }
        };
        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn next_is_digit(bytes: &[u8], pos: usize) -> bool {
    bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit())
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn keyword_or_identifier(word: &str) -> TokenKind {
    match word.to_ascii_uppercase().as_str() {
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "BETWEEN" => TokenKind::Between,
        "IN" => TokenKind::In,
        "LIKE" => TokenKind::Like,
        "ESCAPE" => TokenKind::Escape,
        "IS" => TokenKind::Is,
        "NULL" => TokenKind::Null,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        _ => TokenKind::Identifier(word.to_string()),
    }
}

/// Reads a single-quoted literal starting at `start`; returns the unescaped
/// text and the offset just past the closing quote.
fn read_string(source: &str, start: usize) -> Result<(String, usize), SelectorError> {
    let mut out = String::new();
    let mut chars = source[start + 1..].char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if ch == '\'' {
            if let Some((_, '\'')) = chars.peek() {
                out.push('\'');
                chars.next();
                continue;
            }
            return Ok((out, start + 1 + i + 1));
        }
        out.push(ch);
    }
    Err(SelectorError::UnterminatedString { offset: start })
}

fn read_number(source: &str, start: usize) -> Result<(TokenKind, usize), SelectorError> {
    let bytes = source.as_bytes();
    let mut end = start;
    let mut is_float = false;

    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        if exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            is_float = true;
            end = exp_end;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }

    let text = &source[start..end];
    let invalid = || SelectorError::InvalidNumber {
        text: text.to_string(),
        offset: start,
    };

    // Java-style long/float suffixes are tolerated and ignored.
    let mut next = end;
    if next < bytes.len() && matches!(bytes[next], b'l' | b'L' | b'f' | b'F' | b'd' | b'D') {
        if matches!(bytes[next], b'f' | b'F' | b'd' | b'D') {
            is_float = true;
        }
        next += 1;
    }

    let kind = if is_float {
        TokenKind::FloatLit(text.parse::<f64>().map_err(|_| invalid())?)
    } else {
        TokenKind::IntLit(text.parse::<i64>().map_err(|_| invalid())?)
    };
    Ok((kind, next))
}
