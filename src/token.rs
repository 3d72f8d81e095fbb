//! The token definition for the search language.

use std::fmt;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Operators
    Not, // leading "-" or "not"
    Or,  // "|" or "or"
    Xor, // "^" or "xor"

    // Punctuation
    LeftParen,    // (
    RightParen,   // )
    Colon,        // :
    Equals,       // =
    Tilde,        // ~
    LessThan,     // <
    GreaterThan,  // >
    QuestionMark, // ?

    // Literals
    Key(KeyToken),

    // Special
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Not => f.write_str("'-'"),
            TokenKind::Or => f.write_str("'|'"),
            TokenKind::Xor => f.write_str("'^'"),
            TokenKind::LeftParen => f.write_str("'('"),
            TokenKind::RightParen => f.write_str("')'"),
            TokenKind::Colon => f.write_str("':'"),
            TokenKind::Equals => f.write_str("'='"),
            TokenKind::Tilde => f.write_str("'~'"),
            TokenKind::LessThan => f.write_str("'<'"),
            TokenKind::GreaterThan => f.write_str("'>'"),
            TokenKind::QuestionMark => f.write_str("'?'"),
            TokenKind::Key(key) => write!(f, "\"{}\"", key.text),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

/// Payload of a `KEY` token: the literal text plus its numeric readings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyToken {
    pub text: String,
    /// The whole text as an integer, or the range prefix when `is_range` is set.
    pub number: Option<i64>,
    /// The range suffix after an interior `-`.
    pub range_end: Option<i64>,
    pub is_range: bool,
}

impl KeyToken {
    /// A quoted literal never gets a numeric interpretation.
    pub fn quoted(text: String) -> Self {
        Self {
            text,
            ..Default::default()
        }
    }

    pub fn unquoted(text: String) -> Self {
        let mut number = text.parse::<i64>().ok();
        let mut range_end = None;
        let split = text
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '-')
            .map(|(pos, _)| pos);
        if let Some(pos) = split {
            number = text[..pos].parse::<i64>().ok();
            range_end = text[pos + 1..].parse::<i64>().ok();
        }
        Self {
            text,
            number,
            range_end,
            is_range: split.is_some(),
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// An inclusive integer interval; `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    start: i64,
    end: i64,
}

impl Range {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn contains(&self, value: i64) -> bool {
        self.start <= value && value <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
