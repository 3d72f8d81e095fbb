//! Error types shared by the tokenizer, parser and registry.

use crate::token::{Span, Token, TokenKind};

/// A failure to compile a search expression. Compilation never yields a
/// partial result: the first error aborts the whole query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
    #[source]
    pub cause: Option<ParseErrorCause>,
}

/// The lower-level reason behind a [`ParseError`], when there is one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorCause {
    #[error("regex {pattern:?}: {detail}")]
    Regex {
        pattern: String,
        /// Character offset of the syntax error inside `pattern`.
        offset: Option<usize>,
        detail: String,
    },

    #[error("expected {}, found {found}", describe_expected(.expected))]
    UnexpectedToken {
        expected: Option<TokenKind>,
        found: TokenKind,
    },

    #[error("cannot parse timestamp {input:?}: {detail}")]
    Timestamp { input: String, detail: String },
}

fn describe_expected(expected: &Option<TokenKind>) -> String {
    match expected {
        Some(kind) => kind.to_string(),
        None => TokenKind::Eof.to_string(),
    }
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            cause: None,
        }
    }

    pub fn at_position(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
            cause: None,
        }
    }

    /// `(` without a matching `)` and similar "wrong token here" failures.
    pub fn expected_token(expected: TokenKind, found: Token) -> Self {
        Self {
            message: format!("Unexpected token. Expected {}, found {}", expected, found.kind),
            span: Some(found.span),
            cause: Some(ParseErrorCause::UnexpectedToken {
                expected: Some(expected),
                found: found.kind,
            }),
        }
    }

    /// A token left over after the top-level expression.
    pub fn unexpected_token(found: Token) -> Self {
        Self {
            message: format!("Unexpected token: {}", found.kind),
            span: Some(found.span),
            cause: Some(ParseErrorCause::UnexpectedToken {
                expected: None,
                found: found.kind,
            }),
        }
    }

    pub fn regex(pattern: &str, offset: Option<usize>, detail: String) -> Self {
        let message = match offset {
            Some(offset) => format!(
                "The regex \"{pattern}\" had a parse error at offset {offset}, \
                 full error:\n\n{detail}"
            ),
            None => format!("The regex \"{pattern}\" had a parse error, full error:\n\n{detail}"),
        };
        Self {
            message,
            span: None,
            cause: Some(ParseErrorCause::Regex {
                pattern: pattern.to_string(),
                offset,
                detail,
            }),
        }
    }

    pub fn timestamp(input: &str, detail: String) -> Self {
        Self {
            message: format!("Cannot parse timestamp '{input}'"),
            span: None,
            cause: Some(ParseErrorCause::Timestamp {
                input: input.to_string(),
                detail,
            }),
        }
    }
}

/// Host-integration failures of the match factory registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a match factory is already registered for keyword '{0}'")]
    DuplicateKeyword(String),

    #[error("keyword must not be empty")]
    EmptyKeyword,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::KeyToken;
    use std::error::Error;

    #[test]
    fn test_regex_error_message_with_offset() {
        let err = ParseError::regex("[", Some(0), "unclosed character class".to_string());
        assert!(err.message.contains("at offset 0"));
        assert!(err.source().is_some());
        assert!(matches!(
            err.cause,
            Some(ParseErrorCause::Regex { offset: Some(0), .. })
        ));
    }

    #[test]
    fn test_expected_token_keeps_found_token() {
        let found = Token::new(
            TokenKind::Key(KeyToken::unquoted("bar".to_string())),
            Span::new(4, 7),
        );
        let err = ParseError::expected_token(TokenKind::RightParen, found);
        assert_eq!(err.span, Some(Span::new(4, 7)));
        assert_eq!(err.to_string(), "Unexpected token. Expected ')', found \"bar\"");
    }
}
