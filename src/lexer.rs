//! 搜索表达式的词法分析器
//!
//! 与一般的迭代式词法分析器不同，这里的 `Tokenizer` 是按需产生 token 的，
//! 并且支持回退一个 token（peek-and-push-back），语法分析器依靠它实现
//! “先试探、不匹配就还原”的逻辑。

use crate::error::ParseError;
use crate::token::{KeyToken, Range, Span, Token, TokenKind};

/// 未加引号的文本遇到这些字符时结束
const SPECIAL_CHARS: &[char] = &['"', ':', '(', ')', '|', '^', '&', '?', '=', '~', '<', '>'];

pub struct Tokenizer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
    /// 被退回的 token，下一次 `next_token` 优先返回它
    pushed_back: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Tokenizer {
            input,
            position: 0,
            pushed_back: None,
        }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn single(&mut self, kind: TokenKind, start: usize) -> Token {
        self.bump();
        Token::new(kind, Span::new(start, self.position))
    }

    /// 读取一段文本，处理反斜杠转义
    ///
    /// 带引号时只有 `"` 结束文本（空白原样保留）；
    /// 不带引号时遇到特殊字符或空白即结束。
    fn read_string(&mut self, quoted: bool) -> String {
        let mut text = String::new();
        let mut escape = false;
        while let Some(c) = self.peek() {
            if !escape {
                let terminates = if quoted {
                    c == '"'
                } else {
                    SPECIAL_CHARS.contains(&c) || c.is_whitespace()
                };
                if terminates {
                    break;
                }
            }
            if c == '\\' && !escape {
                escape = true;
            } else {
                text.push(c);
                escape = false;
            }
            self.bump();
        }
        text
    }

    /// 读取下一个 token；如果之前有退回的 token，则先返回它
    ///
    /// 输入结束后会一直返回 `Eof`。
    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.pushed_back.take() {
            return token;
        }

        loop {
            self.skip_whitespace();
            let start = self.position;

            let Some(c) = self.peek() else {
                return Token::new(TokenKind::Eof, Span::new(start, start));
            };

            let token = match c {
                ':' => self.single(TokenKind::Colon, start),
                '=' => self.single(TokenKind::Equals, start),
                '~' => self.single(TokenKind::Tilde, start),
                '<' => self.single(TokenKind::LessThan, start),
                '>' => self.single(TokenKind::GreaterThan, start),
                '(' => self.single(TokenKind::LeftParen, start),
                ')' => self.single(TokenKind::RightParen, start),
                '|' => self.single(TokenKind::Or, start),
                '^' => self.single(TokenKind::Xor, start),
                '?' => self.single(TokenKind::QuestionMark, start),
                '&' => {
                    // "&" 等价于隐式 AND，直接跳过
                    self.bump();
                    continue;
                }
                '"' => {
                    self.bump(); // 消费开始引号
                    let text = self.read_string(true);
                    self.bump(); // 消费结束引号
                    Token::new(
                        TokenKind::Key(KeyToken::quoted(text)),
                        Span::new(start, self.position),
                    )
                }
                _ => {
                    let mut text = String::new();
                    if c == '-' {
                        self.bump();
                        match self.peek() {
                            Some(d) if d.is_ascii_digit() => text.push('-'),
                            _ => return Token::new(TokenKind::Not, Span::new(start, self.position)),
                        }
                    }
                    text.push_str(&self.read_string(false));
                    let span = Span::new(start, self.position);

                    if text.eq_ignore_ascii_case("not") {
                        Token::new(TokenKind::Not, span)
                    } else if text.eq_ignore_ascii_case("or") {
                        Token::new(TokenKind::Or, span)
                    } else if text.eq_ignore_ascii_case("xor") {
                        Token::new(TokenKind::Xor, span)
                    } else if text.eq_ignore_ascii_case("and") {
                        continue;
                    } else {
                        Token::new(TokenKind::Key(KeyToken::unquoted(text)), span)
                    }
                }
            };
            return token;
        }
    }

    /// 退回一个 token，只支持一个 token 的回退
    fn push_back(&mut self, token: Token) {
        debug_assert!(self.pushed_back.is_none(), "only one token of pushback");
        self.pushed_back = Some(token);
    }

    /// 如果下一个 token 的类型与 `kind` 相同则消费它并返回 true，否则退回
    pub fn peek_equals(&mut self, kind: &TokenKind) -> bool {
        let token = self.next_token();
        if std::mem::discriminant(&token.kind) == std::mem::discriminant(kind) {
            true
        } else {
            self.push_back(token);
            false
        }
    }

    /// 下一个 token 是 KEY 时返回其文本，否则退回并返回 None
    pub fn read_text_or_number(&mut self) -> Option<String> {
        let token = self.next_token();
        match token.kind {
            TokenKind::Key(key) => Some(key.text),
            _ => {
                self.push_back(token);
                None
            }
        }
    }

    /// 读取一个整数，失败时返回带 `error_message` 的错误
    pub fn read_number(&mut self, error_message: &str) -> Result<i64, ParseError> {
        let token = self.next_token();
        match &token.kind {
            TokenKind::Key(KeyToken {
                number: Some(number),
                is_range: false,
                ..
            }) => Ok(*number),
            _ => Err(ParseError::at_position(error_message, token.span)),
        }
    }

    /// 读取一个范围
    ///
    /// - `n`   → `n..=n`
    /// - `-n`  → `0..=n`
    /// - `a-b` → `a..=b`
    /// - `a-`  → `a..=i64::MAX`
    pub fn read_range(&mut self, error_message: &str) -> Result<Range, ParseError> {
        let token = self.next_token();
        let TokenKind::Key(key) = &token.kind else {
            return Err(ParseError::at_position(error_message, token.span));
        };

        match (key.is_range, key.number, key.range_end) {
            (false, Some(n), _) if n >= 0 => Ok(Range::new(n, n)),
            (false, Some(n), _) => Ok(Range::new(0, n.saturating_abs())),
            (true, Some(start), None) => Ok(Range::new(start, i64::MAX)),
            (true, Some(start), Some(end)) => Ok(Range::new(start, end)),
            _ => Err(ParseError::at_position(error_message, token.span)),
        }
    }
}
