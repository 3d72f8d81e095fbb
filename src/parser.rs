//! 搜索表达式的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! compile()
//!   ├─ parse_expression()
//!   │    ├─ 循环: parse_factor()
//!   │    │         ├─ "(" → parse_expression() → 期望 ")"
//!   │    │         ├─ NOT → parse_factor()
//!   │    │         └─ KEY
//!   │    │              ├─ "=" / "~" → ExactKeyValue
//!   │    │              ├─ "<" / ">" → ValueComparison
//!   │    │              ├─ ":"       → 注册表关键字，或 key:value
//!   │    │              ├─ "?"       → BooleanTag
//!   │    │              └─ 其他      → 注册表关键字，或全文搜索
//!   │    │
//!   │    ├─ 每个因子之后读取 OR / XOR，否则视为隐式 AND
//!   │    └─ 从右向左折叠因子列表
//!   │
//!   └─ 期望 EOF
//! ```
//!
//! ## 语法
//!
//! ```text
//! query      := expression EOF
//! expression := factor ( OR expression | XOR expression | expression )?
//! factor     := '(' expression ')'
//!             | NOT factor
//!             | KEY ( '=' value | '~' value | '<' value | '>' value | ':' tail | '?' )?
//! ```
//!
//! 所有二元运算都是右结合的：`a b c` 解析为 `And(a, And(b, c))`，
//! `a or b c` 解析为 `Or(a, And(b, c))`。
//!
//! 表达式层面的折叠是迭代完成的，因此很长的平铺查询不会导致栈溢出；
//! 括号、NOT 和一元关键字会递归，嵌套深度不能超过 [`MAX_NESTING_DEPTH`]。
//!
//! ## 解析示例
//!
//! ```text
//! // 简单文本
//! highway
//!
//! // 标签与组合
//! type=way and (highway=residential or -name:=)
//!
//! // 关键字
//! nodes:3-7 parent type:relation
//!
//! // 正则
//! name~"[Mm]ain.*"
//! ```

use log::trace;

use crate::ast::{AnyText, BinaryOp, CompareMode, ExactKeyValue, KeyValue, Match, ValueComparison};
use crate::error::ParseError;
use crate::lexer::Tokenizer;
use crate::registry::{MatchFactory, MatchRegistry};
use crate::token::TokenKind;

/// 编译选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFlags {
    pub case_sensitive: bool,
    pub regex_search: bool,
}

impl SearchFlags {
    pub fn new(case_sensitive: bool, regex_search: bool) -> Self {
        Self {
            case_sensitive,
            regex_search,
        }
    }
}

/// 括号、NOT 和一元关键字允许的最大嵌套层数
pub const MAX_NESTING_DEPTH: usize = 100;

pub struct SearchCompiler<'r> {
    registry: &'r MatchRegistry,
    flags: SearchFlags,
}

impl<'r> SearchCompiler<'r> {
    pub fn new(registry: &'r MatchRegistry, flags: SearchFlags) -> Self {
        Self { registry, flags }
    }

    /// 编译整个查询；空查询得到 `Match::Always`
    pub fn compile(&self, text: &str) -> Result<Match, ParseError> {
        let mut tokenizer = Tokenizer::new(text);
        let m = self
            .parse_expression(&mut tokenizer, 0)?
            .unwrap_or(Match::Always);

        let next = tokenizer.next_token();
        if next.kind != TokenKind::Eof {
            return Err(ParseError::unexpected_token(next));
        }

        trace!("parsed search expression is {m}");
        Ok(m)
    }

    /// 解析一个表达式；没有任何因子时返回 `None`
    fn parse_expression(
        &self,
        tokenizer: &mut Tokenizer<'_>,
        depth: usize,
    ) -> Result<Option<Match>, ParseError> {
        // 第一步：收集因子和它们之间的运算符
        let mut factors = Vec::new();
        let mut operators = Vec::new();
        let mut missing_operand: Option<&'static str> = None;

        loop {
            let Some(factor) = self.parse_factor(tokenizer, depth)? else {
                if let Some(message) = missing_operand {
                    return Err(ParseError::new(message));
                }
                break;
            };
            factors.push(factor);

            let operator = if tokenizer.peek_equals(&TokenKind::Or) {
                missing_operand = Some("Missing parameter for OR");
                BinaryOp::Or
            } else if tokenizer.peek_equals(&TokenKind::Xor) {
                missing_operand = Some("Missing parameter for XOR");
                BinaryOp::Xor
            } else {
                missing_operand = None;
                BinaryOp::And
            };
            operators.push(operator);
        }

        // 最后一个因子之后的隐式 AND 没有右操作数
        operators.pop();

        // 第二步：从右向左折叠
        let mut factors = factors.into_iter().rev();
        let Some(mut result) = factors.next() else {
            return Ok(None);
        };
        for (lhs, operator) in factors.zip(operators.into_iter().rev()) {
            result = operator.combine(lhs, result);
        }
        Ok(Some(result))
    }

    /// 解析一个因子；下一个 token 无法开始一个因子时将其退回并返回 `None`
    fn parse_factor(
        &self,
        tokenizer: &mut Tokenizer<'_>,
        depth: usize,
    ) -> Result<Option<Match>, ParseError> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::new("Expression nested too deeply"));
        }

        if tokenizer.peek_equals(&TokenKind::LeftParen) {
            let expression = self.parse_expression(tokenizer, depth + 1)?;
            let next = tokenizer.next_token();
            if next.kind != TokenKind::RightParen {
                return Err(ParseError::expected_token(TokenKind::RightParen, next));
            }
            return Ok(Some(expression.unwrap_or(Match::Always)));
        }

        if tokenizer.peek_equals(&TokenKind::Not) {
            let operand = self
                .parse_factor(tokenizer, depth + 1)?
                .ok_or_else(|| ParseError::new("Missing operator for NOT"))?;
            return Ok(Some(Match::not(operand)));
        }

        let Some(key) = tokenizer.read_text_or_number() else {
            return Ok(None);
        };
        let flags = self.flags;

        let m = if tokenizer.peek_equals(&TokenKind::Equals) {
            let value = tokenizer.read_text_or_number();
            Match::ExactKeyValue(ExactKeyValue::new(
                &key,
                value,
                flags.regex_search,
                flags.case_sensitive,
            )?)
        } else if tokenizer.peek_equals(&TokenKind::Tilde) {
            let value = tokenizer.read_text_or_number();
            Match::ExactKeyValue(ExactKeyValue::new(&key, value, true, flags.case_sensitive)?)
        } else if tokenizer.peek_equals(&TokenKind::LessThan) {
            let reference = tokenizer.read_text_or_number();
            Match::ValueComparison(ValueComparison::new(&key, reference, CompareMode::Less)?)
        } else if tokenizer.peek_equals(&TokenKind::GreaterThan) {
            let reference = tokenizer.read_text_or_number();
            Match::ValueComparison(ValueComparison::new(&key, reference, CompareMode::Greater)?)
        } else if tokenizer.peek_equals(&TokenKind::Colon) {
            self.parse_keyword_argument(&key, tokenizer, depth)?
        } else if tokenizer.peek_equals(&TokenKind::QuestionMark) {
            Match::BooleanTag {
                key,
                default: false,
            }
        } else {
            self.parse_bare_keyword(&key, tokenizer, depth)?
        };
        Ok(Some(m))
    }

    /// `key:` 之后的部分
    fn parse_keyword_argument(
        &self,
        key: &str,
        tokenizer: &mut Tokenizer<'_>,
        depth: usize,
    ) -> Result<Match, ParseError> {
        let flags = self.flags;
        match self.registry.get(key) {
            Some(MatchFactory::Simple(factory)) => factory(key, flags, Some(tokenizer)),
            Some(MatchFactory::Unary(factory)) => {
                let operand = self.parse_factor(tokenizer, depth + 1)?.unwrap_or(Match::Always);
                factory(key, operand, Some(tokenizer))
            }
            _ => match tokenizer.read_text_or_number() {
                // `key:` 不带值时表示键存在
                None => Ok(Match::ExactKeyValue(ExactKeyValue::new(
                    key,
                    Some("*".to_string()),
                    flags.regex_search,
                    flags.case_sensitive,
                )?)),
                Some(value) => Ok(Match::KeyValue(KeyValue::new(
                    key,
                    &value,
                    flags.regex_search,
                    flags.case_sensitive,
                )?)),
            },
        }
    }

    /// 不带任何运算符的 KEY
    fn parse_bare_keyword(
        &self,
        key: &str,
        tokenizer: &mut Tokenizer<'_>,
        depth: usize,
    ) -> Result<Match, ParseError> {
        let flags = self.flags;
        match self.registry.get(key) {
            Some(MatchFactory::Simple(factory)) => factory(key, flags, None),
            Some(MatchFactory::Unary(factory)) => {
                let operand = self.parse_factor(tokenizer, depth + 1)?.unwrap_or(Match::Always);
                factory(key, operand, None)
            }
            _ => Ok(Match::Any(AnyText::new(
                key,
                flags.regex_search,
                flags.case_sensitive,
            )?)),
        }
    }
}
