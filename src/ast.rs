//! 搜索表达式编译后的谓词树
//!
//! `Match` 是一棵不可变的树，编译一次即可对任意多个对象反复求值。
//! 叶子节点在编译期就准备好所需的数据（例如已编译的正则表达式），
//! 求值逻辑见 `evaluate.rs`。

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::ParseError;
use crate::primitive::{BoundsProvider, Primitive, PrimitiveKind};
use crate::text::{self, PatternMode};
use crate::token::Range;

/// 谓词树的节点
///
/// 平铺查询会生成很长的右侧链，因此 `Clone`、`Debug`、`Display` 和 `Drop`
/// 都沿右侧链循环处理，不逐层递归。
pub enum Match {
    /// 恒为真，空查询或 `()` 的结果
    Always,
    /// 恒为假
    Never,

    /// 逻辑非 (`-f`)
    Not(Box<Match>),
    /// 逻辑与 (并列、`and`、`&`)
    And(Box<Match>, Box<Match>),
    /// 逻辑或 (`or`、`|`)
    Or(Box<Match>, Box<Match>),
    /// 逻辑异或 (`xor`、`^`)
    Xor(Box<Match>, Box<Match>),

    /// `k?`，值为 yes/true/1/on 时匹配
    BooleanTag { key: String, default: bool },
    /// `k=v` 或 `k~v`
    ExactKeyValue(ExactKeyValue),
    /// `k:v`，子串或正则查找
    KeyValue(KeyValue),
    /// `k<v` 或 `k>v`
    ValueComparison(ValueComparison),
    /// 裸文本，在所有键、值和用户名中查找
    Any(AnyText),

    /// `type:node|way|relation`
    ExactType(PrimitiveKind),
    /// `user:name`，`None` 表示匿名
    User(Option<String>),
    /// `role:r`
    Role(String),
    /// `hasRole:r`
    HasRole(String),
    /// `id:`、`nodes:`、`timestamp:a/b` 等范围谓词
    Range { property: RangeProperty, range: Range },
    /// `nth:k` 或 `nth%:k`
    Nth { position: i64, modulo: bool },

    /// `parent f`：某个直接子元素匹配 f
    Parent(Box<Match>),
    /// `child f`：某个引用者匹配 f
    Child(Box<Match>),

    /// `new`、`modified` 等编辑状态
    Flag(StateFlag),
    /// `inview`、`allindownloadedarea` 等
    InArea {
        area: AreaKind,
        all: bool,
        bounds: Arc<dyn BoundsProvider>,
    },

    /// 通过注册表接入的自定义谓词
    Custom(Arc<dyn CustomMatch>),
}

/// 宿主程序提供的谓词
pub trait CustomMatch: fmt::Debug + fmt::Display + Send + Sync {
    fn matches(&self, osm: &dyn Primitive) -> bool;
}

/// `Range` 谓词所比较的数值属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeProperty {
    Id,
    Version,
    Changeset,
    Nodes,
    Ways,
    Members,
    Tags,
    AreaSize,
    WayLength,
    /// 以毫秒为单位的 Unix 时间戳
    Timestamp,
}

impl RangeProperty {
    pub fn keyword(&self) -> &'static str {
        match self {
            RangeProperty::Id => "id",
            RangeProperty::Version => "version",
            RangeProperty::Changeset => "changeset",
            RangeProperty::Nodes => "nodes",
            RangeProperty::Ways => "ways",
            RangeProperty::Members => "members",
            RangeProperty::Tags => "tags",
            RangeProperty::AreaSize => "areasize",
            RangeProperty::WayLength => "waylength",
            RangeProperty::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateFlag {
    New,
    Modified,
    Deleted,
    Selected,
    Incomplete,
    Untagged,
    Closed,
}

impl StateFlag {
    pub fn keyword(&self) -> &'static str {
        match self {
            StateFlag::New => "new",
            StateFlag::Modified => "modified",
            StateFlag::Deleted => "deleted",
            StateFlag::Selected => "selected",
            StateFlag::Incomplete => "incomplete",
            StateFlag::Untagged => "untagged",
            StateFlag::Closed => "closed",
        }
    }
}

/// `InArea` 使用哪一个矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaKind {
    View,
    Downloaded,
}

/// `k=v` 的匹配方式，由键、值是否为 `*` 或空以及是否为正则模式决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExactMode {
    /// `*=*`
    Any,
    /// `*=v`
    AnyKey,
    /// `k=*`
    AnyValue,
    /// `k=v`
    Exact,
    /// `*=`，只匹配没有标签的对象
    NoTags,
    /// `k=`
    MissingKey,
    AnyKeyRegex,
    AnyValueRegex,
    ExactRegex,
    MissingKeyRegex,
}

#[derive(Debug, Clone)]
pub struct ExactKeyValue {
    pub key: String,
    pub value: String,
    pub mode: ExactMode,
    pub(crate) key_pattern: Option<Regex>,
    pub(crate) value_pattern: Option<Regex>,
}

impl ExactKeyValue {
    pub fn new(
        key: &str,
        value: Option<String>,
        regex: bool,
        case_sensitive: bool,
    ) -> Result<Self, ParseError> {
        if key.is_empty() {
            return Err(ParseError::new(
                "Key cannot be empty when tag operator is used. Sample use: key=value",
            ));
        }
        let value = value.unwrap_or_default();

        let mode = match (key == "*", value.as_str()) {
            (true, "") => ExactMode::NoTags,
            (false, "") if regex => ExactMode::MissingKeyRegex,
            (false, "") => ExactMode::MissingKey,
            (true, "*") => ExactMode::Any,
            (true, _) if regex => ExactMode::AnyKeyRegex,
            (true, _) => ExactMode::AnyKey,
            (false, "*") if regex => ExactMode::AnyValueRegex,
            (false, "*") => ExactMode::AnyValue,
            (false, _) if regex => ExactMode::ExactRegex,
            (false, _) => ExactMode::Exact,
        };

        let key_pattern = if regex && key != "*" {
            Some(text::compile_pattern(key, case_sensitive, PatternMode::Full)?)
        } else {
            None
        };
        let value_pattern = if regex && !value.is_empty() && value != "*" {
            Some(text::compile_pattern(&value, case_sensitive, PatternMode::Full)?)
        } else {
            None
        };

        Ok(Self {
            key: key.to_string(),
            value,
            mode,
            key_pattern,
            value_pattern,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub case_sensitive: bool,
    /// 正则模式下的 (键, 值) 模式对
    pub(crate) patterns: Option<(Regex, Regex)>,
    /// 非正则模式下规范化后的值
    pub(crate) needle: String,
}

impl KeyValue {
    pub fn new(
        key: &str,
        value: &str,
        regex: bool,
        case_sensitive: bool,
    ) -> Result<Self, ParseError> {
        let patterns = if regex {
            Some((
                text::compile_pattern(key, case_sensitive, PatternMode::Find)?,
                text::compile_pattern(value, case_sensitive, PatternMode::Find)?,
            ))
        } else {
            None
        };
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
            case_sensitive,
            patterns,
            needle: text::normalize(value, case_sensitive),
        })
    }
}

/// 比较方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMode {
    Less,
    Greater,
}

impl CompareMode {
    pub fn symbol(&self) -> char {
        match self {
            CompareMode::Less => '<',
            CompareMode::Greater => '>',
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValueComparison {
    pub key: String,
    pub reference: String,
    pub reference_number: Option<f64>,
    pub mode: CompareMode,
}

impl ValueComparison {
    pub fn new(
        key: &str,
        reference: Option<String>,
        mode: CompareMode,
    ) -> Result<Self, ParseError> {
        let reference = reference.ok_or_else(|| {
            ParseError::new(format!("Reference value for '{}' expected", mode.symbol()))
        })?;
        Ok(Self {
            key: key.to_string(),
            reference_number: text::parse_number(&reference),
            reference,
            mode,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnyText {
    /// NFC 规范化后的搜索文本，非大小写敏感时已转为小写
    pub search: String,
    pub case_sensitive: bool,
    pub(crate) pattern: Option<Regex>,
}

impl AnyText {
    pub fn new(search: &str, regex: bool, case_sensitive: bool) -> Result<Self, ParseError> {
        if regex {
            let search = text::normalize(search, true);
            let pattern = text::compile_pattern(&search, case_sensitive, PatternMode::Find)?;
            Ok(Self {
                search,
                case_sensitive,
                pattern: Some(pattern),
            })
        } else {
            Ok(Self {
                search: text::normalize(search, case_sensitive),
                case_sensitive,
                pattern: None,
            })
        }
    }
}

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BinaryOp {
    And,
    Or,
    Xor,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Xor => "^",
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
        }
    }

    pub(crate) fn combine(self, lhs: Match, rhs: Match) -> Match {
        match self {
            BinaryOp::And => Match::and(lhs, rhs),
            BinaryOp::Or => Match::or(lhs, rhs),
            BinaryOp::Xor => Match::xor(lhs, rhs),
        }
    }
}

impl Match {
    pub fn not(operand: Match) -> Self {
        Match::Not(Box::new(operand))
    }

    pub fn and(lhs: Match, rhs: Match) -> Self {
        Match::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Match, rhs: Match) -> Self {
        Match::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn xor(lhs: Match, rhs: Match) -> Self {
        Match::Xor(Box::new(lhs), Box::new(rhs))
    }

    fn as_binary(&self) -> Option<(BinaryOp, &Match, &Match)> {
        match self {
            Match::And(lhs, rhs) => Some((BinaryOp::And, lhs, rhs)),
            Match::Or(lhs, rhs) => Some((BinaryOp::Or, lhs, rhs)),
            Match::Xor(lhs, rhs) => Some((BinaryOp::Xor, lhs, rhs)),
            _ => None,
        }
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        self.as_binary().map(|(op, ..)| op)
    }

    /// 把直接子节点移出到 `out`，原位置留下 `Always`
    fn take_children(&mut self, out: &mut Vec<Match>) {
        match self {
            Match::Not(operand) | Match::Parent(operand) | Match::Child(operand) => {
                out.push(std::mem::replace(operand.as_mut(), Match::Always));
            }
            Match::And(lhs, rhs) | Match::Or(lhs, rhs) | Match::Xor(lhs, rhs) => {
                out.push(std::mem::replace(lhs.as_mut(), Match::Always));
                out.push(std::mem::replace(rhs.as_mut(), Match::Always));
            }
            _ => {}
        }
    }

    /// 复制一个不在右侧链上的节点
    fn clone_node(&self) -> Match {
        match self {
            Match::Always => Match::Always,
            Match::Never => Match::Never,
            Match::Not(operand) => Match::Not(operand.clone()),
            Match::And(..) | Match::Or(..) | Match::Xor(..) => self.clone(),
            Match::BooleanTag { key, default } => Match::BooleanTag {
                key: key.clone(),
                default: *default,
            },
            Match::ExactKeyValue(m) => Match::ExactKeyValue(m.clone()),
            Match::KeyValue(m) => Match::KeyValue(m.clone()),
            Match::ValueComparison(m) => Match::ValueComparison(m.clone()),
            Match::Any(m) => Match::Any(m.clone()),
            Match::ExactType(kind) => Match::ExactType(*kind),
            Match::User(user) => Match::User(user.clone()),
            Match::Role(role) => Match::Role(role.clone()),
            Match::HasRole(role) => Match::HasRole(role.clone()),
            Match::Range { property, range } => Match::Range {
                property: *property,
                range: *range,
            },
            Match::Nth { position, modulo } => Match::Nth {
                position: *position,
                modulo: *modulo,
            },
            Match::Parent(operand) => Match::Parent(operand.clone()),
            Match::Child(operand) => Match::Child(operand.clone()),
            Match::Flag(flag) => Match::Flag(*flag),
            Match::InArea { area, all, bounds } => Match::InArea {
                area: *area,
                all: *all,
                bounds: Arc::clone(bounds),
            },
            Match::Custom(custom) => Match::Custom(Arc::clone(custom)),
        }
    }
}

impl Clone for Match {
    fn clone(&self) -> Self {
        // 先复制右侧链上的左操作数，再自底向上重新连接
        let mut spine = Vec::new();
        let mut node = self;
        while let Some((op, lhs, rhs)) = node.as_binary() {
            spine.push((op, lhs.clone()));
            node = rhs;
        }
        let mut result = node.clone_node();
        while let Some((op, lhs)) = spine.pop() {
            result = op.combine(lhs, result);
        }
        result
    }
}

// 逐层递归释放很深的树可能导致栈溢出，这里改为迭代释放
impl Drop for Match {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(mut node) = pending.pop() {
            node.take_children(&mut pending);
        }
    }
}

/// 只有不同种类的二元子节点才需要括号
fn fmt_operand(f: &mut fmt::Formatter<'_>, operand: &Match, parent: BinaryOp) -> fmt::Result {
    match operand.binary_op() {
        Some(op) if op != parent => write!(f, "({operand})"),
        _ => write!(f, "{operand}"),
    }
}

/// 沿右侧链输出二元节点，右子树换了运算符时打开的括号在最后统一闭合
fn fmt_chain(f: &mut fmt::Formatter<'_>, mut node: &Match) -> fmt::Result {
    let mut open = 0;
    while let Some((op, lhs, rhs)) = node.as_binary() {
        fmt_operand(f, lhs, op)?;
        write!(f, " {} ", op.symbol())?;
        if rhs.binary_op().is_some_and(|inner| inner != op) {
            f.write_str("(")?;
            open += 1;
        }
        node = rhs;
    }
    write!(f, "{node}")?;
    for _ in 0..open {
        f.write_str(")")?;
    }
    Ok(())
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Match::Always => f.write_str("always"),
            Match::Never => f.write_str("never"),
            Match::Not(operand) if operand.binary_op().is_some() => write!(f, "!({operand})"),
            Match::Not(operand) => write!(f, "!{operand}"),
            Match::And(..) | Match::Or(..) | Match::Xor(..) => fmt_chain(f, self),
            Match::BooleanTag { key, .. } => write!(f, "{key}?"),
            Match::ExactKeyValue(m) => write!(f, "{}={}", m.key, m.value),
            Match::KeyValue(m) => write!(f, "{}={}", m.key, m.value),
            Match::ValueComparison(m) => write!(f, "{}{}{}", m.key, m.mode.symbol(), m.reference),
            Match::Any(m) => f.write_str(&m.search),
            Match::ExactType(kind) => write!(f, "type={kind}"),
            Match::User(user) => write!(f, "user={}", user.as_deref().unwrap_or_default()),
            Match::Role(role) => write!(f, "role={role}"),
            Match::HasRole(role) => write!(f, "hasRole={role}"),
            Match::Range { property, range } => write!(f, "{}={range}", property.keyword()),
            Match::Nth { position, modulo } => {
                write!(f, "{}:{position}", if *modulo { "nth%" } else { "nth" })
            }
            Match::Parent(operand) => write!(f, "parent({operand})"),
            Match::Child(operand) => write!(f, "child({operand})"),
            Match::Flag(flag) => f.write_str(flag.keyword()),
            Match::InArea { area, all, .. } => {
                let name = match area {
                    AreaKind::View => "inview",
                    AreaKind::Downloaded => "indownloadedarea",
                };
                if *all {
                    write!(f, "all{name}")
                } else {
                    f.write_str(name)
                }
            }
            Match::Custom(custom) => write!(f, "{custom}"),
        }
    }
}

/// 输出形如 `And(a, And(b, c))`，右侧链同样循环处理
fn debug_chain(f: &mut fmt::Formatter<'_>, mut node: &Match) -> fmt::Result {
    let mut open = 0;
    while let Some((op, lhs, rhs)) = node.as_binary() {
        write!(f, "{}(", op.name())?;
        fmt::Debug::fmt(lhs, f)?;
        f.write_str(", ")?;
        open += 1;
        node = rhs;
    }
    fmt::Debug::fmt(node, f)?;
    for _ in 0..open {
        f.write_str(")")?;
    }
    Ok(())
}

impl fmt::Debug for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Match::Always => f.write_str("Always"),
            Match::Never => f.write_str("Never"),
            Match::Not(operand) => f.debug_tuple("Not").field(operand).finish(),
            Match::And(..) | Match::Or(..) | Match::Xor(..) => debug_chain(f, self),
            Match::BooleanTag { key, default } => f
                .debug_struct("BooleanTag")
                .field("key", key)
                .field("default", default)
                .finish(),
            Match::ExactKeyValue(m) => f.debug_tuple("ExactKeyValue").field(m).finish(),
            Match::KeyValue(m) => f.debug_tuple("KeyValue").field(m).finish(),
            Match::ValueComparison(m) => f.debug_tuple("ValueComparison").field(m).finish(),
            Match::Any(m) => f.debug_tuple("Any").field(m).finish(),
            Match::ExactType(kind) => f.debug_tuple("ExactType").field(kind).finish(),
            Match::User(user) => f.debug_tuple("User").field(user).finish(),
            Match::Role(role) => f.debug_tuple("Role").field(role).finish(),
            Match::HasRole(role) => f.debug_tuple("HasRole").field(role).finish(),
            Match::Range { property, range } => f
                .debug_struct("Range")
                .field("property", property)
                .field("range", range)
                .finish(),
            Match::Nth { position, modulo } => f
                .debug_struct("Nth")
                .field("position", position)
                .field("modulo", modulo)
                .finish(),
            Match::Parent(operand) => f.debug_tuple("Parent").field(operand).finish(),
            Match::Child(operand) => f.debug_tuple("Child").field(operand).finish(),
            Match::Flag(flag) => f.debug_tuple("Flag").field(flag).finish(),
            Match::InArea { area, all, bounds } => f
                .debug_struct("InArea")
                .field("area", area)
                .field("all", all)
                .field("bounds", bounds)
                .finish(),
            Match::Custom(custom) => f.debug_tuple("Custom").field(custom).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any(text: &str) -> Match {
        Match::Any(AnyText::new(text, false, false).unwrap())
    }

    #[test]
    fn test_exact_modes() {
        let mode = |k: &str, v: Option<&str>, regex: bool| {
            ExactKeyValue::new(k, v.map(str::to_string), regex, false)
                .unwrap()
                .mode
        };
        assert_eq!(mode("*", Some("*"), false), ExactMode::Any);
        assert_eq!(mode("*", Some("v"), false), ExactMode::AnyKey);
        assert_eq!(mode("k", Some("*"), false), ExactMode::AnyValue);
        assert_eq!(mode("k", None, false), ExactMode::MissingKey);
        assert_eq!(mode("*", Some(""), false), ExactMode::NoTags);
        assert_eq!(mode("k", Some("v"), false), ExactMode::Exact);
        assert_eq!(mode("k", Some("v"), true), ExactMode::ExactRegex);
        assert_eq!(mode("k", None, true), ExactMode::MissingKeyRegex);
        assert_eq!(mode("*", Some("v"), true), ExactMode::AnyKeyRegex);
        assert_eq!(mode("k", Some("*"), true), ExactMode::AnyValueRegex);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let err = ExactKeyValue::new("", Some("v".to_string()), false, false).unwrap_err();
        assert_eq!(
            err.message,
            "Key cannot be empty when tag operator is used. Sample use: key=value"
        );
    }

    #[test]
    fn test_comparison_needs_reference() {
        let err = ValueComparison::new("k", None, CompareMode::Less).unwrap_err();
        assert_eq!(err.message, "Reference value for '<' expected");
        let cmp = ValueComparison::new("k", Some("1.5".to_string()), CompareMode::Greater).unwrap();
        assert_eq!(cmp.reference_number, Some(1.5));
    }

    #[test]
    fn test_display_parenthesizes_mixed_operators() {
        let m = Match::and(any("foo"), Match::or(any("bar"), any("baz")));
        assert_eq!(m.to_string(), "foo && (bar || baz)");

        let m = Match::xor(
            any("foo1"),
            Match::xor(any("baz1"), Match::and(any("bar"), any("baz"))),
        );
        assert_eq!(m.to_string(), "foo1 ^ baz1 ^ (bar && baz)");
    }

    #[test]
    fn test_display_leaves() {
        assert_eq!(Match::not(any("x")).to_string(), "!x");
        assert_eq!(Match::not(Match::and(any("x"), any("y"))).to_string(), "!(x && y)");
        assert_eq!(
            Match::Parent(Box::new(Match::ExactType(PrimitiveKind::Way))).to_string(),
            "parent(type=way)"
        );
        assert_eq!(
            Match::Range { property: RangeProperty::Id, range: Range::new(1, 5) }.to_string(),
            "id=1-5"
        );
        assert_eq!(Match::User(None).to_string(), "user=");
        assert_eq!(
            Match::BooleanTag { key: "oneway".into(), default: false }.to_string(),
            "oneway?"
        );
        assert_eq!(
            Match::InArea {
                area: AreaKind::Downloaded,
                all: true,
                bounds: Arc::new(crate::primitive::StaticBounds::default()),
            }
            .to_string(),
            "allindownloadedarea"
        );
    }

    #[test]
    fn test_display_closes_nested_chains() {
        let m = Match::or(any("a"), Match::and(any("b"), Match::or(any("c"), any("d"))));
        assert_eq!(m.to_string(), "a || (b && (c || d))");

        let m = Match::and(Match::or(any("a"), any("b")), Match::not(any("c")));
        assert_eq!(m.to_string(), "(a || b) && !c");
    }

    fn long_chain(len: usize) -> Match {
        let mut m = any("a");
        for i in 1..len {
            m = if i % 1000 == 0 {
                Match::or(any("b"), m)
            } else {
                Match::and(any("a"), m)
            };
        }
        m
    }

    #[test]
    fn test_long_chain_display_debug_and_clone() {
        let m = long_chain(10_000);

        let text = m.to_string();
        assert!(text.starts_with("a && a"));
        assert_eq!(text.matches("&&").count(), 10_000 - 10);
        assert_eq!(text.matches('(').count(), text.matches(')').count());

        let debug = format!("{m:?}");
        assert!(debug.starts_with("And(Any("));

        let copy = m.clone();
        assert_eq!(copy.to_string(), text);
    }

    #[test]
    fn test_debug_of_small_tree() {
        let m = Match::or(Match::Never, Match::not(Match::Always));
        assert_eq!(format!("{m:?}"), "Or(Never, Not(Always))");
    }

    #[test]
    fn test_any_text_is_normalized() {
        let any = AnyText::new("Cafe\u{301}", false, false).unwrap();
        assert_eq!(any.search, "caf\u{e9}");
    }
}
