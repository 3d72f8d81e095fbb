//! Keyword → match factory registry.
//!
//! A registry is built once at startup, optionally extended by plugins, and
//! then shared by reference with every compile call. The built-in keywords
//! are installed first so that later registrations cannot shadow them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::RwLock;

use crate::ast::{AreaKind, KeyValue, Match, RangeProperty, StateFlag};
use crate::error::{ParseError, RegistryError};
use crate::lexer::Tokenizer;
use crate::parser::{SearchCompiler, SearchFlags};
use crate::primitive::{BoundsProvider, PrimitiveKind, StaticBounds};
use crate::timestamp::parse_instant;
use crate::token::Range;

/// Builds a leaf from a keyword. The tokenizer is present only in the
/// `keyword:` form and may be used to read the keyword's argument.
pub type SimpleFactory =
    dyn Fn(&str, SearchFlags, Option<&mut Tokenizer<'_>>) -> Result<Match, ParseError>
        + Send
        + Sync;

/// Wraps the factor that follows the keyword.
pub type UnaryFactory =
    dyn Fn(&str, Match, Option<&mut Tokenizer<'_>>) -> Result<Match, ParseError> + Send + Sync;

/// Combines two already compiled operands.
pub type BinaryFactory = dyn Fn(&str, Match, Match) -> Result<Match, ParseError> + Send + Sync;

#[derive(Clone)]
pub enum MatchFactory {
    Simple(Arc<SimpleFactory>),
    Unary(Arc<UnaryFactory>),
    Binary(Arc<BinaryFactory>),
}

impl MatchFactory {
    pub fn simple<F>(factory: F) -> Self
    where
        F: Fn(&str, SearchFlags, Option<&mut Tokenizer<'_>>) -> Result<Match, ParseError>
            + Send
            + Sync
            + 'static,
    {
        MatchFactory::Simple(Arc::new(factory))
    }

    pub fn unary<F>(factory: F) -> Self
    where
        F: Fn(&str, Match, Option<&mut Tokenizer<'_>>) -> Result<Match, ParseError>
            + Send
            + Sync
            + 'static,
    {
        MatchFactory::Unary(Arc::new(factory))
    }

    pub fn binary<F>(factory: F) -> Self
    where
        F: Fn(&str, Match, Match) -> Result<Match, ParseError> + Send + Sync + 'static,
    {
        MatchFactory::Binary(Arc::new(factory))
    }

    fn shape(&self) -> &'static str {
        match self {
            MatchFactory::Simple(_) => "simple",
            MatchFactory::Unary(_) => "unary",
            MatchFactory::Binary(_) => "binary",
        }
    }
}

impl fmt::Debug for MatchFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchFactory::{}", self.shape())
    }
}

pub struct MatchRegistry {
    factories: RwLock<HashMap<String, MatchFactory>>,
}

impl MatchRegistry {
    /// An empty registry, without even the built-in keywords.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding every built-in keyword. `inview` and
    /// `indownloadedarea` consult `bounds` at evaluation time.
    pub fn with_builtins(bounds: Arc<dyn BoundsProvider>) -> Self {
        let registry = Self::new();
        let mut factories = registry.factories.write();

        let core = MatchFactory::simple(move |keyword, flags, tokenizer| {
            core_simple_match(keyword, flags, tokenizer, &bounds)
        });
        for keyword in CORE_SIMPLE_KEYWORDS {
            factories.insert(keyword.to_string(), core.clone());
        }
        factories.insert(
            "parent".to_string(),
            MatchFactory::unary(|_, operand, _| Ok(Match::Parent(Box::new(operand)))),
        );
        factories.insert(
            "child".to_string(),
            MatchFactory::unary(|_, operand, _| Ok(Match::Child(Box::new(operand)))),
        );

        drop(factories);
        registry
    }

    /// Registers `factory` under every keyword in `keywords`.
    ///
    /// Either all keywords are registered or none is: a keyword that is
    /// empty, repeated, or already taken rejects the whole call.
    pub fn register(&self, keywords: &[&str], factory: MatchFactory) -> Result<(), RegistryError> {
        let mut factories = self.factories.write();

        for (i, keyword) in keywords.iter().enumerate() {
            if keyword.is_empty() {
                warn!("rejected {} match factory with an empty keyword", factory.shape());
                return Err(RegistryError::EmptyKeyword);
            }
            if factories.contains_key(*keyword) || keywords[..i].contains(keyword) {
                warn!(
                    "rejected {} match factory: keyword '{}' is already registered",
                    factory.shape(),
                    keyword
                );
                return Err(RegistryError::DuplicateKeyword(keyword.to_string()));
            }
        }

        for keyword in keywords {
            factories.insert(keyword.to_string(), factory.clone());
        }
        debug!("registered {} match factory for {:?}", factory.shape(), keywords);
        Ok(())
    }

    /// Looks a keyword up. Lookup is exact and case sensitive.
    pub fn get(&self, keyword: &str) -> Option<MatchFactory> {
        self.factories.read().get(keyword).cloned()
    }

    pub fn keywords(&self) -> Vec<String> {
        let mut keywords: Vec<String> = self.factories.read().keys().cloned().collect();
        keywords.sort();
        keywords
    }

    pub fn compile(&self, text: &str, flags: SearchFlags) -> Result<Match, ParseError> {
        SearchCompiler::new(self, flags).compile(text)
    }

    /// Applies the binary factory registered for `keyword`.
    pub fn build_binary(&self, keyword: &str, lhs: Match, rhs: Match) -> Result<Match, ParseError> {
        match self.get(keyword) {
            Some(MatchFactory::Binary(factory)) => factory(keyword, lhs, rhs),
            _ => Err(ParseError::new(format!(
                "No binary match factory registered for '{keyword}'"
            ))),
        }
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::with_builtins(Arc::new(StaticBounds::default()))
    }
}

impl fmt::Debug for MatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchRegistry")
            .field("keywords", &self.keywords())
            .finish()
    }
}

const CORE_SIMPLE_KEYWORDS: &[&str] = &[
    "id",
    "version",
    "type",
    "user",
    "role",
    "changeset",
    "nodes",
    "ways",
    "members",
    "tags",
    "areasize",
    "waylength",
    "modified",
    "deleted",
    "selected",
    "incomplete",
    "untagged",
    "closed",
    "new",
    "indownloadedarea",
    "allindownloadedarea",
    "inview",
    "allinview",
    "timestamp",
    "nth",
    "nth%",
    "hasRole",
];

fn core_simple_match(
    keyword: &str,
    flags: SearchFlags,
    tokenizer: Option<&mut Tokenizer<'_>>,
    bounds: &Arc<dyn BoundsProvider>,
) -> Result<Match, ParseError> {
    let in_area = |area, all| Match::InArea {
        area,
        all,
        bounds: Arc::clone(bounds),
    };

    let m = match keyword {
        "modified" => Match::Flag(StateFlag::Modified),
        "deleted" => Match::Flag(StateFlag::Deleted),
        "selected" => Match::Flag(StateFlag::Selected),
        "incomplete" => Match::Flag(StateFlag::Incomplete),
        "untagged" => Match::Flag(StateFlag::Untagged),
        "closed" => Match::Flag(StateFlag::Closed),
        "new" => Match::Flag(StateFlag::New),
        "indownloadedarea" => in_area(AreaKind::Downloaded, false),
        "allindownloadedarea" => in_area(AreaKind::Downloaded, true),
        "inview" => in_area(AreaKind::View, false),
        "allinview" => in_area(AreaKind::View, true),
        _ => {
            let Some(tokenizer) = tokenizer else {
                return Err(ParseError::new(format!("Expecting ':' after {keyword}")));
            };
            return keyword_with_argument(keyword, flags, tokenizer);
        }
    };
    Ok(m)
}

fn keyword_with_argument(
    keyword: &str,
    flags: SearchFlags,
    tokenizer: &mut Tokenizer<'_>,
) -> Result<Match, ParseError> {
    match keyword {
        "id" => range(RangeProperty::Id, tokenizer, "Range of primitive ids expected"),
        "version" => range(RangeProperty::Version, tokenizer, "Range of versions expected"),
        "changeset" => range(
            RangeProperty::Changeset,
            tokenizer,
            "Range of changeset ids expected",
        ),
        "nodes" => range(RangeProperty::Nodes, tokenizer, "Range of numbers expected"),
        "ways" => range(RangeProperty::Ways, tokenizer, "Range of numbers expected"),
        "members" => range(RangeProperty::Members, tokenizer, "Range of numbers expected"),
        "tags" => range(RangeProperty::Tags, tokenizer, "Range of numbers expected"),
        "areasize" => range(RangeProperty::AreaSize, tokenizer, "Range of numbers expected"),
        "waylength" => range(RangeProperty::WayLength, tokenizer, "Range of numbers expected"),
        "type" => {
            let name = tokenizer.read_text_or_number().unwrap_or_default();
            PrimitiveKind::from_name(&name).map(Match::ExactType).ok_or_else(|| {
                ParseError::new(format!(
                    "Unknown primitive type: {name}. Allowed values are node, way or relation"
                ))
            })
        }
        "user" => Ok(Match::User(
            tokenizer
                .read_text_or_number()
                .filter(|user| user != "anonymous"),
        )),
        "role" => Ok(Match::Role(tokenizer.read_text_or_number().unwrap_or_default())),
        "hasRole" => tokenizer
            .read_text_or_number()
            .map(Match::HasRole)
            .ok_or_else(|| ParseError::new("Expecting role after hasRole")),
        "nth" => {
            let position = tokenizer.read_number("Positive integer expected")?;
            if position == 0 {
                return Err(ParseError::new("Positive integer expected"));
            }
            Ok(Match::Nth {
                position,
                modulo: false,
            })
        }
        "nth%" => {
            let position = tokenizer.read_number("Positive integer expected")?;
            if position <= 0 {
                return Err(ParseError::new("Positive integer expected"));
            }
            Ok(Match::Nth {
                position,
                modulo: true,
            })
        }
        "timestamp" => {
            let text = tokenizer.read_text_or_number().unwrap_or_default();
            let parts: Vec<&str> = text.split('/').collect();
            match parts.as_slice() {
                [value] => Ok(Match::KeyValue(KeyValue::new(
                    "timestamp",
                    value.trim(),
                    flags.regex_search,
                    flags.case_sensitive,
                )?)),
                [min, max] => timestamp_range(min.trim(), max.trim()),
                _ => Err(ParseError::new("Expecting min/max after timestamp")),
            }
        }
        _ => Err(ParseError::new(format!("Unknown keyword: {keyword}"))),
    }
}

fn range(
    property: RangeProperty,
    tokenizer: &mut Tokenizer<'_>,
    message: &str,
) -> Result<Match, ParseError> {
    Ok(Match::Range {
        property,
        range: tokenizer.read_range(message)?,
    })
}

/// A blank `min` means the earliest representable instant and a blank
/// `max` means now.
fn timestamp_range(min: &str, max: &str) -> Result<Match, ParseError> {
    let min = if min.is_empty() {
        DateTime::<Utc>::MIN_UTC
    } else {
        parse_instant(min)?
    };
    let max = if max.is_empty() {
        Utc::now()
    } else {
        parse_instant(max)?
    };
    Ok(Match::Range {
        property: RangeProperty::Timestamp,
        range: Range::new(min.timestamp_millis(), max.timestamp_millis()),
    })
}
