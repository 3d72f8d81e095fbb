//! Evaluation of a compiled [`Match`] against a primitive.

use chrono::SecondsFormat;

use crate::ast::{
    AnyText, AreaKind, CompareMode, ExactKeyValue, ExactMode, KeyValue, Match, RangeProperty,
    StateFlag, ValueComparison,
};
use crate::primitive::{BoundsProvider, Primitive, PrimitiveId, PrimitiveKind};
use crate::text;

impl Match {
    /// Tests whether `osm` satisfies this predicate. Evaluation is total:
    /// predicates that do not apply to a primitive simply do not match it.
    pub fn evaluate(&self, osm: &dyn Primitive) -> bool {
        // Binary trees produced by the parser lean right, so walk the right
        // spine in a loop and only recurse into left operands.
        let mut current = self;
        let mut flip = false;
        loop {
            match current {
                Match::Not(operand) => {
                    flip = !flip;
                    current = &**operand;
                }
                Match::And(lhs, rhs) => {
                    if !lhs.evaluate(osm) {
                        return flip;
                    }
                    current = &**rhs;
                }
                Match::Or(lhs, rhs) => {
                    if lhs.evaluate(osm) {
                        return !flip;
                    }
                    current = &**rhs;
                }
                Match::Xor(lhs, rhs) => {
                    flip ^= lhs.evaluate(osm);
                    current = &**rhs;
                }
                leaf => return flip ^ leaf.evaluate_leaf(osm),
            }
        }
    }

    fn evaluate_leaf(&self, osm: &dyn Primitive) -> bool {
        match self {
            Match::Always => true,
            Match::Never => false,
            Match::Not(_) | Match::And(..) | Match::Or(..) | Match::Xor(..) => self.evaluate(osm),
            Match::BooleanTag { key, default } => match osm.get(key) {
                Some(value) if text::is_true(value) => true,
                Some(value) if text::is_false(value) => false,
                _ => *default,
            },
            Match::ExactKeyValue(m) => exact_key_value(m, osm),
            Match::KeyValue(m) => key_value(m, osm),
            Match::ValueComparison(m) => value_comparison(m, osm),
            Match::Any(m) => any_text(m, osm),
            Match::ExactType(kind) => osm.kind() == *kind,
            Match::User(user) => match (user.as_deref(), osm.user()) {
                (None, None) => true,
                (Some(expected), Some(actual)) => expected == actual,
                _ => false,
            },
            Match::Role(role) => has_role_in_referrer(role, osm),
            Match::HasRole(role) => {
                osm.kind() == PrimitiveKind::Relation
                    && osm.members().iter().any(|member| member.role == *role)
            }
            Match::Range { property, range } => {
                range_value(*property, osm).is_some_and(|value| range.contains(value))
            }
            Match::Nth { position, modulo } => nth(*position, *modulo, osm),
            Match::Parent(operand) => match osm.kind() {
                PrimitiveKind::Way => osm
                    .way_nodes()
                    .iter()
                    .any(|node| operand.evaluate(node.as_ref())),
                PrimitiveKind::Relation => osm
                    .members()
                    .iter()
                    .any(|member| operand.evaluate(member.primitive.as_ref())),
                PrimitiveKind::Node => false,
            },
            Match::Child(operand) => osm
                .referrers()
                .iter()
                .any(|referrer| operand.evaluate(referrer.as_ref())),
            Match::Flag(flag) => state_flag(*flag, osm),
            Match::InArea { area, all, bounds } => {
                in_area(osm, *area, *all, bounds.as_ref(), &mut Vec::new())
            }
            Match::Custom(custom) => custom.matches(osm),
        }
    }
}

fn exact_key_value(m: &ExactKeyValue, osm: &dyn Primitive) -> bool {
    if !osm.has_keys() {
        return matches!(
            m.mode,
            ExactMode::NoTags | ExactMode::Any | ExactMode::MissingKey | ExactMode::MissingKeyRegex
        );
    }

    let keys = osm.keys();
    match m.mode {
        ExactMode::NoTags => false,
        ExactMode::Any => true,
        ExactMode::MissingKey => osm.get(&m.key).map_or(true, str::is_empty),
        ExactMode::AnyValue => osm.get(&m.key).is_some(),
        ExactMode::AnyKey => keys.iter().any(|k| osm.get(k) == Some(m.value.as_str())),
        ExactMode::Exact => osm.get(&m.key) == Some(m.value.as_str()),
        ExactMode::AnyKeyRegex => {
            let Some(value_pattern) = &m.value_pattern else {
                return false;
            };
            keys.iter()
                .filter_map(|k| osm.get(k))
                .any(|v| value_pattern.is_match(v))
        }
        ExactMode::AnyValueRegex | ExactMode::ExactRegex => {
            let Some(key_pattern) = &m.key_pattern else {
                return false;
            };
            keys.iter().any(|k| {
                key_pattern.is_match(k)
                    && (m.mode == ExactMode::AnyValueRegex
                        || match (&m.value_pattern, osm.get(k)) {
                            (Some(value_pattern), Some(v)) => value_pattern.is_match(v),
                            _ => false,
                        })
            })
        }
        ExactMode::MissingKeyRegex => match &m.key_pattern {
            Some(key_pattern) => !keys.iter().any(|k| key_pattern.is_match(k)),
            None => false,
        },
    }
}

fn key_value(m: &KeyValue, osm: &dyn Primitive) -> bool {
    if let Some((key_pattern, value_pattern)) = &m.patterns {
        return osm.keys().iter().any(|k| {
            key_pattern.is_match(k) && osm.get(k).is_some_and(|v| value_pattern.is_match(v))
        });
    }

    let value = if m.key == "timestamp" {
        osm.timestamp()
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    } else {
        osm.get(&m.key)
            .or_else(|| {
                if m.case_sensitive {
                    return None;
                }
                osm.keys()
                    .into_iter()
                    .find(|k| k.eq_ignore_ascii_case(&m.key))
                    .and_then(|k| osm.get(k))
            })
            .map(str::to_string)
    };

    value.is_some_and(|value| text::normalize(&value, m.case_sensitive).contains(&m.needle))
}

fn value_comparison(m: &ValueComparison, osm: &dyn Primitive) -> bool {
    let Some(value) = osm.get(&m.key) else {
        return false;
    };
    let ordering = text::compare_values(value, &m.reference, m.reference_number);
    match m.mode {
        CompareMode::Less => ordering.is_lt(),
        CompareMode::Greater => ordering.is_gt(),
    }
}

fn any_text(m: &AnyText, osm: &dyn Primitive) -> bool {
    let user = osm.user();
    if !osm.has_keys() && user.is_none() {
        return m.search.is_empty();
    }

    let found = |candidate: &str| match &m.pattern {
        Some(pattern) => pattern.is_match(&text::normalize(candidate, true)),
        None => text::normalize(candidate, m.case_sensitive).contains(&m.search),
    };

    osm.keys()
        .into_iter()
        .any(|key| found(key) || osm.get(key).is_some_and(&found))
        || user.is_some_and(&found)
}

fn has_role_in_referrer(role: &str, osm: &dyn Primitive) -> bool {
    let id = osm.id();
    osm.referrers()
        .iter()
        .filter(|referrer| {
            referrer.kind() == PrimitiveKind::Relation
                && !referrer.is_incomplete()
                && !referrer.is_deleted()
        })
        .any(|relation| {
            relation
                .members()
                .iter()
                .any(|member| member.primitive.id() == id && member.role == role)
        })
}

fn range_value(property: RangeProperty, osm: &dyn Primitive) -> Option<i64> {
    match property {
        RangeProperty::Id => Some(if osm.is_new() { 0 } else { osm.unique_id() }),
        RangeProperty::Version => Some(osm.version()),
        RangeProperty::Changeset => Some(osm.changeset_id()),
        RangeProperty::Nodes => match osm.kind() {
            PrimitiveKind::Way => {
                let count = osm.way_nodes().len();
                let real = if count > 1 && osm.is_closed() { count - 1 } else { count };
                Some(real as i64)
            }
            PrimitiveKind::Relation => Some(count_members(osm, PrimitiveKind::Node)),
            PrimitiveKind::Node => None,
        },
        RangeProperty::Ways => match osm.kind() {
            PrimitiveKind::Node => Some(
                osm.referrers()
                    .iter()
                    .filter(|referrer| referrer.kind() == PrimitiveKind::Way)
                    .count() as i64,
            ),
            PrimitiveKind::Relation => Some(count_members(osm, PrimitiveKind::Way)),
            PrimitiveKind::Way => None,
        },
        RangeProperty::Members => {
            (osm.kind() == PrimitiveKind::Relation).then(|| osm.members().len() as i64)
        }
        RangeProperty::Tags => Some(osm.key_count() as i64),
        RangeProperty::AreaSize => osm.area().map(|area| area.abs() as i64),
        RangeProperty::WayLength => {
            if osm.kind() == PrimitiveKind::Way {
                osm.length().map(|length| length as i64)
            } else {
                None
            }
        }
        RangeProperty::Timestamp => osm.timestamp().map(|ts| ts.timestamp_millis()),
    }
}

fn count_members(osm: &dyn Primitive, kind: PrimitiveKind) -> i64 {
    osm.members()
        .iter()
        .filter(|member| member.primitive.kind() == kind)
        .count() as i64
}

/// Positions are 1-based; a negative position counts from the end.
fn nth(position: i64, modulo: bool, osm: &dyn Primitive) -> bool {
    let id = osm.id();
    osm.referrers().iter().any(|referrer| {
        let ids: Vec<PrimitiveId> = match referrer.kind() {
            PrimitiveKind::Way => referrer.way_nodes().iter().map(|node| node.id()).collect(),
            PrimitiveKind::Relation => referrer
                .members()
                .iter()
                .map(|member| member.primitive.id())
                .collect(),
            PrimitiveKind::Node => return false,
        };
        let Some(index) = ids.iter().position(|candidate| *candidate == id) else {
            return false;
        };
        let index = index as i64;
        let count = ids.len() as i64;

        if modulo {
            position > 0 && (index + 1) % position == 0
        } else if position < 0 {
            index == count + position
        } else {
            index + 1 == position
        }
    })
}

fn state_flag(flag: StateFlag, osm: &dyn Primitive) -> bool {
    match flag {
        StateFlag::New => osm.is_new(),
        StateFlag::Modified => osm.is_modified() || osm.is_new_or_undeleted(),
        StateFlag::Deleted => osm.is_deleted(),
        StateFlag::Selected => osm.is_selected(),
        StateFlag::Incomplete => {
            osm.is_incomplete()
                || (osm.kind() == PrimitiveKind::Relation && osm.has_incomplete_members())
        }
        StateFlag::Untagged => !osm.is_tagged() && !osm.is_incomplete(),
        StateFlag::Closed => osm.kind() == PrimitiveKind::Way && osm.is_closed(),
    }
}

/// `visiting` holds the relations on the current path so that
/// self-referencing relations cannot loop forever.
fn in_area(
    osm: &dyn Primitive,
    area: AreaKind,
    all: bool,
    bounds: &dyn BoundsProvider,
    visiting: &mut Vec<PrimitiveId>,
) -> bool {
    if !osm.is_usable() {
        return false;
    }
    match osm.kind() {
        PrimitiveKind::Node => {
            let rectangle = match area {
                AreaKind::View => bounds.current_view_bounds(),
                AreaKind::Downloaded => bounds.downloaded_area_bounds(),
            };
            match (osm.coordinate(), rectangle) {
                (Some(coordinate), Some(rectangle)) => rectangle.contains(coordinate),
                _ => false,
            }
        }
        PrimitiveKind::Way => {
            let nodes = osm.way_nodes();
            let mut inside = nodes
                .iter()
                .map(|node| in_area(node.as_ref(), area, all, bounds, visiting));
            if all {
                inside.all(|x| x)
            } else {
                inside.any(|x| x)
            }
        }
        PrimitiveKind::Relation => {
            let id = osm.id();
            if visiting.contains(&id) {
                return false;
            }
            visiting.push(id);
            let members = osm.members();
            let mut inside = members
                .iter()
                .map(|member| in_area(member.primitive.as_ref(), area, all, bounds, visiting));
            let result = if all {
                inside.all(|x| x)
            } else {
                inside.any(|x| x)
            };
            visiting.pop();
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::ast::AnyText;
    use crate::primitive::{LatLon, Member};
    use crate::token::Range;

    /// A standalone primitive without neighbours, enough for tag predicates.
    #[derive(Default)]
    struct Tagged {
        tags: BTreeMap<String, String>,
        user: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    }

    impl Tagged {
        fn with(tags: &[(&str, &str)]) -> Self {
            Self {
                tags: tags
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl Primitive for Tagged {
        fn id(&self) -> PrimitiveId {
            PrimitiveId::new(PrimitiveKind::Node, 1)
        }
        fn keys(&self) -> Vec<&str> {
            self.tags.keys().map(String::as_str).collect()
        }
        fn get(&self, key: &str) -> Option<&str> {
            self.tags.get(key).map(String::as_str)
        }
        fn version(&self) -> i64 {
            1
        }
        fn changeset_id(&self) -> i64 {
            1
        }
        fn timestamp(&self) -> Option<DateTime<Utc>> {
            self.timestamp
        }
        fn user(&self) -> Option<&str> {
            self.user.as_deref()
        }
        fn is_modified(&self) -> bool {
            false
        }
        fn is_new_or_undeleted(&self) -> bool {
            false
        }
        fn is_deleted(&self) -> bool {
            false
        }
        fn is_selected(&self) -> bool {
            false
        }
        fn is_incomplete(&self) -> bool {
            false
        }
        fn coordinate(&self) -> Option<LatLon> {
            None
        }
        fn way_nodes(&self) -> Vec<Box<dyn Primitive + '_>> {
            Vec::new()
        }
        fn members(&self) -> Vec<Member<'_>> {
            Vec::new()
        }
        fn referrers(&self) -> Vec<Box<dyn Primitive + '_>> {
            Vec::new()
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn area(&self) -> Option<f64> {
            None
        }
        fn length(&self) -> Option<f64> {
            None
        }
    }

    fn exact(k: &str, v: &str, regex: bool) -> Match {
        Match::ExactKeyValue(ExactKeyValue::new(k, Some(v.to_string()), regex, false).unwrap())
    }

    #[test]
    fn test_boolean_operators() {
        let osm = Tagged::default();
        assert!(Match::and(Match::Always, Match::Always).evaluate(&osm));
        assert!(!Match::and(Match::Always, Match::Never).evaluate(&osm));
        assert!(Match::or(Match::Never, Match::Always).evaluate(&osm));
        assert!(Match::xor(Match::Never, Match::Always).evaluate(&osm));
        assert!(!Match::xor(Match::Always, Match::Always).evaluate(&osm));
        assert!(Match::not(Match::and(Match::Always, Match::Never)).evaluate(&osm));
        assert!(!Match::not(Match::or(Match::Never, Match::Always)).evaluate(&osm));
        assert!(Match::not(Match::xor(Match::Always, Match::Always)).evaluate(&osm));
    }

    #[test]
    fn test_exact_key_value_modes() {
        let osm = Tagged::with(&[("highway", "residential"), ("access", "")]);
        assert!(exact("highway", "*", false).evaluate(&osm));
        assert!(exact("*", "residential", false).evaluate(&osm));
        assert!(!exact("*", "primary", false).evaluate(&osm));
        assert!(exact("name", "", false).evaluate(&osm));
        assert!(exact("access", "", false).evaluate(&osm));
        assert!(!exact("highway", "", false).evaluate(&osm));
        assert!(exact("highway", "residential", false).evaluate(&osm));
        assert!(!exact("highway", "Residential", false).evaluate(&osm));
        assert!(!exact("*", "", false).evaluate(&osm));
        assert!(exact("*", "*", false).evaluate(&osm));
    }

    #[test]
    fn test_exact_key_value_on_untagged() {
        let osm = Tagged::default();
        assert!(exact("*", "", false).evaluate(&osm));
        assert!(exact("*", "*", false).evaluate(&osm));
        assert!(exact("name", "", false).evaluate(&osm));
        assert!(!exact("name", "*", false).evaluate(&osm));
        assert!(!exact("name", "x", false).evaluate(&osm));
    }

    #[test]
    fn test_exact_key_value_regex_is_full_match() {
        let osm = Tagged::with(&[("foo", "bar")]);
        assert!(exact("foo", "[Bb]a[rz]", true).evaluate(&osm));
        assert!(!exact("foo", "a", true).evaluate(&osm));
        assert!(exact("f.*", "*", true).evaluate(&osm));
        assert!(!exact("f", "*", true).evaluate(&osm));
        assert!(exact("g.*", "", true).evaluate(&osm));
        assert!(!exact("fo+", "", true).evaluate(&osm));
        assert!(exact("*", "b..", true).evaluate(&osm));
    }

    #[test]
    fn test_key_value_substring() {
        let osm = Tagged::with(&[("Name", "Main Street")]);
        let m = |k: &str, v: &str, cs: bool| {
            Match::KeyValue(KeyValue::new(k, v, false, cs).unwrap()).evaluate(&osm)
        };
        assert!(m("name", "main", false));
        assert!(m("Name", "Main", true));
        assert!(!m("name", "Main", true));
        assert!(!m("Name", "main", true));
        assert!(!m("name", "side", false));
    }

    #[test]
    fn test_key_value_regex_uses_find() {
        let osm = Tagged::with(&[("name:en", "Main Street")]);
        let m = Match::KeyValue(KeyValue::new("name", "^Main", true, false).unwrap());
        assert!(m.evaluate(&osm));
        let m = Match::KeyValue(KeyValue::new("name", "^Street", true, false).unwrap());
        assert!(!m.evaluate(&osm));
    }

    #[test]
    fn test_key_value_timestamp() {
        let osm = Tagged {
            timestamp: Some(Utc.with_ymd_and_hms(2011, 2, 4, 12, 0, 0).unwrap()),
            ..Default::default()
        };
        let m = Match::KeyValue(KeyValue::new("timestamp", "2011-02-04T12", false, false).unwrap());
        assert!(m.evaluate(&osm));
    }

    #[test]
    fn test_value_comparison() {
        let m = |k: &str, v: &str, mode| {
            Match::ValueComparison(ValueComparison::new(k, Some(v.to_string()), mode).unwrap())
        };
        let osm = Tagged::with(&[("start_date", "1950-09"), ("name", "Alpha"), ("lanes", "10")]);
        assert!(m("start_date", "1950", CompareMode::Greater).evaluate(&osm));
        assert!(m("start_date", "1960", CompareMode::Less).evaluate(&osm));
        assert!(m("name", "I", CompareMode::Less).evaluate(&osm));
        assert!(m("lanes", "9", CompareMode::Greater).evaluate(&osm));
        assert!(!m("lanes", "10", CompareMode::Greater).evaluate(&osm));
        assert!(!m("missing", "0", CompareMode::Greater).evaluate(&osm));
    }

    #[test]
    fn test_any_text() {
        let osm = Tagged::with(&[("name", "Caf\u{e9} Central")]);
        let any = |s: &str, regex: bool| Match::Any(AnyText::new(s, regex, false).unwrap());
        assert!(any("cafe\u{301}", false).evaluate(&osm));
        assert!(any("NAME", false).evaluate(&osm));
        assert!(!any("bakery", false).evaluate(&osm));
        assert!(!any("^cen", true).evaluate(&osm));
        assert!(any("c.ntral", true).evaluate(&osm));

        let untagged = Tagged::default();
        assert!(any("", false).evaluate(&untagged));
        assert!(!any("x", false).evaluate(&untagged));

        let with_user = Tagged {
            user: Some("mapper".to_string()),
            ..Default::default()
        };
        assert!(any("map", false).evaluate(&with_user));
    }

    #[test]
    fn test_boolean_tag() {
        let m = Match::BooleanTag { key: "oneway".to_string(), default: false };
        assert!(m.evaluate(&Tagged::with(&[("oneway", "yes")])));
        assert!(!m.evaluate(&Tagged::with(&[("oneway", "no")])));
        assert!(!m.evaluate(&Tagged::with(&[("oneway", "reversible")])));
        assert!(!m.evaluate(&Tagged::default()));
    }

    #[test]
    fn test_user_and_ranges() {
        let anonymous = Tagged::default();
        let named = Tagged {
            user: Some("alice".to_string()),
            ..Default::default()
        };
        assert!(Match::User(None).evaluate(&anonymous));
        assert!(!Match::User(None).evaluate(&named));
        assert!(Match::User(Some("alice".to_string())).evaluate(&named));

        let tags = Match::Range { property: RangeProperty::Tags, range: Range::new(1, 2) };
        assert!(tags.evaluate(&Tagged::with(&[("a", "b")])));
        assert!(!tags.evaluate(&anonymous));
        let members = Match::Range { property: RangeProperty::Members, range: Range::new(0, 5) };
        assert!(!members.evaluate(&anonymous));
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let mut m = Match::Always;
        for _ in 0..100_000 {
            m = Match::and(Match::Always, m);
        }
        assert!(m.evaluate(&Tagged::default()));
    }
}
