//! Compiles map-editor search expressions into predicate trees over OSM
//! primitives.
//!
//! ```text
//! "type:way highway=* -name=" ──Tokenizer──▶ tokens ──SearchCompiler──▶ Match
//!                                                                        │
//!                                              Match::evaluate(&dyn Primitive)
//! ```

pub mod ast;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod lexer;
pub mod parser;
pub mod primitive;
pub mod registry;
pub mod text;
pub mod timestamp;
pub mod token;

pub use ast::{AreaKind, CustomMatch, ExactMode, Match, RangeProperty, StateFlag};
pub use dataset::{DataSet, PrimitiveRef};
pub use error::{ParseError, ParseErrorCause, RegistryError};
pub use parser::{SearchCompiler, SearchFlags};
pub use primitive::{
    Bounds, BoundsProvider, LatLon, Primitive, PrimitiveId, PrimitiveKind, StaticBounds,
};
pub use registry::{MatchFactory, MatchRegistry};

/// Compiles `text` with the built-in keywords and no map view.
pub fn compile(text: &str, case_sensitive: bool, regex_search: bool) -> Result<Match, ParseError> {
    MatchRegistry::default().compile(text, SearchFlags::new(case_sensitive, regex_search))
}

/// Builds a query that matches exactly one tag. An empty value matches
/// any value of `key`.
pub fn build_search_string_for_tag(key: &str, value: &str) -> String {
    let for_key = format!("\"{}\"=", escape_string_for_search(key));
    if value.is_empty() {
        for_key + "*"
    } else {
        format!("{for_key}\"{}\"", escape_string_for_search(value))
    }
}

/// Escapes `\` and `"` so `s` can be placed inside a quoted search term.
pub fn escape_string_for_search(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn street(name: &str) -> DataSet {
        let mut ds = DataSet::new();
        ds.add_node(1, LatLon::new(0.0, 0.0));
        ds.add_node(2, LatLon::new(0.0, 1.0));
        let way = ds.add_way(3, &[1, 2]);
        ds.put_tag(way, "type", "way");
        ds.put_tag(way, "name", name);
        ds
    }

    fn way_3(ds: &DataSet) -> PrimitiveRef<'_> {
        ds.get(PrimitiveId::new(PrimitiveKind::Way, 3)).unwrap()
    }

    #[test]
    fn test_end_to_end_tag_and_text() {
        let m = compile("type=way and name:Main", false, false).unwrap();
        assert!(m.evaluate(&way_3(&street("Main Street"))));
        assert!(!m.evaluate(&way_3(&street("Side Street"))));
    }

    #[test]
    fn test_nth_zero_is_rejected() {
        let err = compile("nth:0", false, false).unwrap_err();
        assert!(err.message.to_lowercase().contains("positive integer expected"));
    }

    #[test]
    fn test_unknown_keyword_is_text_search() {
        let m = compile("frobnicate", false, false).unwrap();
        assert!(matches!(&m, Match::Any(_)));

        let mut ds = street("Main Street");
        let node = PrimitiveId::new(PrimitiveKind::Node, 1);
        ds.put_tag(node, "note", "Frobnicate me");
        assert!(m.evaluate(&ds.get(node).unwrap()));
        assert!(!m.evaluate(&way_3(&ds)));
    }

    #[test]
    fn test_compiling_twice_evaluates_identically() {
        let text = "type:way (name:main or -highway=*) | untagged";
        let first = compile(text, false, false).unwrap();
        let second = compile(text, false, false).unwrap();

        for name in ["Main Street", "Side Street"] {
            let ds = street(name);
            for primitive in ds.primitives() {
                assert_eq!(first.evaluate(&primitive), second.evaluate(&primitive));
            }
        }
    }

    #[test]
    fn test_tag_search_string() {
        assert_eq!(build_search_string_for_tag("name", "Main"), r#""name"="Main""#);
        assert_eq!(build_search_string_for_tag("name", ""), r#""name"=*"#);
        assert_eq!(escape_string_for_search(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn test_tag_search_string_matches_only_that_tag() {
        let mut ds = DataSet::new();
        let quoted = ds.add_node(1, LatLon::new(0.0, 0.0));
        let plain = ds.add_node(2, LatLon::new(0.0, 0.0));
        ds.put_tag(quoted, "name:en", r#"The "Pub" \ Inn"#);
        ds.put_tag(plain, "name:en", "The Pub Inn");

        let query = build_search_string_for_tag("name:en", r#"The "Pub" \ Inn"#);
        let m = compile(&query, false, false).unwrap();
        let found: Vec<PrimitiveId> = ds.search(&m).map(|p| p.id()).collect();
        assert_eq!(found, vec![quoted]);

        let m = compile(&build_search_string_for_tag("name:en", ""), false, false).unwrap();
        assert_eq!(ds.search(&m).count(), 2);
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_compiled_match_is_shareable() {
        assert_send_sync::<Match>();
        assert_send_sync::<MatchRegistry>();
        assert_send_sync::<DataSet>();
    }

    #[test]
    fn test_concurrent_evaluation() {
        let mut ds = DataSet::new();
        for id in 1..=8 {
            let node = ds.add_node(id, LatLon::new(0.0, id as f64 * 0.001));
            let kind = if id % 2 == 0 { "bench" } else { "waste_basket" };
            ds.put_tag(node, "amenity", kind);
        }
        let m = compile("amenity=bench or id:1", false, false).unwrap();

        let matched: Vec<Vec<PrimitiveId>> = std::thread::scope(|scope| {
            let handles: Vec<_> = [1..=4, 5..=8]
                .into_iter()
                .map(|ids| {
                    let (ds, m) = (&ds, &m);
                    scope.spawn(move || {
                        ids.map(|id| PrimitiveId::new(PrimitiveKind::Node, id))
                            .filter(|&id| ds.get(id).is_some_and(|p| m.evaluate(&p)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let node = |id| PrimitiveId::new(PrimitiveKind::Node, id);
        assert_eq!(matched[0], vec![node(1), node(2), node(4)]);
        assert_eq!(matched[1], vec![node(6), node(8)]);
    }
}
