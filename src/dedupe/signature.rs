use std::fmt;

use serde::Serialize;

use crate::model::Vertex;
use crate::store::PropertyFilter;
use crate::types::PropValue;

/// Separator placed between key segments.
pub const KEY_SEPARATOR: char = '|';

/// Escapes separators inside string segments and introduces typed segments.
const ESCAPE: char = '\\';

/// Canonical identity string built from a vertex's key properties.
///
/// Segments follow the descriptor's declared key order; a missing property
/// contributes an empty segment. Never build one from a re-sorted key list.
///
/// String values are written with `|` and `\` escaped. Other values carry a
/// `\b`, `\i` or `\f` tag, so `Int(5)` and `Str("5")` never collide.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct KeySignature(String);

impl KeySignature {
    /// Builds the signature of `vertex` for `keys`.
    pub fn build(vertex: &Vertex, keys: &[String]) -> Self {
        let mut out = String::new();
        for (idx, key) in keys.iter().enumerate() {
            if idx > 0 {
                out.push(KEY_SEPARATOR);
            }
            if let Some(value) = vertex.get(key) {
                push_segment(&mut out, value);
            }
        }
        KeySignature(out)
    }

    /// The signature text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_segment(out: &mut String, value: &PropValue) {
    let tag = match value {
        PropValue::Str(text) => {
            for ch in text.chars() {
                if ch == KEY_SEPARATOR || ch == ESCAPE {
                    out.push(ESCAPE);
                }
                out.push(ch);
            }
            return;
        }
        PropValue::Bool(_) => 'b',
        PropValue::Int(_) => 'i',
        PropValue::Float(_) => 'f',
    };
    out.push(ESCAPE);
    out.push(tag);
    out.push_str(&value.to_string());
}

/// Equality filters selecting vertices that share `vertex`'s present key values.
pub fn key_filters(vertex: &Vertex, keys: &[String]) -> Vec<PropertyFilter> {
    keys.iter()
        .filter_map(|key| {
            vertex
                .get(key)
                .map(|value| PropertyFilter::new(key.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VertexId;
    use proptest::prelude::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn follows_declared_order() {
        let v = Vertex::new(VertexId(1), "p-interface")
            .with_prop("interface-name", "eth0")
            .with_prop("hostname", "h1");
        assert_eq!(
            KeySignature::build(&v, &keys(&["hostname", "interface-name"])).as_str(),
            "h1|eth0"
        );
        assert_eq!(
            KeySignature::build(&v, &keys(&["interface-name", "hostname"])).as_str(),
            "eth0|h1"
        );
    }

    #[test]
    fn missing_properties_are_empty_segments() {
        let v = Vertex::new(VertexId(1), "x").with_prop("b", "5");
        assert_eq!(KeySignature::build(&v, &keys(&["a", "b", "c"])).as_str(), "|5|");
    }

    #[test]
    fn separators_and_value_types_do_not_collide() {
        let names = keys(&["a", "b"]);
        let split = Vertex::new(VertexId(1), "x")
            .with_prop("a", "p|q")
            .with_prop("b", "r");
        let shifted = Vertex::new(VertexId(2), "x")
            .with_prop("a", "p")
            .with_prop("b", "q|r");
        assert_ne!(KeySignature::build(&split, &names), KeySignature::build(&shifted, &names));
        assert_eq!(KeySignature::build(&split, &names).as_str(), "p\\|q|r");

        let int = Vertex::new(VertexId(3), "x").with_prop("a", 5i64);
        let text = Vertex::new(VertexId(4), "x").with_prop("a", "5");
        let tagged = Vertex::new(VertexId(5), "x").with_prop("a", "\\i5");
        let a = keys(&["a"]);
        assert_eq!(KeySignature::build(&int, &a).as_str(), "\\i5");
        assert_ne!(KeySignature::build(&int, &a), KeySignature::build(&text, &a));
        assert_ne!(KeySignature::build(&int, &a), KeySignature::build(&tagged, &a));
    }

    #[test]
    fn key_filters_skip_missing_values() {
        let v = Vertex::new(VertexId(1), "x").with_prop("b", "B");
        let filters = key_filters(&v, &keys(&["a", "b"]));
        assert_eq!(filters, vec![PropertyFilter::new("b", "B")]);
    }

    proptest! {
        #[test]
        fn equal_inputs_give_identical_signatures(
            values in proptest::collection::vec("[a-z0-9-]{0,8}", 1..4)
        ) {
            let names: Vec<String> = (0..values.len()).map(|i| format!("k{i}")).collect();
            let mut a = Vertex::new(VertexId(1), "t");
            let mut b = Vertex::new(VertexId(2), "t");
            for (name, value) in names.iter().zip(&values) {
                a = a.with_prop(name.clone(), value.as_str());
                b = b.with_prop(name.clone(), value.as_str());
            }
            prop_assert_eq!(KeySignature::build(&a, &names), KeySignature::build(&b, &names));
        }
    }
}
