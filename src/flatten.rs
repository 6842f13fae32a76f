//! Flat rendering of JSON values for hierarchical display
//!
//! A mapping renders as an [FlatToken::Open] marker, one token per entry in insertion order and a
//! [FlatToken::Close] marker. Nested mappings recurse, everything else becomes a `key: value`
//! item. [nest] rebuilds the tree shape from the tokens.

use std::fmt;

use serde_json::Value;

pub const OPEN_MARKER: &str = "&in";
pub const CLOSE_MARKER: &str = "&out";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlatToken {
    Open,
    Close,
    Item(String),
}

impl fmt::Display for FlatToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str(OPEN_MARKER),
            Self::Close => f.write_str(CLOSE_MARKER),
            Self::Item(item) => f.write_str(item),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flattens `value`; `key` is the name the value is stored under, if any
pub fn flatten(value: &Value, key: Option<&str>) -> Vec<FlatToken> {
    let mut tokens = Vec::new();
    flatten_into(value, key, &mut tokens);
    tokens
}

fn flatten_into(value: &Value, key: Option<&str>, tokens: &mut Vec<FlatToken>) {
    match (value, key) {
        (Value::Object(map), _) => {
            tokens.push(FlatToken::Open);
            for (key, value) in map {
                flatten_into(value, Some(key.as_str()), tokens);
            }
            tokens.push(FlatToken::Close);
        }
        (value, Some(key)) => tokens.push(FlatToken::Item(format!("{key}: {}", render(value)))),
        (value, None) => tokens.push(FlatToken::Item(render(value))),
    }
}

/// A rebuilt display tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(String),
    Branch(Vec<Node>),
}

impl Node {
    /// The tree shape of `value`, as [flatten] followed by [nest] would produce it
    pub fn shape_of(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::Branch(
                map.iter()
                    .map(|(key, value)| match value {
                        Value::Object(_) => Self::shape_of(value),
                        value => Self::Leaf(format!("{key}: {}", render(value))),
                    })
                    .collect(),
            ),
            value => Self::Leaf(render(value)),
        }
    }
}

/// Rebuilds the nodes described by `tokens`, `None` if the markers are unbalanced
pub fn nest(tokens: &[FlatToken]) -> Option<Vec<Node>> {
    let mut stack: Vec<Vec<Node>> = vec![Vec::new()];

    for token in tokens {
        match token {
            FlatToken::Open => stack.push(Vec::new()),
            FlatToken::Close => {
                let children = stack.pop()?;
                stack.last_mut()?.push(Node::Branch(children));
            }
            FlatToken::Item(item) => stack.last_mut()?.push(Node::Leaf(item.clone())),
        }
    }

    match stack.len() {
        1 => stack.pop(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn item(s: &str) -> FlatToken {
        FlatToken::Item(s.to_string())
    }

    #[test]
    fn nested_mapping() {
        let tokens = flatten(&json!({"a": 1, "b": {"c": 2}}), None);

        assert_eq!(
            tokens,
            [
                FlatToken::Open,
                item("a: 1"),
                FlatToken::Open,
                item("c: 2"),
                FlatToken::Close,
                FlatToken::Close,
            ]
        );
    }

    #[test]
    fn bare_scalar() {
        assert_eq!(flatten(&json!("raw"), None), [item("raw")]);
        assert_eq!(flatten(&json!(22), None), [item("22")]);
    }

    #[test]
    fn keyed_scalars() {
        let tokens = flatten(
            &json!({"on": true, "name": "lamp", "levels": [1, 2], "none": null}),
            None,
        );

        assert_eq!(
            tokens,
            [
                FlatToken::Open,
                item("on: true"),
                item("name: lamp"),
                item("levels: [1,2]"),
                item("none: null"),
                FlatToken::Close,
            ]
        );
    }

    #[test]
    fn insertion_order_is_kept() {
        let value: Value = serde_json::from_str(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();

        let items: Vec<_> = flatten(&value, None)
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(items, ["&in", "z: 1", "a: 2", "m: 3", "&out"]);
    }

    #[test]
    fn nest_rebuilds_shape() {
        let value = json!({
            "value": 22,
            "unit": {"name": "celsius", "scale": {"min": -40, "max": 125}},
            "ok": true,
            "empty": {}
        });

        let nodes = nest(&flatten(&value, None)).unwrap();

        assert_eq!(nodes, [Node::shape_of(&value)]);
        match &nodes[0] {
            Node::Branch(children) => {
                assert_eq!(children.len(), 4);
                assert_eq!(children[0], Node::Leaf("value: 22".to_string()));
                let unit = &children[1];
                assert!(matches!(unit, Node::Branch(unit) if unit.len() == 2));
                assert_eq!(children[3], Node::Branch(Vec::new()));
            }
            leaf => panic!("expected a branch, got {leaf:?}"),
        }
    }

    #[test]
    fn nest_rejects_unbalanced_markers() {
        assert_eq!(nest(&[FlatToken::Open, item("a: 1")]), None);
        assert_eq!(nest(&[FlatToken::Close]), None);
        assert_eq!(
            nest(&[item("raw")]),
            Some(vec![Node::Leaf("raw".to_string())])
        );
    }
}
