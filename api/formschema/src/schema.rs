//! The schema document describes the shape of a configuration: interior nodes group settings,
//! leaf nodes carry a `type` plus `default`, `description` and `example` metadata.
//!
//! Whether a node is a leaf is decided once, when the document is loaded, so the rest of the crate
//! works with [`SchemaNode`] and never has to look for a `type` key again.

use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{self, Result};
use crate::path::{FieldPath, Segment};

const TYPE_KEY: &str = "type";
const STR_MATCHING: &str = "strMatching";

/// The closed set of leaf types a schema may use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LeafType {
    Bool,
    Str,
    Path,
    Int,
    NullOr,
    ListOf,
    AttrsOf,
    /// A string constrained by a pattern.  The pattern is descriptive only.
    StrMatching(String),
}

impl LeafType {
    /// Parses a schema `type` attribute, returning None for types we don't know.
    pub fn parse(type_name: &str) -> Option<Self> {
        let leaf_type = match type_name {
            "bool" => LeafType::Bool,
            "str" => LeafType::Str,
            "path" => LeafType::Path,
            "int" => LeafType::Int,
            "nullOr" => LeafType::NullOr,
            "listOf" => LeafType::ListOf,
            "attrsOf" => LeafType::AttrsOf,
            other => {
                let rest = other.strip_prefix(STR_MATCHING)?;
                LeafType::StrMatching(pattern_argument(rest))
            }
        };
        Some(leaf_type)
    }

    pub fn is_repeatable(&self) -> bool {
        matches!(self, LeafType::ListOf | LeafType::AttrsOf)
    }
}

// Accepts `strMatching(<pattern>)` as well as the `strMatching "<pattern>"` spelling.
fn pattern_argument(rest: &str) -> String {
    let rest = rest.trim();
    let rest = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .unwrap_or(rest)
        .trim();
    rest.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(rest)
        .to_string()
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafType::Bool => write!(f, "bool"),
            LeafType::Str => write!(f, "str"),
            LeafType::Path => write!(f, "path"),
            LeafType::Int => write!(f, "int"),
            LeafType::NullOr => write!(f, "nullOr"),
            LeafType::ListOf => write!(f, "listOf"),
            LeafType::AttrsOf => write!(f, "attrsOf"),
            LeafType::StrMatching(pattern) => write!(f, "strMatching({})", pattern),
        }
    }
}

/// One field of an `attrsOf` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryField {
    Flag { default: bool },
    Text { placeholder: Option<String> },
}

/// The field shape shared by every entry of an `attrsOf` setting.  Fields are always flat, so an
/// entry can never hold another repeatable group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryTemplate {
    pub fields: BTreeMap<String, EntryField>,
}

impl EntryTemplate {
    /// Builds a template from an `example` of the form `{ "<sample entry>": { field: value } }`.
    fn from_example(example: &Value) -> Option<Self> {
        let sample = example.as_object()?.values().next()?.as_object()?;
        let fields = sample
            .iter()
            .map(|(name, value)| {
                let field = match value {
                    Value::Bool(default) => EntryField::Flag { default: *default },
                    Value::Null => EntryField::Text { placeholder: None },
                    Value::String(s) => EntryField::Text {
                        placeholder: Some(s.clone()),
                    },
                    other => EntryField::Text {
                        placeholder: Some(other.to_string()),
                    },
                };
                (name.clone(), field)
            })
            .collect();
        Some(Self { fields })
    }

    /// Builds a template from `options`, a mapping of field name to leaf description.
    fn from_options(options: &Value) -> Option<Self> {
        let options = options.as_object()?;
        let fields = options
            .iter()
            .map(|(name, option)| {
                let is_flag = option.get(TYPE_KEY).and_then(Value::as_str) == Some("bool");
                let field = if is_flag {
                    EntryField::Flag {
                        default: option
                            .get("default")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    }
                } else {
                    let placeholder = option
                        .get("example")
                        .or_else(|| option.get("default"))
                        .and_then(|v| match v {
                            Value::Null => None,
                            Value::String(s) => Some(s.clone()),
                            other => Some(other.to_string()),
                        });
                    EntryField::Text { placeholder }
                };
                (name.clone(), field)
            })
            .collect();
        Some(Self { fields })
    }

    pub fn is_flag(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(EntryField::Flag { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub kind: LeafType,
    pub default: Value,
    pub description: Option<String>,
    pub example: Option<Value>,
    /// Entry shape, for `attrsOf` leaves that describe one.
    pub template: Option<EntryTemplate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Interior(BTreeMap<String, SchemaNode>),
    Leaf(Leaf),
}

impl SchemaNode {
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            SchemaNode::Leaf(leaf) => Some(leaf),
            SchemaNode::Interior(_) => None,
        }
    }

    /// The node's value with every leaf replaced by its default.
    pub fn defaults(&self) -> Value {
        match self {
            SchemaNode::Leaf(leaf) => leaf.default.clone(),
            SchemaNode::Interior(children) => Value::Object(
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.defaults()))
                    .collect(),
            ),
        }
    }
}

/// What to do with leaves whose `type` we don't recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTypes {
    /// Refuse to load the schema.
    #[default]
    Reject,
    /// Drop the leaf; it is neither rendered nor present in reconstructed documents.
    Skip,
}

/// A loaded schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    root: SchemaNode,
}

impl Schema {
    /// Loads a schema, rejecting unknown leaf types.
    pub fn from_value(document: &Value) -> Result<Self> {
        Self::from_value_with(document, UnknownTypes::Reject)
    }

    pub fn from_value_with(document: &Value, unknown: UnknownTypes) -> Result<Self> {
        let root = FieldPath::default();
        let children = parse_interior(&root, document, unknown)?;
        Ok(Self {
            root: SchemaNode::Interior(children),
        })
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// Follows the given segments through interior nodes.  Returns None if the path leaves the
    /// schema, including when it continues past a leaf.
    pub fn lookup(&self, segments: &[Segment]) -> Option<&SchemaNode> {
        let mut node = &self.root;
        for segment in segments {
            match (node, segment) {
                (SchemaNode::Interior(children), Segment::Key(key)) => node = children.get(key)?,
                _ => return None,
            }
        }
        Some(node)
    }

    pub fn leaf(&self, segments: &[Segment]) -> Option<&Leaf> {
        self.lookup(segments).and_then(SchemaNode::as_leaf)
    }

    /// The seed document: the schema's shape with every leaf replaced by its default.
    pub fn defaults(&self) -> Value {
        self.root.defaults()
    }

    /// Paths (without a root context) of every leaf, in sorted order.
    pub fn leaf_paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        collect_leaf_paths(&self.root, &mut Vec::new(), &mut out);
        out
    }
}

impl FromStr for Schema {
    type Err = error::Error;

    fn from_str(input: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(input).context(error::ParseSchemaSnafu)?;
        Self::from_value(&document)
    }
}

fn collect_leaf_paths(node: &SchemaNode, prefix: &mut Vec<Segment>, out: &mut Vec<FieldPath>) {
    match node {
        SchemaNode::Leaf(_) => out.push(FieldPath::from_segments(prefix.clone())),
        SchemaNode::Interior(children) => {
            for (name, child) in children {
                prefix.push(Segment::Key(name.clone()));
                collect_leaf_paths(child, prefix, out);
                prefix.pop();
            }
        }
    }
}

fn as_object<'a>(path: &FieldPath, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value.as_object().context(error::NotAnObjectSnafu {
        path: path.to_string(),
    })
}

fn parse_interior(
    path: &FieldPath,
    value: &Value,
    unknown: UnknownTypes,
) -> Result<BTreeMap<String, SchemaNode>> {
    let mut children = BTreeMap::new();
    for (name, child) in as_object(path, value)? {
        let child_path = path.child(name.as_str());
        if let Some(node) = parse_node(&child_path, child, unknown)? {
            children.insert(name.clone(), node);
        }
    }
    Ok(children)
}

fn parse_node(path: &FieldPath, value: &Value, unknown: UnknownTypes) -> Result<Option<SchemaNode>> {
    let object = as_object(path, value)?;
    let type_value = match object.get(TYPE_KEY) {
        Some(type_value) => type_value,
        None => {
            return parse_interior(path, value, unknown).map(|c| Some(SchemaNode::Interior(c)))
        }
    };

    let type_name = type_value.as_str().context(error::InvalidLeafTypeSnafu {
        path: path.to_string(),
    })?;
    let kind = match LeafType::parse(type_name) {
        Some(kind) => kind,
        None => {
            ensure!(
                unknown == UnknownTypes::Skip,
                error::UnknownLeafTypeSnafu {
                    path: path.to_string(),
                    type_name,
                }
            );
            warn!("Skipping '{}' with unknown type '{}'", path, type_name);
            return Ok(None);
        }
    };

    let example = object.get("example").cloned();
    let template = if kind == LeafType::AttrsOf {
        object
            .get("options")
            .and_then(EntryTemplate::from_options)
            .or_else(|| example.as_ref().and_then(EntryTemplate::from_example))
    } else {
        None
    };

    Ok(Some(SchemaNode::Leaf(Leaf {
        kind,
        default: object.get("default").cloned().unwrap_or(Value::Null),
        description: object
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        example,
        template,
    })))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaf_iff_type() {
        let schema = Schema::from_value(&json!({
            "ssh": {
                "authorizedKeys": { "type": "listOf", "default": [] },
                "privateKeyFile": { "type": "nullOr", "default": null },
            }
        }))
        .unwrap();
        assert!(matches!(
            schema.lookup(&["ssh".into()]),
            Some(SchemaNode::Interior(_))
        ));
        let leaf = schema.leaf(&["ssh".into(), "authorizedKeys".into()]).unwrap();
        assert_eq!(leaf.kind, LeafType::ListOf);
        assert_eq!(leaf.default, json!([]));
    }

    #[test]
    fn lookup_does_not_descend_into_leaves() {
        let schema = Schema::from_value(&json!({
            "mounts": { "type": "attrsOf", "default": {} }
        }))
        .unwrap();
        assert!(schema.lookup(&["mounts".into()]).is_some());
        assert!(schema.lookup(&["mounts".into(), "default".into()]).is_none());
        assert!(schema.lookup(&["mounts".into(), 0.into()]).is_none());
    }

    #[test]
    fn str_matching_carries_pattern() {
        assert_eq!(
            LeafType::parse("strMatching(^[a-z]+$)"),
            Some(LeafType::StrMatching("^[a-z]+$".to_string()))
        );
        assert_eq!(
            LeafType::parse("strMatching \"^[0-9]+$\""),
            Some(LeafType::StrMatching("^[0-9]+$".to_string()))
        );
        assert_eq!(LeafType::parse("float"), None);
    }

    #[test]
    fn unknown_types_rejected_or_skipped() {
        let document = json!({
            "localization": {
                "hostname": { "type": "str", "default": "homestaker" },
                "weird": { "type": "submodule", "default": {} },
            }
        });
        let err = Schema::from_value(&document).unwrap_err();
        assert!(matches!(err, error::Error::UnknownLeafType { ref type_name, .. } if type_name == "submodule"));

        let schema = Schema::from_value_with(&document, UnknownTypes::Skip).unwrap();
        assert_eq!(
            schema.defaults(),
            json!({ "localization": { "hostname": "homestaker" } })
        );
    }

    #[test]
    fn non_object_nodes_rejected() {
        let err = Schema::from_value(&json!({ "ssh": "nope" })).unwrap_err();
        assert!(matches!(err, error::Error::NotAnObject { ref path } if path == "ssh"));
        let err = Schema::from_value(&json!({ "ssh": { "type": 3 } })).unwrap_err();
        assert!(matches!(err, error::Error::InvalidLeafType { .. }));
    }

    #[test]
    fn template_from_example() {
        let schema = Schema::from_value(&json!({
            "mounts": {
                "type": "attrsOf",
                "default": {},
                "example": { "tmpl": { "enable": false, "where": "/mnt", "wantedBy": ["multi-user.target"] } }
            }
        }))
        .unwrap();
        let template = schema.leaf(&["mounts".into()]).unwrap().template.clone().unwrap();
        assert_eq!(template.fields["enable"], EntryField::Flag { default: false });
        assert_eq!(
            template.fields["where"],
            EntryField::Text { placeholder: Some("/mnt".to_string()) }
        );
        assert_eq!(
            template.fields["wantedBy"],
            EntryField::Text { placeholder: Some(r#"["multi-user.target"]"#.to_string()) }
        );
    }

    #[test]
    fn template_prefers_options() {
        let schema = Schema::from_value(&json!({
            "mounts": {
                "type": "attrsOf",
                "default": {},
                "example": { "tmpl": { "what": "" } },
                "options": {
                    "enable": { "type": "bool", "default": true },
                    "what": { "type": "str", "default": null, "example": "/dev/sda1" }
                }
            }
        }))
        .unwrap();
        let template = schema.leaf(&["mounts".into()]).unwrap().template.clone().unwrap();
        assert!(template.is_flag("enable"));
        assert_eq!(
            template.fields["what"],
            EntryField::Text { placeholder: Some("/dev/sda1".to_string()) }
        );
    }

    #[test]
    fn leaf_paths_sorted() {
        let schema: Schema = r#"{
            "ssh": { "authorizedKeys": { "type": "listOf", "default": [] } },
            "localization": { "hostname": { "type": "str", "default": "" } }
        }"#
        .parse()
        .unwrap();
        let paths: Vec<String> = schema.leaf_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["localization.hostname", "ssh.authorizedKeys"]);
    }
}
