//! Rebuilds a nested configuration document from flat submitted form fields.
//!
//! The schema's defaults form the seed.  Fields that name a schema leaf overwrite it directly;
//! fields synthesized by a list or named-entry control are merged into their nearest schema
//! ancestor.

use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};

use crate::error::{self, Result};
use crate::path::{FieldPath, Segment};
use crate::render::{CHECKED_VALUE, NODES_ROOT, SCHEMA_ROOT};
use crate::schema::{Leaf, LeafType, Schema, SchemaNode};

/// Root segments that are stripped from submitted field names.
pub const ROOTS: &[&str] = &[SCHEMA_ROOT, NODES_ROOT];

/// Entry fields with this name are always flags.
const ENABLE_FIELD: &str = "enable";

/// Field values as submitted by a form, in document order.
///
/// A name that is submitted more than once keeps its first position and its last value, so a
/// checked checkbox wins over its hidden companion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedForm {
    fields: Vec<(String, String)>,
}

impl SubmittedForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        pairs.into_iter().collect()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SubmittedForm {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut form = SubmittedForm::new();
        for (name, value) in iter {
            form.insert(name, value);
        }
        form
    }
}

/// Builds the configuration document described by `submitted`.  The schema is only read.
pub fn reconstruct(schema: &Schema, submitted: &SubmittedForm) -> Result<Value> {
    let mut document = schema.defaults();

    for (name, value) in submitted.iter() {
        let path: FieldPath = name.parse()?;
        let path = path.strip_root(ROOTS);
        trace!("Merging '{}' = '{}'", path, value);

        match schema.lookup(path.segments()) {
            Some(SchemaNode::Leaf(leaf)) => {
                assign_leaf(&mut document, &path, leaf, value)?
            }
            Some(SchemaNode::Interior(_)) => {
                return error::InteriorPathSnafu {
                    path: path.to_string(),
                }
                .fail()
            }
            None => {
                if value.is_empty() {
                    continue;
                }
                merge_synthesized(schema, &mut document, &path, value)?
            }
        }
    }

    Ok(document)
}

fn assign_leaf(
    document: &mut Value,
    path: &FieldPath,
    leaf: &Leaf,
    value: &str,
) -> Result<()> {
    // A list's own name with no value clears it; entries submitted after it rebuild it.  A null
    // seed stays null.
    if leaf.kind == LeafType::ListOf && value.is_empty() {
        if let Value::Array(entries) = value_at_mut(document, path.segments())? {
            entries.clear();
        }
        return Ok(());
    }
    if value.is_empty() && leaf.kind != LeafType::NullOr {
        return Ok(());
    }
    let coerced = match &leaf.kind {
        LeafType::Int => {
            let parsed = value
                .trim()
                .parse::<i64>()
                .context(error::InvalidIntegerSnafu {
                    path: path.to_string(),
                    value,
                })?;
            Value::from(parsed)
        }
        LeafType::Bool => Value::Bool(value == CHECKED_VALUE),
        LeafType::NullOr if value.is_empty() => Value::Null,
        // A single value for the whole list is taken as its only entry.
        LeafType::ListOf => return push_list_entry(document, path, value),
        LeafType::AttrsOf => {
            return error::MalformedEntrySnafu {
                path: path.to_string(),
                parent: path.to_string(),
            }
            .fail()
        }
        LeafType::Str | LeafType::Path | LeafType::NullOr | LeafType::StrMatching(_) => {
            Value::String(value.to_string())
        }
    };
    *value_at_mut(document, path.segments())? = coerced;
    Ok(())
}

fn merge_synthesized(
    schema: &Schema,
    document: &mut Value,
    path: &FieldPath,
    value: &str,
) -> Result<()> {
    let (parent, node) = path
        .ancestors()
        .find_map(|ancestor| schema.lookup(ancestor.segments()).map(|n| (ancestor, n)))
        .context(error::UnresolvedPathSnafu {
            path: path.to_string(),
        })?;
    let leaf = node.as_leaf().context(error::UnresolvedPathSnafu {
        path: path.to_string(),
    })?;
    debug!("'{}' belongs to {} setting '{}'", path, leaf.kind, parent);

    match leaf.kind {
        LeafType::ListOf => push_list_entry(document, &parent, value),
        LeafType::AttrsOf => {
            let rest = &path.segments()[parent.len()..];
            let (entry, field) = match rest {
                [Segment::Key(entry), Segment::Key(field)] => (entry, field),
                _ => {
                    return error::MalformedEntrySnafu {
                        path: path.to_string(),
                        parent: parent.to_string(),
                    }
                    .fail()
                }
            };
            let is_flag = field == ENABLE_FIELD
                || leaf
                    .template
                    .as_ref()
                    .map_or(false, |template| template.is_flag(field));
            let coerced = if is_flag {
                Value::Bool(value == CHECKED_VALUE)
            } else {
                Value::String(value.to_string())
            };

            let records = value_at_mut(document, parent.segments())?;
            let record = as_object_mut(records, &parent)?
                .entry(entry.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            as_object_mut(record, &parent.child(entry.as_str()))?.insert(field.clone(), coerced);
            Ok(())
        }
        ref kind => error::NotRepeatableSnafu {
            path: path.to_string(),
            parent: parent.to_string(),
            kind: kind.to_string(),
        }
        .fail(),
    }
}

/// Appends to the list at `list_path`, starting one if the seed has none.
fn push_list_entry(document: &mut Value, list_path: &FieldPath, value: &str) -> Result<()> {
    let list = value_at_mut(document, list_path.segments())?;
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    let entries = list.as_array_mut().context(error::DocumentShapeSnafu {
        path: list_path.to_string(),
    })?;
    entries.push(Value::String(value.to_string()));
    Ok(())
}

fn as_object_mut<'a>(value: &'a mut Value, path: &FieldPath) -> Result<&'a mut Map<String, Value>> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut().context(error::DocumentShapeSnafu {
        path: path.to_string(),
    })
}

/// Walks to the given key path, creating empty objects for missing keys.
fn value_at_mut<'a>(document: &'a mut Value, segments: &[Segment]) -> Result<&'a mut Value> {
    let mut current = document;
    for (depth, segment) in segments.iter().enumerate() {
        let key = segment.as_key().context(error::DocumentShapeSnafu {
            path: FieldPath::from_segments(segments[..=depth].to_vec()).to_string(),
        })?;
        let parent = FieldPath::from_segments(segments[..depth].to_vec());
        current = as_object_mut(current, &parent)?
            .entry(key.to_string())
            .or_insert(Value::Null);
    }
    Ok(current)
}
