//! The tree walker turns a schema into a tree of form controls.
//!
//! Controls own their own state (group visibility, list items, named entries), and each one
//! knows which `(name, value)` pairs it contributes when the form is submitted, mirroring what a
//! browser sends for the equivalent HTML form.

use serde::Serialize;
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;

use crate::error::{self, Result};
use crate::path::{FieldPath, Segment};
use crate::schema::{EntryField, EntryTemplate, Leaf, LeafType, Schema, SchemaNode};

/// Value submitted by the hidden companion of every checkbox.
pub const UNCHECKED_VALUE: &str = "0";
/// Value submitted by a checked checkbox, after its hidden companion.
pub const CHECKED_VALUE: &str = "1";

/// Root context for rendering the blank template.
pub const SCHEMA_ROOT: &str = "schema";
/// Root context for rendering an existing host's configuration.
pub const NODES_ROOT: &str = "nodes";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "control", rename_all = "camelCase")]
pub enum Control {
    Group(Group),
    Checkbox(Checkbox),
    Text(TextInput),
    Number(NumberInput),
    List(ListControl),
    Attrs(AttrsControl),
}

impl Control {
    /// The `(name, value)` pairs this control submits, in document order.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut Vec<(String, String)>) {
        match self {
            Control::Group(group) => group
                .children
                .iter()
                .for_each(|child| child.collect_fields(out)),
            Control::Checkbox(checkbox) => {
                push_flag(out, checkbox.name.to_string(), checkbox.checked)
            }
            Control::Text(text) => out.push((text.name.to_string(), text.value.clone())),
            Control::Number(number) => out.push((number.name.to_string(), number.value.clone())),
            Control::List(list) => out.extend(list.form_fields()),
            Control::Attrs(attrs) => out.extend(attrs.form_fields()),
        }
    }

    /// Finds the control rendered for the given field path, searching through groups.
    pub fn find_mut(&mut self, path: &FieldPath) -> Option<&mut Control> {
        if self.path() == path {
            return Some(self);
        }
        match self {
            Control::Group(group) => group
                .children
                .iter_mut()
                .find_map(|child| child.find_mut(path)),
            _ => None,
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            Control::Group(c) => &c.path,
            Control::Checkbox(c) => &c.name,
            Control::Text(c) => &c.name,
            Control::Number(c) => &c.name,
            Control::List(c) => &c.name,
            Control::Attrs(c) => &c.name,
        }
    }
}

fn push_flag(out: &mut Vec<(String, String)>, name: String, checked: bool) {
    out.push((name.clone(), UNCHECKED_VALUE.to_string()));
    if checked {
        out.push((name, CHECKED_VALUE.to_string()));
    }
}

/// A labelled group of settings, shown or hidden independently of every other group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub path: FieldPath,
    pub label: Option<String>,
    pub visible: bool,
    pub children: Vec<Control>,
}

impl Group {
    pub fn toggle(&mut self) {
        self.visible = !self.visible;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkbox {
    pub name: FieldPath,
    pub label: String,
    pub description: Option<String>,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextInput {
    pub name: FieldPath,
    pub label: String,
    pub description: Option<String>,
    pub placeholder: Option<String>,
    pub value: String,
    /// An empty value submits an explicit null.
    pub nullable: bool,
    /// Descriptive only; not enforced.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberInput {
    pub name: FieldPath,
    pub label: String,
    pub description: Option<String>,
    pub value: String,
}

impl NumberInput {
    /// Accepts an integer or an empty string; anything else is refused and the current value kept.
    pub fn set_input<S: Into<String>>(&mut self, input: S) -> Result<()> {
        let input = input.into();
        if !input.is_empty() {
            input
                .trim()
                .parse::<i64>()
                .context(error::InvalidIntegerSnafu {
                    path: self.name.to_string(),
                    value: input.clone(),
                })?;
        }
        self.value = input;
        Ok(())
    }
}

/// A variable-length list of scalar values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListControl {
    pub name: FieldPath,
    pub label: String,
    pub description: Option<String>,
    pub example: Option<String>,
    pub items: Vec<String>,
}

impl ListControl {
    pub fn append(&mut self) {
        self.items.push(String::new());
    }

    pub fn remove(&mut self, index: usize) -> Result<String> {
        self.check_index(index)?;
        Ok(self.items.remove(index))
    }

    pub fn set(&mut self, index: usize, value: impl Into<String>) -> Result<()> {
        self.check_index(index)?;
        self.items[index] = value.into();
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        ensure!(
            index < self.items.len(),
            error::NoSuchEntrySnafu {
                index,
                len: self.items.len(),
            }
        );
        Ok(())
    }

    /// Items are always named by their current position, so removals never leave holes.
    ///
    /// The list's own name goes first with an empty value, which clears the seeded list so the
    /// items shown are the whole list.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        std::iter::once((self.name.to_string(), String::new()))
            .chain(
                self.items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (self.name.index(i).to_string(), item.clone())),
            )
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryValue {
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttrsEntry {
    pub name: String,
    pub values: BTreeMap<String, EntryValue>,
}

/// A variable-length collection of named entries sharing one field template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttrsControl {
    pub name: FieldPath,
    pub label: String,
    pub description: Option<String>,
    pub template: EntryTemplate,
    pub entries: Vec<AttrsEntry>,
}

impl AttrsControl {
    fn blank_entry(&self, name: String) -> AttrsEntry {
        AttrsEntry {
            name,
            values: entry_values(&self.template, None),
        }
    }

    /// Adds an unnamed entry with the template's defaults and returns its index.
    pub fn add(&mut self) -> usize {
        let entry = self.blank_entry(String::new());
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Result<AttrsEntry> {
        self.check_index(index)?;
        Ok(self.entries.remove(index))
    }

    pub fn rename(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
        self.check_index(index)?;
        self.entries[index].name = name.into();
        Ok(())
    }

    pub fn set_text(&mut self, index: usize, field: &str, value: impl Into<String>) -> Result<()> {
        self.set_field(index, field, "text", EntryValue::Text(value.into()))
    }

    pub fn set_flag(&mut self, index: usize, field: &str, value: bool) -> Result<()> {
        self.set_field(index, field, "flag", EntryValue::Flag(value))
    }

    fn set_field(
        &mut self,
        index: usize,
        field: &str,
        kind: &'static str,
        value: EntryValue,
    ) -> Result<()> {
        self.check_index(index)?;
        let fits = matches!(
            (self.template.fields.get(field), &value),
            (Some(EntryField::Flag { .. }), EntryValue::Flag(_))
                | (Some(EntryField::Text { .. }), EntryValue::Text(_))
        );
        ensure!(fits, error::NoSuchFieldSnafu { field, kind });
        self.entries[index].values.insert(field.to_string(), value);
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        ensure!(
            index < self.entries.len(),
            error::NoSuchEntrySnafu {
                index,
                len: self.entries.len(),
            }
        );
        Ok(())
    }

    /// Entries still waiting for a name are not submitted.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for entry in self.entries.iter().filter(|e| !e.name.is_empty()) {
            let entry_path = self.name.child(entry.name.as_str());
            for (field, value) in &entry.values {
                let name = entry_path.child(field.as_str()).to_string();
                match value {
                    EntryValue::Flag(checked) => push_flag(&mut out, name, *checked),
                    EntryValue::Text(text) => out.push((name, text.clone())),
                }
            }
        }
        out
    }
}

fn entry_values(template: &EntryTemplate, record: Option<&Value>) -> BTreeMap<String, EntryValue> {
    template
        .fields
        .iter()
        .map(|(field, kind)| {
            let current = record.and_then(|r| r.get(field));
            let value = match kind {
                EntryField::Flag { default } => {
                    EntryValue::Flag(current.and_then(Value::as_bool).unwrap_or(*default))
                }
                EntryField::Text { .. } => EntryValue::Text(current.map(text_of).unwrap_or_default()),
            };
            (field.clone(), value)
        })
        .collect()
}

/// The text a control shows for a stored value.
fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn label_of(path: &FieldPath) -> Option<String> {
    path.last().map(Segment::to_string)
}

/// Renders the whole schema rooted at `root`, consulting `overlay` for current values.
pub fn render_schema(schema: &Schema, root: &str, overlay: Option<&Value>) -> Option<Control> {
    render(&FieldPath::new(root), schema.root(), overlay)
}

/// Renders one schema node.  With an overlay (an existing host's configuration), each leaf shows
/// the overlay's value at the same path instead of the schema default.  Leaves that cannot be
/// rendered produce None.
pub fn render(path: &FieldPath, node: &SchemaNode, overlay: Option<&Value>) -> Option<Control> {
    match node {
        SchemaNode::Interior(children) => {
            let children = children
                .iter()
                .filter_map(|(name, child)| render(&path.child(name.as_str()), child, overlay))
                .collect();
            Some(Control::Group(Group {
                path: path.clone(),
                label: label_of(path),
                visible: true,
                children,
            }))
        }
        SchemaNode::Leaf(leaf) => {
            let current = overlay
                .and_then(|overlay| overlay_value(overlay, path))
                .unwrap_or(&leaf.default);
            render_leaf(path, leaf, current)
        }
    }
}

fn overlay_value<'a>(overlay: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut value = overlay;
    // The first segment is the rendering root, which the overlay document doesn't contain.
    for segment in path.segments().iter().skip(1) {
        value = match segment {
            Segment::Key(key) => value.get(key)?,
            Segment::Index(i) => value.get(i)?,
        };
    }
    Some(value)
}

fn render_leaf(path: &FieldPath, leaf: &Leaf, current: &Value) -> Option<Control> {
    let label = label_of(path).unwrap_or_default();
    let description = leaf.description.clone();
    let placeholder = leaf.example.as_ref().map(text_of);

    let control = match &leaf.kind {
        LeafType::Bool => Control::Checkbox(Checkbox {
            name: path.clone(),
            label,
            description,
            checked: current.as_bool().unwrap_or(false),
        }),
        LeafType::Str | LeafType::Path | LeafType::NullOr | LeafType::StrMatching(_) => {
            let pattern = match &leaf.kind {
                LeafType::StrMatching(pattern) => Some(pattern.clone()),
                _ => None,
            };
            Control::Text(TextInput {
                name: path.clone(),
                label,
                description,
                placeholder,
                value: text_of(current),
                nullable: leaf.kind == LeafType::NullOr,
                pattern,
            })
        }
        LeafType::Int => Control::Number(NumberInput {
            name: path.clone(),
            label,
            description,
            value: text_of(current),
        }),
        LeafType::ListOf => Control::List(ListControl {
            name: path.clone(),
            label,
            description,
            example: placeholder,
            items: current
                .as_array()
                .map(|items| items.iter().map(text_of).collect())
                .unwrap_or_default(),
        }),
        LeafType::AttrsOf => {
            let template = leaf.template.clone()?;
            let entries = current
                .as_object()
                .map(|records| {
                    records
                        .iter()
                        .map(|(name, record)| AttrsEntry {
                            name: name.clone(),
                            values: entry_values(&template, Some(record)),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Control::Attrs(AttrsControl {
                name: path.clone(),
                label,
                description,
                template,
                entries,
            })
        }
    };
    Some(control)
}

/// Looks up a control by its encoded field name.
pub fn find_control<'a>(root: &'a mut Control, name: &str) -> Result<&'a mut Control> {
    let path: FieldPath = name.parse()?;
    root.find_mut(&path)
        .context(error::UnresolvedPathSnafu { path: name })
}
