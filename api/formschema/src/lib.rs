/*!
# Introduction

formschema turns a HomestakerOS options schema into form controls and turns submitted form fields
back into a configuration document.

The schema is a JSON tree.  A node with a `type` attribute is a leaf setting; any other node is
a group of settings.  Leaves carry a `default`, and optionally a `description` and an `example`.

# Field names

Every rendered control is named by a [`FieldPath`], rooted at either `schema` (the blank template)
or `nodes` (an existing host).  See the [`path`] module for the encoding.

# Round trip

```
use formschema::{reconstruct, render_schema, Schema, SubmittedForm, SCHEMA_ROOT};
use serde_json::json;

let schema = Schema::from_value(&json!({
    "ssh": { "enable": { "type": "bool", "default": false } }
})).unwrap();

let form = render_schema(&schema, SCHEMA_ROOT, None).unwrap();
let submitted = SubmittedForm::from_pairs(form.form_fields());
assert_eq!(reconstruct(&schema, &submitted).unwrap(), schema.defaults());
```
*/

#[macro_use]
extern crate log;

pub mod error;
pub mod path;
pub mod reconstruct;
pub mod render;
pub mod schema;

pub use error::{Error, Result};
pub use path::{ancestor_prefixes, decode, encode, FieldPath, Segment};
pub use reconstruct::{reconstruct, SubmittedForm};
pub use render::{
    render, render_schema, AttrsControl, Control, ListControl, NODES_ROOT, SCHEMA_ROOT,
};
pub use schema::{EntryField, EntryTemplate, Leaf, LeafType, Schema, SchemaNode, UnknownTypes};
