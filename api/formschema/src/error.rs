use snafu::Snafu;

/// Potential errors from addressing, loading, rendering or reconstructing against a schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Malformed field path '{}' at byte {}: {}", path, position, msg))]
    MalformedPath {
        path: String,
        position: usize,
        msg: String,
    },

    #[snafu(display("Unable to parse schema document: {}", source))]
    ParseSchema { source: serde_json::Error },

    #[snafu(display("Schema node at '{}' must be a JSON object", path))]
    NotAnObject { path: String },

    #[snafu(display("Schema leaf at '{}' has a non-string 'type' attribute", path))]
    InvalidLeafType { path: String },

    #[snafu(display("Schema leaf at '{}' has unknown type '{}'", path, type_name))]
    UnknownLeafType { path: String, type_name: String },

    #[snafu(display("Value '{}' for '{}' is not an integer: {}", value, path, source))]
    InvalidInteger {
        path: String,
        value: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Field '{}' does not resolve against the schema", path))]
    UnresolvedPath { path: String },

    #[snafu(display("Field '{}' names a group of settings, not a single setting", path))]
    InteriorPath { path: String },

    #[snafu(display(
        "Field '{}' is nested under '{}', a '{}' setting that holds no entries",
        path,
        parent,
        kind
    ))]
    NotRepeatable {
        path: String,
        parent: String,
        kind: String,
    },

    #[snafu(display(
        "Field '{}' must name exactly one entry and one field of '{}'",
        path,
        parent
    ))]
    MalformedEntry { path: String, parent: String },

    #[snafu(display("Document has no room for a value at '{}'", path))]
    DocumentShape { path: String },

    #[snafu(display("No entry at index {}, control holds {}", index, len))]
    NoSuchEntry { index: usize, len: usize },

    #[snafu(display("Entry template has no {} field named '{}'", kind, field))]
    NoSuchField { field: String, kind: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
