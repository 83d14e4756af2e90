//! Field paths address one location inside a configuration document and double as the names of
//! form fields.
//!
//! A path is written root first.  Later segments are written `.name` when the name is a plain run
//! of ASCII letters, digits, `_` and `-`, `["quoted"]` for any other string, and `[n]` for list
//! indices:
//!
//! ```text
//! schema.ssh.authorizedKeys[0]
//! nodes.addons.mev-boost.enable
//! schema.mounts["my data"].where
//! ```
//!
//! The encoding is canonical, so two different segment sequences never share a name, and
//! [`decode`] recovers exactly the segments that [`encode`] was given.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::OptionExt;
use std::fmt;
use std::str::FromStr;

use crate::error::{self, Result};

pub const KEY_SEPARATOR: char = '.';

/// One step into a document: an object key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(key) => Some(key),
            Segment::Index(_) => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

/// A decoded field path.  The first segment names the context the path is rooted at, e.g.
/// `schema` or `nodes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn new<S: Into<String>>(root: S) -> Self {
        Self {
            segments: vec![Segment::Key(root.into())],
        }
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Returns a new path one key deeper.
    pub fn child<S: Into<String>>(&self, key: S) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.into()));
        Self { segments }
    }

    /// Returns a new path addressing one list element below this path.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        match self.segments.split_last() {
            Some((_, rest)) if !rest.is_empty() => Some(Self {
                segments: rest.to_vec(),
            }),
            _ => None,
        }
    }

    /// Proper, non-empty prefixes of this path, longest first.
    pub fn ancestors(&self) -> impl Iterator<Item = FieldPath> + '_ {
        (1..self.segments.len()).rev().map(move |len| FieldPath {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// Removes the first segment if it is one of the given root names.
    pub fn strip_root(&self, roots: &[&str]) -> Self {
        match self.segments.first() {
            Some(Segment::Key(key)) if roots.contains(&key.as_str()) => Self {
                segments: self.segments[1..].to_vec(),
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(&self.segments))
    }
}

impl FromStr for FieldPath {
    type Err = error::Error;

    fn from_str(input: &str) -> Result<Self> {
        decode(input).map(FieldPath::from_segments)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_name_char)
}

/// Produces the canonical field name for a sequence of segments.
pub fn encode(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Key(key) if is_plain_name(key) => {
                if i > 0 {
                    out.push(KEY_SEPARATOR);
                }
                out.push_str(key);
            }
            Segment::Key(key) => {
                out.push_str("[\"");
                for c in key.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push_str("\"]");
            }
            Segment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Recovers the segments of a field name produced by [`encode`].
pub fn decode(path: &str) -> Result<Vec<Segment>> {
    Parser {
        input: path,
        pos: 0,
    }
    .parse()
}

/// Encoded proper prefixes of a field name, longest first.
pub fn ancestor_prefixes(path: &str) -> Result<Vec<String>> {
    let path: FieldPath = path.parse()?;
    Ok(path.ancestors().map(|prefix| prefix.to_string()).collect())
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn fail<T>(&self, msg: &str) -> Result<T> {
        error::MalformedPathSnafu {
            path: self.input,
            position: self.pos,
            msg,
        }
        .fail()
    }

    fn parse(mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        if self.input.is_empty() {
            return Ok(segments);
        }

        if self.peek() == Some('[') {
            segments.push(self.bracketed()?);
        } else {
            segments.push(Segment::Key(self.name()?));
        }

        while let Some(c) = self.peek() {
            match c {
                KEY_SEPARATOR => {
                    self.bump();
                    segments.push(Segment::Key(self.name()?));
                }
                '[' => segments.push(self.bracketed()?),
                _ => return self.fail("expected '.' or '['"),
            }
        }
        Ok(segments)
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_name_char(c)) {
            self.bump();
        }
        if self.pos == start {
            return self.fail("expected a field name");
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn bracketed(&mut self) -> Result<Segment> {
        self.bump();
        let segment = match self.peek() {
            Some('"') => Segment::Key(self.quoted()?),
            Some(c) if c.is_ascii_digit() => Segment::Index(self.index()?),
            _ => return self.fail("expected a list index or a quoted name"),
        };
        if self.peek() != Some(']') {
            return self.fail("expected ']'");
        }
        self.bump();
        Ok(segment)
    }

    fn index(&mut self) -> Result<usize> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        self.input[start..self.pos]
            .parse()
            .ok()
            .context(error::MalformedPathSnafu {
                path: self.input,
                position: start,
                msg: "list index out of range",
            })
    }

    fn quoted(&mut self) -> Result<String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(c @ ('"' | '\\')) => out.push(c),
                    _ => return self.fail("invalid escape in quoted name"),
                },
                Some(c) => out.push(c),
                None => return self.fail("unterminated quoted name"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn segs(path: &str) -> Vec<Segment> {
        decode(path).unwrap()
    }

    #[test]
    fn plain_names_and_indices() {
        assert_eq!(
            segs("root.hosts[0].name"),
            vec!["root".into(), "hosts".into(), 0.into(), "name".into()]
        );
        assert_eq!(
            encode(&["root".into(), "hosts".into(), 0.into(), "name".into()]),
            "root.hosts[0].name"
        );
    }

    #[test]
    fn dashes_stay_bare() {
        let path = FieldPath::new("schema").child("addons").child("mev-boost");
        assert_eq!(path.to_string(), "schema.addons.mev-boost");
    }

    #[test]
    fn odd_names_are_quoted() {
        let path = FieldPath::new("schema")
            .child("mounts")
            .child("my \"data\" dir")
            .child("where");
        let encoded = path.to_string();
        assert_eq!(encoded, r#"schema.mounts["my \"data\" dir"].where"#);
        assert_eq!(encoded.parse::<FieldPath>().unwrap(), path);
    }

    #[test]
    fn key_that_looks_like_index_is_distinct() {
        let as_key = encode(&["peers".into(), "0".into()]);
        let as_index = encode(&["peers".into(), 0.into()]);
        assert_ne!(as_key, as_index);
        assert_eq!(segs(&as_key)[1], Segment::Key("0".to_string()));
        assert_eq!(segs(&as_index)[1], Segment::Index(0));
    }

    #[test]
    fn empty_key_round_trips() {
        let segments = vec!["mounts".into(), "".into(), "enable".into()];
        assert_eq!(encode(&segments), r#"mounts[""].enable"#);
        assert_eq!(segs(r#"mounts[""].enable"#), segments);
    }

    #[test]
    fn foreign_input_is_rejected() {
        for bad in [".a", "a..b", "a[", "a[x]", "a[0", "a.b c", r#"a["b"#, r#"a["\n"]"#, "a]"] {
            let err = decode(bad).unwrap_err();
            assert!(
                matches!(err, error::Error::MalformedPath { .. }),
                "{} gave {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn ancestors_longest_first() {
        assert_eq!(
            ancestor_prefixes("mounts.data.enable").unwrap(),
            vec!["mounts.data".to_string(), "mounts".to_string()]
        );
        assert_eq!(
            ancestor_prefixes("peers[1]").unwrap(),
            vec!["peers".to_string()]
        );
        assert!(ancestor_prefixes("peers").unwrap().is_empty());
    }

    #[test]
    fn strip_known_roots_only() {
        let path: FieldPath = "nodes.ssh.authorizedKeys[0]".parse().unwrap();
        assert_eq!(
            path.strip_root(&["schema", "nodes"]).to_string(),
            "ssh.authorizedKeys[0]"
        );
        let path: FieldPath = "ssh.authorizedKeys".parse().unwrap();
        assert_eq!(path.strip_root(&["schema", "nodes"]), path);
    }

    fn segment_strategy() -> impl Strategy<Value = Segment> {
        prop_oneof![
            "[A-Za-z_][A-Za-z0-9_-]{0,8}".prop_map(Segment::Key),
            ".{0,6}".prop_map(Segment::Key),
            (0usize..10_000).prop_map(Segment::Index),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(segments in prop::collection::vec(segment_strategy(), 0..8)) {
            prop_assert_eq!(decode(&encode(&segments)).unwrap(), segments);
        }

        #[test]
        fn distinct_segments_distinct_names(
            a in prop::collection::vec(segment_strategy(), 1..5),
            b in prop::collection::vec(segment_strategy(), 1..5),
        ) {
            if a != b {
                prop_assert_ne!(encode(&a), encode(&b));
            }
        }
    }
}
