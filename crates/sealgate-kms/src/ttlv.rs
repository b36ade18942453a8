//! KMIP JSON (TTLV) tree
//!
//! Every node is `{"tag": ..., "type": ..., "value": ...}` where `value` is
//! either a list of child nodes (`Structure`) or a scalar. Extraction goes
//! through slash-separated tag paths instead of ad-hoc type assertions:
//!
//! ```text
//! response.find("Object/KeyBlock/KeyValue/KeyMaterial")
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};

pub const STRUCTURE: &str = "Structure";
pub const TEXT_STRING: &str = "TextString";
pub const BYTE_STRING: &str = "ByteString";
pub const ENUMERATION: &str = "Enumeration";
pub const INTEGER: &str = "Integer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ttlv {
    pub tag: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub value: TtlvValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TtlvValue {
    Structure(Vec<Ttlv>),
    Integer(i64),
    Bool(bool),
    Text(String),
}

impl Ttlv {
    pub fn structure(tag: &str, children: Vec<Ttlv>) -> Self {
        Self {
            tag: tag.into(),
            kind: STRUCTURE.into(),
            value: TtlvValue::Structure(children),
        }
    }

    pub fn text(tag: &str, value: impl Into<String>) -> Self {
        Self::scalar(tag, TEXT_STRING, TtlvValue::Text(value.into()))
    }

    /// `value` is hex, as KMIP JSON encodes byte strings.
    pub fn bytes_hex(tag: &str, value: impl Into<String>) -> Self {
        Self::scalar(tag, BYTE_STRING, TtlvValue::Text(value.into()))
    }

    pub fn enumeration(tag: &str, value: &str) -> Self {
        Self::scalar(tag, ENUMERATION, TtlvValue::Text(value.into()))
    }

    pub fn integer(tag: &str, value: i64) -> Self {
        Self::scalar(tag, INTEGER, TtlvValue::Integer(value))
    }

    fn scalar(tag: &str, kind: &str, value: TtlvValue) -> Self {
        Self {
            tag: tag.into(),
            kind: kind.into(),
            value,
        }
    }

    /// Direct children; empty for scalars.
    pub fn children(&self) -> &[Ttlv] {
        match &self.value {
            TtlvValue::Structure(children) => children,
            _ => &[],
        }
    }

    /// Walk a slash-separated tag path starting at this node's children.
    /// The first child matching each segment is taken.
    pub fn find(&self, path: &str) -> Option<&Ttlv> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| {
                node.children().iter().find(|child| child.tag == segment)
            })
    }

    /// All direct children carrying `tag`.
    pub fn find_all<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Ttlv> + 'a {
        self.children().iter().filter(move |child| child.tag == tag)
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            TtlvValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            TtlvValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Text at `path`, or a `ResponseParse` error naming the path.
    pub fn require_text(&self, path: &str) -> KmsResult<&str> {
        self.find(path).and_then(Ttlv::as_text).ok_or_else(|| {
            KmsError::ResponseParse(format!("{} response has no text at {path}", self.tag))
        })
    }
}
