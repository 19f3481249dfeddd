//! The signal data model (§3): the sum type every parser emits and every
//! serializer consumes.

/// An expanded name: a namespace URI (empty string for the null namespace)
/// paired with a local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub namespace: String,
    pub local: String,
}

impl Name {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Name {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// A name in no namespace.
    pub fn unprefixed(local: impl Into<String>) -> Self {
        Name::new("", local)
    }
}

/// An attribute: an expanded [`Name`] and its already entity-decoded value.
///
/// Order of appearance on the originating start tag is preserved by the
/// `Vec<Attribute>` the [`Signal::StartElement`] variant carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: Name,
    pub value: String,
}

impl Attribute {
    pub fn new(name: Name, value: impl Into<String>) -> Self {
        Attribute {
            name,
            value: value.into(),
        }
    }
}

/// The document-type declaration signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Doctype {
    pub name: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub raw_text: Option<String>,
    pub force_quirks: bool,
}

/// The XML declaration signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDeclaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// A single parsing event, paired externally with a [`crate::Location`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    StartElement(Name, Vec<Attribute>),
    EndElement,
    /// Concatenation of the strings yields the logical text. The tokenizer
    /// never needs to split a run across more than one string on this
    /// platform (see DESIGN.md); this stays a `Vec` to keep the shape
    /// faithful to the data model.
    Text(Vec<String>),
    Doctype(Doctype),
    XmlDeclaration(XmlDeclaration),
    ProcessingInstruction(String, String),
    Comment(String),
}

impl Signal {
    /// Convenience constructor: a single-chunk text signal.
    pub fn text(s: impl Into<String>) -> Self {
        Signal::Text(vec![s.into()])
    }

    /// The concatenation of a `Text` signal's chunks, or `None` otherwise.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Signal::Text(chunks) => Some(chunks.concat()),
            _ => None,
        }
    }
}
