//! Internal HTML token representation produced by the tokenizer and
//! consumed by the tree constructor.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HtmlAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HtmlToken {
    StartTag {
        name: String,
        attrs: Vec<HtmlAttribute>,
        self_closing: bool,
    },
    EndTag {
        name: String,
    },
    Character(char),
    Comment(String),
    /// `<![CDATA[ ... ]]>`, emitted verbatim as character data.
    CData(String),
    Doctype {
        name: Option<String>,
        public_id: Option<String>,
        system_id: Option<String>,
        force_quirks: bool,
    },
    Eof,
}
