//! Syntax tree definitions.
//!
//! The tree mirrors the surface grammar: a chunk is a sequence of
//! pipelines, a pipeline is forms joined by `|`, a form is a head word
//! plus arguments and `&name=value` options, and words decompose into
//! compounds, indexings and primaries. Every node records the `[begin,
//! end)` byte range it was parsed from; the compiler copies those ranges
//! onto the operations it emits so diagnostics can point back into the
//! source.

/// A parsed top-level program: a sequence of pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub begin: usize,
    pub end: usize,
    pub pipelines: Vec<Pipeline>,
}

/// One or more forms connected by `|`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub begin: usize,
    pub end: usize,
    pub forms: Vec<Form>,
}

/// A single command form.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub begin: usize,
    pub end: usize,
    pub body: FormBody,
}

/// The two shapes a form can take.
#[derive(Debug, Clone, PartialEq)]
pub enum FormBody {
    /// `head arg... &opt=value...`
    Plain {
        head: Compound,
        args: Vec<Compound>,
        opts: Vec<OptPair>,
    },
    /// `lvalue... = rhs...` — the `=` must stand alone as its own word.
    Assignment {
        lvalues: Vec<Compound>,
        rhs: Vec<Compound>,
    },
}

/// A `&name=value` option on a form.
#[derive(Debug, Clone, PartialEq)]
pub struct OptPair {
    pub begin: usize,
    pub end: usize,
    pub name: String,
    pub value: Compound,
}

/// One word: one or more adjacent indexings, concatenated.
#[derive(Debug, Clone, PartialEq)]
pub struct Compound {
    pub begin: usize,
    pub end: usize,
    pub indexings: Vec<Indexing>,
}

/// A primary with zero or more `[index]` chains.
#[derive(Debug, Clone, PartialEq)]
pub struct Indexing {
    pub begin: usize,
    pub end: usize,
    pub head: Primary,
    pub indices: Vec<Compound>,
}

/// The smallest expression unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Primary {
    pub begin: usize,
    pub end: usize,
    pub kind: PrimaryKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKind {
    /// An unquoted word.
    Bareword(String),
    /// `'…'` with the quotes removed.
    SingleQuoted(String),
    /// `"…"` with escapes processed.
    DoubleQuoted(String),
    /// `$name` — the raw name, still carrying any `@` and namespace tag.
    Variable(String),
    /// `(pipeline)` — output capture.
    Capture(Box<Pipeline>),
    /// `[a b c]`
    List(Vec<Compound>),
    /// `[&k=v …]`
    Map(Vec<(Compound, Compound)>),
    /// `{ chunk }` or `[params]{ chunk }`.
    Lambda {
        has_params: bool,
        params: Vec<Compound>,
        body: Box<Chunk>,
    },
}

impl Compound {
    /// If this compound is one plain literal word (bareword or quoted
    /// string without indices), return its text.
    pub fn as_literal(&self) -> Option<&str> {
        if self.indexings.len() != 1 || !self.indexings[0].indices.is_empty() {
            return None;
        }
        match &self.indexings[0].head.kind {
            PrimaryKind::Bareword(s)
            | PrimaryKind::SingleQuoted(s)
            | PrimaryKind::DoubleQuoted(s) => Some(s),
            _ => None,
        }
    }

    /// If this compound is exactly one bareword, return its text.
    pub fn as_bareword(&self) -> Option<&str> {
        if self.indexings.len() != 1 || !self.indexings[0].indices.is_empty() {
            return None;
        }
        match &self.indexings[0].head.kind {
            PrimaryKind::Bareword(s) => Some(s),
            _ => None,
        }
    }

    /// True if this compound is a single lambda primary.
    pub fn is_lambda(&self) -> bool {
        self.indexings.len() == 1
            && self.indexings[0].indices.is_empty()
            && matches!(self.indexings[0].head.kind, PrimaryKind::Lambda { .. })
    }
}
