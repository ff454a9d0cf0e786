use crate::Fmt;
use itertools::Itertools;
use std::convert::TryFrom;
use std::fmt::Display;
use std::sync::Arc;

/// A textual input to a parser, either read from a file or built from a string.
pub struct Input {
    pub text: String,
    pub source: Option<String>,
}

impl Input {
    pub fn from_string(input: impl Into<String>) -> Input {
        Input {
            text: input.into(),
            source: None,
        }
    }

    pub fn from_file(file: &std::path::Path) -> std::result::Result<Input, std::io::Error> {
        let s = std::fs::read_to_string(file)?;
        Ok(Input {
            text: s,
            source: Some(file.display().to_string()),
        })
    }

    pub fn underlined_position(&self, pos: Pos) -> impl Display + '_ {
        self.underlined(Span { start: pos, end: pos })
    }

    /// Renders the line containing `span`, with the span underlined with carets.
    pub fn underlined(&self, span: Span) -> impl Display + '_ {
        let formatter = move |f: &mut std::fmt::Formatter| {
            let l = self
                .text
                .lines()
                .dropping(span.start.line as usize)
                .next()
                .expect("Invalid span for this source");
            writeln!(f, "{l}")?;

            let num_spaces = span.start.column as usize;
            let length = if span.start.line != span.end.line {
                l.len().saturating_sub(num_spaces)
            } else {
                (span.end.column - span.start.column + 1) as usize
            };
            // attempt to keep the same spacing as the input by preserving tabulations
            for c in l[0..num_spaces.min(l.len())].chars() {
                let output = if c == '\t' { '\t' } else { ' ' };
                write!(f, "{output}")?;
            }
            write!(f, "{}", "^".repeat(length))?;

            Ok(())
        };
        Fmt(formatter)
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input {
            text: s.to_string(),
            source: None,
        }
    }
}

impl TryFrom<&std::path::Path> for Input {
    type Error = std::io::Error;

    fn try_from(path: &std::path::Path) -> Result<Self, Self::Error> {
        Input::from_file(path)
    }
}

/// Position of a single character in an input.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

/// Part of an input, denoted by the start and end position, both inclusive.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn new(start: Pos, end: Pos) -> Span {
        Span { start, end }
    }
    pub fn point(position: Pos) -> Span {
        Span {
            start: position,
            end: position,
        }
    }
}

/// A slice of an input, used to produce localized error messages through the
/// `invalid` method.
#[derive(Clone)]
pub struct Loc {
    source: Arc<Input>,
    span: Span,
}

impl Loc {
    pub fn new(source: &Arc<Input>, span: Span) -> Loc {
        Loc {
            source: source.clone(),
            span,
        }
    }

    /// A location that points at the character immediately after this one.
    pub fn end(self) -> Loc {
        let end = Pos {
            line: self.span.end.line,
            column: self.span.end.column + 1,
        };
        Loc {
            source: self.source,
            span: Span::point(end),
        }
    }

    pub fn invalid(self, error: impl Into<String>) -> ErrLoc {
        ErrLoc {
            context: Vec::new(),
            inline_err: Some(error.into()),
            loc: Some(self),
        }
    }

    pub fn underlined(&self) -> impl Display + '_ {
        self.source.underlined(self.span)
    }
}

/// An error together with the place in the input it originated from and a
/// chain of contexts accumulated while bubbling up.
pub struct ErrLoc {
    context: Vec<String>,
    inline_err: Option<String>,
    loc: Option<Loc>,
}

impl ErrLoc {
    pub fn with_error(mut self, inline_message: impl Into<String>) -> ErrLoc {
        self.inline_err = Some(inline_message.into());
        self
    }

    pub fn failed<T>(self) -> std::result::Result<T, ErrLoc> {
        Err(self)
    }
}

impl From<String> for ErrLoc {
    fn from(e: String) -> Self {
        ErrLoc {
            context: Vec::new(),
            inline_err: Some(e),
            loc: None,
        }
    }
}

impl std::error::Error for ErrLoc {}

impl std::fmt::Display for ErrLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, context) in self.context.iter().rev().enumerate() {
            let prefix = if i > 0 { "Caused by" } else { "Error" };
            writeln!(f, "{prefix}: {context}")?;
        }
        if let Some(loc) = &self.loc {
            if let Some(path) = &loc.source.source {
                writeln!(f, "{}:{}:{}", path, loc.span.start.line + 1, loc.span.start.column)?;
            }
            write!(f, "{}", loc.underlined())?;
        }
        if let Some(err) = &self.inline_err {
            write!(f, " {err}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ErrLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub trait Ctx<T> {
    fn ctx(self, error_context: impl Display) -> std::result::Result<T, ErrLoc>;
}

impl<T> Ctx<T> for std::result::Result<T, ErrLoc> {
    fn ctx(self, error_context: impl Display) -> Result<T, ErrLoc> {
        self.map_err(|mut e| {
            e.context.push(error_context.to_string());
            e
        })
    }
}

/// A symbol read from an input, remembering where it came from so that error
/// messages can point back at the source.
#[derive(Clone)]
pub struct Sym {
    symbol: String,
    source: Option<Loc>,
}

impl Sym {
    pub fn new(s: impl Into<String>) -> Sym {
        Sym {
            symbol: s.into(),
            source: None,
        }
    }

    pub fn with_source(s: impl Into<String>, source: Loc) -> Sym {
        Sym {
            symbol: s.into(),
            source: Some(source),
        }
    }

    pub fn as_str(&self) -> &str {
        self.symbol.as_str()
    }

    pub fn loc(&self) -> Option<Loc> {
        self.source.clone()
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        match &self.source {
            Some(loc) => loc.clone().invalid(error),
            None => ErrLoc::from(error.into()),
        }
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}
impl Eq for Sym {}

impl std::hash::Hash for Sym {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state)
    }
}

impl AsRef<str> for Sym {
    fn as_ref(&self) -> &str {
        &self.symbol
    }
}

impl std::borrow::Borrow<str> for Sym {
    fn borrow(&self) -> &str {
        &self.symbol
    }
}

impl From<&str> for Sym {
    fn from(s: &str) -> Self {
        Sym::new(s)
    }
}

impl Display for Sym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl std::fmt::Debug for Sym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}
