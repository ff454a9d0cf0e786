//! Reader for the parenthesised surface syntax shared by all input formats.
//! Symbols are lower-cased on the way in and every expression remembers its
//! source span, so errors can point back at the offending text.

use anyhow::{bail, Result};
use htn_utils::disp_iter;
use htn_utils::input::*;
use std::convert::TryInto;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

pub type SAtom = Sym;

#[derive(Clone)]
pub struct SList {
    list: Vec<SExpr>,
    source: Arc<Input>,
    span: Span,
}

impl SList {
    pub fn iter(&self) -> ListIter {
        ListIter {
            elems: self.list.as_slice(),
            source: self.source.clone(),
            span: self.span,
        }
    }

    pub fn loc(&self) -> Loc {
        Loc::new(&self.source, self.span)
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        self.loc().invalid(error)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl std::ops::Index<usize> for SList {
    type Output = SExpr;

    fn index(&self, index: usize) -> &Self::Output {
        &self.list[index]
    }
}

#[derive(Clone)]
pub enum SExpr {
    Atom(SAtom),
    List(SList),
}

impl SExpr {
    pub fn loc(&self) -> Option<Loc> {
        match self {
            SExpr::Atom(atom) => atom.loc(),
            SExpr::List(list) => Some(list.loc()),
        }
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        match self.loc() {
            Some(loc) => loc.invalid(error),
            None => ErrLoc::from(error.into()),
        }
    }

    pub fn is_atom(&self, expected: &str) -> bool {
        self.as_atom().map(|a| a.as_str() == expected).unwrap_or(false)
    }

    pub fn as_atom(&self) -> Option<&SAtom> {
        match self {
            SExpr::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&SList> {
        match self {
            SExpr::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_iter(&self) -> Option<ListIter> {
        self.as_list().map(|l| l.iter())
    }
}

pub struct ListIter<'a> {
    elems: &'a [SExpr],
    source: Arc<Input>,
    span: Span,
}

impl<'a> ListIter<'a> {
    pub fn peek(&self) -> Option<&'a SExpr> {
        self.elems.first()
    }

    pub fn loc(&self) -> Loc {
        Loc::new(&self.source, self.span)
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        self.loc().invalid(error)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn pop(&mut self) -> std::result::Result<&'a SExpr, ErrLoc> {
        self.next()
            .ok_or_else(|| self.loc().end().invalid("Unexpected end of list"))
    }

    pub fn pop_atom(&mut self) -> std::result::Result<&'a SAtom, ErrLoc> {
        match self.next() {
            None => Err(self.loc().end().invalid("Expected an atom but got end of list.")),
            Some(sexpr) => sexpr.as_atom().ok_or_else(|| sexpr.invalid("Expected an atom")),
        }
    }

    pub fn pop_list(&mut self) -> std::result::Result<&'a SList, ErrLoc> {
        match self.next() {
            None => Err(self.loc().end().invalid("Expected a list but got end of list.")),
            Some(sexpr) => sexpr.as_list().ok_or_else(|| sexpr.invalid("Expected a list")),
        }
    }

    pub fn pop_known_atom(&mut self, expected: &str) -> std::result::Result<(), ErrLoc> {
        match self.next() {
            None => Err(self
                .loc()
                .end()
                .invalid(format!("Expected atom `{expected}` but got end of list"))),
            Some(sexpr) => {
                let atom = sexpr
                    .as_atom()
                    .ok_or_else(|| sexpr.invalid(format!("Expected atom `{expected}`")))?;
                if atom.as_str() == expected {
                    Ok(())
                } else {
                    Err(atom.invalid(format!("Expected the atom `{expected}`")))
                }
            }
        }
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a SExpr;

    fn next(&mut self) -> Option<Self::Item> {
        match self.elems.split_first() {
            None => None,
            Some((head, tail)) => {
                self.elems = tail;
                Some(head)
            }
        }
    }
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SExpr::Atom(a) => write!(f, "{a}"),
            SExpr::List(l) => {
                write!(f, "(")?;
                disp_iter(f, &l.list, " ")?;
                write!(f, ")")
            }
        }
    }
}

impl Debug for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Sym { start: usize, end: usize, start_pos: Pos },
    LParen(Pos),
    RParen(Pos),
}

/// Parses the input into a single s-expression.
pub fn parse<S: TryInto<Input>>(s: S) -> Result<SExpr>
where
    <S as TryInto<Input>>::Error: std::error::Error + Send + Sync + 'static,
{
    let s = s.try_into()?;
    let s = Arc::new(s);
    let tokenized = tokenize(s.clone());
    let mut tokens = tokenized.iter().peekable();
    let expr = read(&mut tokens, &s)?;
    if tokens.next().is_some() {
        bail!("Trailing tokens after the first expression");
    }
    Ok(expr)
}

/// Splits the input into a sequence of tokens. `;` starts a comment running
/// to the end of the line.
fn tokenize(source: Arc<Input>) -> Vec<Token> {
    let s = source.text.as_str();
    let mut tokens = Vec::new();

    // current byte index into `s`
    let mut index = 0;
    // start index of the current atom
    let mut cur_start: Option<usize> = None;

    // current line number (starts at 0) and the index at which it starts
    let mut line: usize = 0;
    let mut line_start = 0;

    let mut is_in_comment = false;

    let make_sym = |start: usize, end: usize, line: usize, line_start: usize| {
        let start_pos = Pos {
            line: line as u32,
            column: (start - line_start) as u32,
        };
        Token::Sym { start, end, start_pos }
    };

    for n in s.chars() {
        if n.is_whitespace() || n == '(' || n == ')' || n == ';' || is_in_comment {
            // if we were parsing a symbol, we have reached its end
            if let Some(start) = cur_start {
                tokens.push(make_sym(start, index - 1, line, line_start));
                cur_start = None;
            }

            if n == '\n' {
                line += 1;
                line_start = index + 1;
                is_in_comment = false;
            } else if n == ';' {
                is_in_comment = true;
            } else if !is_in_comment {
                let pos = Pos {
                    line: line as u32,
                    column: (index - line_start) as u32,
                };
                if n == '(' {
                    tokens.push(Token::LParen(pos));
                } else if n == ')' {
                    tokens.push(Token::RParen(pos));
                }
            }
        } else if cur_start.is_none() {
            cur_start = Some(index);
        }
        index += n.len_utf8();
    }
    if let Some(start) = cur_start {
        tokens.push(make_sym(start, index - 1, line, line_start));
    }
    tokens
}

fn read(tokens: &mut std::iter::Peekable<core::slice::Iter<Token>>, src: &Arc<Input>) -> Result<SExpr> {
    match tokens.next() {
        Some(Token::Sym { start, end, start_pos }) => {
            let s = &src.text.as_str()[*start..=*end];
            let s = s.to_ascii_lowercase();
            let span = Span {
                start: *start_pos,
                end: Pos {
                    line: start_pos.line,
                    column: start_pos.column + (s.len() as u32) - 1,
                },
            };
            let loc = Loc::new(src, span);
            Ok(SExpr::Atom(Sym::with_source(s, loc)))
        }
        Some(Token::LParen(start)) => {
            let mut es = Vec::new();
            loop {
                match tokens.peek() {
                    Some(Token::RParen(end)) => {
                        let _ = tokens.next(); // consume
                        let list = SList {
                            list: es,
                            source: src.clone(),
                            span: Span::new(*start, *end),
                        };
                        break Ok(SExpr::List(list));
                    }
                    Some(_) => {
                        let e = read(tokens, src)?;
                        es.push(e);
                    }
                    None => bail!("Unclosed parenthesis"),
                }
            }
        }
        Some(Token::RParen(_)) => bail!("Unexpected closing parenthesis"),
        None => bail!("Unexpected end of input"),
    }
}
