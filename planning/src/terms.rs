//! Interned symbols and terms.
//!
//! All names that appear in a run (relation symbols, constants, variables,
//! types) are interned once; afterwards equality is an id comparison. The
//! tables live in an explicit [`TermTable`] that is passed through the call
//! graph rather than in process-wide singletons, which keeps tests
//! independent of each other.

use crate::errors::{EngineError, Result};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

/// Maximum depth of recursive substitution application before the chain is
/// declared cyclic.
pub const MAX_SUBS_DEPTH: u32 = 10;

/// Interned string id.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Sym(NonZeroU32);

impl From<Sym> for usize {
    fn from(s: Sym) -> Self {
        (s.0.get() - 1) as usize
    }
}

impl From<usize> for Sym {
    fn from(i: usize) -> Self {
        Sym(NonZeroU32::new((i + 1) as u32).unwrap())
    }
}

/// Append-only string interner. Names are normalized to lower case on entry,
/// making the case-insensitive comparisons of the surface syntax a plain id
/// equality.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<String>,
    ids: HashMap<String, Sym>,
}

impl SymbolTable {
    pub fn intern(&mut self, name: &str) -> Sym {
        let canonical = name.to_ascii_lowercase();
        if let Some(&sym) = self.ids.get(&canonical) {
            return sym;
        }
        let sym = Sym::from(self.symbols.len());
        self.symbols.push(canonical.clone());
        self.ids.insert(canonical, sym);
        sym
    }

    pub fn get(&self, name: &str) -> Option<Sym> {
        self.ids.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn symbol(&self, sym: Sym) -> &str {
        &self.symbols[usize::from(sym)]
    }
}

/// Compact id of an interned term.
///
/// The low bit records whether the term is a variable, so the distinction
/// that drives most of the algebra does not require a table lookup.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Term(NonZeroU32);

impl Term {
    fn new(index: usize, variable: bool) -> Term {
        let x = (((index + 1) as u32) << 1) | (variable as u32);
        Term(NonZeroU32::new(x).unwrap())
    }

    fn index(self) -> usize {
        ((self.0.get() >> 1) - 1) as usize
    }

    pub fn is_variable(self) -> bool {
        (self.0.get() & 1) != 0
    }

    pub fn is_constant(self) -> bool {
        !self.is_variable()
    }
}

#[derive(Clone, Debug)]
struct TermData {
    name: Sym,
    tpe: Option<Sym>,
}

/// Interning table for terms, with the fresh-variable counters used by
/// learning.
///
/// A name maps to at most one term: re-interning a name with a different type
/// tag fails with `TypingMismatch`, and an untyped lookup of a known name
/// returns the registered term whatever its type.
#[derive(Clone, Debug, Default)]
pub struct TermTable {
    syms: SymbolTable,
    entries: Vec<TermData>,
    ids: HashMap<Sym, Term>,
    next_auto: u32,
    next_old: u32,
    next_temp_old: u32,
    next_temp_new: u32,
}

impl TermTable {
    pub fn new() -> TermTable {
        Default::default()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.syms
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.syms
    }

    /// Interns a term. A leading `?` in the name makes it a variable.
    pub fn intern(&mut self, name: &str, tpe: Option<&str>) -> Result<Term> {
        let tpe = tpe.map(|t| self.syms.intern(t));
        self.intern_sym(name, tpe)
    }

    fn intern_sym(&mut self, name: &str, tpe: Option<Sym>) -> Result<Term> {
        let name_sym = self.syms.intern(name);
        if let Some(&term) = self.ids.get(&name_sym) {
            let existing = self.entries[term.index()].tpe;
            return match (existing, tpe) {
                (_, None) => Ok(term),
                (Some(a), Some(b)) if a == b => Ok(term),
                (first, Some(second)) => Err(EngineError::TypingMismatch {
                    name: self.syms.symbol(name_sym).to_string(),
                    first: first
                        .map(|t| self.syms.symbol(t).to_string())
                        .unwrap_or_else(|| "untyped".to_string()),
                    second: self.syms.symbol(second).to_string(),
                }),
            };
        }
        let canonical = self.syms.symbol(name_sym);
        let variable = canonical.starts_with('?');
        // keep fresh names unique even when the input already uses some
        if let Some(suffix) = canonical.strip_prefix("?auto_") {
            if let Ok(n) = suffix.parse::<u32>() {
                if self.next_auto <= n {
                    self.next_auto = n + 1;
                }
            }
        }
        let term = Term::new(self.entries.len(), variable);
        self.entries.push(TermData { name: name_sym, tpe });
        self.ids.insert(name_sym, term);
        Ok(term)
    }

    /// Fresh `?auto_N` variable, the family used for the variables of learned
    /// methods.
    pub fn fresh_auto(&mut self, tpe: Option<Sym>) -> Term {
        let name = format!("?auto_{}", self.next_auto);
        self.next_auto += 1;
        self.intern_sym(&name, tpe).expect("fresh names are unique")
    }

    /// Fresh `?old_N` variable, used when recording method instantiations on
    /// an annotated plan.
    pub fn fresh_old(&mut self, tpe: Option<Sym>) -> Term {
        let name = format!("?old_{}", self.next_old);
        self.next_old += 1;
        self.intern_sym(&name, tpe).expect("fresh names are unique")
    }

    /// Fresh `?temp_old_N` variable, scratch space for the subsumption test.
    pub fn fresh_temp_old(&mut self, tpe: Option<Sym>) -> Term {
        let name = format!("?temp_old_{}", self.next_temp_old);
        self.next_temp_old += 1;
        self.intern_sym(&name, tpe).expect("fresh names are unique")
    }

    /// Fresh `?temp_new_N` variable, scratch space for the subsumption test.
    pub fn fresh_temp_new(&mut self, tpe: Option<Sym>) -> Term {
        let name = format!("?temp_new_{}", self.next_temp_new);
        self.next_temp_new += 1;
        self.intern_sym(&name, tpe).expect("fresh names are unique")
    }

    pub fn name(&self, term: Term) -> &str {
        self.syms.symbol(self.entries[term.index()].name)
    }

    pub fn name_sym(&self, term: Term) -> Sym {
        self.entries[term.index()].name
    }

    pub fn typing(&self, term: Term) -> Option<Sym> {
        self.entries[term.index()].tpe
    }

    /// True if both terms are untyped or both carry the same type tag.
    pub fn same_typing(&self, a: Term, b: Term) -> bool {
        self.typing(a) == self.typing(b)
    }

    /// Displays the bare term name.
    pub fn display(&self, term: Term) -> impl Display + '_ {
        self.name(term)
    }

    /// Displays the term as `name - type` when it carries a type tag.
    pub fn display_typed(&self, term: Term) -> impl Display + '_ {
        DispTyped(term, self)
    }
}

struct DispTyped<'a>(Term, &'a TermTable);

impl<'a> Display for DispTyped<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.1.name(self.0))?;
        if let Some(tpe) = self.1.typing(self.0) {
            write!(f, " - {}", self.1.symbols().symbol(tpe))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_identity() {
        let mut table = TermTable::new();
        let a = table.intern("kiwi", None).unwrap();
        let b = table.intern("KIWI", None).unwrap();
        let c = table.intern("mango", None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_constant());
        assert_eq!(table.name(a), "kiwi");
    }

    #[test]
    fn variables_are_flagged() {
        let mut table = TermTable::new();
        let v = table.intern("?x", None).unwrap();
        let c = table.intern("x", None).unwrap();
        assert!(v.is_variable());
        assert!(c.is_constant());
        assert_ne!(v, c);
    }

    #[test]
    fn typing_must_be_consistent() {
        let mut table = TermTable::new();
        let a = table.intern("b1", Some("block")).unwrap();
        // untyped lookup of a known name returns the registered term
        let b = table.intern("b1", None).unwrap();
        assert_eq!(a, b);
        assert!(table.intern("b1", Some("truck")).is_err());
        let block = table.symbols_mut().intern("block");
        assert_eq!(table.typing(a), Some(block));
    }

    #[test]
    fn auto_counter_skips_parsed_names() {
        let mut table = TermTable::new();
        table.intern("?auto_41", None).unwrap();
        let fresh = table.fresh_auto(None);
        assert_eq!(table.name(fresh), "?auto_42");
        let fresh = table.fresh_auto(None);
        assert_eq!(table.name(fresh), "?auto_43");
    }

    #[test]
    fn fresh_families_are_disjoint() {
        let mut table = TermTable::new();
        let a = table.fresh_auto(None);
        let b = table.fresh_old(None);
        let c = table.fresh_temp_old(None);
        let d = table.fresh_temp_new(None);
        assert_eq!(table.name(a), "?auto_0");
        assert_eq!(table.name(b), "?old_0");
        assert_eq!(table.name(c), "?temp_old_0");
        assert_eq!(table.name(d), "?temp_new_0");
    }
}
