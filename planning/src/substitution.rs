//! Variable-to-term bindings.

use crate::errors::{EngineError, Result};
use crate::terms::{Term, TermTable, MAX_SUBS_DEPTH};
use htn_utils::Fmt;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Display;

/// A finite map from variables to terms.
///
/// Invariants: each variable occurs at most once as a key, identity pairs
/// `v -> v` are silently dropped, and application is bounded by
/// [`MAX_SUBS_DEPTH`] so that accidental cycles are reported instead of
/// looping.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Substitution {
    pairs: BTreeMap<Term, Term>,
}

impl Substitution {
    pub fn new() -> Substitution {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Binds `var` to `term`. Re-adding an identical pair is a no-op; adding a
    /// conflicting one is an error.
    pub fn add_pair(&mut self, var: Term, term: Term) -> Result<()> {
        debug_assert!(var.is_variable());
        if var == term {
            return Ok(());
        }
        match self.pairs.entry(var) {
            Entry::Occupied(e) if *e.get() == term => Ok(()),
            Entry::Occupied(e) => Err(EngineError::SubstitutionDoubleBinding {
                var: format!("{var:?}"),
                existing: format!("{:?}", e.get()),
                new: format!("{term:?}"),
            }),
            Entry::Vacant(e) => {
                e.insert(term);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, var: Term) -> Option<Term> {
        self.pairs.get(&var).copied()
    }

    /// First pair (in key order) whose value is `term`.
    pub fn find_by_value(&self, term: Term) -> Option<(Term, Term)> {
        self.pairs.iter().find(|(_, &v)| v == term).map(|(&k, &v)| (k, v))
    }

    pub fn remove(&mut self, var: Term) -> Option<Term> {
        self.pairs.remove(&var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Term, Term)> + '_ {
        self.pairs.iter().map(|(&k, &v)| (k, v))
    }

    /// Applies this substitution to a term, chasing variable-to-variable
    /// chains up to the depth cap.
    pub fn apply_to_term(&self, term: Term) -> Result<Term> {
        self.apply_at_depth(term, 0)
    }

    pub(crate) fn apply_at_depth(&self, term: Term, depth: u32) -> Result<Term> {
        if depth > MAX_SUBS_DEPTH {
            return Err(EngineError::SubstitutionRecurses(MAX_SUBS_DEPTH));
        }
        if term.is_constant() {
            return Ok(term);
        }
        match self.lookup(term) {
            Some(bound) => self.apply_at_depth(bound, depth + 1),
            None => Ok(term),
        }
    }

    /// Rewrites every occurrence of `old` to `new`, in the value part of all
    /// pairs and, when `old` is itself a key, in the key part too.
    ///
    /// This is the primitive behind variable merging: once two variables are
    /// discovered to denote the same ground term, one is renamed to the other
    /// everywhere. A merge that would leave one key with two different values
    /// is a `SubstitutionDoubleBinding` error; replacing a variable by a
    /// constant is not allowed.
    pub fn replace_term(&mut self, old: Term, new: Term) -> Result<()> {
        if old == new {
            return Ok(());
        }
        // value part
        let keys: Vec<Term> = self
            .pairs
            .iter()
            .filter(|(_, &v)| v == old)
            .map(|(&k, _)| k)
            .collect();
        for k in keys {
            if k == new {
                self.pairs.remove(&k);
            } else {
                self.pairs.insert(k, new);
            }
        }

        if old.is_variable() {
            if new.is_constant() {
                return Err(EngineError::NotImplemented(
                    "a variable may only be replaced by another variable".to_string(),
                ));
            }
            // key part
            if let Some(old_value) = self.pairs.get(&old).copied() {
                match self.pairs.get(&new).copied() {
                    Some(new_value) if new_value == old_value => {
                        self.pairs.remove(&old);
                    }
                    Some(new_value) => {
                        return Err(EngineError::SubstitutionDoubleBinding {
                            var: format!("{new:?}"),
                            existing: format!("{new_value:?}"),
                            new: format!("{old_value:?}"),
                        });
                    }
                    None => {
                        self.pairs.remove(&old);
                        if new != old_value {
                            self.pairs.insert(new, old_value);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn display<'a>(&'a self, table: &'a TermTable) -> impl Display + 'a {
        Fmt(move |f| {
            writeln!(f, "(")?;
            for (var, term) in self.iter() {
                writeln!(f, " {} -> {}", table.name(var), table.name(term))?;
            }
            write!(f, ")")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(table: &mut TermTable, names: &[&str]) -> Vec<Term> {
        names.iter().map(|n| table.intern(n, None).unwrap()).collect()
    }

    #[test]
    fn identity_pairs_are_dropped() {
        let mut table = TermTable::new();
        let v = table.intern("?x", None).unwrap();
        let mut sub = Substitution::new();
        sub.add_pair(v, v).unwrap();
        assert!(sub.is_empty());
    }

    #[test]
    fn conflicting_binding_is_rejected() {
        let mut table = TermTable::new();
        let ts = vars(&mut table, &["?x", "a", "b"]);
        let mut sub = Substitution::new();
        sub.add_pair(ts[0], ts[1]).unwrap();
        sub.add_pair(ts[0], ts[1]).unwrap(); // same pair is fine
        assert!(matches!(
            sub.add_pair(ts[0], ts[2]),
            Err(EngineError::SubstitutionDoubleBinding { .. })
        ));
    }

    #[test]
    fn application_chases_chains() {
        let mut table = TermTable::new();
        let ts = vars(&mut table, &["?x", "?y", "c"]);
        let mut sub = Substitution::new();
        sub.add_pair(ts[0], ts[1]).unwrap();
        sub.add_pair(ts[1], ts[2]).unwrap();
        assert_eq!(sub.apply_to_term(ts[0]).unwrap(), ts[2]);
        assert_eq!(sub.apply_to_term(ts[2]).unwrap(), ts[2]);
    }

    #[test]
    fn cyclic_application_is_reported() {
        let mut table = TermTable::new();
        let ts = vars(&mut table, &["?x", "?y"]);
        let mut sub = Substitution::new();
        sub.add_pair(ts[0], ts[1]).unwrap();
        sub.add_pair(ts[1], ts[0]).unwrap();
        assert!(matches!(
            sub.apply_to_term(ts[0]),
            Err(EngineError::SubstitutionRecurses(_))
        ));
    }

    #[test]
    fn replace_rewrites_values_and_keys() {
        let mut table = TermTable::new();
        let ts = vars(&mut table, &["?x", "?y", "?z", "c"]);
        let mut sub = Substitution::new();
        sub.add_pair(ts[0], ts[3]).unwrap(); // ?x -> c
        sub.add_pair(ts[2], ts[0]).unwrap(); // ?z -> ?x
        sub.replace_term(ts[0], ts[1]).unwrap(); // rename ?x to ?y
        assert_eq!(sub.lookup(ts[1]), Some(ts[3]));
        assert_eq!(sub.lookup(ts[2]), Some(ts[1]));
        assert_eq!(sub.lookup(ts[0]), None);
    }

    #[test]
    fn replace_detects_double_binding() {
        let mut table = TermTable::new();
        let ts = vars(&mut table, &["?x", "?y", "c", "d"]);
        let mut sub = Substitution::new();
        sub.add_pair(ts[0], ts[2]).unwrap(); // ?x -> c
        sub.add_pair(ts[1], ts[3]).unwrap(); // ?y -> d
        assert!(sub.replace_term(ts[0], ts[1]).is_err());
    }
}
