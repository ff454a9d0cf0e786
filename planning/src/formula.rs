//! The first-order fragment used by states, schemas and learning: predicate
//! atoms, commutative equalities, negations of those, and flat conjunctions.

use crate::errors::Result;
use crate::substitution::Substitution;
use crate::terms::{Sym, Term, TermTable};
use htn_utils::{disp_iter, Fmt};
use smallvec::SmallVec;
use std::fmt::Display;
use std::sync::Arc;

pub type Args = SmallVec<[Term; 4]>;

/// A predicate atom: relation symbol plus ordered arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pred {
    pub rel: Sym,
    pub args: Args,
}

impl Pred {
    pub fn new(rel: Sym, args: impl IntoIterator<Item = Term>) -> Pred {
        Pred {
            rel,
            args: args.into_iter().collect(),
        }
    }

    pub fn valence(&self) -> usize {
        self.args.len()
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|a| a.is_constant())
    }

    pub fn apply(&self, sub: &Substitution) -> Result<Pred> {
        let mut args = Args::new();
        for &a in &self.args {
            args.push(sub.apply_to_term(a)?);
        }
        Ok(Pred { rel: self.rel, args })
    }

    /// Variables of the atom, first occurrence order, deduplicated.
    pub fn variables(&self) -> Vec<Term> {
        let mut vars = Vec::new();
        for &a in &self.args {
            if a.is_variable() && !vars.contains(&a) {
                vars.push(a);
            }
        }
        vars
    }

    pub fn display<'a>(&'a self, table: &'a TermTable) -> impl Display + 'a {
        Fmt(move |f| {
            write!(f, "( {}", table.symbols().symbol(self.rel))?;
            for &a in &self.args {
                write!(f, " {}", table.name(a))?;
            }
            write!(f, " )")
        })
    }
}

/// A formula of the restricted fragment.
///
/// Conjunctions are flat: their children are predicates, equalities or
/// negations, never other conjunctions. Negations only wrap predicates or
/// equalities.
#[derive(Clone, Debug)]
pub enum Formula {
    Pred(Pred),
    Equ(Term, Term),
    Neg(Arc<Formula>),
    Conj(Vec<Arc<Formula>>),
}

impl Formula {
    pub fn pred(rel: Sym, args: impl IntoIterator<Item = Term>) -> Formula {
        Formula::Pred(Pred::new(rel, args))
    }

    pub fn neg(inner: Formula) -> Formula {
        Formula::Neg(Arc::new(inner))
    }

    pub fn conj(children: impl IntoIterator<Item = Formula>) -> Formula {
        Formula::Conj(children.into_iter().map(Arc::new).collect())
    }

    pub fn empty_conj() -> Formula {
        Formula::Conj(Vec::new())
    }

    pub fn as_pred(&self) -> Option<&Pred> {
        match self {
            Formula::Pred(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_conj(&self) -> Option<&[Arc<Formula>]> {
        match self {
            Formula::Conj(xs) => Some(xs),
            _ => None,
        }
    }

    /// The children of a conjunction, or the formula itself as a singleton.
    pub fn conjuncts(&self) -> Box<dyn Iterator<Item = &Formula> + '_> {
        match self {
            Formula::Conj(xs) => Box::new(xs.iter().map(|f| f.as_ref())),
            other => Box::new(std::iter::once(other)),
        }
    }

    /// A valid atom is anything a conjunction may contain.
    pub fn is_valid_atom(&self) -> bool {
        match self {
            Formula::Pred(_) | Formula::Equ(_, _) => true,
            Formula::Neg(inner) => matches!(**inner, Formula::Pred(_) | Formula::Equ(_, _)),
            Formula::Conj(_) => false,
        }
    }

    pub fn is_ground(&self) -> bool {
        match self {
            Formula::Pred(p) => p.is_ground(),
            Formula::Equ(a, b) => a.is_constant() && b.is_constant(),
            Formula::Neg(inner) => inner.is_ground(),
            Formula::Conj(xs) => xs.iter().all(|x| x.is_ground()),
        }
    }

    pub fn apply(&self, sub: &Substitution) -> Result<Formula> {
        Ok(match self {
            Formula::Pred(p) => Formula::Pred(p.apply(sub)?),
            Formula::Equ(a, b) => Formula::Equ(sub.apply_to_term(*a)?, sub.apply_to_term(*b)?),
            Formula::Neg(inner) => Formula::Neg(Arc::new(inner.apply(sub)?)),
            Formula::Conj(xs) => {
                let mut children = Vec::with_capacity(xs.len());
                for x in xs {
                    children.push(Arc::new(x.apply(sub)?));
                }
                Formula::Conj(children)
            }
        })
    }

    /// Logical implication within the fragment.
    ///
    /// An atom implies an equal atom or a conjunction of implied children; a
    /// conjunction implies an atom that one of its children implies, and a
    /// conjunction all of whose children it implies.
    pub fn implies(&self, other: &Formula) -> bool {
        match (self, other) {
            (Formula::Conj(_), Formula::Conj(ys)) => ys.iter().all(|y| self.implies(y)),
            (Formula::Conj(xs), atom) => xs.iter().any(|x| x.implies(atom)),
            (atom, Formula::Conj(ys)) => ys.iter().all(|y| atom.implies(y)),
            (a, b) => a == b,
        }
    }

    /// Variables, in first occurrence order, deduplicated. For `Equ(a, a)`
    /// the variable appears once.
    pub fn variables(&self) -> Vec<Term> {
        let mut vars = Vec::new();
        self.collect_terms(true, &mut vars);
        vars
    }

    /// Constants, in first occurrence order, deduplicated.
    pub fn constants(&self) -> Vec<Term> {
        let mut consts = Vec::new();
        self.collect_terms(false, &mut consts);
        consts
    }

    fn collect_terms(&self, variables: bool, out: &mut Vec<Term>) {
        let mut push = |t: Term, out: &mut Vec<Term>| {
            if t.is_variable() == variables && !out.contains(&t) {
                out.push(t);
            }
        };
        match self {
            Formula::Pred(p) => {
                for &a in &p.args {
                    push(a, out);
                }
            }
            Formula::Equ(a, b) => {
                push(*a, out);
                push(*b, out);
            }
            Formula::Neg(inner) => inner.collect_terms(variables, out),
            Formula::Conj(xs) => {
                for x in xs {
                    x.collect_terms(variables, out);
                }
            }
        }
    }

    pub fn display<'a>(&'a self, table: &'a TermTable) -> impl Display + 'a {
        Fmt(move |f| match self {
            Formula::Pred(p) => write!(f, "{}", p.display(table)),
            Formula::Equ(a, b) => write!(f, "( = {} {} )", table.name(*a), table.name(*b)),
            Formula::Neg(inner) => write!(f, "( not {} )", inner.display(table)),
            Formula::Conj(xs) => {
                if xs.is_empty() {
                    return write!(f, "( )");
                }
                write!(f, "( and ")?;
                let rendered: Vec<String> =
                    xs.iter().map(|x| x.display(table).to_string()).collect();
                disp_iter(f, &rendered, " ")?;
                write!(f, " )")
            }
        })
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Formula::Pred(a), Formula::Pred(b)) => a == b,
            (Formula::Equ(a1, a2), Formula::Equ(b1, b2)) => {
                (a1 == b1 && a2 == b2) || (a1 == b2 && a2 == b1)
            }
            (Formula::Neg(a), Formula::Neg(b)) => a == b,
            (Formula::Conj(xs), Formula::Conj(ys)) => {
                // permutation equality over equivalent children
                if xs.len() != ys.len() {
                    return false;
                }
                let mut used = vec![false; ys.len()];
                'outer: for x in xs {
                    for (i, y) in ys.iter().enumerate() {
                        if !used[i] && x == y {
                            used[i] = true;
                            continue 'outer;
                        }
                    }
                    return false;
                }
                true
            }
            _ => false,
        }
    }
}
impl Eq for Formula {}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TermTable, Sym, Sym, Vec<Term>) {
        let mut table = TermTable::new();
        let on = table.symbols_mut().intern("on");
        let clear = table.symbols_mut().intern("clear");
        let terms = ["a", "b", "?x", "?y"]
            .iter()
            .map(|n| table.intern(n, None).unwrap())
            .collect();
        (table, on, clear, terms)
    }

    #[test]
    fn equality_is_commutative() {
        let (_, _, _, ts) = setup();
        let e1 = Formula::Equ(ts[0], ts[1]);
        let e2 = Formula::Equ(ts[1], ts[0]);
        assert_eq!(e1, e2);
    }

    #[test]
    fn conjunction_equality_is_permutation() {
        let (_, on, clear, ts) = setup();
        let c1 = Formula::conj(vec![
            Formula::pred(on, [ts[0], ts[1]]),
            Formula::pred(clear, [ts[0]]),
        ]);
        let c2 = Formula::conj(vec![
            Formula::pred(clear, [ts[0]]),
            Formula::pred(on, [ts[0], ts[1]]),
        ]);
        assert_eq!(c1, c2);
        let c3 = Formula::conj(vec![Formula::pred(clear, [ts[0]])]);
        assert_ne!(c1, c3);
    }

    #[test]
    fn groundness() {
        let (_, on, _, ts) = setup();
        assert!(Formula::pred(on, [ts[0], ts[1]]).is_ground());
        assert!(!Formula::pred(on, [ts[0], ts[2]]).is_ground());
        assert!(!Formula::neg(Formula::Equ(ts[2], ts[3])).is_ground());
    }

    #[test]
    fn implication() {
        let (_, on, clear, ts) = setup();
        let p = Formula::pred(on, [ts[0], ts[1]]);
        let q = Formula::pred(clear, [ts[0]]);
        let conj = Formula::conj(vec![p.clone(), q.clone()]);

        // an atom implies itself and a conjunction of copies of itself
        assert!(p.implies(&p));
        assert!(!p.implies(&q));
        assert!(p.implies(&Formula::conj(vec![p.clone(), p.clone()])));

        // a conjunction implies each child and any sub-conjunction
        assert!(conj.implies(&p));
        assert!(conj.implies(&q));
        assert!(conj.implies(&Formula::conj(vec![q.clone(), p.clone()])));
        assert!(!q.implies(&conj));

        // negations imply only identical negations
        let n = Formula::neg(p.clone());
        assert!(n.implies(&n));
        assert!(!n.implies(&p));
        assert!(!p.implies(&n));
    }

    #[test]
    fn variables_of_reflexive_equality() {
        let (_, _, _, ts) = setup();
        let e = Formula::Equ(ts[2], ts[2]);
        assert_eq!(e.variables(), vec![ts[2]]);
        let e = Formula::Equ(ts[2], ts[3]);
        assert_eq!(e.variables(), vec![ts[2], ts[3]]);
    }

    #[test]
    fn substitution_grounds_exactly_the_covered_variables() {
        let (_table, on, _, ts) = setup();
        let f = Formula::pred(on, [ts[2], ts[3]]);
        let mut sub = Substitution::new();
        sub.add_pair(ts[2], ts[0]).unwrap();
        let partial = f.apply(&sub).unwrap();
        assert!(!partial.is_ground());
        sub.add_pair(ts[3], ts[1]).unwrap();
        let ground = f.apply(&sub).unwrap();
        assert!(ground.is_ground());
    }

    #[test]
    fn valid_atoms() {
        let (_, on, _, ts) = setup();
        let p = Formula::pred(on, [ts[0], ts[1]]);
        assert!(p.is_valid_atom());
        assert!(Formula::neg(p.clone()).is_valid_atom());
        assert!(Formula::Equ(ts[0], ts[1]).is_valid_atom());
        assert!(!Formula::conj(vec![p.clone()]).is_valid_atom());
        assert!(!Formula::neg(Formula::conj(vec![p])).is_valid_atom());
    }
}
