//! Ground states and the instantiation search.

use crate::domain::Operator;
use crate::errors::{EngineError, Result};
use crate::formula::{Args, Formula, Pred};
use crate::substitution::Substitution;
use crate::terms::{Sym, Term, TermTable};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A set of ground predicate atoms, indexed by relation symbol.
///
/// The state also carries its position in a trace; the index is advisory and
/// ignored by equality.
#[derive(Clone, Debug, Default)]
pub struct State {
    atoms: BTreeMap<Sym, Vec<Args>>,
    index: usize,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.atoms == other.atoms
    }
}
impl Eq for State {}

impl State {
    pub fn new(index: usize) -> State {
        State {
            atoms: BTreeMap::new(),
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.values().map(|v| v.len()).sum()
    }

    /// Adds a ground predicate atom. Anything else is rejected.
    pub fn add(&mut self, atom: &Pred) -> Result<()> {
        if !atom.is_ground() {
            return Err(EngineError::StateNotAtom);
        }
        let tuples = self.atoms.entry(atom.rel).or_default();
        if !tuples.contains(&atom.args) {
            tuples.push(atom.args.clone());
        }
        Ok(())
    }

    pub fn remove(&mut self, atom: &Pred) {
        if let Some(tuples) = self.atoms.get_mut(&atom.rel) {
            tuples.retain(|t| *t != atom.args);
            if tuples.is_empty() {
                self.atoms.remove(&atom.rel);
            }
        }
    }

    pub fn holds(&self, atom: &Pred) -> bool {
        self.atoms
            .get(&atom.rel)
            .map(|tuples| tuples.contains(&atom.args))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = Pred> + '_ {
        self.atoms
            .iter()
            .flat_map(|(&rel, tuples)| tuples.iter().map(move |t| Pred { rel, args: t.clone() }))
    }

    /// All constants occurring in the state, deduplicated.
    pub fn constants(&self) -> Vec<Term> {
        let mut seen = BTreeSet::new();
        for tuples in self.atoms.values() {
            for tuple in tuples {
                seen.extend(tuple.iter().copied());
            }
        }
        seen.into_iter().collect()
    }

    /// Whether a ground formula holds in this state. A formula containing a
    /// variable never does.
    pub fn is_consistent(&self, form: &Formula) -> bool {
        if !form.is_ground() {
            return false;
        }
        match form {
            Formula::Conj(xs) => xs.iter().all(|x| self.is_consistent(x)),
            atom => self.ground_atom_holds(atom),
        }
    }

    fn ground_atom_holds(&self, atom: &Formula) -> bool {
        match atom {
            Formula::Pred(p) => self.holds(p),
            Formula::Equ(a, b) => a == b,
            Formula::Neg(inner) => match &**inner {
                Formula::Pred(p) => !self.holds(p),
                Formula::Equ(a, b) => a != b,
                _ => false,
            },
            Formula::Conj(_) => false,
        }
    }

    /// A weaker, partial-binding check: could some grounding of `form` hold?
    /// Constants already in place must match; variables are wildcards.
    pub fn could_be_consistent(&self, form: &Formula) -> bool {
        match form {
            Formula::Conj(xs) => xs.iter().all(|x| self.could_be_consistent(x)),
            Formula::Pred(p) => self.atoms.get(&p.rel).is_some_and(|tuples| {
                tuples.iter().any(|tuple| {
                    tuple.len() == p.valence()
                        && p.args
                            .iter()
                            .zip(tuple)
                            .all(|(&a, &t)| a.is_variable() || a == t)
                })
            }),
            Formula::Equ(a, b) => a.is_variable() || b.is_variable() || a == b,
            Formula::Neg(_) => {
                if form.is_ground() {
                    self.ground_atom_holds(form)
                } else {
                    true
                }
            }
        }
    }

    /// The successor state of applying a ground operator: delete effects are
    /// removed first, then add effects are inserted.
    pub fn next_state(&self, op: &Operator, sub: &Substitution, table: &TermTable) -> Result<State> {
        let precs = op.preconditions.apply(sub)?;
        if !self.is_consistent(&precs) {
            return Err(EngineError::OperatorNotApplicable(
                table.symbols().symbol(op.name()).to_string(),
            ));
        }
        let effects = op.effects.apply(sub)?;

        let mut next = self.clone();
        next.index = self.index + 1;
        for eff in effects.conjuncts() {
            if let Formula::Neg(inner) = eff {
                match &**inner {
                    Formula::Pred(p) => next.remove(p),
                    _ => return Err(EngineError::NegNotPredOrEqu),
                }
            }
        }
        for eff in effects.conjuncts() {
            match eff {
                Formula::Pred(p) => next.add(p)?,
                Formula::Neg(_) => {}
                _ => {
                    return Err(EngineError::NotImplemented(
                        "operator effects must be predicates or negated predicates".to_string(),
                    ))
                }
            }
        }
        Ok(next)
    }

    /// All substitutions extending `seed` under which the conjunction
    /// `precs` becomes ground and holds in this state.
    ///
    /// Two results that agree on `relevant` are considered the same and only
    /// one of them is kept; the bindings of other variables are "don't care".
    pub fn instantiations(
        &self,
        precs: &Formula,
        seed: &Substitution,
        relevant: &BTreeSet<Term>,
    ) -> Result<Vec<Substitution>> {
        let goals: Vec<Formula> = precs.conjuncts().cloned().collect();
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.solve(&goals, seed, relevant, &mut seen, &mut out)?;
        Ok(out)
    }

    /// Instantiations of an operator's preconditions; the operator's own
    /// parameters are the relevant variables.
    pub fn instantiations_for_operator(
        &self,
        op: &Operator,
        seed: &Substitution,
    ) -> Result<Vec<Substitution>> {
        let relevant: BTreeSet<Term> = op.params().iter().copied().filter(|t| t.is_variable()).collect();
        self.instantiations(&op.preconditions, seed, &relevant)
    }

    /// Instantiations of `precs` with the additional requirement that every
    /// parameter of `head` ends up bound; head parameters not constrained by
    /// the preconditions range over the constants of the state.
    pub fn instantiations_for_head(
        &self,
        head: &Pred,
        precs: &Formula,
        seed: &Substitution,
        relevant: &BTreeSet<Term>,
    ) -> Result<Vec<Substitution>> {
        let base = self.instantiations(precs, seed, relevant)?;
        let constants = self.constants();
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for sub in base {
            let mut unbound = Vec::new();
            for &p in &head.args {
                let v = sub.apply_to_term(p)?;
                if v.is_variable() && !unbound.contains(&v) {
                    unbound.push(v);
                }
            }
            self.bind_over_constants(&sub, &unbound, &constants, relevant, &mut seen, &mut out)?;
        }
        Ok(out)
    }

    fn bind_over_constants(
        &self,
        sub: &Substitution,
        unbound: &[Term],
        constants: &[Term],
        relevant: &BTreeSet<Term>,
        seen: &mut HashSet<Vec<(Term, Term)>>,
        out: &mut Vec<Substitution>,
    ) -> Result<()> {
        match unbound.split_first() {
            None => self.record(sub, relevant, seen, out),
            Some((&var, rest)) => {
                for &c in constants {
                    let mut ext = sub.clone();
                    ext.add_pair(var, c)?;
                    self.bind_over_constants(&ext, rest, constants, relevant, seen, out)?;
                }
                Ok(())
            }
        }
    }

    /// One step of the backtracking search: discharge the goals already
    /// ground, pick the most constrained remaining one, and try every way of
    /// satisfying it.
    fn solve(
        &self,
        goals: &[Formula],
        sub: &Substitution,
        relevant: &BTreeSet<Term>,
        seen: &mut HashSet<Vec<(Term, Term)>>,
        out: &mut Vec<Substitution>,
    ) -> Result<()> {
        let mut remaining: Vec<Formula> = Vec::new();
        for goal in goals {
            let goal = goal.apply(sub)?;
            if goal.is_ground() {
                if !self.ground_atom_holds(&goal) {
                    return Ok(());
                }
            } else {
                remaining.push(goal);
            }
        }
        if remaining.is_empty() {
            return self.record(sub, relevant, seen, out);
        }

        remaining.sort_by(|a, b| {
            atom_rank(a)
                .cmp(&atom_rank(b))
                .then(a.variables().len().cmp(&b.variables().len()))
                .then(atom_valence(b).cmp(&atom_valence(a)))
        });
        let goal = remaining.remove(0);

        match &goal {
            Formula::Pred(p) => {
                let Some(tuples) = self.atoms.get(&p.rel) else {
                    return Ok(());
                };
                for tuple in tuples {
                    if tuple.len() != p.valence() {
                        continue;
                    }
                    let mut ext = sub.clone();
                    let mut ok = true;
                    for (&arg, &value) in p.args.iter().zip(tuple) {
                        let arg = ext.apply_to_term(arg)?;
                        if arg.is_constant() {
                            if arg != value {
                                ok = false;
                                break;
                            }
                        } else {
                            ext.add_pair(arg, value)?;
                        }
                    }
                    if ok {
                        self.solve(&remaining, &ext, relevant, seen, out)?;
                    }
                }
                Ok(())
            }
            Formula::Equ(a, b) => {
                // at least one side is a free variable here
                if a == b {
                    // a reflexive equality on a free variable cannot be ground
                    return Ok(());
                }
                let mut ext = sub.clone();
                if a.is_variable() {
                    ext.add_pair(*a, *b)?;
                } else {
                    ext.add_pair(*b, *a)?;
                }
                self.solve(&remaining, &ext, relevant, seen, out)
            }
            // A negation cannot pick its bindings from the state; its free
            // variables range over the constants of the state and the ground
            // test filters on the way back down. Negations sort last, so
            // this only happens for variables no positive atom constrains.
            Formula::Neg(_) => {
                let free = goal.variables();
                let Some(&var) = free.first() else {
                    return Ok(());
                };
                let mut goals = remaining.clone();
                goals.push(goal.clone());
                for c in self.constants() {
                    let mut ext = sub.clone();
                    ext.add_pair(var, c)?;
                    self.solve(&goals, &ext, relevant, seen, out)?;
                }
                Ok(())
            }
            Formula::Conj(_) => Err(EngineError::NotImplemented(
                "a conjunction may not contain another conjunction".to_string(),
            )),
        }
    }

    fn record(
        &self,
        sub: &Substitution,
        relevant: &BTreeSet<Term>,
        seen: &mut HashSet<Vec<(Term, Term)>>,
        out: &mut Vec<Substitution>,
    ) -> Result<()> {
        let mut key = Vec::with_capacity(relevant.len());
        for &v in relevant {
            key.push((v, sub.apply_to_term(v)?));
        }
        if seen.insert(key) {
            out.push(sub.clone());
        }
        Ok(())
    }
}

fn atom_rank(f: &Formula) -> u8 {
    match f {
        Formula::Equ(_, _) => 0,
        Formula::Pred(_) => 1,
        _ => 2,
    }
}

fn atom_valence(f: &Formula) -> usize {
    match f {
        Formula::Pred(p) => p.valence(),
        _ => 2,
    }
}
