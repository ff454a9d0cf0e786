//! Lifted schemas and their container: operators, decomposition methods,
//! annotated task descriptors and the HTN domain itself.

use crate::errors::{EngineError, Result};
use crate::formula::{Formula, Pred};
use crate::substitution::Substitution;
use crate::terms::{Sym, Term, TermTable};
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// PDDL requirement flags carried by domains and problems.
///
/// Only the flags the engine can honor are representable; the parser rejects
/// the others.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Requirements(u32);

impl Requirements {
    pub const STRIPS: Requirements = Requirements(1 << 0);
    pub const TYPING: Requirements = Requirements(1 << 1);
    pub const EQUALITY: Requirements = Requirements(1 << 2);
    pub const HTN: Requirements = Requirements(1 << 3);
    pub const METHOD_IDS: Requirements = Requirements(1 << 4);
    pub const QVALUES: Requirements = Requirements(1 << 5);

    pub fn contains(self, other: Requirements) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: Requirements) {
        self.0 |= other.0;
    }

    pub fn union(self, other: Requirements) -> Requirements {
        Requirements(self.0 | other.0)
    }
}

/// A primitive action schema. The head carries the name (starting with `!`)
/// and the ordered parameter variables.
#[derive(Clone, Debug)]
pub struct Operator {
    pub head: Pred,
    pub preconditions: Formula,
    pub effects: Formula,
    pub cost: u32,
}

impl Operator {
    pub fn name(&self) -> Sym {
        self.head.rel
    }

    pub fn params(&self) -> &[Term] {
        &self.head.args
    }

    pub fn equivalent(&self, other: &Operator) -> bool {
        self.head == other.head
            && self.preconditions == other.preconditions
            && self.effects == other.effects
            && self.cost == other.cost
    }
}

/// An annotated task: the intentional description used as a learning target.
#[derive(Clone, Debug)]
pub struct HtnTaskDescr {
    pub head: Pred,
    pub preconditions: Formula,
    pub effects: Formula,
}

impl HtnTaskDescr {
    pub fn name(&self) -> Sym {
        self.head.rel
    }

    pub fn apply(&self, sub: &Substitution) -> Result<HtnTaskDescr> {
        Ok(HtnTaskDescr {
            head: self.head.apply(sub)?,
            preconditions: self.preconditions.apply(sub)?,
            effects: self.effects.apply(sub)?,
        })
    }
}

/// The task list a learner is given: named annotated tasks.
#[derive(Clone, Debug)]
pub struct TaskList {
    pub name: String,
    pub tasks: Vec<Arc<HtnTaskDescr>>,
}

/// Q-value sentinel of a method that has never been updated.
pub const Q_UNSET: f64 = 999_999.0;

/// A decomposition method: head task, precondition, ordered subtasks.
#[derive(Clone, Debug)]
pub struct HtnMethod {
    pub id: String,
    pub head: Pred,
    pub preconditions: Formula,
    pub subtasks: Vec<Pred>,
    pub q_value: f64,
    pub q_count: u32,
}

impl HtnMethod {
    pub fn new(head: Pred, preconditions: Formula, subtasks: Vec<Pred>) -> HtnMethod {
        HtnMethod {
            id: String::new(),
            head,
            preconditions,
            subtasks,
            q_value: Q_UNSET,
            q_count: 0,
        }
    }

    pub fn name(&self) -> Sym {
        self.head.rel
    }

    /// All variables of the method: precondition first, then head, then
    /// subtasks, deduplicated in that order.
    pub fn variables(&self) -> Vec<Term> {
        self.preconditions
            .variables()
            .into_iter()
            .chain(self.head.args.iter().copied())
            .chain(self.subtasks.iter().flat_map(|s| s.args.iter().copied()))
            .filter(|t| t.is_variable())
            .unique()
            .collect()
    }

    /// Variables appearing in the head or a subtask. Variables that occur
    /// only in the precondition are existential and not relevant to callers.
    pub fn relevant_vars(&self) -> BTreeSet<Term> {
        let mut vars: BTreeSet<Term> = self.head.args.iter().copied().filter(|t| t.is_variable()).collect();
        for sub in &self.subtasks {
            vars.extend(sub.args.iter().copied().filter(|t| t.is_variable()));
        }
        vars
    }

    pub fn after_substitution(&self, sub: &Substitution) -> Result<HtnMethod> {
        let mut new = self.clone();
        new.head = self.head.apply(sub)?;
        new.preconditions = self.preconditions.apply(sub)?;
        for (i, task) in self.subtasks.iter().enumerate() {
            new.subtasks[i] = task.apply(sub)?;
        }
        Ok(new)
    }

    /// Folds a new decomposition cost into the rolling average.
    pub fn update_q_value(&mut self, new_cost: f64) {
        if self.q_count == 0 {
            self.q_value = 0.0;
        }
        self.q_count += 1;
        self.q_value += (new_cost - self.q_value) / self.q_count as f64;
    }

    /// After every subtask that is a determinised non-deterministic operator
    /// (`!name-NN`), inserts a `check-name` task with the same arguments,
    /// unless it is already there. A checking method additionally calls
    /// itself as its last subtask.
    pub fn add_nd_checkers(&mut self, table: &mut TermTable) {
        let mut i = 0;
        while i < self.subtasks.len() {
            let name = table.symbols().symbol(self.subtasks[i].rel).to_string();
            if let Some(base) = nd_operator_base(&name) {
                let checker_rel = table.symbols_mut().intern(&format!("check-{base}"));
                let checker = Pred::new(checker_rel, self.subtasks[i].args.iter().copied());
                if i + 1 == self.subtasks.len() || self.subtasks[i + 1] != checker {
                    self.subtasks.insert(i + 1, checker);
                }
            }
            i += 1;
        }

        let head_name = table.symbols().symbol(self.head.rel).to_string();
        if head_name.starts_with("check-") && self.subtasks.last() != Some(&self.head) {
            self.subtasks.push(self.head.clone());
        }
    }

    /// Whether every subtask shares a variable, possibly transitively through
    /// precondition atoms, with the method head.
    pub fn subtasks_partially_linked(&self, table: &TermTable) -> bool {
        for subtask in &self.subtasks {
            let mut to_check: Vec<Term> = subtask.args.to_vec();
            let mut done: Vec<Term> = Vec::new();
            let mut found = false;

            while let Some(cur) = to_check.pop() {
                if found {
                    break;
                }
                done.push(cur);
                if self.head.args.contains(&cur) {
                    found = true;
                    break;
                }
                for prec in self.preconditions.conjuncts() {
                    let pred = match prec.as_pred() {
                        Some(p) => p,
                        None => continue,
                    };
                    if table.symbols().symbol(pred.rel) == "different" {
                        continue;
                    }
                    if pred.args.contains(&cur) {
                        for &other in &pred.args {
                            if !to_check.contains(&other) && !done.contains(&other) {
                                to_check.push(other);
                            }
                        }
                    }
                }
            }

            if !found {
                return false;
            }
        }
        true
    }

    /// Decides whether this method is at least as general as `other`: there
    /// is a renaming of this method's variables under which both have the
    /// same head and subtasks, and every one of this method's preconditions
    /// is implied by the other's.
    pub fn subsumes(&self, other: &HtnMethod, table: &mut TermTable) -> Result<bool> {
        if self.head.rel != other.head.rel || self.head.valence() != other.head.valence() {
            return Ok(false);
        }
        if self.subtasks.len() != other.subtasks.len() {
            return Ok(false);
        }
        for (mine, his) in self.subtasks.iter().zip(&other.subtasks) {
            if mine.rel != his.rel || mine.valence() != his.valence() {
                return Ok(false);
            }
        }

        // Rename both sides apart, so shared variable names cannot collide:
        // mine to ?temp_old_*, the other's to ?temp_new_*.
        let mut my_subs = Substitution::new();
        for v in self.variables() {
            my_subs.add_pair(v, table.fresh_temp_old(table.typing(v)))?;
        }
        let mut other_subs = Substitution::new();
        let mut new_vars: HashSet<Term> = HashSet::new();
        for v in other.variables() {
            let fresh = table.fresh_temp_new(table.typing(v));
            other_subs.add_pair(v, fresh)?;
            new_vars.insert(fresh);
        }

        // Seed the rename with the bindings forced by the heads and subtasks.
        let mut master = Substitution::new();
        let seed = |mine: Term, his: Term, master: &mut Substitution| -> Option<bool> {
            let mine = my_subs.lookup(mine).unwrap_or(mine);
            let his = other_subs.lookup(his).unwrap_or(his);
            if mine.is_constant() {
                return Some(mine == his);
            }
            match master.lookup(mine) {
                Some(bound) => Some(bound == his),
                None => {
                    master.add_pair(mine, his).ok()?;
                    Some(true)
                }
            }
        };
        for (&mine, &his) in self.head.args.iter().zip(&other.head.args) {
            match seed(mine, his, &mut master) {
                Some(true) => {}
                _ => return Ok(false),
            }
        }
        for (my_task, his_task) in self.subtasks.iter().zip(&other.subtasks) {
            for (&mine, &his) in my_task.args.iter().zip(&his_task.args) {
                match seed(mine, his, &mut master) {
                    Some(true) => {}
                    _ => return Ok(false),
                }
            }
        }

        let my_precs: Vec<Formula> = self
            .preconditions
            .apply(&my_subs)?
            .conjuncts()
            .cloned()
            .collect();
        let his_precs: Vec<Formula> = other
            .preconditions
            .apply(&other_subs)?
            .conjuncts()
            .cloned()
            .collect();

        let nodes: Vec<MatchNode> = my_precs.into_iter().map(MatchNode::new).collect();
        can_subsume(&nodes, &his_precs, &master, &new_vars)
    }
}

/// Recognizes a determinised non-deterministic operator name `!base-NN` and
/// returns `base`.
pub fn nd_operator_base(name: &str) -> Option<&str> {
    let bytes = name.as_bytes();
    if bytes.len() > 4
        && bytes[0] == b'!'
        && bytes[bytes.len() - 3] == b'-'
        && bytes[bytes.len() - 2].is_ascii_digit()
        && bytes[bytes.len() - 1].is_ascii_digit()
    {
        Some(&name[1..name.len() - 3])
    } else {
        None
    }
}

/// A precondition of the subsuming method during the matching search, with
/// the bookkeeping needed to order candidates without recomputing it.
#[derive(Clone)]
struct MatchNode {
    form: Formula,
    old_vars: Vec<Term>,
    valence: usize,
}

impl MatchNode {
    fn new(form: Formula) -> MatchNode {
        let old_vars = form.variables();
        let valence = match &form {
            Formula::Pred(p) => p.valence(),
            _ => 2,
        };
        MatchNode { form, old_vars, valence }
    }

    fn after_substitution(&self, sub: &Substitution) -> Result<MatchNode> {
        let old_vars: Vec<Term> = self
            .old_vars
            .iter()
            .copied()
            .filter(|&v| sub.lookup(v).is_none())
            .collect();
        let form = if old_vars.len() < self.old_vars.len() {
            self.form.apply(sub)?
        } else {
            self.form.clone()
        };
        Ok(MatchNode {
            form,
            old_vars,
            valence: self.valence,
        })
    }

    fn type_rank(&self) -> u8 {
        match self.form {
            Formula::Equ(_, _) => 0,
            Formula::Pred(_) => 1,
            _ => 2,
        }
    }
}

/// Core of the subsumption decision: can the remaining `nodes` be renamed,
/// extending `sub`, so that each is implied by one of `his`?
///
/// Mirrors the instantiation search in `State`: fully-renamed nodes are
/// checked for an equal counterpart, and the most-constrained remaining node
/// is unified against every compatible candidate, recursing on each.
fn can_subsume(
    nodes: &[MatchNode],
    his: &[Formula],
    sub: &Substitution,
    new_vars: &HashSet<Term>,
) -> Result<bool> {
    let mut remaining: Vec<MatchNode> = Vec::new();
    for node in nodes {
        let node = node.after_substitution(sub)?;
        if node.old_vars.is_empty() {
            if !his.iter().any(|h| *h == node.form) {
                return Ok(false);
            }
        } else {
            remaining.push(node);
        }
    }
    if remaining.is_empty() {
        return Ok(true);
    }

    remaining.sort_by(|a, b| {
        a.type_rank()
            .cmp(&b.type_rank())
            .then(a.old_vars.len().cmp(&b.old_vars.len()))
            .then(b.valence.cmp(&a.valence))
    });

    // pairwise unification of one argument position; `new` vars are already
    // final and must match exactly
    let unify = |mine: Term, his_term: Term, ext: &mut Substitution| -> Option<bool> {
        if mine.is_constant() || new_vars.contains(&mine) {
            return Some(mine == his_term);
        }
        match ext.lookup(mine) {
            Some(bound) => Some(bound == his_term),
            None => {
                ext.add_pair(mine, his_term).ok()?;
                Some(true)
            }
        }
    };

    match &remaining[0].form {
        Formula::Pred(mine) => {
            for candidate in his {
                let his_pred = match candidate.as_pred() {
                    Some(p) => p,
                    None => continue,
                };
                if his_pred.rel != mine.rel || his_pred.valence() != mine.valence() {
                    continue;
                }
                let mut ext = Substitution::new();
                let ok = mine
                    .args
                    .iter()
                    .zip(&his_pred.args)
                    .all(|(&m, &h)| unify(m, h, &mut ext) == Some(true));
                if ok && can_subsume(&remaining, his, &ext, new_vars)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Formula::Equ(a, b) => {
            for candidate in his {
                let (ha, hb) = match candidate {
                    Formula::Equ(x, y) => (*x, *y),
                    _ => continue,
                };
                if let Some(ext) = unify_equality(*a, *b, ha, hb, new_vars)? {
                    if can_subsume(&remaining, his, &ext, new_vars)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        Formula::Neg(inner) => {
            let (a, b) = match **inner {
                Formula::Equ(x, y) => (x, y),
                _ => {
                    return Err(EngineError::NotImplemented(
                        "only equalities may be negated in method preconditions".to_string(),
                    ))
                }
            };
            for candidate in his {
                let (ha, hb) = match candidate {
                    Formula::Neg(h) => match **h {
                        Formula::Equ(x, y) => (x, y),
                        _ => {
                            return Err(EngineError::NotImplemented(
                                "only equalities may be negated in method preconditions".to_string(),
                            ))
                        }
                    },
                    _ => continue,
                };
                if let Some(ext) = unify_equality(a, b, ha, hb, new_vars)? {
                    if can_subsume(&remaining, his, &ext, new_vars)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        Formula::Conj(_) => Err(EngineError::NotImplemented(
            "a conjunction may not contain another conjunction".to_string(),
        )),
    }
}

/// Unifies the two sides of an (in)equality against a candidate, returning
/// the binding extension or None on mismatch.
fn unify_equality(
    a: Term,
    b: Term,
    ha: Term,
    hb: Term,
    new_vars: &HashSet<Term>,
) -> Result<Option<Substitution>> {
    let mut ext = Substitution::new();
    if a.is_constant() || new_vars.contains(&a) {
        if a != ha {
            return Ok(None);
        }
    } else if ext.add_pair(a, ha).is_err() {
        return Ok(None);
    }
    if b.is_constant() || new_vars.contains(&b) {
        if b != hb {
            return Ok(None);
        }
    } else if a == b {
        // a reflexive (in)equality can only match a reflexive one
        if ha != hb {
            return Ok(None);
        }
    } else if ext.add_pair(b, hb).is_err() {
        return Ok(None);
    }
    Ok(Some(ext))
}

/// A domain: declared types, constants and predicates, the primitive
/// operators and the decomposition methods. Serves both for STRIPS input
/// domains (no methods) and for the HTN domains produced by learning.
#[derive(Clone, Debug, Default)]
pub struct HtnDomain {
    pub name: String,
    pub requirements: Requirements,
    pub types: BTreeSet<Sym>,
    pub constants: Vec<Term>,
    pub predicates: Vec<Pred>,
    pub operators: Vec<Operator>,
    pub methods: Vec<HtnMethod>,
}

impl HtnDomain {
    pub fn add_operator(&mut self, op: Operator) {
        self.operators.push(op);
    }

    pub fn add_method(&mut self, method: HtnMethod) {
        self.methods.push(method);
    }

    pub fn remove_method(&mut self, index: usize) {
        self.methods.remove(index);
    }

    pub fn replace_method(&mut self, index: usize, method: HtnMethod) {
        self.methods[index] = method;
    }

    pub fn update_method_q_value(&mut self, index: usize, cost: f64) {
        self.methods[index].update_q_value(cost);
    }

    pub fn add_requirement(&mut self, req: Requirements) {
        self.requirements.insert(req);
    }

    pub fn operator_named(&self, name: Sym) -> Option<(usize, &Operator)> {
        self.operators
            .iter()
            .enumerate()
            .find(|(_, op)| op.name() == name)
    }

    /// Orders methods by ascending number of precondition conjuncts, the
    /// default method ordering of the solver.
    pub fn sort_methods(&mut self) {
        self.methods
            .sort_by_key(|m| m.preconditions.as_conj().map(|c| c.len()).unwrap_or(1));
    }

    pub fn randomize_method_order(&mut self, rng: &mut impl Rng) {
        self.methods.shuffle(rng);
    }

    pub fn set_method_id(&mut self, index: usize, id: impl Into<String>) {
        self.methods[index].id = id.into();
    }

    /// Structural equivalence, up to method ordering and renaming: both carry
    /// the same requirements and operators, and the method sets mutually
    /// subsume element-wise.
    pub fn equivalent(&self, other: &HtnDomain, table: &mut TermTable) -> Result<bool> {
        if self.requirements != other.requirements {
            return Ok(false);
        }
        if self.operators.len() != other.operators.len() {
            return Ok(false);
        }
        for (a, b) in self.operators.iter().zip(&other.operators) {
            if !a.equivalent(b) {
                return Ok(false);
            }
        }
        if self.methods.len() != other.methods.len() {
            return Ok(false);
        }
        for mine in &self.methods {
            let mut found = false;
            for his in &other.methods {
                if mine.subsumes(his, table)? && his.subsumes(mine, table)? {
                    found = true;
                    break;
                }
            }
            if !found {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TermTable {
        TermTable::new()
    }

    fn pred(table: &mut TermTable, rel: &str, args: &[&str]) -> Pred {
        let rel = table.symbols_mut().intern(rel);
        let args: Vec<Term> = args.iter().map(|a| table.intern(a, None).unwrap()).collect();
        Pred::new(rel, args)
    }

    fn method(table: &mut TermTable, head: (&str, &[&str]), precs: Vec<Formula>, subtasks: Vec<(&str, &[&str])>) -> HtnMethod {
        let head = pred(table, head.0, head.1);
        let subtasks = subtasks.into_iter().map(|(n, a)| pred(table, n, a)).collect();
        HtnMethod::new(head, Formula::conj(precs), subtasks)
    }

    #[test]
    fn general_method_subsumes_specific_one() {
        let mut t = table();
        // (deliver ?p ?d) | (at ?t ?d) (in ?p ?t) | (!unload ?p ?t ?d)
        let at = pred(&mut t, "at", &["?t", "?d"]);
        let inn = pred(&mut t, "in", &["?p", "?t"]);
        let m1 = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            vec![Formula::Pred(at.clone()), Formula::Pred(inn.clone())],
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        // same with an extra (truck ?t) precondition
        let truck = pred(&mut t, "truck", &["?t"]);
        let m2 = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            vec![
                Formula::Pred(truck),
                Formula::Pred(at),
                Formula::Pred(inn),
            ],
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        assert!(m1.subsumes(&m2, &mut t).unwrap());
        assert!(!m2.subsumes(&m1, &mut t).unwrap());
    }

    #[test]
    fn subsumption_is_reflexive() {
        let mut t = table();
        let at = pred(&mut t, "at", &["?t", "?d"]);
        let m = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            vec![Formula::Pred(at)],
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        assert!(m.subsumes(&m, &mut t).unwrap());
    }

    #[test]
    fn renamed_methods_mutually_subsume() {
        let mut t = table();
        let precs = vec![Formula::Pred(pred(&mut t, "at", &["?t", "?d"]))];
        let m1 = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            precs,
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        let precs = vec![Formula::Pred(pred(&mut t, "at", &["?c", "?b"]))];
        let m2 = method(
            &mut t,
            ("deliver", &["?a", "?b"]),
            precs,
            vec![("!unload", &["?a", "?c", "?b"])],
        );
        assert!(m1.subsumes(&m2, &mut t).unwrap());
        assert!(m2.subsumes(&m1, &mut t).unwrap());
    }

    #[test]
    fn differing_subtask_order_does_not_subsume() {
        let mut t = table();
        let m1 = method(
            &mut t,
            ("swap", &["?x", "?y"]),
            vec![],
            vec![("!a", &["?x"]), ("!b", &["?y"])],
        );
        let m2 = method(
            &mut t,
            ("swap", &["?x", "?y"]),
            vec![],
            vec![("!b", &["?y"]), ("!a", &["?x"])],
        );
        assert!(!m1.subsumes(&m2, &mut t).unwrap());
        assert!(!m2.subsumes(&m1, &mut t).unwrap());
    }

    #[test]
    fn subsumption_is_transitive() {
        let mut t = table();
        let at = pred(&mut t, "at", &["?t", "?d"]);
        let inn = pred(&mut t, "in", &["?p", "?t"]);
        let truck = pred(&mut t, "truck", &["?t"]);
        let m1 = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            vec![Formula::Pred(at.clone())],
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        let m2 = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            vec![Formula::Pred(at.clone()), Formula::Pred(inn.clone())],
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        let m3 = method(
            &mut t,
            ("deliver", &["?p", "?d"]),
            vec![Formula::Pred(at), Formula::Pred(inn), Formula::Pred(truck)],
            vec![("!unload", &["?p", "?t", "?d"])],
        );
        assert!(m1.subsumes(&m2, &mut t).unwrap());
        assert!(m2.subsumes(&m3, &mut t).unwrap());
        assert!(m1.subsumes(&m3, &mut t).unwrap());
    }

    #[test]
    fn subtask_linkage_follows_precondition_connections() {
        let mut t = table();
        let none: &[&str] = &[];

        // a subtask argument that is itself a head parameter
        let precs = vec![Formula::Pred(pred(&mut t, "prec1", &["?p3"]))];
        let m = method(&mut t, ("test1", &["?p1", "?p2"]), precs, vec![("sub1", &["?p1"])]);
        assert!(m.subtasks_partially_linked(&t));

        // a variable that reaches nothing in the head
        let precs = vec![Formula::Pred(pred(&mut t, "prec1", &["?p3"]))];
        let m = method(&mut t, ("test1", &["?p1", "?p2"]), precs, vec![("sub1", &["?p3"])]);
        assert!(!m.subtasks_partially_linked(&t));

        // linked through one precondition atom
        let precs = vec![Formula::Pred(pred(&mut t, "prec1", &["?p3", "?p2"]))];
        let m = method(&mut t, ("test1", &["?p1", "?p2"]), precs, vec![("sub1", &["?p3"])]);
        assert!(m.subtasks_partially_linked(&t));

        // linked through a chain of preconditions
        let precs = vec![
            Formula::Pred(pred(&mut t, "prec1", &["?p3", "?p1"])),
            Formula::Pred(pred(&mut t, "prec2", &["?p4", "?p3"])),
        ];
        let m = method(&mut t, ("test1", &["?p1", "?p2"]), precs, vec![("sub1", &["?p4"])]);
        assert!(m.subtasks_partially_linked(&t));

        // `different` atoms do not carry linkage
        let precs = vec![Formula::Pred(pred(&mut t, "different", &["?p3", "?p1"]))];
        let m = method(&mut t, ("test1", &["?p1", "?p2"]), precs, vec![("sub1", &["?p3"])]);
        assert!(!m.subtasks_partially_linked(&t));

        // every subtask must be linked, not just one
        let precs = vec![Formula::Pred(pred(&mut t, "prec1", &["?p3", "?p1"]))];
        let m = method(
            &mut t,
            ("test1", &["?p1", "?p2"]),
            precs,
            vec![("sub1", &["?p3"]), ("sub2", &["?p4"])],
        );
        assert!(!m.subtasks_partially_linked(&t));
        let precs = vec![
            Formula::Pred(pred(&mut t, "prec1", &["?p3", "?p1"])),
            Formula::Pred(pred(&mut t, "prec2", &["?p4", "?p2"])),
        ];
        let m = method(
            &mut t,
            ("test1", &["?p1", "?p2"]),
            precs,
            vec![("sub1", &["?p3"]), ("sub2", &["?p4"])],
        );
        assert!(m.subtasks_partially_linked(&t));

        // a subtask without parameters has nothing tying it to the head
        let precs = vec![Formula::Pred(pred(&mut t, "prec1", &["?p1"]))];
        let m = method(&mut t, ("test1", &["?p1", "?p2"]), precs, vec![("sub1", none)]);
        assert!(!m.subtasks_partially_linked(&t));
    }

    #[test]
    fn nd_checkers_are_inserted_once() {
        let mut t = table();
        let m = method(
            &mut t,
            ("move-task", &["?x"]),
            vec![],
            vec![("!move-01", &["?x"]), ("!stop", &["?x"])],
        );
        let mut m = m;
        m.add_nd_checkers(&mut t);
        let names: Vec<&str> = m
            .subtasks
            .iter()
            .map(|s| t.symbols().symbol(s.rel))
            .collect();
        assert_eq!(names, vec!["!move-01", "check-move", "!stop"]);
        // applying again must not duplicate the checker
        m.add_nd_checkers(&mut t);
        assert_eq!(m.subtasks.len(), 3);
    }

    #[test]
    fn q_value_is_a_rolling_average() {
        let mut t = table();
        let mut m = method(&mut t, ("noop", &[]), vec![], vec![]);
        assert_eq!(m.q_value, Q_UNSET);
        m.update_q_value(4.0);
        assert_eq!(m.q_value, 4.0);
        m.update_q_value(2.0);
        assert_eq!(m.q_value, 3.0);
        assert_eq!(m.q_count, 2);
    }
}
