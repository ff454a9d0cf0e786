//! Methods under construction by backwards goal regression.
//!
//! The substitutions involved are easy to mix up, so to spell them out:
//! `task_sub` maps each variable of the task descriptor to a created
//! variable, the per-subtask substitutions map each schema variable of that
//! subtask to a created variable, and `master_sub` maps every created
//! variable to the constant it denotes in the trace. Two created variables
//! may denote the same constant without any special meaning; they are merged
//! only when one is discovered to supply a precondition or effect stated in
//! terms of the other.
//!
//! The outstanding preconditions and the remaining add list are stored in
//! created variables.

use crate::domain::{HtnMethod, HtnTaskDescr, Operator};
use crate::errors::{EngineError, Result};
use crate::formula::{Formula, Pred};
use crate::state::State;
use crate::substitution::Substitution;
use crate::terms::{Term, TermTable};
use std::sync::Arc;

#[derive(Clone, Debug)]
struct ChosenOperator {
    op: Operator,
    sub: Substitution,
    before: usize,
}

#[derive(Clone, Debug)]
struct ChosenMethod {
    method: HtnMethod,
    sub: Substitution,
    before: usize,
    after: usize,
    effects: Formula,
}

/// An HTN method in the midst of being constructed, adding subtasks one at a
/// time from last to first.
#[derive(Clone, Debug)]
pub struct PartialHtnMethod {
    task: Arc<HtnTaskDescr>,
    task_sub: Substitution,
    master_sub: Substitution,
    remaining_add: Vec<Formula>,
    remaining_precs: Vec<Formula>,
    operators: Vec<ChosenOperator>,
    methods: Vec<ChosenMethod>,
    init_index: usize,
    final_index: usize,
    current_index: usize,
    total_cost: i64,
}

impl PartialHtnMethod {
    /// Seeds a partial method for `task` whose effects, under `seed`, hold in
    /// the state at `final_index`.
    pub fn new(
        task: Arc<HtnTaskDescr>,
        seed: &Substitution,
        final_index: usize,
        table: &mut TermTable,
    ) -> Result<PartialHtnMethod> {
        let mut task_sub = Substitution::new();
        let mut master_sub = Substitution::new();
        for (var, value) in seed.iter() {
            let fresh = table.fresh_auto(table.typing(var));
            task_sub.add_pair(var, fresh)?;
            master_sub.add_pair(fresh, value)?;
        }

        let effects = task.effects.apply(&task_sub)?;
        let mut remaining_add = Vec::new();
        for eff in effects.conjuncts() {
            if !remaining_add.contains(eff) {
                remaining_add.push(eff.clone());
            }
        }

        Ok(PartialHtnMethod {
            task,
            task_sub,
            master_sub,
            remaining_add,
            remaining_precs: Vec::new(),
            operators: Vec::new(),
            methods: Vec::new(),
            init_index: 0,
            final_index,
            current_index: final_index,
            total_cost: 0,
        })
    }

    pub fn task(&self) -> &Arc<HtnTaskDescr> {
        &self.task
    }

    pub fn task_sub(&self) -> &Substitution {
        &self.task_sub
    }

    pub fn master_sub(&self) -> &Substitution {
        &self.master_sub
    }

    pub fn init_index(&self) -> usize {
        self.init_index
    }

    pub fn final_index(&self) -> usize {
        self.final_index
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn num_remaining_add(&self) -> usize {
        self.remaining_add.len()
    }

    pub fn num_remaining_precs(&self) -> usize {
        self.remaining_precs.len()
    }

    pub fn mark_method_start(&mut self, init_index: usize) {
        self.init_index = init_index;
    }

    /// Skips the current plan step as useless.
    pub fn advance(&mut self) {
        self.current_index -= 1;
    }

    /// Whether `form` makes true one of the outstanding preconditions.
    pub fn supplies_prec(&self, form: &Formula) -> Result<bool> {
        for prec in &self.remaining_precs {
            if form.implies(&prec.apply(&self.master_sub)?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether `form` makes true one of the remaining task effects.
    pub fn supplies_effect(&self, form: &Formula) -> Result<bool> {
        for add in &self.remaining_add {
            if form.implies(&add.apply(&self.master_sub)?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Like [`supplies_prec`](Self::supplies_prec) but the supplied
    /// precondition must not also be provided by `old` (the candidate's own
    /// preconditions): the subtask must earn its keep.
    pub fn supplies_new_prec(&self, form: &Formula, old: &Formula) -> Result<bool> {
        for prec in &self.remaining_precs {
            let ground = prec.apply(&self.master_sub)?;
            if form.implies(&ground) && !old.implies(&ground) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn supplies_new_effect(&self, form: &Formula, old: &Formula) -> Result<bool> {
        for add in &self.remaining_add {
            let ground = add.apply(&self.master_sub)?;
            if form.implies(&ground) && !old.implies(&ground) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn operator_conflicts(&self, before: usize) -> bool {
        self.operators.iter().any(|o| o.before == before)
            || self
                .methods
                .iter()
                .any(|m| before >= m.before && before < m.after)
    }

    fn method_conflicts(&self, before: usize, after: usize) -> bool {
        self.operators
            .iter()
            .any(|o| o.before >= before && o.before < after)
            || self
                .methods
                .iter()
                .any(|m| m.before < after && before < m.after)
    }

    /// Adds the ground operator taken from plan position `before` as the new
    /// earliest subtask.
    pub fn add_operator(
        &mut self,
        op: &Operator,
        real_sub: &Substitution,
        before: usize,
        partial_generalization: bool,
        table: &mut TermTable,
    ) -> Result<()> {
        if before + 1 != self.current_index || self.operator_conflicts(before) {
            return Err(EngineError::OperatorOverlap {
                before,
                after: before + 1,
            });
        }

        let mut local = self.create_new_vars(real_sub, partial_generalization, table)?;
        self.process_effects(&op.effects, real_sub, partial_generalization, &mut local)?;
        self.process_preconditions(&op.preconditions, &local)?;

        self.total_cost += op.cost as i64;
        self.operators.push(ChosenOperator {
            op: op.clone(),
            sub: local,
            before,
        });
        self.current_index = before;
        Ok(())
    }

    /// Adds a recorded method instance covering `[before, after]` as the new
    /// earliest subtask. `effects` is whatever the caller considers the
    /// effects of that method (its actual effects, or only its task's).
    #[allow(clippy::too_many_arguments)]
    pub fn add_method(
        &mut self,
        method: &HtnMethod,
        real_sub: &Substitution,
        before: usize,
        after: usize,
        effects: &Formula,
        partial_generalization: bool,
        cost: i64,
        table: &mut TermTable,
    ) -> Result<()> {
        if after != self.current_index || self.method_conflicts(before, after) {
            return Err(EngineError::OperatorOverlap { before, after });
        }

        let mut local = self.create_new_vars(real_sub, partial_generalization, table)?;
        self.process_effects(effects, real_sub, partial_generalization, &mut local)?;
        self.process_preconditions(&method.preconditions, &local)?;

        self.total_cost += cost;
        self.methods.push(ChosenMethod {
            method: method.clone(),
            sub: local,
            before,
            after,
            effects: effects.clone(),
        });
        self.current_index = before;
        Ok(())
    }

    /// Builds the substitution from a subtask's schema variables to created
    /// variables, extending the master substitution with any variables that
    /// are new.
    ///
    /// Under partial generalization, a constant that already has a created
    /// variable reuses it, merging from the start.
    fn create_new_vars(
        &mut self,
        real_sub: &Substitution,
        partial_generalization: bool,
        table: &mut TermTable,
    ) -> Result<Substitution> {
        let mut local = Substitution::new();
        for (var, value) in real_sub.iter() {
            if partial_generalization {
                if let Some((existing, _)) = self.master_sub.find_by_value(value) {
                    local.add_pair(var, existing)?;
                    continue;
                }
            }
            let fresh = table.fresh_auto(table.typing(var));
            local.add_pair(var, fresh)?;
            self.master_sub.add_pair(fresh, value)?;
        }
        Ok(local)
    }

    /// Removes from the outstanding preconditions and remaining effects
    /// everything this subtask's add list makes true, merging variables as
    /// matches are found.
    fn process_effects(
        &mut self,
        effects: &Formula,
        real_sub: &Substitution,
        partial_generalization: bool,
        local: &mut Substitution,
    ) -> Result<()> {
        for eff in effects.conjuncts() {
            // additions make remaining positive atoms true, deletions make
            // remaining negative ones true; equalities are never effects
            let eff = match eff {
                Formula::Pred(_) => eff,
                Formula::Neg(inner) if matches!(**inner, Formula::Pred(_)) => eff,
                _ => continue,
            };

            if partial_generalization {
                // merged from the start: a plain equality check suffices
                let supplied = eff.apply(local)?;
                self.remaining_add.retain(|r| *r != supplied);
                self.remaining_precs.retain(|r| *r != supplied);
            } else {
                let supplied = eff.apply(real_sub)?;

                let mut j = 0;
                while j < self.remaining_add.len() {
                    let ground = self.remaining_add[j].apply(&self.master_sub)?;
                    if supplied == ground {
                        self.unify_add(eff, j, local)?;
                        j = 0; // the lists were rewritten, start over
                    } else {
                        j += 1;
                    }
                }

                let mut j = 0;
                while j < self.remaining_precs.len() {
                    let ground = self.remaining_precs[j].apply(&self.master_sub)?;
                    if supplied == ground {
                        self.unify_prec(eff, j, local)?;
                        j = 0;
                    } else {
                        j += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Adds the preconditions of a new subtask, in created variables, to the
    /// outstanding list.
    fn process_preconditions(&mut self, precs: &Formula, local: &Substitution) -> Result<()> {
        for prec in precs.conjuncts() {
            let after = prec.apply(local)?;
            match &after {
                Formula::Neg(inner) => {
                    if !matches!(**inner, Formula::Equ(_, _)) {
                        return Err(EngineError::NotImplemented(
                            "negative preconditions (other than equalities) are not allowed"
                                .to_string(),
                        ));
                    }
                }
                Formula::Pred(_) | Formula::Equ(_, _) => {}
                Formula::Conj(_) => {
                    return Err(EngineError::NotImplemented(
                        "a conjunction was not in simplest form".to_string(),
                    ))
                }
            }
            if !self.remaining_precs.contains(&after) {
                self.remaining_precs.push(after);
            }
        }
        Ok(())
    }

    fn unify_add(&mut self, effect: &Formula, index: usize, local: &mut Substitution) -> Result<()> {
        let target = self.remaining_add[index].clone();
        let replace = self.unify_atoms(effect, &target, local)?;
        self.remaining_add.remove(index);
        self.update_adds_and_precs(&replace)
    }

    fn unify_prec(&mut self, effect: &Formula, index: usize, local: &mut Substitution) -> Result<()> {
        let target = self.remaining_precs[index].clone();
        let replace = self.unify_atoms(effect, &target, local)?;
        self.remaining_precs.remove(index);
        self.update_adds_and_precs(&replace)
    }

    /// Pairwise unification of a subtask effect (in schema variables) with a
    /// remaining atom (in created variables). Returns the created-variable
    /// renamings performed.
    fn unify_atoms(
        &mut self,
        effect: &Formula,
        target: &Formula,
        local: &mut Substitution,
    ) -> Result<Substitution> {
        let mut replace = Substitution::new();
        match (effect, target) {
            (Formula::Pred(e), Formula::Pred(t)) => {
                for (&old, &new) in e.args.iter().zip(&t.args) {
                    self.merge_terms(old, new, local, &mut replace)?;
                }
            }
            (Formula::Equ(e1, e2), Formula::Equ(t1, t2)) => {
                self.merge_terms(*e1, *t1, local, &mut replace)?;
                self.merge_terms(*e2, *t2, local, &mut replace)?;
            }
            (Formula::Neg(e), Formula::Neg(t)) => match (&**e, &**t) {
                (Formula::Pred(e), Formula::Pred(t)) => {
                    for (&old, &new) in e.args.iter().zip(&t.args) {
                        self.merge_terms(old, new, local, &mut replace)?;
                    }
                }
                (Formula::Equ(e1, e2), Formula::Equ(t1, t2)) => {
                    self.merge_terms(*e1, *t1, local, &mut replace)?;
                    self.merge_terms(*e2, *t2, local, &mut replace)?;
                }
                _ => {
                    return Err(EngineError::NegNotPredOrEqu);
                }
            },
            _ => {
                return Err(EngineError::NotImplemented(
                    "cannot unify formulas of different shapes".to_string(),
                ))
            }
        }
        Ok(replace)
    }

    /// Renames the created variable standing for `old` (a schema variable of
    /// the new subtask) to the created variable `new`, propagating the rename
    /// through every substitution of the partial. Constants are left alone.
    fn merge_terms(
        &mut self,
        old: Term,
        new: Term,
        local: &mut Substitution,
        replace: &mut Substitution,
    ) -> Result<()> {
        if old.is_constant() {
            return Ok(());
        }
        let old_created = local.lookup(old).ok_or_else(|| {
            EngineError::NotImplemented(
                "an effect variable was not bound by the instantiation".to_string(),
            )
        })?;
        if old_created == new {
            return Ok(());
        }
        local.replace_term(old_created, new)?;
        self.master_sub.replace_term(old_created, new)?;
        self.task_sub.replace_term(old_created, new)?;
        replace.add_pair(old_created, new)?;
        for chosen in &mut self.operators {
            chosen.sub.replace_term(old_created, new)?;
        }
        for chosen in &mut self.methods {
            chosen.sub.replace_term(old_created, new)?;
        }
        Ok(())
    }

    /// Rewrites the outstanding lists with the renames accumulated during a
    /// unification, deduplicating entries that collapse together.
    fn update_adds_and_precs(&mut self, replace: &Substitution) -> Result<()> {
        let old_add = std::mem::take(&mut self.remaining_add);
        for form in old_add {
            let after = form.apply(replace)?;
            if !self.remaining_add.contains(&after) {
                self.remaining_add.push(after);
            }
        }
        let old_precs = std::mem::take(&mut self.remaining_precs);
        for form in old_precs {
            let after = form.apply(replace)?;
            if !self.remaining_precs.contains(&after) {
                self.remaining_precs.push(after);
            }
        }
        Ok(())
    }

    /// Replaces the created task variables with brand new ones. May only be
    /// called before any subtask has been chosen.
    pub fn get_new_task_vars(&mut self, table: &mut TermTable) -> Result<()> {
        if !self.operators.is_empty() || !self.methods.is_empty() {
            return Err(EngineError::NotImplemented(
                "task variables cannot be replaced once subtasks are chosen".to_string(),
            ));
        }

        let old_vars: Vec<Term> = self.task_sub.iter().map(|(_, v)| v).collect();
        let mut replace = Substitution::new();
        for old in old_vars {
            let fresh = table.fresh_auto(table.typing(old));
            self.task_sub.replace_term(old, fresh)?;
            self.master_sub.replace_term(old, fresh)?;
            replace.add_pair(old, fresh)?;
        }

        for form in &mut self.remaining_add {
            *form = form.apply(&replace)?;
        }
        Ok(())
    }

    /// The task effects under the intended ground reading.
    pub fn ground_effects(&self) -> Result<Formula> {
        self.task
            .effects
            .apply(&self.task_sub)?
            .apply(&self.master_sub)
    }

    /// The task preconditions under the intended ground reading.
    pub fn ground_preconditions(&self) -> Result<Formula> {
        self.task
            .preconditions
            .apply(&self.task_sub)?
            .apply(&self.master_sub)
    }

    /// Whether every remaining add-list entry is already true in `state`.
    pub fn remaining_add_satisfied(&self, state: &State) -> Result<bool> {
        for add in &self.remaining_add {
            if !state.is_consistent(&add.apply(&self.master_sub)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The effects this method actually accomplishes: walking the chosen
    /// subtasks from last to first, an atom added or deleted later in the
    /// plan wins over anything an earlier subtask does to it.
    pub fn actual_effects(&self) -> Result<Formula> {
        let mut pos: Vec<Formula> = Vec::new();
        let mut neg: Vec<Formula> = Vec::new();

        let mut i = self.final_index;
        while i > self.init_index {
            let mut effects = None;
            for chosen in &self.methods {
                if chosen.after == i {
                    effects = Some(chosen.effects.apply(&chosen.sub)?);
                    i = chosen.before;
                    break;
                }
            }
            if effects.is_none() {
                for chosen in &self.operators {
                    if chosen.before + 1 == i {
                        effects = Some(chosen.op.effects.apply(&chosen.sub)?);
                        i -= 1;
                        break;
                    }
                }
            }
            let effects = match effects {
                Some(e) => e,
                None => {
                    i -= 1;
                    continue;
                }
            };

            for eff in effects.conjuncts() {
                match eff {
                    Formula::Pred(_) => {
                        let negated = Formula::neg(eff.clone());
                        if !neg.contains(&negated) && !pos.contains(eff) {
                            pos.push(eff.clone());
                        }
                    }
                    Formula::Neg(inner) => {
                        if !matches!(**inner, Formula::Pred(_)) {
                            return Err(EngineError::NegNotPredOrEqu);
                        }
                        if !pos.contains(&**inner) && !neg.contains(eff) {
                            neg.push(eff.clone());
                        }
                    }
                    _ => {
                        return Err(EngineError::NotImplemented(
                            "an effect must be a predicate or the negation of one".to_string(),
                        ))
                    }
                }
            }
        }

        pos.extend(neg);
        Ok(Formula::conj(pos))
    }

    /// Realizes the finished regression as a lifted method.
    pub fn create_method(
        &self,
        soundness_check: bool,
        partial_generalization: bool,
        qvalues: bool,
        table: &mut TermTable,
    ) -> Result<HtnMethod> {
        // method parameters: the created variables standing for the task
        // head's parameters, positionally
        let mut params: Vec<Term> = Vec::with_capacity(self.task.head.valence());
        for &p in &self.task.head.args {
            let created = self.task_sub.lookup(p).ok_or_else(|| {
                EngineError::NotImplemented(
                    "a task head parameter was not bound by the instantiation".to_string(),
                )
            })?;
            params.push(created);
        }

        // preconditions: task preconditions, then outstanding preconditions,
        // then the unproven remainder of the add list, implied-deduplicated
        let mut precs: Vec<Formula> = Vec::new();
        let push_prec = |precs: &mut Vec<Formula>, form: Formula| {
            if !precs.iter().any(|p| p.implies(&form)) {
                precs.push(form);
            }
        };
        for prec in self.task.preconditions.apply(&self.task_sub)?.conjuncts() {
            push_prec(&mut precs, prec.clone());
        }
        for prec in &self.remaining_precs {
            push_prec(&mut precs, prec.clone());
        }
        for add in &self.remaining_add {
            push_prec(&mut precs, add.clone());
        }

        // free variables: anything in the preconditions that is not a
        // parameter
        let mut vars: Vec<Term> = Vec::new();
        for prec in &precs {
            for v in prec.variables() {
                if !params.contains(&v) && !vars.contains(&v) {
                    vars.push(v);
                }
            }
            if !prec.constants().is_empty() {
                return Err(EngineError::NotImplemented(
                    "the preconditions of a method should not contain constants".to_string(),
                ));
            }
        }

        // subtasks, in plan order; free variables of subtask arguments join
        // the :vars list
        let mut subtasks: Vec<Pred> = Vec::new();
        let mut i = self.init_index;
        while i < self.final_index {
            let mut placed = false;
            for chosen in &self.operators {
                if chosen.before == i {
                    let head = chosen.op.head.apply(&chosen.sub)?;
                    for &arg in &head.args {
                        if arg.is_variable() && !params.contains(&arg) && !vars.contains(&arg) {
                            vars.push(arg);
                        }
                    }
                    subtasks.push(head);
                    i += 1;
                    placed = true;
                    break;
                }
            }
            if placed {
                continue;
            }
            for chosen in &self.methods {
                if chosen.before == i {
                    let head = chosen.method.head.apply(&chosen.sub)?;
                    for &arg in &head.args {
                        if arg.is_variable() && !params.contains(&arg) && !vars.contains(&arg) {
                            vars.push(arg);
                        }
                    }
                    subtasks.push(head);
                    i = chosen.after;
                    placed = true;
                    break;
                }
            }
            if !placed {
                i += 1;
            }
        }

        let head = self.task.head.apply(&self.task_sub)?;

        if soundness_check {
            let verify_name = format!("{}-verify", table.symbols().symbol(head.rel));
            let verify_rel = table.symbols_mut().intern(&verify_name);
            subtasks.push(Pred::new(verify_rel, head.args.iter().copied()));
        }

        // without partial generalization, distinct variables may still denote
        // distinct constants; state that explicitly for same-typed pairs
        if !partial_generalization {
            let all: Vec<Term> = params.iter().chain(vars.iter()).copied().collect();
            for (i, &a) in all.iter().enumerate() {
                for &b in &all[i + 1..] {
                    if !table.same_typing(a, b) {
                        continue;
                    }
                    let (ca, cb) = (self.master_sub.lookup(a), self.master_sub.lookup(b));
                    let (ca, cb) = match (ca, cb) {
                        (Some(x), Some(y)) => (x, y),
                        _ => continue,
                    };
                    if ca == cb {
                        continue;
                    }
                    let inequality = Formula::neg(Formula::Equ(a, b));
                    if !precs.contains(&inequality) {
                        precs.push(inequality);
                    }
                }
            }
        }

        let mut method = HtnMethod::new(head, Formula::conj(precs), subtasks);
        if qvalues {
            method.q_value = self.total_cost as f64;
            method.q_count = 1;
        }
        Ok(method)
    }
}
