//! The learn-from-trace driver: walks a plan, seeds partial methods for
//! every task whose effects just became true, regresses them toward every
//! earlier state and folds the finished methods into the output domain.

pub mod annotated_plan;
pub mod partial;

pub use annotated_plan::{AnnotatedPlan, MethodInst};
pub use partial::PartialHtnMethod;

use crate::domain::{nd_operator_base, HtnDomain, HtnMethod, HtnTaskDescr, Requirements, TaskList};
use crate::errors::Result;
use crate::formula::{Formula, Pred};
use crate::substitution::Substitution;
use crate::terms::{Term, TermTable};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// The mode flags of the learner, mapping one-to-one onto the command-line
/// switches of `htn-maker`.
#[derive(Copy, Clone, Debug, Default)]
pub struct LearnOptions {
    /// Do not prune methods that are subsumed by another.
    pub no_subsumption: bool,
    /// Keep two variables merged whenever they denote the same constant.
    pub partial_generalization: bool,
    /// When placing a sub-method, use only its task's declared effects.
    pub only_task_effects: bool,
    /// A candidate subtask must supply something it does not itself require.
    pub require_new: bool,
    /// Every subtask of an emitted method must be linked to its head.
    pub var_linkage: bool,
    /// Skip learning when an existing method already decomposes the task.
    pub drop_unneeded: bool,
    /// The earliest subtask of an emitted method must be primitive.
    pub force_ops_first: bool,
    /// Only learn from a subsequence if no backward extension of it can
    /// already be solved.
    pub hard_squelch: bool,
    /// Append a verifier subtask enforcing the task effects.
    pub soundness_check: bool,
    /// Learn checker methods for determinised non-deterministic operators.
    pub nd_checkers: bool,
    /// Seed and maintain method Q-values instead of subsuming duplicates.
    pub qvalues: bool,
}

/// Stateful driver: carries the options and the method-id counter.
pub struct Learner {
    opts: LearnOptions,
    max_method_id: u32,
}

impl Learner {
    pub fn new(opts: LearnOptions, domain: &HtnDomain) -> Learner {
        let mut max_method_id = 0;
        if domain.requirements.contains(Requirements::METHOD_IDS) {
            for method in &domain.methods {
                if let Ok(id) = method.id.parse::<u32>() {
                    max_method_id = max_method_id.max(id);
                }
            }
        }
        Learner {
            opts,
            max_method_id,
        }
    }

    fn next_id(&mut self) -> String {
        self.max_method_id += 1;
        self.max_method_id.to_string()
    }

    /// Learns methods from the whole trace, enlarging `domain` in place.
    pub fn learn(
        &mut self,
        plan: &mut AnnotatedPlan,
        tasks: &TaskList,
        domain: &mut HtnDomain,
        table: &mut TermTable,
    ) -> Result<()> {
        if self.opts.soundness_check {
            self.make_soundness_check_methods(tasks, domain, table)?;
        }
        if self.opts.nd_checkers {
            self.make_trivial_nd_checkers(domain, table)?;
        }

        for for_state in 1..=plan.plan.plan_length() {
            // new partial methods for tasks that may be ending in this state
            let partials = self.get_partials(plan, tasks, for_state, table)?;
            debug!(state = for_state, candidates = partials.len(), "seeding partial methods");

            // process them back to each prior state, most recent first, to
            // encourage composition of learned methods
            self.learn_from_subsequences(0, for_state, plan, domain, &partials, table)?;

            if self.opts.nd_checkers {
                self.learn_nd_checkers(for_state - 1, plan, domain, table)?;
            }
        }
        Ok(())
    }

    /// Seeds one partial method per task and grounding whose effects first
    /// hold at `state_index`.
    fn get_partials(
        &self,
        plan: &AnnotatedPlan,
        tasks: &TaskList,
        state_index: usize,
        table: &mut TermTable,
    ) -> Result<Vec<PartialHtnMethod>> {
        let mut partials = Vec::new();
        for task in &tasks.tasks {
            let mut relevant: BTreeSet<Term> = BTreeSet::new();
            relevant.extend(task.head.args.iter().copied().filter(|t| t.is_variable()));
            relevant.extend(task.preconditions.variables());
            relevant.extend(task.effects.variables());

            let subs = plan.plan.state(state_index)?.instantiations_for_head(
                &task.head,
                &task.effects,
                &Substitution::new(),
                &relevant,
            )?;

            for sub in subs {
                let ground_effects = task.effects.apply(&sub)?;
                // the effects must have just become true
                if !plan.plan.state(state_index - 1)?.is_consistent(&ground_effects) {
                    partials.push(PartialHtnMethod::new(task.clone(), &sub, state_index, table)?);
                }
            }
        }
        Ok(partials)
    }

    fn learn_from_subsequences(
        &mut self,
        init: usize,
        final_state: usize,
        plan: &mut AnnotatedPlan,
        domain: &mut HtnDomain,
        partials: &[PartialHtnMethod],
        table: &mut TermTable,
    ) -> Result<()> {
        if init + 1 < final_state {
            self.learn_from_subsequences(init + 1, final_state, plan, domain, partials, table)?;
        }

        for partial in partials {
            let mut learn = true;
            if self.opts.hard_squelch {
                for j in 0..=init {
                    if self.try_solving(plan, j, final_state, partial, domain, table)? {
                        learn = false;
                        break;
                    }
                }
            }
            if learn {
                self.learn_from_exact_sequence(init, final_state, plan, domain, partial, table)?;
            }
        }
        Ok(())
    }

    /// Whether an existing method of the domain already decomposes the
    /// partial's task from the state at `init`; if so the coverage is
    /// recorded on the plan.
    fn try_solving(
        &self,
        plan: &mut AnnotatedPlan,
        init: usize,
        for_state: usize,
        partial: &PartialHtnMethod,
        domain: &HtnDomain,
        table: &mut TermTable,
    ) -> Result<bool> {
        let task = partial.task().clone();
        for method in &domain.methods {
            if method.head.rel != task.head.rel || method.head.valence() != task.head.valence() {
                continue;
            }
            let mut from_task = Substitution::new();
            let mut from_method = Substitution::new();
            let mut compatible = true;
            for (&task_param, &method_param) in task.head.args.iter().zip(&method.head.args) {
                if !task_param.is_variable() || !method_param.is_variable() {
                    compatible = false;
                    break;
                }
                from_task.add_pair(task_param, method_param)?;
                let created = match partial.task_sub().lookup(task_param) {
                    Some(t) => t,
                    None => {
                        compatible = false;
                        break;
                    }
                };
                let constant = match partial.master_sub().lookup(created) {
                    Some(t) => t,
                    None => {
                        compatible = false;
                        break;
                    }
                };
                from_method.add_pair(method_param, constant)?;
            }
            if !compatible {
                continue;
            }

            let instances = plan.plan.state(init)?.instantiations(
                &method.preconditions,
                &from_method,
                &BTreeSet::new(),
            )?;
            if let Some(instance) = instances.first() {
                let method_effects = task.effects.apply(&from_task)?;
                let renamed_task = task.apply(&from_task)?;
                let (method, instance, cost) = (method.clone(), instance.clone(), method.q_value);
                plan.add_method_inst(
                    &method,
                    &instance,
                    init,
                    for_state,
                    &renamed_task,
                    &method_effects,
                    cost,
                    table,
                )?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Regresses one seed over the exact range `[init, final_state]`,
    /// emitting a method if the regression accounts for everything.
    fn learn_from_exact_sequence(
        &mut self,
        init: usize,
        final_state: usize,
        plan: &mut AnnotatedPlan,
        domain: &mut HtnDomain,
        partial: &PartialHtnMethod,
        table: &mut TermTable,
    ) -> Result<()> {
        let mut cur = partial.clone();
        cur.get_new_task_vars(table)?;
        cur.mark_method_start(init);
        let mut recent_helped = false;

        if self.opts.drop_unneeded && self.drop_if_already_covered(init, final_state, plan, &cur, table)? {
            return Ok(());
        }

        while cur.current_index() > init {
            let first_allowed = init + if self.opts.force_ops_first { 1 } else { 0 };
            let mut best: Option<usize> = None;
            for (index, inst) in plan.methods().iter().enumerate() {
                if inst.after != cur.current_index() || inst.before < first_allowed {
                    continue;
                }
                let method_effects = inst.task.effects.apply(&inst.sub)?;
                let useful = if self.opts.require_new {
                    let method_precs = inst.method.preconditions.apply(&inst.sub)?;
                    cur.supplies_new_prec(&method_effects, &method_precs)?
                        || cur.supplies_new_effect(&method_effects, &method_precs)?
                } else {
                    cur.supplies_prec(&method_effects)? || cur.supplies_effect(&method_effects)?
                };
                if !useful {
                    continue;
                }
                best = match best {
                    None => Some(index),
                    Some(b) => {
                        let cur_best = &plan.methods()[b];
                        if inst.before < cur_best.before
                            || (inst.before == cur_best.before
                                && inst.method.subtasks.len() < cur_best.method.subtasks.len())
                        {
                            Some(index)
                        } else {
                            Some(b)
                        }
                    }
                };
            }

            if let Some(best) = best {
                let inst = plan.methods()[best].clone();
                let effects = if self.opts.only_task_effects {
                    &inst.task.effects
                } else {
                    &inst.effects
                };
                cur.add_method(
                    &inst.method,
                    &inst.sub,
                    inst.before,
                    inst.after,
                    effects,
                    self.opts.partial_generalization,
                    inst.cost as i64,
                    table,
                )?;
                recent_helped = true;
            } else {
                let step = cur.current_index() - 1;
                let op = plan.plan.operator(step)?.clone();
                let op_sub = plan.plan.substitution(step)?.clone();
                let op_effects = op.effects.apply(&op_sub)?;
                if cur.supplies_prec(&op_effects)? || cur.supplies_effect(&op_effects)? {
                    cur.add_operator(&op, &op_sub, step, self.opts.partial_generalization, table)?;
                    recent_helped = true;
                } else {
                    recent_helped = false;
                    if cur.current_index() == final_state {
                        // nothing at the very end helps: this range is a bust
                        while cur.current_index() > init {
                            cur.advance();
                        }
                    } else {
                        cur.advance();
                    }
                }
            }
        }

        if !recent_helped {
            return Ok(());
        }

        let lifted_precs = cur.task().preconditions.apply(cur.task_sub())?;
        let instances = plan.plan.state(init)?.instantiations(
            &lifted_precs,
            cur.master_sub(),
            &BTreeSet::new(),
        )?;
        if instances.is_empty() || !cur.remaining_add_satisfied(plan.plan.state(init)?)? {
            return Ok(());
        }

        let mut new_method = cur.create_method(
            self.opts.soundness_check,
            self.opts.partial_generalization,
            self.opts.qvalues,
            table,
        )?;

        // a method whose preconditions already imply the task effects
        // serves no purpose
        let lifted_task_effects = cur.task().effects.apply(cur.task_sub())?;
        let mut delete = new_method.preconditions.implies(&lifted_task_effects);

        if self.opts.nd_checkers {
            new_method.add_nd_checkers(table);
        }
        if self.opts.var_linkage && !new_method.subtasks_partially_linked(table) {
            delete = true;
        }
        if delete {
            return Ok(());
        }

        if domain.requirements.contains(Requirements::METHOD_IDS) {
            new_method.id = self.next_id();
        }

        let new_task = cur.task().apply(cur.task_sub())?;
        let method_effects = cur.actual_effects()?;
        plan.add_method_inst(
            &new_method,
            &instances[0],
            cur.init_index(),
            cur.final_index(),
            &new_task,
            &method_effects,
            new_method.q_value,
            table,
        )?;

        if new_method.subtasks.len() == 1 && new_method.subtasks[0] == new_method.head {
            // trivial: the head decomposes into itself
        } else if self.opts.qvalues {
            self.do_q_value_update(domain, new_method, table)?;
        } else if !self.opts.no_subsumption {
            self.do_subsumption(domain, new_method, table)?;
        } else {
            domain.add_method(new_method);
        }
        Ok(())
    }

    /// `drop_unneeded`: if a recorded instantiation of an existing method
    /// with the same task already applies at `init`, register its coverage
    /// and skip this seed.
    fn drop_if_already_covered(
        &self,
        init: usize,
        final_state: usize,
        plan: &mut AnnotatedPlan,
        cur: &PartialHtnMethod,
        table: &mut TermTable,
    ) -> Result<bool> {
        let mut covered: Option<(HtnMethod, Substitution, HtnTaskDescr, Formula, f64)> = None;
        for inst in plan.methods().iter().rev() {
            if inst.after > final_state
                || inst.before < init
                || inst.method.head.rel != cur.task().head.rel
            {
                continue;
            }
            let mut seed = Substitution::new();
            let mut compatible = true;
            for (&method_param, &task_param) in
                inst.method.head.args.iter().zip(&cur.task().head.args)
            {
                let constant = cur
                    .task_sub()
                    .lookup(task_param)
                    .and_then(|created| cur.master_sub().lookup(created));
                match constant {
                    Some(c) if method_param.is_variable() => seed.add_pair(method_param, c)?,
                    _ => {
                        compatible = false;
                        break;
                    }
                }
            }
            if !compatible {
                continue;
            }
            let instances = plan.plan.state(init)?.instantiations(
                &inst.method.preconditions,
                &seed,
                &BTreeSet::new(),
            )?;
            if let Some(instance) = instances.first() {
                covered = Some((
                    inst.method.clone(),
                    instance.clone(),
                    inst.task.clone(),
                    inst.effects.clone(),
                    inst.cost,
                ));
                break;
            }
        }

        if let Some((method, instance, task, effects, cost)) = covered {
            plan.add_method_inst(&method, &instance, init, final_state, &task, &effects, cost, table)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// New-method policy without q-values: drop the method if something
    /// subsumes it, otherwise replace everything it subsumes.
    fn do_subsumption(
        &self,
        domain: &mut HtnDomain,
        new_method: HtnMethod,
        table: &mut TermTable,
    ) -> Result<()> {
        for i in 0..domain.methods.len() {
            if domain.methods[i].subsumes(&new_method, table)? {
                return Ok(());
            }
        }
        let mut inserted = false;
        let mut i = 0;
        while i < domain.methods.len() {
            if new_method.subsumes(&domain.methods[i], table)? {
                if !inserted {
                    domain.replace_method(i, new_method.clone());
                    inserted = true;
                    i += 1;
                } else {
                    domain.remove_method(i);
                }
            } else {
                i += 1;
            }
        }
        if !inserted {
            domain.add_method(new_method);
        }
        Ok(())
    }

    /// New-method policy with q-values: an equivalent existing method (one
    /// that subsumes and is subsumed) absorbs the new cost sample instead of
    /// being replaced.
    fn do_q_value_update(
        &self,
        domain: &mut HtnDomain,
        new_method: HtnMethod,
        table: &mut TermTable,
    ) -> Result<()> {
        for i in 0..domain.methods.len() {
            if domain.methods[i].subsumes(&new_method, table)?
                && new_method.subsumes(&domain.methods[i], table)?
            {
                domain.update_method_q_value(i, (new_method.q_value + 0.5).trunc());
                return Ok(());
            }
        }
        domain.add_method(new_method);
        Ok(())
    }

    /// For every task without one, adds a `<task>-verify` method whose
    /// precondition is exactly the task's effects and whose body is empty.
    fn make_soundness_check_methods(
        &mut self,
        tasks: &TaskList,
        domain: &mut HtnDomain,
        table: &mut TermTable,
    ) -> Result<()> {
        for task in &tasks.tasks {
            let verify_name = format!("{}-verify", table.symbols().symbol(task.head.rel));
            let verify_rel = table.symbols_mut().intern(&verify_name);
            if domain.methods.iter().any(|m| m.head.rel == verify_rel) {
                continue;
            }
            let mut method = HtnMethod::new(
                Pred::new(verify_rel, task.head.args.iter().copied()),
                task.effects.clone(),
                Vec::new(),
            );
            if domain.requirements.contains(Requirements::METHOD_IDS) {
                method.id = self.next_id();
            }
            domain.add_method(method);
        }
        Ok(())
    }

    /// For every `!name-01` operator, adds a `check-name` method whose
    /// precondition is that operator's effects and whose body is empty.
    fn make_trivial_nd_checkers(
        &mut self,
        domain: &mut HtnDomain,
        table: &mut TermTable,
    ) -> Result<()> {
        let mut checkers = Vec::new();
        for op in &domain.operators {
            let name = table.symbols().symbol(op.name()).to_string();
            if !name.ends_with("-01") {
                continue;
            }
            let base = match nd_operator_base(&name) {
                Some(b) => b.to_string(),
                None => continue,
            };
            let rel = table.symbols_mut().intern(&format!("check-{base}"));
            checkers.push(HtnMethod::new(
                Pred::new(rel, op.params().iter().copied()),
                op.effects.clone(),
                Vec::new(),
            ));
        }

        for mut checker in checkers {
            let mut duplicate = false;
            for i in 0..domain.methods.len() {
                if domain.methods[i].subsumes(&checker, table)?
                    && checker.subsumes(&domain.methods[i], table)?
                {
                    duplicate = true;
                    break;
                }
            }
            if !duplicate {
                if domain.requirements.contains(Requirements::METHOD_IDS) {
                    checker.id = self.next_id();
                }
                domain.add_method(checker);
            }
        }
        Ok(())
    }

    /// When the action ending at `action + 1` is a determinised operator
    /// other than the desired `-01` outcome, learns a checker method
    /// regressing from the first later state where the desired outcome
    /// holds.
    fn learn_nd_checkers(
        &mut self,
        action: usize,
        plan: &AnnotatedPlan,
        domain: &mut HtnDomain,
        table: &mut TermTable,
    ) -> Result<()> {
        let op = plan.plan.operator(action)?;
        let name = table.symbols().symbol(op.name()).to_string();
        if nd_operator_base(&name).is_none() || name.ends_with("-01") {
            return Ok(());
        }
        let base = &name[..name.len() - 3];

        let desired = domain
            .operators
            .iter()
            .find(|o| {
                let other = table.symbols().symbol(o.name());
                other.len() == name.len() && other.starts_with(base) && other.ends_with("-01")
            })
            .cloned()
            .ok_or_else(|| {
                crate::errors::EngineError::NotImplemented(format!(
                    "operator {name} has no desired version"
                ))
            })?;

        let desired_effects = desired.effects.apply(plan.plan.substitution(action)?)?;
        for i in action + 2..=plan.plan.plan_length() {
            if plan.plan.state(i)?.is_consistent(&desired_effects) {
                self.learn_one_nd_checker(action + 1, i, &desired, plan, domain, table)?;
                break;
            }
        }
        Ok(())
    }

    fn learn_one_nd_checker(
        &mut self,
        init: usize,
        final_state: usize,
        desired: &crate::domain::Operator,
        plan: &AnnotatedPlan,
        domain: &mut HtnDomain,
        table: &mut TermTable,
    ) -> Result<()> {
        let name = table.symbols().symbol(desired.name()).to_string();
        let base = match nd_operator_base(&name) {
            Some(b) => b.to_string(),
            None => return Ok(()),
        };
        let rel = table.symbols_mut().intern(&format!("check-{base}"));

        // the checker's target: no preconditions, and the positive effects
        // of the desired outcome
        let positive: Vec<Formula> = desired
            .effects
            .conjuncts()
            .filter(|e| matches!(e, Formula::Pred(_)))
            .cloned()
            .collect();
        let task = Arc::new(HtnTaskDescr {
            head: Pred::new(rel, desired.params().iter().copied()),
            preconditions: Formula::empty_conj(),
            effects: Formula::conj(positive),
        });

        let seed = plan.plan.substitution(init - 1)?.clone();
        let mut cur = PartialHtnMethod::new(task, &seed, final_state, table)?;
        cur.get_new_task_vars(table)?;
        cur.mark_method_start(init);

        while cur.current_index() > init {
            let step = cur.current_index() - 1;
            let op = plan.plan.operator(step)?.clone();
            let op_sub = plan.plan.substitution(step)?.clone();
            let op_effects = op.effects.apply(&op_sub)?;
            if cur.supplies_prec(&op_effects)? || cur.supplies_effect(&op_effects)? {
                cur.add_operator(&op, &op_sub, step, self.opts.partial_generalization, table)?;
            } else if cur.current_index() == final_state {
                while cur.current_index() > init {
                    cur.advance();
                }
            } else {
                cur.advance();
            }
        }

        if !cur.remaining_add_satisfied(plan.plan.state(init)?)? {
            return Ok(());
        }
        let mut new_method =
            cur.create_method(false, self.opts.partial_generalization, false, table)?;
        new_method.add_nd_checkers(table);
        if domain.requirements.contains(Requirements::METHOD_IDS) {
            new_method.id = self.next_id();
        }
        if !self.opts.no_subsumption {
            self.do_subsumption(domain, new_method, table)?;
        } else {
            domain.add_method(new_method);
        }
        Ok(())
    }
}

// integration-style scenario tests live with the driver
#[cfg(test)]
mod tests;
