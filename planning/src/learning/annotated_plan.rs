//! A plan trace enriched with the method instantiations that are known to
//! cover contiguous chunks of it.

use crate::domain::{HtnMethod, HtnTaskDescr};
use crate::errors::Result;
use crate::formula::Formula;
use crate::strips::StripsSolution;
use crate::substitution::Substitution;
use crate::terms::TermTable;

/// One recorded coverage: a method, the substitution that grounds it, the
/// plan range it spans, and the annotated task it accomplishes.
#[derive(Clone, Debug)]
pub struct MethodInst {
    pub method: HtnMethod,
    pub sub: Substitution,
    pub before: usize,
    pub after: usize,
    pub task: HtnTaskDescr,
    pub effects: Formula,
    pub cost: f64,
}

/// A ground plan plus the methods learned (or already known) to subsume
/// contiguous ranges of it. This is what the learner mines for sub-method
/// relationships.
#[derive(Clone, Debug)]
pub struct AnnotatedPlan {
    pub plan: StripsSolution,
    insts: Vec<MethodInst>,
}

impl AnnotatedPlan {
    pub fn new(plan: StripsSolution) -> AnnotatedPlan {
        AnnotatedPlan {
            plan,
            insts: Vec::new(),
        }
    }

    pub fn methods(&self) -> &[MethodInst] {
        &self.insts
    }

    /// Records a method instantiation. Everything is stored under fresh
    /// `?old_*` variables so that recorded instances never collide with the
    /// variables of partial methods built later.
    #[allow(clippy::too_many_arguments)]
    pub fn add_method_inst(
        &mut self,
        method: &HtnMethod,
        sub: &Substitution,
        before: usize,
        after: usize,
        task: &HtnTaskDescr,
        effects: &Formula,
        cost: f64,
        table: &mut TermTable,
    ) -> Result<()> {
        let mut change_of_vars = Substitution::new();
        let mut new_sub = Substitution::new();
        for (var, value) in sub.iter() {
            let fresh = table.fresh_old(table.typing(var));
            change_of_vars.add_pair(var, fresh)?;
            new_sub.add_pair(fresh, value)?;
        }

        self.insts.push(MethodInst {
            method: method.after_substitution(&change_of_vars)?,
            sub: new_sub,
            before,
            after,
            task: task.apply(&change_of_vars)?,
            effects: effects.apply(&change_of_vars)?,
            cost,
        });
        Ok(())
    }
}
