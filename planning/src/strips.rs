//! Classical STRIPS problems and recorded plan traces.

use crate::domain::HtnDomain;
use crate::domain::Requirements;
use crate::errors::{EngineError, Result};
use crate::formula::{Formula, Pred};
use crate::state::State;
use crate::substitution::Substitution;
use crate::terms::TermTable;
use std::sync::Arc;

/// A classical planning problem over a (method-free) domain.
#[derive(Clone, Debug)]
pub struct StripsProblem {
    pub domain: Arc<HtnDomain>,
    pub name: String,
    pub requirements: Requirements,
    pub init: State,
    pub goal: Formula,
}

/// A plan trace: a sequence of ground actions replayed from the initial
/// state, with every intermediate state retained. State `i` is the state
/// before action `i`; the final state has index `plan_length()`.
#[derive(Clone, Debug)]
pub struct StripsSolution {
    pub problem: Arc<StripsProblem>,
    steps: Vec<(usize, Substitution)>,
    states: Vec<State>,
}

impl StripsSolution {
    /// Replays `plan` (ground actions) against the problem, checking each
    /// action applicable in turn.
    pub fn new(problem: Arc<StripsProblem>, plan: &[Pred], table: &TermTable) -> Result<StripsSolution> {
        let mut states = Vec::with_capacity(plan.len() + 1);
        let mut current = problem.init.clone();
        let mut steps = Vec::with_capacity(plan.len());

        for action in plan {
            let (op_index, op) = problem
                .domain
                .operator_named(action.rel)
                .ok_or_else(|| {
                    EngineError::OperatorNotApplicable(
                        table.symbols().symbol(action.rel).to_string(),
                    )
                })?;
            if op.params().len() != action.valence() {
                return Err(EngineError::OperatorNotApplicable(
                    table.symbols().symbol(action.rel).to_string(),
                ));
            }
            let mut sub = Substitution::new();
            for (&param, &value) in op.params().iter().zip(&action.args) {
                sub.add_pair(param, value)?;
            }
            let next = current.next_state(op, &sub, table)?;
            states.push(current);
            current = next;
            steps.push((op_index, sub));
        }
        states.push(current);

        Ok(StripsSolution {
            problem,
            steps,
            states,
        })
    }

    pub fn plan_length(&self) -> usize {
        self.steps.len()
    }

    pub fn state(&self, index: usize) -> Result<&State> {
        self.states.get(index).ok_or(EngineError::IndexOutOfBounds {
            index,
            len: self.states.len(),
        })
    }

    pub fn operator(&self, index: usize) -> Result<&crate::domain::Operator> {
        let (op_index, _) = self.steps.get(index).ok_or(EngineError::IndexOutOfBounds {
            index,
            len: self.steps.len(),
        })?;
        Ok(&self.problem.domain.operators[*op_index])
    }

    pub fn substitution(&self, index: usize) -> Result<&Substitution> {
        self.steps
            .get(index)
            .map(|(_, sub)| sub)
            .ok_or(EngineError::IndexOutOfBounds {
                index,
                len: self.steps.len(),
            })
    }
}
