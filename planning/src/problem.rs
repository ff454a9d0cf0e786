//! HTN problems and (partial) solutions.

use crate::domain::{HtnDomain, Requirements};
use crate::errors::{EngineError, Result};
use crate::formula::Pred;
use crate::state::State;
use crate::substitution::Substitution;
use crate::terms::TermTable;
use std::sync::Arc;

/// An HTN planning problem: an initial state and a list of tasks to
/// accomplish. The task list is stored in reverse order, so the next task to
/// decompose is at the back.
#[derive(Clone, Debug)]
pub struct HtnProblem {
    pub domain: Arc<HtnDomain>,
    pub name: String,
    pub requirements: Requirements,
    pub state: State,
    pub outstanding: Vec<Pred>,
}

impl HtnProblem {
    pub fn top_task(&self) -> Result<&Pred> {
        self.outstanding.last().ok_or(EngineError::IndexOutOfBounds {
            index: 0,
            len: 0,
        })
    }
}

/// A node of the decomposition forest: the ground task, plus the id of the
/// method that decomposed it (absent for primitive leaves).
#[derive(Clone, Debug)]
pub struct DecompNode {
    pub task: Pred,
    pub method_id: Option<String>,
    pub children: Vec<usize>,
}

/// A solution under construction (or completed): the current state and task
/// stack, the actions applied so far with their groundings, and the
/// decomposition forest built along the way.
#[derive(Clone, Debug)]
pub struct HtnSolution {
    pub domain: Arc<HtnDomain>,
    pub name: String,
    pub requirements: Requirements,
    pub state: State,
    pub outstanding: Vec<Pred>,
    pub init_state: State,
    pub steps: Vec<(usize, Substitution)>,
    pub num_decomps: u32,
    nodes: Vec<DecompNode>,
    roots: Vec<usize>,
    /// for each outstanding task, the node that spawned it (None for
    /// top-level tasks)
    parents: Vec<Option<usize>>,
}

impl HtnSolution {
    /// A blank slate on which a solution to `problem` may be constructed.
    pub fn from_problem(problem: &HtnProblem) -> HtnSolution {
        HtnSolution {
            domain: problem.domain.clone(),
            name: problem.name.clone(),
            requirements: problem.requirements,
            state: problem.state.clone(),
            outstanding: problem.outstanding.clone(),
            init_state: problem.state.clone(),
            steps: Vec::new(),
            num_decomps: 0,
            nodes: Vec::new(),
            roots: Vec::new(),
            parents: vec![None; problem.outstanding.len()],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn plan_length(&self) -> usize {
        self.steps.len()
    }

    pub fn top_task(&self) -> Result<&Pred> {
        self.outstanding.last().ok_or(EngineError::IndexOutOfBounds {
            index: 0,
            len: 0,
        })
    }

    pub fn step(&self, index: usize) -> Result<&(usize, Substitution)> {
        self.steps.get(index).ok_or(EngineError::IndexOutOfBounds {
            index,
            len: self.steps.len(),
        })
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, index: usize) -> &DecompNode {
        &self.nodes[index]
    }

    fn attach(&mut self, node: DecompNode) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        match self.parents.last().copied().flatten() {
            Some(parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    /// Applies an operator of the domain to the task at the top of the
    /// stack. The operator name must match the task and its preconditions
    /// must hold under the grounding.
    pub fn apply_operator(
        &mut self,
        op_index: usize,
        sub: &Substitution,
        table: &TermTable,
    ) -> Result<()> {
        let op = &self.domain.operators[op_index];
        let task = self.top_task()?.clone();
        if op.name() != task.rel {
            return Err(EngineError::OperatorNotApplicable(
                table.symbols().symbol(op.name()).to_string(),
            ));
        }
        self.state = self.state.next_state(op, sub, table)?;
        self.steps.push((op_index, sub.clone()));

        self.attach(DecompNode {
            task,
            method_id: None,
            children: Vec::new(),
        });
        self.outstanding.pop();
        self.parents.pop();
        Ok(())
    }

    /// Applies a method of the domain to the task at the top of the stack:
    /// the task is replaced by the method's subtasks, pushed in reverse order
    /// so the first subtask ends up on top.
    pub fn apply_method(
        &mut self,
        method_index: usize,
        sub: &Substitution,
        table: &TermTable,
    ) -> Result<()> {
        self.num_decomps += 1;
        let method = &self.domain.methods[method_index];
        let head = method.head.apply(sub)?;
        let task = self.top_task()?;
        if head != *task {
            return Err(EngineError::MethodNotApplicable(format!(
                "head {} does not match task {}",
                head.display(table),
                task.display(table),
            )));
        }
        let precs = method.preconditions.apply(sub)?;
        if !self.state.is_consistent(&precs) {
            return Err(EngineError::MethodNotApplicable(format!(
                "preconditions of {} are not satisfied",
                head.display(table),
            )));
        }

        let mut subtasks = Vec::with_capacity(method.subtasks.len());
        for subtask in &method.subtasks {
            subtasks.push(subtask.apply(sub)?);
        }
        let id = if method.id.is_empty() {
            None
        } else {
            Some(method.id.clone())
        };

        let node = self.attach(DecompNode {
            task: head,
            method_id: id,
            children: Vec::new(),
        });
        self.outstanding.pop();
        self.parents.pop();
        while let Some(subtask) = subtasks.pop() {
            self.outstanding.push(subtask);
            self.parents.push(Some(node));
        }
        Ok(())
    }

    /// Full-equivalence check used by loop detection: same requirements,
    /// state, name and outstanding task stack.
    pub fn equivalent(&self, other: &HtnSolution) -> bool {
        self.requirements == other.requirements
            && self.outstanding.len() == other.outstanding.len()
            && self.state == other.state
            && self.name == other.name
            && self.outstanding == other.outstanding
    }
}
