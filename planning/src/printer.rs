//! PDDL rendering of domains, problems and solutions.
//!
//! The output is designed to read back through [`crate::parsing`] into a
//! structurally equivalent value.

use crate::domain::{HtnDomain, HtnMethod, Operator, Requirements};
use crate::problem::{HtnProblem, HtnSolution};
use crate::state::State;
use crate::terms::{Term, TermTable};
use htn_utils::Fmt;
use std::fmt::Display;
use std::fmt::Formatter;

pub fn requirements_to_pddl(reqs: Requirements) -> impl Display {
    Fmt(move |f| {
        write!(f, "( :requirements")?;
        if reqs.contains(Requirements::STRIPS) {
            write!(f, " :strips")?;
        }
        if reqs.contains(Requirements::TYPING) {
            write!(f, " :typing")?;
        }
        if reqs.contains(Requirements::EQUALITY) {
            write!(f, " :equality")?;
        }
        if reqs.contains(Requirements::HTN) {
            write!(f, " :htn")?;
        }
        if reqs.contains(Requirements::METHOD_IDS) {
            write!(f, " :method-ids")?;
        }
        if reqs.contains(Requirements::QVALUES) {
            write!(f, " :q-values")?;
        }
        write!(f, " )")
    })
}

fn write_typed_list(f: &mut Formatter, terms: &[Term], table: &TermTable) -> std::fmt::Result {
    for &t in terms {
        write!(f, " {}", table.display_typed(t))?;
    }
    Ok(())
}

pub fn operator_to_pddl<'a>(op: &'a Operator, table: &'a TermTable) -> impl Display + 'a {
    Fmt(move |f| {
        writeln!(f, "  ( :action {}", table.symbols().symbol(op.name()))?;
        writeln!(f, "    :parameters")?;
        write!(f, "    (")?;
        write_typed_list(f, op.params(), table)?;
        writeln!(f, " )")?;
        writeln!(f, "    :precondition")?;
        writeln!(f, "    {}", op.preconditions.display(table))?;
        writeln!(f, "    :effect")?;
        writeln!(f, "    {}", op.effects.display(table))?;
        if op.cost != 0 {
            writeln!(f, "    :cost ( {} )", op.cost)?;
        }
        writeln!(f, "  )")
    })
}

pub fn method_to_pddl<'a>(
    method: &'a HtnMethod,
    requirements: Requirements,
    table: &'a TermTable,
) -> impl Display + 'a {
    Fmt(move |f| {
        // free variables: anything not bound by the head parameters
        let mut vars: Vec<Term> = Vec::new();
        for v in method.variables() {
            if !method.head.args.contains(&v) && !vars.contains(&v) {
                vars.push(v);
            }
        }

        writeln!(f, "  ( :method {}", table.symbols().symbol(method.head.rel))?;
        writeln!(f, "    :parameters")?;
        write!(f, "    (")?;
        write_typed_list(f, &method.head.args, table)?;
        writeln!(f, " )")?;
        if !vars.is_empty() {
            writeln!(f, "    :vars")?;
            write!(f, "    (")?;
            write_typed_list(f, &vars, table)?;
            writeln!(f, " )")?;
        }
        writeln!(f, "    :precondition")?;
        writeln!(f, "    {}", method.preconditions.display(table))?;
        writeln!(f, "    :subtasks")?;
        if method.subtasks.is_empty() {
            writeln!(f, "    ( )")?;
        } else {
            writeln!(f, "    (")?;
            for task in &method.subtasks {
                writeln!(f, "      {}", task.display(table))?;
            }
            writeln!(f, "    )")?;
        }
        if requirements.contains(Requirements::METHOD_IDS) {
            writeln!(f, "    :id ( {} )", method.id)?;
        }
        if requirements.contains(Requirements::QVALUES) {
            writeln!(f, "    :q-value ( {} )", method.q_value)?;
            writeln!(f, "    :q-count ( {} )", method.q_count)?;
        }
        writeln!(f, "  )")
    })
}

pub fn domain_to_pddl<'a>(domain: &'a HtnDomain, table: &'a TermTable) -> impl Display + 'a {
    Fmt(move |f| {
        writeln!(f, "( define ( domain {} )", domain.name)?;
        writeln!(f, "  {}", requirements_to_pddl(domain.requirements))?;
        if !domain.types.is_empty() {
            write!(f, "  ( :types")?;
            for &tpe in &domain.types {
                write!(f, " {}", table.symbols().symbol(tpe))?;
            }
            writeln!(f, " )")?;
        }
        if !domain.constants.is_empty() {
            write!(f, "  ( :constants")?;
            write_typed_list(f, &domain.constants, table)?;
            writeln!(f, " )")?;
        }
        if !domain.predicates.is_empty() {
            writeln!(f, "  ( :predicates")?;
            for pred in &domain.predicates {
                write!(f, "    ( {}", table.symbols().symbol(pred.rel))?;
                write_typed_list(f, &pred.args, table)?;
                writeln!(f, " )")?;
            }
            writeln!(f, "  )")?;
        }
        for op in &domain.operators {
            write!(f, "{}", operator_to_pddl(op, table))?;
        }
        for method in &domain.methods {
            write!(f, "{}", method_to_pddl(method, domain.requirements, table))?;
        }
        writeln!(f, ")")
    })
}

pub fn state_to_pddl<'a>(state: &'a State, table: &'a TermTable) -> impl Display + 'a {
    Fmt(move |f| {
        writeln!(f, "  ( :init")?;
        for atom in state.iter() {
            writeln!(f, "    {}", atom.display(table))?;
        }
        writeln!(f, "  )")
    })
}

pub fn problem_to_pddl<'a>(problem: &'a HtnProblem, table: &'a TermTable) -> impl Display + 'a {
    Fmt(move |f| {
        writeln!(f, "( define ( htn-problem {} )", problem.name)?;
        writeln!(f, "  ( :domain {} )", problem.domain.name)?;
        writeln!(f, "  {}", requirements_to_pddl(problem.requirements))?;
        write!(f, "{}", state_to_pddl(&problem.state, table))?;
        writeln!(f, "  ( :tasks")?;
        for task in problem.outstanding.iter().rev() {
            writeln!(f, "    {}", task.display(table))?;
        }
        writeln!(f, "  )")?;
        writeln!(f, ")")
    })
}

/// The plan embedded in a solution, one ground action per line.
pub fn solution_plan<'a>(solution: &'a HtnSolution, table: &'a TermTable) -> impl Display + 'a {
    Fmt(move |f| {
        for index in 0..solution.plan_length() {
            let (op_index, sub) = match solution.step(index) {
                Ok(step) => step,
                Err(_) => return Err(std::fmt::Error),
            };
            let op = &solution.domain.operators[*op_index];
            let head = op.head.apply(sub).map_err(|_| std::fmt::Error)?;
            writeln!(f, "\t{}", head.display(table))?;
        }
        Ok(())
    })
}

/// The decomposition forest of a solution, one tree per top-level task.
pub fn decomposition_trace<'a>(solution: &'a HtnSolution, table: &'a TermTable) -> impl Display + 'a {
    fn print_node(
        f: &mut Formatter,
        solution: &HtnSolution,
        index: usize,
        indent: &str,
        table: &TermTable,
    ) -> std::fmt::Result {
        let node = solution.node(index);
        write!(f, "{indent}{}", node.task.display(table))?;
        if let Some(id) = &node.method_id {
            write!(f, " [{id}]")?;
        }
        writeln!(f)?;
        if !node.children.is_empty() {
            writeln!(f, "{indent}{{")?;
            let deeper = format!("{indent}  ");
            for &child in &node.children {
                print_node(f, solution, child, &deeper, table)?;
            }
            writeln!(f, "{indent}}}")?;
        }
        Ok(())
    }

    Fmt(move |f| {
        for &root in solution.roots() {
            print_node(f, solution, root, "", table)?;
        }
        Ok(())
    })
}
