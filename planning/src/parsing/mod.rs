//! Readers for the PDDL-like and SHOP surface syntaxes.

pub mod sexpr;

use crate::domain::{HtnDomain, HtnMethod, HtnTaskDescr, Operator, Requirements, TaskList, Q_UNSET};
use crate::formula::{Formula, Pred};
use crate::problem::HtnProblem;
use crate::state::State;
use crate::strips::StripsProblem;
use crate::terms::{Term, TermTable};
use anyhow::{Context, Result};
use htn_utils::input::{ErrLoc, Input};
use sexpr::{ListIter, SAtom, SExpr};
use std::collections::HashMap;
use std::sync::Arc;

pub fn parse_htn_domain(input: Input, table: &mut TermTable) -> Result<HtnDomain> {
    let expr = sexpr::parse(input)?;
    read_domain(&expr, true, table).context("Invalid HTN domain")
}

pub fn parse_strips_domain(input: Input, table: &mut TermTable) -> Result<HtnDomain> {
    let expr = sexpr::parse(input)?;
    read_domain(&expr, false, table).context("Invalid STRIPS domain")
}

pub fn parse_htn_problem(
    input: Input,
    domain: &Arc<HtnDomain>,
    table: &mut TermTable,
) -> Result<HtnProblem> {
    let expr = sexpr::parse(input)?;
    read_htn_problem(&expr, domain, table).context("Invalid HTN problem")
}

pub fn parse_strips_problem(
    input: Input,
    domain: &Arc<HtnDomain>,
    table: &mut TermTable,
) -> Result<StripsProblem> {
    let expr = sexpr::parse(input)?;
    read_strips_problem(&expr, domain, table).context("Invalid STRIPS problem")
}

pub fn parse_task_list(input: Input, domain: &HtnDomain, table: &mut TermTable) -> Result<TaskList> {
    let expr = sexpr::parse(input)?;
    read_task_list(&expr, domain, table).context("Invalid tasks file")
}

/// Parses a plan file: a parenthesised sequence of ground actions.
pub fn parse_plan(input: Input, table: &mut TermTable) -> Result<Vec<Pred>> {
    let expr = sexpr::parse(input)?;
    read_plan(&expr, table).context("Invalid plan file")
}

pub fn parse_shop_domain(input: Input, table: &mut TermTable) -> Result<HtnDomain> {
    let expr = sexpr::parse(input)?;
    read_shop_domain(&expr, table).context("Invalid SHOP domain")
}

pub fn parse_shop_problem(
    input: Input,
    domain: &Arc<HtnDomain>,
    table: &mut TermTable,
) -> Result<HtnProblem> {
    let expr = sexpr::parse(input)?;
    read_shop_problem(&expr, domain, table).context("Invalid SHOP problem")
}

/// Names with their optional types, as declared in a `:parameters`-style
/// list.
type TypeScope = HashMap<String, String>;

/// Consume a typed list of symbols:
///  - `(a - loc b - loc)`: symbols a and b of type loc
///  - `(a b - loc)`: both of type loc
///  - `(a b)`: untyped
fn consume_typed_symbols<'a>(
    input: &mut ListIter<'a>,
) -> std::result::Result<Vec<(&'a SAtom, Option<&'a SAtom>)>, ErrLoc> {
    let mut symbols = Vec::with_capacity(input.len());
    let mut untyped: Vec<&SAtom> = Vec::new();
    while !input.is_empty() {
        let next = input.pop_atom()?;
        if next.as_str() == "-" {
            let tpe = input.pop_atom()?;
            for sym in untyped.drain(..) {
                symbols.push((sym, Some(tpe)));
            }
        } else {
            untyped.push(next);
        }
    }
    for sym in untyped {
        symbols.push((sym, None));
    }
    Ok(symbols)
}

fn read_term(
    atom: &SAtom,
    scope: &TypeScope,
    table: &mut TermTable,
) -> std::result::Result<Term, ErrLoc> {
    let tpe = scope.get(atom.as_str()).map(|s| s.as_str());
    table
        .intern(atom.as_str(), tpe)
        .map_err(|e| atom.invalid(e.to_string()))
}

/// Reads one atom of the fragment: a predicate, `(= a b)`, or the negation
/// of either. When `declared` is non-empty, predicates must match a declared
/// schema in name, arity and typing.
fn read_atom(
    expr: &SExpr,
    scope: &TypeScope,
    declared: &[Pred],
    table: &mut TermTable,
) -> std::result::Result<Formula, ErrLoc> {
    let mut list = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list"))?;
    let head = list.pop_atom()?;
    match head.as_str() {
        "not" => {
            let inner = list.pop().map_err(|e| e.with_error("Expected a formula to negate"))?;
            let inner = read_atom(inner, scope, declared, table)?;
            if !matches!(inner, Formula::Pred(_) | Formula::Equ(_, _)) {
                return Err(expr.invalid("Only predicates and equalities may be negated"));
            }
            if !list.is_empty() {
                return Err(list.invalid("Unexpected extra arguments to `not`"));
            }
            Ok(Formula::neg(inner))
        }
        "=" => {
            let a = read_term(list.pop_atom()?, scope, table)?;
            let b = read_term(list.pop_atom()?, scope, table)?;
            if !list.is_empty() {
                return Err(list.invalid("An equality takes exactly two terms"));
            }
            Ok(Formula::Equ(a, b))
        }
        _ => {
            let rel = table.symbols_mut().intern(head.as_str());
            let mut args = Vec::new();
            for arg in list {
                let atom = arg
                    .as_atom()
                    .ok_or_else(|| arg.invalid("Expected a term"))?;
                args.push(read_term(atom, scope, table)?);
            }
            let pred = Pred::new(rel, args);
            if !declared.is_empty() {
                let schema = declared
                    .iter()
                    .find(|p| p.rel == rel)
                    .ok_or_else(|| head.invalid("Predicate does not match any declared one"))?;
                if schema.valence() != pred.valence() {
                    return Err(head.invalid(format!(
                        "Predicate has {} arguments but was declared with {}",
                        pred.valence(),
                        schema.valence()
                    )));
                }
                for (&mine, &decl) in pred.args.iter().zip(&schema.args) {
                    if table.typing(mine) != table.typing(decl) {
                        return Err(head.invalid(
                            "Predicate arguments do not have the declared typing",
                        ));
                    }
                }
            }
            Ok(Formula::Pred(pred))
        }
    }
}

/// Reads a conjunction: `( )`, `(and atoms...)` or an implicit `(atoms...)`.
fn read_conj(
    expr: &SExpr,
    scope: &TypeScope,
    declared: &[Pred],
    table: &mut TermTable,
) -> std::result::Result<Formula, ErrLoc> {
    let list = expr
        .as_list()
        .ok_or_else(|| expr.invalid("Expected a conjunction"))?;
    if list.is_empty() {
        return Ok(Formula::empty_conj());
    }
    let mut children = Vec::new();
    match &list[0] {
        SExpr::Atom(a) if a.as_str() == "and" => {
            let mut iter = list.iter();
            let _ = iter.pop();
            for child in iter {
                children.push(read_atom(child, scope, declared, table)?);
            }
        }
        SExpr::Atom(a) => {
            return Err(a.invalid("Expected `and` or a list of atoms"));
        }
        SExpr::List(_) => {
            for child in list.iter() {
                children.push(read_atom(child, scope, declared, table)?);
            }
        }
    }
    Ok(Formula::conj(children))
}

/// Reads a task head `(name terms...)`.
fn read_task_head(
    expr: &SExpr,
    scope: &TypeScope,
    table: &mut TermTable,
) -> std::result::Result<Pred, ErrLoc> {
    let mut list = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a task"))?;
    let name = list.pop_atom()?;
    let rel = table.symbols_mut().intern(name.as_str());
    let mut args = Vec::new();
    for arg in list {
        let atom = arg.as_atom().ok_or_else(|| arg.invalid("Expected a term"))?;
        args.push(read_term(atom, scope, table)?);
    }
    Ok(Pred::new(rel, args))
}

fn read_requirements(
    mut input: ListIter,
    allow_htn: bool,
) -> std::result::Result<Requirements, ErrLoc> {
    const UNSUPPORTED: &[&str] = &[
        ":negative-preconditions",
        ":disjunctive-preconditions",
        ":existential-preconditions",
        ":universal-preconditions",
        ":quantified-preconditions",
        ":conditional-effects",
        ":fluents",
        ":adl",
        ":durative-actions",
        ":derived-predicates",
        ":timed-initial-literals",
        ":preferences",
        ":constraints",
    ];
    let mut reqs = Requirements::default();
    while !input.is_empty() {
        let flag = input.pop_atom()?;
        match flag.as_str() {
            ":strips" => reqs.insert(Requirements::STRIPS),
            ":typing" => reqs.insert(Requirements::TYPING),
            ":equality" => reqs.insert(Requirements::EQUALITY),
            ":htn" | ":method-ids" | ":q-values" if !allow_htn => {
                return Err(flag.invalid(format!(
                    "The {} requirement is not supported for STRIPS domains.",
                    flag.as_str()
                )));
            }
            ":htn" => reqs.insert(Requirements::HTN),
            ":method-ids" => reqs.insert(Requirements::METHOD_IDS),
            ":q-values" => reqs.insert(Requirements::QVALUES),
            other if UNSUPPORTED.contains(&other) => {
                return Err(flag.invalid(format!("The {other} requirement is not supported.")));
            }
            other => {
                return Err(flag.invalid(format!("Unknown PDDL requirement {other}.")));
            }
        }
    }
    Ok(reqs)
}

fn typing_active(domain: &HtnDomain) -> bool {
    domain.requirements.contains(Requirements::TYPING)
}

/// Reads typed parameters into the scope, enforcing the typing discipline of
/// the domain: types everywhere when `:typing` is declared, nowhere
/// otherwise.
fn read_parameters(
    list: &sexpr::SList,
    domain: &HtnDomain,
    scope: &mut TypeScope,
    table: &mut TermTable,
) -> std::result::Result<Vec<Term>, ErrLoc> {
    read_parameters_of_iter(&mut list.iter(), domain, scope, table)
}

fn read_action(
    feature: &sexpr::SList,
    domain: &HtnDomain,
    table: &mut TermTable,
) -> std::result::Result<Operator, ErrLoc> {
    let mut iter = feature.iter();
    iter.pop_known_atom(":action")?;
    let name = iter.pop_atom()?;

    let mut scope = TypeScope::new();
    let mut params: Option<Vec<Term>> = None;
    let mut preconditions: Option<Formula> = None;
    let mut effects: Option<Formula> = None;
    let mut cost = 0u32;

    while let Some(next) = iter.next() {
        let key = next.as_atom().ok_or_else(|| next.invalid("Expected a keyword"))?;
        match key.as_str() {
            ":parameters" => {
                if params.is_some() {
                    return Err(key.invalid("An action may not have multiple parameter lists"));
                }
                let list = iter.pop_list()?;
                params = Some(read_parameters(list, domain, &mut scope, table)?);
            }
            ":precondition" => {
                if preconditions.is_some() {
                    return Err(key.invalid("An action may not have multiple precondition blocks"));
                }
                preconditions = Some(read_conj(iter.pop()?, &scope, &domain.predicates, table)?);
            }
            ":effect" => {
                if effects.is_some() {
                    return Err(key.invalid("An action may not have multiple effect blocks"));
                }
                effects = Some(read_conj(iter.pop()?, &scope, &domain.predicates, table)?);
            }
            ":cost" => {
                let mut list = iter.pop_list()?.iter();
                let value = list.pop_atom()?;
                cost = value
                    .as_str()
                    .parse()
                    .map_err(|_| value.invalid("Expected a non-negative integer cost"))?;
            }
            other => {
                return Err(key.invalid(format!("Unknown action feature {other}")));
            }
        }
    }

    let params = params.ok_or_else(|| feature.invalid("Each action must have a parameters block"))?;
    let preconditions =
        preconditions.ok_or_else(|| feature.invalid("Each action must have a precondition block"))?;
    let effects = effects.ok_or_else(|| feature.invalid("Each action must have an effect block"))?;

    Ok(Operator {
        head: Pred::new(table.symbols_mut().intern(name.as_str()), params),
        preconditions,
        effects,
        cost,
    })
}

fn read_method(
    feature: &sexpr::SList,
    domain: &HtnDomain,
    table: &mut TermTable,
) -> std::result::Result<HtnMethod, ErrLoc> {
    let mut iter = feature.iter();
    iter.pop_known_atom(":method")?;
    let name = iter.pop_atom()?;

    let mut scope = TypeScope::new();
    let mut params: Option<Vec<Term>> = None;
    let mut preconditions: Option<Formula> = None;
    let mut subtasks: Option<Vec<Pred>> = None;
    let mut has_vars = false;
    let mut id = String::new();
    let mut q_value = Q_UNSET;
    let mut q_count = 0u32;

    while let Some(next) = iter.next() {
        let key = next.as_atom().ok_or_else(|| next.invalid("Expected a keyword"))?;
        match key.as_str() {
            ":parameters" => {
                if params.is_some() {
                    return Err(key.invalid("A method may not have multiple parameter lists"));
                }
                let list = iter.pop_list()?;
                params = Some(read_parameters(list, domain, &mut scope, table)?);
            }
            ":vars" => {
                if has_vars {
                    return Err(key.invalid("A method may not have multiple vars blocks"));
                }
                if preconditions.is_some() || subtasks.is_some() {
                    return Err(key.invalid(
                        "The vars block of a method must come before the precondition and subtasks blocks",
                    ));
                }
                has_vars = true;
                let list = iter.pop_list()?;
                read_parameters(list, domain, &mut scope, table)?;
            }
            ":precondition" => {
                if preconditions.is_some() {
                    return Err(key.invalid("A method may not have multiple precondition blocks"));
                }
                preconditions = Some(read_conj(iter.pop()?, &scope, &domain.predicates, table)?);
            }
            ":subtasks" => {
                if subtasks.is_some() {
                    return Err(key.invalid("A method may not have multiple subtask blocks"));
                }
                let list = iter.pop_list()?;
                let mut tasks = Vec::with_capacity(list.len());
                for task in list.iter() {
                    tasks.push(read_task_head(task, &scope, table)?);
                }
                subtasks = Some(tasks);
            }
            ":id" => {
                if !id.is_empty() {
                    return Err(key.invalid("A method may not have multiple id blocks"));
                }
                if !domain.requirements.contains(Requirements::METHOD_IDS) {
                    return Err(key.invalid(
                        "Attempt to use a method ID without declaring the :method-ids PDDL requirement",
                    ));
                }
                let mut list = iter.pop_list()?.iter();
                id = list.pop_atom()?.as_str().to_string();
            }
            ":q-value" => {
                if !domain.requirements.contains(Requirements::QVALUES) {
                    return Err(key.invalid(
                        "Attempt to use a method Q-value without declaring the :q-values PDDL requirement",
                    ));
                }
                let mut list = iter.pop_list()?.iter();
                let value = list.pop_atom()?;
                q_value = value
                    .as_str()
                    .parse()
                    .map_err(|_| value.invalid("Expected a numeric q-value"))?;
            }
            ":q-count" => {
                if !domain.requirements.contains(Requirements::QVALUES) {
                    return Err(key.invalid(
                        "Attempt to use a method Q-value counter without declaring the :q-values PDDL requirement",
                    ));
                }
                let mut list = iter.pop_list()?.iter();
                let value = list.pop_atom()?;
                q_count = value
                    .as_str()
                    .parse()
                    .map_err(|_| value.invalid("Expected an integer q-count"))?;
            }
            other => {
                return Err(key.invalid(format!("Unknown method feature {other}")));
            }
        }
    }

    let params = params.ok_or_else(|| feature.invalid("Each method must have a parameters block"))?;
    let preconditions =
        preconditions.ok_or_else(|| feature.invalid("Each method must have a precondition block"))?;
    let subtasks = subtasks.ok_or_else(|| feature.invalid("Each method must have a subtasks block"))?;

    let mut method = HtnMethod::new(
        Pred::new(table.symbols_mut().intern(name.as_str()), params),
        preconditions,
        subtasks,
    );
    method.id = id;
    method.q_value = q_value;
    method.q_count = q_count;
    Ok(method)
}

fn read_domain(
    expr: &SExpr,
    allow_htn: bool,
    table: &mut TermTable,
) -> std::result::Result<HtnDomain, ErrLoc> {
    let mut iter = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list"))?;
    iter.pop_known_atom("define")?;

    let mut name_decl = iter.pop_list()?.iter();
    name_decl.pop_known_atom("domain")?;
    let name = name_decl.pop_atom()?;

    let mut domain = HtnDomain {
        name: name.as_str().to_string(),
        requirements: if allow_htn {
            Requirements::STRIPS.union(Requirements::HTN)
        } else {
            Requirements::STRIPS
        },
        ..Default::default()
    };

    let mut has_requirements = false;
    let mut has_types = false;
    let mut has_constants = false;
    let mut has_predicates = false;
    let mut has_actions = false;

    for feature in iter {
        let list = feature
            .as_list()
            .ok_or_else(|| feature.invalid("Expected a feature list"))?;
        let mut peek = list.iter();
        let key = peek.pop_atom()?;
        match key.as_str() {
            ":requirements" => {
                if has_requirements {
                    return Err(key.invalid("A PDDL domain may not have multiple requirements blocks"));
                }
                if has_types || has_constants || has_predicates || has_actions {
                    return Err(key.invalid("The PDDL requirements block must come first"));
                }
                has_requirements = true;
                domain.requirements = read_requirements(peek, allow_htn)?;
            }
            ":types" => {
                if has_types {
                    return Err(key.invalid("A PDDL domain may not have multiple types blocks"));
                }
                if has_constants || has_predicates || has_actions {
                    return Err(key.invalid(
                        "The PDDL types block must come before constants, predicates and actions",
                    ));
                }
                if !domain.requirements.contains(Requirements::TYPING) {
                    return Err(key.invalid("The PDDL types block requires the :typing requirement"));
                }
                has_types = true;
                for tpe in peek {
                    let atom = tpe.as_atom().ok_or_else(|| tpe.invalid("Expected a type name"))?;
                    domain.types.insert(table.symbols_mut().intern(atom.as_str()));
                }
            }
            ":constants" => {
                if has_constants {
                    return Err(key.invalid("A PDDL domain may not have multiple constants blocks"));
                }
                if has_predicates || has_actions {
                    return Err(key.invalid(
                        "The PDDL constants block must come before predicates and actions",
                    ));
                }
                has_constants = true;
                let mut scope = TypeScope::new();
                let symbols = consume_typed_symbols(&mut peek)?;
                for (sym, tpe) in symbols {
                    match tpe {
                        Some(tpe) if !typing_active(&domain) => {
                            return Err(tpe.invalid("Typed constant without the :typing requirement"));
                        }
                        None if typing_active(&domain) => {
                            return Err(sym.invalid("Missing type with the :typing requirement"));
                        }
                        Some(tpe) => {
                            let tpe_sym = table.symbols_mut().intern(tpe.as_str());
                            if !domain.types.contains(&tpe_sym) {
                                return Err(tpe.invalid("Attempt to use an unregistered type"));
                            }
                            scope.insert(sym.as_str().to_string(), tpe.as_str().to_string());
                        }
                        None => {}
                    }
                    let term = read_term(sym, &scope, table)?;
                    if domain.constants.contains(&term) {
                        return Err(sym.invalid("A constant may not be declared twice"));
                    }
                    domain.constants.push(term);
                }
            }
            ":predicates" => {
                if has_predicates {
                    return Err(key.invalid("A PDDL domain may not have multiple predicates blocks"));
                }
                if has_actions {
                    return Err(key.invalid("The PDDL predicates block must come before any actions"));
                }
                has_predicates = true;
                for decl in peek {
                    let mut decl_iter = decl
                        .as_list_iter()
                        .ok_or_else(|| decl.invalid("Expected a predicate declaration"))?;
                    let rel_atom = decl_iter.pop_atom()?;
                    let rel = table.symbols_mut().intern(rel_atom.as_str());
                    if domain.predicates.iter().any(|p| p.rel == rel) {
                        return Err(rel_atom.invalid("A predicate was declared twice"));
                    }
                    let mut scope = TypeScope::new();
                    let args = read_parameters_of_iter(&mut decl_iter, &domain, &mut scope, table)?;
                    domain.predicates.push(Pred::new(rel, args));
                }
            }
            ":action" => {
                has_actions = true;
                domain.add_operator(read_action(list, &domain, table)?);
            }
            ":method" => {
                if !allow_htn {
                    return Err(key.invalid("Methods are not allowed in a STRIPS domain"));
                }
                has_actions = true;
                let method = read_method(list, &domain, table)?;
                domain.add_method(method);
            }
            ":functions" => {
                return Err(key.invalid("Functions are not supported"));
            }
            ":constraints" => {
                return Err(key.invalid("Constraints are not supported"));
            }
            other => {
                return Err(key.invalid(format!("Unrecognized PDDL feature: {other}")));
            }
        }
    }

    if domain.requirements.contains(Requirements::TYPING) && !has_types {
        return Err(expr.invalid("The :typing requirement means that you must have a types block"));
    }

    Ok(domain)
}

/// Like [`read_parameters`] but consuming the remainder of an iterator.
fn read_parameters_of_iter(
    iter: &mut ListIter,
    domain: &HtnDomain,
    scope: &mut TypeScope,
    table: &mut TermTable,
) -> std::result::Result<Vec<Term>, ErrLoc> {
    let symbols = consume_typed_symbols(iter)?;
    let mut params = Vec::with_capacity(symbols.len());
    for (name, tpe) in symbols {
        match tpe {
            Some(tpe) if !typing_active(domain) => {
                return Err(tpe.invalid("Typed term without the :typing requirement"));
            }
            None if typing_active(domain) => {
                return Err(name.invalid("Missing type with the :typing requirement"));
            }
            Some(tpe) => {
                let tpe_sym = table.symbols_mut().intern(tpe.as_str());
                if !domain.types.contains(&tpe_sym) {
                    return Err(tpe.invalid("Attempt to use an unregistered type"));
                }
                if let Some(existing) = scope.get(name.as_str()) {
                    if existing != tpe.as_str() {
                        return Err(name.invalid("Attempt to use a term with multiple types"));
                    }
                } else {
                    scope.insert(name.as_str().to_string(), tpe.as_str().to_string());
                }
            }
            None => {}
        }
        params.push(read_term(name, scope, table)?);
    }
    Ok(params)
}

/// Shared part of problem reading: objects, init and either tasks or a goal.
struct ProblemBody {
    name: String,
    requirements: Requirements,
    init: State,
    tasks: Vec<Pred>,
    goal: Option<Formula>,
}

fn read_problem_body(
    expr: &SExpr,
    kind: &str,
    domain: &HtnDomain,
    table: &mut TermTable,
) -> std::result::Result<ProblemBody, ErrLoc> {
    let mut iter = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list"))?;
    iter.pop_known_atom("define")?;

    let mut name_decl = iter.pop_list()?.iter();
    name_decl.pop_known_atom(kind)?;
    let name = name_decl.pop_atom()?.as_str().to_string();

    let mut domain_decl = iter.pop_list()?.iter();
    domain_decl.pop_known_atom(":domain")?;
    let domain_name = domain_decl.pop_atom()?;
    if domain_name.as_str() != domain.name {
        return Err(domain_name.invalid(format!(
            "The problem file declares domain `{}` but the domain file defines `{}`",
            domain_name.as_str(),
            domain.name
        )));
    }

    let allow_htn = kind == "htn-problem";
    let mut requirements = if allow_htn {
        Requirements::STRIPS.union(Requirements::HTN)
    } else {
        Requirements::STRIPS
    };
    let mut object_scope = TypeScope::new();
    let mut objects: Vec<Term> = Vec::new();
    let mut init: Option<State> = None;
    let mut tasks: Option<Vec<Pred>> = None;
    let mut goal: Option<Formula> = None;

    for feature in iter {
        let list = feature
            .as_list()
            .ok_or_else(|| feature.invalid("Expected a feature list"))?;
        let mut peek = list.iter();
        let key = peek.pop_atom()?;
        match key.as_str() {
            ":requirements" => {
                requirements = read_requirements(peek, allow_htn)?;
            }
            ":objects" => {
                let symbols = consume_typed_symbols(&mut peek)?;
                for (sym, tpe) in symbols {
                    if object_scope.contains_key(sym.as_str()) {
                        return Err(sym.invalid("An object has been declared twice"));
                    }
                    if let Some(tpe) = tpe {
                        object_scope.insert(sym.as_str().to_string(), tpe.as_str().to_string());
                    }
                    // objects must agree with the domain's constants, when any
                    // are declared
                    if !domain.constants.is_empty() {
                        let known = table
                            .symbols()
                            .get(sym.as_str())
                            .and_then(|_| {
                                domain
                                    .constants
                                    .iter()
                                    .find(|&&c| table.name(c) == sym.as_str())
                            })
                            .copied();
                        match known {
                            None => {
                                return Err(sym.invalid(
                                    "Object is not a declared constant in the domain file",
                                ))
                            }
                            Some(c) => {
                                let declared_type =
                                    table.typing(c).map(|t| table.symbols().symbol(t).to_string());
                                if declared_type.as_deref() != tpe.map(|t| t.as_str()) {
                                    return Err(sym.invalid(
                                        "Object is not of the same type as the constant in the domain file",
                                    ));
                                }
                            }
                        }
                    }
                    objects.push(read_term(sym, &object_scope, table)?);
                }
            }
            ":init" => {
                if init.is_some() {
                    return Err(key.invalid("A PDDL problem may not have multiple init blocks"));
                }
                let mut state = State::new(0);
                for atom in peek {
                    let form = read_atom(atom, &object_scope, &domain.predicates, table)?;
                    match form {
                        Formula::Pred(p) => state
                            .add(&p)
                            .map_err(|e| atom.invalid(e.to_string()))?,
                        _ => {
                            return Err(atom.invalid("A state may only contain predicate atoms"))
                        }
                    }
                }
                init = Some(state);
            }
            ":tasks" => {
                if !allow_htn {
                    return Err(key.invalid("A STRIPS problem may not contain a tasks block"));
                }
                if tasks.is_some() {
                    return Err(key.invalid("A PDDL problem may not have multiple task blocks"));
                }
                let mut read = Vec::new();
                for task in peek {
                    read.push(read_task_head(task, &object_scope, table)?);
                }
                tasks = Some(read);
            }
            ":goal" => {
                if allow_htn {
                    return Err(key.invalid("An HTN problem may not contain a goal block"));
                }
                if goal.is_some() {
                    return Err(key.invalid("A PDDL problem may not have multiple goal blocks"));
                }
                goal = Some(read_conj(peek.pop()?, &object_scope, &domain.predicates, table)?);
            }
            ":metric" => {
                return Err(key.invalid("The metric feature of PDDL is not supported"));
            }
            ":constraints" => {
                return Err(key.invalid("The constraints feature of PDDL is not supported"));
            }
            other => {
                return Err(key.invalid(format!("Unknown PDDL feature {other}")));
            }
        }
    }

    let init = init.ok_or_else(|| expr.invalid("A problem file must contain an init block"))?;
    let tasks = match tasks {
        Some(tasks) => tasks,
        None if allow_htn => {
            return Err(expr.invalid("An htn-problem file must contain a tasks block"))
        }
        None => Vec::new(),
    };

    Ok(ProblemBody {
        name,
        requirements,
        init,
        tasks,
        goal,
    })
}

fn read_htn_problem(
    expr: &SExpr,
    domain: &Arc<HtnDomain>,
    table: &mut TermTable,
) -> std::result::Result<HtnProblem, ErrLoc> {
    let body = read_problem_body(expr, "htn-problem", domain, table)?;
    let mut outstanding = body.tasks;
    outstanding.reverse();
    Ok(HtnProblem {
        domain: domain.clone(),
        name: body.name,
        requirements: body.requirements,
        state: body.init,
        outstanding,
    })
}

fn read_strips_problem(
    expr: &SExpr,
    domain: &Arc<HtnDomain>,
    table: &mut TermTable,
) -> std::result::Result<StripsProblem, ErrLoc> {
    let body = read_problem_body(expr, "problem", domain, table)?;
    let goal = body
        .goal
        .ok_or_else(|| expr.invalid("A STRIPS problem must contain a goal block"))?;
    Ok(StripsProblem {
        domain: domain.clone(),
        name: body.name,
        requirements: body.requirements,
        init: body.init,
        goal,
    })
}

fn read_task_list(
    expr: &SExpr,
    domain: &HtnDomain,
    table: &mut TermTable,
) -> std::result::Result<TaskList, ErrLoc> {
    let mut iter = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list"))?;
    iter.pop_known_atom("define")?;

    let mut name_decl = iter.pop_list()?.iter();
    name_decl.pop_known_atom("tasks")?;
    let name = name_decl.pop_atom()?.as_str().to_string();

    let mut tasks = Vec::new();
    for task in iter {
        let mut task_iter = task
            .as_list_iter()
            .ok_or_else(|| task.invalid("Expected a task declaration"))?;
        task_iter.pop_known_atom(":task")?;
        let task_name = task_iter.pop_atom()?;

        task_iter.pop_known_atom(":parameters")?;
        let mut scope = TypeScope::new();
        let params_list = task_iter.pop_list()?;
        let params = read_parameters(params_list, domain, &mut scope, table)?;

        task_iter.pop_known_atom(":precondition")?;
        let preconditions = read_conj(task_iter.pop()?, &scope, &domain.predicates, table)?;

        task_iter.pop_known_atom(":effect")?;
        let effects = read_conj(task_iter.pop()?, &scope, &domain.predicates, table)?;

        tasks.push(Arc::new(HtnTaskDescr {
            head: Pred::new(table.symbols_mut().intern(task_name.as_str()), params),
            preconditions,
            effects,
        }));
    }

    Ok(TaskList { name, tasks })
}

fn read_plan(expr: &SExpr, table: &mut TermTable) -> std::result::Result<Vec<Pred>, ErrLoc> {
    let iter = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list of actions"))?;
    let scope = TypeScope::new();
    let mut actions = Vec::new();
    for action in iter {
        let head = read_task_head(action, &scope, table)?;
        if !head.is_ground() {
            return Err(action.invalid("Plan actions must be ground"));
        }
        actions.push(head);
    }
    Ok(actions)
}

fn read_shop_domain(
    expr: &SExpr,
    table: &mut TermTable,
) -> std::result::Result<HtnDomain, ErrLoc> {
    let mut iter = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list"))?;
    iter.pop_known_atom("defdomain")?;
    let name = iter.pop_atom()?;

    let mut domain = HtnDomain {
        name: name.as_str().to_string(),
        requirements: Requirements::STRIPS.union(Requirements::HTN),
        ..Default::default()
    };

    let scope = TypeScope::new();
    let items = iter.pop_list()?;
    for item in items.iter() {
        let mut item_iter = item
            .as_list_iter()
            .ok_or_else(|| item.invalid("Expected an operator or method"))?;
        let kind = item_iter.pop_atom()?;
        match kind.as_str() {
            ":operator" => {
                let head = read_task_head(item_iter.pop()?, &scope, table)?;
                let preconditions = read_conj(item_iter.pop()?, &scope, &[], table)?;
                // SHOP operators list deletions, then additions
                let deletes = item_iter.pop_list()?;
                let adds = item_iter.pop_list()?;
                let mut effects = Vec::new();
                for del in deletes.iter() {
                    match read_atom(del, &scope, &[], table)? {
                        p @ Formula::Pred(_) => effects.push(Formula::neg(p)),
                        _ => return Err(del.invalid("Expected a predicate in the delete list")),
                    }
                }
                for add in adds.iter() {
                    match read_atom(add, &scope, &[], table)? {
                        p @ Formula::Pred(_) => effects.push(p),
                        _ => return Err(add.invalid("Expected a predicate in the add list")),
                    }
                }
                domain.add_operator(Operator {
                    head,
                    preconditions,
                    effects: Formula::conj(effects),
                    cost: 0,
                });
            }
            ":method" => {
                let head = read_task_head(item_iter.pop()?, &scope, table)?;
                let preconditions = read_conj(item_iter.pop()?, &scope, &[], table)?;
                let subtask_list = item_iter.pop_list()?;
                let mut subtasks = Vec::with_capacity(subtask_list.len());
                for subtask in subtask_list.iter() {
                    subtasks.push(read_task_head(subtask, &scope, table)?);
                }
                domain.add_method(HtnMethod::new(head, preconditions, subtasks));
            }
            other => {
                return Err(kind.invalid(format!("Unknown SHOP domain item {other}")));
            }
        }
    }
    Ok(domain)
}

fn read_shop_problem(
    expr: &SExpr,
    domain: &Arc<HtnDomain>,
    table: &mut TermTable,
) -> std::result::Result<HtnProblem, ErrLoc> {
    let mut iter = expr
        .as_list_iter()
        .ok_or_else(|| expr.invalid("Expected a list"))?;
    iter.pop_known_atom("defproblem")?;
    let name = iter.pop_atom()?;
    let domain_name = iter.pop_atom()?;
    if domain_name.as_str() != domain.name {
        return Err(domain_name.invalid(format!(
            "The problem file declares domain `{}` but the domain file defines `{}`",
            domain_name.as_str(),
            domain.name
        )));
    }

    let scope = TypeScope::new();
    let mut state = State::new(0);
    for atom in iter.pop_list()?.iter() {
        match read_atom(atom, &scope, &[], table)? {
            Formula::Pred(p) => state.add(&p).map_err(|e| atom.invalid(e.to_string()))?,
            _ => return Err(atom.invalid("A state may only contain predicate atoms")),
        }
    }

    let mut outstanding = Vec::new();
    for task in iter.pop_list()?.iter() {
        outstanding.push(read_task_head(task, &scope, table)?);
    }
    outstanding.reverse();

    Ok(HtnProblem {
        domain: domain.clone(),
        name: name.as_str().to_string(),
        requirements: Requirements::STRIPS.union(Requirements::HTN),
        state,
        outstanding,
    })
}
