//! The decomposition planner: depth- or breadth-first search over partial
//! solutions, expanding the task at the top of the stack.

use crate::errors::Result;
use crate::problem::{HtnProblem, HtnSolution};
use crate::substitution::Substitution;
use crate::terms::TermTable;
use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Bound on the number of decompositions; `None` is unlimited.
    pub max_decomps: Option<u32>,
    /// Try methods in random order instead of fewest-preconditions-first.
    pub random_order: bool,
    /// Keep a visited set and discard equivalent partial solutions.
    pub loop_detection: bool,
    /// Breadth-first instead of depth-first search.
    pub breadth_first: bool,
    /// Use the first applicable method found, without seeking others.
    pub early_stop: bool,
    /// Percentage of `max_decomps` below which nodes are retained in the
    /// visited set; bounds the memory of loop detection.
    pub keep_level: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_decomps: None,
            random_order: false,
            loop_detection: false,
            breadth_first: false,
            early_stop: false,
            keep_level: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    pub generated: u64,
    pub discarded: u64,
    pub backtracked: u64,
    pub failed: u64,
}

/// Runs the decomposition search and returns the first complete solution
/// found, if any.
pub fn solve(
    problem: &HtnProblem,
    config: &SearchConfig,
    table: &TermTable,
    rng: &mut impl Rng,
) -> Result<(Option<HtnSolution>, SearchStats)> {
    let mut stats = SearchStats::default();
    let root = HtnSolution::from_problem(problem);
    if root.is_complete() {
        return Ok((Some(root), stats));
    }

    let mut queue: Vec<HtnSolution> = vec![root];
    let mut dead: Vec<HtnSolution> = Vec::new();

    loop {
        let current = if config.breadth_first {
            if queue.is_empty() {
                break;
            }
            queue.remove(0)
        } else {
            match queue.pop() {
                Some(current) => current,
                None => break,
            }
        };

        let top = current.top_task()?.clone();
        let top_name = table.symbols().symbol(top.rel).to_string();
        debug!(task = %top.display(table), depth = current.num_decomps, "expanding");

        if top_name.starts_with('!') {
            // primitive task: apply the matching operator
            match current.domain.operator_named(top.rel) {
                None => stats.backtracked += 1,
                Some((op_index, op)) => {
                    let mut seed = Substitution::new();
                    let mut bindable = true;
                    for (&param, &value) in op.params().iter().zip(&top.args) {
                        if !param.is_variable() || seed.add_pair(param, value).is_err() {
                            bindable = false;
                            break;
                        }
                    }
                    let instances = if bindable {
                        current.state.instantiations_for_operator(op, &seed)?
                    } else {
                        Vec::new()
                    };

                    for instance in &instances {
                        let mut next = current.clone();
                        next.apply_operator(op_index, instance, table)?;
                        if next.is_complete() {
                            return Ok((Some(next), stats));
                        }
                        enqueue(next, config, &mut queue, &dead, &mut stats);
                    }
                }
            }
        } else {
            // composite task: one successor per applicable method grounding
            let mut decomps = find_decomps(&current, config.early_stop)?;
            reorder_decomps(&mut decomps, &current, config.random_order, rng);

            if decomps.is_empty() {
                stats.backtracked += 1;
                if top_name.contains("-verify") {
                    stats.failed += 1;
                }
            }

            for (method_index, instances) in decomps {
                let start = if config.random_order {
                    rng.random_range(0..instances.len())
                } else {
                    0
                };
                for offset in 0..instances.len() {
                    let instance = &instances[(start + offset) % instances.len()];
                    stats.generated += 1;
                    let mut next = current.clone();
                    next.apply_method(method_index, instance, table)?;
                    if next.is_complete() {
                        return Ok((Some(next), stats));
                    }
                    enqueue(next, config, &mut queue, &dead, &mut stats);
                }
            }
        }

        let keep = match config.max_decomps {
            None => true,
            Some(max) => current.num_decomps as f64 <= config.keep_level as f64 * max as f64 * 0.01,
        };
        if config.loop_detection && keep {
            dead.push(current);
        }
    }

    Ok((None, stats))
}

fn enqueue(
    next: HtnSolution,
    config: &SearchConfig,
    queue: &mut Vec<HtnSolution>,
    dead: &[HtnSolution],
    stats: &mut SearchStats,
) {
    if let Some(max) = config.max_decomps {
        if next.num_decomps >= max {
            return;
        }
    }
    if config.loop_detection {
        let duplicate = queue
            .iter()
            .chain(dead.iter())
            .any(|seen| seen.equivalent(&next) && seen.num_decomps <= next.num_decomps);
        if duplicate {
            stats.discarded += 1;
            return;
        }
    }
    queue.push(next);
}

/// All methods whose head matches the top task and whose preconditions have
/// at least one instantiation in the current state.
fn find_decomps(
    current: &HtnSolution,
    early_stop: bool,
) -> Result<Vec<(usize, Vec<Substitution>)>> {
    let top = current.top_task()?;
    let mut decomps = Vec::new();
    for (index, method) in current.domain.methods.iter().enumerate() {
        if method.head.rel != top.rel || method.head.valence() != top.valence() {
            continue;
        }
        let mut seed = Substitution::new();
        let mut bindable = true;
        for (&param, &value) in method.head.args.iter().zip(&top.args) {
            if !param.is_variable() || seed.add_pair(param, value).is_err() {
                bindable = false;
                break;
            }
        }
        if !bindable {
            continue;
        }
        // variables of the subtasks matter; head parameters are already fixed
        let mut relevant: BTreeSet<_> = method.relevant_vars();
        for param in &method.head.args {
            relevant.remove(param);
        }
        let instances = current
            .state
            .instantiations(&method.preconditions, &seed, &relevant)?;
        if !instances.is_empty() {
            decomps.push((index, instances));
            if early_stop {
                return Ok(decomps);
            }
        }
    }
    Ok(decomps)
}

/// Orders candidate methods so that the ones with the fewest preconditions
/// are tried first by the depth-first search (which pops from the back), or
/// randomly.
fn reorder_decomps(
    decomps: &mut Vec<(usize, Vec<Substitution>)>,
    current: &HtnSolution,
    random_order: bool,
    rng: &mut impl Rng,
) {
    if random_order {
        // Fisher-Yates over the candidate list
        for i in (1..decomps.len()).rev() {
            let j = rng.random_range(0..=i);
            decomps.swap(i, j);
        }
    } else {
        let conjs = |index: usize| {
            current.domain.methods[index]
                .preconditions
                .as_conj()
                .map(|c| c.len())
                .unwrap_or(1)
        };
        decomps.sort_by(|a, b| conjs(b.0).cmp(&conjs(a.0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing;
    use htn_utils::input::Input;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    const TRAVEL_DOMAIN: &str = "
( define ( domain travel )
  ( :requirements :strips :htn :method-ids )
  ( :predicates ( at ?x ) ( road ?x ?y ) )
  ( :action !step
    :parameters ( ?from ?to )
    :precondition ( and ( at ?from ) ( road ?from ?to ) )
    :effect ( and ( at ?to ) ( not ( at ?from ) ) )
  )
  ( :method go
    :parameters ( ?to )
    :precondition ( and ( at ?to ) )
    :subtasks ( )
    :id ( 1 )
  )
  ( :method go
    :parameters ( ?to )
    :vars ( ?from ?via )
    :precondition ( and ( at ?from ) ( road ?from ?via ) )
    :subtasks ( ( !step ?from ?via ) ( go ?to ) )
    :id ( 2 )
  )
)";

    fn setup(problem: &str) -> (crate::terms::TermTable, crate::problem::HtnProblem) {
        let mut table = crate::terms::TermTable::new();
        let domain = Arc::new(
            parsing::parse_htn_domain(Input::from_string(TRAVEL_DOMAIN), &mut table).unwrap(),
        );
        let problem =
            parsing::parse_htn_problem(Input::from_string(problem), &domain, &mut table).unwrap();
        (table, problem)
    }

    const LINE_PROBLEM: &str = "
( define ( htn-problem line )
  ( :domain travel )
  ( :init ( at l0 ) ( road l0 l1 ) ( road l1 l2 ) )
  ( :tasks ( go l2 ) )
)";

    fn plan_names(
        solution: &crate::problem::HtnSolution,
        table: &crate::terms::TermTable,
    ) -> Vec<String> {
        (0..solution.plan_length())
            .map(|i| {
                let (op, sub) = solution.step(i).unwrap();
                let head = solution.domain.operators[*op].head.apply(sub).unwrap();
                let s = head.display(table).to_string();
                s
            })
            .collect()
    }

    #[test]
    fn depth_first_finds_a_plan() {
        let (table, problem) = setup(LINE_PROBLEM);
        let mut rng = SmallRng::seed_from_u64(7);
        let (solution, _) = solve(&problem, &SearchConfig::default(), &table, &mut rng).unwrap();
        let solution = solution.expect("the line world is solvable");
        assert_eq!(
            plan_names(&solution, &table),
            vec!["( !step l0 l1 )", "( !step l1 l2 )"]
        );

        // the decomposition forest has a single root: the top-level task,
        // decomposed by the recursive method
        assert_eq!(solution.roots().len(), 1);
        let root = solution.node(solution.roots()[0]);
        assert_eq!(table.symbols().symbol(root.task.rel), "go");
        assert_eq!(root.method_id.as_deref(), Some("2"));
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn breadth_first_finds_the_same_plan() {
        let (table, problem) = setup(LINE_PROBLEM);
        let mut rng = SmallRng::seed_from_u64(7);
        let config = SearchConfig {
            breadth_first: true,
            ..Default::default()
        };
        let (solution, _) = solve(&problem, &config, &table, &mut rng).unwrap();
        let solution = solution.expect("the line world is solvable");
        assert_eq!(
            plan_names(&solution, &table),
            vec!["( !step l0 l1 )", "( !step l1 l2 )"]
        );
    }

    #[test]
    fn random_order_still_solves() {
        let (table, problem) = setup(LINE_PROBLEM);
        for seed in 0..4 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let config = SearchConfig {
                random_order: true,
                max_decomps: Some(32),
                loop_detection: true,
                ..Default::default()
            };
            let (solution, _) = solve(&problem, &config, &table, &mut rng).unwrap();
            assert!(solution.is_some());
        }
    }

    #[test]
    fn max_decomps_bounds_an_unsolvable_search() {
        // a cyclic road network and an unreachable destination: only the
        // decomposition bound stops the recursion
        let cyclic = "
( define ( htn-problem loop )
  ( :domain travel )
  ( :init ( at l0 ) ( road l0 l1 ) ( road l1 l0 ) )
  ( :tasks ( go l9 ) )
)";
        let (table, problem) = setup(cyclic);
        let mut rng = SmallRng::seed_from_u64(7);
        let config = SearchConfig {
            max_decomps: Some(6),
            ..Default::default()
        };
        let (solution, stats) = solve(&problem, &config, &table, &mut rng).unwrap();
        assert!(solution.is_none());
        assert!(stats.generated > 0);
    }

    #[test]
    fn loop_detection_discards_revisited_states() {
        let cyclic = "
( define ( htn-problem loop )
  ( :domain travel )
  ( :init ( at l0 ) ( road l0 l1 ) ( road l1 l0 ) )
  ( :tasks ( go l9 ) )
)";
        let (table, problem) = setup(cyclic);
        let mut rng = SmallRng::seed_from_u64(7);
        let config = SearchConfig {
            max_decomps: Some(8),
            loop_detection: true,
            ..Default::default()
        };
        let (solution, stats) = solve(&problem, &config, &table, &mut rng).unwrap();
        assert!(solution.is_none());
        assert!(stats.discarded > 0);
    }

    #[test]
    fn empty_task_lists_are_already_solved() {
        let empty = "
( define ( htn-problem nothing )
  ( :domain travel )
  ( :init ( at l0 ) )
  ( :tasks )
)";
        let (table, problem) = setup(empty);
        let mut rng = SmallRng::seed_from_u64(7);
        let (solution, _) = solve(&problem, &SearchConfig::default(), &table, &mut rng).unwrap();
        let solution = solution.expect("nothing to do is immediately solved");
        assert_eq!(solution.plan_length(), 0);
    }
}
