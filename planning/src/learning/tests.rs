use super::*;
use crate::parsing;
use crate::printer::domain_to_pddl;
use crate::search::{solve, SearchConfig};
use crate::strips::StripsSolution;
use htn_utils::input::Input;
use rand::rngs::SmallRng;
use rand::SeedableRng;

const BW_STRIPS_DOMAIN: &str = "
( define ( domain blocksworld )
  ( :requirements :strips )
  ( :predicates
    ( arm-empty )
    ( on-table ?x )
    ( clear ?x )
    ( holding ?x )
    ( on ?x ?y )
  )
  ( :action !pick-up
    :parameters ( ?b )
    :precondition ( and ( arm-empty ) ( on-table ?b ) ( clear ?b ) )
    :effect ( and ( holding ?b )
                  ( not ( arm-empty ) )
                  ( not ( on-table ?b ) )
                  ( not ( clear ?b ) ) )
    :cost ( 2 )
  )
  ( :action !put-down
    :parameters ( ?b )
    :precondition ( and ( holding ?b ) )
    :effect ( and ( arm-empty ) ( on-table ?b ) ( clear ?b )
                  ( not ( holding ?b ) ) )
  )
)";

const BW_HTN_DOMAIN: &str = "
( define ( domain blocksworld )
  ( :requirements :strips :htn )
  ( :predicates
    ( arm-empty )
    ( on-table ?x )
    ( clear ?x )
    ( holding ?x )
    ( on ?x ?y )
  )
  ( :action !pick-up
    :parameters ( ?b )
    :precondition ( and ( arm-empty ) ( on-table ?b ) ( clear ?b ) )
    :effect ( and ( holding ?b )
                  ( not ( arm-empty ) )
                  ( not ( on-table ?b ) )
                  ( not ( clear ?b ) ) )
    :cost ( 2 )
  )
  ( :action !put-down
    :parameters ( ?b )
    :precondition ( and ( holding ?b ) )
    :effect ( and ( arm-empty ) ( on-table ?b ) ( clear ?b )
                  ( not ( holding ?b ) ) )
  )
)";

const BW_PROBLEM: &str = "
( define ( problem bw-one )
  ( :domain blocksworld )
  ( :init ( arm-empty ) ( on-table b1 ) ( clear b1 ) )
  ( :goal ( and ( holding b1 ) ) )
)";

const BW_TASKS: &str = "
( define ( tasks bw-tasks )
  ( :task pick-up
    :parameters ( ?b )
    :precondition ( and ( arm-empty ) ( on-table ?b ) ( clear ?b ) )
    :effect ( and ( holding ?b )
                  ( not ( arm-empty ) )
                  ( not ( on-table ?b ) )
                  ( not ( clear ?b ) ) )
  )
)";

const BW_PLAN: &str = "( ( !pick-up b1 ) )";

struct Setup {
    table: TermTable,
    plan: AnnotatedPlan,
    tasks: TaskList,
    domain: HtnDomain,
}

fn setup(htn_domain: &str, problem: &str, tasks: &str, plan: &str) -> Setup {
    let mut table = TermTable::new();
    let strips = Arc::new(
        parsing::parse_strips_domain(Input::from_string(BW_STRIPS_DOMAIN), &mut table).unwrap(),
    );
    let strips_problem = Arc::new(
        parsing::parse_strips_problem(Input::from_string(problem), &strips, &mut table).unwrap(),
    );
    let actions = parsing::parse_plan(Input::from_string(plan), &mut table).unwrap();
    let trace = StripsSolution::new(strips_problem, &actions, &table).unwrap();
    let domain = parsing::parse_htn_domain(Input::from_string(htn_domain), &mut table).unwrap();
    let tasks = parsing::parse_task_list(Input::from_string(tasks), &domain, &mut table).unwrap();
    Setup {
        table,
        plan: AnnotatedPlan::new(trace),
        tasks,
        domain,
    }
}

fn learn_with(setup: &mut Setup, opts: LearnOptions) {
    let mut learner = Learner::new(opts, &setup.domain);
    learner
        .learn(&mut setup.plan, &setup.tasks, &mut setup.domain, &mut setup.table)
        .unwrap();
}

#[test]
fn learns_single_move_method() {
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, BW_TASKS, BW_PLAN);
    learn_with(&mut s, LearnOptions::default());

    assert_eq!(s.domain.methods.len(), 1);
    let method = &s.domain.methods[0];
    assert_eq!(s.table.symbols().symbol(method.head.rel), "pick-up");
    assert_eq!(method.head.valence(), 1);
    let param = method.head.args[0];

    // the sole subtask is the primitive, with the same parameter
    assert_eq!(method.subtasks.len(), 1);
    assert_eq!(s.table.symbols().symbol(method.subtasks[0].rel), "!pick-up");
    assert_eq!(method.subtasks[0].args.as_slice(), &[param]);

    // preconditions are exactly those of the task descriptor
    let arm_empty = s.table.symbols().get("arm-empty").unwrap();
    let on_table = s.table.symbols().get("on-table").unwrap();
    let clear = s.table.symbols().get("clear").unwrap();
    let expected = Formula::conj(vec![
        Formula::pred(arm_empty, []),
        Formula::pred(on_table, [param]),
        Formula::pred(clear, [param]),
    ]);
    assert_eq!(method.preconditions, expected);
}

#[test]
fn learned_method_decomposes_new_problems() {
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, BW_TASKS, BW_PLAN);
    learn_with(&mut s, LearnOptions::default());

    // a fresh problem over different constants
    let htn_problem = "
( define ( htn-problem bw-two )
  ( :domain blocksworld )
  ( :init ( arm-empty ) ( on-table b7 ) ( clear b7 ) ( on-table b8 ) )
  ( :tasks ( pick-up b7 ) )
)";
    let domain = Arc::new(s.domain.clone());
    let problem =
        parsing::parse_htn_problem(Input::from_string(htn_problem), &domain, &mut s.table).unwrap();

    let mut rng = SmallRng::seed_from_u64(0);
    let (solution, _) = solve(&problem, &SearchConfig::default(), &s.table, &mut rng).unwrap();
    let solution = solution.expect("the learned method should solve the task");

    assert_eq!(solution.plan_length(), 1);
    let (op_index, sub) = solution.step(0).unwrap();
    let op = &solution.domain.operators[*op_index];
    let head = op.head.apply(sub).unwrap();
    assert_eq!(s.table.symbols().symbol(head.rel), "!pick-up");
    assert_eq!(s.table.name(head.args[0]), "b7");

    // applying the method yields exactly the state the task effects demand
    let holding = s.table.symbols().get("holding").unwrap();
    let b7 = s.table.intern("b7", None).unwrap();
    assert!(solution
        .state
        .is_consistent(&Formula::pred(holding, [b7])));
}

#[test]
fn variables_denoting_one_constant_are_merged() {
    // After regression, the subtask arguments and the method parameters must
    // be the same variables, merged through the ground trace.
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, BW_TASKS, BW_PLAN);
    learn_with(&mut s, LearnOptions::default());

    let method = &s.domain.methods[0];
    assert_eq!(method.head.args.as_slice(), method.subtasks[0].args.as_slice());
    // every precondition variable is the method parameter
    for prec in method.preconditions.conjuncts() {
        for v in prec.variables() {
            assert_eq!(v, method.head.args[0]);
        }
    }
}

#[test]
fn soundness_check_adds_verifier_methods() {
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, BW_TASKS, BW_PLAN);
    learn_with(
        &mut s,
        LearnOptions {
            soundness_check: true,
            ..Default::default()
        },
    );

    let verify = s.table.symbols().get("pick-up-verify").unwrap();
    let verifiers: Vec<&HtnMethod> = s
        .domain
        .methods
        .iter()
        .filter(|m| m.head.rel == verify)
        .collect();
    assert_eq!(verifiers.len(), 1);
    let verifier = verifiers[0];
    assert!(verifier.subtasks.is_empty());
    // the verifier's precondition is exactly the task's effects
    assert_eq!(verifier.preconditions, s.tasks.tasks[0].effects);

    // and learned methods end by calling the verifier
    let learned = s
        .domain
        .methods
        .iter()
        .find(|m| s.table.symbols().symbol(m.head.rel) == "pick-up")
        .expect("the single-move method is still learned");
    let last = learned.subtasks.last().unwrap();
    assert_eq!(last.rel, verify);
}

const ND_DOMAIN: &str = "
( define ( domain slippery )
  ( :requirements :strips :htn )
  ( :predicates ( at ?x ) ( dropped ?x ) )
  ( :action !move-01
    :parameters ( ?from ?to )
    :precondition ( and ( at ?from ) )
    :effect ( and ( at ?to ) ( not ( at ?from ) ) )
  )
  ( :action !move-02
    :parameters ( ?from ?to )
    :precondition ( and ( at ?from ) )
    :effect ( and ( dropped ?from ) )
  )
)";

const ND_STRIPS_DOMAIN: &str = "
( define ( domain slippery )
  ( :requirements :strips )
  ( :predicates ( at ?x ) ( dropped ?x ) )
  ( :action !move-01
    :parameters ( ?from ?to )
    :precondition ( and ( at ?from ) )
    :effect ( and ( at ?to ) ( not ( at ?from ) ) )
  )
  ( :action !move-02
    :parameters ( ?from ?to )
    :precondition ( and ( at ?from ) )
    :effect ( and ( dropped ?from ) )
  )
)";

#[test]
fn trivial_nd_checkers_are_generated_once() {
    let mut table = TermTable::new();
    let strips = Arc::new(
        parsing::parse_strips_domain(Input::from_string(ND_STRIPS_DOMAIN), &mut table).unwrap(),
    );
    let problem_text = "
( define ( problem slip-one )
  ( :domain slippery )
  ( :init ( at l1 ) )
  ( :goal ( and ( at l2 ) ) )
)";
    let problem = Arc::new(
        parsing::parse_strips_problem(Input::from_string(problem_text), &strips, &mut table)
            .unwrap(),
    );
    let actions =
        parsing::parse_plan(Input::from_string("( ( !move-01 l1 l2 ) )"), &mut table).unwrap();
    let trace = StripsSolution::new(problem, &actions, &table).unwrap();
    let mut plan = AnnotatedPlan::new(trace);

    let mut domain = parsing::parse_htn_domain(Input::from_string(ND_DOMAIN), &mut table).unwrap();
    let tasks = parsing::parse_task_list(
        Input::from_string("( define ( tasks none ) )"),
        &domain,
        &mut table,
    )
    .unwrap();

    let opts = LearnOptions {
        nd_checkers: true,
        ..Default::default()
    };
    let mut learner = Learner::new(opts, &domain);
    learner.learn(&mut plan, &tasks, &mut domain, &mut table).unwrap();

    // one checker, built from the effects of the -01 outcome, no matter how
    // many determinised variants the domain carries
    let check = table.symbols().get("check-move").unwrap();
    let checkers: Vec<&HtnMethod> = domain.methods.iter().filter(|m| m.head.rel == check).collect();
    assert_eq!(checkers.len(), 1);
    let checker = checkers[0];
    assert!(checker.subtasks.is_empty());
    let move01 = table.symbols().get("!move-01").unwrap();
    let (_, op) = domain.operator_named(move01).unwrap();
    assert_eq!(checker.preconditions, op.effects);
}

/// A trace in which the single-move method is discovered twice: once for b1
/// at state 1 and once for b2 at state 3.
const BW_PROBLEM_TWO_BLOCKS: &str = "
( define ( problem bw-two-blocks )
  ( :domain blocksworld )
  ( :init ( arm-empty ) ( on-table b1 ) ( clear b1 ) ( on-table b2 ) ( clear b2 ) )
  ( :goal ( and ( holding b2 ) ) )
)";

const BW_PLAN_THREE: &str = "( ( !pick-up b1 ) ( !put-down b1 ) ( !pick-up b2 ) )";

fn single_subtask_methods<'a>(s: &'a Setup, head: &str) -> Vec<&'a HtnMethod> {
    s.domain
        .methods
        .iter()
        .filter(|m| s.table.symbols().symbol(m.head.rel) == head && m.subtasks.len() == 1)
        .collect()
}

#[test]
fn qvalues_average_over_repeated_discoveries() {
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(
        &mut s,
        LearnOptions {
            qvalues: true,
            ..Default::default()
        },
    );

    // the second discovery of the single-move method is folded into the
    // first as a new cost sample instead of being subsumed away
    let methods = single_subtask_methods(&s, "pick-up");
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].q_value, 2.0);
    assert_eq!(methods[0].q_count, 2);
}

#[test]
fn subsumption_collapses_more_specific_methods() {
    // with subsumption, the method rediscovered for b2 is dropped
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(&mut s, LearnOptions::default());
    assert_eq!(single_subtask_methods(&s, "pick-up").len(), 1);

    // without subsumption the duplicate is kept
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(
        &mut s,
        LearnOptions {
            no_subsumption: true,
            ..Default::default()
        },
    );
    assert_eq!(single_subtask_methods(&s, "pick-up").len(), 2);
}

#[test]
fn two_step_traces_compose_methods() {
    // a two-action trace: pick up b1 and put it down again; the task of
    // having the arm empty with b1 on the table is re-achieved at state 2
    let tasks = "
( define ( tasks bw-tasks )
  ( :task park
    :parameters ( ?b )
    :precondition ( and ( holding ?b ) )
    :effect ( and ( arm-empty ) ( on-table ?b ) ( clear ?b ) ( not ( holding ?b ) ) )
  )
)";
    let plan = "( ( !pick-up b1 ) ( !put-down b1 ) )";
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, tasks, plan);
    learn_with(&mut s, LearnOptions::default());

    let park_methods: Vec<&HtnMethod> = s
        .domain
        .methods
        .iter()
        .filter(|m| s.table.symbols().symbol(m.head.rel) == "park")
        .collect();
    assert!(!park_methods.is_empty());
    // the shortest method decomposes into the single !put-down action
    assert!(park_methods.iter().any(|m| {
        m.subtasks.len() == 1
            && s.table.symbols().symbol(m.subtasks[0].rel) == "!put-down"
    }));
}

fn method_name<'a>(s: &'a Setup, m: &HtnMethod) -> &'a str {
    s.table.symbols().symbol(m.head.rel)
}

fn has_inequality(m: &HtnMethod) -> bool {
    m.preconditions
        .conjuncts()
        .any(|p| matches!(p, Formula::Neg(inner) if matches!(**inner, Formula::Equ(_, _))))
}

/// A task whose head has no parameters: nothing can link a learned method's
/// subtasks to its head.
const GRAB_ANY_TASKS: &str = "
( define ( tasks grabbing )
  ( :task grab-any
    :parameters ( )
    :precondition ( and ( arm-empty ) )
    :effect ( and ( not ( arm-empty ) ) )
  )
)";

#[test]
fn var_linkage_discards_unlinked_methods() {
    // without the flag the unlinked method is learned
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, GRAB_ANY_TASKS, BW_PLAN);
    learn_with(&mut s, LearnOptions::default());
    assert_eq!(s.domain.methods.len(), 1);

    // with it, the subtask (!pick-up ?v) cannot reach the empty head
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, GRAB_ANY_TASKS, BW_PLAN);
    learn_with(
        &mut s,
        LearnOptions {
            var_linkage: true,
            ..Default::default()
        },
    );
    assert!(s.domain.methods.is_empty());

    // a subtask that shares the head parameter passes the check
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, BW_TASKS, BW_PLAN);
    learn_with(
        &mut s,
        LearnOptions {
            var_linkage: true,
            ..Default::default()
        },
    );
    assert_eq!(s.domain.methods.len(), 1);
}

#[test]
fn partial_generalization_drops_inequality_clauses() {
    // kept distinct, the variables standing for b1 and b2 get an explicit
    // (not (= x y)) clause in the composed method
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(&mut s, LearnOptions::default());
    assert!(s.domain.methods.iter().any(has_inequality));

    // merged from the start, no inequality is ever stated
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(
        &mut s,
        LearnOptions {
            partial_generalization: true,
            ..Default::default()
        },
    );
    assert!(!s.domain.methods.iter().any(has_inequality));
    assert_eq!(single_subtask_methods(&s, "pick-up").len(), 1);
}

const BW_PLAN_TWO: &str = "( ( !pick-up b1 ) ( !put-down b1 ) )";

/// `park` covers the !put-down step but declares only part of its effects;
/// `cycle` additionally needs ( clear ?b ), which only the actual effects of
/// the recorded park instance supply.
const PARK_CYCLE_TASKS: &str = "
( define ( tasks park-cycle )
  ( :task park
    :parameters ( ?b )
    :precondition ( and ( holding ?b ) )
    :effect ( and ( arm-empty ) ( on-table ?b ) )
  )
  ( :task cycle
    :parameters ( ?b )
    :precondition ( and ( holding ?b ) )
    :effect ( and ( arm-empty ) ( clear ?b ) )
  )
)";

#[test]
fn only_task_effects_limits_what_a_submethod_supplies() {
    // with actual effects, the park instance also supplies ( clear b1 ) and
    // a cycle method decomposing into park is learned
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, PARK_CYCLE_TASKS, BW_PLAN_TWO);
    learn_with(&mut s, LearnOptions::default());
    assert!(s.domain.methods.iter().any(|m| {
        method_name(&s, m) == "cycle"
            && m.subtasks.len() == 1
            && s.table.symbols().symbol(m.subtasks[0].rel) == "park"
    }));

    // restricted to the declared task effects, ( clear ?b ) stays on the add
    // list, is false before the range, and the method is never emitted
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, PARK_CYCLE_TASKS, BW_PLAN_TWO);
    learn_with(
        &mut s,
        LearnOptions {
            only_task_effects: true,
            ..Default::default()
        },
    );
    assert!(s.domain.methods.iter().all(|m| method_name(&s, m) != "cycle"));
    assert!(s.domain.methods.iter().any(|m| method_name(&s, m) == "park"));
}

const BW_PLAN_B2: &str = "( ( !pick-up b2 ) ( !put-down b2 ) )";

/// The `present` method learned for b1 over the !put-down step restates
/// ( on-table b1 ) as a precondition (the step never achieves it) while also
/// declaring it as an effect: towards `tidy`'s ( on-table ?y ) goal it
/// supplies nothing it does not already require.
const TIDY_TASKS: &str = "
( define ( tasks tidying )
  ( :task present
    :parameters ( ?x )
    :precondition ( and ( on-table ?x ) )
    :effect ( and ( on-table ?x ) ( arm-empty ) )
  )
  ( :task tidy
    :parameters ( ?y ?z )
    :precondition ( )
    :effect ( and ( on-table ?y ) ( clear ?z ) )
  )
)";

#[test]
fn require_new_skips_subtasks_that_restate_their_preconditions() {
    // by default, tidy for ( b1 b2 ) happily decomposes into the present
    // instance, whose actual effects cover ( clear b2 )
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, TIDY_TASKS, BW_PLAN_B2);
    learn_with(&mut s, LearnOptions::default());
    assert!(s.domain.methods.iter().any(|m| {
        method_name(&s, m) == "tidy"
            && m.subtasks
                .iter()
                .any(|t| s.table.symbols().symbol(t.rel) == "present")
    }));

    // require_new rejects that instance: the only remaining atom its task
    // effects supply, ( on-table b1 ), is implied by its own preconditions
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, TIDY_TASKS, BW_PLAN_B2);
    learn_with(
        &mut s,
        LearnOptions {
            require_new: true,
            ..Default::default()
        },
    );
    assert!(s.domain.methods.iter().all(|m| {
        method_name(&s, m) != "tidy"
            || m.subtasks
                .iter()
                .all(|t| s.table.symbols().symbol(t.rel) != "present")
    }));
    // tidy methods built from primitives are still learned
    assert!(s.domain.methods.iter().any(|m| method_name(&s, m) == "tidy"));
}

#[test]
fn drop_unneeded_skips_tasks_an_existing_method_covers() {
    // by default the second discovery also composes a three-subtask method
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(&mut s, LearnOptions::default());
    assert_eq!(s.domain.methods.len(), 2);
    assert!(s.domain.methods.iter().any(|m| m.subtasks.len() == 3));

    // with drop_unneeded, the recorded single-move instance already
    // decomposes pick-up from state 0, so the composition is skipped
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(
        &mut s,
        LearnOptions {
            drop_unneeded: true,
            ..Default::default()
        },
    );
    assert_eq!(s.domain.methods.len(), 1);
    assert_eq!(s.domain.methods[0].subtasks.len(), 1);
}

#[test]
fn force_ops_first_makes_the_first_subtask_primitive() {
    let composite_first = |s: &Setup| {
        s.domain.methods.iter().any(|m| {
            m.subtasks
                .first()
                .is_some_and(|t| !s.table.symbols().symbol(t.rel).starts_with('!'))
        })
    };

    // the composed method normally starts with the learned pick-up method
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(&mut s, LearnOptions::default());
    assert!(composite_first(&s));

    // forced, the same range is composed starting from the operator instead
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(
        &mut s,
        LearnOptions {
            force_ops_first: true,
            ..Default::default()
        },
    );
    assert!(!composite_first(&s));
    assert!(s.domain.methods.iter().any(|m| m.subtasks.len() == 3));
}

#[test]
fn hard_squelch_skips_ranges_an_existing_method_solves() {
    // without it, the trace also yields the composed three-subtask method
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(&mut s, LearnOptions::default());
    assert_eq!(s.domain.methods.len(), 2);

    // the method learned at state 1 already solves pick-up from state 0, so
    // every later range for that task is squelched
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM_TWO_BLOCKS, BW_TASKS, BW_PLAN_THREE);
    learn_with(
        &mut s,
        LearnOptions {
            hard_squelch: true,
            ..Default::default()
        },
    );
    assert_eq!(s.domain.methods.len(), 1);
    assert_eq!(s.domain.methods[0].subtasks.len(), 1);
}

#[test]
fn printed_learned_domain_reparses() {
    let mut s = setup(BW_HTN_DOMAIN, BW_PROBLEM, BW_TASKS, BW_PLAN);
    learn_with(&mut s, LearnOptions::default());

    let printed = domain_to_pddl(&s.domain, &s.table).to_string();
    let reparsed = parsing::parse_htn_domain(Input::from_string(&printed), &mut s.table).unwrap();
    assert!(s.domain.equivalent(&reparsed, &mut s.table).unwrap());
}
