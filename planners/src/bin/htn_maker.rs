//! Learns HTN methods from a classical plan trace and prints the enlarged
//! HTN domain on stdout.

use anyhow::{Context, Result};
use htn_planners::{init_logging, read_input};
use htn_planning::learning::{AnnotatedPlan, LearnOptions, Learner};
use htn_planning::parsing;
use htn_planning::printer::domain_to_pddl;
use htn_planning::strips::StripsSolution;
use htn_planning::terms::TermTable;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "htn-maker", about = "Learn an HTN domain from a plan trace.")]
struct Opt {
    /// Path to the STRIPS domain file.
    strips_domain_file: PathBuf,
    /// Path to the tasks file.
    tasks_file: PathBuf,
    /// Path to the STRIPS problem file.
    problem_file: PathBuf,
    /// Path to the solution (plan trace) file.
    solution_file: PathBuf,
    /// Path to the HTN domain file to enlarge.
    htn_domain_file: PathBuf,

    /// Do not prune methods that are subsumed by another.
    #[structopt(long)]
    no_subsumption: bool,
    /// Force any matching constants to matching variables.
    #[structopt(long)]
    partial_generalization: bool,
    /// Remove only effects of the task when adding a submethod.
    #[structopt(long)]
    only_task_effects: bool,
    /// Require that a subtask provide a precondition that it does not also add.
    #[structopt(long)]
    require_new: bool,
    /// Require at least one var from each subtask to be linked to the method head.
    #[structopt(long)]
    var_linkage: bool,
    /// Drop unneeded methods: if an existing method already decomposes the
    /// task, do not learn a new one.
    #[structopt(long)]
    drop_unneeded: bool,
    /// Force the first subtask of learned methods to be a primitive operator.
    #[structopt(long)]
    force_ops_first: bool,
    /// Only learn from a subsequence if it cannot be solved by any backward
    /// extension of that sequence.
    #[structopt(long)]
    hard_squelch: bool,
    /// Include in methods a check to guarantee effects have been achieved.
    #[structopt(long)]
    soundness_check: bool,
    /// Generate methods to force the desired outcome of a non-deterministic
    /// operator.
    #[structopt(long)]
    nd_checkers: bool,
    /// Calculate initial Q-values for methods.
    #[structopt(long)]
    qvalues: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::from_args();
    init_logging(0);

    let mut table = TermTable::new();

    let strips_domain = Arc::new(parsing::parse_strips_domain(
        read_input(&opt.strips_domain_file)?,
        &mut table,
    )?);
    let strips_problem = Arc::new(parsing::parse_strips_problem(
        read_input(&opt.problem_file)?,
        &strips_domain,
        &mut table,
    )?);
    let plan = parsing::parse_plan(read_input(&opt.solution_file)?, &mut table)?;
    let trace = StripsSolution::new(strips_problem, &plan, &table)
        .with_context(|| format!("While replaying {}", opt.solution_file.display()))?;
    let mut annotated = AnnotatedPlan::new(trace);

    let mut htn_domain =
        parsing::parse_htn_domain(read_input(&opt.htn_domain_file)?, &mut table)?;
    let tasks = parsing::parse_task_list(read_input(&opt.tasks_file)?, &htn_domain, &mut table)?;

    let options = LearnOptions {
        no_subsumption: opt.no_subsumption,
        partial_generalization: opt.partial_generalization,
        only_task_effects: opt.only_task_effects,
        require_new: opt.require_new,
        var_linkage: opt.var_linkage,
        drop_unneeded: opt.drop_unneeded,
        force_ops_first: opt.force_ops_first,
        hard_squelch: opt.hard_squelch,
        soundness_check: opt.soundness_check,
        nd_checkers: opt.nd_checkers,
        qvalues: opt.qvalues,
    };
    let mut learner = Learner::new(options, &htn_domain);
    learner.learn(&mut annotated, &tasks, &mut htn_domain, &mut table)?;

    println!("{}", domain_to_pddl(&htn_domain, &table));
    Ok(())
}
