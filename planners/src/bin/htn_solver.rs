//! Finds an HTN plan by decomposition search.

use anyhow::Result;
use htn_planners::{init_logging, read_input};
use htn_planning::parsing;
use htn_planning::printer::{decomposition_trace, solution_plan};
use htn_planning::search::{solve, SearchConfig};
use htn_planning::terms::TermTable;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "htn-solver", about = "Find an HTN plan.")]
struct Opt {
    /// Path to the domain file.
    domain_file: PathBuf,
    /// Path to the problem file.
    problem_file: PathBuf,
    /// Maximum number of decompositions considered, -1 for unlimited.
    #[structopt(short = "m", long, default_value = "-1")]
    max_decomps: i64,
    /// Try methods in random order (otherwise, from fewest preconditions to
    /// most).
    #[structopt(short = "r", long)]
    random_order: bool,
    /// Compare each new partial solution to all previous ones and keep only
    /// the unique ones.
    #[structopt(short = "l", long)]
    loop_detection: bool,
    /// Perform breadth-first, rather than depth-first, search.
    #[structopt(short = "b", long)]
    breadth_first: bool,
    /// Use the first method found, without seeking others.
    #[structopt(short = "e", long)]
    early_stop: bool,
    /// Level of debugging information to print (0-10).
    #[structopt(short = "d", long, default_value = "0")]
    debug_level: u8,
    /// Percentage of max decomps below which nodes are saved for loop
    /// detection (0-100).
    #[structopt(short = "k", long, default_value = "100")]
    keep_level: u32,
    /// Print the full decomposition tree with the plan.
    #[structopt(long)]
    show_trace: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::from_args();
    if opt.debug_level > 10 {
        anyhow::bail!("debug level must be in range (0-10)");
    }
    if opt.keep_level > 100 {
        anyhow::bail!("keep level must be in range (0-100)");
    }
    init_logging(opt.debug_level);

    let mut table = TermTable::new();
    let domain = Arc::new(parsing::parse_htn_domain(
        read_input(&opt.domain_file)?,
        &mut table,
    )?);
    let problem = parsing::parse_htn_problem(read_input(&opt.problem_file)?, &domain, &mut table)?;

    let config = SearchConfig {
        max_decomps: u32::try_from(opt.max_decomps).ok(),
        random_order: opt.random_order,
        loop_detection: opt.loop_detection,
        breadth_first: opt.breadth_first,
        early_stop: opt.early_stop,
        keep_level: opt.keep_level,
    };
    let mut rng = SmallRng::from_os_rng();

    let (solution, stats) = solve(&problem, &config, &table, &mut rng)?;

    match &solution {
        Some(solution) => {
            println!("\nPlan found!");
            print!("{}", solution_plan(solution, &table));
            if opt.show_trace {
                println!("\nTrace");
                print!("{}", decomposition_trace(solution, &table));
            }
        }
        None => println!("\nNo legal plans."),
    }

    if opt.debug_level > 0 {
        println!("\nNodes Generated: {}", stats.generated);
        println!("Nodes Discarded: {}", stats.discarded);
        println!("Backtrack Points: {}", stats.backtracked);
        println!("Failure Points: {}", stats.failed);
    }
    Ok(())
}
