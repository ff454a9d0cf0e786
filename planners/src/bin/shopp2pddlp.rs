//! Converts a SHOP problem to the PDDL-like format.

use anyhow::Result;
use htn_planners::read_input;
use htn_planning::parsing;
use htn_planning::printer::problem_to_pddl;
use htn_planning::terms::TermTable;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "shopp2pddlp", about = "Convert a SHOP problem to PDDL.")]
struct Opt {
    /// Path to the SHOP domain file the problem belongs to.
    shop_domain_file: PathBuf,
    /// Path to the SHOP problem file.
    shop_problem_file: PathBuf,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::from_args();
    let mut table = TermTable::new();
    let domain = Arc::new(parsing::parse_shop_domain(
        read_input(&opt.shop_domain_file)?,
        &mut table,
    )?);
    let problem =
        parsing::parse_shop_problem(read_input(&opt.shop_problem_file)?, &domain, &mut table)?;
    print!("{}", problem_to_pddl(&problem, &table));
    Ok(())
}
