//! Assigns a sequential id to every method of an HTN domain and prints the
//! result with the `:method-ids` requirement added.

use anyhow::Result;
use htn_planners::read_input;
use htn_planning::domain::Requirements;
use htn_planning::parsing;
use htn_planning::printer::domain_to_pddl;
use htn_planning::terms::TermTable;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "add-ids", about = "Add IDs to each method in an HTN domain.")]
struct Opt {
    /// Path to the domain file.
    domain_file: PathBuf,
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
    let mut domain = parsing::parse_htn_domain(read_input(&opt.domain_file)?, &mut table)?;

    let mut next_id = 100u32;
    for index in 0..domain.methods.len() {
        domain.set_method_id(index, next_id.to_string());
        next_id += 1;
    }
    domain.add_requirement(Requirements::METHOD_IDS);

    print!("{}", domain_to_pddl(&domain, &table));
    Ok(())
}
