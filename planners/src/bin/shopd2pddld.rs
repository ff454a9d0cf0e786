//! Converts a SHOP domain to the PDDL-like format.

use anyhow::Result;
use htn_planners::read_input;
use htn_planning::parsing;
use htn_planning::printer::domain_to_pddl;
use htn_planning::terms::TermTable;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "shopd2pddld", about = "Convert a SHOP domain to PDDL.")]
struct Opt {
    /// Path to the SHOP domain file.
    shop_domain_file: PathBuf,
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
    let domain = parsing::parse_shop_domain(read_input(&opt.shop_domain_file)?, &mut table)?;
    print!("{}", domain_to_pddl(&domain, &table));
    Ok(())
}
