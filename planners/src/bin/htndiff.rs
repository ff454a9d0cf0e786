//! Prints `true` if two HTN domain files are structurally equivalent,
//! `false` otherwise.

use anyhow::Result;
use htn_planners::read_input;
use htn_planning::parsing;
use htn_planning::terms::TermTable;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "htndiff", about = "Compare two HTN domains for equivalence.")]
struct Opt {
    /// First domain file.
    file1: PathBuf,
    /// Second domain file.
    file2: PathBuf,
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
    let first = parsing::parse_htn_domain(read_input(&opt.file1)?, &mut table)?;
    let second = parsing::parse_htn_domain(read_input(&opt.file2)?, &mut table)?;
    if first.equivalent(&second, &mut table)? {
        println!("true");
    } else {
        println!("false");
    }
    Ok(())
}
