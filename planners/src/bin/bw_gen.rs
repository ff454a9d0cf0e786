//! Generates a random blocksworld problem: a STRIPS problem file and,
//! optionally, a matching SHOP problem file.

use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "bw-gen", about = "Generate a random blocksworld problem.")]
struct Opt {
    /// Number of blocks.
    num_blocks: u32,
    /// Path of the STRIPS problem file to write.
    pddl_file: PathBuf,
    /// Optional path of the SHOP problem file to write.
    htn_file: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

/// Deals the blocks into a random set of towers, bottom first.
fn random_towers(num_blocks: u32, rng: &mut SmallRng) -> Vec<Vec<u32>> {
    let mut towers: Vec<Vec<u32>> = Vec::new();
    for block in 1..=num_blocks {
        let index = rng.random_range(0..=towers.len());
        if index == towers.len() {
            towers.push(Vec::new());
        }
        towers[index].push(block);
    }
    for tower in &mut towers {
        tower.shuffle(rng);
    }
    towers
}

fn write_towers(out: &mut String, towers: &[Vec<u32>], indent: &str) {
    for tower in towers {
        let _ = writeln!(out, "{indent}( on-table b{} )", tower[0]);
        for pair in tower.windows(2) {
            let _ = writeln!(out, "{indent}( on b{} b{} )", pair[1], pair[0]);
        }
        let _ = writeln!(out, "{indent}( clear b{} )", tower[tower.len() - 1]);
    }
}

fn run() -> Result<()> {
    let opt = Opt::from_args();
    let mut rng = SmallRng::from_os_rng();

    let input_towers = random_towers(opt.num_blocks, &mut rng);
    let output_towers = random_towers(opt.num_blocks, &mut rng);

    let mut pddl = String::new();
    let _ = writeln!(pddl, "( define ( problem bw4-{} )", opt.num_blocks);
    let _ = writeln!(pddl, "  ( :domain blocksworld )");
    let _ = write!(pddl, "  ( :objects");
    for block in 1..=opt.num_blocks {
        let _ = write!(pddl, " b{block}");
    }
    let _ = writeln!(pddl, " )");
    let _ = writeln!(pddl, "  ( :init");
    let _ = writeln!(pddl, "    ( arm-empty )");
    write_towers(&mut pddl, &input_towers, "    ");
    let _ = writeln!(pddl, "  )");
    let _ = writeln!(pddl, "  ( :goal");
    let _ = writeln!(pddl, "    ( and");
    write_towers(&mut pddl, &output_towers, "      ");
    let _ = writeln!(pddl, "    )");
    let _ = writeln!(pddl, "  )");
    let _ = writeln!(pddl, ")");
    std::fs::write(&opt.pddl_file, pddl)
        .with_context(|| format!("While writing {}", opt.pddl_file.display()))?;

    let htn_file = match &opt.htn_file {
        Some(path) => path,
        None => return Ok(()),
    };

    let mut shop = String::new();
    let _ = writeln!(shop, "( defproblem bw4-{} blocksworld", opt.num_blocks);
    let _ = writeln!(shop, "  (");
    let _ = writeln!(shop, "    ( arm-empty )");
    write_towers(&mut shop, &input_towers, "    ");
    let _ = writeln!(shop, "  )");
    let _ = writeln!(shop, "  (");
    for tower in &output_towers {
        let _ = write!(shop, "    ( make-{}pile", tower.len());
        for &block in tower.iter().rev() {
            let _ = write!(shop, " b{block}");
        }
        let _ = writeln!(shop, " )");
    }
    let _ = writeln!(shop, "  )");
    let _ = writeln!(shop, ")");
    std::fs::write(htn_file, shop)
        .with_context(|| format!("While writing {}", htn_file.display()))?;

    Ok(())
}
