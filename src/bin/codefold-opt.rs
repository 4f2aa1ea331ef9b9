// SPDX-License-Identifier: Apache-2.0

//! CLI wrapper for `codefold::fold_module`.
//!
//! Reads a textual module, folds equivalent functions, and prints the
//! rewritten module to stdout.

use std::io::Read;

use clap::Parser;
use codefold::ir_parser::parse_and_validate_module;
use codefold::{fold_module, FoldOptions};

#[derive(Debug, Parser)]
#[command(
    name = "codefold-opt",
    about = "Fold functions that would generate identical machine code.",
    version
)]
struct Args {
    /// Input module path. Use '-' to read from stdin.
    #[arg(value_name = "INPUT", default_value = "-")]
    input: String,

    /// Assume the target supports global aliases.
    #[arg(long, default_value_t = false)]
    aliases: bool,

    /// Print fold counters to stderr after rewriting.
    #[arg(long, default_value_t = false)]
    stats: bool,
}

fn read_module_text(input: &str) -> Result<String, String> {
    let mut s = String::new();
    if input == "-" {
        std::io::stdin()
            .read_to_string(&mut s)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        return Ok(s);
    }
    let mut f = std::fs::File::open(input).map_err(|e| format!("failed to open {input}: {e}"))?;
    f.read_to_string(&mut s)
        .map_err(|e| format!("failed to read {input}: {e}"))?;
    Ok(s)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let text = match read_module_text(&args.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut module = match parse_and_validate_module(&text) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let stats = fold_module(
        &mut module,
        FoldOptions {
            has_global_aliases: args.aliases,
        },
    );

    print!("{module}");
    if args.stats {
        eprintln!(
            "functions merged: {}\nthunks written: {}\naliases written: {}\ndouble-weak promotions: {}",
            stats.functions_merged,
            stats.thunks_written,
            stats.aliases_written,
            stats.double_weak_promotions
        );
    }
}
