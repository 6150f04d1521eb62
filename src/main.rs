//! rill-graph CLI entry point
//!
//! Parses arguments, installs logging and runs the selected command. Errors are
//! printed to stderr and turn into exit code 1.

use clap::Parser;
use colored::Colorize;
use rill_graph::cli::Cli;

fn main() {
    let cli = Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    cli.init_logging();

    if let Err(e) = cli.execute() {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
