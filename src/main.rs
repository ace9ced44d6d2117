use clap::Parser;
use indicator_engine::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
