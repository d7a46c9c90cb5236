use anyhow::Result;
use clap::Parser;
use debug_assist_cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    debug_assist_cli::run_cli(cli)
}
