use anyhow::Result;
use clap::Parser;
use lentil::cli::{chain, Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Chain(args) => {
            chain::run(args)?;
        }
    }

    Ok(())
}
