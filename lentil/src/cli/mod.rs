pub mod chain;

use clap::{Parser, Subcommand};

pub use chain::{ChainArgs, GuideType, LossType};

#[derive(Parser)]
#[command(name = "lentil")]
#[command(about = "Trace-based variational inference on candle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit ADVI to the Gaussian chain and compare with the exact posterior
    Chain(ChainArgs),
}
