pub mod cli;
pub mod distributions;
pub mod error;
pub mod gaussian_chain;
pub mod infer;
pub mod optim;
pub mod params;
pub mod poutine;
pub mod shape;

pub use candle_core;
pub use candle_nn;

pub use error::{PplError, Result};
pub use params::ParamStore;
pub use poutine::{Context, Program};
