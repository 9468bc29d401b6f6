//! Variational inference: ELBO estimators, the SVI driver and ADVI.

pub mod advi;
pub mod elbo;
pub mod svi;

pub use advi::{
    Advi, AdviDiagonalNormal, AdviMultivariateNormal, DiagonalNormal, FullRankNormal, GuideFamily,
};
pub use elbo::{ElboConfig, ElboEstimate, LossKind};
pub use svi::Svi;
