//! Distributions with explicit batch and event shapes.

pub mod categorical;
pub mod constraints;
pub mod delta;
pub mod dirichlet;
pub mod improper_uniform;
pub mod independent;
pub mod multivariate_normal;
pub mod normal;
pub mod one_hot_categorical;
pub mod traits;
pub mod transforms;

pub use categorical::Categorical;
pub use constraints::Constraint;
pub use delta::Delta;
pub use dirichlet::Dirichlet;
pub use improper_uniform::ImproperUniform;
pub use independent::Independent;
pub use multivariate_normal::MultivariateNormal;
pub use normal::{LogNormal, Normal};
pub use one_hot_categorical::{OneHotCategorical, RelaxedStrategy};
pub use traits::Distribution;
pub use transforms::{biject_to, Transform};
