use candle_core::{DType, Tensor};

use crate::error::Result;

const TOLERANCE: f32 = 1e-4;

/// Support of a distribution, or the domain of a constrained parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    Real,
    Positive,
    UnitInterval,
    /// non-negative vectors along the last axis summing to one
    Simplex,
    /// square lower-triangular matrices with a positive diagonal
    LowerCholesky,
    /// integers in `lower..=upper`
    IntegerInterval { lower: usize, upper: usize },
    /// one-hot vectors along the last axis
    OneHot,
}

impl Constraint {
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::IntegerInterval { .. } | Self::OneHot)
    }

    /// Number of trailing dims that form one constrained value.
    pub fn event_dim(&self) -> usize {
        match self {
            Self::Simplex | Self::OneHot => 1,
            Self::LowerCholesky => 2,
            _ => 0,
        }
    }

    /// Host-side check of every element of `value`.
    pub fn check(&self, value: &Tensor) -> Result<bool> {
        let dims = value.dims().to_vec();
        let xx: Vec<f32> = value.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;

        let last = dims.last().copied().unwrap_or(1).max(1);
        let ok = match self {
            Self::Real => xx.iter().all(|x| !x.is_nan()),
            Self::Positive => xx.iter().all(|&x| x > 0.0),
            Self::UnitInterval => xx.iter().all(|&x| (0.0..=1.0).contains(&x)),
            Self::Simplex => xx.chunks(last).all(|row| {
                row.iter().all(|&x| x >= 0.0) && (row.iter().sum::<f32>() - 1.0).abs() < TOLERANCE
            }),
            Self::OneHot => xx.chunks(last).all(|row| {
                row.iter().all(|&x| x == 0.0 || x == 1.0) && row.iter().sum::<f32>() == 1.0
            }),
            Self::IntegerInterval { lower, upper } => xx
                .iter()
                .all(|&x| x.fract() == 0.0 && x >= *lower as f32 && x <= *upper as f32),
            Self::LowerCholesky => {
                if dims.len() < 2 || dims[dims.len() - 1] != dims[dims.len() - 2] {
                    return Ok(false);
                }
                let d = last;
                xx.chunks(d * d).all(|mat| {
                    (0..d).all(|i| {
                        mat[i * d + i] > 0.0 && ((i + 1)..d).all(|j| mat[i * d + j] == 0.0)
                    })
                })
            }
        };
        Ok(ok)
    }
}
