use candle_core::{DType, Device, IndexOp, Tensor};

use super::constraints::Constraint;
use super::traits::Distribution;
use crate::error::{PplError, Result};
use crate::shape::{concat, numel, value_batch_shape};

/// Multivariate Gaussian N(μ, L Lᵀ) parameterized by a lower-Cholesky
/// factor `scale_tril` (d x d). `loc` has shape `batch_shape ++ (d,)`.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    loc: Tensor,
    scale_tril: Tensor,
    batch_shape: Vec<usize>,
    event_shape: [usize; 1],
}

impl MultivariateNormal {
    pub fn new(loc: &Tensor, scale_tril: &Tensor) -> Result<Self> {
        let d = match loc.dims().last() {
            Some(&d) => d,
            None => return Err(PplError::shape_mismatch("multivariate normal loc", &[], &[1])),
        };
        if scale_tril.dims() != [d, d] {
            return Err(PplError::shape_mismatch(
                "multivariate normal scale_tril",
                scale_tril.dims(),
                &[d, d],
            ));
        }
        if !Constraint::LowerCholesky.check(scale_tril)? {
            return Err(PplError::InvalidParameter(
                "scale_tril must be lower triangular with a positive diagonal".into(),
            ));
        }

        let dims = loc.dims();
        Ok(Self {
            loc: loc.clone(),
            scale_tril: scale_tril.clone(),
            batch_shape: dims[..dims.len() - 1].to_vec(),
            event_shape: [d],
        })
    }

    pub fn loc(&self) -> &Tensor {
        &self.loc
    }

    pub fn scale_tril(&self) -> &Tensor {
        &self.scale_tril
    }

    /// L Lᵀ
    pub fn covariance(&self) -> Result<Tensor> {
        Ok(self.scale_tril.matmul(&self.scale_tril.t()?)?)
    }

    fn dim(&self) -> usize {
        self.event_shape[0]
    }

    fn dtype(&self) -> DType {
        self.loc.dtype()
    }

    /// Solve L z = r row by row for r of shape (n, d).
    fn solve_tril(&self, r_nd: &Tensor) -> Result<Tensor> {
        let d = self.dim();
        let mut z_cols: Vec<Tensor> = Vec::with_capacity(d);
        for i in 0..d {
            let mut rhs = r_nd.narrow(1, i, 1)?;
            if i > 0 {
                let z_prev = Tensor::cat(&z_cols, 1)?;
                let l_row = self.scale_tril.narrow(0, i, 1)?.narrow(1, 0, i)?;
                rhs = (rhs - z_prev.broadcast_mul(&l_row)?.sum_keepdim(1)?)?;
            }
            let l_ii = self.scale_tril.i((i, i))?;
            z_cols.push(rhs.broadcast_div(&l_ii)?);
        }
        Ok(Tensor::cat(&z_cols, 1)?)
    }
}

impl Distribution for MultivariateNormal {
    fn name(&self) -> &'static str {
        "MultivariateNormal"
    }

    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }

    fn support(&self) -> Constraint {
        Constraint::Real
    }

    fn device(&self) -> &Device {
        self.loc.device()
    }

    fn has_rsample(&self) -> bool {
        true
    }

    /// x = μ + L ε
    fn sample(&self) -> Result<Tensor> {
        let d = self.dim();
        let n = numel(&self.batch_shape);
        let eps_nd = Tensor::randn(0f32, 1f32, (n, d), self.device())?.to_dtype(self.dtype())?;
        let shift = eps_nd.matmul(&self.scale_tril.t()?)?.reshape(self.shape())?;
        Ok((&self.loc + shift)?)
    }

    /// -0.5 |L⁻¹(x - μ)|² - Σ log L_ii - (d/2) ln(2π)
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let d = self.dim();
        let out_dims = value_batch_shape(
            "multivariate normal log_prob",
            value.dims(),
            &self.batch_shape,
            &self.event_shape,
        )?;
        let full = concat(&out_dims, &self.event_shape);
        let n = numel(&out_dims);

        let diff = (value.broadcast_as(full.clone())? - self.loc.broadcast_as(full)?)?;
        let z_nd = self.solve_tril(&diff.reshape((n, d))?)?;
        let mahalanobis_n = z_nd.sqr()?.sum(1)?;

        let eye = Tensor::eye(d, self.dtype(), self.device())?;
        let half_log_det = self.scale_tril.mul(&eye)?.sum(1)?.log()?.sum_all()?;
        let constant = 0.5 * d as f64 * (2.0 * std::f64::consts::PI).ln();

        let log_prob_n = ((mahalanobis_n * (-0.5))?.broadcast_sub(&half_log_det)? - constant)?;
        Ok(log_prob_n.reshape(out_dims)?)
    }
}
