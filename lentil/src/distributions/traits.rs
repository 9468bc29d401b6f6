use candle_core::{Device, Tensor};

use super::constraints::Constraint;
use crate::error::{PplError, Result};
use crate::shape::concat;

/// Contract shared by every distribution that can appear at a sample site.
///
/// `batch_shape` and `event_shape` are fixed when the distribution is
/// built. `log_prob` takes a value whose trailing dims equal `event_shape`
/// and whose leading dims broadcast against `batch_shape`, and returns one
/// log density per batch element.
pub trait Distribution: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn batch_shape(&self) -> &[usize];

    fn event_shape(&self) -> &[usize];

    /// `batch_shape ++ event_shape`
    fn shape(&self) -> Vec<usize> {
        concat(self.batch_shape(), self.event_shape())
    }

    fn support(&self) -> Constraint;

    fn device(&self) -> &Device;

    /// Whether `sample` is differentiable w.r.t. the parameters.
    fn has_rsample(&self) -> bool {
        false
    }

    /// Draw one value of shape `shape()`.
    fn sample(&self) -> Result<Tensor>;

    /// Log density, shape = leading dims of `value` broadcast with `batch_shape`.
    fn log_prob(&self, value: &Tensor) -> Result<Tensor>;

    /// All values of a discrete support stacked along a new leading axis.
    fn enumerate_support(&self) -> Result<Tensor> {
        Err(PplError::unsupported(self.name(), "enumerate_support"))
    }
}

/// A tensor of `-inf` with the shape and dtype of `like`.
pub(crate) fn neg_inf_like(like: &Tensor) -> Result<Tensor> {
    Ok(like.zeros_like()?.affine(1.0, f64::NEG_INFINITY)?)
}

/// `log(x)` with `-inf` wherever `x == 0`; `log` itself never sees a zero
pub(crate) fn masked_log(x: &Tensor) -> Result<Tensor> {
    let positive = x.gt(0.0)?;
    let safe = positive.where_cond(x, &x.ones_like()?)?;
    Ok(positive.where_cond(&safe.log()?, &neg_inf_like(x)?)?)
}

/// Sum out the trailing `n` dims.
pub(crate) fn sum_rightmost(x: &Tensor, n: usize) -> Result<Tensor> {
    let mut out = x.clone();
    for _ in 0..n {
        out = out.sum(out.rank() - 1)?;
    }
    Ok(out)
}

/// Host-side copy of a tensor as f32, in row-major order.
pub(crate) fn host_values(x: &Tensor) -> Result<Vec<f32>> {
    Ok(x
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?
        .to_vec1()?)
}
