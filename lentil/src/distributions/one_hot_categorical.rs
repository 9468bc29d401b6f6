use candle_core::{Device, Tensor};
use rand_distr::{Distribution as _, Gumbel};

use super::categorical::Categorical;
use super::constraints::Constraint;
use super::traits::Distribution;
use crate::error::{PplError, Result};
use crate::shape::{concat, value_batch_shape};

/// How `OneHotCategorical::sample` carries gradients back to `probs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelaxedStrategy {
    /// Hard one-hot value forward, gradient of `probs` backward.
    StraightThrough,
    /// `softmax((log p + g) / temperature)` with Gumbel noise `g`.
    GumbelSoftmax { temperature: f64 },
}

/// Categorical distribution over one-hot vectors of length `K`.
///
/// Same batch shape as [`Categorical`] on the same `probs`, with event shape
/// `(K,)`, so `shape() == probs.dims()`. Values share the dtype of `probs`.
#[derive(Debug, Clone)]
pub struct OneHotCategorical {
    categorical: Categorical,
    event_shape: [usize; 1],
    relaxed: Option<RelaxedStrategy>,
}

impl OneHotCategorical {
    pub fn new(probs: &Tensor) -> Result<Self> {
        let categorical = Categorical::new(probs)?;
        let k = categorical.num_categories();
        Ok(Self {
            categorical,
            event_shape: [k],
            relaxed: None,
        })
    }

    /// Turn on reparameterized sampling with the given strategy.
    pub fn with_rsample(mut self, strategy: RelaxedStrategy) -> Result<Self> {
        if let RelaxedStrategy::GumbelSoftmax { temperature } = strategy {
            if temperature <= 0.0 {
                return Err(PplError::InvalidParameter(format!(
                    "gumbel-softmax temperature {}",
                    temperature
                )));
            }
        }
        self.relaxed = Some(strategy);
        Ok(self)
    }

    pub fn probs(&self) -> &Tensor {
        self.categorical.probs()
    }

    pub fn num_categories(&self) -> usize {
        self.event_shape[0]
    }

    fn hard_sample(&self) -> Result<Tensor> {
        let k = self.num_categories();
        let probs = self.probs();
        let indices = self.categorical.sample_indices()?;
        let n = indices.len();
        let indices = Tensor::from_vec(indices, n, probs.device())?;
        let eye = Tensor::eye(k, probs.dtype(), probs.device())?;
        Ok(eye.index_select(&indices, 0)?.reshape(self.shape())?)
    }

    fn gumbel_softmax(&self, temperature: f64) -> Result<Tensor> {
        let probs = self.probs();
        let gumbel = Gumbel::new(0.0f32, 1.0f32)
            .map_err(|e| PplError::InvalidParameter(format!("gumbel noise: {}", e)))?;
        let mut rng = rand::rng();
        let noise: Vec<f32> = (0..probs.elem_count())
            .map(|_| gumbel.sample(&mut rng))
            .collect();
        let noise =
            Tensor::from_vec(noise, self.shape(), probs.device())?.to_dtype(probs.dtype())?;

        let scores = ((self.categorical.logits() + noise)? / temperature)?;
        Ok(candle_nn::ops::softmax_last_dim(&scores)?)
    }
}

impl Distribution for OneHotCategorical {
    fn name(&self) -> &'static str {
        "OneHotCategorical"
    }

    fn batch_shape(&self) -> &[usize] {
        self.categorical.batch_shape()
    }

    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }

    fn support(&self) -> Constraint {
        Constraint::OneHot
    }

    fn device(&self) -> &Device {
        self.categorical.device()
    }

    fn has_rsample(&self) -> bool {
        self.relaxed.is_some()
    }

    fn sample(&self) -> Result<Tensor> {
        match self.relaxed {
            None => self.hard_sample(),
            Some(RelaxedStrategy::StraightThrough) => {
                let probs = self.probs();
                let surrogate = (probs - probs.detach())?;
                Ok((self.hard_sample()? + surrogate)?)
            }
            Some(RelaxedStrategy::GumbelSoftmax { temperature }) => {
                self.gumbel_softmax(temperature)
            }
        }
    }

    /// `sum_k x_k log p_k`; entries with `x_k == 0` contribute exactly zero
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let out_dims = value_batch_shape(
            "one-hot categorical log_prob",
            value.dims(),
            self.batch_shape(),
            &self.event_shape,
        )?;
        let full = concat(&out_dims, &self.event_shape);

        let logits = self.categorical.logits().broadcast_as(full.clone())?;
        let value = value.to_dtype(logits.dtype())?.broadcast_as(full)?;

        let active = value.ne(0.0)?;
        let logits = active.where_cond(&logits, &logits.zeros_like()?)?;
        Ok(logits.mul(&value)?.sum(out_dims.len())?)
    }

    /// `(K,) ++ batch_shape ++ (K,)`, slice `k` is the encoding of index `k`
    fn enumerate_support(&self) -> Result<Tensor> {
        let k = self.num_categories();
        let batch = self.batch_shape();
        let probs = self.probs();

        let mut view = vec![1; batch.len() + 2];
        view[0] = k;
        view[batch.len() + 1] = k;

        let values = Tensor::eye(k, probs.dtype(), probs.device())?
            .reshape(view)?
            .broadcast_as(concat(&concat(&[k], batch), &[k]))?
            .contiguous()?;
        Ok(values)
    }
}
