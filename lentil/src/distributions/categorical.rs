use candle_core::{DType, Device, Tensor};
use rand_distr::weighted::WeightedIndex;
use rand_distr::Distribution as _;

use super::constraints::Constraint;
use super::traits::{host_values, masked_log, Distribution};
use crate::error::{PplError, Result};
use crate::shape::{concat, value_batch_shape};

/// Rows of `probs` may be off from one by this much.
pub const NORMALIZATION_TOLERANCE: f32 = 1e-4;

/// Categorical distribution over `{0, .., K-1}`.
///
/// `probs` has shape `batch_shape ++ (K,)`; any number of leading axes are
/// batch axes. Values are `u32` category indices with an empty event shape.
#[derive(Debug, Clone)]
pub struct Categorical {
    probs: Tensor,
    logits: Tensor,
    host_probs: Vec<f32>,
    num_categories: usize,
    batch_shape: Vec<usize>,
}

impl Categorical {
    /// Build from a probability tensor; each row along the last axis must
    /// be non-negative and sum to one.
    pub fn new(probs: &Tensor) -> Result<Self> {
        let dims = probs.dims().to_vec();
        let num_categories = match dims.last() {
            Some(&k) if k > 0 => k,
            _ => return Err(PplError::shape_mismatch("categorical probs", &dims, &[1])),
        };

        let host_probs = host_values(probs)?;
        // negated comparisons so NaN is rejected too
        if let Some(&value) = host_probs.iter().find(|&&p| !(p >= 0.0)) {
            return Err(PplError::NegativeProbability { value });
        }
        for row in host_probs.chunks(num_categories) {
            let sum: f32 = row.iter().sum();
            if !((sum - 1.0).abs() <= NORMALIZATION_TOLERANCE) {
                return Err(PplError::NotNormalized { sum });
            }
        }

        Ok(Self {
            logits: masked_log(probs)?,
            probs: probs.clone(),
            host_probs,
            num_categories,
            batch_shape: dims[..dims.len() - 1].to_vec(),
        })
    }

    /// Build from unnormalized log weights along the last axis.
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        Self::new(&candle_nn::ops::softmax_last_dim(logits)?)
    }

    pub fn probs(&self) -> &Tensor {
        &self.probs
    }

    /// `log(probs)`, `-inf` at zero-probability categories
    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn num_categories(&self) -> usize {
        self.num_categories
    }

    /// One category index per batch element, row-major.
    pub(crate) fn sample_indices(&self) -> Result<Vec<u32>> {
        let mut rng = rand::rng();
        self.host_probs
            .chunks(self.num_categories)
            .map(|row| {
                let disc = WeightedIndex::new(row).map_err(|e| {
                    PplError::InvalidParameter(format!("categorical weights: {}", e))
                })?;
                Ok(disc.sample(&mut rng) as u32)
            })
            .collect()
    }

    /// Category indices of `value` broadcast to the batch, after checking
    /// they lie in `0..K`.
    fn checked_indices(&self, value: &Tensor, out_dims: &[usize]) -> Result<Tensor> {
        let support = self.support();
        if !support.check(value)? {
            return Err(PplError::OutOfSupport(format!(
                "{} with {} categories",
                self.name(),
                self.num_categories
            )));
        }
        Ok(value
            .to_dtype(DType::U32)?
            .broadcast_as(out_dims.to_vec())?
            .contiguous()?)
    }
}

impl Distribution for Categorical {
    fn name(&self) -> &'static str {
        "Categorical"
    }

    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    fn event_shape(&self) -> &[usize] {
        &[]
    }

    fn support(&self) -> Constraint {
        Constraint::IntegerInterval {
            lower: 0,
            upper: self.num_categories - 1,
        }
    }

    fn device(&self) -> &Device {
        self.probs.device()
    }

    fn sample(&self) -> Result<Tensor> {
        let indices = self.sample_indices()?;
        Ok(Tensor::from_vec(
            indices,
            self.batch_shape.clone(),
            self.device(),
        )?)
    }

    /// `log(probs[value])` gathered along the category axis
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let out_dims =
            value_batch_shape("categorical log_prob", value.dims(), &self.batch_shape, &[])?;
        let rank = out_dims.len();

        let index = self.checked_indices(value, &out_dims)?.unsqueeze(rank)?;
        let logits = self
            .logits
            .broadcast_as(concat(&out_dims, &[self.num_categories]))?
            .contiguous()?;

        Ok(logits.gather(&index, rank)?.squeeze(rank)?)
    }

    /// `(K,) ++ batch_shape`, category `k` in slice `k`
    fn enumerate_support(&self) -> Result<Tensor> {
        let k = self.num_categories;
        let mut view = vec![1; self.batch_shape.len() + 1];
        view[0] = k;

        let values = Tensor::arange(0u32, k as u32, self.device())?
            .reshape(view)?
            .broadcast_as(concat(&[k], &self.batch_shape))?
            .contiguous()?;
        Ok(values)
    }
}
