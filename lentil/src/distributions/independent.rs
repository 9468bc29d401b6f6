use candle_core::{Device, Tensor};

use super::constraints::Constraint;
use super::traits::{sum_rightmost, Distribution};
use crate::error::{PplError, Result};
use crate::shape::concat;

/// Reinterprets the rightmost `reinterpreted` batch dims of `base` as event
/// dims, so `log_prob` sums over them.
#[derive(Debug)]
pub struct Independent<B> {
    base: B,
    reinterpreted: usize,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl<B: Distribution> Independent<B> {
    pub fn new(base: B, reinterpreted: usize) -> Result<Self> {
        let base_batch = base.batch_shape();
        if reinterpreted > base_batch.len() {
            return Err(PplError::shape_mismatch(
                "independent",
                base_batch,
                &vec![1; reinterpreted],
            ));
        }
        let split = base_batch.len() - reinterpreted;
        let batch_shape = base_batch[..split].to_vec();
        let event_shape = concat(&base_batch[split..], base.event_shape());
        Ok(Self {
            base,
            reinterpreted,
            batch_shape,
            event_shape,
        })
    }

    pub fn base(&self) -> &B {
        &self.base
    }
}

impl<B: Distribution> Distribution for Independent<B> {
    fn name(&self) -> &'static str {
        "Independent"
    }

    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }

    fn support(&self) -> Constraint {
        self.base.support()
    }

    fn device(&self) -> &Device {
        self.base.device()
    }

    fn has_rsample(&self) -> bool {
        self.base.has_rsample()
    }

    fn sample(&self) -> Result<Tensor> {
        self.base.sample()
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        sum_rightmost(&self.base.log_prob(value)?, self.reinterpreted)
    }
}
