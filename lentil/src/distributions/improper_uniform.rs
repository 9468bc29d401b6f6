use candle_core::{DType, Device, Tensor};

use super::constraints::Constraint;
use super::traits::Distribution;
use crate::error::{PplError, Result};
use crate::shape::value_batch_shape;

/// Flat density over `Real^dim`: every value scores zero.
///
/// It cannot be sampled; a site using it must get its value from an
/// enclosing handler, e.g. `replay`.
#[derive(Debug, Clone)]
pub struct ImproperUniform {
    event_shape: [usize; 1],
    dtype: DType,
    device: Device,
}

impl ImproperUniform {
    pub fn new(dim: usize, dtype: DType, device: &Device) -> Self {
        Self {
            event_shape: [dim],
            dtype,
            device: device.clone(),
        }
    }
}

impl Distribution for ImproperUniform {
    fn name(&self) -> &'static str {
        "ImproperUniform"
    }

    fn batch_shape(&self) -> &[usize] {
        &[]
    }

    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }

    fn support(&self) -> Constraint {
        Constraint::Real
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn sample(&self) -> Result<Tensor> {
        Err(PplError::unsupported(self.name(), "sample"))
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let out_dims = value_batch_shape(
            "improper uniform log_prob",
            value.dims(),
            &[],
            &self.event_shape,
        )?;
        Ok(Tensor::zeros(out_dims, self.dtype, &self.device)?)
    }
}
