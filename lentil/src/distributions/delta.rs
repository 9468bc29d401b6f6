use candle_core::{Device, Tensor};

use super::constraints::Constraint;
use super::traits::{neg_inf_like, sum_rightmost, Distribution};
use crate::error::{PplError, Result};
use crate::shape::{concat, value_batch_shape};

/// Point mass at `value`, with an optional extra log density per batch
/// element. The rightmost `event_dim` dims of `value` form one event.
#[derive(Debug, Clone)]
pub struct Delta {
    value: Tensor,
    log_density: Option<Tensor>,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl Delta {
    pub fn new(value: &Tensor, event_dim: usize) -> Result<Self> {
        let dims = value.dims();
        if event_dim > dims.len() {
            return Err(PplError::shape_mismatch(
                "delta",
                dims,
                &vec![1; event_dim],
            ));
        }
        let split = dims.len() - event_dim;
        Ok(Self {
            value: value.clone(),
            log_density: None,
            batch_shape: dims[..split].to_vec(),
            event_shape: dims[split..].to_vec(),
        })
    }

    /// Add `log_density` (batch shaped) to every log probability.
    pub fn with_log_density(mut self, log_density: &Tensor) -> Result<Self> {
        if log_density.dims() != self.batch_shape.as_slice() {
            return Err(PplError::shape_mismatch(
                "delta log_density",
                log_density.dims(),
                &self.batch_shape,
            ));
        }
        self.log_density = Some(log_density.clone());
        Ok(self)
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }
}

impl Distribution for Delta {
    fn name(&self) -> &'static str {
        "Delta"
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
        self.value.device()
    }

    fn has_rsample(&self) -> bool {
        true
    }

    fn sample(&self) -> Result<Tensor> {
        Ok(self.value.clone())
    }

    /// 0 where `value` equals the atom, -inf elsewhere
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let out_dims = value_batch_shape(
            "delta log_prob",
            value.dims(),
            &self.batch_shape,
            &self.event_shape,
        )?;
        let full = concat(&out_dims, &self.event_shape);

        let x = value.to_dtype(self.value.dtype())?.broadcast_as(full.clone())?;
        let atom = self.value.detach().broadcast_as(full)?;
        let hit = x.detach().eq(&atom)?;
        let zeros = atom.zeros_like()?;
        let log_prob = hit.where_cond(&zeros, &neg_inf_like(&zeros)?)?;
        let log_prob = sum_rightmost(&log_prob, self.event_shape.len())?;

        match &self.log_density {
            Some(extra) => Ok(log_prob.broadcast_add(extra)?),
            None => Ok(log_prob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_mass() -> Result<()> {
        let dev = Device::Cpu;
        let atom = Tensor::new(&[1.0f32, 2.0, 3.0], &dev)?;
        let d = Delta::new(&atom, 1)?;
        assert!(d.batch_shape().is_empty());

        let at_atom: f32 = d.log_prob(&d.sample()?)?.to_scalar()?;
        assert_eq!(at_atom, 0.0);

        let elsewhere: f32 = d
            .log_prob(&Tensor::new(&[1.0f32, 2.0, 4.0], &dev)?)?
            .to_scalar()?;
        assert_eq!(elsewhere, f32::NEG_INFINITY);
        Ok(())
    }

    #[test]
    fn test_log_density() -> Result<()> {
        let dev = Device::Cpu;
        let d = Delta::new(&Tensor::new(&[0.5f32, 0.5], &dev)?, 0)?
            .with_log_density(&Tensor::new(&[-1.0f32, 2.0], &dev)?)?;
        let lp: Vec<f32> = d.log_prob(&Tensor::new(&[0.5f32, 0.5], &dev)?)?.to_vec1()?;
        assert_eq!(lp, vec![-1.0, 2.0]);
        Ok(())
    }
}
