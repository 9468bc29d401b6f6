use candle_core::{DType, Device, Tensor};

use super::constraints::Constraint;
use super::traits::{host_values, Distribution};
use crate::error::{PplError, Result};
use crate::shape::{broadcast_shapes, value_batch_shape};

/// Univariate Gaussian N(μ, σ²), batched over the broadcast of `loc` and
/// `scale`.
///
/// Sampling is reparameterized: x = μ + σ * ε, ε ~ N(0, 1).
#[derive(Debug, Clone)]
pub struct Normal {
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl Normal {
    /// # Arguments
    /// * `loc` - mean μ
    /// * `scale` - standard deviation σ, must be positive
    pub fn new(loc: &Tensor, scale: &Tensor) -> Result<Self> {
        let batch_shape = broadcast_shapes("normal", loc.dims(), scale.dims())?;

        if let Some(bad) = host_values(scale)?.into_iter().find(|&s| !(s > 0.0)) {
            return Err(PplError::InvalidParameter(format!(
                "normal scale must be positive, found {}",
                bad
            )));
        }

        Ok(Self {
            loc: loc.broadcast_as(batch_shape.clone())?,
            scale: scale.broadcast_as(batch_shape.clone())?,
            batch_shape,
        })
    }

    /// Scalar N(loc, scale²) as f32 on `device`.
    pub fn standard(loc: f32, scale: f32, device: &Device) -> Result<Self> {
        Self::new(&Tensor::new(loc, device)?, &Tensor::new(scale, device)?)
    }

    pub fn loc(&self) -> &Tensor {
        &self.loc
    }

    pub fn scale(&self) -> &Tensor {
        &self.scale
    }

    pub fn dtype(&self) -> DType {
        self.loc.dtype()
    }
}

impl Distribution for Normal {
    fn name(&self) -> &'static str {
        "Normal"
    }

    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    fn event_shape(&self) -> &[usize] {
        &[]
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

    fn sample(&self) -> Result<Tensor> {
        // ε ~ N(0, I)
        let epsilon = Tensor::randn(0f32, 1f32, self.batch_shape.clone(), self.device())?
            .to_dtype(self.dtype())?;
        Ok((&self.loc + epsilon.mul(&self.scale)?)?)
    }

    /// log N(x; μ, σ²) = -0.5 * [(x-μ)²/σ² + 2*ln(σ) + ln(2π)]
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let out_dims = value_batch_shape("normal log_prob", value.dims(), &self.batch_shape, &[])?;
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();

        let x = value.broadcast_as(out_dims.clone())?;
        let loc = self.loc.broadcast_as(out_dims.clone())?;
        let scale = self.scale.broadcast_as(out_dims)?;

        let normalized_sq = (x - loc)?.div(&scale)?.sqr()?;
        let two_ln_scale = (scale.log()? * 2.0)?;
        Ok((((normalized_sq + two_ln_scale)? + ln_2pi)? * (-0.5))?)
    }
}

/// exp of a Gaussian; support on the positive reals.
#[derive(Debug, Clone)]
pub struct LogNormal {
    base: Normal,
}

impl LogNormal {
    pub fn new(loc: &Tensor, scale: &Tensor) -> Result<Self> {
        Ok(Self {
            base: Normal::new(loc, scale)?,
        })
    }

    pub fn base(&self) -> &Normal {
        &self.base
    }
}

impl Distribution for LogNormal {
    fn name(&self) -> &'static str {
        "LogNormal"
    }

    fn batch_shape(&self) -> &[usize] {
        self.base.batch_shape()
    }

    fn event_shape(&self) -> &[usize] {
        &[]
    }

    fn support(&self) -> Constraint {
        Constraint::Positive
    }

    fn device(&self) -> &Device {
        self.base.device()
    }

    fn has_rsample(&self) -> bool {
        true
    }

    fn sample(&self) -> Result<Tensor> {
        Ok(self.base.sample()?.exp()?)
    }

    /// log N(ln x; μ, σ²) - ln x
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let ln_x = value.log()?;
        Ok(self.base.log_prob(&ln_x)?.broadcast_sub(&ln_x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_prob_at_mean() -> Result<()> {
        let dev = Device::Cpu;
        let d = Normal::new(&Tensor::zeros(3, DType::F32, &dev)?, &Tensor::new(2f32, &dev)?)?;
        assert_eq!(d.batch_shape(), &[3]);

        let lp: Vec<f32> = d.log_prob(&Tensor::zeros(3, DType::F32, &dev)?)?.to_vec1()?;
        let expected = -0.5 * (2.0 * std::f32::consts::PI).ln() - 2f32.ln();
        for v in lp {
            assert!((v - expected).abs() < 1e-5, "expected {}, got {}", expected, v);
        }
        Ok(())
    }

    #[test]
    fn test_value_broadcasts_over_batch() -> Result<()> {
        let dev = Device::Cpu;
        let d = Normal::new(&Tensor::new(&[0.5f32], &dev)?, &Tensor::new(&[1f32], &dev)?)?;
        let data = Tensor::new(&[-0.1f32, 0.3, 0.2, 0.5], &dev)?;
        assert_eq!(d.log_prob(&data)?.dims(), &[4]);
        Ok(())
    }

    #[test]
    fn test_rejects_non_positive_scale() -> Result<()> {
        assert!(Normal::standard(0.0, 0.0, &Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn test_sample_is_differentiable() -> Result<()> {
        let dev = Device::Cpu;
        let loc = candle_core::Var::new(&[1f32, 2.0], &dev)?;
        let d = Normal::new(loc.as_tensor(), &Tensor::new(&[0.1f32, 0.1], &dev)?)?;
        let grads = d.sample()?.sum_all()?.backward()?;
        let g: Vec<f32> = grads.get(&loc).expect("loc gradient").to_vec1()?;
        assert_eq!(g, vec![1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_continuous_support_is_not_enumerable() -> Result<()> {
        use crate::distributions::MultivariateNormal;
        let dev = Device::Cpu;

        let normal = Normal::standard(0.0, 1.0, &dev)?;
        assert!(matches!(
            normal.enumerate_support(),
            Err(PplError::Unsupported { .. })
        ));

        let mvn = MultivariateNormal::new(
            &Tensor::zeros(2, DType::F32, &dev)?,
            &Tensor::eye(2, DType::F32, &dev)?,
        )?;
        assert!(matches!(
            mvn.enumerate_support(),
            Err(PplError::Unsupported { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_log_normal() -> Result<()> {
        let dev = Device::Cpu;
        let d = LogNormal::new(&Tensor::new(0f32, &dev)?, &Tensor::new(1f32, &dev)?)?;
        let lp: f32 = d.log_prob(&Tensor::new(1f32, &dev)?)?.to_scalar()?;
        assert!((lp + 0.5 * (2.0 * std::f32::consts::PI).ln()).abs() < 1e-5);
        assert!(host_values(&d.sample()?)?.iter().all(|&x| x > 0.0));
        Ok(())
    }
}
