use candle_core::{Device, Tensor};
use rand_distr::{Distribution as _, Gamma};
use special::Gamma as SpecialGamma;

use super::constraints::Constraint;
use super::traits::{host_values, Distribution};
use crate::error::{PplError, Result};
use crate::shape::{concat, value_batch_shape};

/// Dirichlet over the `K`-simplex; `concentration` has shape
/// `batch_shape ++ (K,)`.
///
/// The log normalizer `ln Γ(Σα) - Σ ln Γ(α)` is evaluated on the host when
/// the distribution is built, so `concentration` is treated as fixed by
/// `log_prob`.
#[derive(Debug, Clone)]
pub struct Dirichlet {
    concentration: Tensor,
    host_concentration: Vec<f32>,
    log_normalizer: Tensor,
    batch_shape: Vec<usize>,
    event_shape: [usize; 1],
}

impl Dirichlet {
    pub fn new(concentration: &Tensor) -> Result<Self> {
        let dims = concentration.dims().to_vec();
        let k = match dims.last() {
            Some(&k) if k > 1 => k,
            _ => {
                return Err(PplError::shape_mismatch(
                    "dirichlet concentration",
                    &dims,
                    &[2],
                ))
            }
        };

        let host_concentration = host_values(concentration)?;
        if let Some(bad) = host_concentration.iter().find(|&&a| !(a > 0.0)) {
            return Err(PplError::InvalidParameter(format!(
                "dirichlet concentration must be positive, found {}",
                bad
            )));
        }

        let batch_shape = dims[..dims.len() - 1].to_vec();
        let log_normalizer: Vec<f32> = host_concentration
            .chunks(k)
            .map(|alpha| {
                let a0: f64 = alpha.iter().map(|&a| a as f64).sum();
                let lgamma_sum: f64 = alpha
                    .iter()
                    .map(|&a| SpecialGamma::ln_gamma(a as f64).0)
                    .sum();
                (SpecialGamma::ln_gamma(a0).0 - lgamma_sum) as f32
            })
            .collect();
        let log_normalizer =
            Tensor::from_vec(log_normalizer, batch_shape.clone(), concentration.device())?
                .to_dtype(concentration.dtype())?;

        Ok(Self {
            concentration: concentration.clone(),
            host_concentration,
            log_normalizer,
            batch_shape,
            event_shape: [k],
        })
    }

    pub fn concentration(&self) -> &Tensor {
        &self.concentration
    }
}

impl Distribution for Dirichlet {
    fn name(&self) -> &'static str {
        "Dirichlet"
    }

    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }

    fn support(&self) -> Constraint {
        Constraint::Simplex
    }

    fn device(&self) -> &Device {
        self.concentration.device()
    }

    /// normalized Gamma(α_k, 1) draws
    fn sample(&self) -> Result<Tensor> {
        let k = self.event_shape[0];
        let mut rng = rand::rng();
        let mut out = Vec::with_capacity(self.host_concentration.len());
        for alpha in self.host_concentration.chunks(k) {
            let mut draws = Vec::with_capacity(k);
            for &a in alpha {
                let gamma = Gamma::new(a, 1.0)
                    .map_err(|e| PplError::InvalidParameter(format!("gamma({}): {}", a, e)))?;
                draws.push(gamma.sample(&mut rng));
            }
            let total: f32 = draws.iter().sum();
            out.extend(draws.into_iter().map(|g| g / total));
        }
        let out = Tensor::from_vec(out, self.shape(), self.device())?;
        Ok(out.to_dtype(self.concentration.dtype())?)
    }

    /// Σ (α_k - 1) ln x_k + ln Γ(Σα) - Σ ln Γ(α_k)
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let out_dims = value_batch_shape(
            "dirichlet log_prob",
            value.dims(),
            &self.batch_shape,
            &self.event_shape,
        )?;
        let full = concat(&out_dims, &self.event_shape);

        let ln_x = value.broadcast_as(full.clone())?.log()?;
        let alpha_m1 = (self.concentration.broadcast_as(full)? - 1.0)?;
        let kernel = alpha_m1.mul(&ln_x)?.sum(out_dims.len())?;
        Ok(kernel.broadcast_add(&self.log_normalizer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_flat_dirichlet_density() -> Result<()> {
        let dev = Device::Cpu;
        let d = Dirichlet::new(&Tensor::ones(3, DType::F32, &dev)?)?;
        // uniform on the 2-simplex: density Γ(3) = 2
        let lp: f32 = d.log_prob(&Tensor::new(&[0.2f32, 0.3, 0.5], &dev)?)?.to_scalar()?;
        assert!((lp - 2f32.ln()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_samples_on_simplex() -> Result<()> {
        let dev = Device::Cpu;
        let d = Dirichlet::new(&Tensor::new(&[[0.5f32, 2.0], [3.0, 1.0]], &dev)?)?;
        let x = d.sample()?;
        assert_eq!(x.dims(), &[2, 2]);
        assert!(Constraint::Simplex.check(&x)?);
        assert!(Dirichlet::new(&Tensor::new(&[0.0f32, 1.0], &dev)?).is_err());
        Ok(())
    }
}
