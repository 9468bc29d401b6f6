//! A chain of Gaussians with a closed-form posterior, used to check that
//! ADVI recovers the exact answer.
//!
//! ```text
//! x_0 = mu0
//! x_n ~ N(x_{n-1}, 1 / lambda_n)     n = 1..N
//! y_j ~ N(x_N, 1 / lambda_obs)       j = 1..m
//! ```

use candle_core::{Device, Tensor};

use crate::distributions::Normal;
use crate::error::{PplError, Result};
use crate::poutine::{Context, Program};

#[derive(Debug, Clone)]
pub struct GaussianChain {
    pub mu0: f32,
    /// precisions `lambda_1..lambda_N` of the transitions
    pub lambdas: Vec<f32>,
    pub lambda_obs: f32,
    pub data: Vec<f32>,
    device: Device,
}

/// Posterior mean and variance of one chain node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePosterior {
    pub mean: f64,
    pub variance: f64,
}

impl GaussianChain {
    pub fn new(
        mu0: f32,
        lambdas: Vec<f32>,
        lambda_obs: f32,
        data: Vec<f32>,
        device: &Device,
    ) -> Result<Self> {
        if lambdas.is_empty() {
            return Err(PplError::InvalidParameter(
                "chain needs at least one node".into(),
            ));
        }
        let mut precisions = lambdas.iter().chain(std::iter::once(&lambda_obs));
        if let Some(bad) = precisions.find(|&&l| !(l > 0.0)) {
            return Err(PplError::InvalidParameter(format!(
                "precision must be positive, found {}",
                bad
            )));
        }
        if data.is_empty() {
            return Err(PplError::InvalidParameter("chain needs observations".into()));
        }
        Ok(Self {
            mu0,
            lambdas,
            lambda_obs,
            data,
            device: device.clone(),
        })
    }

    /// N = 3, mu0 = 0, lambdas = [1, 1.5, 2], lambda_obs = 2.5, four
    /// observations.
    pub fn benchmark(device: &Device) -> Result<Self> {
        Self::new(0.0, vec![1.0, 1.5, 2.0], 2.5, vec![-0.1, 0.3, 0.2, 0.5], device)
    }

    pub fn len(&self) -> usize {
        self.lambdas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lambdas.is_empty()
    }

    pub fn site_name(n: usize) -> String {
        format!("x_{}", n)
    }

    /// Exact posterior of `x_1..x_N` given the data.
    pub fn analytic_posterior(&self) -> Vec<NodePosterior> {
        let n = self.len();
        let mu0 = self.mu0 as f64;

        // prior marginal variances v_k = sum_{i<=k} 1 / lambda_i
        let mut prior_var = Vec::with_capacity(n);
        let mut acc = 0.0;
        for &l in &self.lambdas {
            acc += 1.0 / l as f64;
            prior_var.push(acc);
        }

        let lambda_obs = self.lambda_obs as f64;
        let m = self.data.len() as f64;
        let sum_y: f64 = self.data.iter().map(|&y| y as f64).sum();

        let v_last = prior_var[n - 1];
        let precision = 1.0 / v_last + m * lambda_obs;
        let mut out = vec![
            NodePosterior {
                mean: 0.0,
                variance: 0.0
            };
            n
        ];
        out[n - 1] = NodePosterior {
            mean: (mu0 / v_last + lambda_obs * sum_y) / precision,
            variance: 1.0 / precision,
        };

        // x_k | x_{k+1} ~ N(mu0 (1 - kappa) + kappa x_{k+1}, cond_var)
        for k in (0..n - 1).rev() {
            let v = prior_var[k];
            let step_var = 1.0 / self.lambdas[k + 1] as f64;
            let kappa = v / (v + step_var);
            let cond_var = v * step_var / (v + step_var);
            let next = out[k + 1];
            out[k] = NodePosterior {
                mean: mu0 * (1.0 - kappa) + kappa * next.mean,
                variance: cond_var + kappa * kappa * next.variance,
            };
        }
        out
    }
}

impl Program<()> for GaussianChain {
    fn run(&self, ctx: &mut Context, _: &()) -> Result<()> {
        let mut x = Tensor::new(&[self.mu0], &self.device)?;
        for (i, &lambda) in self.lambdas.iter().enumerate() {
            let scale = Tensor::new(&[1.0 / lambda.sqrt()], &self.device)?;
            x = ctx.sample(&Self::site_name(i + 1), Normal::new(&x, &scale)?)?;
        }
        let obs_scale = Tensor::new(&[1.0 / self.lambda_obs.sqrt()], &self.device)?;
        let data = Tensor::new(self.data.as_slice(), &self.device)?;
        ctx.observe("obs", Normal::new(&x, &obs_scale)?, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_posterior() -> Result<()> {
        // prior N(0, 1), one observation y = 1 with unit precision
        let chain = GaussianChain::new(0.0, vec![1.0], 1.0, vec![1.0], &Device::Cpu)?;
        let post = chain.analytic_posterior();
        assert!((post[0].mean - 0.5).abs() < 1e-12);
        assert!((post[0].variance - 0.5).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_benchmark_posterior_is_proper() -> Result<()> {
        let chain = GaussianChain::benchmark(&Device::Cpu)?;
        let post = chain.analytic_posterior();
        assert_eq!(post.len(), 3);
        // posterior variance shrinks below the prior marginal variance
        let prior = [1.0, 1.0 + 1.0 / 1.5, 1.0 + 1.0 / 1.5 + 0.5];
        for (p, v) in post.iter().zip(prior.iter()) {
            assert!(p.variance > 0.0 && p.variance < *v);
        }
        // data mean is 0.225; the last node is pulled towards it
        assert!(post[2].mean > 0.0 && post[2].mean < 0.225);
        Ok(())
    }

    #[test]
    fn test_model_sites() -> Result<()> {
        use crate::poutine::trace;
        let chain = GaussianChain::benchmark(&Device::Cpu)?;
        let mut ctx = Context::default();
        let t = trace(chain).get_trace(&mut ctx, &())?;
        assert_eq!(t.names(), vec!["x_1", "x_2", "x_3", "obs"]);
        assert_eq!(t.node("obs").map(|n| n.is_observed), Some(true));
        Ok(())
    }
}
