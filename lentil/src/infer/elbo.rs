//! Monte Carlo ELBO estimators over a model/guide pair.

use candle_core::Tensor;

use crate::error::{PplError, Result};
use crate::poutine::{replay, trace, Context, Program, Trace};

/// Which surrogate the loss is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossKind {
    /// Pathwise gradients only; sites without a reparameterized sampler
    /// pass no gradient through their value.
    #[default]
    Elbo,
    /// Adds a score-function (REINFORCE) term `log q(z) * detach(elbo)`
    /// for every guide site that cannot be reparameterized.
    ScoreFunctionElbo,
}

/// Configuration for the ELBO estimator.
#[derive(Debug, Clone)]
pub struct ElboConfig {
    pub loss: LossKind,
    /// Number of guide samples averaged per estimate
    pub num_particles: usize,
}

impl Default for ElboConfig {
    fn default() -> Self {
        Self {
            loss: LossKind::Elbo,
            num_particles: 1,
        }
    }
}

/// Result of one estimate.
pub struct ElboEstimate {
    /// Scalar to differentiate; its gradient is minus the ELBO gradient.
    pub surrogate_loss: Tensor,
    /// Plain ELBO value, averaged over particles
    pub elbo: f32,
}

impl ElboEstimate {
    pub fn loss(&self) -> f32 {
        -self.elbo
    }
}

/// Latent sites must line up between the two traces.
pub fn check_site_consistency(model_trace: &Trace, guide_trace: &Trace) -> Result<()> {
    for node in model_trace.stochastic_nodes() {
        if !guide_trace.contains(&node.name) {
            return Err(PplError::SiteMismatch {
                site: node.name.clone(),
                problem: "latent in the model but missing from the guide",
            });
        }
    }
    for node in guide_trace.stochastic_nodes() {
        match model_trace.node(&node.name) {
            None => {
                return Err(PplError::SiteMismatch {
                    site: node.name.clone(),
                    problem: "in the guide but missing from the model",
                })
            }
            Some(m) if m.is_observed => {
                return Err(PplError::SiteMismatch {
                    site: node.name.clone(),
                    problem: "sampled by the guide but observed in the model",
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// `log p - log q` summed over both traces. A trace without sites
/// contributes zero on the device of the other one.
fn log_density_difference(model_trace: &Trace, guide_trace: &Trace) -> Result<Tensor> {
    let diff = match (model_trace.log_prob_sum()?, guide_trace.log_prob_sum()?) {
        (Some(p), Some(q)) => (p - q)?,
        (Some(p), None) => p,
        (None, Some(q)) => q.neg()?,
        (None, None) => {
            return Err(PplError::unsupported("a model and guide without sites", "elbo"))
        }
    };
    Ok(diff)
}

/// Guide trace, then the model replayed against it.
pub fn get_traces<M, G, A>(
    ctx: &mut Context,
    model: &M,
    guide: &G,
    args: &A,
) -> Result<(Trace, Trace)>
where
    M: Program<A>,
    G: Program<A>,
    A: ?Sized,
{
    let guide_trace = trace(|ctx: &mut Context, a: &A| guide.run(ctx, a)).get_trace(ctx, args)?;
    let model_trace = trace(replay(
        |ctx: &mut Context, a: &A| model.run(ctx, a),
        &guide_trace,
    ))
    .get_trace(ctx, args)?;

    check_site_consistency(&model_trace, &guide_trace)?;
    model_trace.compute_batch_log_pdf()?;
    guide_trace.compute_batch_log_pdf()?;
    Ok((model_trace, guide_trace))
}

/// ELBO = E_q[log p(x, z) - log q(z)], averaged over `num_particles`
/// draws from the guide.
pub fn estimate<M, G, A>(
    ctx: &mut Context,
    model: &M,
    guide: &G,
    args: &A,
    config: &ElboConfig,
) -> Result<ElboEstimate>
where
    M: Program<A>,
    G: Program<A>,
    A: ?Sized,
{
    let num_particles = config.num_particles.max(1);
    let mut surrogate: Option<Tensor> = None;
    let mut elbo_total = 0f32;

    for _ in 0..num_particles {
        let (model_trace, guide_trace) = get_traces(ctx, model, guide, args)?;
        let elbo = log_density_difference(&model_trace, &guide_trace)?;
        elbo_total += elbo.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;

        let mut particle = elbo.clone();
        if config.loss == LossKind::ScoreFunctionElbo {
            let reward = elbo.detach();
            for node in guide_trace.stochastic_nodes().filter(|n| !n.has_rsample()) {
                if let Some(log_q) = node.log_prob() {
                    let score = log_q.sum_all()?.mul(&reward)?;
                    particle = (particle + score)?;
                }
            }
        }

        surrogate = Some(match surrogate {
            Some(acc) => (acc + particle)?,
            None => particle,
        });
    }

    let surrogate = surrogate.ok_or_else(|| PplError::unsupported("zero particles", "elbo"))?;
    Ok(ElboEstimate {
        surrogate_loss: (surrogate / -(num_particles as f64))?,
        elbo: elbo_total / num_particles as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Normal;
    use crate::error::Result;
    use candle_core::{Device, Tensor};

    fn model(ctx: &mut Context, _: &()) -> Result<()> {
        ctx.sample("z", Normal::standard(0.0, 1.0, &Device::Cpu)?)?;
        Ok(())
    }

    #[test]
    fn test_missing_guide_site() -> Result<()> {
        let guide = |ctx: &mut Context, _: &()| -> Result<()> {
            ctx.sample("w", Normal::standard(0.0, 1.0, &Device::Cpu)?)?;
            Ok(())
        };
        let mut ctx = Context::default();
        let err = get_traces(&mut ctx, &model, &guide, &());
        assert!(matches!(err, Err(PplError::SiteMismatch { .. })));
        Ok(())
    }

    #[test]
    fn test_empty_guide_uses_model_density() -> Result<()> {
        let observed = |ctx: &mut Context, _: &()| -> Result<()> {
            let x = Tensor::new(0f32, &Device::Cpu)?;
            ctx.observe("x", Normal::standard(0.0, 1.0, &Device::Cpu)?, &x)?;
            Ok(())
        };
        let empty = |_: &mut Context, _: &()| -> Result<()> { Ok(()) };

        let mut ctx = Context::default();
        let est = estimate(&mut ctx, &observed, &empty, &(), &ElboConfig::default())?;
        let expected = -0.5 * (2.0 * std::f32::consts::PI).ln();
        assert!((est.elbo - expected).abs() < 1e-6);

        assert!(estimate(&mut ctx, &empty, &empty, &(), &ElboConfig::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_exact_guide_has_zero_elbo() -> Result<()> {
        let mut ctx = Context::default();
        let est = estimate(&mut ctx, &model, &model, &(), &ElboConfig::default())?;
        assert!(est.elbo.abs() < 1e-6);
        Ok(())
    }
}
