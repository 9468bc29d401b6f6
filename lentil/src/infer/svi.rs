//! Stochastic variational inference driver.

use candle_nn::Optimizer;
use log::debug;

use super::elbo::{estimate, ElboConfig, ElboEstimate};
use crate::error::Result;
use crate::optim::{ParamOptimizer, SetLearningRate};
use crate::poutine::{Context, Program};

/// Fits the parameters of `guide` (and any in `model`) by gradient steps on
/// the negative ELBO.
pub struct Svi<M, G, O: Optimizer> {
    model: M,
    guide: G,
    optim: ParamOptimizer<O>,
    config: ElboConfig,
    num_steps: usize,
}

impl<M, G, O> Svi<M, G, O>
where
    O: Optimizer,
    O::Config: Clone,
{
    pub fn new(model: M, guide: G, optim: ParamOptimizer<O>, config: ElboConfig) -> Self {
        Self {
            model,
            guide,
            optim,
            config,
            num_steps: 0,
        }
    }

    /// One gradient update; returns the loss (negative ELBO) before it.
    pub fn step<A: ?Sized>(&mut self, ctx: &mut Context, args: &A) -> Result<f32>
    where
        M: Program<A>,
        G: Program<A>,
    {
        let est = self.estimate(ctx, args)?;
        let grads = est.surrogate_loss.backward()?;
        self.optim.step(ctx.params(), &grads)?;
        self.num_steps += 1;
        debug!("[{}] loss: {}", self.num_steps, est.loss());
        Ok(est.loss())
    }

    /// Loss without touching the parameters.
    pub fn evaluate_loss<A: ?Sized>(&self, ctx: &mut Context, args: &A) -> Result<f32>
    where
        M: Program<A>,
        G: Program<A>,
    {
        Ok(self.estimate(ctx, args)?.loss())
    }

    fn estimate<A: ?Sized>(&self, ctx: &mut Context, args: &A) -> Result<ElboEstimate>
    where
        M: Program<A>,
        G: Program<A>,
    {
        estimate(ctx, &self.model, &self.guide, args, &self.config)
    }

    pub fn set_learning_rate(&mut self, lr: f64)
    where
        O::Config: SetLearningRate,
    {
        debug!("learning rate: {}", lr);
        self.optim.set_learning_rate(lr);
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn guide(&self) -> &G {
        &self.guide
    }
}
