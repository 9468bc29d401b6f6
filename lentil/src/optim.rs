//! Optimizer that follows the parameter store as it grows.
//!
//! Parameters are created lazily the first time a program asks for them,
//! so a single `candle_nn` optimizer built up front would miss them. Here
//! one optimizer is kept per parameter name and built on the first update.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::debug;

use crate::error::Result;
use crate::params::ParamStore;

/// Adam settings; mapped to `AdamW` without weight decay.
#[derive(Debug, Clone)]
pub struct AdamConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl AdamConfig {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            ..Default::default()
        }
    }
}

impl From<AdamConfig> for ParamsAdamW {
    fn from(config: AdamConfig) -> Self {
        ParamsAdamW {
            lr: config.lr,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: 0.0,
        }
    }
}

/// One `O` per parameter name, sharing `config`.
pub struct ParamOptimizer<O: Optimizer> {
    config: O::Config,
    optimizers: HashMap<String, O>,
}

pub type Adam = ParamOptimizer<AdamW>;

impl Adam {
    pub fn adam(config: AdamConfig) -> Self {
        Self::new(config.into())
    }
}

impl<O: Optimizer> ParamOptimizer<O>
where
    O::Config: Clone,
{
    pub fn new(config: O::Config) -> Self {
        Self {
            config,
            optimizers: HashMap::new(),
        }
    }

    /// Apply `grads` to every parameter in `store` that has a gradient.
    pub fn step(&mut self, store: &ParamStore, grads: &GradStore) -> Result<()> {
        for (name, var) in store.vars() {
            if grads.get(&var).is_none() {
                continue;
            }
            if !self.optimizers.contains_key(&name) {
                debug!("optimizer state for '{}'", name);
                let opt = O::new(vec![var.clone()], self.config.clone())?;
                self.optimizers.insert(name.clone(), opt);
            }
            if let Some(opt) = self.optimizers.get_mut(&name) {
                opt.step(grads)?;
            }
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> Option<f64> {
        self.optimizers.values().next().map(|opt| opt.learning_rate())
    }

    /// New learning rate for current and future parameters.
    pub fn set_learning_rate(&mut self, lr: f64)
    where
        O::Config: SetLearningRate,
    {
        self.config.set_lr(lr);
        for opt in self.optimizers.values_mut() {
            opt.set_learning_rate(lr);
        }
    }

    /// Forget optimizer state, e.g. after `ParamStore::clear`.
    pub fn reset(&mut self) {
        self.optimizers.clear();
    }
}

/// Optimizer configs whose learning rate can be changed.
pub trait SetLearningRate {
    fn set_lr(&mut self, lr: f64);
}

impl SetLearningRate for ParamsAdamW {
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }
}

impl SetLearningRate for f64 {
    fn set_lr(&mut self, lr: f64) {
        *self = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Constraint;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn test_late_parameters_are_updated() -> Result<()> {
        let dev = Device::Cpu;
        let store = ParamStore::new();
        let mut opt = ParamOptimizer::<candle_nn::SGD>::new(0.5);

        let a = store.param("a", || Ok(Tensor::ones(1, DType::F32, &dev)?), Constraint::Real)?;
        opt.step(&store, &a.sum_all()?.backward()?)?;

        // created after the first step
        let a = store.get("a")?;
        let b = store.param("b", || Ok(Tensor::ones(1, DType::F32, &dev)?), Constraint::Real)?;
        opt.step(&store, &(a + b)?.sum_all()?.backward()?)?;

        let a: Vec<f32> = store.get("a")?.to_vec1()?;
        let b: Vec<f32> = store.get("b")?.to_vec1()?;
        assert!((a[0] - 0.0).abs() < 1e-6);
        assert!((b[0] - 0.5).abs() < 1e-6);

        opt.set_learning_rate(0.1);
        assert_eq!(opt.learning_rate(), Some(0.1));
        Ok(())
    }

    #[test]
    fn test_adam_keeps_positive_constraint() -> Result<()> {
        let dev = Device::Cpu;
        let store = ParamStore::new();
        let mut opt = Adam::adam(AdamConfig::new(0.5));
        for _ in 0..20 {
            let s = store.param(
                "s",
                || Ok(Tensor::ones(1, DType::F32, &dev)?),
                Constraint::Positive,
            )?;
            opt.step(&store, &s.sum_all()?.backward()?)?;
        }
        let s: Vec<f32> = store.get("s")?.to_vec1()?;
        assert!(s[0] > 0.0 && s[0] < 1.0);
        Ok(())
    }
}
