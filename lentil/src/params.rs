//! Named, constraint-aware parameters shared by every program in a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use log::debug;

use crate::distributions::{biject_to, Constraint};
use crate::error::{PplError, Result};

/// Handle to the parameter store.
///
/// Each parameter lives in a [`VarMap`] as an unconstrained [`Var`];
/// requesting it returns the constrained view, so gradients flow back to
/// the unconstrained value that the optimizer updates in place. Clones
/// share the same storage.
#[derive(Clone)]
pub struct ParamStore {
    varmap: VarMap,
    constraints: Arc<Mutex<HashMap<String, Constraint>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for ParamStore {
    fn default() -> Self {
        Self {
            varmap: VarMap::new(),
            constraints: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrained value of `name`, created from `init()` on first request.
    ///
    /// `init` is only called when the parameter does not exist yet, and its
    /// value must satisfy `constraint`.
    pub fn param<F>(&self, name: &str, init: F, constraint: Constraint) -> Result<Tensor>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        if let Some(value) = self.lookup(name)? {
            return Ok(value);
        }

        let init = init()?;
        if !constraint.check(&init)? {
            return Err(PplError::InvalidParameter(format!(
                "initial value of '{}' violates {:?}",
                name, constraint
            )));
        }
        let unconstrained = biject_to(constraint)?.inverse(&init)?;
        let var = Var::from_tensor(&unconstrained)?;

        debug!("created parameter '{}' {:?} ({:?})", name, var.dims(), constraint);

        lock(self.varmap.data()).insert(name.to_string(), var);
        lock(&self.constraints).insert(name.to_string(), constraint);
        self.get(name)
    }

    /// Constrained value of an existing parameter.
    pub fn get(&self, name: &str) -> Result<Tensor> {
        self.lookup(name)?
            .ok_or_else(|| PplError::MissingParam(name.to_string()))
    }

    fn lookup(&self, name: &str) -> Result<Option<Tensor>> {
        let var = match lock(self.varmap.data()).get(name) {
            Some(var) => var.clone(),
            None => return Ok(None),
        };
        let constraint = lock(&self.constraints)
            .get(name)
            .copied()
            .unwrap_or(Constraint::Real);
        Ok(Some(biject_to(constraint)?.forward(var.as_tensor())?))
    }

    /// The unconstrained variable behind `name`.
    pub fn var(&self, name: &str) -> Option<Var> {
        lock(self.varmap.data()).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(self.varmap.data()).contains_key(name)
    }

    /// Sorted parameter names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(self.varmap.data()).keys().cloned().collect();
        names.sort();
        names
    }

    /// `(name, unconstrained var)` pairs, sorted by name.
    pub fn vars(&self) -> Vec<(String, Var)> {
        let data = lock(self.varmap.data());
        let mut out: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn len(&self) -> usize {
        lock(self.varmap.data()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every parameter.
    pub fn clear(&self) {
        lock(self.varmap.data()).clear();
        lock(&self.constraints).clear();
    }
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_created_once() -> Result<()> {
        let store = ParamStore::new();
        let dev = Device::Cpu;

        let a = store.param("a", || Ok(Tensor::ones(2, DType::F32, &dev)?), Constraint::Real)?;
        let b = store.param(
            "a",
            || Ok(Tensor::zeros(2, DType::F32, &dev)?),
            Constraint::Real,
        )?;
        assert_eq!(a.to_vec1::<f32>()?, b.to_vec1::<f32>()?);
        assert_eq!(store.names(), vec!["a".to_string()]);

        let shared = store.clone();
        shared.clear();
        assert!(store.is_empty());
        assert!(matches!(store.get("a"), Err(PplError::MissingParam(_))));
        Ok(())
    }

    #[test]
    fn test_positive_parameter() -> Result<()> {
        let store = ParamStore::new();
        let dev = Device::Cpu;
        let init = Tensor::new(&[0.5f32, 2.0], &dev)?;

        let scale = store.param("scale", || Ok(init.clone()), Constraint::Positive)?;
        let ss: Vec<f32> = scale.to_vec1()?;
        assert!((ss[0] - 0.5).abs() < 1e-6 && (ss[1] - 2.0).abs() < 1e-6);

        // stored unconstrained
        let var = store.var("scale").expect("var exists");
        let uu: Vec<f32> = var.as_tensor().to_vec1()?;
        assert!((uu[0] - 0.5f32.ln()).abs() < 1e-6);

        let bad = store.param(
            "bad",
            || Ok(Tensor::new(&[-1.0f32], &dev)?),
            Constraint::Positive,
        );
        assert!(matches!(bad, Err(PplError::InvalidParameter(_))));
        Ok(())
    }

    #[test]
    fn test_gradient_reaches_unconstrained() -> Result<()> {
        let store = ParamStore::new();
        let dev = Device::Cpu;
        let scale = store.param(
            "scale",
            || Ok(Tensor::new(&[2.0f32], &dev)?),
            Constraint::Positive,
        )?;
        let grads = scale.sum_all()?.backward()?;
        let var = store.var("scale").expect("var exists");
        let g: Vec<f32> = grads.get(&var).expect("gradient").to_vec1()?;
        // d exp(u) / du = exp(u)
        assert!((g[0] - 2.0).abs() < 1e-5);
        Ok(())
    }
}
