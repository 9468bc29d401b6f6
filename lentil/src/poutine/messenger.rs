//! Messages, the handler trait, and the context programs run in.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use candle_core::Tensor;

use crate::distributions::{Constraint, Distribution};
use crate::error::Result;
use crate::params::ParamStore;

/// One sample statement on its way through the handler stack.
#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    pub dist: Arc<dyn Distribution>,
    pub value: Option<Tensor>,
    pub is_observed: bool,
    /// Correction added to the site's log density when the value was
    /// produced by a transform.
    pub log_det_jacobian: Option<Tensor>,
}

impl Message {
    pub fn new(name: &str, dist: Arc<dyn Distribution>) -> Self {
        Self {
            name: name.to_string(),
            dist,
            value: None,
            is_observed: false,
            log_det_jacobian: None,
        }
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// An effect handler.
///
/// `process` runs innermost handler first, before the site has a value
/// unless a handler inside already fixed it. `postprocess` runs outermost
/// first once the value is final.
pub trait Messenger {
    fn process(&mut self, _msg: &mut Message) -> Result<()> {
        Ok(())
    }

    fn postprocess(&mut self, _msg: &Message) -> Result<()> {
        Ok(())
    }
}

pub type SharedMessenger = Rc<RefCell<dyn Messenger>>;

/// Execution context of a program: the parameter store plus the stack of
/// active handlers, outermost first.
#[derive(Default)]
pub struct Context {
    params: ParamStore,
    stack: Vec<SharedMessenger>,
}

impl Context {
    pub fn new(params: ParamStore) -> Self {
        Self {
            params,
            stack: vec![],
        }
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    /// Same parameters, no handlers.
    pub fn fresh(&self) -> Self {
        Self::new(self.params.clone())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Run `f` with `messenger` pushed as the innermost handler.
    pub fn with_messenger<T, F>(&mut self, messenger: SharedMessenger, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.stack.push(messenger);
        let depth = self.stack.len();
        let out = f(self);
        self.stack.truncate(depth - 1);
        out
    }

    /// Latent sample site.
    pub fn sample<D>(&mut self, name: &str, dist: D) -> Result<Tensor>
    where
        D: Distribution + 'static,
    {
        self.sample_dyn(name, Arc::new(dist))
    }

    pub fn sample_dyn(&mut self, name: &str, dist: Arc<dyn Distribution>) -> Result<Tensor> {
        self.apply(Message::new(name, dist))
    }

    /// Observed sample site; the value is fixed to `value`.
    pub fn observe<D>(&mut self, name: &str, dist: D, value: &Tensor) -> Result<Tensor>
    where
        D: Distribution + 'static,
    {
        let mut msg = Message::new(name, Arc::new(dist));
        msg.value = Some(value.clone());
        msg.is_observed = true;
        self.apply(msg)
    }

    /// Constrained parameter from the store, created by `init` on first use.
    pub fn param<F>(&self, name: &str, init: F, constraint: Constraint) -> Result<Tensor>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        self.params.param(name, init, constraint)
    }

    fn apply(&mut self, mut msg: Message) -> Result<Tensor> {
        for handler in self.stack.iter().rev() {
            handler.borrow_mut().process(&mut msg)?;
        }

        let value = match msg.value.take() {
            Some(value) => value,
            None => {
                let value = msg.dist.sample()?;
                if msg.dist.has_rsample() {
                    value
                } else {
                    value.detach()
                }
            }
        };
        msg.value = Some(value.clone());

        for handler in self.stack.iter() {
            handler.borrow_mut().postprocess(&msg)?;
        }
        Ok(value)
    }
}
