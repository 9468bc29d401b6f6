//! Execution traces.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use candle_core::Tensor;

use super::messenger::{Message, Messenger};
use crate::distributions::Distribution;
use crate::error::{PplError, Result};

/// A recorded sample site.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub value: Tensor,
    pub dist: Arc<dyn Distribution>,
    pub is_observed: bool,
    pub log_det_jacobian: Option<Tensor>,
    log_prob: OnceCell<Tensor>,
}

impl Node {
    fn from_message(msg: &Message) -> Result<Self> {
        let value = msg
            .value
            .clone()
            .ok_or_else(|| PplError::SiteMismatch {
                site: msg.name.clone(),
                problem: "recorded without a value",
            })?;
        Ok(Self {
            name: msg.name.clone(),
            value,
            dist: msg.dist.clone(),
            is_observed: msg.is_observed,
            log_det_jacobian: msg.log_det_jacobian.clone(),
            log_prob: OnceCell::new(),
        })
    }

    /// Per batch element log density, once computed.
    pub fn log_prob(&self) -> Option<&Tensor> {
        self.log_prob.get()
    }

    pub fn has_rsample(&self) -> bool {
        self.dist.has_rsample()
    }

    fn compute_log_prob(&self) -> Result<()> {
        if self.log_prob.get().is_some() {
            return Ok(());
        }
        let mut lp = self.dist.log_prob(&self.value)?;
        if let Some(ldj) = &self.log_det_jacobian {
            lp = lp.broadcast_add(ldj)?;
        }
        // set only fails if another call got here first
        let _ = self.log_prob.set(lp);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceState {
    #[default]
    Open,
    Closed,
}

/// Sites in execution order, with unique names.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    state: TraceState,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, msg: &Message) -> Result<()> {
        if self.state == TraceState::Closed {
            return Err(PplError::TraceClosed);
        }
        if self.index.contains_key(&msg.name) {
            return Err(PplError::DuplicateSite(msg.name.clone()));
        }
        self.index.insert(msg.name.clone(), self.nodes.len());
        self.nodes.push(Node::from_message(msg)?);
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = TraceState::Closed;
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Unobserved sites.
    pub fn stochastic_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_observed)
    }

    pub fn observation_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_observed)
    }

    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compute and cache the log density of every site, without reducing
    /// over batch dims. Calling it again changes nothing.
    pub fn compute_batch_log_pdf(&self) -> Result<()> {
        if self.state == TraceState::Open {
            return Err(PplError::TraceOpen);
        }
        for node in &self.nodes {
            node.compute_log_prob()?;
        }
        Ok(())
    }

    /// Σ over sites and batch elements of the log densities; `None` for a
    /// trace without sites.
    pub fn log_prob_sum(&self) -> Result<Option<Tensor>> {
        self.compute_batch_log_pdf()?;
        let mut total: Option<Tensor> = None;
        for node in &self.nodes {
            if let Some(lp) = node.log_prob() {
                let s = lp.sum_all()?;
                total = Some(match total {
                    Some(acc) => (acc + s)?,
                    None => s,
                });
            }
        }
        Ok(total)
    }
}

/// Records every site into a trace.
#[derive(Default)]
pub struct TraceMessenger {
    trace: Trace,
}

impl TraceMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close and hand over the recorded trace.
    pub fn take(&mut self) -> Trace {
        let mut trace = std::mem::take(&mut self.trace);
        trace.close();
        trace
    }
}

impl Messenger for TraceMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if self.trace.contains(&msg.name) {
            return Err(PplError::DuplicateSite(msg.name.clone()));
        }
        Ok(())
    }

    fn postprocess(&mut self, msg: &Message) -> Result<()> {
        self.trace.add_node(msg)
    }
}
