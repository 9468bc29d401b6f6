//! Programs and the handlers that wrap them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use candle_core::Tensor;

use super::messenger::{Context, Message, Messenger, SharedMessenger};
use super::trace::{Trace, TraceMessenger};
use crate::error::{PplError, Result};

/// Something that issues sample statements against a [`Context`].
pub trait Program<A: ?Sized> {
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()>;
}

impl<A: ?Sized, F> Program<A> for F
where
    F: Fn(&mut Context, &A) -> Result<()>,
{
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()> {
        self(ctx, args)
    }
}

/// `program` with every site recorded.
pub struct Traced<P> {
    program: P,
}

pub fn trace<P>(program: P) -> Traced<P> {
    Traced { program }
}

impl<P> Traced<P> {
    /// Run once under a fresh trace and return it closed.
    pub fn get_trace<A: ?Sized>(&self, ctx: &mut Context, args: &A) -> Result<Trace>
    where
        P: Program<A>,
    {
        let recorder = Rc::new(RefCell::new(TraceMessenger::new()));
        let shared: SharedMessenger = recorder.clone();
        ctx.with_messenger(shared, |ctx| self.program.run(ctx, args))?;
        let trace = recorder.borrow_mut().take();
        Ok(trace)
    }
}

impl<A: ?Sized, P: Program<A>> Program<A> for Traced<P> {
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()> {
        self.get_trace(ctx, args).map(|_| ())
    }
}

/// Recorded value of a site and whether it was observed.
type Recorded = HashMap<String, (Tensor, bool)>;

/// `program` with latent sites taking the values recorded in a trace.
pub struct Replayed<P> {
    program: P,
    recorded: Rc<Recorded>,
}

pub fn replay<P>(program: P, guide_trace: &Trace) -> Replayed<P> {
    let recorded = guide_trace
        .nodes()
        .map(|n| (n.name.clone(), (n.value.clone(), n.is_observed)))
        .collect();
    Replayed {
        program,
        recorded: Rc::new(recorded),
    }
}

impl<A: ?Sized, P: Program<A>> Program<A> for Replayed<P> {
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()> {
        let handler: SharedMessenger = Rc::new(RefCell::new(ReplayMessenger {
            recorded: self.recorded.clone(),
        }));
        ctx.with_messenger(handler, |ctx| self.program.run(ctx, args))
    }
}

struct ReplayMessenger {
    recorded: Rc<Recorded>,
}

impl Messenger for ReplayMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if msg.is_observed || msg.has_value() {
            return Ok(());
        }
        if let Some((value, observed)) = self.recorded.get(&msg.name) {
            if *observed {
                return Err(PplError::ReplayObserved(msg.name.clone()));
            }
            msg.value = Some(value.clone());
        }
        Ok(())
    }
}

/// Fixes latent sites to given values, each with an optional log-Jacobian
/// correction.
#[derive(Default)]
pub struct SubstituteMessenger {
    values: HashMap<String, (Tensor, Option<Tensor>)>,
}

impl SubstituteMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Tensor, log_det_jacobian: Option<Tensor>) {
        self.values
            .insert(name.to_string(), (value, log_det_jacobian));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Messenger for SubstituteMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if msg.is_observed || msg.has_value() {
            return Ok(());
        }
        if let Some((value, ldj)) = self.values.get(&msg.name) {
            msg.value = Some(value.clone());
            msg.log_det_jacobian = ldj.clone();
        }
        Ok(())
    }
}

/// `program` run under a [`SubstituteMessenger`].
pub struct Substituted<P> {
    program: P,
    handler: Rc<RefCell<SubstituteMessenger>>,
}

pub fn substitute<P>(program: P, handler: SubstituteMessenger) -> Substituted<P> {
    Substituted {
        program,
        handler: Rc::new(RefCell::new(handler)),
    }
}

impl<A: ?Sized, P: Program<A>> Program<A> for Substituted<P> {
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()> {
        let shared: SharedMessenger = self.handler.clone();
        ctx.with_messenger(shared, |ctx| self.program.run(ctx, args))
    }
}
