//! Automatic differentiation variational inference.
//!
//! Every latent site of a model is mapped to unconstrained space and the
//! pieces are packed into one vector `_advi_latent`. The guide is a
//! Gaussian over that vector, with either a diagonal or a full covariance.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use log::info;

use crate::distributions::traits::sum_rightmost;
use crate::distributions::{
    biject_to, Constraint, Delta, Distribution, ImproperUniform, Independent, MultivariateNormal,
    Normal, Transform,
};
use crate::error::{PplError, Result};
use crate::params::ParamStore;
use crate::poutine::{trace, Context, Program, SharedMessenger, SubstituteMessenger};
use crate::shape::numel;

pub const LATENT_SITE: &str = "_advi_latent";
pub const LOC_PARAM: &str = "advi_loc";
pub const SCALE_PARAM: &str = "advi_scale";
pub const LOWER_CHOLESKY_PARAM: &str = "advi_lower_cholesky";

/// Gaussian family for the packed latent vector.
pub trait GuideFamily {
    /// Guide distribution over `Real^d` centered at `loc`.
    fn distribution(ctx: &Context, loc: &Tensor) -> Result<Arc<dyn Distribution>>;

    /// Covariance matrix of the fitted guide.
    fn covariance(params: &ParamStore) -> Result<Tensor>;
}

/// `N(loc, diag(scale²))` with `scale` in [`SCALE_PARAM`].
pub struct DiagonalNormal;

/// `N(loc, L Lᵀ)` with `L` in [`LOWER_CHOLESKY_PARAM`].
pub struct FullRankNormal;

impl GuideFamily for DiagonalNormal {
    fn distribution(ctx: &Context, loc: &Tensor) -> Result<Arc<dyn Distribution>> {
        let scale = ctx.param(SCALE_PARAM, || Ok(loc.ones_like()?), Constraint::Positive)?;
        Ok(Arc::new(Independent::new(Normal::new(loc, &scale)?, 1)?))
    }

    fn covariance(params: &ParamStore) -> Result<Tensor> {
        let var = params.get(SCALE_PARAM)?.sqr()?;
        let d = var.dim(0)?;
        let eye = Tensor::eye(d, var.dtype(), var.device())?;
        Ok(eye.broadcast_mul(&var.unsqueeze(0)?)?)
    }
}

impl GuideFamily for FullRankNormal {
    fn distribution(ctx: &Context, loc: &Tensor) -> Result<Arc<dyn Distribution>> {
        let d = loc.dim(0)?;
        let scale_tril = ctx.param(
            LOWER_CHOLESKY_PARAM,
            || Ok(Tensor::eye(d, loc.dtype(), loc.device())?),
            Constraint::LowerCholesky,
        )?;
        Ok(Arc::new(MultivariateNormal::new(loc, &scale_tril)?))
    }

    fn covariance(params: &ParamStore) -> Result<Tensor> {
        let l = params.get(LOWER_CHOLESKY_PARAM)?;
        Ok(l.matmul(&l.t()?)?)
    }
}

/// One latent site of the model, as found on its first run.
#[derive(Debug, Clone)]
pub struct PrototypeSite {
    pub name: String,
    pub shape: Vec<usize>,
    pub support: Constraint,
    pub event_dim: usize,
    transform: Transform,
    unconstrained_shape: Vec<usize>,
    offset: usize,
}

impl PrototypeSite {
    pub fn unconstrained_numel(&self) -> usize {
        numel(&self.unconstrained_shape)
    }

    /// This site's slice of `latent`, mapped into its support, and the
    /// log-Jacobian of that map reduced to the site's batch shape.
    fn unpack(&self, latent: &Tensor) -> Result<(Tensor, Tensor)> {
        let u = latent
            .narrow(0, self.offset, self.unconstrained_numel())?
            .reshape(self.unconstrained_shape.clone())?;
        let x = self.transform.forward(&u)?;
        let ladj = self.transform.log_abs_det_jacobian(&u, &x)?;
        let extra = self.event_dim.saturating_sub(self.transform.event_dim());
        Ok((x, sum_rightmost(&ladj, extra)?))
    }
}

/// The model's latent sites in execution order.
#[derive(Debug, Clone)]
pub struct Prototype {
    pub sites: Vec<PrototypeSite>,
    pub latent_dim: usize,
    dtype: DType,
    device: Device,
}

impl Prototype {
    fn discover<P, A>(ctx: &Context, model: &P, args: &A) -> Result<Self>
    where
        P: Program<A>,
        A: ?Sized,
    {
        let mut clean = ctx.fresh();
        let model_trace =
            trace(|ctx: &mut Context, a: &A| model.run(ctx, a)).get_trace(&mut clean, args)?;

        let mut sites = vec![];
        let mut offset = 0;
        let mut dtype_device = None;

        for node in model_trace.stochastic_nodes() {
            let support = node.dist.support();
            if support.is_discrete() {
                return Err(PplError::unsupported(
                    format!("discrete latent site '{}'", node.name),
                    "advi",
                ));
            }
            let transform = biject_to(support)?;
            let shape = node.value.dims().to_vec();
            let unconstrained_shape = transform.unconstrained_dims(&shape);
            let size = numel(&unconstrained_shape);

            if dtype_device.is_none() {
                dtype_device = Some((node.value.dtype(), node.value.device().clone()));
            }
            sites.push(PrototypeSite {
                name: node.name.clone(),
                shape,
                support,
                event_dim: node.dist.event_shape().len(),
                transform,
                unconstrained_shape,
                offset,
            });
            offset += size;
        }

        let (dtype, device) = match dtype_device {
            Some(dd) if offset > 0 => dd,
            _ => return Err(PplError::unsupported("a model without latent sites", "advi")),
        };

        info!(
            "ADVI prototype: {} latent sites, {} unconstrained dims",
            sites.len(),
            offset
        );

        Ok(Self {
            sites,
            latent_dim: offset,
            dtype,
            device,
        })
    }
}

/// ADVI over `model` with guide family `F`.
pub struct Advi<P, F> {
    model: P,
    prototype: OnceCell<Prototype>,
    _family: PhantomData<F>,
}

pub type AdviDiagonalNormal<P> = Advi<P, DiagonalNormal>;
pub type AdviMultivariateNormal<P> = Advi<P, FullRankNormal>;

impl<P, F: GuideFamily> Advi<P, F> {
    pub fn new(model: P) -> Self {
        Self {
            model,
            prototype: OnceCell::new(),
            _family: PhantomData,
        }
    }

    /// Program that scores the packed latent against the user model.
    pub fn model(&self) -> AdviModel<'_, P, F> {
        AdviModel { advi: self }
    }

    /// Program that samples the packed latent from the Gaussian guide.
    pub fn guide(&self) -> AdviGuide<'_, P, F> {
        AdviGuide { advi: self }
    }

    /// Latent sites, once the model has been run through `model()` or
    /// `guide()`.
    pub fn prototype(&self) -> Option<&Prototype> {
        self.prototype.get()
    }

    pub fn latent_dim(&self) -> Option<usize> {
        self.prototype.get().map(|p| p.latent_dim)
    }

    fn prototype_for<A: ?Sized>(&self, ctx: &Context, args: &A) -> Result<&Prototype>
    where
        P: Program<A>,
    {
        if let Some(proto) = self.prototype.get() {
            return Ok(proto);
        }
        let proto = Prototype::discover(ctx, &self.model, args)?;
        Ok(self.prototype.get_or_init(|| proto))
    }

    fn fitted_prototype(&self, op: &'static str) -> Result<&Prototype> {
        self.prototype
            .get()
            .ok_or_else(|| PplError::unsupported("an ADVI guide that has not run", op))
    }

    pub fn loc(&self, params: &ParamStore) -> Result<Tensor> {
        params.get(LOC_PARAM)
    }

    pub fn covariance(&self, params: &ParamStore) -> Result<Tensor> {
        F::covariance(params)
    }

    /// Per-site point estimate: the guide's loc mapped into each support.
    pub fn median(&self, params: &ParamStore) -> Result<HashMap<String, Tensor>> {
        let proto = self.fitted_prototype("median")?;
        let loc = self.loc(params)?.detach();
        let mut out = HashMap::new();
        for site in &proto.sites {
            let (x, _) = site.unpack(&loc)?;
            out.insert(site.name.clone(), x);
        }
        Ok(out)
    }
}

impl<P> Advi<P, DiagonalNormal> {
    pub fn scale(&self, params: &ParamStore) -> Result<Tensor> {
        params.get(SCALE_PARAM)
    }
}

impl<P> Advi<P, FullRankNormal> {
    pub fn lower_cholesky(&self, params: &ParamStore) -> Result<Tensor> {
        params.get(LOWER_CHOLESKY_PARAM)
    }
}

pub struct AdviGuide<'a, P, F> {
    advi: &'a Advi<P, F>,
}

impl<A, P, F> Program<A> for AdviGuide<'_, P, F>
where
    A: ?Sized,
    P: Program<A>,
    F: GuideFamily,
{
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()> {
        let proto = self.advi.prototype_for(ctx, args)?;
        let d = proto.latent_dim;
        let loc = ctx.param(
            LOC_PARAM,
            || Ok(Tensor::zeros(d, proto.dtype, &proto.device)?),
            Constraint::Real,
        )?;
        let guide = F::distribution(ctx, &loc)?;
        let latent = ctx.sample_dyn(LATENT_SITE, guide)?;

        for site in &proto.sites {
            let (x, _) = site.unpack(&latent)?;
            ctx.sample(&site.name, Delta::new(&x, site.event_dim)?)?;
        }
        Ok(())
    }
}

pub struct AdviModel<'a, P, F> {
    advi: &'a Advi<P, F>,
}

impl<A, P, F> Program<A> for AdviModel<'_, P, F>
where
    A: ?Sized,
    P: Program<A>,
    F: GuideFamily,
{
    /// `_advi_latent` has a flat density and must be supplied by an
    /// enclosing handler such as `replay`.
    fn run(&self, ctx: &mut Context, args: &A) -> Result<()> {
        let proto = self.advi.prototype_for(ctx, args)?;
        let flat = ImproperUniform::new(proto.latent_dim, proto.dtype, &proto.device);
        let latent = ctx.sample(LATENT_SITE, flat)?;

        let mut substitute = SubstituteMessenger::new();
        for site in &proto.sites {
            let (x, ladj) = site.unpack(&latent)?;
            substitute.insert(&site.name, x, Some(ladj));
        }
        let handler: SharedMessenger = Rc::new(RefCell::new(substitute));
        ctx.with_messenger(handler, |ctx| self.advi.model.run(ctx, args))
    }
}
