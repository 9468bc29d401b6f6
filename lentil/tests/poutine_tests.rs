use std::cell::RefCell;
use std::rc::Rc;

use candle_core::{Device, Tensor};
use lentil::distributions::{Categorical, Normal};
use lentil::infer::elbo::{get_traces, ElboConfig, LossKind};
use lentil::infer::Svi;
use lentil::optim::{Adam, AdamConfig};
use lentil::poutine::{replay, trace, Context, SharedMessenger, SubstituteMessenger};
use lentil::{PplError, Result};

fn normal() -> Result<Normal> {
    Normal::standard(0.0, 1.0, &Device::Cpu)
}

#[test]
fn duplicate_site_is_rejected() -> Result<()> {
    let program = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        ctx.sample("z", normal()?)?;
        Ok(())
    };
    let mut ctx = Context::default();
    let err = trace(program).get_trace(&mut ctx, &());
    assert!(matches!(err, Err(PplError::DuplicateSite(name)) if name == "z"));
    assert_eq!(ctx.depth(), 0);
    Ok(())
}

#[test]
fn replay_reuses_recorded_values() -> Result<()> {
    let program = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("a", normal()?)?;
        ctx.sample("b", normal()?)?;
        Ok(())
    };
    let mut ctx = Context::default();
    let first = trace(program).get_trace(&mut ctx, &())?;
    let second = trace(replay(program, &first)).get_trace(&mut ctx, &())?;

    assert_eq!(first.names(), second.names());
    for name in ["a", "b"] {
        let x: f32 = first.node(name).expect("site").value.to_scalar()?;
        let y: f32 = second.node(name).expect("site").value.to_scalar()?;
        assert_eq!(x, y);
    }
    Ok(())
}

#[test]
fn replay_leaves_observed_sites_alone() -> Result<()> {
    let dev = Device::Cpu;
    let guide = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        ctx.sample("x", normal()?)?;
        Ok(())
    };
    let data = Tensor::new(3f32, &dev)?;
    let model = move |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        ctx.observe("x", normal()?, &data)?;
        Ok(())
    };
    let mut ctx = Context::default();
    let guide_trace = trace(guide).get_trace(&mut ctx, &())?;
    let model_trace = trace(replay(model, &guide_trace)).get_trace(&mut ctx, &())?;
    let x: f32 = model_trace.node("x").expect("x").value.to_scalar()?;
    assert_eq!(x, 3.0);
    Ok(())
}

#[test]
fn replaying_an_observed_site_fails() -> Result<()> {
    let dev = Device::Cpu;
    let data = Tensor::new(1f32, &dev)?;
    let observed = move |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.observe("z", normal()?, &data)?;
        Ok(())
    };
    let latent = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        Ok(())
    };
    let mut ctx = Context::default();
    let recorded = trace(observed).get_trace(&mut ctx, &())?;
    let err = trace(replay(latent, &recorded)).get_trace(&mut ctx, &());
    assert!(matches!(err, Err(PplError::ReplayObserved(_))));
    Ok(())
}

#[test]
fn innermost_handler_wins() -> Result<()> {
    let dev = Device::Cpu;
    let program = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        Ok(())
    };

    let mut outer = SubstituteMessenger::new();
    outer.insert("z", Tensor::new(1f32, &dev)?, None);
    let mut inner = SubstituteMessenger::new();
    inner.insert("z", Tensor::new(2f32, &dev)?, None);

    let mut ctx = Context::default();
    let outer: SharedMessenger = Rc::new(RefCell::new(outer));
    let inner: SharedMessenger = Rc::new(RefCell::new(inner));
    let t = ctx.with_messenger(outer, |ctx| {
        ctx.with_messenger(inner, |ctx| trace(program).get_trace(ctx, &()))
    })?;
    let z: f32 = t.node("z").expect("z").value.to_scalar()?;
    assert_eq!(z, 2.0);
    Ok(())
}

#[test]
fn compute_batch_log_pdf_is_idempotent() -> Result<()> {
    let program = |ctx: &mut Context, _: &()| -> Result<()> {
        let ps = Tensor::new(&[[0.2f32, 0.8], [0.5, 0.5]], &Device::Cpu)?;
        ctx.sample("k", Categorical::new(&ps)?)?;
        ctx.sample("z", normal()?)?;
        Ok(())
    };
    let mut ctx = Context::default();
    let t = trace(program).get_trace(&mut ctx, &())?;
    t.compute_batch_log_pdf()?;
    let first: Vec<f32> = t.node("k").and_then(|n| n.log_prob()).expect("k").to_vec1()?;
    t.compute_batch_log_pdf()?;
    let second: Vec<f32> = t.node("k").and_then(|n| n.log_prob()).expect("k").to_vec1()?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    Ok(())
}

#[test]
fn guide_site_missing_from_model() -> Result<()> {
    let model = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        Ok(())
    };
    let guide = |ctx: &mut Context, _: &()| -> Result<()> {
        ctx.sample("z", normal()?)?;
        ctx.sample("extra", normal()?)?;
        Ok(())
    };
    let mut ctx = Context::default();
    let err = get_traces(&mut ctx, &model, &guide, &());
    assert!(matches!(err, Err(PplError::SiteMismatch { site, .. }) if site == "extra"));
    Ok(())
}

/// Bernoulli-like discrete latent: only the score-function loss moves the
/// guide probabilities.
#[test]
fn score_function_elbo_trains_discrete_guide() -> Result<()> {
    use lentil::distributions::Constraint;

    let model = |ctx: &mut Context, _: &()| -> Result<()> {
        let prior = Tensor::new(&[0.5f32, 0.5], &Device::Cpu)?;
        let k = ctx.sample("k", Categorical::new(&prior)?)?;
        let loc = k.to_dtype(candle_core::DType::F32)?.affine(4.0, -2.0)?.unsqueeze(0)?;
        let one = Tensor::new(&[1f32], &Device::Cpu)?;
        let y = Tensor::new(&[2f32], &Device::Cpu)?;
        ctx.observe("y", Normal::new(&loc, &one)?, &y)?;
        Ok(())
    };
    let guide = |ctx: &mut Context, _: &()| -> Result<()> {
        let dev = Device::Cpu;
        let probs = ctx.param(
            "q_probs",
            || Ok(Tensor::new(&[0.5f32, 0.5], &dev)?),
            Constraint::Simplex,
        )?;
        ctx.sample("k", Categorical::new(&probs)?)?;
        Ok(())
    };

    let mut ctx = Context::default();
    let config = ElboConfig {
        loss: LossKind::ScoreFunctionElbo,
        num_particles: 4,
    };
    let mut svi = Svi::new(model, guide, Adam::adam(AdamConfig::new(0.1)), config);
    for _ in 0..500 {
        svi.step(&mut ctx, &())?;
    }
    let q: Vec<f32> = ctx.params().get("q_probs")?.to_vec1()?;
    // y = 2 is explained by k = 1 (loc 2) far better than k = 0 (loc -2)
    assert!(q[1] > 0.9, "q = {:?}", q);
    Ok(())
}
