use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

use crate::gaussian_chain::GaussianChain;
use crate::infer::{
    Advi, AdviDiagonalNormal, AdviMultivariateNormal, ElboConfig, GuideFamily, LossKind, Svi,
};
use crate::optim::{Adam, AdamConfig};
use crate::params::ParamStore;
use crate::poutine::Context;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum GuideType {
    /// diagonal Gaussian
    Diagonal,
    /// full covariance Gaussian
    Full,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum LossType {
    Elbo,
    Score,
}

#[derive(Args, Debug)]
pub struct ChainArgs {
    #[arg(short, long, default_value = "full")]
    pub guide: GuideType,

    #[arg(long, default_value = "elbo")]
    pub loss: LossType,

    #[arg(long, default_value = "3000")]
    pub iters: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(long, default_value = "2000", help = "Iterations after lowering the learning rate")]
    pub fine_iters: usize,

    #[arg(long, default_value = "0.001")]
    pub fine_lr: f64,

    #[arg(long, default_value = "1")]
    pub particles: usize,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: &ChainArgs) -> Result<()> {
    let device = if args.gpu {
        #[cfg(target_os = "macos")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(target_os = "linux")]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Device::Cpu
        }
    } else {
        Device::Cpu
    };
    info!("Using device: {:?}", device);

    let chain = GaussianChain::benchmark(&device)?;
    info!(
        "Chain: N = {}, {} observations, guide = {:?}",
        chain.len(),
        chain.data.len(),
        args.guide
    );

    let config = ElboConfig {
        loss: match args.loss {
            LossType::Elbo => LossKind::Elbo,
            LossType::Score => LossKind::ScoreFunctionElbo,
        },
        num_particles: args.particles,
    };

    match args.guide {
        GuideType::Diagonal => {
            let advi = AdviDiagonalNormal::new(chain.clone());
            fit(args, &chain, advi, config)
        }
        GuideType::Full => {
            let advi = AdviMultivariateNormal::new(chain.clone());
            fit(args, &chain, advi, config)
        }
    }
}

fn fit<F: GuideFamily>(
    args: &ChainArgs,
    chain: &GaussianChain,
    advi: Advi<GaussianChain, F>,
    config: ElboConfig,
) -> Result<()> {
    let store = ParamStore::new();
    let mut ctx = Context::new(store.clone());
    let optim = Adam::adam(AdamConfig::new(args.lr));
    let mut svi = Svi::new(advi.model(), advi.guide(), optim, config);

    let pb = ProgressBar::new((args.iters + args.fine_iters) as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut running = 0f32;
    for iter in 0..(args.iters + args.fine_iters) {
        if iter == args.iters {
            svi.set_learning_rate(args.fine_lr);
            info!("learning rate -> {}", args.fine_lr);
        }
        let loss = svi.step(&mut ctx, &())?;
        running = if iter == 0 { loss } else { 0.99 * running + 0.01 * loss };
        pb.inc(1);
        if args.verbose && (iter + 1) % 500 == 0 {
            info!("[{}] loss: {:.4}", iter + 1, running);
        }
    }
    pb.finish_and_clear();

    let mean: Vec<f32> = advi.loc(&store)?.to_dtype(DType::F32)?.to_vec1()?;
    let covariance = advi.covariance(&store)?.to_dtype(DType::F32)?;
    let variance: Vec<f32> = diagonal(&covariance)?;
    let exact = chain.analytic_posterior();

    info!("final loss (smoothed): {:.4}", running);
    println!("site\tfit_mean\texact_mean\tfit_var\texact_var");
    for (n, post) in exact.iter().enumerate() {
        println!(
            "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            GaussianChain::site_name(n + 1),
            mean[n],
            post.mean,
            variance[n],
            post.variance
        );
    }
    Ok(())
}

fn diagonal(m: &Tensor) -> Result<Vec<f32>> {
    let d = m.dim(0)?;
    let eye = Tensor::eye(d, m.dtype(), m.device())?;
    Ok(m.mul(&eye)?.sum(1)?.to_vec1()?)
}
