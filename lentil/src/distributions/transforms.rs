//! Bijections between unconstrained space and each supported constraint.
//!
//! `forward` maps an unconstrained tensor into the constrained domain and
//! `log_abs_det_jacobian` is summed over the transform's own event dims, so
//! for element-wise transforms it has the same shape as the input.

use candle_core::{DType, Tensor, D};

use super::constraints::Constraint;
use crate::error::{PplError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    /// `Real -> Positive`
    Exp,
    /// `Real -> UnitInterval`
    Sigmoid,
    /// `Real^(K-1) -> Simplex^K`
    StickBreaking,
    /// strict lower triangle kept, diagonal exponentiated
    LowerCholesky,
}

/// The transform from unconstrained space onto `constraint`.
pub fn biject_to(constraint: Constraint) -> Result<Transform> {
    match constraint {
        Constraint::Real => Ok(Transform::Identity),
        Constraint::Positive => Ok(Transform::Exp),
        Constraint::UnitInterval => Ok(Transform::Sigmoid),
        Constraint::Simplex => Ok(Transform::StickBreaking),
        Constraint::LowerCholesky => Ok(Transform::LowerCholesky),
        c => Err(PplError::unsupported(
            format!("discrete constraint {:?}", c),
            "biject_to",
        )),
    }
}

/// log(1 + exp(x)) without overflow
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((x.relu()? + tail)?)
}

fn logit(x: &Tensor) -> Result<Tensor> {
    Ok((x.log()? - x.affine(-1.0, 1.0)?.log()?)?)
}

/// diagonal of the trailing (d, d) block as a (d, 1) column
fn diag_column(x: &Tensor, eye: &Tensor) -> Result<Tensor> {
    Ok(x.mul(eye)?.sum_keepdim(1)?)
}

fn square_dim(op: &'static str, x: &Tensor) -> Result<usize> {
    match x.dims() {
        [r, c] if r == c => Ok(*r),
        dims => Err(PplError::shape_mismatch(op, dims, &[])),
    }
}

impl Transform {
    pub fn event_dim(&self) -> usize {
        match self {
            Self::StickBreaking => 1,
            Self::LowerCholesky => 2,
            _ => 0,
        }
    }

    /// Shape of the unconstrained preimage of a constrained value.
    pub fn unconstrained_dims(&self, constrained: &[usize]) -> Vec<usize> {
        let mut dims = constrained.to_vec();
        if let (Self::StickBreaking, Some(k)) = (self, dims.last_mut()) {
            *k -= 1;
        }
        dims
    }

    pub fn forward(&self, u: &Tensor) -> Result<Tensor> {
        match self {
            Self::Identity => Ok(u.clone()),
            Self::Exp => Ok(u.exp()?),
            Self::Sigmoid => Ok(candle_nn::ops::sigmoid(u)?),
            Self::StickBreaking => {
                let (z, remaining) = self.stick_fractions(u)?;
                let k1 = z.len();
                let mut pieces = Vec::with_capacity(k1 + 1);
                for i in 0..k1 {
                    pieces.push(z[i].mul(&remaining[i])?);
                }
                pieces.push(remaining[k1].clone());
                Ok(Tensor::cat(&pieces, D::Minus1)?)
            }
            Self::LowerCholesky => {
                let d = square_dim("lower cholesky", u)?;
                let eye = Tensor::eye(d, u.dtype(), u.device())?;
                let strict = (Tensor::tril2(d, u.dtype(), u.device())? - &eye)?;
                let diag = diag_column(u, &eye)?.exp()?;
                Ok((u.mul(&strict)? + eye.broadcast_mul(&diag)?)?)
            }
        }
    }

    pub fn inverse(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Identity => Ok(x.clone()),
            Self::Exp => Ok(x.log()?),
            Self::Sigmoid => logit(x),
            Self::StickBreaking => {
                let k = x.dim(D::Minus1)?;
                if k < 2 {
                    return Err(PplError::shape_mismatch("stick breaking", x.dims(), &[2]));
                }
                let last = x.rank() - 1;
                let mut remaining = x.ones_like()?.narrow(last, 0, 1)?;
                let mut out = Vec::with_capacity(k - 1);
                for i in 0..(k - 1) {
                    let x_i = x.narrow(last, i, 1)?;
                    let z_i = x_i.div(&remaining)?;
                    let offset = ((k - 1 - i) as f64).ln();
                    out.push((logit(&z_i)? + offset)?);
                    remaining = (remaining - x_i)?;
                }
                Ok(Tensor::cat(&out, D::Minus1)?)
            }
            Self::LowerCholesky => {
                let d = square_dim("lower cholesky", x)?;
                let eye = Tensor::eye(d, x.dtype(), x.device())?;
                let strict = (Tensor::tril2(d, x.dtype(), x.device())? - &eye)?;
                let diag = diag_column(x, &eye)?;
                let min_diag: f32 = diag.to_dtype(DType::F32)?.flatten_all()?.min(0)?.to_scalar()?;
                if min_diag <= 0.0 {
                    return Err(PplError::InvalidParameter(format!(
                        "cholesky factor needs a positive diagonal, found {}",
                        min_diag
                    )));
                }
                Ok((x.mul(&strict)? + eye.broadcast_mul(&diag.log()?)?)?)
            }
        }
    }

    /// `log |det d forward(u) / du|`, reduced over this transform's event dims.
    pub fn log_abs_det_jacobian(&self, u: &Tensor, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Identity => Ok(u.zeros_like()?),
            Self::Exp => Ok(u.clone()),
            Self::Sigmoid => Ok((softplus(&u.neg()?)? + softplus(u)?)?.neg()?),
            Self::StickBreaking => {
                let (z, remaining) = self.stick_fractions(u)?;
                let mut ladj: Option<Tensor> = None;
                for i in 0..z.len() {
                    // log z + log(1 - z) + log remaining
                    let term = (z[i].log()? + z[i].affine(-1.0, 1.0)?.log()?)?;
                    let term = (term + remaining[i].log()?)?;
                    ladj = Some(match ladj {
                        Some(acc) => (acc + term)?,
                        None => term,
                    });
                }
                let ladj = ladj.ok_or_else(|| {
                    PplError::shape_mismatch("stick breaking", u.dims(), &[1])
                })?;
                Ok(ladj.squeeze(D::Minus1)?)
            }
            Self::LowerCholesky => {
                let d = square_dim("lower cholesky", x)?;
                let eye = Tensor::eye(d, u.dtype(), u.device())?;
                // only the diagonal is non-linear
                Ok(diag_column(u, &eye)?.sum_all()?)
            }
        }
    }

    /// Stick fractions `z_i` and the stick left before each break, each as
    /// a (.., 1) slice along the last axis; `remaining` has one extra entry
    /// holding the final piece.
    fn stick_fractions(&self, u: &Tensor) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        let k1 = u.dim(D::Minus1)?;
        let last = u.rank() - 1;
        let mut z = Vec::with_capacity(k1);
        let mut remaining = vec![u.ones_like()?.narrow(last, 0, 1)?];
        for i in 0..k1 {
            let offset = ((k1 - i) as f64).ln();
            let z_i = candle_nn::ops::sigmoid(&(u.narrow(last, i, 1)? - offset)?)?;
            let next = remaining[i].mul(&z_i.affine(-1.0, 1.0)?)?;
            z.push(z_i);
            remaining.push(next);
        }
        Ok((z, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar()?)
    }

    #[test]
    fn test_stick_breaking_roundtrip() -> Result<()> {
        let u = Tensor::new(&[0.3f32, -1.2, 0.7], &Device::Cpu)?;
        let t = biject_to(Constraint::Simplex)?;
        let x = t.forward(&u)?;

        assert_eq!(x.dims(), &[4]);
        assert!(Constraint::Simplex.check(&x)?);
        assert!(max_abs_diff(&t.inverse(&x)?, &u)? < 1e-4);

        // zero input lands on the uniform simplex point
        let x0 = t.forward(&Tensor::zeros(3, DType::F32, &Device::Cpu)?)?;
        let xx: Vec<f32> = x0.to_vec1()?;
        for v in xx {
            assert!((v - 0.25).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_sigmoid_jacobian() -> Result<()> {
        let u = Tensor::new(&[0.0f32, 2.0], &Device::Cpu)?;
        let t = biject_to(Constraint::UnitInterval)?;
        let x = t.forward(&u)?;
        let ladj: Vec<f32> = t.log_abs_det_jacobian(&u, &x)?.to_vec1()?;
        let xx: Vec<f32> = x.to_vec1()?;
        for (l, s) in ladj.iter().zip(xx.iter()) {
            let expected = (s * (1.0 - s)).ln();
            assert!((l - expected).abs() < 1e-5, "{} vs {}", l, expected);
        }
        Ok(())
    }

    #[test]
    fn test_lower_cholesky() -> Result<()> {
        let dev = Device::Cpu;
        let u = Tensor::new(&[[0.0f32, 5.0], [0.4, 0.1]], &dev)?;
        let t = biject_to(Constraint::LowerCholesky)?;
        let l = t.forward(&u)?;
        assert!(Constraint::LowerCholesky.check(&l)?);

        let ll: Vec<Vec<f32>> = l.to_vec2()?;
        assert!((ll[0][0] - 1.0).abs() < 1e-6);
        assert_eq!(ll[0][1], 0.0);
        assert!((ll[1][0] - 0.4).abs() < 1e-6);

        let back = t.inverse(&l)?;
        let bb: Vec<Vec<f32>> = back.to_vec2()?;
        assert!((bb[1][1] - 0.1).abs() < 1e-5);

        let bad = Tensor::new(&[[-1.0f32, 0.0], [0.0, 1.0]], &dev)?;
        assert!(t.inverse(&bad).is_err());
        Ok(())
    }

    #[test]
    fn test_discrete_has_no_bijection() {
        assert!(biject_to(Constraint::OneHot).is_err());
    }
}
