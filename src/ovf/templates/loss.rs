//! Regression and classification loss templates
//!
//! Each loss is written in its sup form `f(u) = sup_y ⟨y, G(u)⟩ - k(y)`
//! with `y` bounded coordinate-wise; the quadratic part of `k`, when
//! present, is the identity up to a scale, so the Cholesky factors are
//! diagonal.

use crate::avar::Avar;
use crate::container::Container;
use crate::error::Result;
use crate::idx::EquIdx;
use crate::mat::Mat;
use crate::ovf::{OvfParams, OvfTemplate};
use crate::types::Sense;

fn add_minus_half_quad(
    ctr: &mut Container,
    ei: EquIdx,
    y: &Avar,
    scale: f64,
) -> Result<()> {
    let triplets: Vec<(usize, usize, f64)> = (0..y.size()).map(|i| (i, i, 1.0)).collect();
    ctr.equ_add_quadratic_relative(ei, y, y, &triplets, -0.5 * scale)
}

fn add_minus_linear(ctr: &mut Container, ei: EquIdx, y: &Avar, coeff: f64) -> Result<()> {
    let coeffs = vec![coeff; y.size()];
    ctr.equ_add_linear(ei, y, &coeffs, -1.0)
}

/// Stack `[I; -I]` mapping `n` arguments to `2n` dual coordinates
fn plus_minus_stack(n: usize) -> Result<Mat> {
    let mut triplets = Vec::with_capacity(2 * n);
    for j in 0..n {
        triplets.push((j, j, 1.0));
        triplets.push((n + j, j, -1.0));
    }
    Mat::from_triplets(2 * n, n, &triplets)
}

/// `‖u‖₁ = sup { ⟨y, u⟩ : y ∈ [-1, 1]ⁿ }`
pub struct L1;

impl OvfTemplate for L1 {
    fn name(&self) -> &'static str {
        "l1"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(-1.0)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(1.0)
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }
}

/// `½‖u‖² = sup_y ⟨y, u⟩ - ½⟨y, y⟩`
pub struct L2;

impl OvfTemplate for L2 {
    fn name(&self) -> &'static str {
        "l2"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(f64::NEG_INFINITY)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(f64::INFINITY)
    }

    fn add_k(&self, ctr: &mut Container, ei: EquIdx, y: &Avar, _params: &OvfParams) -> Result<()> {
        add_minus_half_quad(ctr, ei, y, 1.0)
    }

    fn quad_factors(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Mat)> {
        Ok((Mat::eye(n_y, 1.0), Mat::eye(n_y, 1.0)))
    }
}

/// Smoothed elastic net: `sup { ⟨y, u⟩ - ⟨y, y⟩/(2λ₂) : y ∈ [-λ₁, λ₁]ⁿ }`
pub struct ElasticNet;

impl OvfTemplate for ElasticNet {
    fn name(&self) -> &'static str {
        "elastic_net"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, params: &OvfParams) -> Result<f64> {
        Ok(-params.scalar("lambda1")?)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, params: &OvfParams) -> Result<f64> {
        params.scalar("lambda1")
    }

    fn add_k(&self, ctr: &mut Container, ei: EquIdx, y: &Avar, params: &OvfParams) -> Result<()> {
        let lambda2 = params.scalar("lambda2")?;
        add_minus_half_quad(ctr, ei, y, 1.0 / lambda2)
    }

    fn quad_factors(&self, n_y: usize, params: &OvfParams) -> Result<(Mat, Mat)> {
        let lambda2 = params.scalar("lambda2")?;
        Ok((Mat::eye(n_y, 1.0), Mat::eye(n_y, 1.0 / lambda2)))
    }
}

/// Huber loss: `sup { ⟨y, u⟩ - ½⟨y, y⟩ : y ∈ [-κ, κ]ⁿ }`
pub struct Huber;

impl OvfTemplate for Huber {
    fn name(&self) -> &'static str {
        "huber"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, params: &OvfParams) -> Result<f64> {
        Ok(-params.scalar("kappa")?)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, params: &OvfParams) -> Result<f64> {
        params.scalar("kappa")
    }

    fn add_k(&self, ctr: &mut Container, ei: EquIdx, y: &Avar, _params: &OvfParams) -> Result<()> {
        add_minus_half_quad(ctr, ei, y, 1.0)
    }

    fn quad_factors(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Mat)> {
        Ok((Mat::eye(n_y, 1.0), Mat::eye(n_y, 1.0)))
    }
}

/// Hinge loss `max(0, marg - u)` coordinate-wise:
/// `sup { ⟨y, marg·1 - u⟩ : y ∈ [0, 1]ⁿ }`
pub struct Hinge;

impl OvfTemplate for Hinge {
    fn name(&self) -> &'static str {
        "hinge"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(1.0)
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }

    fn affine_transformation(
        &self,
        n_args: usize,
        params: &OvfParams,
    ) -> Result<(Mat, Option<Vec<f64>>)> {
        let marg = params.scalar_or("marg", 1.0);
        Ok((Mat::eye(n_args, -1.0), Some(vec![marg; n_args])))
    }
}

/// Vapnik (ε-insensitive) loss `max(|u| - ε, 0)`:
/// `sup { ⟨y⁺ - y⁻, u⟩ - ε Σ(y⁺ + y⁻) : y⁺, y⁻ ∈ [0, 1]ⁿ }`
pub struct Vapnik;

impl OvfTemplate for Vapnik {
    fn name(&self) -> &'static str {
        "vapnik"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn size_y(&self, n_args: usize, _params: &OvfParams) -> Result<usize> {
        Ok(2 * n_args)
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(1.0)
    }

    fn add_k(&self, ctr: &mut Container, ei: EquIdx, y: &Avar, params: &OvfParams) -> Result<()> {
        let epsilon = params.scalar("epsilon")?;
        add_minus_linear(ctr, ei, y, epsilon)
    }

    fn affine_transformation(
        &self,
        n_args: usize,
        _params: &OvfParams,
    ) -> Result<(Mat, Option<Vec<f64>>)> {
        Ok((plus_minus_stack(n_args)?, None))
    }
}

/// Huber-Vapnik hybrid:
/// `sup { ⟨y⁺ - y⁻, u⟩ - ½⟨y, y⟩ - ε Σ y : y ∈ [0, κ]²ⁿ }`
pub struct Hubnik;

impl OvfTemplate for Hubnik {
    fn name(&self) -> &'static str {
        "hubnik"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn size_y(&self, n_args: usize, _params: &OvfParams) -> Result<usize> {
        Ok(2 * n_args)
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, _i: usize, _n_y: usize, params: &OvfParams) -> Result<f64> {
        params.scalar("kappa")
    }

    fn add_k(&self, ctr: &mut Container, ei: EquIdx, y: &Avar, params: &OvfParams) -> Result<()> {
        let epsilon = params.scalar("epsilon")?;
        add_minus_half_quad(ctr, ei, y, 1.0)?;
        add_minus_linear(ctr, ei, y, epsilon)
    }

    fn affine_transformation(
        &self,
        n_args: usize,
        _params: &OvfParams,
    ) -> Result<(Mat, Option<Vec<f64>>)> {
        Ok((plus_minus_stack(n_args)?, None))
    }

    fn quad_factors(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Mat)> {
        Ok((Mat::eye(n_y, 1.0), Mat::eye(n_y, 1.0)))
    }
}
