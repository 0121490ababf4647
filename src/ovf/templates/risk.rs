//! Risk-measure templates over discrete distributions
//!
//! The dual variable `y` is a reweighting of the scenario probabilities:
//! expectation pins `y` to the nominal distribution, CVaR lets the worst
//! `tail` fraction of scenarios be inflated, and the `ecvar` variants mix
//! both. All of them share the simplex row `Σ y = 1`.

use crate::avar::Avar;
use crate::cones::Cone;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::idx::EquIdx;
use crate::mat::Mat;
use crate::ovf::{OvfParams, OvfTemplate};
use crate::types::Sense;

fn probabilities(params: &OvfParams, n_y: usize) -> Result<Vec<f64>> {
    let p = params.vector_or_uniform("probabilities", n_y);
    if p.len() != n_y {
        return Err(Error::dimension_mismatch(n_y, p.len()));
    }
    Ok(p)
}

fn tail(params: &OvfParams) -> Result<f64> {
    let t = params.scalar("tail")?;
    if !(t > 0.0 && t <= 1.0) {
        return Err(Error::invalid_value(format!(
            "the tail value must be in (0, 1], got {t}"
        )));
    }
    Ok(t)
}

/// The simplex row `Σ y = 1` as a one-row set
fn simplex_row(n_y: usize) -> Result<(Mat, Vec<f64>)> {
    let triplets: Vec<(usize, usize, f64)> = (0..n_y).map(|j| (0, j, 1.0)).collect();
    Ok((Mat::from_triplets(1, n_y, &triplets)?, vec![1.0]))
}

/// `E_p[u] = Σ pᵢ uᵢ`, as the degenerate sup over `{p}`
pub struct Expectation;

impl OvfTemplate for Expectation {
    fn name(&self) -> &'static str {
        "expectation"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
        Ok(probabilities(params, n_y)?[i])
    }

    fn var_ub(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
        Ok(probabilities(params, n_y)?[i])
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }

    fn set_nonbox(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Vec<f64>)> {
        simplex_row(n_y)
    }

    fn cone_nonbox(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<Cone> {
        Ok(Cone::Zero)
    }
}

/// Upper CVaR at tail `t`:
/// `sup { ⟨y, u⟩ : Σ y = 1, 0 ≤ yᵢ ≤ pᵢ/t }`
pub struct CvarUp;

impl OvfTemplate for CvarUp {
    fn name(&self) -> &'static str {
        "cvarup"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
        let t = tail(params)?;
        Ok(probabilities(params, n_y)?[i] / t)
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }

    fn set_nonbox(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Vec<f64>)> {
        simplex_row(n_y)
    }

    fn cone_nonbox(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<Cone> {
        Ok(Cone::Zero)
    }
}

/// Lower CVaR at tail `t`, the inf form of [`CvarUp`]
pub struct CvarLo;

impl OvfTemplate for CvarLo {
    fn name(&self) -> &'static str {
        "cvarlo"
    }

    fn sense(&self) -> Sense {
        Sense::Min
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
        let t = tail(params)?;
        Ok(probabilities(params, n_y)?[i] / t)
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }

    fn set_nonbox(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Vec<f64>)> {
        simplex_row(n_y)
    }

    fn cone_nonbox(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<Cone> {
        Ok(Cone::Zero)
    }
}

fn ecvar_ub(i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
    let t = tail(params)?;
    let lambda = params.scalar("lambda")?;
    if !(0.0..=1.0).contains(&lambda) {
        return Err(Error::invalid_value(format!(
            "the lambda value must be in [0, 1], got {lambda}"
        )));
    }
    let p = probabilities(params, n_y)?[i];
    Ok((1.0 - lambda) * p + lambda * p / t)
}

/// Mixture `(1-λ)·E + λ·CVaR_t`, upper-tail form:
/// `sup { ⟨y, u⟩ : Σ y = 1, 0 ≤ yᵢ ≤ (1-λ)pᵢ + λpᵢ/t }`
pub struct ECvarUp;

impl OvfTemplate for ECvarUp {
    fn name(&self) -> &'static str {
        "ecvarup"
    }

    fn sense(&self) -> Sense {
        Sense::Max
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
        ecvar_ub(i, n_y, params)
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }

    fn set_nonbox(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Vec<f64>)> {
        simplex_row(n_y)
    }

    fn cone_nonbox(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<Cone> {
        Ok(Cone::Zero)
    }
}

/// Mixture `(1-λ)·E + λ·CVaR_t`, lower-tail (inf) form
pub struct ECvarLo;

impl OvfTemplate for ECvarLo {
    fn name(&self) -> &'static str {
        "ecvarlo"
    }

    fn sense(&self) -> Sense {
        Sense::Min
    }

    fn var_lb(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<f64> {
        Ok(0.0)
    }

    fn var_ub(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64> {
        ecvar_ub(i, n_y, params)
    }

    fn add_k(&self, _ctr: &mut Container, _ei: EquIdx, _y: &Avar, _params: &OvfParams) -> Result<()> {
        Ok(())
    }

    fn set_nonbox(&self, n_y: usize, _params: &OvfParams) -> Result<(Mat, Vec<f64>)> {
        simplex_row(n_y)
    }

    fn cone_nonbox(&self, _i: usize, _n_y: usize, _params: &OvfParams) -> Result<Cone> {
        Ok(Cone::Zero)
    }
}
