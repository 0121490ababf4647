//! The capability trait every OVF/CCF template implements
//!
//! A template describes a function `f(u) = sup_y ⟨y, G(u)⟩ - k(y)` over a
//! set `Y` (or the inf form): the affine transformation `G` carried by the
//! arguments, the polyhedral part of `Y`, the coordinate-wise bounds on
//! `y`, the quadratic part of `k` through its Cholesky factors, and how to
//! append `-k(y)` to an equation. The reformulators drive templates only
//! through this trait.

use crate::avar::Avar;
use crate::cones::Cone;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::idx::EquIdx;
use crate::mat::Mat;
use crate::ovf::OvfParams;
use crate::types::{ModelType, Sense};

/// Quick properties of a template instance
#[derive(Debug, Clone, Copy)]
pub struct OvfPpty {
    /// The function has a quadratic part
    pub quad: bool,
    /// Sup (`Max`) or inf (`Min`) form
    pub sense: Sense,
    /// Problem type the instantiated program has
    pub probtype: ModelType,
}

/// A named OVF/CCF template
pub trait OvfTemplate: Send + Sync {
    /// Catalog name
    fn name(&self) -> &'static str;

    /// Sup (`Max`) or inf (`Min`) form
    fn sense(&self) -> Sense;

    /// Dimension of `y` for `n_args` arguments
    fn size_y(&self, n_args: usize, params: &OvfParams) -> Result<usize> {
        let _ = params;
        Ok(n_args)
    }

    /// Coordinate-wise lower bound of `y`
    fn var_lb(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64>;

    /// Coordinate-wise upper bound of `y`
    fn var_ub(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<f64>;

    /// Create the `y` block, bounds applied, under the given name scope
    fn create_uvar(&self, ctr: &mut Container, name: &str, n_y: usize, params: &OvfParams) -> Result<Avar> {
        ctr.var_name_scope(name.to_string());
        let mut first = None;
        for i in 0..n_y {
            let vi = ctr.add_var(self.var_lb(i, n_y, params)?, self.var_ub(i, n_y, params)?)?;
            if first.is_none() {
                first = Some(vi);
            }
        }
        ctr.var_name_scope_end();
        let start = first.ok_or_else(|| {
            Error::UnexpectedData(format!(
                "the number of variables associated with the CCF '{}' is 0",
                self.name()
            ))
        })?;
        Ok(Avar::compact(n_y as u32, start))
    }

    /// Append `-k(y)` to the equation
    fn add_k(&self, ctr: &mut Container, ei: EquIdx, y: &Avar, params: &OvfParams) -> Result<()>;

    /// The affine transformation `(B, b)` applied to the arguments
    ///
    /// An empty matrix means the identity; `None` means no constant.
    fn affine_transformation(
        &self,
        n_args: usize,
        params: &OvfParams,
    ) -> Result<(Mat, Option<Vec<f64>>)> {
        let _ = (n_args, params);
        Ok((Mat::Empty, None))
    }

    /// The nonbox polyhedral part of `Y`: rows of `(A, s)` with
    /// `A y - s ∈ K` row-wise
    fn set_nonbox(&self, n_y: usize, params: &OvfParams) -> Result<(Mat, Vec<f64>)> {
        let _ = (n_y, params);
        Ok((Mat::Empty, Vec::new()))
    }

    /// Cone of row `i` of the nonbox set
    fn cone_nonbox(&self, i: usize, n_y: usize, params: &OvfParams) -> Result<Cone> {
        let _ = (i, n_y, params);
        Err(Error::runtime(format!(
            "template '{}' has no nonbox set",
            self.name()
        )))
    }

    /// The nonbox set shifted by `ỹ`: `(A, s - A ỹ)`
    ///
    /// This is the set the dual multipliers price after the y-shift step.
    fn set_0(&self, n_y: usize, params: &OvfParams, shift: &[f64]) -> Result<(Mat, Vec<f64>)> {
        let (a, mut s) = self.set_nonbox(n_y, params)?;
        if !a.is_empty() {
            let (nrows, _) = a.size();
            let mut tmp = vec![0.0; nrows];
            a.axpy(shift, &mut tmp)?;
            for (si, ti) in s.iter_mut().zip(tmp.iter()) {
                *si -= ti;
            }
        }
        Ok((a, s))
    }

    /// Cholesky factors `(D, J)` of the quadratic part `M = Dᵀ J D`
    fn quad_factors(&self, n_y: usize, params: &OvfParams) -> Result<(Mat, Mat)> {
        let _ = (n_y, params);
        Ok((Mat::Empty, Mat::Empty))
    }

    /// The quadratic part `M` itself
    fn quad_m(&self, n_y: usize, params: &OvfParams) -> Result<Mat> {
        let (d, j) = self.quad_factors(n_y, params)?;
        if d.is_empty() && j.is_empty() {
            return Ok(Mat::Empty);
        }
        match d {
            Mat::Eye { scale, .. } if scale == 1.0 => Ok(j),
            _ => Err(Error::not_implemented(format!(
                "recovering M from a non-identity D for template '{}'",
                self.name()
            ))),
        }
    }

    /// Quick properties
    fn ppty(&self, params: &OvfParams) -> Result<OvfPpty> {
        let (d, _) = self.quad_factors(1, params)?;
        let quad = !d.is_empty();
        Ok(OvfPpty {
            quad,
            sense: self.sense(),
            probtype: if quad { ModelType::Qp } else { ModelType::Lp },
        })
    }

    /// Validate an instance against this template
    fn check(&self, n_args: usize, params: &OvfParams) -> Result<()> {
        if n_args == 0 {
            return Err(Error::invalid_argument(format!(
                "OVF '{}' needs at least one argument",
                self.name()
            )));
        }
        let n_y = self.size_y(n_args, params)?;
        if n_y == 0 {
            return Err(Error::UnexpectedData(format!(
                "the number of variables associated with the CCF '{}' is 0. This should \
                 never happen. Check the OVF definition if it is a custom one, or file a bug",
                self.name()
            )));
        }
        for i in 0..n_y {
            let lb = self.var_lb(i, n_y, params)?;
            let ub = self.var_ub(i, n_y, params)?;
            if lb > ub {
                return Err(Error::invalid_value(format!(
                    "the bounds on the {i}-th variable of '{}' are not consistent: \
                     lb = {lb:e} > {ub:e} = ub",
                    self.name()
                )));
            }
        }
        let (a, s) = self.set_nonbox(n_y, params)?;
        if !a.is_empty() {
            let (nrows, ncols) = a.size();
            if ncols != n_y {
                return Err(Error::dimension_mismatch(n_y, ncols));
            }
            if s.len() != nrows {
                return Err(Error::dimension_mismatch(nrows, s.len()));
            }
            if s.iter().any(|v| !v.is_finite()) {
                return Err(Error::MathError(format!(
                    "non-finite entry in the set data of '{}'",
                    self.name()
                )));
            }
        }
        Ok(())
    }
}
