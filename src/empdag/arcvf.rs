//! Weights carried by value-function arcs
//!
//! A VF arc records where the child's optimal value enters the parent
//! (the equation index) and with which weight: a scalar, a single
//! variable times a scalar, a linear form, or a general expression.
//! Weights are values; appending an arc to the graph deep-copies them.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::idx::{EquIdx, MpId, VarIdx};
use crate::mp::MathPrgm;

/// Weight of one basic VF occurrence: `cst * vi` (or `cst` alone)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcVfBasic {
    /// Equation where the child's value function appears
    pub ei: EquIdx,
    /// Optional variable multiplying the value, `NA` when absent
    pub vi: VarIdx,
    /// Scalar weight
    pub cst: f64,
}

/// Weight of a linear-form VF occurrence: `Σ coeffs[i] * vars[i]`
#[derive(Debug, Clone, PartialEq)]
pub struct ArcVfLequ {
    /// Equation where the child's value function appears
    pub ei: EquIdx,
    /// Variables of the linear form
    pub vars: Vec<VarIdx>,
    /// Coefficients of the linear form
    pub coeffs: Vec<f64>,
}

/// The weight carried by a VF arc
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ArcVf {
    /// Not yet initialized
    #[default]
    Unset,
    /// One equation, basic weight
    Basic(ArcVfBasic),
    /// Several equations, basic weights
    MultipleBasic(Vec<ArcVfBasic>),
    /// One equation, linear-form weight
    Lequ(ArcVfLequ),
    /// Several equations, linear-form weights
    MultipleLequ(Vec<ArcVfLequ>),
    /// One equation, general-expression weight (structural placeholder)
    Equ(EquIdx),
    /// Several equations, general-expression weights
    MultipleEqu(Vec<EquIdx>),
}

impl ArcVf {
    /// A unit-weight arc into equation `ei`
    pub fn init(ei: EquIdx) -> Self {
        ArcVf::Basic(ArcVfBasic {
            ei,
            vi: VarIdx::NA,
            cst: 1.0,
        })
    }

    /// A scalar-weight arc into equation `ei`
    pub fn with_cst(ei: EquIdx, cst: f64) -> Self {
        ArcVf::Basic(ArcVfBasic {
            ei,
            vi: VarIdx::NA,
            cst,
        })
    }

    /// A `cst * vi` arc into equation `ei`
    pub fn with_var(ei: EquIdx, vi: VarIdx, cst: f64) -> Self {
        ArcVf::Basic(ArcVfBasic { ei, vi, cst })
    }

    /// True once the weight was initialized
    pub fn is_set(&self) -> bool {
        !matches!(self, ArcVf::Unset)
    }

    /// The equation the weight points at, for single-equation variants
    pub fn equ(&self) -> EquIdx {
        match self {
            ArcVf::Basic(b) => b.ei,
            ArcVf::Lequ(l) => l.ei,
            ArcVf::Equ(ei) => *ei,
            _ => EquIdx::NA,
        }
    }

    /// Multiply the weight by the linear form `Σ coeffs[i] * vars[i]`
    ///
    /// A plain scalar weight times a one-term form stays basic; a scalar
    /// weight times a longer form becomes a linear-form weight. Weights
    /// already carrying a variable would become quadratic, which the
    /// engine does not represent.
    pub fn mul_lequ(&mut self, vars: &[VarIdx], coeffs: &[f64]) -> Result<()> {
        if vars.len() != coeffs.len() {
            return Err(Error::dimension_mismatch(vars.len(), coeffs.len()));
        }
        match self {
            ArcVf::Basic(b) if !b.vi.is_valid() => {
                if vars.len() == 1 {
                    b.vi = vars[0];
                    b.cst *= coeffs[0];
                } else {
                    *self = ArcVf::Lequ(ArcVfLequ {
                        ei: b.ei,
                        vars: vars.to_vec(),
                        coeffs: coeffs.iter().map(|c| c * b.cst).collect(),
                    });
                }
                Ok(())
            }
            ArcVf::Unset => Err(Error::runtime(
                "cannot multiply an unset VF-arc weight".to_string(),
            )),
            _ => Err(Error::not_implemented(
                "VF-arc weight multiplication beyond linear".to_string(),
            )),
        }
    }

    /// Multiply by another weight (used when collapsing chained VF arcs)
    pub fn mul(&mut self, other: &ArcVf) -> Result<()> {
        match (&mut *self, other) {
            (ArcVf::Basic(a), ArcVf::Basic(b)) => {
                if a.vi.is_valid() && b.vi.is_valid() {
                    return Err(Error::not_implemented(
                        "product of two variable-carrying VF-arc weights".to_string(),
                    ));
                }
                if b.vi.is_valid() {
                    a.vi = b.vi;
                }
                a.cst *= b.cst;
                Ok(())
            }
            (ArcVf::Unset, _) | (_, ArcVf::Unset) => Err(Error::runtime(
                "cannot compose an unset VF-arc weight".to_string(),
            )),
            _ => Err(Error::not_implemented(
                "composition of non-basic VF-arc weights".to_string(),
            )),
        }
    }

    /// True when the weight's equation is the objective equation of `mp`
    pub fn is_in_objective_of(&self, mp: &MathPrgm, ctr: &Container) -> bool {
        let ei = self.equ();
        if !ei.is_valid() {
            return false;
        }
        if mp.objequ() == ei {
            return true;
        }
        ctr.equ_meta(ei)
            .map(|m| m.mp == mp.id && m.role == crate::container::EquRole::Objective)
            .unwrap_or(false)
    }
}

/// A VF arc: the child it points to plus the weight of the edge
#[derive(Debug, Clone, PartialEq)]
pub struct Varc {
    /// The child MP
    pub child: MpId,
    /// The edge weight
    pub weight: ArcVf,
}

impl Varc {
    /// Create an arc
    pub fn new(child: MpId, weight: ArcVf) -> Self {
        Self { child, weight }
    }
}
