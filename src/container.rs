//! Container facade: variables, equations, and their metadata
//!
//! The reformulation engine edits models through this narrow surface:
//! create variables and equations, accumulate linear/quadratic/nonlinear
//! contributions, duplicate an equation minus one variable, and keep the
//! incidence index in sync. The numeric heavy lifting (derivatives,
//! evaluation for solvers) lives outside the engine; the structural
//! evaluation provided here exists for consistency checks and tests.
//!
//! ## Contracts
//!
//! - An index, once returned, stays valid for the life of the container
//!   unless deleted; deletion is permanent and indices are never reused.
//! - `equ_add_*` operations are additive; rewriting a coefficient requires
//!   a delete + re-add, or [`Container::equ_copy_except`].
//! - After a batch of structural edits, [`Container::sync_lequ`] must run
//!   before any query that consumes the incidence index.

use serde::{Deserialize, Serialize};

use crate::avar::Avar;
use crate::cones::Cone;
use crate::error::{Error, Result};
use crate::idx::{EquIdx, MpId, VarIdx};

/// Role of a variable in its owning program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VarRole {
    /// Not yet assigned
    #[default]
    Undefined,
    /// Objective variable
    Objective,
    /// Primal decision variable
    Primal,
    /// Dual variable (multiplier)
    Dual,
    /// Variable defining a mapping
    DefiningMap,
}

/// Property bits of a variable
///
/// The low nibble carries the basic type; the high bits are independent
/// markers. Mirrors the wire encoding used in printed diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VarPpty(pub u8);

impl VarPpty {
    /// Minimized objective variable
    pub const OBJ_MIN: u8 = 1;
    /// Maximized objective variable
    pub const OBJ_MAX: u8 = 2;
    /// Dual variable w.r.t. a constraint
    pub const DUAL_VAR: u8 = 3;
    /// Explicitly defined by an equation
    pub const EXPLICITLY_DEFINED: u8 = 4;
    /// Part of a control relation
    pub const SOLUTION_VAR: u8 = 16;
    /// Assigned to multiple nodes
    pub const SHARED: u8 = 32;

    const BASIC_MASK: u8 = 0xf;

    /// Set one or more bits
    pub fn set(&mut self, bits: u8) {
        self.0 |= bits;
    }

    /// Test whether every given bit is set
    pub fn has(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    /// The basic-type nibble
    pub fn basic(self) -> u8 {
        self.0 & Self::BASIC_MASK
    }

    /// True for an objective variable that is explicitly defined by its
    /// objective equation; such variables are not counted as solution
    /// variables during classification.
    pub fn is_defined_objvar(self) -> bool {
        let basic = self.basic();
        basic == (Self::EXPLICITLY_DEFINED | Self::OBJ_MIN)
            || basic == (Self::EXPLICITLY_DEFINED | Self::OBJ_MAX)
    }
}

/// Metadata attached to a variable
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VarMeta {
    /// Role in the owning program
    pub role: VarRole,
    /// Property bits
    pub ppty: VarPpty,
    /// Owning mathematical program
    pub mp: MpId,
    /// Dual equation, when assigned
    pub dual: EquIdx,
}

impl Default for VarMeta {
    fn default() -> Self {
        Self {
            role: VarRole::Undefined,
            ppty: VarPpty::default(),
            mp: MpId::NA,
            dual: EquIdx::NA,
        }
    }
}

/// Role of an equation in its owning program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EquRole {
    /// Not yet assigned
    #[default]
    Undefined,
    /// Objective equation
    Objective,
    /// Constraint
    Constraint,
    /// VI function
    ViFunction,
    /// Defines a mapping
    IsMap,
}

/// Metadata attached to an equation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquMeta {
    /// Role in the owning program
    pub role: EquRole,
    /// Owning mathematical program
    pub mp: MpId,
    /// Dual variable, when assigned
    pub dual: VarIdx,
}

impl Default for EquMeta {
    fn default() -> Self {
        Self {
            role: EquRole::Undefined,
            mp: MpId::NA,
            dual: VarIdx::NA,
        }
    }
}

/// Kind of an equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquKind {
    /// A mapping (no relation attached)
    Mapping,
    /// A mapping defining a variable
    DefinedMapping,
    /// Inclusion of the expression in a cone
    ConeInclusion,
}

/// A variable record
#[derive(Debug, Clone)]
pub struct Var {
    /// Lower bound
    pub lb: f64,
    /// Upper bound
    pub ub: f64,
    /// Level value (used by postprocessing)
    pub value: f64,
    /// Integrality marker, used only by model classification
    pub integer: bool,
    /// Marked deleted; the slot is never reused
    pub deleted: bool,
}

/// One linear term `coeff * var`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinTerm {
    /// The variable
    pub vi: VarIdx,
    /// Its coefficient
    pub coeff: f64,
}

/// One quadratic term `coeff * vi * vj`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadTerm {
    /// First variable
    pub vi: VarIdx,
    /// Second variable
    pub vj: VarIdx,
    /// Coefficient
    pub coeff: f64,
}

/// A structural nonlinear expression
///
/// The engine only copies, scales, and splices these trees; it never
/// differentiates them.
#[derive(Debug, Clone, PartialEq)]
pub enum NlExpr {
    /// Constant leaf
    Const(f64),
    /// Variable leaf
    Var(VarIdx),
    /// Sum of subtrees
    Sum(Vec<NlExpr>),
    /// Scalar multiple of a subtree
    Scaled(f64, Box<NlExpr>),
    /// Product of subtrees
    Mul(Vec<NlExpr>),
}

impl NlExpr {
    /// Copy of the tree multiplied by `coeff`
    ///
    /// A unit multiplier returns a plain copy; a scaled copy wraps the
    /// root rather than rewriting every leaf.
    pub fn scaled_copy(&self, coeff: f64) -> NlExpr {
        if coeff == 1.0 {
            self.clone()
        } else {
            NlExpr::Scaled(coeff, Box::new(self.clone()))
        }
    }

    /// True when `vi` appears anywhere in the tree
    pub fn mentions(&self, vi: VarIdx) -> bool {
        match self {
            NlExpr::Const(_) => false,
            NlExpr::Var(v) => *v == vi,
            NlExpr::Sum(children) | NlExpr::Mul(children) => {
                children.iter().any(|c| c.mentions(vi))
            }
            NlExpr::Scaled(_, inner) => inner.mentions(vi),
        }
    }

    /// Collect every variable of the tree into `out` (with duplicates)
    pub fn collect_vars(&self, out: &mut Vec<VarIdx>) {
        match self {
            NlExpr::Const(_) => {}
            NlExpr::Var(v) => out.push(*v),
            NlExpr::Sum(children) | NlExpr::Mul(children) => {
                for c in children {
                    c.collect_vars(out);
                }
            }
            NlExpr::Scaled(_, inner) => inner.collect_vars(out),
        }
    }

    /// Remove every additive term mentioning `vi`
    ///
    /// Returns `None` when the whole tree mentions `vi` non-additively,
    /// in which case the contribution cannot be separated structurally.
    fn without_var(&self, vi: VarIdx) -> Option<NlExpr> {
        if !self.mentions(vi) {
            return Some(self.clone());
        }
        match self {
            NlExpr::Sum(children) => {
                let mut kept = Vec::with_capacity(children.len());
                for c in children {
                    if !c.mentions(vi) {
                        kept.push(c.clone());
                    } else if let NlExpr::Sum(_) | NlExpr::Scaled(_, _) = c {
                        kept.push(c.without_var(vi)?);
                    }
                    // an additive term mentioning vi is dropped entirely
                }
                Some(NlExpr::Sum(kept))
            }
            NlExpr::Scaled(s, inner) => inner
                .without_var(vi)
                .map(|t| NlExpr::Scaled(*s, Box::new(t))),
            _ => None,
        }
    }

    /// Structural evaluation at a point
    pub fn eval(&self, point: &[f64]) -> f64 {
        match self {
            NlExpr::Const(c) => *c,
            NlExpr::Var(v) => point[v.idx()],
            NlExpr::Sum(children) => children.iter().map(|c| c.eval(point)).sum(),
            NlExpr::Scaled(s, inner) => s * inner.eval(point),
            NlExpr::Mul(children) => children.iter().map(|c| c.eval(point)).product(),
        }
    }

    /// Build `⟨y, B·(coeffs ∘ args) + b⟩`
    ///
    /// `bmat` is `n_y × n_args`; an absent matrix means the identity. The
    /// per-argument coefficients default to one.
    pub fn dot_product(
        y: &Avar,
        bmat: &crate::mat::Mat,
        b: Option<&[f64]>,
        coeffs: Option<&[f64]>,
        args: &Avar,
    ) -> Result<NlExpr> {
        let n_y = y.size();
        let n_args = args.size();
        if !bmat.is_empty() {
            let (rows, cols) = bmat.size();
            if rows != n_y {
                return Err(Error::dimension_mismatch(n_y, rows));
            }
            if cols != n_args {
                return Err(Error::Inconsistency(format!(
                    "the number of arguments ({n_args}) and the number of columns in B \
                     ({cols}) should be the same"
                )));
            }
        } else if n_y != n_args {
            return Err(Error::dimension_mismatch(n_args, n_y));
        }

        let coeff_of = |j: usize| coeffs.map_or(1.0, |c| c[j]);
        let mut terms = Vec::with_capacity(n_y);
        for i in 0..n_y {
            let mut inner = Vec::new();
            if bmat.is_empty() {
                let arg = args.get(i).ok_or_else(|| {
                    Error::index_out_of_range(format!("argument {i} missing"))
                })?;
                inner.push(NlExpr::Var(arg).scaled_copy(coeff_of(i)));
            } else {
                for (j, v) in bmat.row(i) {
                    let arg = args.get(j).ok_or_else(|| {
                        Error::index_out_of_range(format!("argument {j} missing"))
                    })?;
                    inner.push(NlExpr::Var(arg).scaled_copy(v * coeff_of(j)));
                }
            }
            if let Some(bvec) = b {
                if bvec[i] != 0.0 {
                    inner.push(NlExpr::Const(bvec[i]));
                }
            }
            if inner.is_empty() {
                continue;
            }
            let yi = y
                .get(i)
                .ok_or_else(|| Error::index_out_of_range(format!("y[{i}] missing")))?;
            terms.push(NlExpr::Mul(vec![NlExpr::Var(yi), NlExpr::Sum(inner)]));
        }
        Ok(NlExpr::Sum(terms))
    }
}

/// An equation record
#[derive(Debug, Clone)]
pub struct Equ {
    /// Kind of the equation
    pub kind: EquKind,
    /// Cone of a cone-inclusion equation
    pub cone: Cone,
    /// Additive constant of the left-hand side
    pub cst: f64,
    /// Linear terms
    pub lin: Vec<LinTerm>,
    /// Quadratic terms
    pub quad: Vec<QuadTerm>,
    /// Nonlinear part
    pub nl: Option<NlExpr>,
    /// Marked deleted; the slot is never reused
    pub deleted: bool,
}

impl Equ {
    fn new(kind: EquKind, cone: Cone) -> Self {
        Self {
            kind,
            cone,
            cst: 0.0,
            lin: Vec::new(),
            quad: Vec::new(),
            nl: None,
            deleted: false,
        }
    }

    /// Linear coefficient of `vi`, summed over duplicate terms
    pub fn lin_coeff(&self, vi: VarIdx) -> f64 {
        self.lin
            .iter()
            .filter(|t| t.vi == vi)
            .map(|t| t.coeff)
            .sum()
    }

    /// True when the equation has a nonlinear part
    pub fn is_nonlinear(&self) -> bool {
        self.nl.is_some()
    }

    /// True when the equation has quadratic but no nonlinear terms
    pub fn is_quadratic(&self) -> bool {
        !self.quad.is_empty() && self.nl.is_none()
    }

    /// True when the equation is purely linear
    pub fn is_linear(&self) -> bool {
        self.quad.is_empty() && self.nl.is_none()
    }
}

/// The container: variable and equation tables plus the incidence index
#[derive(Debug, Clone, Default)]
pub struct Container {
    vars: Vec<Var>,
    equs: Vec<Equ>,
    var_meta: Vec<VarMeta>,
    equ_meta: Vec<EquMeta>,
    var_names: Vec<Option<String>>,
    equ_names: Vec<Option<String>>,
    var_prefix: Option<(String, u32)>,
    equ_prefix: Option<(String, u32)>,
    /// Per-equation variable list (row-major incidence), deduplicated
    equ_vars: Vec<Vec<VarIdx>>,
    /// Per-variable equation list (column-major incidence)
    var_equs: Vec<Vec<EquIdx>>,
}

impl Container {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of variable slots, deleted included
    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }

    /// Total number of equation slots, deleted included
    pub fn n_equs(&self) -> usize {
        self.equs.len()
    }

    /// Number of live variables
    pub fn n_active_vars(&self) -> usize {
        self.vars.iter().filter(|v| !v.deleted).count()
    }

    /// Number of live equations
    pub fn n_active_equs(&self) -> usize {
        self.equs.iter().filter(|e| !e.deleted).count()
    }

    fn check_vi(&self, vi: VarIdx) -> Result<()> {
        if !vi.is_valid() || vi.idx() >= self.vars.len() {
            return Err(Error::index_out_of_range(format!(
                "variable index {vi} outside [0, {})",
                self.vars.len()
            )));
        }
        if self.vars[vi.idx()].deleted {
            return Err(Error::invalid_argument(format!(
                "variable '{}' was deleted",
                self.var_name(vi)
            )));
        }
        Ok(())
    }

    fn check_ei(&self, ei: EquIdx) -> Result<()> {
        if !ei.is_valid() || ei.idx() >= self.equs.len() {
            return Err(Error::index_out_of_range(format!(
                "equation index {ei} outside [0, {})",
                self.equs.len()
            )));
        }
        if self.equs[ei.idx()].deleted {
            return Err(Error::invalid_argument(format!(
                "equation '{}' was deleted",
                self.equ_name(ei)
            )));
        }
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Naming
     * --------------------------------------------------------------------- */

    /// Start naming new variables `prefix`, `prefix_1`, `prefix_2`, ...
    pub fn var_name_scope(&mut self, prefix: impl Into<String>) {
        self.var_prefix = Some((prefix.into(), 0));
    }

    /// Stop the active variable-name scope
    pub fn var_name_scope_end(&mut self) {
        self.var_prefix = None;
    }

    /// Start naming new equations `prefix`, `prefix_1`, `prefix_2`, ...
    pub fn equ_name_scope(&mut self, prefix: impl Into<String>) {
        self.equ_prefix = Some((prefix.into(), 0));
    }

    /// Stop the active equation-name scope
    pub fn equ_name_scope_end(&mut self) {
        self.equ_prefix = None;
    }

    /// Display name of a variable
    pub fn var_name(&self, vi: VarIdx) -> String {
        self.var_names
            .get(vi.idx())
            .and_then(|n| n.clone())
            .unwrap_or_else(|| format!("x{}", vi))
    }

    /// Display name of an equation
    pub fn equ_name(&self, ei: EquIdx) -> String {
        self.equ_names
            .get(ei.idx())
            .and_then(|n| n.clone())
            .unwrap_or_else(|| format!("e{}", ei))
    }

    /// Set the display name of a variable
    pub fn set_var_name(&mut self, vi: VarIdx, name: impl Into<String>) -> Result<()> {
        self.check_vi(vi)?;
        self.var_names[vi.idx()] = Some(name.into());
        Ok(())
    }

    /// Set the display name of an equation
    pub fn set_equ_name(&mut self, ei: EquIdx, name: impl Into<String>) -> Result<()> {
        self.check_ei(ei)?;
        self.equ_names[ei.idx()] = Some(name.into());
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Variable creation
     * --------------------------------------------------------------------- */

    /// Add one variable with the given bounds
    pub fn add_var(&mut self, lb: f64, ub: f64) -> Result<VarIdx> {
        if lb > ub {
            return Err(Error::invalid_value(format!(
                "inconsistent bounds: lb = {lb:e} > {ub:e} = ub"
            )));
        }
        let vi = VarIdx::from(self.vars.len());
        if !vi.is_valid() {
            return Err(Error::InsufficientMemory(
                "variable table exhausted".to_string(),
            ));
        }
        self.vars.push(Var {
            lb,
            ub,
            value: 0.0,
            integer: false,
            deleted: false,
        });
        self.var_meta.push(VarMeta::default());
        self.var_equs.push(Vec::new());
        let name = self.var_prefix.as_mut().map(|(p, k)| {
            *k += 1;
            if *k == 1 {
                p.clone()
            } else {
                format!("{p}_{}", *k - 1)
            }
        });
        self.var_names.push(name);
        tracing::trace!(target: "reshop::container", %vi, "new variable");
        Ok(vi)
    }

    /// Add one variable constrained to a box
    pub fn add_var_in_box(&mut self, lb: f64, ub: f64) -> Result<VarIdx> {
        self.add_var(lb, ub)
    }

    /// Add `n` nonnegative variables
    pub fn add_positive_vars(&mut self, n: usize) -> Result<Avar> {
        self.add_vars_with_bounds(n, 0.0, f64::INFINITY)
    }

    /// Add `n` nonpositive variables
    pub fn add_negative_vars(&mut self, n: usize) -> Result<Avar> {
        self.add_vars_with_bounds(n, f64::NEG_INFINITY, 0.0)
    }

    /// Add `n` free variables
    pub fn add_free_vars(&mut self, n: usize) -> Result<Avar> {
        self.add_vars_with_bounds(n, f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Add `n` variables sharing the same bounds, as a compact block
    pub fn add_vars_with_bounds(&mut self, n: usize, lb: f64, ub: f64) -> Result<Avar> {
        if n == 0 {
            return Ok(Avar::empty());
        }
        let start = self.add_var(lb, ub)?;
        for _ in 1..n {
            self.add_var(lb, ub)?;
        }
        Ok(Avar::compact(n as u32, start))
    }

    /// Add a multiplier living in the polar of `cone`
    ///
    /// Returns `None` when the polar is `{0}`: the multiplier is
    /// identically zero and no variable is created.
    pub fn add_multiplier_polar(&mut self, cone: Cone) -> Result<Option<VarIdx>> {
        self.add_multiplier_in(cone.polar())
    }

    /// Add a multiplier living in the dual of `cone`
    pub fn add_multiplier_dual(&mut self, cone: Cone) -> Result<Option<VarIdx>> {
        self.add_multiplier_in(cone.dual())
    }

    fn add_multiplier_in(&mut self, cone: Cone) -> Result<Option<VarIdx>> {
        if cone == Cone::Zero {
            return Ok(None);
        }
        let (lb, ub) = cone.bounds();
        let vi = self.add_var(lb, ub)?;
        let meta = &mut self.var_meta[vi.idx()];
        meta.role = VarRole::Dual;
        meta.ppty.set(VarPpty::DUAL_VAR);
        Ok(Some(vi))
    }

    /* ---------------------------------------------------------------------
     * Variable edits
     * --------------------------------------------------------------------- */

    /// Bounds of a variable
    pub fn var_bounds(&self, vi: VarIdx) -> Result<(f64, f64)> {
        self.check_vi(vi)?;
        let v = &self.vars[vi.idx()];
        Ok((v.lb, v.ub))
    }

    /// Set the bounds of a variable
    pub fn var_set_bounds(&mut self, vi: VarIdx, lb: f64, ub: f64) -> Result<()> {
        self.check_vi(vi)?;
        if lb > ub {
            return Err(Error::invalid_value(format!(
                "inconsistent bounds on '{}': lb = {lb:e} > {ub:e} = ub",
                self.var_name(vi)
            )));
        }
        let v = &mut self.vars[vi.idx()];
        v.lb = lb;
        v.ub = ub;
        Ok(())
    }

    /// Fix a variable to a value
    pub fn var_fix(&mut self, vi: VarIdx, val: f64) -> Result<()> {
        if !val.is_finite() {
            return Err(Error::MathError(format!(
                "cannot fix variable '{}' to non-finite value {val}",
                self.var_name(vi)
            )));
        }
        self.var_set_bounds(vi, val, val)?;
        self.vars[vi.idx()].value = val;
        Ok(())
    }

    /// Level value of a variable
    pub fn var_value(&self, vi: VarIdx) -> Result<f64> {
        self.check_vi(vi)?;
        Ok(self.vars[vi.idx()].value)
    }

    /// Set the level value of a variable
    pub fn var_set_value(&mut self, vi: VarIdx, val: f64) -> Result<()> {
        self.check_vi(vi)?;
        self.vars[vi.idx()].value = val;
        Ok(())
    }

    /// Mark a variable as integer
    pub fn var_set_integer(&mut self, vi: VarIdx) -> Result<()> {
        self.check_vi(vi)?;
        self.vars[vi.idx()].integer = true;
        Ok(())
    }

    /// Integrality marker of a variable
    pub fn var_is_integer(&self, vi: VarIdx) -> Result<bool> {
        self.check_vi(vi)?;
        Ok(self.vars[vi.idx()].integer)
    }

    /// Delete a variable; its index is never reused
    pub fn var_delete(&mut self, vi: VarIdx) -> Result<()> {
        self.check_vi(vi)?;
        self.vars[vi.idx()].deleted = true;
        self.var_equs[vi.idx()].clear();
        Ok(())
    }

    /// Metadata of a variable
    pub fn var_meta(&self, vi: VarIdx) -> Result<&VarMeta> {
        self.check_vi(vi)?;
        Ok(&self.var_meta[vi.idx()])
    }

    /// Mutable metadata of a variable
    pub fn var_meta_mut(&mut self, vi: VarIdx) -> Result<&mut VarMeta> {
        self.check_vi(vi)?;
        Ok(&mut self.var_meta[vi.idx()])
    }

    /* ---------------------------------------------------------------------
     * Equation creation
     * --------------------------------------------------------------------- */

    /// Add an empty equation of the given kind
    pub fn add_equation(&mut self, kind: EquKind, cone: Cone) -> Result<EquIdx> {
        let ei = EquIdx::from(self.equs.len());
        if !ei.is_valid() {
            return Err(Error::InsufficientMemory(
                "equation table exhausted".to_string(),
            ));
        }
        self.equs.push(Equ::new(kind, cone));
        self.equ_meta.push(EquMeta::default());
        self.equ_vars.push(Vec::new());
        let name = self.equ_prefix.as_mut().map(|(p, k)| {
            *k += 1;
            if *k == 1 {
                p.clone()
            } else {
                format!("{p}_{}", *k - 1)
            }
        });
        self.equ_names.push(name);
        tracing::trace!(target: "reshop::container", %ei, "new equation");
        Ok(ei)
    }

    /// Shorthand: `expr ≥ rhs` as inclusion in `R₊` after moving `rhs`
    pub fn add_greaterthan(&mut self) -> Result<EquIdx> {
        self.add_equation(EquKind::ConeInclusion, Cone::RPlus)
    }

    /// Shorthand: `expr ≤ rhs` as inclusion in `R₋`
    pub fn add_lessthan(&mut self) -> Result<EquIdx> {
        self.add_equation(EquKind::ConeInclusion, Cone::RMinus)
    }

    /// Shorthand: `expr = rhs` as inclusion in `{0}`
    pub fn add_equality(&mut self) -> Result<EquIdx> {
        self.add_equation(EquKind::ConeInclusion, Cone::Zero)
    }

    /// Access an equation
    pub fn equ(&self, ei: EquIdx) -> Result<&Equ> {
        self.check_ei(ei)?;
        Ok(&self.equs[ei.idx()])
    }

    /// Metadata of an equation
    pub fn equ_meta(&self, ei: EquIdx) -> Result<&EquMeta> {
        self.check_ei(ei)?;
        Ok(&self.equ_meta[ei.idx()])
    }

    /// Mutable metadata of an equation
    pub fn equ_meta_mut(&mut self, ei: EquIdx) -> Result<&mut EquMeta> {
        self.check_ei(ei)?;
        Ok(&mut self.equ_meta[ei.idx()])
    }

    /// Delete an equation; its index is never reused
    pub fn equ_delete(&mut self, ei: EquIdx) -> Result<()> {
        self.check_ei(ei)?;
        self.equs[ei.idx()].deleted = true;
        for vi in std::mem::take(&mut self.equ_vars[ei.idx()]) {
            self.var_equs[vi.idx()].retain(|&e| e != ei);
        }
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Equation edits (all additive)
     * --------------------------------------------------------------------- */

    /// Append linear terms `global_coeff * coeffs[i] * vars[i]`
    pub fn equ_add_linear(
        &mut self,
        ei: EquIdx,
        vars: &Avar,
        coeffs: &[f64],
        global_coeff: f64,
    ) -> Result<()> {
        self.check_ei(ei)?;
        if vars.size() != coeffs.len() {
            return Err(Error::dimension_mismatch(vars.size(), coeffs.len()));
        }
        for (i, vi) in vars.iter().enumerate() {
            self.check_vi(vi)?;
            self.equs[ei.idx()].lin.push(LinTerm {
                vi,
                coeff: global_coeff * coeffs[i],
            });
        }
        Ok(())
    }

    /// Append a linear term for a variable not yet present in the equation
    pub fn equ_add_new_linear_var(&mut self, ei: EquIdx, vi: VarIdx, val: f64) -> Result<()> {
        self.check_ei(ei)?;
        self.check_vi(vi)?;
        let equ = &self.equs[ei.idx()];
        if equ.lin.iter().any(|t| t.vi == vi) {
            return Err(Error::invalid_argument(format!(
                "variable '{}' already appears linearly in equation '{}'",
                self.var_name(vi),
                self.equ_name(ei)
            )));
        }
        self.equs[ei.idx()].lin.push(LinTerm { vi, coeff: val });
        Ok(())
    }

    /// Append the bilinear term `coeff * v1 * v2`
    pub fn equ_add_bilinear(
        &mut self,
        ei: EquIdx,
        v1: VarIdx,
        v2: VarIdx,
        coeff: f64,
    ) -> Result<()> {
        self.check_ei(ei)?;
        self.check_vi(v1)?;
        self.check_vi(v2)?;
        self.equs[ei.idx()].quad.push(QuadTerm {
            vi: v1,
            vj: v2,
            coeff,
        });
        Ok(())
    }

    /// Append quadratic terms given by absolute variable indices
    pub fn equ_add_quadratic_absolute(
        &mut self,
        ei: EquIdx,
        triplets: &[(VarIdx, VarIdx, f64)],
        global_coeff: f64,
    ) -> Result<()> {
        self.check_ei(ei)?;
        for &(vi, vj, v) in triplets {
            self.check_vi(vi)?;
            self.check_vi(vj)?;
            self.equs[ei.idx()].quad.push(QuadTerm {
                vi,
                vj,
                coeff: global_coeff * v,
            });
        }
        Ok(())
    }

    /// Append quadratic terms with indices relative to row/column blocks
    pub fn equ_add_quadratic_relative(
        &mut self,
        ei: EquIdx,
        row_vars: &Avar,
        col_vars: &Avar,
        triplets: &[(usize, usize, f64)],
        global_coeff: f64,
    ) -> Result<()> {
        self.check_ei(ei)?;
        for &(i, j, v) in triplets {
            let vi = row_vars.get(i).ok_or_else(|| {
                Error::index_out_of_range(format!("row position {i} outside the block"))
            })?;
            let vj = col_vars.get(j).ok_or_else(|| {
                Error::index_out_of_range(format!("column position {j} outside the block"))
            })?;
            self.equs[ei.idx()].quad.push(QuadTerm {
                vi,
                vj,
                coeff: global_coeff * v,
            });
        }
        Ok(())
    }

    /// Set the additive constant of the left-hand side
    pub fn equ_set_constant(&mut self, ei: EquIdx, c: f64) -> Result<()> {
        self.check_ei(ei)?;
        self.equs[ei.idx()].cst = c;
        Ok(())
    }

    /// Add to the additive constant of the left-hand side
    pub fn equ_add_constant(&mut self, ei: EquIdx, c: f64) -> Result<()> {
        self.check_ei(ei)?;
        self.equs[ei.idx()].cst += c;
        Ok(())
    }

    /// Set the right-hand side (stored as a negated left-hand constant)
    pub fn equ_set_rhs(&mut self, ei: EquIdx, c: f64) -> Result<()> {
        self.equ_set_constant(ei, -c)
    }

    /// Splice a nonlinear sub-expression, multiplied by `outer_coeff`
    pub fn equ_add_nonlinear_expression(
        &mut self,
        ei: EquIdx,
        expr: &NlExpr,
        outer_coeff: f64,
    ) -> Result<()> {
        self.check_ei(ei)?;
        let addend = expr.scaled_copy(outer_coeff);
        let equ = &mut self.equs[ei.idx()];
        equ.nl = Some(match equ.nl.take() {
            None => addend,
            Some(NlExpr::Sum(mut terms)) => {
                terms.push(addend);
                NlExpr::Sum(terms)
            }
            Some(prev) => NlExpr::Sum(vec![prev, addend]),
        });
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Copy-except and incidence
     * --------------------------------------------------------------------- */

    /// Duplicate an equation, omitting every contribution of `exclude`
    ///
    /// The result evaluates, on any point, to the source minus the excluded
    /// variable's contribution. A nonlinear part where the variable appears
    /// non-additively cannot be separated and yields `NotImplemented`.
    pub fn equ_copy_except(&mut self, ei_src: EquIdx, exclude: VarIdx) -> Result<EquIdx> {
        self.check_ei(ei_src)?;
        let src = self.equs[ei_src.idx()].clone();

        let nl = match &src.nl {
            None => None,
            Some(tree) => Some(tree.without_var(exclude).ok_or_else(|| {
                Error::not_implemented(format!(
                    "variable '{}' appears non-additively in the nonlinear part of '{}'",
                    self.var_name(exclude),
                    self.equ_name(ei_src)
                ))
            })?),
        };

        let src_name = self.equ_name(ei_src);
        let ei_dst = self.add_equation(src.kind, src.cone)?;
        let dst = &mut self.equs[ei_dst.idx()];
        dst.cst = src.cst;
        dst.lin = src.lin.iter().filter(|t| t.vi != exclude).copied().collect();
        dst.quad = src
            .quad
            .iter()
            .filter(|t| t.vi != exclude && t.vj != exclude)
            .copied()
            .collect();
        dst.nl = nl;
        self.equ_names[ei_dst.idx()] = Some(format!("{src_name}_cpy"));
        self.sync_lequ(ei_dst)?;
        Ok(ei_dst)
    }

    /// Rebuild the incidence index of an equation after a batch of edits
    pub fn sync_lequ(&mut self, ei: EquIdx) -> Result<()> {
        self.check_ei(ei)?;
        // drop the stale column entries
        for vi in std::mem::take(&mut self.equ_vars[ei.idx()]) {
            self.var_equs[vi.idx()].retain(|&e| e != ei);
        }
        let equ = &self.equs[ei.idx()];
        let mut vars: Vec<VarIdx> = Vec::new();
        for t in &equ.lin {
            vars.push(t.vi);
        }
        for t in &equ.quad {
            vars.push(t.vi);
            vars.push(t.vj);
        }
        if let Some(tree) = &equ.nl {
            tree.collect_vars(&mut vars);
        }
        vars.sort_unstable();
        vars.dedup();
        for &vi in &vars {
            self.var_equs[vi.idx()].push(ei);
        }
        self.equ_vars[ei.idx()] = vars;
        Ok(())
    }

    /// The variables an equation touches (requires a prior sync)
    pub fn equ_variables(&self, ei: EquIdx) -> Result<&[VarIdx]> {
        self.check_ei(ei)?;
        Ok(&self.equ_vars[ei.idx()])
    }

    /// The equations a variable appears in (requires a prior sync)
    pub fn var_equations(&self, vi: VarIdx) -> Result<&[EquIdx]> {
        self.check_vi(vi)?;
        Ok(&self.var_equs[vi.idx()])
    }

    /// The left-hand side of an equation as an expression tree
    ///
    /// Optionally omits every additive contribution of one variable (used
    /// when copying an objective equation without its objective variable).
    pub fn equ_as_nlexpr(&self, ei: EquIdx, exclude: Option<VarIdx>) -> Result<NlExpr> {
        self.check_ei(ei)?;
        let equ = &self.equs[ei.idx()];
        let mut terms = Vec::new();
        if equ.cst != 0.0 {
            terms.push(NlExpr::Const(equ.cst));
        }
        for t in &equ.lin {
            if Some(t.vi) == exclude {
                continue;
            }
            terms.push(NlExpr::Var(t.vi).scaled_copy(t.coeff));
        }
        for t in &equ.quad {
            if Some(t.vi) == exclude || Some(t.vj) == exclude {
                continue;
            }
            terms.push(NlExpr::Scaled(
                t.coeff,
                Box::new(NlExpr::Mul(vec![NlExpr::Var(t.vi), NlExpr::Var(t.vj)])),
            ));
        }
        if let Some(tree) = &equ.nl {
            let kept = match exclude {
                None => tree.clone(),
                Some(vi) => tree.without_var(vi).ok_or_else(|| {
                    Error::not_implemented(format!(
                        "variable '{}' appears non-additively in the nonlinear part of '{}'",
                        self.var_name(vi),
                        self.equ_name(ei)
                    ))
                })?,
            };
            terms.push(kept);
        }
        Ok(NlExpr::Sum(terms))
    }

    /// Structural evaluation of an equation's left-hand side
    pub fn eval_equ(&self, ei: EquIdx, point: &[f64]) -> Result<f64> {
        self.check_ei(ei)?;
        if point.len() < self.vars.len() {
            return Err(Error::dimension_mismatch(self.vars.len(), point.len()));
        }
        let equ = &self.equs[ei.idx()];
        let mut acc = equ.cst;
        for t in &equ.lin {
            acc += t.coeff * point[t.vi.idx()];
        }
        for t in &equ.quad {
            acc += t.coeff * point[t.vi.idx()] * point[t.vj.idx()];
        }
        if let Some(tree) = &equ.nl {
            acc += tree.eval(point);
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_var_equ() -> (Container, VarIdx, VarIdx, EquIdx) {
        let mut ctr = Container::new();
        let x = ctr.add_var(0.0, f64::INFINITY).unwrap();
        let y = ctr.add_var(f64::NEG_INFINITY, f64::INFINITY).unwrap();
        let ei = ctr.add_greaterthan().unwrap();
        ctr.equ_add_new_linear_var(ei, x, 2.0).unwrap();
        ctr.equ_add_new_linear_var(ei, y, -3.0).unwrap();
        ctr.sync_lequ(ei).unwrap();
        (ctr, x, y, ei)
    }

    #[test]
    fn test_indices_are_stable() {
        let (mut ctr, x, _, _) = two_var_equ();
        ctr.var_delete(x).unwrap();
        let z = ctr.add_var(0.0, 1.0).unwrap();
        assert_eq!(z.raw(), 2, "deleted slots are not reused");
        assert!(ctr.var_bounds(x).is_err());
    }

    #[test]
    fn test_additive_edits() {
        let (mut ctr, x, _, ei) = two_var_equ();
        ctr.equ_add_linear(ei, &Avar::list(vec![x]), &[1.0], 3.0)
            .unwrap();
        assert_relative_eq!(ctr.equ(ei).unwrap().lin_coeff(x), 5.0);
    }

    #[test]
    fn test_incidence_sync() {
        let (mut ctr, x, y, ei) = two_var_equ();
        assert_eq!(ctr.equ_variables(ei).unwrap(), &[x, y]);
        assert_eq!(ctr.var_equations(x).unwrap(), &[ei]);

        let z = ctr.add_var(0.0, 1.0).unwrap();
        ctr.equ_add_new_linear_var(ei, z, 1.0).unwrap();
        // stale until the batch is synced
        assert_eq!(ctr.equ_variables(ei).unwrap().len(), 2);
        ctr.sync_lequ(ei).unwrap();
        assert_eq!(ctr.equ_variables(ei).unwrap(), &[x, y, z]);
    }

    #[test]
    fn test_copy_except_preserves_residual() {
        let (mut ctr, x, y, ei) = two_var_equ();
        ctr.equ_set_constant(ei, 7.0).unwrap();
        ctr.equ_add_bilinear(ei, x, y, 4.0).unwrap();
        ctr.sync_lequ(ei).unwrap();

        let ei2 = ctr.equ_copy_except(ei, x).unwrap();
        let point = vec![2.0, 5.0];
        let full = ctr.eval_equ(ei, &point).unwrap();
        let residual = ctr.eval_equ(ei2, &point).unwrap();
        // x contributes 2*x + 4*x*y = 4 + 40
        assert_relative_eq!(full - residual, 44.0);
        assert_eq!(ctr.equ_variables(ei2).unwrap(), &[y]);
    }

    #[test]
    fn test_copy_except_nonadditive_nl() {
        let (mut ctr, x, y, ei) = two_var_equ();
        let tree = NlExpr::Mul(vec![NlExpr::Var(x), NlExpr::Var(y)]);
        ctr.equ_add_nonlinear_expression(ei, &tree, 1.0).unwrap();
        ctr.sync_lequ(ei).unwrap();
        assert!(matches!(
            ctr.equ_copy_except(ei, x),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_copy_except_additive_nl() {
        let (mut ctr, x, y, ei) = two_var_equ();
        let tree = NlExpr::Sum(vec![
            NlExpr::Mul(vec![NlExpr::Var(x), NlExpr::Var(x)]),
            NlExpr::Scaled(2.0, Box::new(NlExpr::Var(y))),
        ]);
        ctr.equ_add_nonlinear_expression(ei, &tree, 1.0).unwrap();
        ctr.sync_lequ(ei).unwrap();

        let ei2 = ctr.equ_copy_except(ei, x).unwrap();
        let point = vec![3.0, 1.0];
        let full = ctr.eval_equ(ei, &point).unwrap();
        let residual = ctr.eval_equ(ei2, &point).unwrap();
        // x contributes 2x + x^2 = 6 + 9
        assert_relative_eq!(full - residual, 15.0);
    }

    #[test]
    fn test_multiplier_cones() {
        let mut ctr = Container::new();
        // polar of R+ is R-
        let v = ctr.add_multiplier_polar(Cone::RPlus).unwrap().unwrap();
        assert_eq!(ctr.var_bounds(v).unwrap(), (f64::NEG_INFINITY, 0.0));
        // dual of R+ is R+
        let w = ctr.add_multiplier_dual(Cone::RPlus).unwrap().unwrap();
        assert_eq!(ctr.var_bounds(w).unwrap(), (0.0, f64::INFINITY));
        // polar of R is {0}: no multiplier
        assert!(ctr.add_multiplier_polar(Cone::R).unwrap().is_none());
        assert_eq!(ctr.var_meta(v).unwrap().role, VarRole::Dual);
    }

    #[test]
    fn test_name_scopes() {
        let mut ctr = Container::new();
        ctr.var_name_scope("risk_v");
        let a = ctr.add_var(0.0, 1.0).unwrap();
        let b = ctr.add_var(0.0, 1.0).unwrap();
        ctr.var_name_scope_end();
        let c = ctr.add_var(0.0, 1.0).unwrap();
        assert_eq!(ctr.var_name(a), "risk_v");
        assert_eq!(ctr.var_name(b), "risk_v_1");
        assert_eq!(ctr.var_name(c), "x2");
    }

    #[test]
    fn test_dot_product_tree() {
        let mut ctr = Container::new();
        let args = ctr.add_free_vars(2).unwrap();
        let y = ctr.add_positive_vars(2).unwrap();
        let b = crate::mat::Mat::eye(2, 1.0);
        let tree = NlExpr::dot_product(&y, &b, Some(&[1.0, -1.0]), None, &args).unwrap();
        // <y, (x0 + 1, x1 - 1)> at x = (2, 3), y = (1, 2)
        let point = vec![2.0, 3.0, 1.0, 2.0];
        assert_relative_eq!(tree.eval(&point), 1.0 * 3.0 + 2.0 * 2.0);
    }

    #[test]
    fn test_defined_objvar_marker() {
        let mut ppty = VarPpty::default();
        ppty.set(VarPpty::OBJ_MIN | VarPpty::EXPLICITLY_DEFINED);
        assert!(ppty.is_defined_objvar());
        let mut solvar = VarPpty::default();
        solvar.set(VarPpty::SOLUTION_VAR);
        assert!(!solvar.is_defined_objvar());
    }
}
