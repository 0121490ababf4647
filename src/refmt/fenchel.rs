//! Fenchel (primal-dual) reformulation of an OVF occurrence
//!
//! Instead of a second player, the dual problem is merged into the host:
//! multipliers price the polyhedral set and the finite bounds of `y`, a
//! quadratic block prices the curvature, and every occurrence of the OVF
//! variable is substituted by the dual objective value. Coordinate-wise,
//! `y` is shifted so that `y - ỹ` lies in a tractable cone; rows whose
//! polar is the whole space are skipped.

use std::sync::Arc;

use crate::avar::Avar;
use crate::cones::Cone;
use crate::container::{EquKind, VarPpty, VarRole};
use crate::error::{Error, Result};
use crate::idx::{EquIdx, MpId, VarIdx};
use crate::mat::Mat;
use crate::model::Model;
use crate::ovf::{OvfDef, OvfTemplate};
use crate::refmt::{
    add_half_quad, compat_types, equations_with_var, multiplier_cone, owning_mp_and_sense,
    replace_mp_equ, weighted_affine_row,
};
use crate::types::Sense;

/// Per-coordinate shift data of the primal variable `y`
#[derive(Debug, Clone)]
pub(crate) struct YData {
    /// Dimension of `y`
    pub n_y: usize,
    /// Shift making `y - ỹ` live in `cones_y`
    pub tilde_y: Vec<f64>,
    /// Finite upper bounds awaiting a multiplier (`NaN` when absent)
    pub var_ub: Vec<f64>,
    /// Cone of each shifted coordinate
    pub cones_y: Vec<Cone>,
    /// A nonzero shift exists
    pub has_shift: bool,
    /// Number of finite upper bounds
    pub n_y_ub: usize,
    /// `½⟨ỹ, M ỹ⟩`, set by the shift application
    pub quad_cst: f64,
}

/// Working data of one Fenchel rewrite
pub(crate) struct FenchelData {
    template: Arc<dyn OvfTemplate>,
    def: OvfDef,
    sense: Sense,
    n_args: usize,
    /// Nonbox set rows `A y - a ∈ K`
    a_mat: Mat,
    a_rhs: Vec<f64>,
    has_set: bool,
    /// Cholesky factors and the quadratic part itself
    d_mat: Mat,
    j_mat: Mat,
    m_mat: Mat,
    is_quad: bool,
    /// Affine transformation of the arguments
    b_mat: Mat,
    b_cst: Option<Vec<f64>>,
    ydat: YData,
    /// Multipliers of the kept set rows, with their priced values
    v: Vec<(usize, VarIdx)>,
    v_vals: Vec<f64>,
    /// Multipliers of the finite upper bounds, with their priced values
    w: Vec<(usize, VarIdx)>,
    w_vals: Vec<f64>,
    /// Quadratic block, same size as `y`
    s: Avar,
    /// `Mᵀ ỹ`, used as a constant in the inclusion rows
    m_shift: Vec<f64>,
    base: String,
}

/// Append `global · Σ coeffs[j] · args[j]`, skipping zero coefficients
fn add_args_linear(
    mdl: &mut Model,
    ei: EquIdx,
    args: &Avar,
    coeffs: &[f64],
    global: f64,
) -> Result<()> {
    let mut vars = Vec::new();
    let mut vals = Vec::new();
    for (j, &c) in coeffs.iter().enumerate() {
        if c == 0.0 {
            continue;
        }
        vars.push(args.get(j).ok_or_else(|| {
            Error::index_out_of_range(format!("argument {j} missing"))
        })?);
        vals.push(c);
    }
    if vars.is_empty() {
        return Ok(());
    }
    mdl.ctr.equ_add_linear(ei, &Avar::list(vars), &vals, global)
}

impl FenchelData {
    pub(crate) fn init(def: &OvfDef, template: &Arc<dyn OvfTemplate>) -> Result<FenchelData> {
        let params = &def.params;
        let n_args = def.n_args();
        let n_y = template.size_y(n_args, params)?;
        if n_y == 0 {
            return Err(Error::UnexpectedData(format!(
                "the number of variables associated with the CCF '{}' is 0. This should \
                 never happen. Check the OVF definition if it is a custom one, or file a bug",
                template.name()
            )));
        }

        let (a_mat, a_rhs) = template.set_nonbox(n_y, params)?;
        let has_set = !a_mat.is_empty();
        if has_set {
            let (nrows, ncols) = a_mat.size();
            if ncols != n_y {
                return Err(Error::dimension_mismatch(n_y, ncols));
            }
            if a_rhs.len() != nrows {
                return Err(Error::dimension_mismatch(nrows, a_rhs.len()));
            }
        }

        let (d_mat, j_mat) = template.quad_factors(n_y, params)?;
        let is_quad = !d_mat.is_empty();
        let m_mat = if is_quad {
            template.quad_m(n_y, params)?
        } else {
            Mat::Empty
        };

        let (b_mat, b_cst) = template.affine_transformation(n_args, params)?;
        if !b_mat.is_empty() {
            let (rows, cols) = b_mat.size();
            if rows != n_y {
                return Err(Error::Inconsistency(format!(
                    "incompatible size: B and Aᵀ should have the same number of rows, \
                     but there are {rows} rows in B and {n_y} in Aᵀ"
                )));
            }
            if cols != n_args {
                return Err(Error::Inconsistency(format!(
                    "incompatible size: the number of arguments ({n_args}) and the number \
                     of columns in B ({cols}) should be the same"
                )));
            }
        }

        let base = if def.var.is_valid() {
            format!("{}_ovf_{}", template.name(), def.idx)
        } else {
            format!("{}_ccf_{}", template.name(), def.idx)
        };

        Ok(FenchelData {
            template: Arc::clone(template),
            def: def.clone(),
            sense: template.sense(),
            n_args,
            a_mat,
            a_rhs,
            has_set,
            d_mat,
            j_mat,
            m_mat,
            is_quad,
            b_mat,
            b_cst,
            ydat: YData {
                n_y,
                tilde_y: vec![0.0; n_y],
                var_ub: vec![f64::NAN; n_y],
                cones_y: vec![Cone::R; n_y],
                has_shift: false,
                n_y_ub: 0,
                quad_cst: 0.0,
            },
            v: Vec::new(),
            v_vals: Vec::new(),
            w: Vec::new(),
            w_vals: Vec::new(),
            s: Avar::empty(),
            m_shift: Vec::new(),
            base,
        })
    }

    /// Step 1: derive the per-coordinate shift and cone of `y`
    pub(crate) fn find_yshift(&mut self) -> Result<()> {
        let params = &self.def.params;
        let n_y = self.ydat.n_y;
        for i in 0..n_y {
            let lb = self.template.var_lb(i, n_y, params)?;
            let ub = self.template.var_ub(i, n_y, params)?;
            let lb_fin = lb.is_finite();
            let ub_fin = ub.is_finite();

            if lb_fin && ub_fin {
                if ub < lb {
                    return Err(Error::invalid_value(format!(
                        "the bounds on the {i}-th variable are not consistent: \
                         lb = {lb:e} > {ub:e} = ub"
                    )));
                }
                if (ub - lb).abs() < f64::EPSILON {
                    // equality: the coordinate is pinned
                    if lb.abs() >= f64::EPSILON {
                        self.ydat.tilde_y[i] = lb;
                        self.ydat.has_shift = true;
                    }
                    self.has_set = true;
                    self.ydat.cones_y[i] = Cone::Zero;
                    continue;
                }
            }

            if lb_fin {
                self.has_set = true;
                self.ydat.cones_y[i] = Cone::RPlus;
                if lb.abs() >= f64::EPSILON {
                    self.ydat.tilde_y[i] = lb;
                    self.ydat.has_shift = true;
                }
                if ub_fin {
                    self.ydat.var_ub[i] = ub;
                    self.ydat.n_y_ub += 1;
                }
            } else if ub_fin {
                self.has_set = true;
                self.ydat.cones_y[i] = Cone::RMinus;
                if ub.abs() >= f64::EPSILON {
                    self.ydat.tilde_y[i] = ub;
                    self.ydat.has_shift = true;
                }
            } else {
                self.ydat.cones_y[i] = Cone::R;
            }
        }
        Ok(())
    }

    /// Step 2: allocate the multiplier blocks `v`, `w`, `s`
    pub(crate) fn gen_vars(&mut self, mdl: &mut Model, mp: Option<MpId>) -> Result<()> {
        let (nrows, _) = self.a_mat.size();
        let candidates = nrows
            + self.ydat.n_y_ub
            + if self.is_quad { self.ydat.n_y } else { 0 };
        if candidates == 0 {
            return Err(Error::ModelUnbounded(format!(
                "the CCF '{}' has no constraints and no quadratic part. It is then unbounded",
                self.template.name()
            )));
        }

        let params = self.def.params.clone();
        let n_y = self.ydat.n_y;

        // multipliers for the nonbox rows; rows whose multiplier cone is
        // {0} carry no variable and are dropped
        if nrows > 0 {
            mdl.ctr.var_name_scope(format!("{}_v", self.base));
            for i in 0..nrows {
                let cone = self.template.cone_nonbox(i, n_y, &params)?;
                let mult = match self.sense {
                    Sense::Max => mdl.ctr.add_multiplier_polar(cone)?,
                    _ => mdl.ctr.add_multiplier_dual(cone)?,
                };
                if let Some(vi) = mult {
                    self.v.push((i, vi));
                    self.v_vals.push(self.a_rhs[i]);
                    if let Some(mp_id) = mp {
                        mdl.empdag.mp_mut(mp_id)?.add_var(vi, &mut mdl.ctr)?;
                    }
                }
            }
            mdl.ctr.var_name_scope_end();
        }

        // multipliers for the finite upper bounds
        if self.ydat.n_y_ub > 0 {
            mdl.ctr.var_name_scope(format!("{}_w", self.base));
            for i in 0..n_y {
                let ub = self.ydat.var_ub[i];
                if !ub.is_finite() {
                    continue;
                }
                let mult = match self.sense {
                    Sense::Max => mdl.ctr.add_multiplier_polar(Cone::RMinus)?,
                    _ => mdl.ctr.add_multiplier_dual(Cone::RMinus)?,
                };
                let vi = mult.ok_or_else(|| {
                    Error::runtime("upper-bound multiplier cannot vanish".to_string())
                })?;
                self.w.push((i, vi));
                self.w_vals.push(ub);
                if let Some(mp_id) = mp {
                    mdl.empdag.mp_mut(mp_id)?.add_var(vi, &mut mdl.ctr)?;
                }
            }
            mdl.ctr.var_name_scope_end();
        }

        // the quadratic block
        if self.is_quad {
            mdl.ctr.var_name_scope(format!("{}_s", self.base));
            self.s = mdl.ctr.add_free_vars(n_y)?;
            mdl.ctr.var_name_scope_end();
            if let Some(mp_id) = mp {
                let s = self.s.clone();
                mdl.empdag.mp_mut(mp_id)?.add_vars(&s, &mut mdl.ctr)?;
            }
        }

        Ok(())
    }

    /// Step 3: fold the shift into the priced values and the constant
    pub(crate) fn apply_yshift(&mut self) -> Result<()> {
        if !self.ydat.has_shift {
            if self.is_quad {
                self.m_shift = vec![0.0; self.ydat.n_y];
            }
            return Ok(());
        }

        // a -= A ỹ on the kept rows
        if self.has_set && !self.a_mat.is_empty() {
            let (nrows, _) = self.a_mat.size();
            let mut tmp = vec![0.0; nrows];
            self.a_mat.axpy(&self.ydat.tilde_y, &mut tmp)?;
            for (k, &(row, _)) in self.v.iter().enumerate() {
                self.v_vals[k] -= tmp[row];
            }
        }

        // the bound shift is direct: ub - ỹ
        for (k, &(coord, _)) in self.w.iter().enumerate() {
            self.w_vals[k] -= self.ydat.tilde_y[coord];
        }

        if self.is_quad {
            let quad_cst = 0.5 * self.m_mat.eval_quad(&self.ydat.tilde_y)?;
            if !quad_cst.is_finite() {
                return Err(Error::MathError(format!(
                    "the quadratic constant from the shift is not finite: val = {quad_cst}"
                )));
            }
            self.ydat.quad_cst = quad_cst;
            let mut m_shift = vec![0.0; self.ydat.n_y];
            self.m_mat.atxpy(&self.ydat.tilde_y, &mut m_shift)?;
            self.m_shift = m_shift;
        }
        Ok(())
    }

    /// Append the dual objective value, scaled by `global`, to an equation
    ///
    /// `⟨a, v⟩ + ⟨ub, w⟩ + ½⟨s, Js⟩` plus, under a shift,
    /// `⟨G(F(x)), ỹ⟩ - ½⟨ỹ, Mỹ⟩`.
    pub(crate) fn add_dual_value(&self, mdl: &mut Model, ei: EquIdx, global: f64) -> Result<()> {
        if self.ydat.has_shift && self.n_args > 0 {
            let (arg_coeffs, cst) = weighted_affine_row(
                &self.ydat.tilde_y,
                &self.b_mat,
                self.b_cst.as_deref(),
                self.def.coeffs.as_deref(),
                self.n_args,
            );
            add_args_linear(mdl, ei, &self.def.args, &arg_coeffs, global)?;
            if cst != 0.0 {
                mdl.ctr.equ_add_constant(ei, global * cst)?;
            }
        }

        if !self.v.is_empty() {
            let vars: Vec<VarIdx> = self.v.iter().map(|&(_, vi)| vi).collect();
            mdl.ctr
                .equ_add_linear(ei, &Avar::list(vars), &self.v_vals, global)?;
        }
        if !self.w.is_empty() {
            let vars: Vec<VarIdx> = self.w.iter().map(|&(_, vi)| vi).collect();
            mdl.ctr
                .equ_add_linear(ei, &Avar::list(vars), &self.w_vals, global)?;
        }
        if self.is_quad {
            add_half_quad(&mut mdl.ctr, ei, &self.s, &self.j_mat, global)?;
            if self.ydat.has_shift {
                mdl.ctr.equ_add_constant(ei, -global * self.ydat.quad_cst)?;
            }
        }
        Ok(())
    }

    /// Step 4: the equation defining the OVF variable from the dual value
    pub(crate) fn gen_objfn(&self, mdl: &mut Model, rho: Option<VarIdx>) -> Result<EquIdx> {
        mdl.ctr.equ_name_scope(format!("{}_objfn", self.base));
        let ei = mdl.ctr.add_equation(EquKind::DefinedMapping, Cone::Zero)?;
        mdl.ctr.equ_name_scope_end();
        self.add_dual_value(mdl, ei, 1.0)?;
        if let Some(rho) = rho {
            mdl.ctr.equ_add_new_linear_var(ei, rho, -1.0)?;
            let meta = mdl.ctr.var_meta_mut(rho)?;
            meta.role = VarRole::DefiningMap;
            meta.ppty.set(VarPpty::EXPLICITLY_DEFINED);
        }
        mdl.ctr.sync_lequ(ei)?;
        Ok(ei)
    }

    /// Step 5: the inclusion rows
    /// `G(F(x))ᵢ - (Aᵀv)ᵢ - (Ds)ᵢ - (Mᵀỹ)ᵢ ∈ (K_yᵢ)°`
    pub(crate) fn gen_equs(&self, mdl: &mut Model, mp: Option<MpId>) -> Result<Vec<EquIdx>> {
        let n_y = self.ydat.n_y;
        let mut out = Vec::new();
        mdl.ctr.equ_name_scope(format!("{}_set", self.base));
        for i in 0..n_y {
            let cone = multiplier_cone(self.sense, self.ydat.cones_y[i]);
            // an equality coordinate has the whole space as polar: no row
            if cone == Cone::R {
                continue;
            }
            let ei = mdl.ctr.add_equation(EquKind::ConeInclusion, cone)?;

            // G(F(x))_i
            let mut unit = vec![0.0; n_y];
            unit[i] = 1.0;
            let (arg_coeffs, cst) = weighted_affine_row(
                &unit,
                &self.b_mat,
                self.b_cst.as_deref(),
                self.def.coeffs.as_deref(),
                self.n_args,
            );
            add_args_linear(mdl, ei, &self.def.args, &arg_coeffs, 1.0)?;
            if cst != 0.0 {
                mdl.ctr.equ_add_constant(ei, cst)?;
            }

            // -(Aᵀ v)_i
            if self.has_set && !self.a_mat.is_empty() {
                for (row, val) in self.a_mat.col(i) {
                    if let Some(&(_, vi)) = self.v.iter().find(|&&(r, _)| r == row) {
                        mdl.ctr.equ_add_new_linear_var(ei, vi, -val)?;
                    }
                }
            }

            // -(D s)_i
            if self.is_quad {
                for (j, val) in self.d_mat.row(i) {
                    let si = self.s.get(j).ok_or_else(|| {
                        Error::index_out_of_range(format!("s[{j}] missing"))
                    })?;
                    mdl.ctr.equ_add_new_linear_var(ei, si, -val)?;
                }
                // -(Mᵀ ỹ)_i
                if self.ydat.has_shift && self.m_shift[i] != 0.0 {
                    mdl.ctr.equ_add_constant(ei, -self.m_shift[i])?;
                }
            }

            // the upper-bound multiplier enters as -w_i
            if let Some(&(_, wi)) = self.w.iter().find(|&&(coord, _)| coord == i) {
                mdl.ctr.equ_add_new_linear_var(ei, wi, -1.0)?;
            }

            mdl.ctr.sync_lequ(ei)?;
            if let Some(mp_id) = mp {
                mdl.empdag.mp_mut(mp_id)?.add_constraint(ei, &mut mdl.ctr)?;
            }
            out.push(ei);
        }
        mdl.ctr.equ_name_scope_end();
        Ok(out)
    }
}

/// Apply the Fenchel reformulation to the OVF occurrence `ovf_idx`
pub fn ovf_fenchel(mdl: &mut Model, ovf_idx: usize) -> Result<()> {
    let def = mdl.ovf(ovf_idx)?.clone();
    let template = mdl.registry.get(&def.template)?.clone();

    let rho = def.var;
    if !rho.is_valid() {
        return Err(Error::not_implemented(
            "Fenchel reformulation of CCFLIB programs with EMPDAG children".to_string(),
        ));
    }
    let rho_name = mdl.ctr.var_name(rho);
    let ppty = template.ppty(&def.params)?;

    let (mp_owner, sense) = owning_mp_and_sense(mdl, rho)?;
    compat_types(template.name(), &rho_name, sense, ppty.sense)?;

    if let Some(mp_id) = mp_owner {
        mdl.empdag.mp_mut(mp_id)?.unseal();
    }

    let mut fdat = FenchelData::init(&def, &template)?;
    fdat.find_yshift()?;
    fdat.gen_vars(mdl, mp_owner)?;
    fdat.apply_yshift()?;

    /* ----------------------------------------------------------------------
     * Substitute every occurrence of ρ by the dual objective value
     * ---------------------------------------------------------------------- */

    let occurrences = equations_with_var(&mdl.ctr, rho)?;
    if occurrences.is_empty() {
        return Err(Error::invalid_argument(format!(
            "the OVF variable '{rho_name}' does not appear in any equation"
        )));
    }
    for (ei, coeff) in occurrences {
        let host = mdl.ctr.equ_meta(ei)?.mp;
        let host = host.is_regular().then_some(host);
        let ei_new = mdl.ctr.equ_copy_except(ei, rho)?;
        fdat.add_dual_value(mdl, ei_new, coeff)?;
        mdl.ctr.sync_lequ(ei_new)?;
        replace_mp_equ(mdl, host.or(mp_owner), ei, ei_new)?;
    }

    /* ----------------------------------------------------------------------
     * The evaluation equation for ρ and the inclusion rows
     * ---------------------------------------------------------------------- */

    fdat.gen_objfn(mdl, Some(rho))?;
    fdat.gen_equs(mdl, mp_owner)?;

    if let Some(mp_id) = mp_owner {
        mdl.empdag.mp_mut(mp_id)?.finalize(&mdl.ctr)?;
    }

    mdl.ovf_mut(ovf_idx)?.instantiated = true;
    tracing::debug!(target: "reshop::refmt", ovf = ovf_idx, template = template.name(),
                    "fenchel reformulation done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refmt::reformulate_ovf;
    use crate::types::Backend;
    use approx::assert_relative_eq;

    /// `min z` with `z = ρ`, `ρ = cvarup_t(u₁..u₃)`
    fn cvar_model(n: usize, tail: f64) -> (Model, VarIdx, VarIdx, EquIdx, usize) {
        let mut mdl = Model::new(Backend::Rhp);
        mdl.sense = Sense::Min;
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let args = mdl.ctr.add_free_vars(n).unwrap();
        let rho = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e0 = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, rho, 1.0).unwrap();
        mdl.ctr.sync_lequ(e0).unwrap();
        mdl.objvar = z;
        mdl.objequ = e0;
        let ovf = mdl.ovf_add("cvarup", rho, args).unwrap();
        mdl.ovf_param_add_scalar(ovf, "tail", tail).unwrap();
        (mdl, z, rho, e0, ovf)
    }

    #[test]
    fn test_fenchel_cvar_blocks() {
        let (mut mdl, z, rho, e0, ovf) = cvar_model(3, 0.2);
        let n_vars_before = mdl.ctr.n_vars();
        ovf_fenchel(&mut mdl, ovf).unwrap();

        // one free v (simplex row, polar of {0} is R) and three w ≥ 0
        assert_eq!(mdl.ctr.n_vars(), n_vars_before + 4);
        let v = VarIdx::from(n_vars_before);
        assert_eq!(
            mdl.ctr.var_bounds(v).unwrap(),
            (f64::NEG_INFINITY, f64::INFINITY)
        );
        for k in 1..4 {
            let w = VarIdx::from(n_vars_before + k);
            assert_eq!(mdl.ctr.var_bounds(w).unwrap(), (0.0, f64::INFINITY));
        }

        // the host equation was rewritten: ρ out, ⟨a,v⟩ + ⟨ub,w⟩ in
        assert!(mdl.ctr.equ(e0).is_err());
        let e_new = mdl.objequ;
        assert_ne!(e_new, e0);
        let equ = mdl.ctr.equ(e_new).unwrap();
        assert_relative_eq!(equ.lin_coeff(z), -1.0);
        assert_relative_eq!(equ.lin_coeff(rho), 0.0);
        assert_relative_eq!(equ.lin_coeff(v), 1.0);
        // ub = p/t = (1/3)/0.2
        let w0 = VarIdx::from(n_vars_before + 1);
        assert_relative_eq!(equ.lin_coeff(w0), 1.0 / 3.0 / 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_fenchel_cvar_inclusion_rows() {
        let (mut mdl, _z, _rho, _e0, ovf) = cvar_model(3, 0.2);
        let n_equs_before = mdl.ctr.n_equs();
        ovf_fenchel(&mut mdl, ovf).unwrap();

        // one rewritten host + one objfn + three inclusion rows
        assert_eq!(mdl.ctr.n_equs(), n_equs_before + 5);
        // y_i ≥ 0 coordinates: the polar of R₊ is R₋
        let row = EquIdx::from(n_equs_before + 2);
        let equ = mdl.ctr.equ(row).unwrap();
        assert_eq!(equ.cone, Cone::RMinus);
        // u_i - v - w_i: three linear terms
        assert_eq!(equ.lin.len(), 3);
    }

    #[test]
    fn test_fenchel_l2_quadratic_block() {
        let mut mdl = Model::new(Backend::Rhp);
        mdl.sense = Sense::Min;
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let args = mdl.ctr.add_free_vars(2).unwrap();
        let rho = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e0 = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, rho, 1.0).unwrap();
        mdl.ctr.sync_lequ(e0).unwrap();
        mdl.objvar = z;
        mdl.objequ = e0;
        let ovf = mdl.ovf_add("l2", rho, args.clone()).unwrap();

        let n_vars_before = mdl.ctr.n_vars();
        ovf_fenchel(&mut mdl, ovf).unwrap();

        // only the s block is allocated (no set, no finite bounds)
        assert_eq!(mdl.ctr.n_vars(), n_vars_before + 2);

        // free y coordinates yield equality rows s_i = u_i
        let e_new = mdl.objequ;
        let equ = mdl.ctr.equ(e_new).unwrap();
        assert_eq!(equ.quad.len(), 2, "½⟨s, Js⟩ spliced into the host");
        assert_relative_eq!(equ.quad[0].coeff, 0.5);

        // the two inclusion rows are equalities pairing s with the args
        let rows: Vec<EquIdx> = (0..mdl.ctr.n_equs())
            .map(EquIdx::from)
            .filter(|&ei| {
                ei != e_new
                    && mdl
                        .ctr
                        .equ(ei)
                        .map(|e| e.kind == EquKind::ConeInclusion && e.cone == Cone::Zero)
                        .unwrap_or(false)
            })
            .collect();
        assert_eq!(rows.len(), 2);
        let s0 = VarIdx::from(n_vars_before);
        let r0 = mdl.ctr.equ(rows[0]).unwrap();
        assert_relative_eq!(r0.lin_coeff(args.get(0).unwrap()), 1.0);
        assert_relative_eq!(r0.lin_coeff(s0), -1.0);
    }

    #[test]
    fn test_fenchel_unbounded_ccf() {
        // a template with no set, no bounds, and no quadratic part cannot
        // be priced; fabricate one by stripping l1 of its bounds
        struct Degenerate;
        impl OvfTemplate for Degenerate {
            fn name(&self) -> &'static str {
                "degenerate"
            }
            fn sense(&self) -> Sense {
                Sense::Max
            }
            fn var_lb(&self, _: usize, _: usize, _: &crate::ovf::OvfParams) -> Result<f64> {
                Ok(f64::NEG_INFINITY)
            }
            fn var_ub(&self, _: usize, _: usize, _: &crate::ovf::OvfParams) -> Result<f64> {
                Ok(f64::INFINITY)
            }
            fn add_k(
                &self,
                _: &mut crate::container::Container,
                _: EquIdx,
                _: &Avar,
                _: &crate::ovf::OvfParams,
            ) -> Result<()> {
                Ok(())
            }
        }

        let mut mdl = Model::new(Backend::Rhp);
        mdl.registry.register(std::sync::Arc::new(Degenerate));
        mdl.sense = Sense::Min;
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let args = mdl.ctr.add_free_vars(1).unwrap();
        let rho = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e0 = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, rho, 1.0).unwrap();
        mdl.ctr.sync_lequ(e0).unwrap();
        mdl.objvar = z;
        mdl.objequ = e0;
        let ovf = mdl.ovf_add("degenerate", rho, args).unwrap();

        assert!(matches!(
            ovf_fenchel(&mut mdl, ovf),
            Err(Error::ModelUnbounded(_))
        ));
    }

    #[test]
    fn test_fenchel_is_idempotent() {
        let (mut mdl, _z, _rho, _e0, ovf) = cvar_model(3, 0.2);
        reformulate_ovf(&mut mdl, ovf, crate::ovf::Reformulation::Fenchel).unwrap();
        let n_vars = mdl.ctr.n_vars();
        let n_equs = mdl.ctr.n_equs();
        reformulate_ovf(&mut mdl, ovf, crate::ovf::Reformulation::Fenchel).unwrap();
        assert_eq!(mdl.ctr.n_vars(), n_vars);
        assert_eq!(mdl.ctr.n_equs(), n_equs);
    }

    #[test]
    fn test_fenchel_l1_shift() {
        // l1 bounds are [-1, 1]: the shift moves lb to the origin
        let mut mdl = Model::new(Backend::Rhp);
        mdl.sense = Sense::Min;
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let args = mdl.ctr.add_free_vars(2).unwrap();
        let rho = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e0 = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, rho, 1.0).unwrap();
        mdl.ctr.sync_lequ(e0).unwrap();
        mdl.objvar = z;
        mdl.objequ = e0;
        let ovf = mdl.ovf_add("l1", rho, args.clone()).unwrap();

        let n_vars_before = mdl.ctr.n_vars();
        ovf_fenchel(&mut mdl, ovf).unwrap();

        // two w multipliers (shifted upper bounds), no v, no s
        assert_eq!(mdl.ctr.n_vars(), n_vars_before + 2);
        let e_new = mdl.objequ;
        let equ = mdl.ctr.equ(e_new).unwrap();
        // shift term ⟨G(F(x)), ỹ⟩ with ỹ = -1: each arg gets coefficient -1
        assert_relative_eq!(equ.lin_coeff(args.get(0).unwrap()), -1.0);
        // shifted bound value: ub - ỹ = 1 - (-1) = 2
        let w0 = VarIdx::from(n_vars_before);
        assert_relative_eq!(equ.lin_coeff(w0), 2.0);
    }
}
