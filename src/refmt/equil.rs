//! Equilibrium reformulation of an OVF occurrence
//!
//! The OVF variable `ρ = f(F(x))` is replaced by a second player: a peer
//! MP maximizing (or minimizing, for inf-CCFs) `⟨y, G(F(x))⟩ - k(y)` over
//! the set of `y`, attached next to the original program under a Nash
//! node. Every occurrence of `ρ` is substituted by the inner product,
//! scaled by the occurrence coefficient.

use crate::avar::Avar;
use crate::cones::Cone;
use crate::container::{EquKind, NlExpr};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::refmt::{
    add_poly_cons, compat_types, ensure_model_empdag, ensure_nash_parent, equations_with_var,
    owning_mp_and_sense, replace_mp_equ,
};
use crate::types::ModelType;

/// Apply the equilibrium reformulation to the OVF occurrence `ovf_idx`
pub fn ovf_equil(mdl: &mut Model, ovf_idx: usize) -> Result<()> {
    let def = mdl.ovf(ovf_idx)?.clone();
    let template = mdl.registry.get(&def.template)?.clone();
    let params = &def.params;

    let rho = def.var;
    if !rho.is_valid() {
        return Err(Error::invalid_argument(format!(
            "OVF definition {ovf_idx} has no OVF variable; CCFLIB programs are \
             reformulated through the saddle-path pass"
        )));
    }
    let rho_name = mdl.ctr.var_name(rho);
    let n_args = def.n_args();
    let ppty = template.ppty(params)?;

    /* ----------------------------------------------------------------------
     * Compatibility between the OVF and its host problem; this has to run
     * before the graph is touched
     * ---------------------------------------------------------------------- */

    let (mp_owner, sense) = owning_mp_and_sense(mdl, rho)?;
    compat_types(template.name(), &rho_name, sense, ppty.sense)?;

    let mp_main = match mp_owner {
        Some(id) => id,
        None => ensure_model_empdag(mdl)?,
    };
    let nash = ensure_nash_parent(&mut mdl.empdag, mp_main, &format!("{rho_name}_equil"))?;

    /* ----------------------------------------------------------------------
     * Build ⟨y, G(F(x))⟩ in a fresh objective equation
     * ---------------------------------------------------------------------- */

    let (bmat, bcst) = template.affine_transformation(n_args, params)?;
    let n_y = template.size_y(n_args, params)?;
    if !bmat.is_empty() {
        let (rows, cols) = bmat.size();
        if cols != n_args {
            return Err(Error::Inconsistency(format!(
                "incompatible size: the number of arguments ({n_args}) and the number of \
                 columns in B ({cols}) should be the same"
            )));
        }
        if rows != n_y {
            return Err(Error::dimension_mismatch(n_y, rows));
        }
    }

    let y = template.create_uvar(&mut mdl.ctr, &format!("{rho_name}_u"), n_y, params)?;

    mdl.ctr.equ_name_scope(format!("{rho_name}_objequ"));
    let objequ = mdl.ctr.add_equation(EquKind::Mapping, Cone::R)?;
    mdl.ctr.equ_name_scope_end();

    let dot = NlExpr::dot_product(
        &y,
        &bmat,
        bcst.as_deref(),
        def.coeffs.as_deref(),
        &def.args,
    )?;
    mdl.ctr.equ_add_nonlinear_expression(objequ, &dot, 1.0)?;

    /* ----------------------------------------------------------------------
     * Substitute ρ: copy each host equation without ρ, splice the inner
     * product scaled by the occurrence coefficient
     * ---------------------------------------------------------------------- */

    let occurrences = equations_with_var(&mdl.ctr, rho)?;
    if occurrences.is_empty() {
        return Err(Error::invalid_argument(format!(
            "the OVF variable '{rho_name}' does not appear in any equation"
        )));
    }
    if occurrences.len() > 1 {
        return Err(Error::not_implemented(format!(
            "OVF variable '{rho_name}' appears in more than one equation. Sharing an \
             OVF variable is not yet supported"
        )));
    }

    for (ei, coeff) in occurrences {
        let host = mdl.ctr.equ_meta(ei)?.mp;
        let host = host.is_regular().then_some(host);
        let ei_new = mdl.ctr.equ_copy_except(ei, rho)?;
        mdl.ctr.equ_add_nonlinear_expression(ei_new, &dot, coeff)?;
        mdl.ctr.sync_lequ(ei_new)?;
        replace_mp_equ(mdl, host.or(Some(mp_main)), ei, ei_new)?;
    }

    /* ----------------------------------------------------------------------
     * The dual player: max (or min) ⟨y, G(F(x))⟩ - k(y) - ρ over the set
     * of y, with ρ as its defined objective variable
     * ---------------------------------------------------------------------- */

    let mp_dual = mdl
        .empdag
        .new_mp(ppty.sense, Some(format!("{rho_name}_dual")))?;
    mdl.empdag.mp_mut(mp_dual)?.set_opt();

    template.add_k(&mut mdl.ctr, objequ, &y, params)?;
    mdl.ctr.equ_add_new_linear_var(objequ, rho, -1.0)?;
    mdl.ctr.sync_lequ(objequ)?;

    let probtype = if mdl.ctr.equ(objequ)?.is_nonlinear() {
        ModelType::Nlp
    } else {
        ModelType::Lp
    };
    mdl.empdag.mp_mut(mp_dual)?.probtype = Some(probtype);

    // ρ migrates from its previous owner to the dual player
    let prev_owner = mdl.ctr.var_meta(rho)?.mp;
    if prev_owner.is_regular() && mdl.empdag.mp(prev_owner)?.vars.contains(rho) {
        mdl.empdag.mp_mut(prev_owner)?.remove_var(rho, &mut mdl.ctr)?;
    }
    {
        let mp = mdl.empdag.mp_mut(mp_dual)?;
        mp.set_objvar(rho, &mut mdl.ctr)?;
        mp.set_objequ(objequ, &mut mdl.ctr)?;
        mp.set_objvar_defined(&mut mdl.ctr)?;
        mp.add_vars(&y, &mut mdl.ctr)?;
    }

    let (a, s) = template.set_nonbox(n_y, params)?;
    if !a.is_empty() {
        add_poly_cons(
            &mut mdl.ctr,
            &template,
            params,
            &y,
            &a,
            &s,
            &mut mdl.empdag,
            mp_dual,
            "ovf",
        )?;
    }

    mdl.empdag.mp_mut(mp_dual)?.finalize(&mdl.ctr)?;
    mdl.empdag.nash_add_mp(nash, mp_dual)?;
    mdl.mdltype = ModelType::Emp;
    mdl.ovf_mut(ovf_idx)?.instantiated = true;

    tracing::debug!(target: "reshop::refmt", ovf = ovf_idx, dual = %mp_dual, %nash,
                    "equilibrium reformulation done");
    Ok(())
}

/// Shared with the saddle-path pass: instantiate a CCFLIB program into an
/// optimization MP holding `y`, the `-k(y)` objective and the set rows
pub(crate) fn instantiate_ccflib_mp(
    mdl: &mut Model,
    mp_id: crate::idx::MpId,
    ovf_idx: usize,
) -> Result<(Avar, crate::idx::EquIdx)> {
    let def = mdl.ovf(ovf_idx)?.clone();
    let template = mdl.registry.get(&def.template)?.clone();
    let params = &def.params;

    let n_children = mdl.empdag.mps.varcs[mp_id.idx()].len();
    let n_args = if n_children > 0 { n_children } else { def.n_args() };
    let n_y = template.size_y(n_args, params)?;

    // the CCFLIB node becomes a plain optimization MP of the CCF's sense
    {
        let mp = mdl.empdag.mp_mut(mp_id)?;
        mp.unseal();
        mp.sense = template.sense();
        mp.set_opt();
    }

    let y = template.create_uvar(&mut mdl.ctr, &format!("ccflib_y_{mp_id}"), n_y, params)?;

    mdl.ctr.equ_name_scope(format!("ccfObj({mp_id})"));
    let objequ = mdl.ctr.add_equation(EquKind::Mapping, Cone::R)?;
    mdl.ctr.equ_name_scope_end();

    // the objequ must hold only the -k(y) term at this point
    template.add_k(&mut mdl.ctr, objequ, &y, params)?;
    mdl.ctr.sync_lequ(objequ)?;

    let probtype = if mdl.ctr.equ(objequ)?.is_nonlinear() || !mdl.ctr.equ(objequ)?.quad.is_empty()
    {
        ModelType::Nlp
    } else {
        ModelType::Lp
    };

    {
        let mp = mdl.empdag.mp_mut(mp_id)?;
        mp.probtype = Some(probtype);
        mp.set_objequ(objequ, &mut mdl.ctr)?;
        mp.add_vars(&y, &mut mdl.ctr)?;
    }

    let (a, s) = template.set_nonbox(n_y, params)?;
    if !a.is_empty() {
        add_poly_cons(
            &mut mdl.ctr,
            &template,
            params,
            &y,
            &a,
            &s,
            &mut mdl.empdag,
            mp_id,
            "ccflib",
        )?;
    }

    Ok((y, objequ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EquRole;
    use crate::idx::{EquIdx, VarIdx};
    use crate::refmt::reformulate_ovf;
    use crate::types::{Backend, Sense};

    /// `min z` with `z = ρ + x`, `ρ = l1(x)`, `x` free
    fn l1_model() -> (Model, VarIdx, VarIdx, VarIdx, EquIdx, usize) {
        let mut mdl = Model::new(Backend::Rhp);
        mdl.sense = Sense::Min;
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let x = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let rho = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e0 = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, x, 1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, rho, 1.0).unwrap();
        mdl.ctr.sync_lequ(e0).unwrap();
        mdl.objvar = z;
        mdl.objequ = e0;
        let ovf = mdl
            .ovf_add("l1", rho, Avar::list(vec![x]))
            .unwrap();
        (mdl, z, x, rho, e0, ovf)
    }

    #[test]
    fn test_equil_builds_nash_pair() {
        let (mut mdl, _z, _x, rho, e0, ovf) = l1_model();
        ovf_equil(&mut mdl, ovf).unwrap();

        // a Nash root with the original program and the dual player
        let nash = mdl.empdag.uid_root.as_nash().expect("nash root");
        assert_eq!(mdl.empdag.nashs.arcs[nash.idx()].len(), 2);
        mdl.empdag.check_consistency().unwrap();
        assert_eq!(mdl.mdltype, ModelType::Emp);

        // the original equation was replaced by a ρ-free copy
        assert!(mdl.ctr.equ(e0).is_err(), "host equation deleted");

        // the dual player owns ρ as its defined objective variable
        let dual = mdl.empdag.nashs.arcs[nash.idx()][1].as_mp().unwrap();
        let dual_mp = mdl.empdag.mp(dual).unwrap();
        assert_eq!(dual_mp.objvar(), rho);
        assert!(dual_mp.is_finalized());
        assert_eq!(dual_mp.sense, Sense::Max);
        // y block of size 1 plus ρ
        assert_eq!(dual_mp.num_vars(), 2);

        // the dual objective holds the inner product and -ρ
        let objequ = dual_mp.objequ();
        let equ = mdl.ctr.equ(objequ).unwrap();
        assert!(equ.is_nonlinear());
        assert_eq!(equ.lin_coeff(rho), -1.0);
    }

    #[test]
    fn test_equil_substitutes_occurrence() {
        let (mut mdl, z, x, rho, _e0, ovf) = l1_model();
        ovf_equil(&mut mdl, ovf).unwrap();

        // find the replacement equation: it still defines z
        let nash = mdl.empdag.uid_root.as_nash().unwrap();
        let main = mdl.empdag.nashs.arcs[nash.idx()][0].as_mp().unwrap();
        let main_mp = mdl.empdag.mp(main).unwrap();
        let e_new = main_mp.objequ();
        assert!(e_new.is_valid());
        let equ = mdl.ctr.equ(e_new).unwrap();
        assert_eq!(equ.lin_coeff(rho), 0.0, "rho substituted away");
        assert_eq!(equ.lin_coeff(z), -1.0);
        assert_eq!(equ.lin_coeff(x), 1.0);
        assert!(equ.is_nonlinear(), "inner product spliced in");
        assert_eq!(mdl.ctr.equ_meta(e_new).unwrap().role, EquRole::Objective);
    }

    #[test]
    fn test_equil_is_idempotent() {
        let (mut mdl, ..) = l1_model();
        let ovf = 0;
        reformulate_ovf(&mut mdl, ovf, crate::ovf::Reformulation::Equilibrium).unwrap();
        let n_vars = mdl.ctr.n_vars();
        let n_equs = mdl.ctr.n_equs();
        let n_mps = mdl.empdag.num_mps();
        let n_nashs = mdl.empdag.num_nashs();

        reformulate_ovf(&mut mdl, ovf, crate::ovf::Reformulation::Equilibrium).unwrap();
        assert_eq!(mdl.ctr.n_vars(), n_vars);
        assert_eq!(mdl.ctr.n_equs(), n_equs);
        assert_eq!(mdl.empdag.num_mps(), n_mps);
        assert_eq!(mdl.empdag.num_nashs(), n_nashs);
    }

    #[test]
    fn test_equil_rejects_shared_ovf_var() {
        let (mut mdl, _z, x, rho, _e0, ovf) = l1_model();
        // a second occurrence of rho
        let e1 = mdl.ctr.add_greaterthan().unwrap();
        mdl.ctr.equ_add_new_linear_var(e1, rho, 2.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e1, x, 1.0).unwrap();
        mdl.ctr.sync_lequ(e1).unwrap();
        assert!(matches!(
            ovf_equil(&mut mdl, ovf),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_equil_sense_mismatch() {
        let (mut mdl, ..) = l1_model();
        mdl.sense = Sense::Max;
        assert!(matches!(
            ovf_equil(&mut mdl, 0),
            Err(Error::EmpIncorrectSyntax(_))
        ));
    }

    #[test]
    fn test_equil_cvar_set_rows() {
        let mut mdl = Model::new(Backend::Rhp);
        mdl.sense = Sense::Min;
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let args = mdl.ctr.add_free_vars(3).unwrap();
        let rho = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e0 = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e0, rho, 1.0).unwrap();
        mdl.ctr.sync_lequ(e0).unwrap();
        mdl.objvar = z;
        mdl.objequ = e0;
        let ovf = mdl.ovf_add("cvarup", rho, args).unwrap();
        mdl.ovf_param_add_scalar(ovf, "tail", 0.2).unwrap();

        ovf_equil(&mut mdl, ovf).unwrap();

        let nash = mdl.empdag.uid_root.as_nash().unwrap();
        let dual = mdl.empdag.nashs.arcs[nash.idx()][1].as_mp().unwrap();
        let dual_mp = mdl.empdag.mp(dual).unwrap();
        // y (3) + rho, plus the simplex constraint
        assert_eq!(dual_mp.num_vars(), 4);
        assert_eq!(dual_mp.num_cons(&mdl.ctr), 1);
        // the simplex row is an equality with constant -1
        let setrow = *dual_mp
            .equs
            .iter()
            .find(|&&ei| mdl.ctr.equ_meta(ei).unwrap().role == EquRole::Constraint)
            .unwrap();
        let equ = mdl.ctr.equ(setrow).unwrap();
        assert_eq!(equ.cone, Cone::Zero);
        assert_eq!(equ.cst, -1.0);
        assert_eq!(equ.lin.len(), 3);
    }
}
