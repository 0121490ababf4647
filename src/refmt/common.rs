//! Shared machinery of the reformulators

use std::sync::Arc;

use crate::avar::Avar;
use crate::container::{Container, EquKind, EquRole};
use crate::cones::Cone;
use crate::empdag::EmpDag;
use crate::error::{Error, Result};
use crate::idx::{EdgeKind, EquIdx, MpId, NashId, NodeUid, VarIdx};
use crate::mat::Mat;
use crate::model::Model;
use crate::mp::MpData;
use crate::ovf::{OvfParams, OvfTemplate};
use crate::types::Sense;

/// Templates usable in either sense: their optimizer does not move
const ALWAYS_COMPATIBLE: &[&str] = &["expectation"];

/// Check that an OVF's sense is compatible with its host problem
///
/// A sup-form CCF keeps a minimization convex and an inf-form CCF keeps a
/// maximization concave; everything else is rejected.
pub(crate) fn compat_types(
    ovf_name: &str,
    ovf_varname: &str,
    mp_sense: Sense,
    ovf_sense: Sense,
) -> Result<()> {
    let compatible = matches!(
        (mp_sense, ovf_sense),
        (Sense::Min, Sense::Max) | (Sense::Max, Sense::Min)
    );
    if compatible || ALWAYS_COMPATIBLE.contains(&ovf_name) {
        return Ok(());
    }
    Err(Error::EmpIncorrectSyntax(format!(
        "unsupported problem types: the OVF {ovf_name} (var name {ovf_varname}) of type \
         {ovf_sense} is used in a {mp_sense} optimization problem. This is unsupported for now"
    )))
}

/// The MP owning a variable (through metadata) and the relevant sense
///
/// Models without an EMP graph report their top-level sense and no MP.
pub(crate) fn owning_mp_and_sense(mdl: &Model, vi: VarIdx) -> Result<(Option<MpId>, Sense)> {
    if mdl.has_empdag() {
        let mp_id = mdl.ctr.var_meta(vi)?.mp;
        if !mp_id.is_regular() {
            return Err(Error::EmpIncorrectInput {
                issues: 1,
                first: format!(
                    "variable '{}' is not attached to a regular MP",
                    mdl.ctr.var_name(vi)
                ),
            });
        }
        let sense = mdl.empdag.mp(mp_id)?.sense;
        Ok((Some(mp_id), sense))
    } else {
        Ok((None, mdl.sense))
    }
}

/// Every live equation a variable appears in, with its linear coefficient
///
/// A nonlinear occurrence cannot be substituted structurally and is
/// rejected.
pub(crate) fn equations_with_var(ctr: &Container, vi: VarIdx) -> Result<Vec<(EquIdx, f64)>> {
    let mut out = Vec::new();
    for &ei in ctr.var_equations(vi)? {
        let equ = ctr.equ(ei)?;
        if equ.nl.as_ref().is_some_and(|t| t.mentions(vi))
            || equ.quad.iter().any(|t| t.vi == vi || t.vj == vi)
        {
            return Err(Error::not_implemented(format!(
                "the OVF variable '{}' appears non-linearly in equation '{}'",
                ctr.var_name(vi),
                ctr.equ_name(ei)
            )));
        }
        out.push((ei, equ.lin_coeff(vi)));
    }
    Ok(out)
}

/// Add the polyhedral constraints `A y - s ∈ K` of an OVF to an MP
pub(crate) fn add_poly_cons(
    ctr: &mut Container,
    template: &Arc<dyn OvfTemplate>,
    params: &OvfParams,
    y: &Avar,
    a: &Mat,
    s: &[f64],
    empdag: &mut EmpDag,
    mp_id: MpId,
    prefix: &str,
) -> Result<()> {
    let (nrows, _) = a.size();
    let n_y = y.size();
    ctr.equ_name_scope(format!("{prefix}_setY_{mp_id}"));
    for i in 0..nrows {
        let row = a.row(i);
        if row.is_empty() {
            tracing::warn!(target: "reshop::refmt", row = i, "empty set row, skipping");
            continue;
        }
        let cone = template.cone_nonbox(i, n_y, params)?;
        if !cone.is_polyhedral() {
            ctr.equ_name_scope_end();
            return Err(Error::not_implemented(
                "non-polyhedral set is not yet supported".to_string(),
            ));
        }
        let ei = ctr.add_equation(EquKind::ConeInclusion, cone)?;
        let (positions, coeffs): (Vec<usize>, Vec<f64>) = row.into_iter().unzip();
        let vars: Vec<VarIdx> = positions
            .iter()
            .map(|&j| {
                y.get(j).ok_or_else(|| {
                    Error::index_out_of_range(format!("set row {i} addresses y[{j}]"))
                })
            })
            .collect::<Result<_>>()?;
        ctr.equ_add_linear(ei, &Avar::list(vars), &coeffs, 1.0)?;
        ctr.equ_set_constant(ei, -s[i])?;
        ctr.sync_lequ(ei)?;
        empdag.mp_mut(mp_id)?.add_constraint(ei, ctr)?;
    }
    ctr.equ_name_scope_end();
    Ok(())
}

/// Make sure the model carries an EMP graph, synthesizing a single-MP
/// graph holding the whole model when none exists
pub(crate) fn ensure_model_empdag(mdl: &mut Model) -> Result<MpId> {
    if mdl.has_empdag() {
        let root = mdl.empdag.uid_root;
        return root
            .as_mp()
            .ok_or_else(|| Error::runtime("the EMPDAG root is not an MP".to_string()));
    }

    let mp_id = mdl
        .empdag
        .new_mp(mdl.sense, mdl.name.clone().or(Some("main".to_string())))?;
    {
        let objvar = mdl.objvar;
        let objequ = mdl.objequ;
        let mp = mdl.empdag.mp_mut(mp_id)?;
        mp.set_opt();
        if objequ.is_valid() {
            mp.set_objequ(objequ, &mut mdl.ctr)?;
        }
        if objvar.is_valid() {
            mp.set_objvar(objvar, &mut mdl.ctr)?;
        }
    }
    for i in 0..mdl.ctr.n_vars() {
        let vi = VarIdx::from(i);
        if mdl.ctr.var_bounds(vi).is_err() {
            continue; // deleted
        }
        if !mdl.ctr.var_meta(vi)?.mp.is_valid() {
            mdl.empdag.mp_mut(mp_id)?.add_var(vi, &mut mdl.ctr)?;
        }
    }
    for i in 0..mdl.ctr.n_equs() {
        let ei = EquIdx::from(i);
        if mdl.ctr.equ(ei).is_err() {
            continue; // deleted
        }
        if !mdl.ctr.equ_meta(ei)?.mp.is_valid() {
            let role = mdl.ctr.equ_meta(ei)?.role;
            let mp = mdl.empdag.mp_mut(mp_id)?;
            if role == EquRole::Objective {
                mp.add_equ(ei, &mut mdl.ctr)?;
            } else {
                mp.add_constraint(ei, &mut mdl.ctr)?;
            }
        }
    }
    mdl.empdag.set_root(NodeUid::mp(mp_id))?;
    mdl.empdag.stage = crate::empdag::EmpDagStage::Model;
    tracing::debug!(target: "reshop::refmt", mp = %mp_id, "synthesized single-MP EMPDAG");
    Ok(mp_id)
}

/// Find or create the Nash node that will host a new dual player above
/// `mp_id`
///
/// With no parent, a fresh Nash node becomes the root and adopts the MP.
/// A Nash parent is reused; a CTRL parent gets the Nash node spliced in
/// between. A VF parent is an internal inconsistency at this point.
pub(crate) fn ensure_nash_parent(
    empdag: &mut EmpDag,
    mp_id: MpId,
    name: &str,
) -> Result<NashId> {
    let rarcs = &empdag.mps.rarcs[mp_id.idx()];
    if rarcs.len() > 1 {
        return Err(Error::runtime(format!(
            "MP({}) has {} parents, we can only deal with at most 1",
            empdag.mp_name(mp_id),
            rarcs.len()
        )));
    }

    match rarcs.first().copied() {
        None => {
            let nash = empdag.new_nash(Some(name.to_string()))?;
            let mp_uid = NodeUid::mp(mp_id);
            if let Some(pos) = empdag.roots.iter().position(|u| u.same_node(mp_uid)) {
                empdag.roots[pos] = NodeUid::nash(nash);
            } else {
                empdag.roots.push(NodeUid::nash(nash));
            }
            if empdag.uid_root.same_node(mp_uid) || !empdag.uid_root.is_valid() {
                empdag.uid_root = NodeUid::nash(nash);
            }
            empdag.nash_add_mp(nash, mp_id)?;
            Ok(nash)
        }
        Some(uid) if uid.is_nash() => Ok(uid.as_nash().unwrap()),
        Some(uid) if uid.edge_kind() == EdgeKind::Ctrl => {
            let parent = uid.as_mp().unwrap();
            empdag.replace_child_with_nash(parent, mp_id, Some(name.to_string()))
        }
        Some(uid) => Err(Error::runtime(format!(
            "MP({}) is reached from {} through a VF edge; cannot insert an equilibrium here",
            empdag.mp_name(mp_id),
            empdag.node_name(uid)
        ))),
    }
}

/// Swap an equation of an MP for its rewritten copy
///
/// Ownership metadata and the objective pointer follow the new index; the
/// old equation is deleted from the container.
pub(crate) fn replace_mp_equ(
    mdl: &mut Model,
    mp_id: Option<MpId>,
    old_ei: EquIdx,
    new_ei: EquIdx,
) -> Result<()> {
    let role = mdl.ctr.equ_meta(old_ei)?.role;
    if let Some(mp_id) = mp_id {
        let mp = mdl.empdag.mp_mut(mp_id)?;
        mp.equs.remove(old_ei);
        mp.equs.insert(new_ei);
        if let MpData::Opt(opt) = &mut mp.data {
            if opt.objequ == old_ei {
                opt.objequ = new_ei;
            }
        }
        let meta = mdl.ctr.equ_meta_mut(new_ei)?;
        meta.mp = mp_id;
        meta.role = role;
    } else {
        mdl.ctr.equ_meta_mut(new_ei)?.role = role;
    }
    if mdl.objequ == old_ei {
        mdl.objequ = new_ei;
    }
    mdl.ctr.equ_delete(old_ei)?;
    Ok(())
}

/// The per-argument linear coefficients of `⟨t, G(·)⟩` where
/// `G(x) = B (coeffs ∘ x) + b`: returns the coefficient vector over the
/// arguments and the constant `⟨t, b⟩`.
pub(crate) fn weighted_affine_row(
    t: &[f64],
    bmat: &Mat,
    bcst: Option<&[f64]>,
    coeffs: Option<&[f64]>,
    n_args: usize,
) -> (Vec<f64>, f64) {
    let mut arg_coeffs = vec![0.0; n_args];
    let mut cst = 0.0;
    for (i, &ti) in t.iter().enumerate() {
        if ti == 0.0 {
            continue;
        }
        if bmat.is_empty() {
            let c = coeffs.map_or(1.0, |c| c[i]);
            arg_coeffs[i] += ti * c;
        } else {
            for (j, v) in bmat.row(i) {
                let c = coeffs.map_or(1.0, |c| c[j]);
                arg_coeffs[j] += ti * v * c;
            }
        }
        if let Some(b) = bcst {
            cst += ti * b[i];
        }
    }
    (arg_coeffs, cst)
}

/// Append `global · K/2 · ⟨s, J s⟩` to an equation
pub(crate) fn add_half_quad(
    ctr: &mut Container,
    ei: EquIdx,
    s: &Avar,
    j: &Mat,
    global: f64,
) -> Result<()> {
    let (nrows, _) = j.size();
    let mut triplets = Vec::new();
    for r in 0..nrows {
        for (c, v) in j.row(r) {
            triplets.push((r, c, v));
        }
    }
    ctr.equ_add_quadratic_relative(ei, s, s, &triplets, 0.5 * global)
}

/// The cone typing a dual multiplier, by the OVF sense
pub(crate) fn multiplier_cone(sense: Sense, primal: Cone) -> Cone {
    match sense {
        Sense::Max => primal.polar(),
        _ => primal.dual(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Backend;

    #[test]
    fn test_compat_types() {
        assert!(compat_types("l1", "rho", Sense::Min, Sense::Max).is_ok());
        assert!(compat_types("cvarlo", "rho", Sense::Max, Sense::Min).is_ok());
        assert!(matches!(
            compat_types("l1", "rho", Sense::Max, Sense::Max),
            Err(Error::EmpIncorrectSyntax(_))
        ));
        // the expectation never moves its optimizer
        assert!(compat_types("expectation", "rho", Sense::Max, Sense::Max).is_ok());
    }

    #[test]
    fn test_equations_with_var_rejects_nonlinear() {
        let mut ctr = Container::new();
        let x = ctr.add_var(0.0, 1.0).unwrap();
        let e = ctr.add_equality().unwrap();
        ctr.equ_add_bilinear(e, x, x, 1.0).unwrap();
        ctr.sync_lequ(e).unwrap();
        assert!(matches!(
            equations_with_var(&ctr, x),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_ensure_model_empdag() {
        let mut mdl = Model::new(Backend::Rhp);
        let x = mdl.ctr.add_var(0.0, f64::INFINITY).unwrap();
        let e = mdl.ctr.add_greaterthan().unwrap();
        mdl.ctr.equ_add_new_linear_var(e, x, 1.0).unwrap();
        mdl.ctr.sync_lequ(e).unwrap();

        let mp_id = ensure_model_empdag(&mut mdl).unwrap();
        assert!(mdl.has_empdag());
        assert_eq!(mdl.empdag.uid_root.as_mp(), Some(mp_id));
        let mp = mdl.empdag.mp(mp_id).unwrap();
        assert!(mp.vars.contains(x));
        assert!(mp.equs.contains(e));
        // idempotent
        assert_eq!(ensure_model_empdag(&mut mdl).unwrap(), mp_id);
    }

    #[test]
    fn test_ensure_nash_parent_at_root() {
        let mut mdl = Model::new(Backend::Rhp);
        let x = mdl.ctr.add_var(0.0, f64::INFINITY).unwrap();
        mdl.objvar = x;
        let mp_id = ensure_model_empdag(&mut mdl).unwrap();
        let nash = ensure_nash_parent(&mut mdl.empdag, mp_id, "equil").unwrap();
        assert_eq!(mdl.empdag.uid_root.as_nash(), Some(nash));
        mdl.empdag.check_consistency().unwrap();
        // reused on a second call
        assert_eq!(
            ensure_nash_parent(&mut mdl.empdag, mp_id, "equil").unwrap(),
            nash
        );
    }

    #[test]
    fn test_weighted_affine_row() {
        let b = Mat::eye(2, -1.0);
        let (coeffs, cst) =
            weighted_affine_row(&[2.0, 3.0], &b, Some(&[1.0, 1.0]), None, 2);
        assert_eq!(coeffs, vec![-2.0, -3.0]);
        assert_eq!(cst, 5.0);
    }
}
