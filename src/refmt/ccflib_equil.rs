//! Saddle-path rewrite of CCF-library programs
//!
//! The analyzer collects the MPs opening a saddle path (a run of VF
//! edges whose senses alternate). For each such path this pass walks the
//! primal/dual alternation: every adversarial CCF node is instantiated
//! into a plain optimization MP (its `y` block, `-k(y)` objective and set
//! rows), attached as a second player under a Nash node, and the VF arcs
//! that went through it are re-pointed at its former children with the
//! weights multiplied through the rows of `Bᵀy`.
//!
//! Primal-after-primal chaining below an active dual node and
//! dual-after-dual chaining are rejected with `NotImplemented`; the
//! semantics of those paths are not settled.

use crate::container::NlExpr;
use crate::empdag::{ArcVf, Varc};
use crate::error::{Error, Result};
use crate::idx::{EdgeKind, EquIdx, MpId, NashId, NodeUid, VarIdx};
use crate::model::Model;
use crate::mp::MpData;
use crate::refmt::equil::instantiate_ccflib_mp;
use crate::types::Sense;

/// The active dual node's objective, with the `(Bᵀy)` row weighting the
/// subtree being visited
#[derive(Debug, Clone)]
struct DualCtx {
    objequ: EquIdx,
    weight: Vec<(VarIdx, f64)>,
}

/// Traversal state of one saddle path
struct SaddleCtx {
    path_sense: Sense,
    nash: NashId,
    mpid_primal: MpId,
    mpid_dual: MpId,
    /// Weight of the VF arc from the primal side into the current subtree
    arc_primal: ArcVf,
    /// Weight of the active dual node into the current subtree
    arc_dual: ArcVf,
    dual_ctx: Option<DualCtx>,
}

/// Rewrite every saddle path recorded on the dag
pub fn ccflib_equil(mdl: &mut Model) -> Result<()> {
    // the traversal consults the pre-rewrite arcs while the dag mutates
    let dag_up = mdl.empdag.clone();
    let starts = dag_up.saddle_path_starts.clone();

    for &start in &starts {
        let path_sense = dag_up.mps.arr[start.idx()].sense;

        let parents = dag_up.mps.rarcs[start.idx()].clone();
        if parents.len() > 1 {
            return Err(Error::runtime(format!(
                "MP({}) has {} parents, we can only deal with at most 1",
                mdl.empdag.mp_name(start),
                parents.len()
            )));
        }

        let nash = match parents.first().copied() {
            None => {
                let nash = mdl
                    .empdag
                    .new_nash(Some("CCF equilibrium reformulation".to_string()))?;
                let start_uid = NodeUid::mp(start);
                if let Some(pos) = mdl.empdag.roots.iter().position(|u| u.same_node(start_uid)) {
                    mdl.empdag.roots[pos] = NodeUid::nash(nash);
                }
                if mdl.empdag.uid_root.same_node(start_uid) {
                    mdl.empdag.uid_root = NodeUid::nash(nash);
                }
                mdl.empdag.nash_add_mp(nash, start)?;
                nash
            }
            Some(uid) if uid.is_nash() => uid.as_nash().unwrap(),
            Some(uid) if uid.edge_kind() == EdgeKind::Ctrl => {
                let parent = uid.as_mp().unwrap();
                mdl.empdag.replace_child_with_nash(
                    parent,
                    start,
                    Some("CCF equilibrium reformulation".to_string()),
                )?
            }
            Some(uid) => {
                return Err(Error::runtime(format!(
                    "MP({}) is reached from {} through a VF edge; the saddle path \
                     cannot start below it",
                    mdl.empdag.mp_name(start),
                    mdl.empdag.node_name(uid)
                )))
            }
        };

        let mut ctx = SaddleCtx {
            path_sense,
            nash,
            mpid_primal: MpId::NA,
            mpid_dual: MpId::NA,
            arc_primal: ArcVf::Unset,
            arc_dual: ArcVf::Unset,
            dual_ctx: None,
        };
        dfs_primal(mdl, start, &mut ctx, &dag_up)?;
    }

    if !starts.is_empty() {
        mdl.empdag.saddle_path_starts.clear();
        mdl.empdag.mps2reformulate.clear();
        mdl.empdag.stage = crate::empdag::EmpDagStage::Transformed;
        mdl.mdltype = crate::types::ModelType::Emp;
    }
    Ok(())
}

/// Visit a primal node: contribute its objective to the active dual
/// objective, keep aligned VF children, descend into adversarial ones
fn dfs_primal(
    mdl: &mut Model,
    mpid_primal: MpId,
    ctx: &mut SaddleCtx,
    dag_up: &crate::empdag::EmpDag,
) -> Result<()> {
    /* ----------------------------------------------------------------------
     * With an active dual node, the primal objective function, without its
     * objective variable, enters the dual objective scaled by the (Bᵀy)
     * row of the subtree
     * ---------------------------------------------------------------------- */

    if let Some(dual_ctx) = ctx.dual_ctx.clone() {
        let objequ = mdl.empdag.mp_objequ(mpid_primal).map_err(|_| {
            Error::runtime(format!(
                "invalid objective equation for MP({})",
                mdl.empdag.mp_name(mpid_primal)
            ))
        })?;
        let objvar = mdl.empdag.mp(mpid_primal)?.objvar();
        let body = mdl
            .ctr
            .equ_as_nlexpr(objequ, objvar.is_valid().then_some(objvar))?;
        let weight_terms: Vec<NlExpr> = dual_ctx
            .weight
            .iter()
            .map(|&(vi, c)| NlExpr::Var(vi).scaled_copy(c))
            .collect();
        let contribution = NlExpr::Mul(vec![NlExpr::Sum(weight_terms), body]);
        mdl.ctr
            .equ_add_nonlinear_expression(dual_ctx.objequ, &contribution, 1.0)?;
    }

    /* ----------------------------------------------------------------------
     * Walk the pre-rewrite VF children; the node's forward arcs are rebuilt
     * ---------------------------------------------------------------------- */

    let old_arcs: Vec<Varc> = dag_up.mps.varcs[mpid_primal.idx()].clone();
    mdl.empdag.mps.varcs[mpid_primal.idx()].clear();

    let mpid_dual_bck = ctx.mpid_dual;
    for arc in old_arcs {
        let child = arc.child;
        let child_sense = mdl.empdag.mp(child)?.sense;

        ctx.mpid_primal = mpid_primal;
        ctx.mpid_dual = mpid_dual_bck;

        if child_sense == ctx.path_sense {
            // an aligned child stays a VF child of this node
            if ctx.mpid_dual.is_valid() {
                return Err(Error::not_implemented(
                    "primal-to-primal VF chaining below an active dual node".to_string(),
                ));
            }
            mdl.empdag.mps.varcs[mpid_primal.idx()].push(arc);
        } else {
            // an adversarial child: its arc is consumed by the dual rewrite
            mdl.empdag.rm_rarc(child, NodeUid::mp(mpid_primal))?;
            ctx.arc_primal = arc.weight.clone();
            dfs_dual(mdl, child, ctx, dag_up)?;
        }
    }

    Ok(())
}

/// Visit an adversarial CCF node: instantiate it, splice `-k(y)` into the
/// primal, and push the `Bᵀy` weights through to its children
fn dfs_dual(
    mdl: &mut Model,
    mpid_dual: MpId,
    ctx: &mut SaddleCtx,
    dag_up: &crate::empdag::EmpDag,
) -> Result<()> {
    let MpData::Ccflib(ovf_idx) = mdl.empdag.mp(mpid_dual)?.data else {
        return Err(Error::not_implemented(format!(
            "adversarial MP({}) is not a CCF-library program",
            mdl.empdag.mp_name(mpid_dual)
        )));
    };
    let ovf_idx = ovf_idx as usize;
    if mdl.ovf(ovf_idx)?.instantiated {
        return Ok(());
    }

    let (y, objequ_dual) = instantiate_ccflib_mp(mdl, mpid_dual, ovf_idx)?;

    /* ----------------------------------------------------------------------
     * Attach the node: the first dual of a path joins the Nash node, a
     * nested one would extend the dual subdag
     * ---------------------------------------------------------------------- */

    if ctx.mpid_dual.is_valid() {
        // the dual subdag grows: the arc carries the active dual weight
        mdl.empdag
            .mp_add_mp_via_vf(ctx.mpid_dual, mpid_dual, ctx.arc_dual.clone())?;
    } else {
        mdl.empdag.nash_add_mp(ctx.nash, mpid_dual)?;
    }

    /* ----------------------------------------------------------------------
     * -w·k(y) enters the primal equation the CCF value appeared in
     * ---------------------------------------------------------------------- */

    add_weighted_equ(mdl, &ctx.arc_primal, objequ_dual)?;

    let def = mdl.ovf(ovf_idx)?.clone();
    let template = mdl.registry.get(&def.template)?.clone();
    let old_arcs: Vec<Varc> = dag_up.mps.varcs[mpid_dual.idx()].clone();
    let n_children = old_arcs.len();
    let (b_mat, b_cst) = template.affine_transformation(n_children.max(1), &def.params)?;

    // ⟨b, y⟩ joins both the dual objective and the primal equation
    if let Some(b) = &b_cst {
        let coeffs: Vec<f64> = (0..y.size()).map(|i| b.get(i).copied().unwrap_or(0.0)).collect();
        mdl.ctr.equ_add_linear(objequ_dual, &y, &coeffs, 1.0)?;
        add_weighted_linear(mdl, &ctx.arc_primal, &y, &coeffs)?;
    }

    // the dual node's own VF arcs are consumed by the rewiring
    mdl.empdag.mps.varcs[mpid_dual.idx()].clear();

    let mpid_primal_bck = ctx.mpid_primal;
    let dual_ctx_bck = ctx.dual_ctx.clone();
    let arc_primal_bck = ctx.arc_primal.clone();

    for (i, arc) in old_arcs.iter().enumerate() {
        let child = arc.child;
        let child_sense = mdl.empdag.mp(child)?.sense;

        // the i-th row of Bᵀ, mapped into the y block
        let col = if b_mat.is_empty() {
            vec![(i, 1.0)]
        } else {
            b_mat.col(i)
        };
        let weight: Vec<(VarIdx, f64)> = col
            .into_iter()
            .map(|(j, v)| {
                y.get(j)
                    .map(|vi| (vi, v))
                    .ok_or_else(|| Error::index_out_of_range(format!("y[{j}] missing")))
            })
            .collect::<Result<_>>()?;

        ctx.mpid_dual = mpid_dual;
        ctx.mpid_primal = mpid_primal_bck;
        ctx.arc_primal = arc_primal_bck.clone();
        ctx.arc_dual = ArcVf::init(objequ_dual);
        {
            let (vars, coeffs): (Vec<VarIdx>, Vec<f64>) = weight.iter().copied().unzip();
            ctx.arc_dual.mul_lequ(&vars, &coeffs)?;
        }

        if child_sense == ctx.path_sense {
            /* --------------------------------------------------------------
             * The VF edge primal-parent -> dual -> child collapses into a
             * single edge with the weights multiplied through
             * -------------------------------------------------------------- */

            mdl.empdag.rm_rarc(child, NodeUid::mp(mpid_dual))?;

            let mut edge = ctx.arc_primal.clone();
            let (vars, coeffs): (Vec<VarIdx>, Vec<f64>) = weight.iter().copied().unzip();
            edge.mul_lequ(&vars, &coeffs)?;
            mdl.empdag
                .mp_add_mp_via_vf(ctx.mpid_primal, child, edge)?;

            ctx.dual_ctx = Some(DualCtx {
                objequ: objequ_dual,
                weight,
            });
            dfs_primal(mdl, child, ctx, dag_up)?;
            ctx.dual_ctx = dual_ctx_bck.clone();
        } else {
            return Err(Error::not_implemented(
                "dual-after-dual VF chaining".to_string(),
            ));
        }
    }

    mdl.ctr.sync_lequ(objequ_dual)?;
    mdl.empdag.mp_mut(mpid_dual)?.finalize(&mdl.ctr)?;
    mdl.ovf_mut(ovf_idx)?.instantiated = true;
    Ok(())
}

/// Add the content of `src` into the equation an arc points at, scaled by
/// the arc weight
fn add_weighted_equ(mdl: &mut Model, arc: &ArcVf, src: EquIdx) -> Result<()> {
    let ArcVf::Basic(basic) = arc else {
        return Err(Error::not_implemented(
            "splicing a weighted value function through a non-basic VF arc".to_string(),
        ));
    };
    if !basic.ei.is_valid() {
        return Ok(());
    }
    let tree = mdl.ctr.equ_as_nlexpr(src, None)?;
    if matches!(&tree, NlExpr::Sum(terms) if terms.is_empty()) {
        return Ok(());
    }
    let contribution = if basic.vi.is_valid() {
        NlExpr::Mul(vec![NlExpr::Var(basic.vi), tree])
    } else {
        tree
    };
    mdl.ctr
        .equ_add_nonlinear_expression(basic.ei, &contribution, basic.cst)?;
    mdl.ctr.sync_lequ(basic.ei)
}

/// Add `w · Σ coeffs[i]·y[i]` into the equation an arc points at
fn add_weighted_linear(
    mdl: &mut Model,
    arc: &ArcVf,
    y: &crate::avar::Avar,
    coeffs: &[f64],
) -> Result<()> {
    let ArcVf::Basic(basic) = arc else {
        return Err(Error::not_implemented(
            "splicing a weighted value function through a non-basic VF arc".to_string(),
        ));
    };
    if !basic.ei.is_valid() {
        return Ok(());
    }
    if basic.vi.is_valid() {
        let terms: Vec<NlExpr> = y
            .iter()
            .zip(coeffs)
            .map(|(vi, &c)| NlExpr::Var(vi).scaled_copy(c))
            .collect();
        let tree = NlExpr::Mul(vec![NlExpr::Var(basic.vi), NlExpr::Sum(terms)]);
        mdl.ctr
            .equ_add_nonlinear_expression(basic.ei, &tree, basic.cst)?;
    } else {
        mdl.ctr.equ_add_linear(basic.ei, y, coeffs, basic.cst)?;
    }
    mdl.ctr.sync_lequ(basic.ei)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EquRole;
    use crate::empdag::analysis::analyze;
    use crate::types::Backend;
    use approx::assert_relative_eq;

    /// A two-scenario risk tree: `min` root, an `ecvarup` CCF node, and
    /// two `min` scenario children feeding it
    fn risk_tree() -> (Model, MpId, MpId, Vec<MpId>, EquIdx) {
        let mut mdl = Model::new(Backend::Rhp);

        // root: min x0 + theta, theta given by the CCF over the scenarios
        let root = mdl
            .empdag
            .new_mp(Sense::Min, Some("root".to_string()))
            .unwrap();
        let x0 = mdl.ctr.add_var(0.0, f64::INFINITY).unwrap();
        let eobj = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(eobj, x0, 1.0).unwrap();
        mdl.ctr.sync_lequ(eobj).unwrap();
        {
            let mp = mdl.empdag.mp_mut(root).unwrap();
            mp.set_opt();
            mp.set_objequ(eobj, &mut mdl.ctr).unwrap();
            mp.add_var(x0, &mut mdl.ctr).unwrap();
        }

        let (crm, ovf) = mdl
            .ccflib_mp("ecvarup", Some("crm".to_string()))
            .unwrap();
        mdl.ovf_param_add_scalar(ovf, "tail", 0.5).unwrap();
        mdl.ovf_param_add_scalar(ovf, "lambda", 0.5).unwrap();
        mdl.empdag
            .mp_add_mp_via_vf(root, crm, ArcVf::init(eobj))
            .unwrap();

        let mut scens = Vec::new();
        for s in 0..2 {
            let scen = mdl
                .empdag
                .new_mp(Sense::Min, Some(format!("scen{s}")))
                .unwrap();
            let xs = mdl.ctr.add_var(0.0, f64::INFINITY).unwrap();
            let es = mdl.ctr.add_equality().unwrap();
            mdl.ctr.equ_add_new_linear_var(es, xs, 2.0 + s as f64).unwrap();
            mdl.ctr.sync_lequ(es).unwrap();
            {
                let mp = mdl.empdag.mp_mut(scen).unwrap();
                mp.set_opt();
                mp.set_objequ(es, &mut mdl.ctr).unwrap();
                mp.add_var(xs, &mut mdl.ctr).unwrap();
            }
            mdl.empdag
                .mp_add_mp_via_vf(crm, scen, ArcVf::init(EquIdx::NA))
                .unwrap();
            scens.push(scen);
        }

        mdl.empdag.compute_roots();
        analyze(&mut mdl.empdag, &mut mdl.ctr).unwrap();
        (mdl, root, crm, scens, eobj)
    }

    #[test]
    fn test_saddle_path_recorded() {
        let (mdl, root, crm, _scens, _eobj) = risk_tree();
        assert_eq!(mdl.empdag.saddle_path_starts, vec![root]);
        assert_eq!(mdl.empdag.mps2reformulate, vec![crm]);
    }

    #[test]
    fn test_ccflib_equil_rewires_the_tree() {
        let (mut mdl, root, crm, scens, eobj) = risk_tree();
        ccflib_equil(&mut mdl).unwrap();
        mdl.empdag.check_consistency().unwrap();

        // the Nash node owns the root and the instantiated CCF
        let nash = mdl.empdag.uid_root.as_nash().expect("nash root");
        let children: Vec<MpId> = mdl.empdag.nashs.arcs[nash.idx()]
            .iter()
            .map(|u| u.as_mp().unwrap())
            .collect();
        assert_eq!(children, vec![root, crm]);

        // the CCF node became a max-opt MP holding y and the simplex row
        let crm_mp = mdl.empdag.mp(crm).unwrap();
        assert!(crm_mp.is_opt());
        assert_eq!(crm_mp.sense, Sense::Max);
        assert!(crm_mp.is_finalized());
        assert_eq!(crm_mp.num_cons(&mdl.ctr), 1);
        // y block of two scenario weights
        assert_eq!(crm_mp.num_vars(), 2);

        // root's VF arcs now point directly at the scenarios, weighted by y
        let arcs = &mdl.empdag.mps.varcs[root.idx()];
        assert_eq!(arcs.len(), 2);
        for (k, arc) in arcs.iter().enumerate() {
            assert_eq!(arc.child, scens[k]);
            let ArcVf::Basic(b) = &arc.weight else {
                panic!("expected a basic weight")
            };
            assert_eq!(b.ei, eobj);
            assert!(b.vi.is_valid(), "weight multiplied through y");
            assert_relative_eq!(b.cst, 1.0);
        }
        // the CCF node no longer has VF children
        assert!(mdl.empdag.mps.varcs[crm.idx()].is_empty());
    }

    #[test]
    fn test_dual_objective_collects_children() {
        let (mut mdl, _root, crm, _scens, _eobj) = risk_tree();
        ccflib_equil(&mut mdl).unwrap();

        // the dual objective holds y-weighted copies of the scenario
        // objectives: y0·(2·x_s0) + y1·(3·x_s1)
        let objequ = mdl.empdag.mp(crm).unwrap().objequ();
        let equ = mdl.ctr.equ(objequ).unwrap();
        assert!(equ.is_nonlinear());
        let vars = mdl.ctr.equ_variables(objequ).unwrap();
        assert_eq!(vars.len(), 4, "two y and two scenario variables");
        assert_eq!(
            mdl.ctr.equ_meta(objequ).unwrap().role,
            EquRole::Objective
        );
    }

    #[test]
    fn test_ccflib_equil_idempotent() {
        let (mut mdl, ..) = risk_tree();
        ccflib_equil(&mut mdl).unwrap();
        let n_vars = mdl.ctr.n_vars();
        let n_equs = mdl.ctr.n_equs();
        let n_mps = mdl.empdag.num_mps();
        let n_nashs = mdl.empdag.num_nashs();
        ccflib_equil(&mut mdl).unwrap();
        assert_eq!(mdl.ctr.n_vars(), n_vars);
        assert_eq!(mdl.ctr.n_equs(), n_equs);
        assert_eq!(mdl.empdag.num_mps(), n_mps);
        assert_eq!(mdl.empdag.num_nashs(), n_nashs);
    }

    #[test]
    fn test_dual_after_dual_rejected() {
        // a second max-CCF under the max-CCF extends the dual subdag
        let (mut mdl, _root, crm, _scens, _eobj) = risk_tree();
        let (inner, ovf) = mdl
            .ccflib_mp("cvarup", Some("inner".to_string()))
            .unwrap();
        mdl.ovf_param_add_scalar(ovf, "tail", 0.5).unwrap();
        mdl.empdag
            .mp_add_mp_via_vf(crm, inner, ArcVf::init(EquIdx::NA))
            .unwrap();
        assert!(matches!(
            ccflib_equil(&mut mdl),
            Err(Error::NotImplemented(_))
        ));
    }
}
