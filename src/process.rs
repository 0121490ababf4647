//! The orchestrator: source model in, solver-ready model out
//!
//! Processing clones the source into a fresh model, rebases its EMP graph
//! through a rename map, runs the static analysis, reformulates every OVF
//! occurrence and every saddle path in ascending topological order, and
//! finally recomputes the model type - flattening single-program graphs
//! back to their classical form.

use crate::empdag::analysis::analyze;
use crate::error::{Error, Result};
use crate::idx::{MpId, NashId};
use crate::model::Model;
use crate::mp::MpData;
use crate::ovf::Reformulation;
use crate::refmt::{ccflib_equil::ccflib_equil, reformulate_ovf};
use crate::types::ModelType;

/// Options of one processing run
///
/// Passed explicitly; the engine keeps no global configuration.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Reformulation applied to occurrences without an explicit choice
    pub default_reformulation: Reformulation,
    /// Keep node display names in the processed model
    pub keep_empdag_names: bool,
    /// Allow ANSI color in downstream printers
    pub color_output: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            default_reformulation: Reformulation::Equilibrium,
            keep_empdag_names: true,
            color_output: false,
        }
    }
}

/// Process a source model into a solver-ready model
pub fn process(src: &Model, opts: &ProcessOptions) -> Result<Model> {
    tracing::debug!(target: "reshop::process", name = src.name.as_deref().unwrap_or("<unnamed>"),
                    "processing model");

    /* ----------------------------------------------------------------------
     * 1. Clone the container and metadata, rebase the EMP graph
     * ---------------------------------------------------------------------- */

    let mut dst = src.clone();
    let mp_map: Vec<MpId> = (0..src.empdag.num_mps()).map(MpId::from).collect();
    let nash_map: Vec<NashId> = (0..src.empdag.num_nashs()).map(NashId::from).collect();
    dst.empdag = src.empdag.clone_rebased(&mp_map, &nash_map)?;
    if !opts.keep_empdag_names {
        for name in &mut dst.empdag.mps.names {
            *name = None;
        }
        for name in &mut dst.empdag.nashs.names {
            *name = None;
        }
    }

    dst.ovf_check()?;

    /* ----------------------------------------------------------------------
     * 2. Analyze, then rewrite the saddle paths the analysis surfaced
     * ---------------------------------------------------------------------- */

    if dst.has_empdag() {
        dst.empdag.finalize_mps(&dst.ctr)?;
        dst.empdag.reset_type();
        analyze(&mut dst.empdag, &mut dst.ctr)?;
        if !dst.empdag.saddle_path_starts.is_empty() {
            ccflib_equil(&mut dst)?;
        }
    }

    /* ----------------------------------------------------------------------
     * 3. Reformulate the remaining OVF occurrences
     * ---------------------------------------------------------------------- */

    for idx in 0..dst.ovfs.len() {
        reformulate_ovf(&mut dst, idx, opts.default_reformulation)?;
    }

    /* ----------------------------------------------------------------------
     * 4. Recompute the model type
     * ---------------------------------------------------------------------- */

    recompute_modeltype(&mut dst)?;
    tracing::debug!(target: "reshop::process", mdltype = %dst.mdltype, "processing done");
    Ok(dst)
}

/// Classify the processed model, flattening trivial graphs
///
/// A graph holding exactly one MP collapses back to a classical problem:
/// the model-level sense and objective data come from that MP and the EMP
/// type is unset. Anything larger keeps the EMP type.
pub fn recompute_modeltype(mdl: &mut Model) -> Result<()> {
    if !mdl.has_empdag() {
        mdl.mdltype = mdl.classify_modeltype();
        return Ok(());
    }

    let single_mp = mdl.empdag.num_nashs() == 0
        && mdl.empdag.num_mps() == 1
        && mdl.empdag.mps.carcs[0].is_empty()
        && mdl.empdag.mps.varcs[0].is_empty();

    if single_mp {
        let mp = mdl.empdag.mp(MpId::new(0))?;
        mdl.sense = mp.sense;
        match &mp.data {
            MpData::Opt(opt) => {
                mdl.objvar = opt.objvar;
                mdl.objequ = opt.objequ;
                mdl.mdltype = mdl.classify_modeltype();
            }
            MpData::Vi(_) => {
                mdl.mdltype = ModelType::Vi;
            }
            MpData::Ccflib(_) => {
                return Err(Error::runtime(
                    "a CCF-library program survived reformulation".to_string(),
                ));
            }
            MpData::Undef => {
                return Err(Error::runtime(
                    "an MP without a kind survived reformulation".to_string(),
                ));
            }
        }
        return Ok(());
    }

    mdl.mdltype = ModelType::Emp;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avar::Avar;
    use crate::empdag::ArcVf;
    use crate::idx::{EquIdx, VarIdx};
    use crate::types::{Backend, Sense};
    use approx::assert_relative_eq;

    /// `min x₁  s.t.  x₁ ≥ 0`
    #[test]
    fn test_one_variable_lp() {
        let mut src = Model::new(Backend::Rhp);
        src.sense = Sense::Min;
        let x1 = src.ctr.add_var(0.0, f64::INFINITY).unwrap();
        src.objvar = x1;

        let dst = process(&src, &ProcessOptions::default()).unwrap();
        assert_eq!(dst.mdltype, ModelType::Lp);
        assert_eq!(dst.n_vars(), 1);
        assert_eq!(dst.get_objvar(), x1);
        // the source is untouched
        assert_eq!(src.mdltype, ModelType::Undefined);
    }

    /// `min x₁  s.t.  x₁ + x₂ ≥ 1, x ≥ 0`
    #[test]
    fn test_one_constraint_lp() {
        let mut src = Model::new(Backend::Rhp);
        src.sense = Sense::Min;
        let x = src.ctr.add_positive_vars(2).unwrap();
        let x1 = x.get(0).unwrap();
        let e = src.ctr.add_greaterthan().unwrap();
        src.ctr
            .equ_add_linear(e, &x, &[1.0, 1.0], 1.0)
            .unwrap();
        src.ctr.equ_set_rhs(e, 1.0).unwrap();
        src.ctr.sync_lequ(e).unwrap();
        src.objvar = x1;

        let dst = process(&src, &ProcessOptions::default()).unwrap();
        assert_eq!(dst.mdltype, ModelType::Lp);
        assert_eq!(dst.n_equs(), 1);
        // the constraint evaluates as in the source: x = (0, 1) is tight
        assert_relative_eq!(dst.ctr.eval_equ(e, &[0.0, 1.0]).unwrap(), 0.0);
        assert_relative_eq!(dst.ctr.eval_equ(e, &[0.5, 1.0]).unwrap(), 0.5);
    }

    /// `min 2(x₁² + x₂²)  s.t.  x₁ + x₂ ≥ 1`
    #[test]
    fn test_quadratic_program() {
        let mut src = Model::new(Backend::Rhp);
        src.sense = Sense::Min;
        let x = src.ctr.add_free_vars(2).unwrap();
        let z = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let x1 = x.get(0).unwrap();
        let x2 = x.get(1).unwrap();

        let eobj = src.ctr.add_equality().unwrap();
        src.ctr.equ_add_new_linear_var(eobj, z, -1.0).unwrap();
        src.ctr
            .equ_add_quadratic_absolute(eobj, &[(x1, x1, 2.0), (x2, x2, 2.0)], 1.0)
            .unwrap();
        src.ctr.sync_lequ(eobj).unwrap();
        src.objvar = z;
        src.objequ = eobj;

        let e = src.ctr.add_greaterthan().unwrap();
        src.ctr
            .equ_add_linear(e, &x, &[1.0, 1.0], 1.0)
            .unwrap();
        src.ctr.equ_set_rhs(e, 1.0).unwrap();
        src.ctr.sync_lequ(e).unwrap();

        let dst = process(&src, &ProcessOptions::default()).unwrap();
        assert_eq!(dst.mdltype, ModelType::Qp);
        // objective value at the known optimum x₁ = x₂ = ½ is 1
        let mut point = vec![0.5, 0.5, 0.0];
        let obj = dst.ctr.eval_equ(eobj, &point).unwrap();
        assert_relative_eq!(obj, 1.0);
        point[2] = 1.0;
        assert_relative_eq!(dst.ctr.eval_equ(eobj, &point).unwrap(), 0.0);
    }

    /// Tragedy of the commons: five players, each maximizing
    /// `xᵢ(1 - Σxⱼ)` under `0 ≤ xᵢ ≤ 1` and `Σxⱼ ≤ 1`
    #[test]
    fn test_tragedy_of_the_commons() {
        let n = 5;
        let mut src = Model::new(Backend::Rhp);
        let nash = src.empdag.new_nash(Some("commons".to_string())).unwrap();
        let xs: Vec<VarIdx> = (0..n)
            .map(|_| src.ctr.add_var(0.0, 1.0).unwrap())
            .collect();

        for i in 0..n {
            let p = src
                .empdag
                .new_mp(Sense::Max, Some(format!("player{i}")))
                .unwrap();
            // xᵢ (1 - Σ xⱼ) as a linear term plus a quadratic row
            let eobj = src.ctr.add_equality().unwrap();
            let quad: Vec<(VarIdx, VarIdx, f64)> =
                xs.iter().map(|&xj| (xs[i], xj, 1.0)).collect();
            src.ctr
                .equ_add_quadratic_absolute(eobj, &quad, -1.0)
                .unwrap();
            src.ctr.equ_add_new_linear_var(eobj, xs[i], 1.0).unwrap();
            src.ctr.sync_lequ(eobj).unwrap();

            // private copy of the shared capacity constraint Σ xⱼ ≤ 1
            let ecap = src.ctr.add_lessthan().unwrap();
            src.ctr
                .equ_add_linear(ecap, &Avar::list(xs.clone()), &vec![1.0; n], 1.0)
                .unwrap();
            src.ctr.equ_set_rhs(ecap, 1.0).unwrap();
            src.ctr.sync_lequ(ecap).unwrap();

            let mp = src.empdag.mp_mut(p).unwrap();
            mp.set_opt();
            mp.set_objequ(eobj, &mut src.ctr).unwrap();
            mp.add_var(xs[i], &mut src.ctr).unwrap();
            mp.add_constraint(ecap, &mut src.ctr).unwrap();
            src.empdag.nash_add_mp(nash, p).unwrap();
        }
        src.empdag.compute_roots();

        let dst = process(&src, &ProcessOptions::default()).unwrap();
        assert_eq!(dst.mdltype, ModelType::Emp);
        assert_eq!(dst.empdag.num_mps(), n);
        assert!(dst.empdag.mps2reformulate.is_empty());
        assert!(dst.empdag.features.istree);
        assert!(!dst.empdag.features.has_vf_path);
        assert_eq!(
            dst.empdag.features.root_kind,
            Some(crate::empdag::RootKind::Equil)
        );

        // each player's payoff at the symmetric equilibrium xᵢ = 1/(n+1):
        // xᵢ(1 - Σxⱼ) = (1/6)(1 - 5/6)
        let point = vec![1.0 / 6.0; n];
        for i in 0..n {
            let eobj = dst.empdag.mp(MpId::from(i)).unwrap().objequ();
            let val = dst.ctr.eval_equ(eobj, &point).unwrap();
            assert_relative_eq!(val, 1.0 / 36.0, epsilon = 1e-12);
        }
    }

    /// Linear quantile regression through the Fenchel rewrite: the CVaR
    /// of the residuals over ten deterministic samples
    #[test]
    fn test_quantile_regression_fenchel() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let n = 10;
        let mut rng = StdRng::seed_from_u64(1000);
        let samples: Vec<(f64, f64)> = (0..n)
            .map(|_| {
                let t: f64 = rng.gen_range(-1.0..1.0);
                let noise: f64 = rng.gen_range(-0.5..0.5);
                (t, 2.0 + 0.5 * t + noise)
            })
            .collect();

        let mut src = Model::new(Backend::Rhp);
        src.sense = Sense::Min;
        let c = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let gamma = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let obj = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let rho = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();

        // residual mappings uᵢ = yᵢ - c - γ tᵢ
        let args = src.ctr.add_free_vars(n).unwrap();
        for (i, &(t, y)) in samples.iter().enumerate() {
            let ui = args.get(i).unwrap();
            let e = src.ctr.add_equality().unwrap();
            src.ctr.equ_add_new_linear_var(e, ui, 1.0).unwrap();
            src.ctr.equ_add_new_linear_var(e, c, 1.0).unwrap();
            src.ctr.equ_add_new_linear_var(e, gamma, t).unwrap();
            src.ctr.equ_set_rhs(e, y).unwrap();
            src.ctr.sync_lequ(e).unwrap();
        }

        let eobj = src.ctr.add_equality().unwrap();
        src.ctr.equ_add_new_linear_var(eobj, obj, -1.0).unwrap();
        src.ctr.equ_add_new_linear_var(eobj, rho, 1.0).unwrap();
        src.ctr.sync_lequ(eobj).unwrap();
        src.objvar = obj;
        src.objequ = eobj;

        let ovf = src.ovf_add("cvarup", rho, args).unwrap();
        src.ovf_param_add_scalar(ovf, "tail", 0.9).unwrap();
        src.ovf_set_reformulation(ovf, "fenchel").unwrap();

        let n_vars_before = src.ctr.n_vars();
        let dst = process(&src, &ProcessOptions::default()).unwrap();

        // one simplex multiplier + ten bound multipliers
        assert_eq!(dst.ctr.n_vars(), n_vars_before + 11);
        // residual mappings + rewritten objective + objfn + ten rows
        assert_eq!(dst.ctr.n_active_equs(), n + 1 + 1 + n);
        // the rewrite keeps the model linear
        assert_eq!(dst.mdltype, ModelType::Lp);
        // the source still holds its OVF untouched
        assert!(!src.ovf(ovf).unwrap().instantiated);
        assert!(dst.ovf(ovf).unwrap().instantiated);

        // processing the processed model changes nothing further
        let dst2 = process(&dst, &ProcessOptions::default()).unwrap();
        assert_eq!(dst2.ctr.n_vars(), dst.ctr.n_vars());
        assert_eq!(dst2.ctr.n_active_equs(), dst.ctr.n_active_equs());
    }

    /// Multi-stage risk-averse planning: a seven-node scenario tree with
    /// `ecvarup` nodes between stages, processed end to end
    #[test]
    fn test_multistage_ccf_scenario_tree() {
        let mut src = Model::new(Backend::Rhp);
        let prices = [8.0, 9.0, 10.0];

        // stage programs: a root and two subtrees of two leaves each
        let mut mps = Vec::new();
        let mut objequs = Vec::new();
        for node in 0..7 {
            let depth = if node == 0 {
                0
            } else if node < 3 {
                1
            } else {
                2
            };
            let mp = src
                .empdag
                .new_mp(Sense::Min, Some(format!("stage{node}")))
                .unwrap();
            let x = src.ctr.add_var(0.0, f64::INFINITY).unwrap();
            let e = src.ctr.add_equality().unwrap();
            src.ctr
                .equ_add_new_linear_var(e, x, -prices[depth])
                .unwrap();
            src.ctr.sync_lequ(e).unwrap();
            {
                let mp_ref = src.empdag.mp_mut(mp).unwrap();
                mp_ref.set_opt();
                mp_ref.set_objequ(e, &mut src.ctr).unwrap();
                mp_ref.add_var(x, &mut src.ctr).unwrap();
            }
            mps.push(mp);
            objequs.push(e);
        }

        // risk nodes between the stages
        let mut crms = Vec::new();
        for (parent, children) in [(0, [1, 2]), (1, [3, 4]), (2, [5, 6])] {
            let (crm, ovf) = src
                .ccflib_mp("ecvarup", Some(format!("crm{parent}")))
                .unwrap();
            src.ovf_param_add_scalar(ovf, "tail", 0.4).unwrap();
            src.ovf_param_add_scalar(ovf, "lambda", 0.5).unwrap();
            src.empdag
                .mp_add_mp_via_vf(mps[parent], crm, ArcVf::init(objequs[parent]))
                .unwrap();
            for child in children {
                src.empdag
                    .mp_add_mp_via_vf(crm, mps[child], ArcVf::init(EquIdx::NA))
                    .unwrap();
            }
            crms.push(crm);
        }
        src.empdag.compute_roots();

        let dst = process(&src, &ProcessOptions::default()).unwrap();
        assert_eq!(dst.mdltype, ModelType::Emp);
        dst.empdag.check_consistency().unwrap();

        // the Nash root pairs the planning root with the first risk node
        let nash = dst.empdag.uid_root.as_nash().expect("nash root");
        assert_eq!(dst.empdag.nashs.arcs[nash.idx()].len(), 2);

        // every risk node was instantiated into a max program with its
        // scenario-weight block and simplex row
        for &crm in &crms {
            let mp = dst.empdag.mp(crm).unwrap();
            assert!(mp.is_opt(), "crm node instantiated");
            assert_eq!(mp.sense, Sense::Max);
            assert_eq!(mp.num_vars(), 2);
            assert_eq!(mp.num_cons(&dst.ctr), 1);
        }

        // stage arcs bypass the risk nodes: root -> stage1, stage2
        let root_children: Vec<MpId> = dst.empdag.mps.varcs[mps[0].idx()]
            .iter()
            .map(|a| a.child)
            .collect();
        assert_eq!(root_children, vec![mps[1], mps[2]]);
        // the nested risk nodes hang off the first one as a dual subdag
        let crm0_children: Vec<MpId> = dst.empdag.mps.varcs[crms[0].idx()]
            .iter()
            .map(|a| a.child)
            .collect();
        assert_eq!(crm0_children, vec![crms[1], crms[2]]);

        // the source graph is untouched
        assert!(src.empdag.mp(crms[0]).unwrap().is_ccflib());
    }
}
