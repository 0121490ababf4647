//! Conjugate reformulation: closed-form substitution of the OVF value
//!
//! For the few templates whose conjugate has closed form the dual carries
//! no multipliers at all: the optimal value is written directly in place
//! of the OVF variable. Everything else reports `NotImplemented`; the
//! caller should fall back to the Fenchel or equilibrium family.

use crate::container::NlExpr;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::refmt::{equations_with_var, replace_mp_equ, weighted_affine_row};

/// Apply the conjugate reformulation to the OVF occurrence `ovf_idx`
pub fn ovf_conjugate(mdl: &mut Model, ovf_idx: usize) -> Result<()> {
    let def = mdl.ovf(ovf_idx)?.clone();
    let template = mdl.registry.get(&def.template)?.clone();
    let params = &def.params;

    let rho = def.var;
    if !rho.is_valid() {
        return Err(Error::not_implemented(
            "conjugate reformulation of CCFLIB programs".to_string(),
        ));
    }
    let rho_name = mdl.ctr.var_name(rho);

    let n_args = def.n_args();
    let n_y = template.size_y(n_args, params)?;
    let (b_mat, b_cst) = template.affine_transformation(n_args, params)?;

    /* ----------------------------------------------------------------------
     * The closed-form value, per template
     * ---------------------------------------------------------------------- */

    enum Closed {
        /// `½ Σᵢ G(F(x))ᵢ²`
        HalfSquare,
        /// `⟨t, G(F(x))⟩`
        Linear(Vec<f64>),
    }

    let closed = match template.name() {
        "l2" => Closed::HalfSquare,
        "expectation" => {
            let p = params.vector_or_uniform("probabilities", n_y);
            Closed::Linear(p)
        }
        name => {
            return Err(Error::not_implemented(format!(
                "conjugate reformulation for template '{name}'"
            )))
        }
    };

    let value_tree = match &closed {
        Closed::HalfSquare => {
            let mut squares = Vec::with_capacity(n_y);
            for i in 0..n_y {
                let mut unit = vec![0.0; n_y];
                unit[i] = 1.0;
                let (arg_coeffs, cst) = weighted_affine_row(
                    &unit,
                    &b_mat,
                    b_cst.as_deref(),
                    def.coeffs.as_deref(),
                    n_args,
                );
                let mut inner = Vec::new();
                for (j, &c) in arg_coeffs.iter().enumerate() {
                    if c == 0.0 {
                        continue;
                    }
                    let arg = def.args.get(j).ok_or_else(|| {
                        Error::index_out_of_range(format!("argument {j} missing"))
                    })?;
                    inner.push(NlExpr::Var(arg).scaled_copy(c));
                }
                if cst != 0.0 {
                    inner.push(NlExpr::Const(cst));
                }
                if inner.is_empty() {
                    continue;
                }
                let row = NlExpr::Sum(inner);
                squares.push(NlExpr::Mul(vec![row.clone(), row]));
            }
            NlExpr::Scaled(0.5, Box::new(NlExpr::Sum(squares)))
        }
        Closed::Linear(t) => {
            let (arg_coeffs, cst) = weighted_affine_row(
                t,
                &b_mat,
                b_cst.as_deref(),
                def.coeffs.as_deref(),
                n_args,
            );
            let mut terms = Vec::new();
            for (j, &c) in arg_coeffs.iter().enumerate() {
                if c == 0.0 {
                    continue;
                }
                let arg = def.args.get(j).ok_or_else(|| {
                    Error::index_out_of_range(format!("argument {j} missing"))
                })?;
                terms.push(NlExpr::Var(arg).scaled_copy(c));
            }
            if cst != 0.0 {
                terms.push(NlExpr::Const(cst));
            }
            NlExpr::Sum(terms)
        }
    };

    /* ----------------------------------------------------------------------
     * Substitute ρ in place
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
        match &closed {
            Closed::Linear(_) => {
                // keep a linear model linear: expand the tree as terms
                let NlExpr::Sum(terms) = &value_tree else {
                    unreachable!()
                };
                for t in terms {
                    match t {
                        NlExpr::Const(c) => mdl.ctr.equ_add_constant(ei_new, coeff * c)?,
                        NlExpr::Var(vi) => {
                            mdl.ctr.equ_add_new_linear_var(ei_new, *vi, coeff)?
                        }
                        NlExpr::Scaled(c, inner) => {
                            let NlExpr::Var(vi) = &**inner else { unreachable!() };
                            mdl.ctr.equ_add_new_linear_var(ei_new, *vi, coeff * c)?
                        }
                        _ => unreachable!(),
                    }
                }
            }
            Closed::HalfSquare => {
                mdl.ctr
                    .equ_add_nonlinear_expression(ei_new, &value_tree, coeff)?;
            }
        }
        mdl.ctr.sync_lequ(ei_new)?;
        replace_mp_equ(mdl, host, ei, ei_new)?;
    }

    // ρ is fully substituted; it leaves the model
    if mdl.ctr.var_meta(rho)?.mp.is_regular() {
        let owner = mdl.ctr.var_meta(rho)?.mp;
        if mdl.empdag.mp(owner)?.vars.contains(rho) {
            mdl.empdag.mp_mut(owner)?.remove_var(rho, &mut mdl.ctr)?;
        }
    }
    mdl.ctr.var_delete(rho)?;

    mdl.ovf_mut(ovf_idx)?.instantiated = true;
    tracing::debug!(target: "reshop::refmt", ovf = ovf_idx, template = template.name(),
                    "conjugate reformulation done");
    Ok(())
}
