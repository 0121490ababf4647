//! Reformulation of OVF/CCF occurrences
//!
//! Three families rewrite an optimal-value function into solver-ready
//! form:
//!
//! - [`equil`] - materialize the dual problem as a second player and wrap
//!   both in a Nash node
//! - [`fenchel`] - primal-dual rewrite: multipliers price the set of `y`
//!   and the OVF variable is substituted in place
//! - [`conjugate`] - closed-form conjugate substitution, wired for the
//!   few templates whose dual has a closed form
//!
//! The family is selected per occurrence; reapplying a reformulator to an
//! occurrence that was already consumed is an `Ok` no-op.

pub mod ccflib_equil;
mod common;
pub mod conjugate;
pub mod equil;
pub mod fenchel;

use crate::error::Result;
use crate::model::Model;
use crate::ovf::Reformulation;

pub(crate) use common::*;

/// Apply the selected reformulation to one OVF occurrence
///
/// `default` applies when the occurrence does not carry an explicit
/// choice. Occurrences already instantiated are skipped.
pub fn reformulate_ovf(mdl: &mut Model, ovf_idx: usize, default: Reformulation) -> Result<()> {
    let def = mdl.ovf(ovf_idx)?;
    if def.instantiated {
        tracing::debug!(target: "reshop::refmt", ovf = ovf_idx, "already instantiated, skipping");
        return Ok(());
    }
    let choice = def.reformulation.unwrap_or(default);
    tracing::debug!(target: "reshop::refmt", ovf = ovf_idx, ?choice, template = %def.template,
                    "reformulating");
    match choice {
        Reformulation::Equilibrium => equil::ovf_equil(mdl, ovf_idx),
        Reformulation::Fenchel => fenchel::ovf_fenchel(mdl, ovf_idx),
        Reformulation::Conjugate => conjugate::ovf_conjugate(mdl, ovf_idx),
    }
}
