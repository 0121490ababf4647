//! # reshop
//!
//! A reformulation engine for Extended Mathematical Programming (EMP):
//! hierarchies of optimization problems, variational inequalities, Nash
//! equilibria, and optimal-value/composite-convex functions (OVF/CCF) are
//! lowered to forms classical nonlinear and complementarity solvers
//! understand.
//!
//! ## Modules
//!
//! - [`container`] - variables, equations, and their metadata
//! - [`empdag`] - the typed graph of programs and Nash nodes, with its
//!   static analysis
//! - [`mp`] - mathematical programs, the nodes of the graph
//! - [`ovf`] - the catalog of OVF/CCF templates
//! - [`refmt`] - the equilibrium, Fenchel, and conjugate reformulators
//! - [`process`] - the orchestrator turning a source model into a
//!   solver-ready one
//!
//! ## Quick Start
//!
//! ```rust
//! use reshop::prelude::*;
//!
//! // min z  with  z = rho + x  and  rho = l1(x)
//! let mut src = Model::new(Backend::Rhp);
//! src.sense = Sense::Min;
//! let z = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
//! let x = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
//! let rho = src.ctr.add_free_vars(1).unwrap().get(0).unwrap();
//! let e = src.ctr.add_equality().unwrap();
//! src.ctr.equ_add_new_linear_var(e, z, -1.0).unwrap();
//! src.ctr.equ_add_new_linear_var(e, x, 1.0).unwrap();
//! src.ctr.equ_add_new_linear_var(e, rho, 1.0).unwrap();
//! src.ctr.sync_lequ(e).unwrap();
//! src.objvar = z;
//! src.objequ = e;
//!
//! let ovf = src.ovf_add("l1", rho, Avar::list(vec![x])).unwrap();
//! src.ovf_set_reformulation(ovf, "fenchel").unwrap();
//!
//! let dst = process(&src, &ProcessOptions::default()).unwrap();
//! assert!(dst.get_type().is_classical());
//! ```
//!
//! ## Scope
//!
//! The engine rewrites model structure; it does not solve, print
//! equations, or persist state. Each model is an isolated tree of owned
//! data - many models may be processed concurrently, one thread each.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod avar;
pub mod cones;
pub mod container;
pub mod empdag;
pub mod mat;
pub mod model;
pub mod mp;
pub mod ovf;
pub mod process;
pub mod refmt;
pub mod types;

mod error;
mod idx;

pub use error::{Diagnostic, Diagnostics, Error, Result, Severity};
pub use idx::{EdgeKind, EquIdx, IdxList, MpId, MpSpecial, NashId, NodeKind, NodeUid, VarIdx};

/// Prelude for common imports
pub mod prelude {
    pub use crate::avar::{Aequ, Avar};
    pub use crate::cones::Cone;
    pub use crate::empdag::{ArcVf, EmpDag};
    pub use crate::model::Model;
    pub use crate::mp::MathPrgm;
    pub use crate::ovf::{OvfRegistry, Reformulation};
    pub use crate::process::{process, ProcessOptions};
    pub use crate::types::{Backend, ModelType, Sense};
    pub use crate::{EquIdx, MpId, NashId, NodeUid, VarIdx};
    pub use crate::{Error, Result};
}
