//! The model object: container + EMPDAG + metadata
//!
//! A model bundles the numeric container, the optional EMP graph, the OVF
//! definitions awaiting reformulation, and the classification data the
//! orchestrator maintains. The engine never solves; `solve` is delegated
//! to a downstream interface.

use crate::avar::Avar;
use crate::container::{Container, EquRole};
use crate::empdag::EmpDag;
use crate::error::{Error, Result};
use crate::idx::{EquIdx, VarIdx};
use crate::ovf::{OvfDef, OvfRegistry};
use crate::types::{Backend, ModelStatus, ModelType, Sense, SolveStatus};

/// A model owned by one processing pipeline
#[derive(Debug, Clone)]
pub struct Model {
    /// Backend the model was created for
    pub backend: Backend,
    /// Optional display name
    pub name: Option<String>,
    /// The numeric container
    pub ctr: Container,
    /// The EMP graph; empty for classical models
    pub empdag: EmpDag,
    /// Current classification
    pub mdltype: ModelType,
    /// Top-level sense, for models without an EMP graph
    pub sense: Sense,
    /// Top-level objective variable, for models without an EMP graph
    pub objvar: VarIdx,
    /// Top-level objective equation, for models without an EMP graph
    pub objequ: EquIdx,
    /// OVF occurrences attached to the model
    pub ovfs: Vec<OvfDef>,
    /// The template catalog in use
    pub registry: OvfRegistry,
    /// Status reported by the last solve
    pub modelstat: ModelStatus,
    /// Solver status reported by the last solve
    pub solvestat: SolveStatus,
}

impl Model {
    /// Create an empty model for a backend, with the built-in catalog
    pub fn new(backend: Backend) -> Self {
        Self::with_registry(backend, OvfRegistry::with_builtins())
    }

    /// Create an empty model with an explicit template catalog
    pub fn with_registry(backend: Backend, registry: OvfRegistry) -> Self {
        Self {
            backend,
            name: None,
            ctr: Container::new(),
            empdag: EmpDag::new(),
            mdltype: ModelType::Undefined,
            sense: Sense::Min,
            objvar: VarIdx::NA,
            objequ: EquIdx::NA,
            ovfs: Vec::new(),
            registry,
            modelstat: ModelStatus::default(),
            solvestat: SolveStatus::default(),
        }
    }

    /// Set the display name
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Total number of variables
    pub fn n_vars(&self) -> usize {
        self.ctr.n_vars()
    }

    /// Total number of equations
    pub fn n_equs(&self) -> usize {
        self.ctr.n_equs()
    }

    /// Top-level objective variable
    pub fn get_objvar(&self) -> VarIdx {
        self.objvar
    }

    /// Top-level objective equation
    pub fn get_objequ(&self) -> EquIdx {
        self.objequ
    }

    /// Top-level sense
    pub fn get_sense(&self) -> Sense {
        self.sense
    }

    /// Current classification
    pub fn get_type(&self) -> ModelType {
        self.mdltype
    }

    /// Status of the last solve
    pub fn get_modelstat(&self) -> ModelStatus {
        self.modelstat
    }

    /// Solver status of the last solve
    pub fn get_solvestat(&self) -> SolveStatus {
        self.solvestat
    }

    /// Display name of a variable
    pub fn var_name(&self, vi: VarIdx) -> String {
        self.ctr.var_name(vi)
    }

    /// Display name of an equation
    pub fn equ_name(&self, ei: EquIdx) -> String {
        self.ctr.equ_name(ei)
    }

    /// True when the model carries an EMP graph
    pub fn has_empdag(&self) -> bool {
        !self.empdag.is_empty()
    }

    /* ---------------------------------------------------------------------
     * OVF attach points
     * --------------------------------------------------------------------- */

    /// Attach an OVF occurrence: `var = template(args)`
    ///
    /// Returns the definition index for parameter and option setting.
    pub fn ovf_add(&mut self, template: &str, var: VarIdx, args: Avar) -> Result<usize> {
        if !self.registry.contains(template) {
            return Err(Error::invalid_argument(format!(
                "unknown OVF template '{template}'"
            )));
        }
        self.ctr.var_bounds(var)?;
        for arg in args.iter() {
            self.ctr.var_bounds(arg)?;
        }
        let idx = self.ovfs.len();
        self.ovfs.push(OvfDef::new(idx as u32, template, var, args));
        tracing::debug!(target: "reshop::ovf", template, ovf = idx, "OVF attached");
        Ok(idx)
    }

    /// Access an OVF definition
    pub fn ovf(&self, idx: usize) -> Result<&OvfDef> {
        self.ovfs.get(idx).ok_or_else(|| {
            Error::index_out_of_range(format!(
                "OVF index {idx} outside [0, {})",
                self.ovfs.len()
            ))
        })
    }

    /// Mutable access to an OVF definition
    pub fn ovf_mut(&mut self, idx: usize) -> Result<&mut OvfDef> {
        let len = self.ovfs.len();
        self.ovfs
            .get_mut(idx)
            .ok_or_else(|| Error::index_out_of_range(format!("OVF index {idx} outside [0, {len})")))
    }

    /// Add a scalar parameter to an OVF definition
    pub fn ovf_param_add_scalar(&mut self, idx: usize, name: &str, val: f64) -> Result<()> {
        self.ovf_mut(idx)?.params.add_scalar(name, val);
        Ok(())
    }

    /// Add a vector parameter to an OVF definition
    pub fn ovf_param_add_vector(&mut self, idx: usize, name: &str, vals: Vec<f64>) -> Result<()> {
        self.ovf_mut(idx)?.params.add_vector(name, vals);
        Ok(())
    }

    /// Select the reformulation of an OVF definition by name
    pub fn ovf_set_reformulation(&mut self, idx: usize, name: &str) -> Result<()> {
        self.ovf_mut(idx)?.set_reformulation(name)
    }

    /// Create a CCF-library MP: a node whose whole problem is one catalog
    /// template, its arguments given by the node's VF children
    ///
    /// Returns the node id and the index of the backing OVF definition.
    pub fn ccflib_mp(
        &mut self,
        template: &str,
        name: Option<String>,
    ) -> Result<(crate::idx::MpId, usize)> {
        let sense = self.registry.get(template)?.sense();
        let mp_id = self.empdag.new_mp(sense, name)?;
        let idx = self.ovfs.len();
        self.ovfs
            .push(OvfDef::new(idx as u32, template, VarIdx::NA, Avar::empty()));
        self.empdag.mp_mut(mp_id)?.set_ccflib(idx as u32);
        Ok((mp_id, idx))
    }

    /// Validate every OVF definition against the catalog
    pub fn ovf_check(&self) -> Result<()> {
        for def in &self.ovfs {
            def.check(&self.registry)?;
        }
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Classification
     * --------------------------------------------------------------------- */

    /// Classify the model from per-equation expression statistics
    ///
    /// The EMP type is not produced here; the orchestrator sets it when a
    /// nontrivial graph remains after reformulation.
    pub fn classify_modeltype(&self) -> ModelType {
        let mut has_nl = false;
        let mut quad_in_cons = false;
        let mut quad_in_obj = false;
        for i in 0..self.ctr.n_equs() {
            let ei = EquIdx::from(i);
            let Ok(equ) = self.ctr.equ(ei) else { continue };
            if equ.is_nonlinear() {
                has_nl = true;
                continue;
            }
            if !equ.quad.is_empty() {
                let is_obj = self.objequ == ei
                    || self
                        .ctr
                        .equ_meta(ei)
                        .map(|m| m.role == EquRole::Objective)
                        .unwrap_or(false);
                if is_obj {
                    quad_in_obj = true;
                } else {
                    quad_in_cons = true;
                }
            }
        }
        let has_int = (0..self.ctr.n_vars()).any(|i| {
            self.ctr
                .var_is_integer(VarIdx::from(i))
                .unwrap_or(false)
        });
        match (has_nl, quad_in_cons, quad_in_obj, has_int) {
            (true, _, _, false) => ModelType::Nlp,
            (true, _, _, true) => ModelType::Minlp,
            (false, true, _, _) => ModelType::Qcp,
            (false, false, true, _) => ModelType::Qp,
            (false, false, false, true) => ModelType::Mip,
            (false, false, false, false) => ModelType::Lp,
        }
    }

    /// Delegated to the downstream solver interface; the engine itself
    /// never solves.
    pub fn solve(&mut self) -> Result<()> {
        Err(Error::not_implemented(
            "solving is delegated to the downstream solver interface".to_string(),
        ))
    }

    /// Propagate objective-variable values after a solve
    ///
    /// For every MP whose objective variable is explicitly defined by its
    /// objective equation, solve the equation for that variable at the
    /// current point and store the value.
    pub fn postprocess(&mut self) -> Result<()> {
        let point: Vec<f64> = (0..self.ctr.n_vars())
            .map(|i| self.ctr.var_value(VarIdx::from(i)).unwrap_or(0.0))
            .collect();
        let updates: Vec<(VarIdx, f64)> = self
            .empdag
            .mps
            .arr
            .iter()
            .filter_map(|mp| {
                let crate::mp::MpData::Opt(opt) = &mp.data else {
                    return None;
                };
                if !opt.objvarval2objequval || !opt.objvar.is_valid() || !opt.objequ.is_valid() {
                    return None;
                }
                let total = self.ctr.eval_equ(opt.objequ, &point).ok()?;
                let coeff = self.ctr.equ(opt.objequ).ok()?.lin_coeff(opt.objvar);
                if coeff == 0.0 {
                    return None;
                }
                let rest = total - coeff * point[opt.objvar.idx()];
                Some((opt.objvar, -rest / coeff))
            })
            .collect();
        for (vi, val) in updates {
            self.ctr.var_set_value(vi, val)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lp_classification() {
        let mut mdl = Model::new(Backend::Rhp);
        let x = mdl.ctr.add_var(0.0, f64::INFINITY).unwrap();
        let e = mdl.ctr.add_greaterthan().unwrap();
        mdl.ctr.equ_add_new_linear_var(e, x, 1.0).unwrap();
        mdl.ctr.sync_lequ(e).unwrap();
        assert_eq!(mdl.classify_modeltype(), ModelType::Lp);
    }

    #[test]
    fn test_qp_vs_qcp() {
        let mut mdl = Model::new(Backend::Rhp);
        let x = mdl.ctr.add_var(0.0, f64::INFINITY).unwrap();
        let eobj = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_bilinear(eobj, x, x, 2.0).unwrap();
        mdl.ctr.sync_lequ(eobj).unwrap();
        mdl.objequ = eobj;
        assert_eq!(mdl.classify_modeltype(), ModelType::Qp);

        // a quadratic constraint pushes it to QCP
        let econ = mdl.ctr.add_lessthan().unwrap();
        mdl.ctr.equ_add_bilinear(econ, x, x, 1.0).unwrap();
        mdl.ctr.sync_lequ(econ).unwrap();
        assert_eq!(mdl.classify_modeltype(), ModelType::Qcp);
    }

    #[test]
    fn test_integer_classification() {
        let mut mdl = Model::new(Backend::Rhp);
        let x = mdl.ctr.add_var(0.0, 10.0).unwrap();
        mdl.ctr.var_set_integer(x).unwrap();
        let e = mdl.ctr.add_lessthan().unwrap();
        mdl.ctr.equ_add_new_linear_var(e, x, 1.0).unwrap();
        mdl.ctr.sync_lequ(e).unwrap();
        assert_eq!(mdl.classify_modeltype(), ModelType::Mip);
    }

    #[test]
    fn test_ovf_attach_validates() {
        let mut mdl = Model::new(Backend::Rhp);
        let rho = mdl.ctr.add_var(f64::NEG_INFINITY, f64::INFINITY).unwrap();
        let args = mdl.ctr.add_free_vars(2).unwrap();
        assert!(mdl.ovf_add("no_such_loss", rho, args.clone()).is_err());
        let idx = mdl.ovf_add("l1", rho, args).unwrap();
        mdl.ovf_set_reformulation(idx, "fenchel").unwrap();
        mdl.ovf_check().unwrap();
        assert!(mdl.ovf_set_reformulation(idx, "bogus").is_err());
    }

    #[test]
    fn test_postprocess_recovers_objvar() {
        let mut mdl = Model::new(Backend::Rhp);
        let mp_id = mdl
            .empdag
            .new_mp(crate::types::Sense::Min, None)
            .unwrap();
        let x = mdl.ctr.add_var(0.0, 10.0).unwrap();
        let z = mdl.ctr.add_free_vars(1).unwrap().get(0).unwrap();
        let e = mdl.ctr.add_equality().unwrap();
        mdl.ctr.equ_add_new_linear_var(e, z, -1.0).unwrap();
        mdl.ctr.equ_add_new_linear_var(e, x, 3.0).unwrap();
        mdl.ctr.sync_lequ(e).unwrap();
        {
            let mp = mdl.empdag.mp_mut(mp_id).unwrap();
            mp.set_opt();
            mp.set_objvar(z, &mut mdl.ctr).unwrap();
            mp.set_objequ(e, &mut mdl.ctr).unwrap();
            mp.set_objvar_defined(&mut mdl.ctr).unwrap();
        }
        mdl.ctr.var_set_value(x, 2.0).unwrap();
        mdl.postprocess().unwrap();
        // z solves -z + 3x = 0 at x = 2
        approx::assert_relative_eq!(mdl.ctr.var_value(z).unwrap(), 6.0);
    }

    #[test]
    fn test_solve_is_delegated() {
        let mut mdl = Model::new(Backend::Gams);
        assert!(matches!(mdl.solve(), Err(Error::NotImplemented(_))));
    }
}
