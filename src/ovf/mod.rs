//! OVF/CCF definitions and the template catalog
//!
//! An [`OvfDef`] records one occurrence of an optimal-value function in a
//! model: which template it instantiates, the variable it replaces (or the
//! CCFLIB program it defines), its arguments, parameters, and the selected
//! reformulation. The catalog is a name-indexed registry of
//! [`OvfTemplate`] trait objects.

pub mod template;
pub mod templates;

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::avar::Avar;
use crate::error::{Error, Result};
use crate::idx::{EquIdx, VarIdx};

pub use template::{OvfPpty, OvfTemplate};

/// Reformulation family applied to an OVF occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reformulation {
    /// Dual player in a Nash equilibrium
    #[default]
    Equilibrium,
    /// Primal-dual (Fenchel) rewrite
    Fenchel,
    /// Closed-form conjugate substitution
    Conjugate,
}

impl std::str::FromStr for Reformulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "equilibrium" => Ok(Reformulation::Equilibrium),
            "fenchel" => Ok(Reformulation::Fenchel),
            "conjugate" => Ok(Reformulation::Conjugate),
            other => Err(Error::invalid_argument(format!(
                "unknown reformulation '{other}'; expected equilibrium, fenchel, or conjugate"
            ))),
        }
    }
}

/// Named parameters of an OVF instance
#[derive(Debug, Clone, Default)]
pub struct OvfParams {
    scalars: IndexMap<String, f64>,
    vectors: IndexMap<String, Vec<f64>>,
}

impl OvfParams {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a scalar parameter
    pub fn add_scalar(&mut self, name: impl Into<String>, val: f64) {
        self.scalars.insert(name.into(), val);
    }

    /// Add or replace a vector parameter
    pub fn add_vector(&mut self, name: impl Into<String>, vals: Vec<f64>) {
        self.vectors.insert(name.into(), vals);
    }

    /// A required scalar parameter
    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| Error::OvfMissingParam(name.to_string()))
    }

    /// An optional scalar parameter with a default
    pub fn scalar_or(&self, name: &str, default: f64) -> f64 {
        self.scalars.get(name).copied().unwrap_or(default)
    }

    /// A required vector parameter
    pub fn vector(&self, name: &str) -> Result<&[f64]> {
        self.vectors
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::OvfMissingParam(name.to_string()))
    }

    /// A vector parameter, defaulting to the uniform distribution on `n`
    pub fn vector_or_uniform(&self, name: &str, n: usize) -> Vec<f64> {
        match self.vectors.get(name) {
            Some(v) => v.clone(),
            None => vec![1.0 / n as f64; n],
        }
    }

    /// Verify every stored value is finite
    pub fn check_finite(&self) -> Result<()> {
        for (name, v) in &self.scalars {
            if !v.is_finite() {
                return Err(Error::MathError(format!(
                    "parameter '{name}' is not finite: {v}"
                )));
            }
        }
        for (name, vals) in &self.vectors {
            if vals.iter().any(|v| !v.is_finite()) {
                return Err(Error::MathError(format!(
                    "parameter '{name}' has a non-finite entry"
                )));
            }
        }
        Ok(())
    }
}

/// One OVF/CCF occurrence in a model
#[derive(Debug, Clone)]
pub struct OvfDef {
    /// Index of this definition within the model
    pub idx: u32,
    /// Template name in the catalog
    pub template: String,
    /// The OVF variable replaced by the reformulation (`NA` for CCFLIB MPs)
    pub var: VarIdx,
    /// Argument variables
    pub args: Avar,
    /// Defining mapping of each argument, when one exists
    pub mappings: Vec<EquIdx>,
    /// Per-argument scaling, defaulting to one
    pub coeffs: Option<Vec<f64>>,
    /// Instance parameters
    pub params: OvfParams,
    /// Selected reformulation; the orchestrator default applies when unset
    pub reformulation: Option<Reformulation>,
    /// Set once a reformulator consumed this definition
    pub instantiated: bool,
}

impl OvfDef {
    /// Create a definition for the OVF variable `var` applied to `args`
    pub fn new(idx: u32, template: impl Into<String>, var: VarIdx, args: Avar) -> Self {
        let n_args = args.size();
        Self {
            idx,
            template: template.into(),
            var,
            args,
            mappings: vec![EquIdx::NA; n_args],
            coeffs: None,
            params: OvfParams::new(),
            reformulation: None,
            instantiated: false,
        }
    }

    /// Number of arguments
    pub fn n_args(&self) -> usize {
        self.args.size()
    }

    /// Select the reformulation by name
    pub fn set_reformulation(&mut self, name: &str) -> Result<()> {
        self.reformulation = Some(name.parse()?);
        Ok(())
    }

    /// Validate the definition against the catalog
    ///
    /// A CCFLIB definition (no OVF variable) takes its arity from the VF
    /// children of its program, so only its parameters are checked here.
    pub fn check(&self, registry: &OvfRegistry) -> Result<()> {
        let template = registry.get(&self.template)?;
        self.params.check_finite()?;
        if !self.var.is_valid() && self.args.is_empty() {
            return Ok(());
        }
        if let Some(coeffs) = &self.coeffs {
            if coeffs.len() != self.n_args() {
                return Err(Error::dimension_mismatch(self.n_args(), coeffs.len()));
            }
        }
        if self.mappings.len() != self.n_args() {
            return Err(Error::dimension_mismatch(self.n_args(), self.mappings.len()));
        }
        template.check(self.n_args(), &self.params)
    }
}

/// The catalog: template name to implementation
#[derive(Clone)]
pub struct OvfRegistry {
    templates: IndexMap<&'static str, Arc<dyn OvfTemplate>>,
}

impl OvfRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            templates: IndexMap::new(),
        }
    }

    /// Create the registry holding the full built-in catalog
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for template in templates::builtins() {
            registry.register(template);
        }
        registry
    }

    /// Register a template
    pub fn register(&mut self, template: Arc<dyn OvfTemplate>) {
        self.templates.insert(template.name(), template);
    }

    /// Look up a template by name
    pub fn get(&self, name: &str) -> Result<&Arc<dyn OvfTemplate>> {
        self.templates.get(name).ok_or_else(|| {
            Error::invalid_argument(format!("unknown OVF template '{name}'"))
        })
    }

    /// Membership test
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered template names, in registration order
    pub fn list(&self) -> Vec<&'static str> {
        self.templates.keys().copied().collect()
    }

    /// Number of registered templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when no template is registered
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for OvfRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for OvfRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvfRegistry")
            .field("templates", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let registry = OvfRegistry::with_builtins();
        for name in [
            "l1",
            "l2",
            "elastic_net",
            "huber",
            "hinge",
            "vapnik",
            "hubnik",
            "expectation",
            "cvarup",
            "cvarlo",
            "ecvarup",
            "ecvarlo",
        ] {
            assert!(registry.contains(name), "missing template '{name}'");
        }
    }

    #[test]
    fn test_unknown_template() {
        let registry = OvfRegistry::with_builtins();
        assert!(registry.get("unknown_loss").is_err());
    }

    #[test]
    fn test_missing_param() {
        let params = OvfParams::new();
        assert!(matches!(
            params.scalar("tail"),
            Err(Error::OvfMissingParam(_))
        ));
    }

    #[test]
    fn test_reformulation_parse() {
        assert_eq!(
            "fenchel".parse::<Reformulation>().unwrap(),
            Reformulation::Fenchel
        );
        assert!("dual".parse::<Reformulation>().is_err());
    }

    #[test]
    fn test_ovf_check() {
        let registry = OvfRegistry::with_builtins();
        let mut def = OvfDef::new(
            0,
            "cvarup",
            VarIdx::new(0),
            Avar::compact(3, VarIdx::new(1)),
        );
        // tail is required
        assert!(matches!(
            def.check(&registry),
            Err(Error::OvfMissingParam(_))
        ));
        def.params.add_scalar("tail", 0.2);
        def.check(&registry).unwrap();
    }
}
