//! Mathematical programs: the nodes of the EMPDAG
//!
//! A [`MathPrgm`] owns a set of variables and equations (by index; the
//! storage belongs to the container), an optimization sense, and a payload
//! depending on its kind: optimization data, VI bookkeeping, or a CCF
//! library definition awaiting reformulation.

use crate::container::{Container, EquRole, VarPpty, VarRole};
use crate::error::{Error, Result};
use crate::idx::{EquIdx, IdxList, MpId, VarIdx};
use crate::types::{ModelType, Sense};

/// Data of an optimization MP
#[derive(Debug, Clone)]
pub struct MpOpt {
    /// Objective variable, when one is set
    pub objvar: VarIdx,
    /// Objective equation, when one is set
    pub objequ: EquIdx,
    /// Coefficient of the objective variable in the objective equation
    pub objcoef: f64,
    /// Propagate the objective variable value into the objective equation
    /// during postprocessing
    pub objvarval2objequval: bool,
}

impl Default for MpOpt {
    fn default() -> Self {
        Self {
            objvar: VarIdx::NA,
            objequ: EquIdx::NA,
            objcoef: 1.0,
            objvarval2objequval: false,
        }
    }
}

/// Data of a variational-inequality MP: `0 ∈ F(x) + N_X(x)`
#[derive(Debug, Clone, Copy, Default)]
pub struct MpVi {
    /// Number of constraints defining `X`
    pub num_cons: u32,
    /// Number of zero functions (`Fᵢ(x) ≡ 0`)
    pub num_zeros: u32,
    /// Number of matched function/variable pairs
    pub num_matches: u32,
}

/// Kind-specific payload of an MP
#[derive(Debug, Clone, Default)]
pub enum MpData {
    /// Kind not yet chosen
    #[default]
    Undef,
    /// Optimization problem
    Opt(MpOpt),
    /// Variational inequality
    Vi(MpVi),
    /// CCF library instance, by OVF definition index
    Ccflib(u32),
}

impl MpData {
    /// Short name of the kind, for diagnostics
    pub fn kind_str(&self) -> &'static str {
        match self {
            MpData::Undef => "undef",
            MpData::Opt(_) => "opt",
            MpData::Vi(_) => "vi",
            MpData::Ccflib(_) => "ccflib",
        }
    }
}

/// A mathematical program
#[derive(Debug, Clone)]
pub struct MathPrgm {
    /// Node id in the EMPDAG
    pub id: MpId,
    /// Optimization sense
    pub sense: Sense,
    /// Kind-specific payload
    pub data: MpData,
    /// Problem type hint set during reformulation
    pub probtype: Option<ModelType>,
    finalized: bool,
    /// Owned variables, strictly sorted
    pub vars: IdxList<VarIdx>,
    /// Owned equations, strictly sorted
    pub equs: IdxList<EquIdx>,
}

impl MathPrgm {
    /// Create an MP with no payload
    pub fn new(id: MpId, sense: Sense) -> Self {
        Self {
            id,
            sense,
            data: MpData::Undef,
            probtype: None,
            finalized: false,
            vars: IdxList::new(),
            equs: IdxList::new(),
        }
    }

    /// Turn the MP into an optimization problem
    pub fn set_opt(&mut self) {
        self.data = MpData::Opt(MpOpt::default());
    }

    /// Turn the MP into a variational inequality
    pub fn set_vi(&mut self) {
        self.data = MpData::Vi(MpVi::default());
    }

    /// Turn the MP into a CCF library instance
    pub fn set_ccflib(&mut self, ovf_idx: u32) {
        self.data = MpData::Ccflib(ovf_idx);
    }

    /// True once [`MathPrgm::finalize`] succeeded
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Reopen a sealed program for reformulation edits
    ///
    /// Only the reformulators use this; they re-finalize once the rewrite
    /// is complete.
    pub(crate) fn unseal(&mut self) {
        self.finalized = false;
    }

    /// True for an optimization MP
    pub fn is_opt(&self) -> bool {
        matches!(self.data, MpData::Opt(_))
    }

    /// True for a VI MP
    pub fn is_vi(&self) -> bool {
        matches!(self.data, MpData::Vi(_))
    }

    /// True for a CCF library MP
    pub fn is_ccflib(&self) -> bool {
        matches!(self.data, MpData::Ccflib(_))
    }

    /// The OVF definition index of a CCF library MP
    pub fn ccflib_idx(&self) -> Option<u32> {
        match self.data {
            MpData::Ccflib(i) => Some(i),
            _ => None,
        }
    }

    /// Objective equation, if one is set
    pub fn objequ(&self) -> EquIdx {
        match &self.data {
            MpData::Opt(opt) => opt.objequ,
            _ => EquIdx::NA,
        }
    }

    /// Objective variable, if one is set
    pub fn objvar(&self) -> VarIdx {
        match &self.data {
            MpData::Opt(opt) => opt.objvar,
            _ => VarIdx::NA,
        }
    }

    /// Coefficient of the objective variable in the objective equation
    pub fn objcoef(&self) -> f64 {
        match &self.data {
            MpData::Opt(opt) => opt.objcoef,
            _ => 1.0,
        }
    }

    fn opt_mut(&mut self) -> Result<&mut MpOpt> {
        match &mut self.data {
            MpData::Opt(opt) => Ok(opt),
            other => Err(Error::invalid_argument(format!(
                "MP({}) has kind '{}', not 'opt'",
                self.id,
                other.kind_str()
            ))),
        }
    }

    /* ---------------------------------------------------------------------
     * Ownership
     * --------------------------------------------------------------------- */

    /// Add a variable to the MP and record ownership in the container
    pub fn add_var(&mut self, vi: VarIdx, ctr: &mut Container) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_argument(format!(
                "MP({}) is finalized; variables can no longer be added",
                self.id
            )));
        }
        let existing_mp = ctr.var_meta_mut(vi)?.mp;
        if existing_mp.is_valid() && existing_mp != self.id {
            return Err(Error::Inconsistency(format!(
                "variable '{}' already belongs to MP({})",
                ctr.var_name(vi),
                existing_mp
            )));
        }
        let meta = ctr.var_meta_mut(vi)?;
        meta.mp = self.id;
        if meta.role == VarRole::Undefined {
            meta.role = VarRole::Primal;
        }
        self.vars.insert(vi);
        tracing::trace!(target: "reshop::mp", mp = %self.id, %vi, "add variable");
        Ok(())
    }

    /// Add a block of variables
    pub fn add_vars(&mut self, block: &crate::avar::Avar, ctr: &mut Container) -> Result<()> {
        for vi in block.iter() {
            self.add_var(vi, ctr)?;
        }
        Ok(())
    }

    /// Add an equation without a role (the caller sets one)
    pub fn add_equ(&mut self, ei: EquIdx, ctr: &mut Container) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_argument(format!(
                "MP({}) is finalized; equations can no longer be added",
                self.id
            )));
        }
        let existing_mp = ctr.equ_meta_mut(ei)?.mp;
        if existing_mp.is_valid() && existing_mp != self.id {
            return Err(Error::Inconsistency(format!(
                "equation '{}' already belongs to MP({})",
                ctr.equ_name(ei),
                existing_mp
            )));
        }
        let meta = ctr.equ_meta_mut(ei)?;
        meta.mp = self.id;
        self.equs.insert(ei);
        Ok(())
    }

    /// Add a constraint equation
    pub fn add_constraint(&mut self, ei: EquIdx, ctr: &mut Container) -> Result<()> {
        self.add_equ(ei, ctr)?;
        ctr.equ_meta_mut(ei)?.role = EquRole::Constraint;
        if let MpData::Vi(vi_data) = &mut self.data {
            vi_data.num_cons += 1;
        }
        Ok(())
    }

    /// Add a matched VI pair: the function `ei` is perpendicular to `vi`
    ///
    /// An invalid `ei` records a zero function paired with the variable.
    pub fn add_vi_pair(&mut self, ei: EquIdx, vi: VarIdx, ctr: &mut Container) -> Result<()> {
        if !self.is_vi() {
            return Err(Error::invalid_argument(format!(
                "MP({}) has kind '{}'; VI pairs require kind 'vi'",
                self.id,
                self.data.kind_str()
            )));
        }
        self.add_var(vi, ctr)?;
        if ei.is_valid() {
            self.add_equ(ei, ctr)?;
            ctr.equ_meta_mut(ei)?.role = EquRole::ViFunction;
            ctr.equ_meta_mut(ei)?.dual = vi;
            ctr.var_meta_mut(vi)?.dual = ei;
        }
        let MpData::Vi(vi_data) = &mut self.data else {
            unreachable!()
        };
        vi_data.num_matches += 1;
        if !ei.is_valid() {
            vi_data.num_zeros += 1;
        }
        Ok(())
    }

    /// Remove a variable from the MP
    pub fn remove_var(&mut self, vi: VarIdx, ctr: &mut Container) -> Result<()> {
        if !self.vars.remove(vi) {
            return Err(Error::invalid_argument(format!(
                "variable '{}' does not belong to MP({})",
                ctr.var_name(vi),
                self.id
            )));
        }
        ctr.var_meta_mut(vi)?.mp = MpId::NA;
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Objective data
     * --------------------------------------------------------------------- */

    /// Set the objective equation (at most one)
    pub fn set_objequ(&mut self, ei: EquIdx, ctr: &mut Container) -> Result<()> {
        if let MpData::Undef = self.data {
            self.set_opt();
        }
        let id = self.id;
        let opt = self.opt_mut()?;
        if opt.objequ.is_valid() && opt.objequ != ei {
            return Err(Error::invalid_argument(format!(
                "MP({id}) already has objective equation '{}'",
                opt.objequ
            )));
        }
        opt.objequ = ei;
        let meta = ctr.equ_meta_mut(ei)?;
        meta.mp = id;
        meta.role = EquRole::Objective;
        self.equs.insert(ei);
        Ok(())
    }

    /// Set the objective variable (at most one)
    pub fn set_objvar(&mut self, vi: VarIdx, ctr: &mut Container) -> Result<()> {
        if let MpData::Undef = self.data {
            self.set_opt();
        }
        let id = self.id;
        let sense = self.sense;
        let opt = self.opt_mut()?;
        if opt.objvar.is_valid() && opt.objvar != vi {
            return Err(Error::invalid_argument(format!(
                "MP({id}) already has objective variable '{}'",
                opt.objvar
            )));
        }
        opt.objvar = vi;
        let meta = ctr.var_meta_mut(vi)?;
        meta.mp = id;
        meta.role = VarRole::Objective;
        meta.ppty.set(match sense {
            Sense::Max => VarPpty::OBJ_MAX,
            _ => VarPpty::OBJ_MIN,
        });
        self.vars.insert(vi);
        Ok(())
    }

    /// Set the coefficient of the objective variable
    pub fn set_objcoef(&mut self, coef: f64) -> Result<()> {
        self.opt_mut()?.objcoef = coef;
        Ok(())
    }

    /// Mark the objective variable as explicitly defined by the objective
    /// equation; its value is then recovered during postprocessing.
    pub fn set_objvar_defined(&mut self, ctr: &mut Container) -> Result<()> {
        let id = self.id;
        let opt = self.opt_mut()?;
        let objvar = opt.objvar;
        if !objvar.is_valid() {
            return Err(Error::NotInitialized(format!(
                "MP({id}) has no objective variable"
            )));
        }
        opt.objvarval2objequval = true;
        ctr.var_meta_mut(objvar)?
            .ppty
            .set(VarPpty::EXPLICITLY_DEFINED);
        Ok(())
    }

    /* ---------------------------------------------------------------------
     * Finalization
     * --------------------------------------------------------------------- */

    /// Seal the MP and check its invariants
    ///
    /// After this call every owned variable maps back to this MP through
    /// the container metadata, and an optimization MP has at least one of
    /// objective variable / objective equation.
    pub fn finalize(&mut self, ctr: &Container) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        for &vi in self.vars.iter() {
            let meta = ctr.var_meta(vi)?;
            if meta.mp != self.id {
                return Err(Error::runtime(format!(
                    "variable '{}' owned by MP({}) maps back to MP({})",
                    ctr.var_name(vi),
                    self.id,
                    meta.mp
                )));
            }
        }
        match &self.data {
            MpData::Undef => {
                return Err(Error::NotInitialized(format!(
                    "MP({}) has no kind; set opt/vi/ccflib before finalizing",
                    self.id
                )));
            }
            MpData::Opt(opt) => {
                if self.sense.is_optimizing()
                    && !opt.objvar.is_valid()
                    && !opt.objequ.is_valid()
                {
                    return Err(Error::NotInitialized(format!(
                        "MP({}) is an optimization problem without objective data",
                        self.id
                    )));
                }
            }
            MpData::Vi(_) | MpData::Ccflib(_) => {}
        }
        self.finalized = true;
        tracing::debug!(target: "reshop::mp", mp = %self.id, kind = self.data.kind_str(),
                        nvars = self.vars.len(), nequs = self.equs.len(), "finalized");
        Ok(())
    }

    /// True when the equation is a constraint of this MP
    pub fn is_constraint(&self, ei: EquIdx, ctr: &Container) -> bool {
        self.equs.contains(ei)
            && ctr
                .equ_meta(ei)
                .map(|m| m.role == EquRole::Constraint)
                .unwrap_or(false)
    }

    /// Number of owned variables
    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Number of constraints (VI MPs track them separately)
    pub fn num_cons(&self, ctr: &Container) -> usize {
        match &self.data {
            MpData::Vi(vi) => vi.num_cons as usize,
            _ => self
                .equs
                .iter()
                .filter(|&&ei| {
                    ctr.equ_meta(ei)
                        .map(|m| m.role == EquRole::Constraint)
                        .unwrap_or(false)
                })
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp_with_container() -> (MathPrgm, Container) {
        (MathPrgm::new(MpId::new(0), Sense::Min), Container::new())
    }

    #[test]
    fn test_ownership_roundtrip() {
        let (mut mp, mut ctr) = mp_with_container();
        let x = ctr.add_var(0.0, f64::INFINITY).unwrap();
        mp.add_var(x, &mut ctr).unwrap();
        assert_eq!(ctr.var_meta(x).unwrap().mp, mp.id);
        assert!(mp.vars.contains(x));
    }

    #[test]
    fn test_ownership_conflict() {
        let mut ctr = Container::new();
        let mut mp0 = MathPrgm::new(MpId::new(0), Sense::Min);
        let mut mp1 = MathPrgm::new(MpId::new(1), Sense::Max);
        let x = ctr.add_var(0.0, 1.0).unwrap();
        mp0.add_var(x, &mut ctr).unwrap();
        assert!(matches!(
            mp1.add_var(x, &mut ctr),
            Err(Error::Inconsistency(_))
        ));
    }

    #[test]
    fn test_sorted_ownership_lists() {
        let (mut mp, mut ctr) = mp_with_container();
        let a = ctr.add_var(0.0, 1.0).unwrap();
        let b = ctr.add_var(0.0, 1.0).unwrap();
        let c = ctr.add_var(0.0, 1.0).unwrap();
        mp.add_var(c, &mut ctr).unwrap();
        mp.add_var(a, &mut ctr).unwrap();
        mp.add_var(b, &mut ctr).unwrap();
        mp.add_var(b, &mut ctr).unwrap(); // duplicate is a no-op
        assert_eq!(mp.vars.as_slice(), &[a, b, c]);
    }

    #[test]
    fn test_single_objective() {
        let (mut mp, mut ctr) = mp_with_container();
        let e0 = ctr.add_equality().unwrap();
        let e1 = ctr.add_equality().unwrap();
        mp.set_objequ(e0, &mut ctr).unwrap();
        assert!(mp.set_objequ(e1, &mut ctr).is_err());
        assert_eq!(mp.objequ(), e0);
    }

    #[test]
    fn test_finalize_requires_objective() {
        let (mut mp, mut ctr) = mp_with_container();
        mp.set_opt();
        let x = ctr.add_var(0.0, 1.0).unwrap();
        mp.add_var(x, &mut ctr).unwrap();
        assert!(matches!(mp.finalize(&ctr), Err(Error::NotInitialized(_))));
        mp.set_objvar(x, &mut ctr).unwrap();
        mp.finalize(&ctr).unwrap();
        assert!(mp.is_finalized());
        // sealed: no further additions
        let y = ctr.add_var(0.0, 1.0).unwrap();
        assert!(mp.add_var(y, &mut ctr).is_err());
    }

    #[test]
    fn test_vi_pairs() {
        let mut ctr = Container::new();
        let mut mp = MathPrgm::new(MpId::new(2), Sense::Feasibility);
        mp.set_vi();
        let x = ctr.add_var(0.0, f64::INFINITY).unwrap();
        let f = ctr
            .add_equation(crate::container::EquKind::Mapping, crate::cones::Cone::R)
            .unwrap();
        mp.add_vi_pair(f, x, &mut ctr).unwrap();
        let z = ctr.add_var(0.0, f64::INFINITY).unwrap();
        mp.add_vi_pair(EquIdx::NA, z, &mut ctr).unwrap();
        let MpData::Vi(vi) = &mp.data else { panic!() };
        assert_eq!(vi.num_matches, 2);
        assert_eq!(vi.num_zeros, 1);
        assert_eq!(ctr.equ_meta(f).unwrap().dual, x);
    }
}
