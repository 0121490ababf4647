//! The EMPDAG: a typed graph of mathematical programs and Nash nodes
//!
//! Nodes are [`MathPrgm`]s and Nash-equilibrium nodes, kept in parallel
//! arrays indexed by their ids. Edges carry either control semantics
//! (leader/follower) or value-function semantics (the parent's objective
//! is augmented by a weighted child optimal value). Forward arcs live in
//! per-kind lists; every edge is mirrored in the child's reverse-arc list
//! with the edge kind recorded in the uid's low bit.

pub mod analysis;
pub mod arcvf;

use smallvec::SmallVec;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::idx::{EdgeKind, EquIdx, MpId, NashId, NodeUid};
use crate::mp::MathPrgm;
use crate::types::Sense;

pub use arcvf::{ArcVf, ArcVfBasic, ArcVfLequ, Varc};

/// Stage of the EMPDAG in the processing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmpDagStage {
    /// Freshly created
    #[default]
    Unset,
    /// Mirrors the user model
    Model,
    /// After reformulation
    Transformed,
    /// Collapsed into a single problem
    Collapsed,
    /// A filtered subset of another dag
    Subset,
}

/// Kind of the problem at the root of the dag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Optimization problem
    Opt,
    /// Variational inequality
    Vi,
    /// Nash equilibrium
    Equil,
}

/// Constraint features observed under an optimization root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptEdgeFeatures(pub u16);

impl OptEdgeFeatures {
    /// A constraint is the solution map of a child optimization MP
    pub const OPT_SOLMAP_CONSTRAINT: u16 = 1;
    /// A constraint is a child VI
    pub const VI_CONSTRAINT: u16 = 2;
    /// Constraints span more than one control level
    pub const MULTILEVEL_CONSTRAINT: u16 = 4;
    /// A constraint is a child equilibrium
    pub const EQUIL_CONSTRAINT: u16 = 8;

    /// Set bits
    pub fn set(&mut self, bits: u16) {
        self.0 |= bits;
    }

    /// Test bits
    pub fn has(self, bits: u16) -> bool {
        self.0 & bits == bits
    }
}

/// Constraint features observed under a VI root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViEdgeFeatures(pub u16);

impl ViEdgeFeatures {
    /// A constraint is the solution map of a child optimization MP
    pub const OPT_SOLMAP_CONSTRAINT: u16 = 1;
    /// A constraint is a child VI
    pub const VI_CONSTRAINT: u16 = 2;
    /// Constraints span more than one control level
    pub const MULTILEVEL_CONSTRAINT: u16 = 4;
    /// A constraint is a child equilibrium
    pub const EQUIL_CONSTRAINT: u16 = 8;

    /// Set bits
    pub fn set(&mut self, bits: u16) {
        self.0 |= bits;
    }

    /// Test bits
    pub fn has(self, bits: u16) -> bool {
        self.0 & bits == bits
    }
}

/// Structural observations recorded by the analyzer
#[derive(Debug, Clone, Copy, Default)]
pub struct EmpDagFeatures {
    /// The dag is a tree
    pub istree: bool,
    /// At least one VF edge exists on some root-to-leaf path
    pub has_vf_path: bool,
    /// Kind of the root problem
    pub root_kind: Option<RootKind>,
    /// Consequences for an optimization-rooted problem
    pub opt_edge: OptEdgeFeatures,
    /// Consequences for a VI-rooted problem
    pub vi_edge: ViEdgeFeatures,
}

/// Parallel arrays describing the MP nodes
#[derive(Debug, Clone, Default)]
pub struct DagMpArray {
    /// The programs
    pub arr: Vec<MathPrgm>,
    /// Children reached via a CTRL edge
    pub carcs: Vec<SmallVec<[NodeUid; 4]>>,
    /// Children reached via a VF edge, with weights
    pub varcs: Vec<Vec<Varc>>,
    /// Parents, with the incoming-edge kind in the uid's low bit
    pub rarcs: Vec<SmallVec<[NodeUid; 2]>>,
    /// Optional display names
    pub names: Vec<Option<String>>,
}

impl DagMpArray {
    /// Number of MP nodes
    pub fn len(&self) -> usize {
        self.arr.len()
    }

    /// True when no MP node exists
    pub fn is_empty(&self) -> bool {
        self.arr.is_empty()
    }
}

/// Parallel arrays describing the Nash nodes
#[derive(Debug, Clone, Default)]
pub struct DagNashArray {
    /// Children (always MPs)
    pub arcs: Vec<SmallVec<[NodeUid; 4]>>,
    /// Parents, with the incoming-edge kind in the uid's low bit
    pub rarcs: Vec<SmallVec<[NodeUid; 2]>>,
    /// Optional display names
    pub names: Vec<Option<String>>,
}

impl DagNashArray {
    /// Number of Nash nodes
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// True when no Nash node exists
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }
}

/// The EMP directed acyclic graph
#[derive(Debug, Clone, Default)]
pub struct EmpDag {
    /// MP nodes and their arcs
    pub mps: DagMpArray,
    /// Nash nodes and their arcs
    pub nashs: DagNashArray,
    /// Nodes with no in-edge
    pub roots: Vec<NodeUid>,
    /// The canonical root, when the graph has exactly one source
    pub uid_root: NodeUid,
    /// Structural observations
    pub features: EmpDagFeatures,
    /// Processing stage
    pub stage: EmpDagStage,
    /// Adversarial MPs to reformulate, in ascending topological order
    pub mps2reformulate: Vec<MpId>,
    /// MPs opening a saddle path
    pub saddle_path_starts: Vec<MpId>,
}

impl EmpDag {
    /// Create an empty dag
    pub fn new() -> Self {
        Self {
            uid_root: NodeUid::NONE,
            ..Default::default()
        }
    }

    /// True when the dag holds no node
    pub fn is_empty(&self) -> bool {
        self.mps.is_empty() && self.nashs.is_empty()
    }

    /// Number of MP nodes
    pub fn num_mps(&self) -> usize {
        self.mps.len()
    }

    /// Number of Nash nodes
    pub fn num_nashs(&self) -> usize {
        self.nashs.len()
    }

    /* ---------------------------------------------------------------------
     * Node creation and access
     * --------------------------------------------------------------------- */

    /// Create an MP node
    pub fn new_mp(&mut self, sense: Sense, name: Option<String>) -> Result<MpId> {
        let id = MpId::from(self.mps.len());
        if !id.is_regular() {
            return Err(Error::InsufficientMemory("MP table exhausted".to_string()));
        }
        self.mps.arr.push(MathPrgm::new(id, sense));
        self.mps.carcs.push(SmallVec::new());
        self.mps.varcs.push(Vec::new());
        self.mps.rarcs.push(SmallVec::new());
        self.mps.names.push(name);
        tracing::debug!(target: "reshop::empdag", mp = %id, %sense, "new MP node");
        Ok(id)
    }

    /// Create a Nash node
    pub fn new_nash(&mut self, name: Option<String>) -> Result<NashId> {
        let id = NashId::from(self.nashs.len());
        self.nashs.arcs.push(SmallVec::new());
        self.nashs.rarcs.push(SmallVec::new());
        self.nashs.names.push(name);
        tracing::debug!(target: "reshop::empdag", nash = %id, "new Nash node");
        Ok(id)
    }

    /// Access an MP node
    pub fn mp(&self, id: MpId) -> Result<&MathPrgm> {
        self.mps.arr.get(id.idx()).ok_or_else(|| {
            Error::index_out_of_range(format!(
                "MP id {id} is outside of [0, {})",
                self.mps.len()
            ))
        })
    }

    /// Mutable access to an MP node
    pub fn mp_mut(&mut self, id: MpId) -> Result<&mut MathPrgm> {
        let len = self.mps.len();
        self.mps
            .arr
            .get_mut(id.idx())
            .ok_or_else(|| Error::index_out_of_range(format!("MP id {id} is outside of [0, {len})")))
    }

    fn check_nash(&self, id: NashId) -> Result<()> {
        if id.idx() >= self.nashs.len() {
            return Err(Error::index_out_of_range(format!(
                "Nash id {id} is outside of [0, {})",
                self.nashs.len()
            )));
        }
        Ok(())
    }

    /// Display name of an MP node
    pub fn mp_name(&self, id: MpId) -> String {
        if !id.is_regular() {
            return id.to_string();
        }
        match self.mps.names.get(id.idx()) {
            Some(Some(name)) => name.clone(),
            _ => format!("ID {id}"),
        }
    }

    /// Display name of a Nash node
    pub fn nash_name(&self, id: NashId) -> String {
        match self.nashs.names.get(id.idx()) {
            Some(Some(name)) => name.clone(),
            _ => format!("ID {id}"),
        }
    }

    /// Display name of any node
    pub fn node_name(&self, uid: NodeUid) -> String {
        match uid.as_mp() {
            Some(mpid) => format!("MP({})", self.mp_name(mpid)),
            None => match uid.as_nash() {
                Some(nashid) => format!("Nash({})", self.nash_name(nashid)),
                None => "node(none)".to_string(),
            },
        }
    }

    /* ---------------------------------------------------------------------
     * Edge creation
     * --------------------------------------------------------------------- */

    fn has_edge(&self, parent: MpId, child_uid: NodeUid) -> bool {
        self.mps.carcs[parent.idx()]
            .iter()
            .any(|u| u.same_node(child_uid))
            || child_uid.as_mp().is_some_and(|c| {
                self.mps.varcs[parent.idx()].iter().any(|a| a.child == c)
            })
    }

    /// Add a CTRL edge from `parent` to the MP `child`
    pub fn mp_add_mp_via_ctrl(&mut self, parent: MpId, child: MpId) -> Result<()> {
        self.mp(parent)?;
        self.mp(child)?;
        if parent == child {
            return Err(Error::EmpIncorrectSyntax(format!(
                "self-loop on MP({})",
                self.mp_name(parent)
            )));
        }
        let child_uid = NodeUid::mp(child);
        if self.has_edge(parent, child_uid) {
            return Err(Error::EmpIncorrectSyntax(format!(
                "an edge from MP({}) to MP({}) already exists",
                self.mp_name(parent),
                self.mp_name(child)
            )));
        }
        self.mps.carcs[parent.idx()].push(child_uid);
        self.mps.rarcs[child.idx()].push(NodeUid::mp(parent).with_edge(EdgeKind::Ctrl));
        tracing::trace!(target: "reshop::empdag", %parent, %child, "CTRL edge");
        Ok(())
    }

    /// Add a CTRL edge from `parent` to the Nash node `child`
    pub fn mp_add_nash_via_ctrl(&mut self, parent: MpId, child: NashId) -> Result<()> {
        self.mp(parent)?;
        self.check_nash(child)?;
        let child_uid = NodeUid::nash(child);
        if self.has_edge(parent, child_uid) {
            return Err(Error::EmpIncorrectSyntax(format!(
                "an edge from MP({}) to Nash({}) already exists",
                self.mp_name(parent),
                self.nash_name(child)
            )));
        }
        self.mps.carcs[parent.idx()].push(child_uid);
        self.nashs.rarcs[child.idx()].push(NodeUid::mp(parent).with_edge(EdgeKind::Ctrl));
        Ok(())
    }

    /// Add a VF edge from `parent` to `child` carrying `weight`
    pub fn mp_add_mp_via_vf(&mut self, parent: MpId, child: MpId, weight: ArcVf) -> Result<()> {
        self.mp(parent)?;
        if parent == child {
            return Err(Error::EmpIncorrectSyntax(format!(
                "self-loop on MP({})",
                self.mp_name(parent)
            )));
        }
        let child_mp = self.mp(child)?;
        if child_mp.sense == Sense::Feasibility {
            return Err(Error::EmpIncorrectInput {
                issues: 1,
                first: format!(
                    "MP({}), of type {}, is linked via a VF arc to its parent MP({}). \
                     This is nonsensical.",
                    self.mp_name(child),
                    child_mp.data.kind_str(),
                    self.mp_name(parent)
                ),
            });
        }
        if !weight.is_set() {
            return Err(Error::NotInitialized(format!(
                "VF arc from MP({}) to MP({}) has no weight",
                self.mp_name(parent),
                self.mp_name(child)
            )));
        }
        if self.has_edge(parent, NodeUid::mp(child)) {
            return Err(Error::EmpIncorrectSyntax(format!(
                "an edge from MP({}) to MP({}) already exists",
                self.mp_name(parent),
                self.mp_name(child)
            )));
        }
        self.mps.varcs[parent.idx()].push(Varc::new(child, weight));
        self.mps.rarcs[child.idx()].push(NodeUid::mp(parent).with_edge(EdgeKind::Vf));
        tracing::trace!(target: "reshop::empdag", %parent, %child, "VF edge");
        Ok(())
    }

    /// Attach the MP `child` to a Nash node
    pub fn nash_add_mp(&mut self, nash: NashId, child: MpId) -> Result<()> {
        self.check_nash(nash)?;
        self.mp(child)?;
        let child_uid = NodeUid::mp(child);
        if self.nashs.arcs[nash.idx()].iter().any(|u| u.same_node(child_uid)) {
            return Err(Error::EmpIncorrectSyntax(format!(
                "MP({}) is already a child of Nash({})",
                self.mp_name(child),
                self.nash_name(nash)
            )));
        }
        self.nashs.arcs[nash.idx()].push(child_uid);
        self.mps.rarcs[child.idx()].push(NodeUid::nash(nash).with_edge(EdgeKind::Ctrl));
        Ok(())
    }

    /// The VF arc between two MPs, if one exists
    pub fn find_arc_vf(&self, parent: MpId, child: MpId) -> Option<&ArcVf> {
        self.mps
            .varcs
            .get(parent.idx())?
            .iter()
            .find(|a| a.child == child)
            .map(|a| &a.weight)
    }

    /* ---------------------------------------------------------------------
     * Roots
     * --------------------------------------------------------------------- */

    /// Declare the canonical root
    pub fn set_root(&mut self, uid: NodeUid) -> Result<()> {
        match uid.as_mp() {
            Some(mpid) => {
                self.mp(mpid)?;
            }
            None => {
                let nashid = uid.as_nash().ok_or_else(|| {
                    Error::invalid_argument("root uid addresses no node".to_string())
                })?;
                self.check_nash(nashid)?;
            }
        }
        self.uid_root = uid;
        if !self.roots.iter().any(|u| u.same_node(uid)) {
            self.roots.push(uid);
        }
        Ok(())
    }

    /// Recompute `roots` as the nodes whose reverse-arc list is empty
    pub fn compute_roots(&mut self) {
        self.roots.clear();
        for (i, rarcs) in self.mps.rarcs.iter().enumerate() {
            if rarcs.is_empty() {
                self.roots.push(NodeUid::mp(MpId::from(i)));
            }
        }
        for (i, rarcs) in self.nashs.rarcs.iter().enumerate() {
            if rarcs.is_empty() {
                self.roots.push(NodeUid::nash(NashId::from(i)));
            }
        }
        if self.roots.len() == 1 {
            self.uid_root = self.roots[0];
        }
    }

    /// Forget analyzer observations (used before re-analysis)
    pub fn reset_type(&mut self) {
        self.features = EmpDagFeatures::default();
        self.mps2reformulate.clear();
        self.saddle_path_starts.clear();
    }

    /* ---------------------------------------------------------------------
     * Edge rewiring (reformulator protocol)
     * --------------------------------------------------------------------- */

    /// Remove the reverse arc of `child` pointing at `parent_uid`
    ///
    /// Edge bits are ignored for the match. Part of the rewiring protocol:
    /// every forward-edge removal must drop the mirrored reverse arc.
    pub fn rm_rarc(&mut self, child: MpId, parent_uid: NodeUid) -> Result<()> {
        let rarcs = &mut self.mps.rarcs[child.idx()];
        let before = rarcs.len();
        rarcs.retain(|u| !u.same_node(parent_uid));
        if rarcs.len() == before {
            return Err(Error::runtime(format!(
                "no reverse arc from MP({}) to {}",
                self.mp_name(child),
                self.node_name(parent_uid)
            )));
        }
        Ok(())
    }

    /// Insert a fresh Nash node between an MP and its former CTRL child
    ///
    /// The CTRL edge `parent → child` is re-pointed at the new Nash node,
    /// which adopts `child`. Reverse arcs are updated on both sides.
    pub fn replace_child_with_nash(
        &mut self,
        parent: MpId,
        child: MpId,
        name: Option<String>,
    ) -> Result<NashId> {
        let child_uid = NodeUid::mp(child);
        let pos = self.mps.carcs[parent.idx()]
            .iter()
            .position(|u| u.same_node(child_uid))
            .ok_or_else(|| {
                Error::runtime(format!(
                    "MP({}) is not a CTRL child of MP({})",
                    self.mp_name(child),
                    self.mp_name(parent)
                ))
            })?;
        let nash = self.new_nash(name)?;
        self.mps.carcs[parent.idx()][pos] = NodeUid::nash(nash);
        self.nashs.rarcs[nash.idx()].push(NodeUid::mp(parent).with_edge(EdgeKind::Ctrl));
        self.rm_rarc(child, NodeUid::mp(parent))?;
        self.nash_add_mp(nash, child)?;
        Ok(nash)
    }

    /* ---------------------------------------------------------------------
     * Consistency and cloning
     * --------------------------------------------------------------------- */

    /// Check forward/reverse arc symmetry over the whole graph
    pub fn check_consistency(&self) -> Result<()> {
        for (i, carcs) in self.mps.carcs.iter().enumerate() {
            let parent = NodeUid::mp(MpId::from(i));
            for &child_uid in carcs {
                let rarcs: &[NodeUid] = match child_uid.as_mp() {
                    Some(c) => &self.mps.rarcs[c.idx()],
                    None => &self.nashs.rarcs[child_uid.as_nash().unwrap().idx()],
                };
                let ok = rarcs
                    .iter()
                    .any(|u| u.same_node(parent) && u.edge_kind() == EdgeKind::Ctrl);
                if !ok {
                    return Err(Error::runtime(format!(
                        "CTRL edge {} -> {} has no mirrored reverse arc",
                        self.node_name(parent),
                        self.node_name(child_uid)
                    )));
                }
            }
        }
        for (i, varcs) in self.mps.varcs.iter().enumerate() {
            let parent = NodeUid::mp(MpId::from(i));
            for arc in varcs {
                let ok = self.mps.rarcs[arc.child.idx()]
                    .iter()
                    .any(|u| u.same_node(parent) && u.edge_kind() == EdgeKind::Vf);
                if !ok {
                    return Err(Error::runtime(format!(
                        "VF edge {} -> MP({}) has no mirrored reverse arc",
                        self.node_name(parent),
                        self.mp_name(arc.child)
                    )));
                }
            }
        }
        for (i, arcs) in self.nashs.arcs.iter().enumerate() {
            let parent = NodeUid::nash(NashId::from(i));
            for &child_uid in arcs {
                let Some(c) = child_uid.as_mp() else {
                    return Err(Error::runtime(format!(
                        "Nash({}) has a non-MP child",
                        self.nash_name(NashId::from(i))
                    )));
                };
                let ok = self.mps.rarcs[c.idx()].iter().any(|u| u.same_node(parent));
                if !ok {
                    return Err(Error::runtime(format!(
                        "Nash edge {} -> MP({}) has no mirrored reverse arc",
                        self.node_name(parent),
                        self.mp_name(c)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Structural clone, rebasing node ids through rename maps
    ///
    /// `mp_map[old] = new` and `nash_map[old] = new` must cover every node.
    pub fn clone_rebased(&self, mp_map: &[MpId], nash_map: &[NashId]) -> Result<EmpDag> {
        if mp_map.len() != self.mps.len() {
            return Err(Error::dimension_mismatch(self.mps.len(), mp_map.len()));
        }
        if nash_map.len() != self.nashs.len() {
            return Err(Error::dimension_mismatch(self.nashs.len(), nash_map.len()));
        }
        let remap = |uid: NodeUid| -> NodeUid {
            if !uid.is_valid() {
                return uid;
            }
            let renamed = match uid.as_mp() {
                Some(m) => NodeUid::mp(mp_map[m.idx()]),
                None => NodeUid::nash(nash_map[uid.as_nash().unwrap().idx()]),
            };
            renamed.with_edge(uid.edge_kind())
        };

        let mut out = self.clone();
        for mp in &mut out.mps.arr {
            mp.id = mp_map[mp.id.idx()];
        }
        for arcs in &mut out.mps.carcs {
            for u in arcs.iter_mut() {
                *u = remap(*u);
            }
        }
        for varcs in &mut out.mps.varcs {
            for arc in varcs.iter_mut() {
                arc.child = mp_map[arc.child.idx()];
            }
        }
        for rarcs in out.mps.rarcs.iter_mut().chain(out.nashs.rarcs.iter_mut()) {
            for u in rarcs.iter_mut() {
                *u = remap(*u);
            }
        }
        for arcs in &mut out.nashs.arcs {
            for u in arcs.iter_mut() {
                *u = remap(*u);
            }
        }
        for u in &mut out.roots {
            *u = remap(*u);
        }
        out.uid_root = remap(out.uid_root);
        for m in &mut out.mps2reformulate {
            *m = mp_map[m.idx()];
        }
        for m in &mut out.saddle_path_starts {
            *m = mp_map[m.idx()];
        }
        Ok(out)
    }

    /// Finalize every MP of the dag against the container
    pub fn finalize_mps(&mut self, ctr: &Container) -> Result<()> {
        for mp in &mut self.mps.arr {
            mp.finalize(ctr)?;
        }
        Ok(())
    }

    /// The objective equation of an MP, erroring when unset
    pub fn mp_objequ(&self, id: MpId) -> Result<EquIdx> {
        let objequ = self.mp(id)?.objequ();
        if !objequ.is_valid() {
            return Err(Error::NotInitialized(format!(
                "invalid objective equation for MP({})",
                self.mp_name(id)
            )));
        }
        Ok(objequ)
    }
}
