//! Static analysis of the EMPDAG
//!
//! A three-color depth-first traversal computes preorder/postorder
//! timestamps, the topological order, tree-ness and depth, detects cycles,
//! and identifies saddle paths (runs of VF edges whose senses alternate).
//! A second pass, in reverse topological order, computes per-node control
//! levels, updates the dag feature bits, and classifies every variable of
//! every owned equation against the owning program.
//!
//! Diagnostics are collected across the whole graph; the analyzer fails
//! with a single aggregated `EmpIncorrectInput` after visiting every node,
//! so the caller sees the total issue count.

use bitvec::bitvec;
use bitvec::vec::BitVec;

use crate::container::Container;
use crate::empdag::{EmpDag, OptEdgeFeatures, RootKind, ViEdgeFeatures};
use crate::error::{Diagnostics, Error, Result};
use crate::idx::{EdgeKind, EquIdx, MpId, NashId, NodeUid, VarIdx};
use crate::mp::MpData;
use crate::types::Sense;

/// Node state during the depth-first traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DfsState {
    #[default]
    NotExplored,
    InProgress,
    Processed,
    CycleStart,
}

/// Type of the path leading to the node being visited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathType {
    Unset,
    VfMin,
    VfMax,
    Ctrl,
    Equil,
}

fn sense_to_pathtype(sense: Sense) -> PathType {
    match sense {
        Sense::Min => PathType::VfMin,
        Sense::Max => PathType::VfMax,
        Sense::Feasibility => PathType::Unset,
    }
}

/// Path state carried down the traversal
#[derive(Debug, Clone, Copy)]
struct PathData {
    pathtype: PathType,
    depth: u32,
    saddle_path_start: MpId,
    saddle_path_registered: bool,
}

/// Error channel of the traversal
enum DfsErr {
    /// A cycle was found; the unwinding prints the participating nodes
    Cycle,
    /// The cycle chain reached its starting node; unwind silently
    CycleDone,
    /// A hard error; abort immediately
    Fatal(Error),
}

type DfsResult = std::result::Result<(), DfsErr>;

/// Per-MP variable-classification counters and control level
#[derive(Debug, Clone, Copy, Default)]
pub struct MpPpty {
    /// Variables owned by the MP itself
    pub num_ownvar: u32,
    /// Variables owned by a VF ancestor
    pub num_history: u32,
    /// Variables owned by a sibling under a Nash ancestor
    pub num_nashvar: u32,
    /// Variables owned by a CTRL ancestor
    pub num_ctrlvar: u32,
    /// Variables owned by a CTRL descendant (solution variables)
    pub num_solvar: u32,
    /// Control level of the node (root = 0)
    pub level: u32,
}

/// Result of a full analysis pass
#[derive(Debug, Clone)]
pub struct Analysis {
    num_mps: usize,
    /// Preorder timestamp per node (MPs first, then Nash nodes)
    pub preorder: Vec<u32>,
    /// Postorder timestamp per node
    pub postorder: Vec<u32>,
    /// Node indices in topological (post) order, children first
    pub topo_order: Vec<usize>,
    /// Position of each node in `topo_order`
    pub topo_revidx: Vec<usize>,
    /// Longest root-to-leaf path
    pub max_depth: u32,
    /// The dag is a tree
    pub is_tree: bool,
    /// At least one VF edge was traversed
    pub has_vf_path: bool,
    /// Per-MP classification counters
    pub mp_ppty: Vec<MpPpty>,
    /// Adversarial MPs, in discovery order
    pub adversarial_mps: Vec<MpId>,
}

impl Analysis {
    fn nidx_mp(&self, id: MpId) -> usize {
        id.idx()
    }

    fn nidx_nash(&self, id: NashId) -> usize {
        self.num_mps + id.idx()
    }

    /// Topological position of an MP node
    pub fn topo_index_mp(&self, id: MpId) -> usize {
        self.topo_revidx[self.nidx_mp(id)]
    }

    /// Topological position of a Nash node
    pub fn topo_index_nash(&self, id: NashId) -> usize {
        self.topo_revidx[self.nidx_nash(id)]
    }
}

struct DfsData<'a> {
    empdag: &'a EmpDag,
    num_mps: usize,
    num_nodes: usize,
    is_tree: bool,
    has_vf_path: bool,
    timestamp: u32,
    num_visited: usize,
    max_depth: u32,
    state: Vec<DfsState>,
    preorder: Vec<u32>,
    postorder: Vec<u32>,
    topo_order: Vec<usize>,
    topo_revidx: Vec<usize>,
    adversarial_mps: Vec<MpId>,
    saddle_path_starts: Vec<MpId>,
    diags: Diagnostics,
}

impl<'a> DfsData<'a> {
    fn new(empdag: &'a EmpDag) -> Self {
        let num_mps = empdag.num_mps();
        let num_nodes = num_mps + empdag.num_nashs();
        Self {
            empdag,
            num_mps,
            num_nodes,
            is_tree: true,
            has_vf_path: false,
            timestamp: 0,
            num_visited: 0,
            max_depth: 0,
            state: vec![DfsState::default(); num_nodes],
            preorder: vec![0; num_nodes],
            postorder: vec![0; num_nodes],
            topo_order: Vec::with_capacity(num_nodes),
            topo_revidx: vec![0; num_nodes],
            adversarial_mps: Vec::new(),
            saddle_path_starts: Vec::new(),
            diags: Diagnostics::new(),
        }
    }

    fn nidx(&self, uid: NodeUid) -> usize {
        match uid.as_mp() {
            Some(m) => m.idx(),
            None => self.num_mps + uid.as_nash().unwrap().idx(),
        }
    }

    fn nidx_name(&self, nidx: usize) -> String {
        if nidx < self.num_mps {
            format!("MP({})", self.empdag.mp_name(MpId::from(nidx)))
        } else {
            format!(
                "Nash({})",
                self.empdag.nash_name(NashId::from(nidx - self.num_mps))
            )
        }
    }

    /// Pre-visit bookkeeping; decides whether the node needs exploring
    fn enter_node(&mut self, uid: NodeUid) -> std::result::Result<bool, DfsErr> {
        let nidx = self.nidx(uid);
        match self.state[nidx] {
            DfsState::NotExplored => {
                self.state[nidx] = DfsState::InProgress;
                self.timestamp += 1;
                self.preorder[nidx] = self.timestamp;
                Ok(true)
            }
            DfsState::InProgress => {
                self.diags.error(format!(
                    "Cycle detected! It involves the problem {}",
                    self.empdag.node_name(uid)
                ));
                self.state[nidx] = DfsState::CycleStart;
                Err(DfsErr::Cycle)
            }
            DfsState::Processed => {
                self.is_tree = false;
                Ok(false)
            }
            DfsState::CycleStart => Err(DfsErr::Fatal(Error::runtime(format!(
                "unexpected node state for {}",
                self.empdag.node_name(uid)
            )))),
        }
    }

    /// Post-visit bookkeeping: postorder, topological order
    fn leave_node(&mut self, uid: NodeUid) {
        let nidx = self.nidx(uid);
        self.topo_revidx[nidx] = self.num_visited;
        self.topo_order.push(nidx);
        self.num_visited += 1;
        self.timestamp += 1;
        self.postorder[nidx] = self.timestamp;
        self.state[nidx] = DfsState::Processed;
    }

    /// Forward a child failure, extending the cycle chain when needed
    fn child_failed(&mut self, err: DfsErr, child_uid: NodeUid, cur_nidx: usize) -> DfsErr {
        match err {
            DfsErr::Cycle => {
                let name = self.empdag.node_name(child_uid);
                self.diags.error(name);
                if self.state[cur_nidx] == DfsState::CycleStart {
                    DfsErr::CycleDone
                } else {
                    DfsErr::Cycle
                }
            }
            other => other,
        }
    }

    fn process_carcs(&mut self, mpid: MpId, pathdata: PathData) -> DfsResult {
        let cur_nidx = mpid.idx();
        let carcs = self.empdag.mps.carcs[mpid.idx()].clone();
        for child_uid in carcs {
            let pathdata_child = PathData {
                pathtype: PathType::Ctrl,
                saddle_path_start: MpId::NA,
                saddle_path_registered: false,
                ..pathdata
            };
            let res = match child_uid.as_mp() {
                Some(child) => self.visit_mp_ctrl(child, pathdata_child),
                None => self.visit_nash(child_uid.as_nash().unwrap(), pathdata_child),
            };
            if let Err(err) = res {
                return Err(self.child_failed(err, child_uid, cur_nidx));
            }
        }
        Ok(())
    }

    /// Visit the VF children; saddle-path detection happens here
    fn process_varcs(&mut self, mpid_parent: MpId, mut pathdata: PathData) -> DfsResult {
        let cur_pathtype = pathdata.pathtype;
        self.has_vf_path = true;

        let children: Vec<MpId> = self.empdag.mps.varcs[mpid_parent.idx()]
            .iter()
            .map(|a| a.child)
            .collect();

        for child in children {
            let sense = match self.empdag.mp(child) {
                Ok(mp) => mp.sense,
                Err(e) => return Err(DfsErr::Fatal(e)),
            };

            let adversarial = matches!(
                (sense, cur_pathtype),
                (Sense::Max, PathType::VfMin) | (Sense::Min, PathType::VfMax)
            );
            if adversarial {
                self.adversarial_mps.push(child);
                if !pathdata.saddle_path_registered {
                    self.saddle_path_starts.push(pathdata.saddle_path_start);
                    pathdata.saddle_path_registered = true;
                }
            } else if sense == Sense::Feasibility {
                return Err(DfsErr::Fatal(Error::EmpIncorrectInput {
                    issues: 1,
                    first: format!(
                        "MP({}), of type {}, is linked via a VF arc to its parent MP({}). \
                         This is nonsensical.",
                        self.empdag.mp_name(child),
                        self.empdag.mp(child).map(|m| m.data.kind_str()).unwrap_or("?"),
                        self.empdag.mp_name(mpid_parent)
                    ),
                }));
            }

            if let Err(err) = self.visit_mp_vf(child, pathdata) {
                return Err(self.child_failed(err, NodeUid::mp(child), child.idx()));
            }
        }
        Ok(())
    }

    /// Visit an MP reached through a CTRL edge
    fn visit_mp_ctrl(&mut self, mpid: MpId, pathdata: PathData) -> DfsResult {
        debug_assert_eq!(pathdata.pathtype, PathType::Ctrl);
        let uid = NodeUid::mp(mpid);
        if !self.enter_node(uid)? {
            return Ok(());
        }

        let mut pathdata_child = pathdata;
        pathdata_child.depth += 1;

        let vlen = self.empdag.mps.varcs[mpid.idx()].len();
        if self.empdag.mps.carcs[mpid.idx()].is_empty() && vlen == 0 {
            self.max_depth = self.max_depth.max(pathdata.depth);
        }

        // CTRL children need no saddle-path bookkeeping
        self.process_carcs(mpid, pathdata_child)?;

        if vlen > 0 {
            let sense = self.empdag.mps.arr[mpid.idx()].sense;
            pathdata_child.pathtype = sense_to_pathtype(sense);
            pathdata_child.saddle_path_start = mpid;
            pathdata_child.saddle_path_registered = false;
            self.process_varcs(mpid, pathdata_child)?;
        }

        self.leave_node(uid);
        Ok(())
    }

    /// Visit an MP reached through a VF edge
    fn visit_mp_vf(&mut self, mpid: MpId, pathdata: PathData) -> DfsResult {
        debug_assert!(matches!(
            pathdata.pathtype,
            PathType::VfMin | PathType::VfMax
        ));
        let uid = NodeUid::mp(mpid);
        if !self.enter_node(uid)? {
            return Ok(());
        }

        let mut pathdata_child = pathdata;
        pathdata_child.depth += 1;

        let vlen = self.empdag.mps.varcs[mpid.idx()].len();
        let clen = self.empdag.mps.carcs[mpid.idx()].len();
        if clen == 0 && vlen == 0 {
            self.max_depth = self.max_depth.max(pathdata.depth);
        }

        // inside a VF path the VF children are explored first
        if vlen > 0 {
            self.process_varcs(mpid, pathdata_child)?;
        }
        if clen > 0 {
            pathdata_child.pathtype = PathType::Ctrl;
            self.process_carcs(mpid, pathdata_child)?;
        }

        self.leave_node(uid);
        Ok(())
    }

    /// Visit an MP that is a root or a Nash child
    fn visit_mp_root_or_nash(&mut self, mpid: MpId, pathdata: PathData) -> DfsResult {
        debug_assert!(matches!(
            pathdata.pathtype,
            PathType::Equil | PathType::Unset
        ));
        let uid = NodeUid::mp(mpid);
        if !self.enter_node(uid)? {
            return Ok(());
        }

        let mut pathdata_child = pathdata;
        pathdata_child.depth += 1;

        let vlen = self.empdag.mps.varcs[mpid.idx()].len();
        if self.empdag.mps.carcs[mpid.idx()].is_empty() && vlen == 0 {
            self.max_depth = self.max_depth.max(pathdata.depth);
        }

        if vlen > 0 {
            let sense = self.empdag.mps.arr[mpid.idx()].sense;
            pathdata_child.pathtype = sense_to_pathtype(sense);
            pathdata_child.saddle_path_start = mpid;
            pathdata_child.saddle_path_registered = false;
            self.process_varcs(mpid, pathdata_child)?;
        }

        pathdata_child.pathtype = PathType::Ctrl;
        self.process_carcs(mpid, pathdata_child)?;

        self.leave_node(uid);
        Ok(())
    }

    /// Visit a Nash node
    fn visit_nash(&mut self, nashid: NashId, pathdata: PathData) -> DfsResult {
        let uid = NodeUid::nash(nashid);
        let nidx = self.nidx(uid);
        if !self.enter_node(uid)? {
            return Ok(());
        }

        let mut pathdata_child = pathdata;
        pathdata_child.depth += 1;
        pathdata_child.pathtype = PathType::Equil;

        let arcs = self.empdag.nashs.arcs[nashid.idx()].clone();
        if arcs.is_empty() {
            self.diags.error(format!(
                "Nash({}) has no child.",
                self.empdag.nash_name(nashid)
            ));
        }

        for child_uid in arcs {
            let Some(child) = child_uid.as_mp() else {
                return Err(DfsErr::Fatal(Error::runtime(format!(
                    "Nash({}) has a non-MP child",
                    self.empdag.nash_name(nashid)
                ))));
            };
            if let Err(err) = self.visit_mp_root_or_nash(child, pathdata_child) {
                return Err(self.child_failed(err, child_uid, nidx));
            }
        }

        self.leave_node(uid);
        Ok(())
    }
}

/// Index of the (unique) parent of a node, or why there is none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentIdx {
    Node(usize),
    NoParent,
    /// More than one parent: the tree walk does not apply
    Dag,
}

fn first_parent(empdag: &EmpDag, num_mps: usize, nidx: usize) -> ParentIdx {
    let rarcs = if nidx < num_mps {
        &empdag.mps.rarcs[nidx]
    } else {
        &empdag.nashs.rarcs[nidx - num_mps]
    };
    match rarcs.len() {
        0 => ParentIdx::NoParent,
        1 => {
            let uid = rarcs[0];
            let id = uid.id() as usize;
            ParentIdx::Node(if uid.is_mp() { id } else { id + num_mps })
        }
        _ => ParentIdx::Dag,
    }
}

/// Lowest common ancestor by preorder/postorder intervals
///
/// Any successor has an interval strictly inside its ancestor's; the walk
/// moves the preorder-larger node up through its first reverse arc until
/// one interval contains the other. Correct on trees; on a DAG the walk
/// aborts as soon as a node with several parents is reached.
fn lca(
    u: usize,
    v: usize,
    empdag: &EmpDag,
    num_mps: usize,
    preorder: &[u32],
    postorder: &[u32],
) -> ParentIdx {
    if preorder[u] < preorder[v] {
        if postorder[u] > postorder[v] {
            return ParentIdx::Node(u);
        }
        return match first_parent(empdag, num_mps, v) {
            ParentIdx::Node(p) => lca(u, p, empdag, num_mps, preorder, postorder),
            other => other,
        };
    }

    // preorder[v] <= preorder[u]; >= keeps u == v correct
    if postorder[v] >= postorder[u] {
        return ParentIdx::Node(v);
    }
    match first_parent(empdag, num_mps, u) {
        ParentIdx::Node(p) => lca(p, v, empdag, num_mps, preorder, postorder),
        other => other,
    }
}

/// Backward path from `descendant` up to `ancestor`, counting CTRL edges
fn path_ctrl_edges(
    empdag: &EmpDag,
    num_mps: usize,
    ancestor: usize,
    descendant: usize,
) -> Result<u32> {
    debug_assert_ne!(ancestor, descendant);
    let mut ctrl_edges = 0;
    let mut cur = descendant;
    loop {
        let rarcs = if cur < num_mps {
            &empdag.mps.rarcs[cur]
        } else {
            &empdag.nashs.rarcs[cur - num_mps]
        };
        let Some(&uid) = rarcs.first() else {
            return Err(Error::runtime(format!(
                "invalid uid when walking up from node {descendant} to node {ancestor}"
            )));
        };
        let next = if uid.is_mp() {
            if uid.edge_kind() == EdgeKind::Ctrl {
                ctrl_edges += 1;
            }
            uid.id() as usize
        } else {
            uid.id() as usize + num_mps
        };
        if next == ancestor {
            return Ok(ctrl_edges);
        }
        cur = next;
    }
}

fn mp_kind_of(empdag: &EmpDag, mpid: MpId) -> &MpData {
    &empdag.mps.arr[mpid.idx()].data
}

/// Record the feature consequence of a CTRL edge under a given parent
fn mp_ctrledge(
    empdag: &mut EmpDag,
    level: u32,
    parent_data: &MpData,
    child_data: &MpData,
) -> Result<()> {
    match parent_data {
        MpData::Opt(_) | MpData::Ccflib(_) => {
            match child_data {
                MpData::Opt(_) | MpData::Ccflib(_) => empdag
                    .features
                    .opt_edge
                    .set(OptEdgeFeatures::OPT_SOLMAP_CONSTRAINT),
                MpData::Vi(_) => empdag.features.opt_edge.set(OptEdgeFeatures::VI_CONSTRAINT),
                MpData::Undef => {
                    return Err(Error::runtime("unexpected MP kind 'undef'".to_string()))
                }
            }
            if level > 1 {
                empdag
                    .features
                    .vi_edge
                    .set(ViEdgeFeatures::MULTILEVEL_CONSTRAINT);
            }
        }
        MpData::Vi(_) => {
            match child_data {
                MpData::Opt(_) | MpData::Ccflib(_) => empdag
                    .features
                    .vi_edge
                    .set(ViEdgeFeatures::OPT_SOLMAP_CONSTRAINT),
                MpData::Vi(_) => empdag.features.vi_edge.set(ViEdgeFeatures::VI_CONSTRAINT),
                MpData::Undef => {
                    return Err(Error::runtime("unexpected MP kind 'undef'".to_string()))
                }
            }
            if level > 1 {
                empdag
                    .features
                    .vi_edge
                    .set(ViEdgeFeatures::MULTILEVEL_CONSTRAINT);
            }
        }
        MpData::Undef => return Err(Error::runtime("unexpected MP kind 'undef'".to_string())),
    }
    Ok(())
}

struct Classifier<'a> {
    empdag: &'a EmpDag,
    num_mps: usize,
    preorder: &'a [u32],
    postorder: &'a [u32],
    mp_ppty: &'a mut [MpPpty],
    diags: &'a mut Diagnostics,
    /// CTRL-edge feature updates discovered while the dag is borrowed
    /// immutably; the caller folds them into the feature bits.
    pending_ctrl_edges: Vec<(MpData, MpData, u32)>,
}

impl Classifier<'_> {
    fn is_ancestor(&self, anc: usize, desc: usize) -> bool {
        self.preorder[anc] < self.preorder[desc] && self.postorder[anc] > self.postorder[desc]
    }

    fn is_child_carcs(&self, parent: MpId, candidate: MpId) -> bool {
        self.empdag.mps.carcs[parent.idx()]
            .iter()
            .any(|u| u.as_mp() == Some(candidate))
    }

    fn is_child_varcs(&self, parent: MpId, candidate: MpId) -> bool {
        self.empdag.mps.varcs[parent.idx()]
            .iter()
            .any(|a| a.child == candidate)
    }

    /// The unique parent uid when `candidate` is the parent of `mpid`
    fn parent_uid(&self, mpid: MpId, candidate: MpId) -> Option<NodeUid> {
        let rarcs = &self.empdag.mps.rarcs[mpid.idx()];
        let &uid = rarcs.first()?;
        debug_assert!(rarcs.len() == 1 || !uid.is_mp());
        (uid.as_mp() == Some(candidate)).then_some(uid)
    }
}

/// Compute per-MP level and feature consequences of its incoming edges
fn analyze_mp_level(
    empdag: &mut EmpDag,
    mpid: MpId,
    mp_level: &[u32],
    nash_level: &[u32],
) -> Result<u32> {
    let rarcs: Vec<NodeUid> = empdag.mps.rarcs[mpid.idx()].iter().copied().collect();
    let mut level = 0;
    for (i, &uid) in rarcs.iter().enumerate() {
        let pid = uid.id() as usize;
        let mut l = if uid.is_mp() {
            mp_level[pid]
        } else {
            nash_level[pid]
        };
        if uid.is_mp() && uid.edge_kind() == EdgeKind::Ctrl {
            l += 1;
            let parent_data = mp_kind_of(empdag, MpId::from(pid)).clone();
            let child_data = mp_kind_of(empdag, mpid).clone();
            mp_ctrledge(empdag, l, &parent_data, &child_data)?;
        }
        if i == 0 {
            level = l;
        } else if l != level {
            return Err(Error::not_implemented(format!(
                "MP({}) has different levels by different parents: {l} vs {level}",
                empdag.mp_name(mpid)
            )));
        }
    }

    if level > 1 {
        match mp_kind_of(empdag, mpid) {
            MpData::Opt(_) | MpData::Ccflib(_) => empdag
                .features
                .opt_edge
                .set(OptEdgeFeatures::MULTILEVEL_CONSTRAINT),
            MpData::Vi(_) => empdag
                .features
                .vi_edge
                .set(ViEdgeFeatures::MULTILEVEL_CONSTRAINT),
            MpData::Undef => {
                return Err(Error::runtime("unexpected MP kind 'undef'".to_string()))
            }
        }
    }
    Ok(level)
}

/// Classify every variable of every equation owned by `mpid`
#[allow(clippy::too_many_arguments)]
fn analyze_mp_equs(
    cls: &mut Classifier<'_>,
    ctr: &mut Container,
    mpid: MpId,
    level: u32,
    processed_vi: &mut BitVec,
    var_buf: &mut Vec<VarIdx>,
) -> Result<u32> {
    let mpnidx = mpid.idx();
    let mut num_err: u32 = 0;

    let equs: Vec<EquIdx> = cls.empdag.mps.arr[mpnidx].equs.iter().copied().collect();
    for ei in equs {
        processed_vi.fill(false);
        let mut equ_has_owned_var = false;

        var_buf.clear();
        var_buf.extend_from_slice(ctr.equ_variables(ei)?);
        let equ_is_cst = var_buf.is_empty();

        for &vi in var_buf.iter() {
            let mp_var = ctr.var_meta(vi)?.mp;

            if !mp_var.is_valid() {
                cls.diags.error(format!(
                    "var '{}' is not attached to any MP! It appears in equ '{}' of MP({})",
                    ctr.var_name(vi),
                    ctr.equ_name(ei),
                    cls.empdag.mp_name(mpid)
                ));
                num_err += 1;
                continue;
            }

            if mp_var == mpid {
                equ_has_owned_var = true;
            }

            if processed_vi[vi.idx()] {
                continue;
            }
            processed_vi.set(vi.idx(), true);

            if !mp_var.is_regular() {
                return Err(Error::not_implemented(format!(
                    "variable '{}' is attached to {}; shared variables/equations \
                     are not supported",
                    ctr.var_name(vi),
                    mp_var
                )));
            }

            // the MP owns the variable
            if mp_var == mpid {
                cls.mp_ppty[mpnidx].num_ownvar += 1;
                continue;
            }

            // a direct CTRL child owns it: solution variable
            if cls.is_child_carcs(mpid, mp_var) {
                if ctr.var_meta(vi)?.ppty.is_defined_objvar() {
                    continue;
                }
                cls.mp_ppty[mpnidx].num_solvar += 1;
                ctr.var_meta_mut(vi)?
                    .ppty
                    .set(crate::container::VarPpty::SOLUTION_VAR);
                continue;
            }

            // a direct VF child owns it: the future value is not available
            if cls.is_child_varcs(mpid, mp_var) {
                cls.diags.error(format!(
                    "in equation '{}', the external variable '{}' belongs to MP({}), a \
                     descendant of MP({}). However, these two are linked by VF edges, \
                     which is not correct.",
                    ctr.equ_name(ei),
                    ctr.var_name(vi),
                    cls.empdag.mp_name(mp_var),
                    cls.empdag.mp_name(mpid)
                ));
                num_err += 1;
                continue;
            }

            // the (unique) parent owns it
            if let Some(uid) = cls.parent_uid(mpid, mp_var) {
                if uid.edge_kind() == EdgeKind::Vf {
                    cls.mp_ppty[mpnidx].num_history += 1;
                } else {
                    cls.mp_ppty[mpnidx].num_ctrlvar += 1;
                }
                continue;
            }

            // ancestor: history or control depending on the edges on the path
            if cls.is_ancestor(mp_var.idx(), mpnidx) {
                let ctrl_edges =
                    path_ctrl_edges(cls.empdag, cls.num_mps, mp_var.idx(), mpnidx)?;
                if ctrl_edges > 0 {
                    cls.mp_ppty[mpnidx].num_ctrlvar += 1;
                } else {
                    cls.mp_ppty[mpnidx].num_history += 1;
                }
                continue;
            }

            // descendant: a CTRL edge must be present on the path
            if cls.is_ancestor(mpnidx, mp_var.idx()) {
                let ctrl_edges =
                    path_ctrl_edges(cls.empdag, cls.num_mps, mpnidx, mp_var.idx())?;
                if ctrl_edges == 0 {
                    cls.diags.error(format!(
                        "in equation '{}', the external variable '{}' belongs to MP({}), a \
                         descendant of MP({}). However, these two are linked by VF edges, \
                         which is not correct.",
                        ctr.equ_name(ei),
                        ctr.var_name(vi),
                        cls.empdag.mp_name(mp_var),
                        cls.empdag.mp_name(mpid)
                    ));
                    num_err += 1;
                } else {
                    if ctr.var_meta(vi)?.ppty.is_defined_objvar() {
                        continue;
                    }
                    ctr.var_meta_mut(vi)?
                        .ppty
                        .set(crate::container::VarPpty::SOLUTION_VAR);
                    cls.mp_ppty[mpnidx].num_solvar += 1;

                    // the child may sit several control levels below; the
                    // asymmetry (child not depending on parent variables)
                    // is possible and not a mistake
                    let child_lvl = ctrl_edges + level;
                    if level <= 1 && child_lvl > 1 {
                        let parent_data = mp_kind_of(cls.empdag, mpid).clone();
                        let child_data = mp_kind_of(cls.empdag, mp_var).clone();
                        cls.pending_ctrl_edges
                            .push((parent_data, child_data, child_lvl));
                    } else if level == 0 && child_lvl == 1 {
                        let parent_data = mp_kind_of(cls.empdag, mpid).clone();
                        let child_data = mp_kind_of(cls.empdag, mp_var).clone();
                        cls.pending_ctrl_edges.push((parent_data, child_data, 1));
                    }
                }
                continue;
            }

            // last option: an equilibrium variable; the LCA must be a Nash node
            match lca(
                mpnidx,
                mp_var.idx(),
                cls.empdag,
                cls.num_mps,
                cls.preorder,
                cls.postorder,
            ) {
                ParentIdx::Node(n) if n >= cls.num_mps => {
                    cls.mp_ppty[mpnidx].num_nashvar += 1;
                }
                ParentIdx::Node(n) => {
                    cls.diags.error(format!(
                        "in equation '{}', which belongs to MP({}), the external variable \
                         '{}' belongs to MP({}). The common ancestor {} between the two MP \
                         is not a Nash node, as it should be.",
                        ctr.equ_name(ei),
                        cls.empdag.mp_name(mpid),
                        ctr.var_name(vi),
                        cls.empdag.mp_name(mp_var),
                        cls.nidx_name(n)
                    ));
                    num_err += 1;
                }
                _ => {
                    cls.diags.error(format!(
                        "in equation '{}', which belongs to MP({}), the external variable \
                         '{}' belongs to MP({}). No common ancestor between the two MP \
                         could be found",
                        ctr.equ_name(ei),
                        cls.empdag.mp_name(mpid),
                        ctr.var_name(vi),
                        cls.empdag.mp_name(mp_var)
                    ));
                    num_err += 1;
                }
            }
        }

        if !equ_is_cst
            && !equ_has_owned_var
            && !foreign_equ_has_ctrl_descendant(cls, ctr, ei, mpnidx)?
        {
            report_foreign_equ(cls, ctr, ei, mpid)?;
            num_err += 1;
        }
    }

    Ok(num_err)
}

impl Classifier<'_> {
    fn nidx_name(&self, nidx: usize) -> String {
        if nidx < self.num_mps {
            format!("MP({})", self.empdag.mp_name(MpId::from(nidx)))
        } else {
            format!(
                "Nash({})",
                self.empdag.nash_name(NashId::from(nidx - self.num_mps))
            )
        }
    }
}

/// A foreign equation is acceptable when it still involves a variable
/// owned by a descendant of `mpnidx` (a solution variable of a follower);
/// anything else leaves the equation without a connection to the MP.
fn foreign_equ_has_ctrl_descendant(
    cls: &Classifier<'_>,
    ctr: &Container,
    ei: EquIdx,
    mpnidx: usize,
) -> Result<bool> {
    for &vi in ctr.equ_variables(ei)? {
        let mp_var = ctr.var_meta(vi)?.mp;
        if !mp_var.is_valid() {
            return Ok(false);
        }
        if !mp_var.is_regular() {
            continue;
        }
        if cls.is_ancestor(mpnidx, mp_var.idx()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Emit the foreign-equation diagnostic, listing owners and a suggestion
fn report_foreign_equ(
    cls: &mut Classifier<'_>,
    ctr: &Container,
    ei: EquIdx,
    mpid: MpId,
) -> Result<()> {
    let mut owners: Vec<MpId> = Vec::new();
    let mut lines = format!(
        "in MP({}): the equation '{}' does not involve any variable attached to this MP, \
         only external ones. This is known to produce a model with inferior solvability \
         guarantees. The equation '{}' involves the following variables:",
        cls.empdag.mp_name(mpid),
        ctr.equ_name(ei),
        ctr.equ_name(ei)
    );
    for &vi in ctr.equ_variables(ei)? {
        let mp_var = ctr.var_meta(vi)?.mp;
        if !mp_var.is_valid() {
            continue;
        }
        lines.push_str(&format!(
            " VAR {} belongs to MP({});",
            ctr.var_name(vi),
            cls.empdag.mp_name(mp_var)
        ));
        if !owners.contains(&mp_var) {
            owners.push(mp_var);
        }
    }
    if owners.len() == 1 {
        lines.push_str(&format!(
            " Suggestion: assign the equation to the MP({}) to fix this error",
            cls.empdag.mp_name(owners[0])
        ));
    } else {
        lines.push_str(" Assign this equation to another MP.");
    }
    cls.diags.error(lines);
    Ok(())
}

/// Run the full analysis
///
/// On success the dag's feature flags, `mps2reformulate` (sorted by
/// topological index) and `saddle_path_starts` are populated, and the
/// traversal data is returned for LCA queries and ordering decisions.
pub fn analyze(empdag: &mut EmpDag, ctr: &mut Container) -> Result<Analysis> {
    if empdag.roots.len() > 1 {
        return Err(Error::EmpIncorrectInput {
            issues: 1,
            first: format!(
                "EMPDAG has {} roots. This is not yet supported",
                empdag.roots.len()
            ),
        });
    }
    if empdag.roots.is_empty() {
        return Err(Error::EmpIncorrectInput {
            issues: 1,
            first: "EMPDAG has no root".to_string(),
        });
    }

    let root_uid = empdag.roots[0];
    let root_kind = match root_uid.as_mp() {
        Some(mpid) => match empdag.mp(mpid)?.data {
            MpData::Opt(_) | MpData::Ccflib(_) => RootKind::Opt,
            MpData::Vi(_) => RootKind::Vi,
            MpData::Undef => {
                return Err(Error::runtime(format!(
                    "unsupported root MP({}) with kind 'undef'",
                    empdag.mp_name(mpid)
                )))
            }
        },
        None => RootKind::Equil,
    };

    /* ----------------------------------------------------------------------
     * Phase 1: the DFS
     * ---------------------------------------------------------------------- */

    let mut dfs = DfsData::new(empdag);
    let pathdata = PathData {
        pathtype: PathType::Unset,
        depth: 0,
        saddle_path_start: MpId::NA,
        saddle_path_registered: false,
    };

    let res = match root_uid.as_mp() {
        Some(mpid) => dfs.visit_mp_root_or_nash(mpid, pathdata),
        None => dfs.visit_nash(root_uid.as_nash().unwrap(), pathdata),
    };
    match res {
        Ok(()) => {}
        Err(DfsErr::Fatal(e)) => return Err(e),
        Err(DfsErr::Cycle) | Err(DfsErr::CycleDone) => {
            dfs.diags.error("Cycle detected in the EMP DAG".to_string());
            return Err(dfs
                .diags
                .into_result()
                .expect_err("cycle diagnostics recorded"));
        }
    }

    if dfs.num_visited < dfs.num_nodes {
        let mut msg = "some problems are not present in the graph:".to_string();
        for nidx in 0..dfs.num_nodes {
            if dfs.state[nidx] != DfsState::Processed {
                msg.push_str(&format!(" {}", dfs.nidx_name(nidx)));
            }
        }
        dfs.diags.error(msg);
        return Err(dfs
            .diags
            .into_result()
            .expect_err("missing-node diagnostics recorded"));
    }

    let DfsData {
        num_mps,
        is_tree,
        has_vf_path,
        max_depth,
        preorder,
        postorder,
        topo_order,
        topo_revidx,
        adversarial_mps,
        saddle_path_starts,
        mut diags,
        ..
    } = dfs;

    /* ----------------------------------------------------------------------
     * Phase 2: per-node checks, parents before children
     * ---------------------------------------------------------------------- */

    let mut mp_level = vec![0u32; num_mps];
    let mut nash_level = vec![0u32; empdag.num_nashs()];
    let mut mp_ppty = vec![MpPpty::default(); num_mps];
    let mut processed_vi = bitvec![0; ctr.n_vars()];
    let mut var_buf: Vec<VarIdx> = Vec::new();
    let mut num_issues = 0usize;

    for &nidx in topo_order.iter().rev() {
        if nidx < num_mps {
            let mpid = MpId::from(nidx);
            let level = analyze_mp_level(empdag, mpid, &mp_level, &nash_level)?;
            mp_level[nidx] = level;
            mp_ppty[nidx].level = level;

            let mut cls = Classifier {
                empdag,
                num_mps,
                preorder: &preorder,
                postorder: &postorder,
                mp_ppty: &mut mp_ppty,
                diags: &mut diags,
                pending_ctrl_edges: Vec::new(),
            };
            let errs = analyze_mp_equs(&mut cls, ctr, mpid, level, &mut processed_vi, &mut var_buf)?;
            let pending = std::mem::take(&mut cls.pending_ctrl_edges);
            drop(cls);
            for (parent_data, child_data, lvl) in pending {
                mp_ctrledge(empdag, lvl, &parent_data, &child_data)?;
            }
            if errs > 0 {
                diags.error(format!(
                    "{errs} errors found while checking MP({})",
                    empdag.mp_name(mpid)
                ));
                num_issues += 1;
            }
        } else {
            let nashid = NashId::from(nidx - num_mps);
            let level = analyze_nash_level(empdag, nashid, &mp_level)?;
            nash_level[nashid.idx()] = level;
        }
    }

    if num_issues > 0 {
        diags.error(format!("analysis yielded {num_issues} nodes with issues"));
    }
    diags.into_result()?;

    /* ----------------------------------------------------------------------
     * Phase 3: record the results on the dag
     * ---------------------------------------------------------------------- */

    if !adversarial_mps.is_empty() {
        tracing::debug!(target: "reshop::empdag",
                        num_adversarial = adversarial_mps.len(),
                        num_saddle_paths = saddle_path_starts.len(),
                        "adversarial MPs found");
        let mut sorted = adversarial_mps.clone();
        sorted.sort_by_key(|m| topo_revidx[m.idx()]);
        empdag.mps2reformulate = sorted;
        empdag.saddle_path_starts = saddle_path_starts;
    }

    empdag.features.istree = is_tree;
    empdag.features.has_vf_path = has_vf_path;
    empdag.features.root_kind = Some(root_kind);

    Ok(Analysis {
        num_mps,
        preorder,
        postorder,
        topo_order,
        topo_revidx,
        max_depth,
        is_tree,
        has_vf_path,
        mp_ppty,
        adversarial_mps,
    })
}

/// Compute the level of a Nash node and record the edge features
fn analyze_nash_level(empdag: &mut EmpDag, nashid: NashId, mp_level: &[u32]) -> Result<u32> {
    let rarcs: Vec<NodeUid> = empdag.nashs.rarcs[nashid.idx()].iter().copied().collect();
    let mut level = 0;
    let mut parent_opt = false;
    let mut parent_vi = false;

    for (i, &uid) in rarcs.iter().enumerate() {
        let Some(pid) = uid.as_mp() else {
            return Err(Error::runtime(format!(
                "Nash({}) has a non-MP parent",
                empdag.nash_name(nashid)
            )));
        };
        let l = mp_level[pid.idx()];
        if i == 0 {
            level = l;
        } else if l != level {
            return Err(Error::not_implemented(format!(
                "Nash({}) has different levels by different parents: {l} vs {level}",
                empdag.nash_name(nashid)
            )));
        }
        match mp_kind_of(empdag, pid) {
            MpData::Opt(_) | MpData::Ccflib(_) => parent_opt = true,
            MpData::Vi(_) => parent_vi = true,
            MpData::Undef => {
                return Err(Error::runtime("unexpected MP kind 'undef'".to_string()))
            }
        }
    }

    if parent_vi {
        if level > 1 {
            empdag
                .features
                .vi_edge
                .set(ViEdgeFeatures::MULTILEVEL_CONSTRAINT);
        } else {
            empdag
                .features
                .vi_edge
                .set(ViEdgeFeatures::EQUIL_CONSTRAINT);
        }
    }
    if parent_opt {
        if level > 1 {
            empdag
                .features
                .opt_edge
                .set(OptEdgeFeatures::MULTILEVEL_CONSTRAINT);
        } else {
            empdag
                .features
                .opt_edge
                .set(OptEdgeFeatures::EQUIL_CONSTRAINT);
        }
    }
    Ok(level)
}

impl Analysis {
    /// Lowest common ancestor of two MPs, as a node uid
    ///
    /// Returns `NONE` when the walk leaves the tree (multiple parents or
    /// no common ancestor).
    pub fn lca_mps(&self, empdag: &EmpDag, u: MpId, v: MpId) -> NodeUid {
        match lca(
            u.idx(),
            v.idx(),
            empdag,
            self.num_mps,
            &self.preorder,
            &self.postorder,
        ) {
            ParentIdx::Node(n) if n < self.num_mps => NodeUid::mp(MpId::from(n)),
            ParentIdx::Node(n) => NodeUid::nash(NashId::from(n - self.num_mps)),
            _ => NodeUid::NONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::empdag::ArcVf;

    /// A chain root -> a -> b of CTRL edges with trivial MPs
    fn ctrl_chain(ctr: &mut Container, n: usize) -> (EmpDag, Vec<MpId>) {
        let mut dag = EmpDag::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = dag.new_mp(Sense::Min, Some(format!("mp{i}"))).unwrap();
            let x = ctr.add_var(0.0, f64::INFINITY).unwrap();
            let e = ctr.add_greaterthan().unwrap();
            ctr.equ_add_new_linear_var(e, x, 1.0).unwrap();
            ctr.sync_lequ(e).unwrap();
            let mp = dag.mp_mut(id).unwrap();
            mp.set_opt();
            mp.set_objvar(x, ctr).unwrap();
            mp.add_constraint(e, ctr).unwrap();
            ids.push(id);
        }
        for w in ids.windows(2) {
            dag.mp_add_mp_via_ctrl(w[0], w[1]).unwrap();
        }
        dag.compute_roots();
        (dag, ids)
    }

    #[test]
    fn test_topo_order_children_first() {
        let mut ctr = Container::new();
        let (mut dag, ids) = ctrl_chain(&mut ctr, 3);
        let analysis = analyze(&mut dag, &mut ctr).unwrap();
        assert!(analysis.is_tree);
        assert_eq!(analysis.max_depth, 2);
        // children come first in the emitted post-order
        assert!(analysis.topo_index_mp(ids[2]) < analysis.topo_index_mp(ids[1]));
        assert!(analysis.topo_index_mp(ids[1]) < analysis.topo_index_mp(ids[0]));
    }

    #[test]
    fn test_cycle_detection() {
        let mut ctr = Container::new();
        let (mut dag, ids) = ctrl_chain(&mut ctr, 3);
        // close the loop: mp2 -> mp0
        dag.mp_add_mp_via_ctrl(ids[2], ids[0]).unwrap();
        dag.roots.clear();
        dag.set_root(NodeUid::mp(ids[0])).unwrap();
        let err = analyze(&mut dag, &mut ctr).unwrap_err();
        match err {
            Error::EmpIncorrectInput { first, .. } => {
                assert!(first.contains("Cycle detected"), "got: {first}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_root_rejected() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        assert!(matches!(
            analyze(&mut dag, &mut ctr),
            Err(Error::EmpIncorrectInput { .. })
        ));
    }

    #[test]
    fn test_unvisited_nodes_reported() {
        let mut ctr = Container::new();
        let (mut dag, ids) = ctrl_chain(&mut ctr, 2);
        // a disconnected MP
        let stray = dag.new_mp(Sense::Min, Some("stray".to_string())).unwrap();
        let x = ctr.add_var(0.0, 1.0).unwrap();
        let mp = dag.mp_mut(stray).unwrap();
        mp.set_opt();
        mp.set_objvar(x, &mut ctr).unwrap();
        dag.roots.clear();
        dag.set_root(NodeUid::mp(ids[0])).unwrap();
        let err = analyze(&mut dag, &mut ctr).unwrap_err();
        match err {
            Error::EmpIncorrectInput { first, .. } => {
                assert!(first.contains("not present in the graph"));
                assert!(first.contains("stray"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_lca_on_tree() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        // root controls a Nash node with two players
        let root = dag.new_mp(Sense::Min, Some("leader".to_string())).unwrap();
        let xr = ctr.add_var(0.0, 1.0).unwrap();
        {
            let mp = dag.mp_mut(root).unwrap();
            mp.set_opt();
            mp.set_objvar(xr, &mut ctr).unwrap();
        }
        let nash = dag.new_nash(Some("eq".to_string())).unwrap();
        dag.mp_add_nash_via_ctrl(root, nash).unwrap();
        let mut players = Vec::new();
        for i in 0..2 {
            let p = dag
                .new_mp(Sense::Max, Some(format!("player{i}")))
                .unwrap();
            let x = ctr.add_var(0.0, 1.0).unwrap();
            let mp = dag.mp_mut(p).unwrap();
            mp.set_opt();
            mp.set_objvar(x, &mut ctr).unwrap();
            dag.nash_add_mp(nash, p).unwrap();
            players.push(p);
        }
        dag.compute_roots();
        let analysis = analyze(&mut dag, &mut ctr).unwrap();
        let found = analysis.lca_mps(&dag, players[0], players[1]);
        assert_eq!(found.as_nash(), Some(nash));
        // lca of a node and its ancestor is the ancestor
        let found = analysis.lca_mps(&dag, root, players[1]);
        assert_eq!(found.as_mp(), Some(root));
    }

    #[test]
    fn test_saddle_path_detection() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        // min-root --VF--> max-child: adversarial
        let root = dag.new_mp(Sense::Min, Some("outer".to_string())).unwrap();
        let x = ctr.add_var(0.0, f64::INFINITY).unwrap();
        let eobj = ctr.add_equality().unwrap();
        ctr.equ_add_new_linear_var(eobj, x, 1.0).unwrap();
        ctr.sync_lequ(eobj).unwrap();
        {
            let mp = dag.mp_mut(root).unwrap();
            mp.set_opt();
            mp.set_objequ(eobj, &mut ctr).unwrap();
            mp.add_var(x, &mut ctr).unwrap();
        }
        let adv = dag.new_mp(Sense::Max, Some("inner".to_string())).unwrap();
        let y = ctr.add_var(0.0, 1.0).unwrap();
        {
            let mp = dag.mp_mut(adv).unwrap();
            mp.set_opt();
            mp.set_objvar(y, &mut ctr).unwrap();
        }
        dag.mp_add_mp_via_vf(root, adv, ArcVf::init(eobj)).unwrap();
        dag.compute_roots();

        let analysis = analyze(&mut dag, &mut ctr).unwrap();
        assert!(analysis.has_vf_path);
        assert_eq!(analysis.adversarial_mps, vec![adv]);
        assert_eq!(dag.saddle_path_starts, vec![root]);
        assert_eq!(dag.mps2reformulate, vec![adv]);
    }

    #[test]
    fn test_aligned_vf_path_not_adversarial() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        let root = dag.new_mp(Sense::Min, None).unwrap();
        let x = ctr.add_var(0.0, f64::INFINITY).unwrap();
        let eobj = ctr.add_equality().unwrap();
        ctr.equ_add_new_linear_var(eobj, x, 1.0).unwrap();
        ctr.sync_lequ(eobj).unwrap();
        {
            let mp = dag.mp_mut(root).unwrap();
            mp.set_opt();
            mp.set_objequ(eobj, &mut ctr).unwrap();
            mp.add_var(x, &mut ctr).unwrap();
        }
        let child = dag.new_mp(Sense::Min, None).unwrap();
        let y = ctr.add_var(0.0, 1.0).unwrap();
        {
            let mp = dag.mp_mut(child).unwrap();
            mp.set_opt();
            mp.set_objvar(y, &mut ctr).unwrap();
        }
        dag.mp_add_mp_via_vf(root, child, ArcVf::init(eobj))
            .unwrap();
        dag.compute_roots();

        let analysis = analyze(&mut dag, &mut ctr).unwrap();
        assert!(analysis.adversarial_mps.is_empty());
        assert!(dag.mps2reformulate.is_empty());
        assert!(analysis.has_vf_path);
    }

    #[test]
    fn test_control_variable_classification() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        // leader owns z; follower's constraint uses z: control variable
        let leader = dag.new_mp(Sense::Min, Some("leader".to_string())).unwrap();
        let z = ctr.add_var(0.0, f64::INFINITY).unwrap();
        {
            let mp = dag.mp_mut(leader).unwrap();
            mp.set_opt();
            mp.set_objvar(z, &mut ctr).unwrap();
        }
        let follower = dag
            .new_mp(Sense::Min, Some("follower".to_string()))
            .unwrap();
        let w = ctr.add_var(0.0, f64::INFINITY).unwrap();
        let e = ctr.add_greaterthan().unwrap();
        ctr.equ_add_new_linear_var(e, w, 1.0).unwrap();
        ctr.equ_add_new_linear_var(e, z, -1.0).unwrap();
        ctr.sync_lequ(e).unwrap();
        {
            let mp = dag.mp_mut(follower).unwrap();
            mp.set_opt();
            mp.set_objvar(w, &mut ctr).unwrap();
            mp.add_constraint(e, &mut ctr).unwrap();
        }
        dag.mp_add_mp_via_ctrl(leader, follower).unwrap();
        dag.compute_roots();

        let analysis = analyze(&mut dag, &mut ctr).unwrap();
        let ppty = &analysis.mp_ppty[follower.idx()];
        assert_eq!(ppty.num_ctrlvar, 1);
        assert_eq!(ppty.num_ownvar, 1);
        assert_eq!(ppty.level, 1);
        assert!(dag
            .features
            .opt_edge
            .has(OptEdgeFeatures::OPT_SOLMAP_CONSTRAINT));
    }

    #[test]
    fn test_future_variable_rejected() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        // parent equation uses the VF child's variable: error
        let parent = dag.new_mp(Sense::Min, Some("parent".to_string())).unwrap();
        let child = dag.new_mp(Sense::Min, Some("child".to_string())).unwrap();
        let xc = ctr.add_var(0.0, 1.0).unwrap();
        {
            let mp = dag.mp_mut(child).unwrap();
            mp.set_opt();
            mp.set_objvar(xc, &mut ctr).unwrap();
        }
        let xp = ctr.add_var(0.0, 1.0).unwrap();
        let eobj = ctr.add_equality().unwrap();
        ctr.equ_add_new_linear_var(eobj, xp, 1.0).unwrap();
        ctr.equ_add_new_linear_var(eobj, xc, 1.0).unwrap();
        ctr.sync_lequ(eobj).unwrap();
        {
            let mp = dag.mp_mut(parent).unwrap();
            mp.set_opt();
            mp.set_objequ(eobj, &mut ctr).unwrap();
            mp.add_var(xp, &mut ctr).unwrap();
        }
        dag.mp_add_mp_via_vf(parent, child, ArcVf::init(eobj))
            .unwrap();
        dag.compute_roots();

        let err = analyze(&mut dag, &mut ctr).unwrap_err();
        match err {
            Error::EmpIncorrectInput { first, .. } => {
                assert!(first.contains("linked by VF edges"), "got: {first}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_equilibrium_variable_needs_nash_lca() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        let nash = dag.new_nash(Some("eq".to_string())).unwrap();
        let mut xs = Vec::new();
        let mut ids = Vec::new();
        for i in 0..2 {
            let p = dag.new_mp(Sense::Max, Some(format!("p{i}"))).unwrap();
            let x = ctr.add_var(0.0, 1.0).unwrap();
            xs.push(x);
            ids.push(p);
        }
        // each player's objective couples to the other's variable
        for i in 0..2 {
            let e = ctr.add_equality().unwrap();
            ctr.equ_add_new_linear_var(e, xs[i], 1.0).unwrap();
            ctr.equ_add_new_linear_var(e, xs[1 - i], -0.5).unwrap();
            ctr.sync_lequ(e).unwrap();
            let mp = dag.mp_mut(ids[i]).unwrap();
            mp.set_opt();
            mp.set_objequ(e, &mut ctr).unwrap();
            mp.add_var(xs[i], &mut ctr).unwrap();
            dag.nash_add_mp(nash, ids[i]).unwrap();
        }
        dag.compute_roots();

        let analysis = analyze(&mut dag, &mut ctr).unwrap();
        assert_eq!(analysis.mp_ppty[ids[0].idx()].num_nashvar, 1);
        assert_eq!(analysis.mp_ppty[ids[1].idx()].num_nashvar, 1);
    }

    #[test]
    fn test_foreign_equation_diagnostic() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        let nash = dag.new_nash(None).unwrap();
        let a = dag.new_mp(Sense::Min, Some("a".to_string())).unwrap();
        let b = dag.new_mp(Sense::Min, Some("b".to_string())).unwrap();
        let xa = ctr.add_var(0.0, 1.0).unwrap();
        let xb = ctr.add_var(0.0, 1.0).unwrap();
        {
            let mp = dag.mp_mut(a).unwrap();
            mp.set_opt();
            mp.set_objvar(xa, &mut ctr).unwrap();
        }
        // b's constraint only uses a's variable
        let e = ctr.add_greaterthan().unwrap();
        ctr.equ_add_new_linear_var(e, xa, 1.0).unwrap();
        ctr.sync_lequ(e).unwrap();
        {
            let mp = dag.mp_mut(b).unwrap();
            mp.set_opt();
            mp.set_objvar(xb, &mut ctr).unwrap();
            mp.add_constraint(e, &mut ctr).unwrap();
        }
        dag.nash_add_mp(nash, a).unwrap();
        dag.nash_add_mp(nash, b).unwrap();
        dag.compute_roots();

        let err = analyze(&mut dag, &mut ctr).unwrap_err();
        match err {
            Error::EmpIncorrectInput { first, .. } => {
                assert!(
                    first.contains("does not involve any variable attached to this MP"),
                    "got: {first}"
                );
                assert!(first.contains("assign the equation to the MP(a)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_nash_flagged() {
        let mut ctr = Container::new();
        let mut dag = EmpDag::new();
        let nash = dag.new_nash(Some("empty".to_string())).unwrap();
        dag.set_root(NodeUid::nash(nash)).unwrap();
        let err = analyze(&mut dag, &mut ctr).unwrap_err();
        match err {
            Error::EmpIncorrectInput { first, .. } => {
                assert!(first.contains("has no child"), "got: {first}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
