//! Typed indices for variables, equations, and EMPDAG nodes
//!
//! Every entity of the engine is addressed by a newtype over `u32`:
//!
//! - [`VarIdx`] / [`EquIdx`] - container variables and equations
//! - [`MpId`] / [`NashId`] - EMPDAG nodes
//! - [`NodeUid`] - a packed node reference carrying the node kind and,
//!   on reverse arcs, the kind of the incoming edge
//!
//! The upper band of each index domain is reserved for sentinels, so a
//! stored index can always be distinguished from "no index", "deleted",
//! or "out of range" without a side channel.

use serde::{Deserialize, Serialize};

macro_rules! idx_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Largest index a live entity may carry
            pub const MAX_VALID: $name = $name(u32::MAX - 10);
            /// No index was ever assigned
            pub const NA: $name = $name(u32::MAX);
            /// An index that failed validation
            pub const INVALID: $name = $name(u32::MAX - 1);
            /// The entity was deleted from its container
            pub const DELETED: $name = $name(u32::MAX - 2);
            /// An index past the end of its table
            pub const OUT_OF_RANGE: $name = $name(u32::MAX - 3);

            /// Wrap a raw index
            pub const fn new(i: u32) -> Self {
                Self(i)
            }

            /// True when the index addresses a live entity
            pub const fn is_valid(self) -> bool {
                self.0 < Self::MAX_VALID.0
            }

            /// The raw value, usable as a table offset
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// The raw value as a `usize` table offset
            pub const fn idx(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(i: usize) -> Self {
                debug_assert!(i < Self::MAX_VALID.0 as usize);
                Self(i as u32)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match *self {
                    Self::NA => write!(f, "n/a"),
                    Self::INVALID => write!(f, "invalid"),
                    Self::DELETED => write!(f, "deleted"),
                    Self::OUT_OF_RANGE => write!(f, "out-of-range"),
                    Self(i) => write!(f, "{i}"),
                }
            }
        }
    };
}

idx_newtype!(
    /// Index of a variable in the container
    VarIdx
);

idx_newtype!(
    /// Index of an equation in the container
    EquIdx
);

/// Index of a mathematical program in the EMPDAG
///
/// Regular MPs occupy the lower half of the `u32` space. The upper bits
/// encode a small set of special values with a payload: a shared-equation
/// group, a shared-variable group, or an OVF definition. Special values
/// are carried through metadata but the engine does not interpret them
/// beyond recognition; analysis paths that meet one bail out with
/// `NotImplemented`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MpId(pub(crate) u32);

/// What a non-regular [`MpId`] stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpSpecial {
    /// A group of equations shared between several MPs
    SharedEqu,
    /// A group of variables shared between several MPs
    SharedVar,
    /// An OVF definition payload
    OvfData,
}

const MPID_SPECIAL: u32 = !(u32::MAX >> 1); // 0x8000_0000
const MPID_SHARED_EQU: u32 = MPID_SPECIAL | (MPID_SPECIAL >> 1);
const MPID_SHARED_VAR: u32 = MPID_SPECIAL | (MPID_SPECIAL >> 2);
const MPID_OVF_DATA: u32 = MPID_SPECIAL | (MPID_SPECIAL >> 3);
const MPID_TAG_MASK: u32 = MPID_SHARED_EQU | MPID_SHARED_VAR | MPID_OVF_DATA;
const MPID_PAYLOAD_MASK: u32 = u32::MAX & !(MPID_SPECIAL | MPID_TAG_MASK);

impl MpId {
    /// No MP assigned
    pub const NA: MpId = MpId(u32::MAX);
    /// Largest regular MP id
    pub const MAX_REGULAR: MpId = MpId(u32::MAX >> 1);

    /// Wrap a raw regular id
    pub const fn new(i: u32) -> Self {
        Self(i)
    }

    /// Tag a shared-equation group
    pub const fn shared_equ(group: u32) -> Self {
        Self(MPID_SHARED_EQU | (group & MPID_PAYLOAD_MASK))
    }

    /// Tag a shared-variable group
    pub const fn shared_var(group: u32) -> Self {
        Self(MPID_SHARED_VAR | (group & MPID_PAYLOAD_MASK))
    }

    /// Tag an OVF definition payload
    pub const fn ovf_data(idx: u32) -> Self {
        Self(MPID_OVF_DATA | (idx & MPID_PAYLOAD_MASK))
    }

    /// True unless this is [`MpId::NA`]
    pub const fn is_valid(self) -> bool {
        self.0 < Self::NA.0
    }

    /// True when this addresses a regular MP node
    pub const fn is_regular(self) -> bool {
        self.0 <= Self::MAX_REGULAR.0
    }

    /// The special tag, if any
    pub fn special(self) -> Option<MpSpecial> {
        if self.is_regular() || !self.is_valid() {
            return None;
        }
        match self.0 & MPID_TAG_MASK {
            t if t == MPID_SHARED_EQU => Some(MpSpecial::SharedEqu),
            t if t == MPID_SHARED_VAR => Some(MpSpecial::SharedVar),
            t if t == MPID_OVF_DATA => Some(MpSpecial::OvfData),
            _ => None,
        }
    }

    /// Payload of a special id (group or OVF index)
    pub fn payload(self) -> u32 {
        debug_assert!(self.special().is_some());
        self.0 & MPID_PAYLOAD_MASK
    }

    /// The raw value as a `usize` table offset (regular ids only)
    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    /// The raw value
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<usize> for MpId {
    fn from(i: usize) -> Self {
        debug_assert!(i <= Self::MAX_REGULAR.0 as usize);
        Self(i as u32)
    }
}

impl std::fmt::Display for MpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.special() {
            Some(MpSpecial::SharedEqu) => write!(f, "shared-equ group {}", self.payload()),
            Some(MpSpecial::SharedVar) => write!(f, "shared-var group {}", self.payload()),
            Some(MpSpecial::OvfData) => write!(f, "ovf data {}", self.payload()),
            None if !self.is_valid() => write!(f, "n/a"),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Index of a Nash-equilibrium node in the EMPDAG
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NashId(pub(crate) u32);

impl NashId {
    /// No Nash node assigned
    pub const NA: NashId = NashId(u32::MAX);

    /// Wrap a raw id
    pub const fn new(i: u32) -> Self {
        Self(i)
    }

    /// True unless this is [`NashId::NA`]
    pub const fn is_valid(self) -> bool {
        self.0 < Self::NA.0
    }

    /// The raw value as a `usize` table offset
    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    /// The raw value
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<usize> for NashId {
    fn from(i: usize) -> Self {
        Self(i as u32)
    }
}

impl std::fmt::Display for NashId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "n/a")
        }
    }
}

/// Kind of an EMPDAG node addressed by a [`NodeUid`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A mathematical program
    Mp,
    /// A Nash-equilibrium node
    Nash,
}

/// Kind of an EMPDAG edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Control edge (leader/follower)
    Ctrl,
    /// Value-function edge
    Vf,
}

const UID_EDGE_MASK: u32 = 1;
const UID_NODE_MASK: u32 = 2;

/// Packed EMPDAG node reference
///
/// Layout: `(id << 2) | (node_kind << 1) | edge_kind`. The edge bit is
/// meaningful only when the uid was read from a reverse-arc list, where it
/// records the kind of the incoming edge; forward and root uids leave it
/// at `Ctrl` (zero). The packing is stable for printed diagnostics but is
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeUid(u32);

impl Default for NodeUid {
    fn default() -> Self {
        Self::NONE
    }
}

impl NodeUid {
    /// Largest id a uid can carry
    pub const ID_MAX: u32 = (u32::MAX >> 2) - 1;
    /// Refers to no concrete node
    pub const NONE: NodeUid = NodeUid(u32::MAX);

    /// Pack a uid from its three fields
    pub fn pack(kind: NodeKind, edge: EdgeKind, id: u32) -> Self {
        debug_assert!(id <= Self::ID_MAX);
        let k = match kind {
            NodeKind::Mp => 0,
            NodeKind::Nash => UID_NODE_MASK,
        };
        let e = match edge {
            EdgeKind::Ctrl => 0,
            EdgeKind::Vf => UID_EDGE_MASK,
        };
        Self((id << 2) | k | e)
    }

    /// Uid of an MP node (edge bit cleared)
    pub fn mp(id: MpId) -> Self {
        Self::pack(NodeKind::Mp, EdgeKind::Ctrl, id.0)
    }

    /// Uid of a Nash node (edge bit cleared)
    pub fn nash(id: NashId) -> Self {
        Self::pack(NodeKind::Nash, EdgeKind::Ctrl, id.0)
    }

    /// The same uid with the incoming-edge kind recorded
    pub fn with_edge(self, edge: EdgeKind) -> Self {
        match edge {
            EdgeKind::Ctrl => Self(self.0 & !UID_EDGE_MASK),
            EdgeKind::Vf => Self(self.0 | UID_EDGE_MASK),
        }
    }

    /// Node id, without kind or edge bits
    pub const fn id(self) -> u32 {
        self.0 >> 2
    }

    /// Node kind
    pub const fn kind(self) -> NodeKind {
        if self.0 & UID_NODE_MASK == 0 {
            NodeKind::Mp
        } else {
            NodeKind::Nash
        }
    }

    /// Incoming-edge kind (only meaningful on reverse-arc entries)
    pub const fn edge_kind(self) -> EdgeKind {
        if self.0 & UID_EDGE_MASK == 0 {
            EdgeKind::Ctrl
        } else {
            EdgeKind::Vf
        }
    }

    /// True when the uid addresses an MP node
    pub const fn is_mp(self) -> bool {
        matches!(self.kind(), NodeKind::Mp)
    }

    /// True when the uid addresses a Nash node
    pub const fn is_nash(self) -> bool {
        matches!(self.kind(), NodeKind::Nash)
    }

    /// True unless this is [`NodeUid::NONE`]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::NONE.0
    }

    /// The MP id, when the uid addresses an MP
    pub fn as_mp(self) -> Option<MpId> {
        self.is_mp().then(|| MpId(self.id()))
    }

    /// The Nash id, when the uid addresses a Nash node
    pub fn as_nash(self) -> Option<NashId> {
        self.is_nash().then(|| NashId(self.id()))
    }

    /// True when the two uids address the same node, ignoring edge bits
    pub fn same_node(self, other: NodeUid) -> bool {
        (self.0 | UID_EDGE_MASK) == (other.0 | UID_EDGE_MASK)
    }
}

impl std::fmt::Display for NodeUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_valid() {
            return write!(f, "node(none)");
        }
        match self.kind() {
            NodeKind::Mp => write!(f, "MP({})", self.id()),
            NodeKind::Nash => write!(f, "Nash({})", self.id()),
        }
    }
}

// The packing leaves 30 bits for the id.
const _: () = assert!(NodeUid::ID_MAX < (1 << 30));

/// A strictly sorted, duplicate-free list of indices
///
/// Used for the owned-variable and owned-equation lists of an MP, where
/// membership tests and ordered iteration dominate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdxList<T: Copy + Ord> {
    items: Vec<T>,
}

impl<T: Copy + Ord> IdxList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Insert an index, keeping the list sorted; no-op on duplicates
    ///
    /// Returns true when the index was not already present.
    pub fn insert(&mut self, idx: T) -> bool {
        match self.items.binary_search(&idx) {
            Ok(_) => false,
            Err(pos) => {
                self.items.insert(pos, idx);
                true
            }
        }
    }

    /// Remove an index, keeping order; returns true when it was present
    pub fn remove(&mut self, idx: T) -> bool {
        match self.items.binary_search(&idx) {
            Ok(pos) => {
                self.items.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Membership test
    pub fn contains(&self, idx: T) -> bool {
        self.items.binary_search(&idx).is_ok()
    }

    /// Number of indices
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no index is stored
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The indices, in ascending order
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Iterate in ascending order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<'a, T: Copy + Ord> IntoIterator for &'a IdxList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sentinels() {
        assert!(!VarIdx::NA.is_valid());
        assert!(!VarIdx::DELETED.is_valid());
        assert!(!EquIdx::OUT_OF_RANGE.is_valid());
        assert!(VarIdx::new(0).is_valid());
        assert!(EquIdx::new(123).is_valid());
    }

    #[test]
    fn test_mpid_special() {
        let se = MpId::shared_equ(7);
        assert!(!se.is_regular());
        assert_eq!(se.special(), Some(MpSpecial::SharedEqu));
        assert_eq!(se.payload(), 7);

        let sv = MpId::shared_var(3);
        assert_eq!(sv.special(), Some(MpSpecial::SharedVar));
        assert_eq!(sv.payload(), 3);

        let ov = MpId::ovf_data(12);
        assert_eq!(ov.special(), Some(MpSpecial::OvfData));
        assert_eq!(ov.payload(), 12);

        assert_eq!(MpId::new(42).special(), None);
        assert!(MpId::new(42).is_regular());
        assert_eq!(MpId::NA.special(), None);
    }

    #[test]
    fn test_uid_edge_bit() {
        let uid = NodeUid::mp(MpId::new(5));
        assert_eq!(uid.edge_kind(), EdgeKind::Ctrl);
        let rarc = uid.with_edge(EdgeKind::Vf);
        assert_eq!(rarc.edge_kind(), EdgeKind::Vf);
        assert_eq!(rarc.id(), 5);
        assert!(rarc.same_node(uid));
    }

    #[test]
    fn test_uid_display() {
        assert_eq!(NodeUid::mp(MpId::new(3)).to_string(), "MP(3)");
        assert_eq!(NodeUid::nash(NashId::new(1)).to_string(), "Nash(1)");
    }

    proptest! {
        #[test]
        fn prop_uid_roundtrip(id in 0u32..=NodeUid::ID_MAX, nash in any::<bool>(), vf in any::<bool>()) {
            let kind = if nash { NodeKind::Nash } else { NodeKind::Mp };
            let edge = if vf { EdgeKind::Vf } else { EdgeKind::Ctrl };
            let uid = NodeUid::pack(kind, edge, id);
            prop_assert_eq!(uid.kind(), kind);
            prop_assert_eq!(uid.edge_kind(), edge);
            prop_assert_eq!(uid.id(), id);
        }

        #[test]
        fn prop_idxlist_sorted(mut ids in proptest::collection::vec(0u32..1000, 0..64)) {
            let mut list = IdxList::new();
            for &i in &ids {
                list.insert(VarIdx::new(i));
            }
            ids.sort_unstable();
            ids.dedup();
            let got: Vec<u32> = list.iter().map(|v| v.raw()).collect();
            prop_assert_eq!(got, ids);
        }
    }
}
