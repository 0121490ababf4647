//! Blocks of variables and equations
//!
//! Reformulations allocate variables in blocks (the `y`, `v`, `w`, `s`
//! blocks of the Fenchel dual, the argument list of an OVF). A block is
//! either compact (contiguous indices) or an explicit list; both forms
//! expose the same positional access.

use crate::idx::{EquIdx, VarIdx};

/// A block of variables, compact or listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Avar {
    /// `size` consecutive indices starting at `start`
    Compact {
        /// Number of variables
        size: u32,
        /// First index of the block
        start: VarIdx,
    },
    /// Explicit index list
    List(Vec<VarIdx>),
}

impl Avar {
    /// An empty block
    pub fn empty() -> Self {
        Avar::Compact {
            size: 0,
            start: VarIdx::NA,
        }
    }

    /// A compact block of `size` indices starting at `start`
    pub fn compact(size: u32, start: VarIdx) -> Self {
        Avar::Compact { size, start }
    }

    /// A block over an explicit list
    pub fn list(ids: Vec<VarIdx>) -> Self {
        Avar::List(ids)
    }

    /// Number of variables in the block
    pub fn size(&self) -> usize {
        match self {
            Avar::Compact { size, .. } => *size as usize,
            Avar::List(ids) => ids.len(),
        }
    }

    /// True when the block holds no variable
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The `i`-th variable of the block
    pub fn get(&self, i: usize) -> Option<VarIdx> {
        match self {
            Avar::Compact { size, start } => {
                (i < *size as usize).then(|| VarIdx::new(start.raw() + i as u32))
            }
            Avar::List(ids) => ids.get(i).copied(),
        }
    }

    /// Membership test
    pub fn contains(&self, vi: VarIdx) -> bool {
        match self {
            Avar::Compact { size, start } => {
                vi.raw() >= start.raw() && vi.raw() < start.raw() + size
            }
            Avar::List(ids) => ids.contains(&vi),
        }
    }

    /// Position of `vi` inside the block, if present
    pub fn position(&self, vi: VarIdx) -> Option<usize> {
        match self {
            Avar::Compact { size, start } => {
                (vi.raw() >= start.raw() && vi.raw() < start.raw() + size)
                    .then(|| (vi.raw() - start.raw()) as usize)
            }
            Avar::List(ids) => ids.iter().position(|&v| v == vi),
        }
    }

    /// Iterate over the block in positional order
    pub fn iter(&self) -> AvarIter<'_> {
        AvarIter { avar: self, pos: 0 }
    }
}

/// Positional iterator over an [`Avar`]
pub struct AvarIter<'a> {
    avar: &'a Avar,
    pos: usize,
}

impl Iterator for AvarIter<'_> {
    type Item = VarIdx;

    fn next(&mut self) -> Option<VarIdx> {
        let out = self.avar.get(self.pos);
        if out.is_some() {
            self.pos += 1;
        }
        out
    }
}

/// A block of equations, compact or listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aequ {
    /// `size` consecutive indices starting at `start`
    Compact {
        /// Number of equations
        size: u32,
        /// First index of the block
        start: EquIdx,
    },
    /// Explicit index list
    List(Vec<EquIdx>),
}

impl Aequ {
    /// An empty block
    pub fn empty() -> Self {
        Aequ::Compact {
            size: 0,
            start: EquIdx::NA,
        }
    }

    /// A compact block of `size` indices starting at `start`
    pub fn compact(size: u32, start: EquIdx) -> Self {
        Aequ::Compact { size, start }
    }

    /// A block over an explicit list
    pub fn list(ids: Vec<EquIdx>) -> Self {
        Aequ::List(ids)
    }

    /// Number of equations in the block
    pub fn size(&self) -> usize {
        match self {
            Aequ::Compact { size, .. } => *size as usize,
            Aequ::List(ids) => ids.len(),
        }
    }

    /// True when the block holds no equation
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The `i`-th equation of the block
    pub fn get(&self, i: usize) -> Option<EquIdx> {
        match self {
            Aequ::Compact { size, start } => {
                (i < *size as usize).then(|| EquIdx::new(start.raw() + i as u32))
            }
            Aequ::List(ids) => ids.get(i).copied(),
        }
    }

    /// Membership test
    pub fn contains(&self, ei: EquIdx) -> bool {
        match self {
            Aequ::Compact { size, start } => {
                ei.raw() >= start.raw() && ei.raw() < start.raw() + size
            }
            Aequ::List(ids) => ids.contains(&ei),
        }
    }

    /// Iterate over the block in positional order
    pub fn iter(&self) -> AequIter<'_> {
        AequIter { aequ: self, pos: 0 }
    }
}

/// Positional iterator over an [`Aequ`]
pub struct AequIter<'a> {
    aequ: &'a Aequ,
    pos: usize,
}

impl Iterator for AequIter<'_> {
    type Item = EquIdx;

    fn next(&mut self) -> Option<EquIdx> {
        let out = self.aequ.get(self.pos);
        if out.is_some() {
            self.pos += 1;
        }
        out
    }
}
