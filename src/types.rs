//! Common types used across the engine

use serde::{Deserialize, Serialize};

/// Optimization sense of a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    /// Minimize the objective
    Min,
    /// Maximize the objective
    Max,
    /// Pure feasibility (no objective)
    Feasibility,
}

impl Sense {
    /// The opposite optimization sense; feasibility is its own opposite
    pub fn opposite(self) -> Sense {
        match self {
            Sense::Min => Sense::Max,
            Sense::Max => Sense::Min,
            Sense::Feasibility => Sense::Feasibility,
        }
    }

    /// True for `Min` or `Max`
    pub fn is_optimizing(self) -> bool {
        !matches!(self, Sense::Feasibility)
    }
}

impl std::fmt::Display for Sense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sense::Min => "min",
            Sense::Max => "max",
            Sense::Feasibility => "feasibility",
        };
        f.write_str(s)
    }
}

/// Classification of a model after type recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// Not yet determined
    Undefined,
    /// Linear program
    Lp,
    /// Quadratic program (quadratic objective, linear constraints)
    Qp,
    /// Quadratically constrained program
    Qcp,
    /// Nonlinear program
    Nlp,
    /// Mixed-integer linear program
    Mip,
    /// Mixed-integer nonlinear program
    Minlp,
    /// Variational inequality
    Vi,
    /// Mixed complementarity problem
    Mcp,
    /// Extended mathematical program (EMPDAG present)
    Emp,
}

impl ModelType {
    /// True for the classical single-problem types
    pub fn is_classical(self) -> bool {
        !matches!(self, ModelType::Emp | ModelType::Undefined)
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelType::Undefined => "undefined",
            ModelType::Lp => "LP",
            ModelType::Qp => "QP",
            ModelType::Qcp => "QCP",
            ModelType::Nlp => "NLP",
            ModelType::Mip => "MIP",
            ModelType::Minlp => "MINLP",
            ModelType::Vi => "VI",
            ModelType::Mcp => "MCP",
            ModelType::Emp => "EMP",
        };
        f.write_str(s)
    }
}

/// Backend a model was created for
///
/// The engine is byte-layout agnostic; the tag only routes I/O in the
/// surrounding layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// GAMS bridge
    Gams,
    /// Internal representation
    #[default]
    Rhp,
    /// Julia bridge
    Julia,
    /// AMPL bridge
    Ampl,
}

/// Model status reported after a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelStatus {
    /// No solve attempted yet
    #[default]
    Unset,
    /// Optimal solution found
    Optimal,
    /// Feasible solution found
    Feasible,
    /// Problem is infeasible
    Infeasible,
    /// Problem is unbounded
    Unbounded,
    /// Unknown status
    Unknown,
}

/// Solver status reported after a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolveStatus {
    /// No solve attempted yet
    #[default]
    Unset,
    /// Solver completed normally
    Normal,
    /// Iteration limit hit
    IterationLimit,
    /// Time limit hit
    TimeLimit,
    /// Solver failed
    SolverError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sense_opposite() {
        assert_eq!(Sense::Min.opposite(), Sense::Max);
        assert_eq!(Sense::Max.opposite(), Sense::Min);
        assert_eq!(Sense::Feasibility.opposite(), Sense::Feasibility);
    }

    #[test]
    fn test_modeltype_classical() {
        assert!(ModelType::Lp.is_classical());
        assert!(!ModelType::Emp.is_classical());
        assert!(!ModelType::Undefined.is_classical());
    }
}
