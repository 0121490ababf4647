//! Cones bounding variables and equation inclusions

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A convex cone used coordinate-wise for variables and constraints
///
/// Only the cones the reformulators produce are represented; the polar and
/// dual maps below are what the Fenchel path needs to type its multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cone {
    /// The whole real line
    R,
    /// Nonnegative half line
    RPlus,
    /// Nonpositive half line
    RMinus,
    /// The singleton `{0}`
    Zero,
}

impl Cone {
    /// The polar cone
    ///
    /// `R° = {0}`, `(R₊)° = R₋`, `(R₋)° = R₊`, `{0}° = R`.
    pub fn polar(self) -> Cone {
        match self {
            Cone::R => Cone::Zero,
            Cone::RPlus => Cone::RMinus,
            Cone::RMinus => Cone::RPlus,
            Cone::Zero => Cone::R,
        }
    }

    /// The dual cone (the negative of the polar)
    pub fn dual(self) -> Cone {
        match self {
            Cone::R => Cone::Zero,
            Cone::RPlus => Cone::RPlus,
            Cone::RMinus => Cone::RMinus,
            Cone::Zero => Cone::R,
        }
    }

    /// True when membership can be written with linear inequalities
    pub fn is_polyhedral(self) -> bool {
        true
    }

    /// Membership test, used by structural checks in tests
    pub fn contains(self, x: f64) -> bool {
        match self {
            Cone::R => true,
            Cone::RPlus => x >= 0.0,
            Cone::RMinus => x <= 0.0,
            Cone::Zero => x == 0.0,
        }
    }

    /// Variable bounds expressing membership of the cone
    pub fn bounds(self) -> (f64, f64) {
        match self {
            Cone::R => (f64::NEG_INFINITY, f64::INFINITY),
            Cone::RPlus => (0.0, f64::INFINITY),
            Cone::RMinus => (f64::NEG_INFINITY, 0.0),
            Cone::Zero => (0.0, 0.0),
        }
    }

    /// The cone a finite lower/upper bound pair puts a coordinate in
    ///
    /// Errors with `InvalidValue` when `lb > ub`.
    pub fn from_bounds(lb: f64, ub: f64) -> Result<Cone> {
        if lb > ub {
            return Err(Error::invalid_value(format!(
                "inconsistent bounds: lb = {lb:e} > {ub:e} = ub"
            )));
        }
        let lb_fin = lb.is_finite();
        let ub_fin = ub.is_finite();
        Ok(match (lb_fin, ub_fin) {
            (true, true) if (ub - lb).abs() < f64::EPSILON => Cone::Zero,
            (true, _) => Cone::RPlus,
            (false, true) => Cone::RMinus,
            (false, false) => Cone::R,
        })
    }
}

impl std::fmt::Display for Cone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Cone::R => "R",
            Cone::RPlus => "R+",
            Cone::RMinus => "R-",
            Cone::Zero => "{0}",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polar_involution() {
        for c in [Cone::R, Cone::RPlus, Cone::RMinus, Cone::Zero] {
            assert_eq!(c.polar().polar(), c);
        }
    }

    #[test]
    fn test_dual_of_halflines() {
        assert_eq!(Cone::RPlus.dual(), Cone::RPlus);
        assert_eq!(Cone::RMinus.dual(), Cone::RMinus);
        assert_eq!(Cone::Zero.dual(), Cone::R);
    }

    #[test]
    fn test_from_bounds() {
        assert_eq!(Cone::from_bounds(0.0, f64::INFINITY).unwrap(), Cone::RPlus);
        assert_eq!(Cone::from_bounds(f64::NEG_INFINITY, 0.0).unwrap(), Cone::RMinus);
        assert_eq!(Cone::from_bounds(2.0, 2.0).unwrap(), Cone::Zero);
        assert_eq!(
            Cone::from_bounds(f64::NEG_INFINITY, f64::INFINITY).unwrap(),
            Cone::R
        );
        assert!(Cone::from_bounds(1.0, 0.0).is_err());
    }
}
