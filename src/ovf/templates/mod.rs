//! The built-in template catalog
//!
//! - [`loss`] - regression and classification losses (l1, l2, elastic
//!   net, huber, hinge, vapnik, hubnik)
//! - [`risk`] - risk measures over discrete distributions (expectation,
//!   CVaR and its expectation mixtures)

pub mod loss;
pub mod risk;

use std::sync::Arc;

use crate::ovf::OvfTemplate;

/// Every built-in template, in catalog order
pub fn builtins() -> Vec<Arc<dyn OvfTemplate>> {
    vec![
        Arc::new(loss::L1),
        Arc::new(loss::L2),
        Arc::new(loss::ElasticNet),
        Arc::new(loss::Huber),
        Arc::new(loss::Hinge),
        Arc::new(loss::Vapnik),
        Arc::new(loss::Hubnik),
        Arc::new(risk::Expectation),
        Arc::new(risk::CvarUp),
        Arc::new(risk::CvarLo),
        Arc::new(risk::ECvarUp),
        Arc::new(risk::ECvarLo),
    ]
}
