//! Confidence blending policies.
//!
//! When several independent signals touch the same coverage entry their
//! confidence labels are blended by a [`ConfidencePolicy`]. The default is
//! the pessimistic minimum; the policy is selected from configuration via
//! [`ConfidenceMerge`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Confidence;

/// Blends the confidence already on an entry with an incoming signal.
///
/// Implementations must be commutative and idempotent so that the fold
/// result does not depend on evidence order.
pub trait ConfidencePolicy: fmt::Debug + Send + Sync {
    fn merge(&self, current: Confidence, incoming: Confidence) -> Confidence;

    fn name(&self) -> &'static str;
}

/// Entry confidence is the weakest contributing signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pessimistic;

impl ConfidencePolicy for Pessimistic {
    fn merge(&self, current: Confidence, incoming: Confidence) -> Confidence {
        current.min(incoming)
    }

    fn name(&self) -> &'static str {
        "min"
    }
}

/// Entry confidence is the strongest contributing signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Optimistic;

impl ConfidencePolicy for Optimistic {
    fn merge(&self, current: Confidence, incoming: Confidence) -> Confidence {
        current.max(incoming)
    }

    fn name(&self) -> &'static str {
        "max"
    }
}

/// Configuration-facing selector for a [`ConfidencePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMerge {
    #[default]
    Min,
    Max,
}

impl ConfidenceMerge {
    pub fn policy(self) -> Box<dyn ConfidencePolicy> {
        match self {
            ConfidenceMerge::Min => Box::new(Pessimistic),
            ConfidenceMerge::Max => Box::new(Optimistic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pessimistic_takes_minimum() {
        let p = Pessimistic;
        assert_eq!(p.merge(Confidence::High, Confidence::Low), Confidence::Low);
        assert_eq!(p.merge(Confidence::Low, Confidence::High), Confidence::Low);
        assert_eq!(p.merge(Confidence::Medium, Confidence::Medium), Confidence::Medium);
    }

    #[test]
    fn selector_builds_named_policy() {
        assert_eq!(ConfidenceMerge::default().policy().name(), "min");
        assert_eq!(ConfidenceMerge::Max.policy().name(), "max");
        assert_eq!(
            ConfidenceMerge::Max.policy().merge(Confidence::Low, Confidence::High),
            Confidence::High
        );
    }
}
