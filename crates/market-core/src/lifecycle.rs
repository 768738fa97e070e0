//! # Status Lifecycles
//!
//! Every persisted status is a closed enum with an explicit transition
//! table. Storage refuses any move that is not listed.

use crate::error::{MarketError, MarketResult};
use std::fmt::Display;

/// A status enum with a fixed transition table
pub trait Lifecycle: Copy + PartialEq + Display + 'static {
    /// Entity name used in error messages
    const ENTITY: &'static str;

    /// States reachable in one step from `self`
    fn allowed_next(&self) -> &'static [Self];

    fn can_transition_to(&self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Returns `InvalidTransition` when `next` is not in the table
    fn ensure_transition(&self, next: Self) -> MarketResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(MarketError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// Result of a compare-and-set status change at the storage layer
#[derive(Debug, Clone)]
pub enum Transition<T> {
    /// The guard matched and the new state was written
    Applied(T),
    /// The persisted state did not match the guard; nothing was written
    Skipped(T),
}

impl<T> Transition<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Transition::Applied(v) | Transition::Skipped(v) => v,
        }
    }
}
