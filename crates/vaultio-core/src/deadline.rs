//! Operation deadlines.
//!
//! Public engine operations accept a deadline; fan-out loops and batch
//! iterations check it between steps and bail out with `Error::Cancelled`
//! without committing partial state.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};

/// Optional point in time after which an operation must stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline; the operation runs to completion.
    #[must_use]
    pub const fn none() -> Self {
        Self { at: None }
    }

    /// Deadline `timeout` from now.
    #[must_use]
    pub fn within(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with `Cancelled` if the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
