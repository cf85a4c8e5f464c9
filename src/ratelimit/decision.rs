//! Rate limit decisions and the policies that shape them.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Outcome of evaluating one request against its window.
#[derive(Debug)]
pub enum Decision {
    /// The request fits in the window; `count` is the counter after it.
    Admit { count: i64 },
    /// The window quota is exhausted; `count` still advanced.
    Deny { count: i64 },
    /// The store failed, so no count is known.
    Indeterminate(StoreError),
}

impl Decision {
    /// Collapse the decision to admit (`true`) or deny (`false`).
    ///
    /// Indeterminate decisions follow `policy`.
    pub fn is_admitted(&self, policy: FailurePolicy) -> bool {
        match self {
            Decision::Admit { .. } => true,
            Decision::Deny { .. } => false,
            Decision::Indeterminate(_) => policy == FailurePolicy::Allow,
        }
    }

    /// The counter value after this request, if the store answered.
    pub fn count(&self) -> Option<i64> {
        match self {
            Decision::Admit { count } | Decision::Deny { count } => Some(*count),
            Decision::Indeterminate(_) => None,
        }
    }

    /// Whether the store failed while deciding.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Decision::Indeterminate(_))
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Admit { count } => write!(f, "admit (count={})", count),
            Decision::Deny { count } => write!(f, "deny (count={})", count),
            Decision::Indeterminate(e) => write!(f, "indeterminate ({})", e),
        }
    }
}

/// What to do when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deny the request (fail closed)
    #[default]
    Deny,
    /// Admit the request (fail open)
    Allow,
}

/// How the first request of a window is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// `EXISTS`, then `SET` on a miss or `INCR` on a hit.
    ///
    /// Two concurrent first requests can both see a miss and both create the
    /// counter at 1.
    #[default]
    CheckThenCreate,
    /// Conditional `SET NX`, then `INCR` if the key was already there.
    ///
    /// The first admission of a window happens exactly once per key.
    CreateIfAbsent,
}
