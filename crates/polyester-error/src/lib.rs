//! Shared error taxonomy.
//!
//! Every crate in this workspace defines its own `thiserror` enum for the
//! failures it can produce; this crate supplies the cross-cutting
//! classification (`ErrorCategory`) used by the CLI to decide exit codes and
//! message formatting, so a user/system/programmer/partial split is
//! available uniformly across every concrete error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a failure, independent of which crate raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input from the user: missing manifest, illegal path, bad
    /// arguments, circular dependency, empty glob match.
    User,
    /// Environment/IO failure: stat/read/write failure, subprocess
    /// failure, decryption failure.
    System,
    /// Invariant violation that must not occur in a correct
    /// implementation (registry miss, argument type mismatch after
    /// decode).
    Programmer,
    /// One plan in a concurrent apply failed; independent plans still
    /// ran to completion.
    Partial,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::User => "user",
            ErrorCategory::System => "system",
            ErrorCategory::Programmer => "programmer",
            ErrorCategory::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

/// Implemented by every crate-local error enum so the CLI can decide exit
/// behaviour without downcasting.
pub trait Categorized {
    fn category(&self) -> ErrorCategory;

    fn is_user_error(&self) -> bool {
        self.category() == ErrorCategory::User
    }
}
