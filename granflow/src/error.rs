// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for configuration, setup, and run-time failure modes.
//!
//! Every fallible path in the library returns `Result<_, GranError>` so
//! callers (and the `simulator` binary's exit-code mapping) can pattern-match
//! on failure modes rather than parsing opaque strings.

use std::fmt;

/// Errors arising from scenario parsing, engine setup, or the step loop.
#[derive(Debug, Clone, PartialEq)]
pub enum GranError {
    /// A dimension index was out of range, or a vector had the wrong length.
    BadDimension(String),

    /// A configuration value was present but invalid (wrong type, out of range).
    BadArgument(String),

    /// The scenario file was structurally malformed. Carries the line number
    /// where parsing failed.
    BadStructure {
        /// 1-based line in the scenario file.
        line: usize,
        /// What went wrong.
        msg: String,
    },

    /// An engine invariant was violated at initialization (e.g. a run was
    /// requested with no integrator configured).
    InvalidSetup(String),

    /// An integrator or force kernel observed non-finite data.
    NanValue(String),

    /// A neighbor cell exceeded its occupancy bound. Indicates pathological
    /// particle clustering or a misconfigured cell size.
    CellOverflow {
        /// Linear index of the overflowing cell.
        cell: usize,
        /// Occupancy at the time of the overflow.
        occupancy: usize,
    },

    /// A data write failed (path and underlying IO error message).
    FileOpen(String),

    /// `total_time + dt == total_time`: the time step has fallen below the
    /// floating-point resolution of the accumulated time.
    LossOfPrecision,
}

impl fmt::Display for GranError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDimension(msg) => write!(f, "Bad dimension: {msg}"),
            Self::BadArgument(msg) => write!(f, "Bad argument: {msg}"),
            Self::BadStructure { line, msg } => {
                write!(f, "Bad structure at line {line}: {msg}")
            }
            Self::InvalidSetup(msg) => write!(f, "Invalid setup: {msg}"),
            Self::NanValue(msg) => write!(f, "Non-finite value: {msg}"),
            Self::CellOverflow { cell, occupancy } => {
                write!(f, "Cell {cell} overflowed ({occupancy} particles)")
            }
            Self::FileOpen(msg) => write!(f, "File write failed: {msg}"),
            Self::LossOfPrecision => {
                write!(f, "Loss of precision: dt vanished against total time")
            }
        }
    }
}

impl std::error::Error for GranError {}

impl GranError {
    /// Whether this error should stop a run before it starts (configuration
    /// and setup errors) as opposed to aborting a run in progress.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::BadDimension(_)
                | Self::BadArgument(_)
                | Self::BadStructure { .. }
                | Self::InvalidSetup(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_bad_structure_carries_line() {
        let err = GranError::BadStructure {
            line: 14,
            msg: "unmatched brace".into(),
        };
        assert_eq!(err.to_string(), "Bad structure at line 14: unmatched brace");
    }

    #[test]
    fn display_cell_overflow() {
        let err = GranError::CellOverflow {
            cell: 7,
            occupancy: 1025,
        };
        assert!(err.to_string().contains("Cell 7"));
        assert!(err.to_string().contains("1025"));
    }

    #[test]
    fn config_errors_classified() {
        assert!(GranError::BadDimension("d=5".into()).is_config_error());
        assert!(GranError::BadArgument("x".into()).is_config_error());
        assert!(GranError::BadStructure {
            line: 1,
            msg: String::new()
        }
        .is_config_error());
        assert!(!GranError::LossOfPrecision.is_config_error());
        assert!(!GranError::NanValue("v".into()).is_config_error());
    }

    #[test]
    fn error_trait_object() {
        let err = GranError::LossOfPrecision;
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("precision"));
    }
}
