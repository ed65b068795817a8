//! Error types and result definitions for Seam.
//!
//! One unified error enum covers every recoverable condition in the
//! pipeline, one variant per taxonomy entry:
//! - caller misuse (malformed descriptors), reported before synthesis starts
//! - unsupported targets (no decodable body)
//! - synthesis faults (a transform produced an invalid instruction sequence)
//! - installation faults (target not detourable, with a reason string)
//! - runtime faults raised while executing synthesized bodies
//!
//! Patch *ordering* is intentionally absent: conflicting constraints degrade
//! to a best-effort order and never produce an error.

use crate::ids::MethodId;
use crate::value::Value;
use std::sync::Arc;
use thiserror::Error;

/// The unified result type used throughout Seam.
pub type PatchResult<T> = Result<T, PatchError>;

/// All recoverable error conditions in the patching pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// No replacement could be produced at all for the named method.
    #[error("MissingMethodError: cannot create replacement for {method}")]
    MissingMethod {
        /// Name or description of the method.
        method: Arc<str>,
    },

    /// The method has no decodable instruction body and no degraded path
    /// applies.
    #[error("UnsupportedMethodError: {method} has no decodable body")]
    UnsupportedMethod {
        /// Name or description of the method.
        method: Arc<str>,
    },

    /// A replacement was produced but the target could not be redirected.
    #[error("DetourError: method {method} cannot be patched. Reason: {reason}")]
    DetourRefused {
        /// Name or description of the target method.
        method: Arc<str>,
        /// Human-readable reason why the redirection was refused.
        reason: Arc<str>,
    },

    /// A caller-supplied descriptor is missing a required field.
    #[error("MalformedDescriptorError: {message}")]
    MalformedDescriptor {
        /// What was missing or inconsistent.
        message: Arc<str>,
    },

    /// A transform produced an instruction sequence the generator rejects.
    #[error("InvalidBodyError: {message}")]
    InvalidBody {
        /// What the generator rejected.
        message: Arc<str>,
    },

    /// Integer division by zero during execution.
    #[error("DivisionByZeroError: division by zero")]
    DivisionByZero,

    /// An explicit raise that escaped all exception regions.
    #[error("RaisedError: uncaught raise of {value}")]
    Raised {
        /// The raised payload, carried losslessly across frames.
        value: Value,
    },

    /// The executor met an opcode it cannot decode.
    #[error("InvalidOpcodeError: invalid opcode 0x{opcode:02x}")]
    InvalidOpcode {
        /// The raw opcode byte.
        opcode: u8,
    },

    /// Call depth limit exceeded while executing a synthesized body.
    #[error("RecursionError: call depth limit exceeded ({depth})")]
    RecursionLimit {
        /// The configured depth limit.
        depth: usize,
    },

    /// Internal invariant violation (should not happen).
    #[error("InternalError: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: Arc<str>,
    },
}

impl PatchError {
    /// No replacement could be produced for `method`.
    #[inline]
    pub fn missing_method(method: impl Into<Arc<str>>) -> Self {
        PatchError::MissingMethod {
            method: method.into(),
        }
    }

    /// `method` has no decodable body.
    #[inline]
    pub fn unsupported(method: impl Into<Arc<str>>) -> Self {
        PatchError::UnsupportedMethod {
            method: method.into(),
        }
    }

    /// The detour installer refused to redirect `method`.
    #[inline]
    pub fn detour_refused(method: impl Into<Arc<str>>, reason: impl Into<Arc<str>>) -> Self {
        PatchError::DetourRefused {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// A descriptor failed fast-path validation.
    #[inline]
    pub fn malformed(message: impl Into<Arc<str>>) -> Self {
        PatchError::MalformedDescriptor {
            message: message.into(),
        }
    }

    /// The generator rejected an instruction sequence.
    #[inline]
    pub fn invalid_body(message: impl Into<Arc<str>>) -> Self {
        PatchError::InvalidBody {
            message: message.into(),
        }
    }

    /// Internal invariant violation.
    #[inline]
    pub fn internal(message: impl Into<Arc<str>>) -> Self {
        PatchError::Internal {
            message: message.into(),
        }
    }

    /// Reference a method by id when no better description is available.
    #[inline]
    pub fn method_name(id: MethodId) -> Arc<str> {
        Arc::from(format!("{}", id).as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_reason() {
        let err = PatchError::detour_refused("Add", "method is pinned");
        let text = err.to_string();
        assert!(text.contains("DetourError"));
        assert!(text.contains("Add"));
        assert!(text.contains("pinned"));
    }

    #[test]
    fn test_missing_method_display() {
        let err = PatchError::missing_method("mods.standin");
        assert!(err.to_string().contains("cannot create replacement"));
    }

    #[test]
    fn test_variants_are_matchable() {
        let err = PatchError::unsupported("intrinsic");
        assert!(matches!(err, PatchError::UnsupportedMethod { .. }));
    }
}
