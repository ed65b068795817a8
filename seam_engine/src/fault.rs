//! Failure mapping.
//!
//! Any error raised during synthesis or installation is wrapped, at the
//! pipeline boundary where it would otherwise escape, into one structured
//! fault carrying both the cause and the indexed instruction map available
//! at the time of failure. Consumers can then report "failed near
//! synthesized instruction N" instead of an opaque low-level error. The
//! map is empty when the body could never be decoded.

use seam_bytecode::InstructionMap;
use seam_core::PatchError;
use std::error::Error;
use std::fmt;

/// A pipeline failure with instruction context.
#[derive(Debug, Clone)]
pub struct EngineFault {
    /// The underlying error.
    pub cause: PatchError,
    /// Indexed instructions of the body being synthesized when the
    /// failure occurred; empty if decoding never succeeded.
    pub instructions: InstructionMap,
}

impl EngineFault {
    /// Wrap an error together with the best-available instruction map.
    pub fn new(cause: PatchError, instructions: InstructionMap) -> Self {
        Self {
            cause,
            instructions,
        }
    }

    /// Render a full report including the instruction listing.
    pub fn report(&self) -> String {
        if self.instructions.is_empty() {
            format!("{}\n(no instructions were decoded)", self.cause)
        } else {
            format!(
                "{}\nsynthesized instructions:\n{}",
                self.cause, self.instructions
            )
        }
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if !self.instructions.is_empty() {
            write!(
                f,
                " ({} synthesized instructions mapped)",
                self.instructions.len()
            )?;
        }
        Ok(())
    }
}

impl Error for EngineFault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.cause)
    }
}

impl From<PatchError> for EngineFault {
    fn from(cause: PatchError) -> Self {
        Self::new(cause, InstructionMap::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seam_bytecode::{BodyBuilder, InstructionStream};
    use seam_core::Value;

    fn some_map() -> InstructionMap {
        let mut b = BodyBuilder::new("t", 0);
        let r = b.alloc_register();
        b.emit_load_const(r, Value::Int(1));
        b.emit_return(r);
        let body = b.finish();
        InstructionStream::decode(&body).unwrap().indexed()
    }

    #[test]
    fn test_display_mentions_map_size() {
        let fault = EngineFault::new(PatchError::invalid_body("boom"), some_map());
        let text = fault.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("2 synthesized instructions"));
    }

    #[test]
    fn test_report_lists_instructions() {
        let fault = EngineFault::new(PatchError::invalid_body("boom"), some_map());
        assert!(fault.report().contains("LoadConst"));
    }

    #[test]
    fn test_from_error_has_empty_map() {
        let fault = EngineFault::from(PatchError::missing_method("m"));
        assert!(fault.instructions.is_empty());
        assert!(fault.report().contains("no instructions"));
    }

    #[test]
    fn test_source_exposes_cause() {
        let fault = EngineFault::from(PatchError::DivisionByZero);
        use std::error::Error;
        assert!(fault.source().is_some());
    }
}
