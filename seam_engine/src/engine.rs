//! The engine facade.
//!
//! [`PatchEngine`] bundles the method table, the in-memory ledger, and the
//! pipeline entry points behind one handle. Library users who need finer
//! control (a custom [`crate::ledger::PatchLedger`], direct stream surgery)
//! can use the individual modules; the facade covers the common register →
//! patch → apply → call flow.

use crate::detour;
use crate::fault::EngineFault;
use crate::interp::Interpreter;
use crate::ledger::MemoryLedger;
use crate::method_table::{MethodTable, TableStats};
use crate::patch::{Patch, PatchOwner, TranspilerFn};
use crate::reverse::{self, StandinDescriptor};
use crate::synth::{self, SynthOptions};
use seam_bytecode::MethodBody;
use seam_core::{MethodId, PatchResult, Value};
use std::sync::Arc;

/// Engine-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Emit extra diagnostics during sorting and synthesis.
    pub debug: bool,
    /// Call depth limit when executing through [`PatchEngine::call`].
    pub max_call_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debug: false,
            max_call_depth: crate::interp::DEFAULT_MAX_DEPTH,
        }
    }
}

/// One method table, one ledger, one pipeline.
#[derive(Default)]
pub struct PatchEngine {
    table: Arc<MethodTable>,
    ledger: Arc<MemoryLedger>,
    opts: EngineOptions,
}

impl PatchEngine {
    /// Create an engine with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with explicit options.
    pub fn with_options(opts: EngineOptions) -> Self {
        Self {
            opts,
            ..Self::default()
        }
    }

    /// Register a method with a concrete body.
    pub fn register_method(&self, body: MethodBody) -> MethodId {
        self.table.register(body)
    }

    /// Register a stub without a decodable body.
    pub fn register_stub(&self, name: impl Into<Arc<str>>, arg_count: u16) -> MethodId {
        self.table.register_stub(name, arg_count)
    }

    /// Mark a method as non-detourable.
    pub fn pin(&self, id: MethodId) -> bool {
        self.table.pin(id)
    }

    /// Register a patch against `original`. Takes effect on the next
    /// [`apply`](Self::apply).
    pub fn register_patch(&self, original: MethodId, patch: Patch) {
        self.ledger.register_patch(original, patch);
    }

    /// Remove every patch `owner` registered against `original`. Takes
    /// effect on the next [`apply`](Self::apply).
    pub fn remove_patch(&self, original: MethodId, owner: &PatchOwner) {
        self.ledger.remove_patch(original, owner);
    }

    /// Synthesize and install the current replacement for `original`.
    pub fn apply(&self, original: MethodId) -> Result<MethodId, EngineFault> {
        synth::update_wrapper(&self.table, &*self.ledger, original, self.synth_opts())
    }

    /// Restore `original`'s entry slot to its own body. Registered patches
    /// stay in the ledger.
    pub fn unapply(&self, original: MethodId) -> PatchResult<()> {
        detour::uninstall(&self.table, original)
    }

    /// Assemble a standin replacement for `original` and install it over
    /// the standin's entry slot.
    pub fn reverse(
        &self,
        standin: &StandinDescriptor,
        original: MethodId,
        extra: Option<TranspilerFn>,
    ) -> Result<MethodId, EngineFault> {
        reverse::reverse_patch(&self.table, &*self.ledger, standin, original, extra)
    }

    /// Call a method through its entry slot.
    pub fn call(&self, id: MethodId, args: &[Value]) -> PatchResult<Value> {
        Interpreter::with_max_depth(&self.table, self.opts.max_call_depth).call(id, args)
    }

    /// The underlying method table.
    pub fn table(&self) -> &MethodTable {
        &self.table
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    /// Snapshot of the method table counters.
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    fn synth_opts(&self) -> SynthOptions {
        SynthOptions {
            debug: self.opts.debug,
        }
    }
}
