//! Reverse (standin) assembly.
//!
//! A standin is a caller-declared method whose body serves as the base for
//! an assembled callable: "the original's transpiler stack, replayed over
//! my declaration." The assembled replacement is installed over the
//! *standin's* entry slot; the live original is never touched, so callers
//! can read through a patch stack without perturbing it.

use crate::detour;
use crate::fault::EngineFault;
use crate::ledger::PatchLedger;
use crate::method_table::MethodTable;
use crate::patch::TranspilerFn;
use crate::sorter::{self, SortDirection};
use crate::synth;
use seam_core::{MethodId, PatchError};
use tracing::debug;

/// Which transpilers the assembly replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReverseMode {
    /// Replay the transpilers currently registered against the original.
    #[default]
    Snapshot,
    /// Ignore the registry; apply only the extra transform, if any.
    Live,
}

/// Caller-supplied description of a standin assembly.
#[derive(Debug, Clone, Default)]
pub struct StandinDescriptor {
    /// The standin method. A missing callable is caller misuse and fails
    /// fast, before any instruction decoding.
    pub method: Option<MethodId>,
    /// Transpiler selection mode.
    pub mode: ReverseMode,
    /// Emit extra diagnostics; never changes the assembled body.
    pub debug: bool,
}

impl StandinDescriptor {
    /// Describe a snapshot assembly over `method`.
    pub fn snapshot(method: MethodId) -> Self {
        Self {
            method: Some(method),
            mode: ReverseMode::Snapshot,
            debug: false,
        }
    }

    /// Describe a live assembly over `method`.
    pub fn live(method: MethodId) -> Self {
        Self {
            method: Some(method),
            mode: ReverseMode::Live,
            debug: false,
        }
    }
}

/// Assemble a standin replacement for `original` and install it over the
/// standin's own entry slot. Returns the replacement's id.
///
/// In [`ReverseMode::Snapshot`] the original's currently registered
/// transpilers are replayed over the standin's declared body; `extra` runs
/// after them. A standin without a decodable body assembles from an empty
/// base. On success the original → replacement association is recorded in
/// the ledger.
pub fn reverse_patch(
    table: &MethodTable,
    ledger: &dyn PatchLedger,
    standin: &StandinDescriptor,
    original: MethodId,
    extra: Option<TranspilerFn>,
) -> Result<MethodId, EngineFault> {
    let standin_id = standin
        .method
        .ok_or_else(|| PatchError::malformed("standin descriptor has no underlying callable"))?;
    let entry = table.lookup(standin_id).ok_or_else(|| {
        PatchError::malformed(format!("standin method {} is not registered", standin_id))
    })?;

    let mut transforms: Vec<TranspilerFn> = Vec::new();
    if standin.mode == ReverseMode::Snapshot {
        if let Some(info) = ledger.patch_info(original) {
            let sorted = sorter::sort(info.transpilers(), SortDirection::HigherFirst, standin.debug);
            transforms.extend(synth::transform_fns(&sorted)?);
        }
    }
    if let Some(extra) = extra {
        transforms.push(extra);
    }

    let base = entry.body();
    let assembled = synth::synthesize(
        base.as_deref(),
        entry.name(),
        entry.arg_count(),
        &transforms,
        standin.debug,
    )?;
    let map = assembled.map.clone();

    let replacement = table.register(assembled.body);
    detour::install(table, standin_id, replacement)
        .map_err(|err| EngineFault::new(err, map))?;
    ledger.record_replacement(original, replacement);

    if standin.debug {
        debug!(
            standin = %standin_id,
            original = %original,
            replacement = %replacement,
            transpilers = transforms.len(),
            "standin assembled"
        );
    }
    Ok(replacement)
}
