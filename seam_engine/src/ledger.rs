//! The patch registry collaborator.
//!
//! Synthesis and reverse assembly never reach for a global singleton; they
//! read registered patches and record replacements through the
//! [`PatchLedger`] trait, so the pipeline is testable with any bookkeeping
//! behind it. [`MemoryLedger`] is the in-process implementation.

use crate::patch::{Patch, PatchInfo, PatchOwner};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use seam_core::MethodId;
use std::sync::Arc;

/// Read/record interface to the process-wide patch bookkeeping.
pub trait PatchLedger: Send + Sync {
    /// Immutable snapshot of every patch registered against `original`.
    ///
    /// The snapshot is stable for the duration of a synthesis pass even if
    /// other callers register patches concurrently.
    fn patch_info(&self, original: MethodId) -> Option<Arc<PatchInfo>>;

    /// Record a method → replacement association after a successful
    /// reverse/standin install.
    fn record_replacement(&self, method: MethodId, replacement: MethodId);

    /// Look up a previously recorded replacement.
    fn replacement_of(&self, method: MethodId) -> Option<MethodId>;
}

/// In-memory ledger implementation.
#[derive(Default)]
pub struct MemoryLedger {
    infos: RwLock<FxHashMap<MethodId, Arc<PatchInfo>>>,
    replacements: RwLock<FxHashMap<MethodId, MethodId>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patch against `original`, assigning its registration
    /// index. Replaces the stored snapshot; in-flight syntheses keep the
    /// snapshot they already hold.
    pub fn register_patch(&self, original: MethodId, patch: Patch) {
        let mut infos = self.infos.write();
        let info = infos.entry(original).or_default();
        Arc::make_mut(info).add(patch);
    }

    /// Remove every patch `owner` registered against `original`.
    pub fn remove_patch(&self, original: MethodId, owner: &PatchOwner) {
        let mut infos = self.infos.write();
        if let Some(info) = infos.get_mut(&original) {
            Arc::make_mut(info).remove_owner(owner);
        }
    }
}

impl PatchLedger for MemoryLedger {
    fn patch_info(&self, original: MethodId) -> Option<Arc<PatchInfo>> {
        self.infos.read().get(&original).cloned()
    }

    fn record_replacement(&self, method: MethodId, replacement: MethodId) {
        self.replacements.write().insert(method, replacement);
    }

    fn replacement_of(&self, method: MethodId) -> Option<MethodId> {
        self.replacements.read().get(&method).copied()
    }
}
